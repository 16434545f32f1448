use image::GenericImageView;
use std::fs;
use std::path::{Path, PathBuf};

use crate::frame::IMAGE_CHUNK_SIZE;

/// Reassembles snapshot images arriving as bounded chunks. Every full-size
/// chunk extends the in-progress buffer; a short chunk is the final one and
/// flushes the image to disk under the next output counter.
pub struct ImageAssembler {
    output_dir: PathBuf,
    buffer: Vec<u8>,
    counter: u32,
}

impl ImageAssembler {
    pub fn new(output_dir: &Path) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
            buffer: Vec::new(),
            counter: 0,
        }
    }

    /// Returns the written file path when this chunk completed an image.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Option<PathBuf> {
        self.buffer.extend_from_slice(chunk);

        if chunk.len() >= IMAGE_CHUNK_SIZE {
            return None;
        }
        self.flush()
    }

    fn flush(&mut self) -> Option<PathBuf> {
        if self.buffer.is_empty() {
            return None;
        }

        let path = self
            .output_dir
            .join(format!("snapshot_{:03}.jpg", self.counter));

        match image::load_from_memory(&self.buffer) {
            Ok(img) => {
                let (width, height) = img.dimensions();
                log::info!("received snapshot {}: {width}x{height}", self.counter);
            }
            // Keep the payload on disk anyway; a truncated transfer may
            // still be partially viewable.
            Err(e) => log::warn!("snapshot {} did not decode: {e}", self.counter),
        }

        let result = fs::create_dir_all(&self.output_dir)
            .and_then(|_| fs::write(&path, &self.buffer));

        self.buffer.clear();
        self.counter += 1;

        match result {
            Ok(()) => Some(path),
            Err(e) => {
                log::error!("failed to write snapshot {}: {e}", path.display());
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("habtrack-imaging-{tag}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn full_chunks_accumulate_without_flushing() {
        let dir = temp_dir("accumulate");
        let mut assembler = ImageAssembler::new(&dir);

        assert_eq!(assembler.push_chunk(&[0xab; IMAGE_CHUNK_SIZE]), None);
        assert_eq!(assembler.push_chunk(&[0xcd; IMAGE_CHUNK_SIZE]), None);
        assert_eq!(assembler.buffer.len(), 2 * IMAGE_CHUNK_SIZE);
    }

    #[test]
    fn short_chunk_flushes_and_advances_counter() {
        let dir = temp_dir("flush");
        let mut assembler = ImageAssembler::new(&dir);

        assembler.push_chunk(&[0x11; IMAGE_CHUNK_SIZE]);
        let first = assembler.push_chunk(&[0x22; 10]).unwrap();
        assert!(first.ends_with("snapshot_000.jpg"));
        assert_eq!(fs::read(&first).unwrap().len(), IMAGE_CHUNK_SIZE + 10);

        let second = assembler.push_chunk(&[0x33; 4]).unwrap();
        assert!(second.ends_with("snapshot_001.jpg"));
        assert_eq!(fs::read(&second).unwrap().len(), 4);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn empty_buffer_never_flushes_a_file() {
        let dir = temp_dir("empty");
        let mut assembler = ImageAssembler::new(&dir);
        assert_eq!(assembler.flush(), None);
        assert!(!dir.exists());
    }
}
