use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Append-only operator log. Lines get a wall-clock prefix; a sink that
/// cannot be opened or written stops logging but never disturbs the caller.
pub struct LogSink {
    label: &'static str,
    file: Option<File>,
}

impl LogSink {
    pub fn open(dir: &Path, file_name: &str, label: &'static str) -> Self {
        let _ = std::fs::create_dir_all(dir);
        let path = dir.join(file_name);

        let file = match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => Some(file),
            Err(e) => {
                log::warn!("unable to open {label} log {}: {e}", path.display());
                None
            }
        };

        Self { label, file }
    }

    /// A sink that drops everything; used when on-disk logging is not wanted.
    pub fn disabled(label: &'static str) -> Self {
        Self { label, file: None }
    }

    pub fn append(&mut self, text: &str) {
        let Some(mut file) = self.file.take() else {
            return;
        };

        let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        for line in text.split('\n').filter(|l| !l.is_empty()) {
            if let Err(e) = writeln!(file, "{stamp}: {line}") {
                log::warn!("unable to write {} log: {e}", self.label);
                return;
            }
        }

        self.file = Some(file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("habtrack-log-{tag}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn lines_are_stamped_and_appended() {
        let dir = temp_dir("append");
        let mut sink = LogSink::open(&dir, "radio.txt", "radio");

        sink.append("hab,alive,END_TX");
        sink.append("first\nsecond\n");

        let contents = fs::read_to_string(dir.join("radio.txt")).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("hab,alive,END_TX"));
        assert!(lines[2].contains(": second"));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn disabled_sink_swallows_everything() {
        let mut sink = LogSink::disabled("radio");
        sink.append("nothing happens");
    }
}
