use std::fs;
use std::io::Read;
use std::thread;
use std::time::Duration;

use serialport::SerialPort;
use thiserror::Error;

use crate::config::{PLAYBACK_LINE_DELAY_MS, RX_SETTLE_MS, SERIAL_TIMEOUT_MS};
use crate::frame::FRAME_TERMINATOR;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("channel {0} is not open")]
    NotOpen(String),
    #[error("serial error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// The shared half-duplex byte channel. One implementation talks to the real
/// radio; another replays canned traffic for test mode; tests plug in their
/// own.
pub trait Link: Send {
    /// Returns whatever bytes have accumulated, possibly none. If nothing is
    /// waiting, settles briefly and checks once more; never blocks beyond
    /// the settle interval plus the port timeout.
    fn receive(&mut self) -> Result<Vec<u8>, LinkError>;

    fn send(&mut self, bytes: &[u8]) -> Result<(), LinkError>;

    /// Close (tolerating an already-dead port) and open with new parameters.
    /// On failure the link stays disabled until the next successful reopen.
    fn reopen(&mut self, port: &str, baud: u32) -> Result<(), LinkError>;
}

/// Radio over a serial port.
pub struct SerialLink {
    port_name: String,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialLink {
    pub fn open(port_name: &str, baud: u32) -> Result<Self, LinkError> {
        let mut link = Self {
            port_name: port_name.to_string(),
            port: None,
        };
        link.reopen(port_name, baud)?;
        Ok(link)
    }

    /// A link that starts disabled and comes up on the first reopen; lets
    /// the loop run (and report) without a radio attached.
    pub fn closed(port_name: &str) -> Self {
        Self {
            port_name: port_name.to_string(),
            port: None,
        }
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPort>, LinkError> {
        self.port
            .as_mut()
            .ok_or_else(|| LinkError::NotOpen(self.port_name.clone()))
    }
}

impl Link for SerialLink {
    fn receive(&mut self) -> Result<Vec<u8>, LinkError> {
        let port = self.port_mut()?;

        if port.bytes_to_read()? == 0 {
            thread::sleep(Duration::from_millis(RX_SETTLE_MS));
        }

        let mut accumulated = Vec::new();
        let mut buf = [0u8; 512];
        while port.bytes_to_read()? > 0 {
            match port.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => accumulated.extend_from_slice(&buf[..n]),
                Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => break,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(accumulated)
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        let port = self.port_mut()?;
        port.write_all(bytes)?;
        port.flush()?;
        Ok(())
    }

    fn reopen(&mut self, port_name: &str, baud: u32) -> Result<(), LinkError> {
        // Dropping the old handle closes it; a port that already died closes
        // with it.
        self.port = None;
        self.port_name = port_name.to_string();

        match serialport::new(port_name, baud)
            .timeout(Duration::from_millis(SERIAL_TIMEOUT_MS))
            .open()
        {
            Ok(port) => {
                log::info!("opened radio port {port_name} at {baud} baud");
                self.port = Some(port);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Test-mode link: replays one frame per receive cycle from a text file of
/// captured traffic, and swallows sends.
pub struct PlaybackLink {
    lines: Vec<Vec<u8>>,
    next: usize,
}

impl PlaybackLink {
    pub fn open(path: &str) -> Result<Self, LinkError> {
        let contents = fs::read(path)?;
        let lines = contents
            .split(|&b| b == b'\n')
            .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
            .filter(|line| !line.is_empty())
            .map(|line| {
                let mut framed = line.to_vec();
                if !framed.ends_with(b",END_TX") {
                    framed.extend_from_slice(&FRAME_TERMINATOR[..FRAME_TERMINATOR.len() - 1]);
                }
                framed.push(b'\n');
                framed
            })
            .collect();
        Ok(Self { lines, next: 0 })
    }

    #[cfg(test)]
    fn from_lines(lines: Vec<Vec<u8>>) -> Self {
        Self { lines, next: 0 }
    }
}

impl Link for PlaybackLink {
    fn receive(&mut self) -> Result<Vec<u8>, LinkError> {
        if self.next >= self.lines.len() {
            thread::sleep(Duration::from_millis(PLAYBACK_LINE_DELAY_MS));
            return Ok(Vec::new());
        }
        thread::sleep(Duration::from_millis(PLAYBACK_LINE_DELAY_MS));
        let line = self.lines[self.next].clone();
        self.next += 1;
        Ok(line)
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        log::debug!("playback link swallowing {} byte send", bytes.len());
        Ok(())
    }

    fn reopen(&mut self, _port: &str, _baud: u32) -> Result<(), LinkError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{self, FrameBody};
    use crate::station::Station;

    #[test]
    fn playback_replays_lines_in_order_then_goes_quiet() {
        let mut link = PlaybackLink::from_lines(vec![
            b"hab,alive,END_TX\n".to_vec(),
            b"hab,init,uptime 00:00:12,END_TX\n".to_vec(),
        ]);

        let first = link.receive().unwrap();
        assert_eq!(frame::decode(&first)[0].sender, Station::Balloon);
        let second = link.receive().unwrap();
        assert_eq!(
            frame::decode(&second)[0].body,
            FrameBody::Init("uptime 00:00:12".to_string())
        );
        assert!(link.receive().unwrap().is_empty());
    }

    #[test]
    fn closed_serial_link_reports_not_open() {
        let mut link = SerialLink::closed("/dev/null-port");
        assert!(matches!(link.receive(), Err(LinkError::NotOpen(_))));
        assert!(matches!(link.send(b"x"), Err(LinkError::NotOpen(_))));
    }
}
