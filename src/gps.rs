use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serialport::{ClearBuffer, SerialPort};
use thiserror::Error;

use crate::config::{
    GPS_IDLE_ITERATIONS, GPS_IDLE_POLL_MS, GPS_LINE_RETRIES, GPS_SETTLE_MS, SERIAL_TIMEOUT_MS,
};
use crate::events::{Event, EventSender};

#[derive(Debug, Error)]
pub enum GpsError {
    #[error("serial error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Normalized position fix handed to the radio loop and the dish controller.
/// Immutable once published to the shared slot.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionFix {
    pub utc: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Latest-value handoff between the GPS worker and its consumers.
/// None is the "no fix" sentinel, a normal and frequent condition.
pub type FixSlot = Arc<Mutex<Option<PositionFix>>>;

/// Converts a `$GPGGA` sentence to a signed-decimal-degree fix. Anything
/// that is not a usable GGA sentence, including an all-zero position, is no
/// fix.
pub fn parse_gga(sentence: &str) -> Option<PositionFix> {
    let fields: Vec<&str> = sentence.trim().split(',').collect();
    if fields.len() < 6 || fields[0] != "$GPGGA" {
        return None;
    }

    if fields[1].len() < 6 {
        return None;
    }
    let utc = fields[1][..6].to_string();

    let mut latitude = dm_to_degrees(fields[2], 2)?;
    if fields[3] == "S" {
        latitude = -latitude;
    } else if fields[3] != "N" {
        return None;
    }

    let mut longitude = dm_to_degrees(fields[4], 3)?;
    if fields[5] == "W" {
        longitude = -longitude;
    } else if fields[5] != "E" {
        return None;
    }

    if latitude == 0.0 && longitude == 0.0 {
        return None;
    }

    Some(PositionFix {
        utc,
        latitude,
        longitude,
    })
}

/// `ddmm.mmmm` / `dddmm.mmmm` to decimal degrees.
fn dm_to_degrees(value: &str, degree_digits: usize) -> Option<f64> {
    if value.len() <= degree_digits {
        return None;
    }
    let degrees: f64 = value[..degree_digits].parse().ok()?;
    let minutes: f64 = value[degree_digits..].parse().ok()?;
    Some(degrees + minutes / 60.0)
}

/// Owns the GPS serial port and scans it for GGA sentences, one acquisition
/// cycle at a time.
pub struct GpsReader {
    port_name: String,
    baud: u32,
    port: Option<Box<dyn SerialPort>>,
    pending: Vec<u8>,
    fault_reported: bool,
    events: EventSender,
}

impl GpsReader {
    pub fn new(port_name: &str, baud: u32, events: EventSender) -> Self {
        Self {
            port_name: port_name.to_string(),
            baud,
            port: None,
            pending: Vec::new(),
            fault_reported: false,
            events,
        }
    }

    /// One cycle: settle, then scan a bounded number of lines and idle polls
    /// for a GGA sentence. Returns the fix, or None for "no fix this cycle".
    pub fn acquire(&mut self) -> Option<PositionFix> {
        if let Err(e) = self.ensure_open() {
            self.report_fault(&e);
            thread::sleep(Duration::from_millis(SERIAL_TIMEOUT_MS));
            return None;
        }

        match self.scan_for_gga() {
            Ok(fix) => fix,
            Err(e) => {
                self.report_fault(&e);
                // Force a reopen attempt next cycle.
                self.port = None;
                None
            }
        }
    }

    fn ensure_open(&mut self) -> Result<(), GpsError> {
        if self.port.is_some() {
            return Ok(());
        }

        let port = serialport::new(&self.port_name, self.baud)
            .timeout(Duration::from_millis(SERIAL_TIMEOUT_MS))
            .open()?;
        log::info!("opened gps port {} at {} baud", self.port_name, self.baud);
        self.port = Some(port);
        self.pending.clear();
        self.fault_reported = false;
        Ok(())
    }

    fn scan_for_gga(&mut self) -> Result<Option<PositionFix>, GpsError> {
        let Some(port) = self.port.as_mut() else {
            return Ok(None);
        };

        // Drop whatever queued up since the last cycle so the fix is fresh.
        port.clear(ClearBuffer::All)?;
        self.pending.clear();
        thread::sleep(Duration::from_millis(GPS_SETTLE_MS));

        let mut line_retries = GPS_LINE_RETRIES;
        let mut idle_budget = GPS_IDLE_ITERATIONS;

        while line_retries > 0 && idle_budget > 0 {
            if port.bytes_to_read()? == 0 {
                idle_budget -= 1;
                thread::sleep(Duration::from_millis(GPS_IDLE_POLL_MS));
                continue;
            }

            let mut buf = [0u8; 256];
            match port.read(&mut buf) {
                Ok(n) => self.pending.extend_from_slice(&buf[..n]),
                Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(e) => return Err(e.into()),
            }

            while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = self.pending.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line);
                let line = line.trim();

                if line.starts_with("$GPGGA") {
                    return Ok(parse_gga(line));
                }
                if !line.is_empty() {
                    line_retries -= 1;
                    if line_retries == 0 {
                        break;
                    }
                }
            }
        }

        Ok(None)
    }

    fn report_fault(&mut self, error: &GpsError) {
        log::warn!("gps port {}: {error}", self.port_name);
        if !self.fault_reported {
            self.fault_reported = true;
            self.events.send(Event::ChannelError {
                channel: "gps",
                message: error.to_string(),
            });
        }
    }
}

/// Dedicated GPS worker. Communicates only by publishing the latest fix (or
/// the no-fix sentinel) to the shared slot.
pub fn spawn(
    port_name: String,
    baud: u32,
    events: EventSender,
    slot: FixSlot,
    running: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name("gps".to_string())
        .spawn(move || {
            let mut reader = GpsReader::new(&port_name, baud, events);
            while running.load(Ordering::Relaxed) {
                let fix = reader.acquire();
                if let Ok(mut slot) = slot.lock() {
                    *slot = fix;
                }
            }
            log::info!("gps worker exiting");
        })
        .expect("failed to spawn gps worker")
}
