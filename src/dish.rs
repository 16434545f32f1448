use std::io::{BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::events::{Event, EventSender};

// Ground-station reference the dish points from.
pub const REFERENCE_LAT_DEG: f64 = 36.594947;
pub const REFERENCE_LON_DEG: f64 = -121.874647;
/// 25 ft above sea level.
pub const REFERENCE_ALT_M: f64 = 25.0 * 0.3048;

const EARTH_RADIUS_MI: f64 = 3958.76;
const MILES_PER_METER: f64 = 0.000621371192;

// Actuator hard limits and the deadband below which no move is worth issuing.
const MIN_AZ_DEG: f64 = 1.0;
const MAX_AZ_DEG: f64 = 359.0;
const MIN_EL_DEG: f64 = 0.0;
const MAX_EL_DEG: f64 = 90.0;
const MOVE_DEADBAND_DEG: f64 = 0.5;

const SETTLE_BASE: Duration = Duration::from_secs(5);
const SETTLE_CAP: Duration = Duration::from_secs(30);
const ACU_IO_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum DishError {
    #[error("acu i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot resolve acu address {0:?}")]
    BadAddress(String),
    #[error("unparseable acu position response {0:?}")]
    BadResponse(String),
    #[error("a pointing move is already in flight")]
    MoveInFlight,
}

/// Spherical-earth great-circle bearing plus law-of-cosines elevation from
/// the fixed reference point to a target fix. Pure: identical inputs give
/// bit-identical output.
pub fn compute_bearing(lat_deg: f64, lon_deg: f64, alt_m: f64) -> (f64, f64) {
    let llat = REFERENCE_LAT_DEG.to_radians();
    let blat = lat_deg.to_radians();
    let dlon = (lon_deg - REFERENCE_LON_DEG).to_radians();

    let a = (blat.cos() * dlon.sin()).powi(2);
    let b = (llat.cos() * blat.sin() - llat.sin() * blat.cos() * dlon.cos()).powi(2);
    let c = llat.sin() * blat.sin() + llat.cos() * blat.cos() * dlon.cos();
    let surface_mi = EARTH_RADIUS_MI * (a + b).sqrt().atan2(c);

    let alt_delta_mi = (alt_m - REFERENCE_ALT_M) * MILES_PER_METER;
    let elevation = if surface_mi > 0.0 {
        (alt_delta_mi / surface_mi).atan().to_degrees()
    } else if alt_delta_mi > 0.0 {
        90.0
    } else {
        0.0
    };

    let dx = llat.cos() * blat.sin() - llat.sin() * blat.cos() * dlon.cos();
    let dy = dlon.sin() * blat.cos();
    let azimuth = (dy.atan2(dx).to_degrees() + 360.0) % 360.0;

    (azimuth, elevation)
}

/// The antenna control unit's line protocol, abstracted so tests can script
/// an actuator.
pub trait AcuPort: Send {
    /// `SQ` query; answers with the current mount position.
    fn query_position(&mut self) -> Result<(f64, f64), DishError>;
    /// `AM<az>;EM<el>;` move command.
    fn move_to(&mut self, az: f64, el: f64) -> Result<(), DishError>;
    /// `AS;ES;` stop both axes.
    fn standby(&mut self) -> Result<(), DishError>;
}

pub struct TcpAcu {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
}

impl TcpAcu {
    pub fn connect(address: &str) -> Result<Self, DishError> {
        let addr = address
            .to_socket_addrs()
            .map_err(|_| DishError::BadAddress(address.to_string()))?
            .next()
            .ok_or_else(|| DishError::BadAddress(address.to_string()))?;

        let stream = TcpStream::connect_timeout(&addr, ACU_IO_TIMEOUT)?;
        stream.set_read_timeout(Some(ACU_IO_TIMEOUT))?;
        stream.set_write_timeout(Some(ACU_IO_TIMEOUT))?;
        let reader = BufReader::new(stream.try_clone()?);

        log::info!("connected to dish acu at {address}");
        Ok(Self { stream, reader })
    }
}

impl AcuPort for TcpAcu {
    fn query_position(&mut self) -> Result<(f64, f64), DishError> {
        self.stream.write_all(b"SQ\n")?;

        let mut line = String::new();
        self.reader.read_line(&mut line)?;
        parse_position_response(line.trim())
    }

    fn move_to(&mut self, az: f64, el: f64) -> Result<(), DishError> {
        let cmd = format!("AM{az:.2};EM{el:.2};\n");
        self.stream.write_all(cmd.as_bytes())?;
        Ok(())
    }

    fn standby(&mut self) -> Result<(), DishError> {
        self.stream.write_all(b"AS;ES;\n")?;
        Ok(())
    }
}

/// `AZ=<deg>,EL=<deg>` from the SQ query.
fn parse_position_response(line: &str) -> Result<(f64, f64), DishError> {
    let bad = || DishError::BadResponse(line.to_string());

    let mut parts = line.split(',');
    let az = parts
        .next()
        .and_then(|p| p.split_once('='))
        .and_then(|(_, v)| v.trim().parse::<f64>().ok())
        .ok_or_else(bad)?;
    let el = parts
        .next()
        .and_then(|p| p.split_once('='))
        .and_then(|(_, v)| v.trim().parse::<f64>().ok())
        .ok_or_else(bad)?;

    Ok((az, el))
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct DishState {
    last_az: f64,
    last_el: f64,
    initialized: bool,
    move_in_flight: bool,
}

/// Issues bounded, rate-limited pointing commands. A move is followed by a
/// settle wait sized to the commanded travel, then an explicit standby; the
/// last-commanded position only advances after standby is out, so the mount
/// never receives overlapping moves.
pub struct DishController<P: AcuPort> {
    port: P,
    state: DishState,
    settle_base: Duration,
    settle_cap: Duration,
    events: EventSender,
}

impl<P: AcuPort> DishController<P> {
    pub fn new(port: P, events: EventSender) -> Self {
        Self {
            port,
            state: DishState {
                last_az: -1.0,
                last_el: -1.0,
                initialized: false,
                move_in_flight: false,
            },
            settle_base: SETTLE_BASE,
            settle_cap: SETTLE_CAP,
            events,
        }
    }

    #[cfg(test)]
    fn without_settle(port: P, events: EventSender) -> Self {
        let mut controller = Self::new(port, events);
        controller.settle_base = Duration::ZERO;
        controller.settle_cap = Duration::ZERO;
        controller
    }

    pub fn point(&mut self, az: f64, el: f64) -> Result<(), DishError> {
        if self.state.move_in_flight {
            return Err(DishError::MoveInFlight);
        }

        if !self.state.initialized {
            // Seed from the actual mount position instead of assuming home.
            let (current_az, current_el) = match self.port.query_position() {
                Ok(position) => position,
                Err(e) => {
                    let _ = self.port.standby();
                    return Err(e);
                }
            };
            log::info!("dish reports position az {current_az:.1} el {current_el:.1}");
            self.state.last_az = current_az;
            self.state.last_el = current_el;
            self.state.initialized = true;
        }

        let az = az.clamp(MIN_AZ_DEG, MAX_AZ_DEG);
        let el = el.clamp(MIN_EL_DEG, MAX_EL_DEG);

        let az_err = (az - self.state.last_az).abs();
        let el_err = (el - self.state.last_el).abs();
        if az_err < MOVE_DEADBAND_DEG && el_err < MOVE_DEADBAND_DEG {
            return Ok(());
        }

        self.state.move_in_flight = true;
        let result = self.execute_move(az, el, az_err.max(el_err));
        self.state.move_in_flight = false;

        if result.is_ok() {
            self.state.last_az = az;
            self.state.last_el = el;
            self.events.send(Event::DishPointed {
                azimuth: az,
                elevation: el,
            });
        }
        result
    }

    fn execute_move(&mut self, az: f64, el: f64, largest_delta: f64) -> Result<(), DishError> {
        if let Err(e) = self.port.move_to(az, el) {
            let _ = self.port.standby();
            return Err(e);
        }

        thread::sleep(self.settle_duration(largest_delta));
        self.port.standby()?;
        Ok(())
    }

    /// Travel-proportional wait before standby: delta/4 seconds on top of a
    /// fixed base, capped.
    fn settle_duration(&self, largest_delta: f64) -> Duration {
        let travel = Duration::from_secs_f64(largest_delta / 4.0);
        (self.settle_base + travel).min(self.settle_cap)
    }
}

/// Dish worker: drains the target channel to the freshest balloon fix,
/// computes the bearing, and points. Pointing is serialized by construction;
/// a connection failure is reported once per episode and retried on the next
/// target.
pub fn spawn(
    address: String,
    events: EventSender,
    targets: mpsc::Receiver<(f64, f64, f64)>,
    running: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name("dish".to_string())
        .spawn(move || {
            let mut controller: Option<DishController<TcpAcu>> = None;
            let mut fault_reported = false;

            while running.load(Ordering::Relaxed) {
                let mut target = match targets.recv_timeout(Duration::from_millis(500)) {
                    Ok(t) => t,
                    Err(mpsc::RecvTimeoutError::Timeout) => continue,
                    Err(mpsc::RecvTimeoutError::Disconnected) => break,
                };
                // Only the freshest fix matters for pointing.
                while let Ok(newer) = targets.try_recv() {
                    target = newer;
                }

                if controller.is_none() {
                    match TcpAcu::connect(&address) {
                        Ok(acu) => {
                            controller = Some(DishController::new(acu, events.clone()));
                            fault_reported = false;
                        }
                        Err(e) => {
                            if !fault_reported {
                                fault_reported = true;
                                events.send(Event::ChannelError {
                                    channel: "dish",
                                    message: e.to_string(),
                                });
                            }
                            continue;
                        }
                    }
                }

                let (lat, lon, alt) = target;
                let (az, el) = compute_bearing(lat, lon, alt);
                let outcome = match controller.as_mut() {
                    Some(active) => active.point(az, el),
                    None => continue,
                };
                if let Err(e) = outcome {
                    log::warn!("dish pointing failed: {e}");
                    if !fault_reported {
                        fault_reported = true;
                        events.send(Event::ChannelError {
                            channel: "dish",
                            message: e.to_string(),
                        });
                    }
                    // Reconnect on the next target.
                    controller = None;
                }
            }
            log::info!("dish worker exiting");
        })
        .expect("failed to spawn dish worker")
}
