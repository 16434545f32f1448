use std::collections::VecDeque;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum FieldParseError {
    #[error("expected at least {expected} fields, got {got}")]
    TooFewFields { expected: usize, got: usize },
    #[error("field {name} is not a number: {value:?}")]
    BadNumber { name: &'static str, value: String },
    #[error("field {name} is not a valid HHMMSS timestamp: {value:?}")]
    BadTimestamp { name: &'static str, value: String },
}

/// Position report from a chase vehicle: `HHMMSS,lat,lon`.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleFix {
    pub utc: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl VehicleFix {
    pub fn parse(payload: &str) -> Result<Self, FieldParseError> {
        let fields: Vec<&str> = payload.split(',').collect();
        if fields.len() < 3 {
            return Err(FieldParseError::TooFewFields {
                expected: 3,
                got: fields.len(),
            });
        }

        Ok(Self {
            utc: parse_utc(fields[0])?,
            latitude: required_f64("latitude", fields[1])?,
            longitude: required_f64("longitude", fields[2])?,
        })
    }
}

/// Full balloon telemetry payload, comma-delimited in fixed field order:
/// `HHMMSS,lat,lon,alt,tempIn,tempOut,tempBat,volt,humid,ax,ay,az,errBits`.
/// An empty string marks a missing sensor value and never shifts the
/// positions of later fields.
#[derive(Debug, Clone, PartialEq)]
pub struct BalloonSample {
    pub utc: String,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_m: Option<f64>,
    pub temp_inside_c: Option<f64>,
    pub temp_outside_c: Option<f64>,
    pub temp_battery_c: Option<f64>,
    pub voltage: Option<f64>,
    pub humidity_pct: Option<f64>,
    pub accel_x: Option<f64>,
    pub accel_y: Option<f64>,
    pub accel_z: Option<f64>,
    pub error_bits: u32,
}

pub const BALLOON_FIELD_COUNT: usize = 13;

impl BalloonSample {
    pub fn parse(payload: &str) -> Result<Self, FieldParseError> {
        let fields: Vec<&str> = payload.split(',').collect();
        if fields.len() < BALLOON_FIELD_COUNT {
            return Err(FieldParseError::TooFewFields {
                expected: BALLOON_FIELD_COUNT,
                got: fields.len(),
            });
        }

        Ok(Self {
            utc: parse_utc(fields[0])?,
            latitude: required_f64("latitude", fields[1])?,
            longitude: required_f64("longitude", fields[2])?,
            altitude_m: optional_f64("altitude", fields[3])?,
            temp_inside_c: optional_f64("tempInside", fields[4])?,
            temp_outside_c: optional_f64("tempOutside", fields[5])?,
            temp_battery_c: optional_f64("tempBattery", fields[6])?,
            voltage: optional_f64("voltage", fields[7])?,
            humidity_pct: optional_f64("humidity", fields[8])?,
            accel_x: optional_f64("accelX", fields[9])?,
            accel_y: optional_f64("accelY", fields[10])?,
            accel_z: optional_f64("accelZ", fields[11])?,
            error_bits: if fields[12].is_empty() {
                0
            } else {
                fields[12].parse().map_err(|_| FieldParseError::BadNumber {
                    name: "errorBitmask",
                    value: fields[12].to_string(),
                })?
            },
        })
    }
}

/// One retained history entry, common to balloon and chase vehicles.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySample {
    pub utc: String,
    pub altitude_m: Option<f64>,
    pub latitude: f64,
    pub longitude: f64,
    pub voltage: Option<f64>,
    pub temp_inside_c: Option<f64>,
    pub temp_outside_c: Option<f64>,
    pub temp_battery_c: Option<f64>,
}

impl From<&BalloonSample> for TelemetrySample {
    fn from(s: &BalloonSample) -> Self {
        Self {
            utc: s.utc.clone(),
            altitude_m: s.altitude_m,
            latitude: s.latitude,
            longitude: s.longitude,
            voltage: s.voltage,
            temp_inside_c: s.temp_inside_c,
            temp_outside_c: s.temp_outside_c,
            temp_battery_c: s.temp_battery_c,
        }
    }
}

impl From<&VehicleFix> for TelemetrySample {
    fn from(f: &VehicleFix) -> Self {
        Self {
            utc: f.utc.clone(),
            altitude_m: None,
            latitude: f.latitude,
            longitude: f.longitude,
            voltage: None,
            temp_inside_c: None,
            temp_outside_c: None,
            temp_battery_c: None,
        }
    }
}

/// Rates derived from the oldest and newest retained samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rates {
    pub ground_speed_m_s: f64,
    pub ascent_rate_m_s: Option<f64>,
}

/// Bounded FIFO of telemetry samples. Oldest entries are evicted first and
/// the length never exceeds the configured capacity.
pub struct TelemetryHistory {
    samples: VecDeque<TelemetrySample>,
    capacity: usize,
}

impl TelemetryHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, sample: TelemetrySample) {
        while self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<&TelemetrySample> {
        self.samples.back()
    }

    /// Ground speed and ascent rate between the oldest and newest retained
    /// samples. None with fewer than two samples or a non-positive elapsed
    /// time (midnight wrap).
    pub fn rates(&self) -> Option<Rates> {
        if self.samples.len() < 2 {
            return None;
        }

        let first = self.samples.front()?;
        let last = self.samples.back()?;

        let elapsed = utc_to_seconds(&last.utc)? as i64 - utc_to_seconds(&first.utc)? as i64;
        if elapsed <= 0 {
            return None;
        }
        let elapsed = elapsed as f64;

        let distance = distance_on_unit_sphere(
            first.latitude,
            first.longitude,
            last.latitude,
            last.longitude,
        );

        let ascent_rate_m_s = match (first.altitude_m, last.altitude_m) {
            (Some(a1), Some(a2)) => Some((a2 - a1) / elapsed),
            _ => None,
        };

        Some(Rates {
            ground_speed_m_s: distance / elapsed,
            ascent_rate_m_s,
        })
    }
}

/// Great-circle distance in meters on a spherical earth.
pub fn distance_on_unit_sphere(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS_M: f64 = 6_378_100.0;

    let phi1 = (90.0 - lat1).to_radians();
    let phi2 = (90.0 - lat2).to_radians();
    let theta1 = lon1.to_radians();
    let theta2 = lon2.to_radians();

    let cos_arc = phi1.sin() * phi2.sin() * (theta1 - theta2).cos() + phi1.cos() * phi2.cos();
    cos_arc.clamp(-1.0, 1.0).acos() * EARTH_RADIUS_M
}

pub fn utc_to_seconds(utc: &str) -> Option<u32> {
    if utc.len() < 6 || !utc.is_char_boundary(6) {
        return None;
    }
    let hours: u32 = utc[0..2].parse().ok()?;
    let minutes: u32 = utc[2..4].parse().ok()?;
    let seconds: u32 = utc[4..6].parse().ok()?;
    Some(hours * 3600 + minutes * 60 + seconds)
}

/// Onboard fault flags reported in the balloon's error bitmask, in bit order.
const REPORTED_ERROR_FLAGS: [&str; 17] = [
    "Exception while taking snapshot burst",
    "Exception while transmitting through radio",
    "Exception while receiving radio packet",
    "Exception while receiving GPS packet",
    "Exception while reading RPi temperature",
    "Exception while reading external temperature",
    "Exception while reading battery temperature",
    "Exception while reading battery voltage",
    "Exception while reading humidity sensor",
    "Exception while reading accelerometer",
    "Exception while processing line",
    "Exception while initiating video",
    "Exception while releasing balloon",
    "Exception while resetting BRM",
    "Exception while switching radio and GPS USB ports",
    "Exception while running script, restarting",
    "Exception while handling GPS packet",
];

pub fn decode_reported_errors(bits: u32) -> Vec<&'static str> {
    REPORTED_ERROR_FLAGS
        .iter()
        .enumerate()
        .filter(|(i, _)| bits & (1 << i) != 0)
        .map(|(_, msg)| *msg)
        .collect()
}

/// Everything the display layer needs for one balloon data frame.
#[derive(Debug, Clone)]
pub struct BalloonUpdate {
    pub sample: BalloonSample,
    pub rates: Option<Rates>,
    pub reported_errors: Vec<&'static str>,
}

fn parse_utc(value: &str) -> Result<String, FieldParseError> {
    if utc_to_seconds(value).is_none() {
        return Err(FieldParseError::BadTimestamp {
            name: "timestamp",
            value: value.to_string(),
        });
    }
    Ok(value[..6].to_string())
}

fn required_f64(name: &'static str, value: &str) -> Result<f64, FieldParseError> {
    value.parse().map_err(|_| FieldParseError::BadNumber {
        name,
        value: value.to_string(),
    })
}

fn optional_f64(name: &'static str, value: &str) -> Result<Option<f64>, FieldParseError> {
    if value.is_empty() {
        return Ok(None);
    }
    required_f64(name, value).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_PAYLOAD: &str =
        "174523,36.8623,-121.0413,1520.5,21.0,-4.5,18.2,8.25,43,0.02,-0.01,9.81,5";

    fn sample_at(utc: &str, lat: f64, alt: Option<f64>) -> TelemetrySample {
        TelemetrySample {
            utc: utc.to_string(),
            altitude_m: alt,
            latitude: lat,
            longitude: -121.0,
            voltage: None,
            temp_inside_c: None,
            temp_outside_c: None,
            temp_battery_c: None,
        }
    }

    #[test]
    fn balloon_sample_parses_all_fields() {
        let sample = BalloonSample::parse(FULL_PAYLOAD).unwrap();
        assert_eq!(sample.utc, "174523");
        assert_eq!(sample.latitude, 36.8623);
        assert_eq!(sample.longitude, -121.0413);
        assert_eq!(sample.altitude_m, Some(1520.5));
        assert_eq!(sample.voltage, Some(8.25));
        assert_eq!(sample.error_bits, 5);
    }

    #[test]
    fn empty_sensor_fields_do_not_shift_positions() {
        let sample = BalloonSample::parse("174523,36.8623,-121.0413,,,,18.2,8.25,,,,,0").unwrap();
        assert_eq!(sample.altitude_m, None);
        assert_eq!(sample.temp_inside_c, None);
        assert_eq!(sample.temp_battery_c, Some(18.2));
        assert_eq!(sample.voltage, Some(8.25));
        assert_eq!(sample.accel_z, None);
    }

    #[test]
    fn bad_numeric_field_discards_whole_sample() {
        let err = BalloonSample::parse("174523,36.8623,west,100,,,,,,,,,0").unwrap_err();
        assert_eq!(
            err,
            FieldParseError::BadNumber {
                name: "longitude",
                value: "west".to_string()
            }
        );
    }

    #[test]
    fn truncated_payload_is_rejected() {
        assert!(matches!(
            BalloonSample::parse("174523,36.8,-121.0"),
            Err(FieldParseError::TooFewFields { .. })
        ));
    }

    #[test]
    fn vehicle_fix_parses() {
        let fix = VehicleFix::parse("093012,36.5949,-121.8746").unwrap();
        assert_eq!(fix.utc, "093012");
        assert_eq!(fix.latitude, 36.5949);
    }

    #[test]
    fn history_never_exceeds_capacity_and_evicts_fifo() {
        let mut history = TelemetryHistory::new(3);
        for i in 0..10 {
            history.push(sample_at(&format!("0000{i:02}"), 36.0, Some(i as f64)));
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.latest().unwrap().utc, "000009");
        // Oldest retained entry is insert 7 of the burst.
        assert_eq!(history.rates().unwrap().ascent_rate_m_s, Some(1.0));
    }

    #[test]
    fn rates_need_two_samples() {
        let mut history = TelemetryHistory::new(5);
        assert!(history.rates().is_none());
        history.push(sample_at("120000", 36.0, Some(100.0)));
        assert!(history.rates().is_none());
    }

    #[test]
    fn ascent_rate_uses_oldest_and_newest() {
        let mut history = TelemetryHistory::new(5);
        for (utc, alt) in [("120000", 100.0), ("120010", 160.0), ("120020", 300.0)] {
            history.push(sample_at(utc, 36.0, Some(alt)));
        }
        let rates = history.rates().unwrap();
        assert_eq!(rates.ascent_rate_m_s, Some(10.0));
        assert!(rates.ground_speed_m_s.abs() < 1e-9);
    }

    #[test]
    fn ground_speed_matches_unit_sphere_distance() {
        let mut history = TelemetryHistory::new(5);
        history.push(sample_at("120000", 36.00, None));
        history.push(sample_at("120100", 36.01, None));
        let rates = history.rates().unwrap();
        // 0.01 deg of latitude is ~1113 m, over 60 s.
        assert!((rates.ground_speed_m_s - 18.55).abs() < 0.05);
        assert_eq!(rates.ascent_rate_m_s, None);
    }

    #[test]
    fn midnight_wrap_yields_no_rates() {
        let mut history = TelemetryHistory::new(5);
        history.push(sample_at("235958", 36.0, Some(10.0)));
        history.push(sample_at("000002", 36.0, Some(20.0)));
        assert!(history.rates().is_none());
    }

    #[test]
    fn error_bitmask_decodes_set_flags() {
        let errors = decode_reported_errors(0b101);
        assert_eq!(
            errors,
            vec![
                "Exception while taking snapshot burst",
                "Exception while receiving radio packet",
            ]
        );
        assert!(decode_reported_errors(0).is_empty());
        assert_eq!(
            decode_reported_errors(1 << 16),
            vec!["Exception while handling GPS packet"]
        );
    }
}
