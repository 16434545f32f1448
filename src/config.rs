use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::station::Station;

// Radio link
pub const SERIAL_TIMEOUT_MS: u64 = 1_000;
pub const RX_SETTLE_MS: u64 = 750;

// Presence
pub const LIVENESS_RESET: i32 = 3;

// Command confirmation
pub const COMMAND_ATTEMPTS: u32 = 3;
pub const COMMAND_RETRY_DELAY_SECS: u64 = 2;

// GPS scan budget per acquisition cycle
pub const GPS_LINE_RETRIES: u32 = 10;
pub const GPS_IDLE_ITERATIONS: u32 = 100;
pub const GPS_SETTLE_MS: u64 = 750;
pub const GPS_IDLE_POLL_MS: u64 = 20;

// Protocol poll loop
pub const POLL_IDLE_MS: u64 = 50;
pub const PLAYBACK_LINE_DELAY_MS: u64 = 500;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to write settings: {0}")]
    Write(#[from] std::io::Error),
    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_radio_port")]
    pub radio_port: String,
    #[serde(default = "default_radio_baud")]
    pub radio_baud: u32,
    #[serde(default = "default_callsign")]
    pub callsign: String,
    #[serde(default = "default_gps_port")]
    pub gps_port: String,
    #[serde(default = "default_gps_baud")]
    pub gps_baud: u32,
    #[serde(default = "default_history_depth")]
    pub telemetry_history_depth: usize,
    #[serde(default = "default_true")]
    pub notify_on_error: bool,
    #[serde(default)]
    pub offline_mode: bool,
    /// Replay frames from `test_telemetry_path` instead of opening the radio.
    #[serde(default)]
    pub test_mode: bool,
    #[serde(default = "default_test_telemetry_path")]
    pub test_telemetry_path: String,
    #[serde(default)]
    pub dish_enabled: bool,
    #[serde(default = "default_dish_address")]
    pub dish_address: String,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

fn default_heartbeat_interval() -> u64 {
    5
}

fn default_radio_port() -> String {
    if cfg!(windows) {
        "COM7".to_string()
    } else {
        "/dev/ttyUSB0".to_string()
    }
}

fn default_radio_baud() -> u32 {
    38_400
}

fn default_callsign() -> String {
    "chase1".to_string()
}

fn default_gps_port() -> String {
    if cfg!(windows) {
        "COM4".to_string()
    } else {
        "/dev/ttyUSB1".to_string()
    }
}

fn default_gps_baud() -> u32 {
    4_800
}

fn default_history_depth() -> usize {
    5
}

fn default_true() -> bool {
    true
}

fn default_test_telemetry_path() -> String {
    "test_telemetry.txt".to_string()
}

fn default_dish_address() -> String {
    "192.168.101.98:5003".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for Settings {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults deserialize from empty object")
    }
}

impl Settings {
    /// Settings live in the user's config directory unless an explicit path
    /// was given on the command line.
    pub fn default_path() -> PathBuf {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        config_dir.join("habtrack").join("settings.json")
    }

    /// Load settings from disk, or fall back to defaults.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(settings) => {
                    log::info!("loaded settings from {}", path.display());
                    settings
                }
                Err(e) => {
                    log::error!("failed to parse {}: {e}; using defaults", path.display());
                    Self::default()
                }
            },
            Err(_) => {
                log::info!("no settings file at {}, using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// The station this ground node transmits as. An unrecognized configured
    /// callsign falls back to chase1 rather than refusing to start.
    pub fn station(&self) -> Station {
        Station::from_callsign(&self.callsign).unwrap_or_else(|| {
            log::warn!("unknown callsign {:?} in settings, using chase1", self.callsign);
            Station::Chase1
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let settings = Settings::default();
        assert_eq!(settings.heartbeat_interval_secs, 5);
        assert_eq!(settings.telemetry_history_depth, 5);
        assert!(settings.notify_on_error);
        assert!(!settings.test_mode);
        assert_eq!(settings.station(), Station::Chase1);
    }

    #[test]
    fn partial_settings_fill_in_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"callsign": "nps", "radio_baud": 9600}"#).unwrap();
        assert_eq!(settings.station(), Station::GroundStation);
        assert_eq!(settings.radio_baud, 9_600);
        assert_eq!(settings.heartbeat_interval_secs, 5);
    }

    #[test]
    fn bad_callsign_falls_back() {
        let settings: Settings = serde_json::from_str(r#"{"callsign": "balloon9"}"#).unwrap();
        assert_eq!(settings.station(), Station::Chase1);
    }
}
