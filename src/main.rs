use clap::Parser;
use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

mod command;
mod config;
mod dish;
mod events;
mod frame;
mod gps;
mod imaging;
mod link;
mod logfile;
mod presence;
mod radio;
mod station;
mod telemetry;

use command::CommandRequest;
use config::Settings;
use events::Event;
use gps::FixSlot;
use radio::RadioCommand;

#[derive(Parser)]
#[command(name = "habtrack")]
#[command(about = "Balloon and chase-vehicle tracking over a half-duplex radio link")]
struct Cli {
    /// Settings file (defaults to the per-user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// List available serial ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Replay captured frames from a file instead of opening the radio
    #[arg(long)]
    test_mode: bool,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    if cli.list_ports {
        return list_ports();
    }

    let settings_path = cli.config.unwrap_or_else(Settings::default_path);
    let mut settings = Settings::load(&settings_path);
    if cli.test_mode {
        settings.test_mode = true;
    }
    if !settings_path.exists() {
        if let Err(e) = settings.save(&settings_path) {
            log::warn!("could not write initial settings: {e}");
        }
    }

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            log::info!("shutdown requested");
            running.store(false, Ordering::Relaxed);
        }) {
            log::warn!("could not install shutdown handler: {e}");
        }
    }

    let (events_tx, events_rx) = events::channel();
    let (control_tx, control_rx) = mpsc::channel();
    let fix_slot: FixSlot = Arc::new(Mutex::new(None));

    let dish_handle = if settings.dish_enabled {
        let (targets_tx, targets_rx) = mpsc::channel();
        let handle = dish::spawn(
            settings.dish_address.clone(),
            events_tx.clone(),
            targets_rx,
            running.clone(),
        );
        Some((targets_tx, handle))
    } else {
        None
    };
    let dish_targets = dish_handle.as_ref().map(|(tx, _)| tx.clone());

    let gps_handle = if settings.test_mode {
        None
    } else {
        Some(gps::spawn(
            settings.gps_port.clone(),
            settings.gps_baud,
            events_tx.clone(),
            fix_slot.clone(),
            running.clone(),
        ))
    };

    let radio_handle = radio::spawn(
        settings.clone(),
        events_tx.clone(),
        fix_slot,
        dish_targets,
        control_rx,
        running.clone(),
    );

    spawn_operator_input(control_tx, running.clone());

    println!(
        "habtrack up as {}. Type to chat; /arm /disarm /release /reset /snapshot /disk /port; ctrl-c to quit.",
        settings.station().display_name()
    );

    // The display sink: consume protocol events until shutdown.
    while running.load(Ordering::Relaxed) {
        match events_rx.recv_timeout(Duration::from_millis(250)) {
            Ok(event) => display(event, settings.notify_on_error),
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
    running.store(false, Ordering::Relaxed);

    let _ = radio_handle.join();
    if let Some(handle) = gps_handle {
        let _ = handle.join();
    }
    if let Some((targets_tx, handle)) = dish_handle {
        drop(targets_tx);
        let _ = handle.join();
    }

    ExitCode::SUCCESS
}

fn list_ports() -> ExitCode {
    match serialport::available_ports() {
        Ok(ports) if !ports.is_empty() => {
            for port in ports {
                println!("{}", port.port_name);
            }
            ExitCode::SUCCESS
        }
        Ok(_) => {
            println!("no serial ports found");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("failed to enumerate serial ports: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Reads operator lines from stdin and feeds the protocol loop. Plain text
/// is chat; slash commands trigger the confirmable balloon commands.
fn spawn_operator_input(control: mpsc::Sender<RadioCommand>, running: Arc<AtomicBool>) {
    thread::Builder::new()
        .name("operator".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                if !running.load(Ordering::Relaxed) {
                    break;
                }
                let Ok(line) = line else { break };
                match parse_operator_line(&line) {
                    Some(action) => {
                        if control.send(action).is_err() {
                            break;
                        }
                    }
                    None => {
                        if !line.trim().is_empty() {
                            println!("unrecognized command: {}", line.trim());
                        }
                    }
                }
            }
        })
        .expect("failed to spawn operator input thread");
}

fn parse_operator_line(line: &str) -> Option<RadioCommand> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let Some(rest) = line.strip_prefix('/') else {
        return Some(RadioCommand::SendChat(line.to_string()));
    };

    let mut parts = rest.split_whitespace();
    match parts.next()? {
        "arm" => Some(RadioCommand::Trigger(CommandRequest::Arm)),
        "disarm" => Some(RadioCommand::Trigger(CommandRequest::Disarm)),
        "release" => Some(RadioCommand::Trigger(CommandRequest::Release)),
        "reset" => Some(RadioCommand::Trigger(CommandRequest::Reset)),
        "disk" => Some(RadioCommand::Trigger(CommandRequest::DiskSpace)),
        "snapshot" => {
            let burst = parts.next()?.parse().ok()?;
            // Interval omitted means one burst right now.
            let interval = match parts.next() {
                Some(value) => value.parse().ok()?,
                None => -1,
            };
            Some(RadioCommand::Trigger(CommandRequest::Snapshot {
                burst,
                interval,
            }))
        }
        "port" => {
            let port = parts.next()?.to_string();
            let baud = parts.next()?.parse().ok()?;
            Some(RadioCommand::Reconfigure { port, baud })
        }
        _ => None,
    }
}

fn display(event: Event, notify_on_error: bool) {
    match event {
        Event::NetworkStatus { station, active } => {
            let state = if active { "active" } else { "down" };
            println!("[net] {} is {state}", station.display_name());
        }
        Event::Chat { station, text } => {
            println!("{}: {text}", station.display_name());
        }
        Event::BalloonTelemetry(update) => {
            let s = &update.sample;
            let altitude = s
                .altitude_m
                .map_or("?".to_string(), |a| format!("{a:.0} m"));
            let voltage = s.voltage.map_or("?".to_string(), |v| format!("{v:.2} V"));
            print!(
                "[hab] {} {:.5}, {:.5} alt {altitude} batt {voltage}",
                s.utc, s.latitude, s.longitude
            );
            if let Some(rates) = update.rates {
                print!(" speed {:.1} m/s", rates.ground_speed_m_s);
                if let Some(ascent) = rates.ascent_rate_m_s {
                    print!(" ascent {ascent:.1} m/s");
                }
            }
            println!();
            for error in update.reported_errors {
                println!("[hab] reported: {error}");
            }
        }
        Event::VehicleTelemetry { station, fix } => {
            println!(
                "[{}] {} {:.5}, {:.5}",
                station.display_name(),
                fix.utc,
                fix.latitude,
                fix.longitude
            );
        }
        Event::BalloonInit { boot_marker } => {
            println!("[hab] startup: {boot_marker}");
        }
        Event::CommandSent {
            kind,
            attempts_left,
        } => {
            println!("[cmd] {kind:?} sent, waiting for confirmation ({attempts_left} retries left)");
        }
        Event::CommandConfirmed { kind, response } => {
            println!("[cmd] {kind:?} confirmed: {response:?}");
        }
        Event::CommandUnconfirmed { kind } => {
            println!("[cmd] {kind:?}: no confirmation received, re-trigger to try again");
        }
        Event::ChannelError { channel, message } => {
            if notify_on_error {
                eprintln!("[{channel}] channel error: {message}");
            } else {
                log::warn!("[{channel}] channel error: {message}");
            }
        }
        Event::RadioConsole { line } => {
            log::debug!("radio console: {}", line.trim_end());
        }
        Event::ImageReceived { path } => {
            println!("[img] snapshot saved to {}", path.display());
        }
        Event::DishPointed { azimuth, elevation } => {
            println!("[dish] pointing az {azimuth:.1} el {elevation:.1}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_becomes_chat() {
        assert_eq!(
            parse_operator_line("heading north on 101"),
            Some(RadioCommand::SendChat("heading north on 101".to_string()))
        );
        assert_eq!(parse_operator_line("   "), None);
    }

    #[test]
    fn slash_commands_map_to_triggers() {
        assert_eq!(
            parse_operator_line("/arm"),
            Some(RadioCommand::Trigger(CommandRequest::Arm))
        );
        assert_eq!(
            parse_operator_line("/snapshot 5 30"),
            Some(RadioCommand::Trigger(CommandRequest::Snapshot {
                burst: 5,
                interval: 30
            }))
        );
        assert_eq!(
            parse_operator_line("/snapshot 3"),
            Some(RadioCommand::Trigger(CommandRequest::Snapshot {
                burst: 3,
                interval: -1
            }))
        );
        assert_eq!(
            parse_operator_line("/port /dev/ttyUSB2 57600"),
            Some(RadioCommand::Reconfigure {
                port: "/dev/ttyUSB2".to_string(),
                baud: 57_600
            })
        );
    }

    #[test]
    fn unknown_or_malformed_commands_are_rejected() {
        assert_eq!(parse_operator_line("/teleport"), None);
        assert_eq!(parse_operator_line("/snapshot"), None);
        assert_eq!(parse_operator_line("/snapshot five"), None);
        assert_eq!(parse_operator_line("/port only-a-port"), None);
    }
}
