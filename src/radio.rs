use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use crate::command::{CommandMachine, CommandRequest, CommandResponse, CommandTurn};
use crate::config::{POLL_IDLE_MS, Settings};
use crate::events::{Event, EventSender};
use crate::frame::{self, Frame, FrameBody};
use crate::gps::FixSlot;
use crate::imaging::ImageAssembler;
use crate::link::{Link, LinkError, PlaybackLink, SerialLink};
use crate::logfile::LogSink;
use crate::presence::PresenceTracker;
use crate::station::Station;
use crate::telemetry::{
    BalloonSample, BalloonUpdate, TelemetryHistory, TelemetrySample, VehicleFix,
    decode_reported_errors,
};

/// Operator actions fed into the protocol loop from the display layer.
#[derive(Debug, Clone, PartialEq)]
pub enum RadioCommand {
    SendChat(String),
    Trigger(CommandRequest),
    Reconfigure { port: String, baud: u32 },
}

/// The single worker that owns the radio channel and all protocol state.
/// Every control action, outbound frame, inbound burst, command retry, and
/// heartbeat tick happens sequentially inside its poll loop.
pub struct RadioWorker {
    link: Box<dyn Link>,
    own_station: Station,
    presence: PresenceTracker,
    commands: CommandMachine,
    histories: HashMap<Station, TelemetryHistory>,
    assembler: ImageAssembler,
    events: EventSender,
    radio_log: LogSink,
    telemetry_log: LogSink,
    fix_slot: FixSlot,
    dish_targets: Option<mpsc::Sender<(f64, f64, f64)>>,
    heartbeat_interval: Duration,
    last_heartbeat: Instant,
    history_depth: usize,
    link_fault_reported: bool,
}

impl RadioWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        link: Box<dyn Link>,
        settings: &Settings,
        events: EventSender,
        fix_slot: FixSlot,
        dish_targets: Option<mpsc::Sender<(f64, f64, f64)>>,
        radio_log: LogSink,
        telemetry_log: LogSink,
    ) -> Self {
        let heartbeat_interval = Duration::from_secs(settings.heartbeat_interval_secs.max(1));
        Self {
            link,
            own_station: settings.station(),
            presence: PresenceTracker::new(),
            commands: CommandMachine::new(),
            histories: HashMap::new(),
            assembler: ImageAssembler::new(&settings.log_dir),
            events,
            radio_log,
            telemetry_log,
            fix_slot,
            dish_targets,
            heartbeat_interval,
            // Announce ourselves on the first loop turn.
            last_heartbeat: Instant::now() - heartbeat_interval,
            history_depth: settings.telemetry_history_depth,
            link_fault_reported: false,
        }
    }

    pub fn run(&mut self, control: mpsc::Receiver<RadioCommand>, running: Arc<AtomicBool>) {
        while running.load(Ordering::Relaxed) {
            self.poll_once(&control);
        }
        log::info!("radio worker exiting");
    }

    /// One cooperative turn: drain operator actions, service command
    /// retries, pull and dispatch inbound traffic, then age the network on
    /// the heartbeat interval.
    fn poll_once(&mut self, control: &mpsc::Receiver<RadioCommand>) {
        let now = Instant::now();

        while let Ok(action) = control.try_recv() {
            self.handle_control(action, now);
        }

        for turn in self.commands.service(now) {
            match turn {
                CommandTurn::Send {
                    request,
                    attempts_left,
                } => {
                    log::info!(
                        "sending command {} ({attempts_left} attempts left)",
                        request.wire()
                    );
                    self.transmit(&FrameBody::Command(request.wire()));
                    self.events.send(Event::CommandSent {
                        kind: request.kind(),
                        attempts_left,
                    });
                }
                CommandTurn::Exhausted { kind } => {
                    log::warn!("no confirmation received for {kind:?}");
                    self.events.send(Event::CommandUnconfirmed { kind });
                }
            }
        }

        match self.link.receive() {
            Ok(burst) if !burst.is_empty() => {
                self.mirror_traffic(&burst);
                for frame in frame::decode(&burst) {
                    self.dispatch(frame);
                }
            }
            Ok(_) => {}
            Err(e) => {
                self.report_link_fault(&e);
                thread::sleep(Duration::from_millis(POLL_IDLE_MS));
            }
        }

        if self.last_heartbeat.elapsed() >= self.heartbeat_interval {
            self.last_heartbeat = Instant::now();
            self.heartbeat_tick();
        }
    }

    fn handle_control(&mut self, action: RadioCommand, now: Instant) {
        match action {
            RadioCommand::SendChat(text) => {
                let body = FrameBody::Chat(text);
                self.transmit(&body);
                // Loop our own chat back so the operator sees it in-line.
                self.dispatch(Frame {
                    sender: self.own_station,
                    body,
                });
            }
            RadioCommand::Trigger(request) => {
                self.commands.trigger(request, now);
            }
            RadioCommand::Reconfigure { port, baud } => match self.link.reopen(&port, baud) {
                Ok(()) => {
                    if self.link_fault_reported {
                        log::info!("radio channel restored on {port}");
                    }
                    self.link_fault_reported = false;
                }
                Err(e) => self.report_link_fault(&e),
            },
        }
    }

    /// Classify one decoded frame and hand it to the right sink. The sender
    /// always refreshes presence first, whatever the payload kind.
    fn dispatch(&mut self, frame: Frame) {
        if let Some(change) = self.presence.record_traffic(frame.sender) {
            self.events.send(Event::NetworkStatus {
                station: change.station,
                active: change.active,
            });
        }

        match frame.body {
            FrameBody::Heartbeat => {}
            FrameBody::Chat(text) => {
                self.events.send(Event::Chat {
                    station: frame.sender,
                    text,
                });
            }
            FrameBody::Data(payload) => {
                if frame.sender == Station::Balloon {
                    self.balloon_data(&payload);
                } else {
                    self.vehicle_data(frame.sender, &payload);
                }
            }
            FrameBody::Ack(payload) => self.command_ack(&payload),
            FrameBody::Init(marker) => {
                self.events.send(Event::BalloonInit {
                    boot_marker: marker,
                });
            }
            FrameBody::Image(chunk) => {
                if let Some(path) = self.assembler.push_chunk(&chunk) {
                    self.events.send(Event::ImageReceived { path });
                }
            }
            // Ground stations do not execute vehicle commands; another
            // station's uplink overheard on the shared medium still counted
            // for presence above.
            FrameBody::Command(payload) => {
                log::debug!("overheard command {payload:?} from {}", frame.sender);
            }
        }
    }

    fn balloon_data(&mut self, payload: &str) {
        self.telemetry_log.append(payload);

        let sample = match BalloonSample::parse(payload) {
            Ok(sample) => sample,
            Err(e) => {
                log::warn!("invalid balloon data packet, not processed: {e}");
                return;
            }
        };

        let history = self.history(Station::Balloon);
        history.push(TelemetrySample::from(&sample));
        let rates = history.rates();

        if let Some(targets) = &self.dish_targets {
            let _ = targets.send((
                sample.latitude,
                sample.longitude,
                sample.altitude_m.unwrap_or(0.0),
            ));
        }

        let reported_errors = decode_reported_errors(sample.error_bits);
        self.events.send(Event::BalloonTelemetry(BalloonUpdate {
            sample,
            rates,
            reported_errors,
        }));
    }

    fn vehicle_data(&mut self, sender: Station, payload: &str) {
        self.telemetry_log.append(payload);

        let fix = match VehicleFix::parse(payload) {
            Ok(fix) => fix,
            Err(e) => {
                log::warn!("invalid data packet from {sender}, not processed: {e}");
                return;
            }
        };

        self.history(sender).push(TelemetrySample::from(&fix));
        self.events.send(Event::VehicleTelemetry {
            station: sender,
            fix,
        });
    }

    fn command_ack(&mut self, payload: &str) {
        let Some(response) = CommandResponse::parse(payload) else {
            log::warn!("unknown command response: {payload:?}");
            return;
        };

        if let Some(request) = self.commands.handle_ack(&response) {
            log::info!("command {} confirmed", request.wire());
        }
        self.events.send(Event::CommandConfirmed {
            kind: response.confirms(),
            response,
        });
    }

    /// Heartbeat-interval work: age every liveness counter, then announce
    /// ourselves with a position report when a fix is available, or a bare
    /// heartbeat when not.
    fn heartbeat_tick(&mut self) {
        for change in self.presence.age_all() {
            self.events.send(Event::NetworkStatus {
                station: change.station,
                active: change.active,
            });
        }

        let fix = self
            .fix_slot
            .lock()
            .ok()
            .and_then(|slot| slot.clone());

        match fix {
            Some(fix) => {
                let payload = format!(
                    "{},{:.5},{:.5}",
                    fix.utc, fix.latitude, fix.longitude
                );
                self.transmit(&FrameBody::Data(payload));
            }
            None => self.transmit(&FrameBody::Heartbeat),
        }

        // Our own transmission keeps us active on the network map.
        if let Some(change) = self.presence.record_traffic(self.own_station) {
            self.events.send(Event::NetworkStatus {
                station: change.station,
                active: change.active,
            });
        }
    }

    fn transmit(&mut self, body: &FrameBody) {
        let wire = frame::encode(self.own_station, body);
        self.mirror_traffic(&wire);

        if let Err(e) = self.link.send(&wire) {
            self.report_link_fault(&e);
        }
    }

    /// Verbatim operator-console mirror of everything crossing the channel.
    fn mirror_traffic(&mut self, bytes: &[u8]) {
        let text = String::from_utf8_lossy(bytes);
        self.radio_log.append(&text);
        self.events.send(Event::RadioConsole {
            line: text.into_owned(),
        });
    }

    fn report_link_fault(&mut self, error: &LinkError) {
        log::warn!("radio channel: {error}");
        if !self.link_fault_reported {
            self.link_fault_reported = true;
            self.events.send(Event::ChannelError {
                channel: "radio",
                message: error.to_string(),
            });
        }
    }

    fn history(&mut self, station: Station) -> &mut TelemetryHistory {
        let depth = self.history_depth;
        self.histories
            .entry(station)
            .or_insert_with(|| TelemetryHistory::new(depth))
    }
}

/// Builds the channel for the configured mode and runs the worker on its own
/// thread. An unopenable channel still starts the loop; the condition is
/// reported once and recovery goes through `RadioCommand::Reconfigure`.
pub fn spawn(
    settings: Settings,
    events: EventSender,
    fix_slot: FixSlot,
    dish_targets: Option<mpsc::Sender<(f64, f64, f64)>>,
    control: mpsc::Receiver<RadioCommand>,
    running: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name("radio".to_string())
        .spawn(move || {
            let mut initial_fault = None;

            let link: Box<dyn Link> = if settings.test_mode {
                match PlaybackLink::open(&settings.test_telemetry_path) {
                    Ok(link) => {
                        log::info!(
                            "test mode: replaying frames from {}",
                            settings.test_telemetry_path
                        );
                        Box::new(link)
                    }
                    Err(e) => {
                        initial_fault = Some(e.to_string());
                        Box::new(SerialLink::closed(&settings.radio_port))
                    }
                }
            } else {
                match SerialLink::open(&settings.radio_port, settings.radio_baud) {
                    Ok(link) => Box::new(link),
                    Err(e) => {
                        initial_fault = Some(e.to_string());
                        Box::new(SerialLink::closed(&settings.radio_port))
                    }
                }
            };

            let radio_log = LogSink::open(&settings.log_dir, "habtrack_radio_log.txt", "radio");
            let telemetry_log =
                LogSink::open(&settings.log_dir, "habtrack_telemetry_log.txt", "telemetry");

            let mut worker = RadioWorker::new(
                link,
                &settings,
                events,
                fix_slot,
                dish_targets,
                radio_log,
                telemetry_log,
            );

            if let Some(message) = initial_fault {
                worker.link_fault_reported = true;
                worker.events.send(Event::ChannelError {
                    channel: "radio",
                    message,
                });
            }

            worker.run(control, running);
        })
        .expect("failed to spawn radio worker")
}
