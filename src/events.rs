use std::path::PathBuf;
use std::sync::mpsc;

use crate::command::{CommandKind, CommandResponse};
use crate::station::Station;
use crate::telemetry::{BalloonUpdate, VehicleFix};

/// One-way notifications from the protocol core to the display layer. The
/// core never blocks on these; a vanished consumer is ignored.
#[derive(Debug, Clone)]
pub enum Event {
    /// A station crossed between active and inactive.
    NetworkStatus { station: Station, active: bool },
    Chat { station: Station, text: String },
    BalloonTelemetry(BalloonUpdate),
    VehicleTelemetry { station: Station, fix: VehicleFix },
    BalloonInit { boot_marker: String },
    CommandSent { kind: CommandKind, attempts_left: u32 },
    CommandConfirmed { kind: CommandKind, response: CommandResponse },
    /// Attempt budget exhausted with no matching ack; manual re-trigger required.
    CommandUnconfirmed { kind: CommandKind },
    /// Raised once per failure episode of a channel, not once per failed call.
    ChannelError { channel: &'static str, message: String },
    /// Verbatim mirror of radio traffic for the operator console.
    RadioConsole { line: String },
    ImageReceived { path: PathBuf },
    DishPointed { azimuth: f64, elevation: f64 },
}

#[derive(Clone)]
pub struct EventSender(mpsc::Sender<Event>);

impl EventSender {
    pub fn send(&self, event: Event) {
        // The display layer owning the receiver may already be gone during
        // shutdown; the protocol core keeps running regardless.
        let _ = self.0.send(event);
    }
}

pub fn channel() -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel();
    (EventSender(tx), rx)
}
