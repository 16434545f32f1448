use std::time::{Duration, Instant};

use crate::config::{COMMAND_ATTEMPTS, COMMAND_RETRY_DELAY_SECS};

/// Identity of a confirmable command, independent of its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Arm,
    Disarm,
    Release,
    Reset,
    Snapshot,
    DiskSpace,
}

/// A concrete command as triggered by the operator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CommandRequest {
    Arm,
    Disarm,
    Release,
    Reset,
    /// interval -1 requests a single burst now.
    Snapshot { burst: u32, interval: i32 },
    DiskSpace,
}

impl CommandRequest {
    pub fn kind(&self) -> CommandKind {
        match self {
            CommandRequest::Arm => CommandKind::Arm,
            CommandRequest::Disarm => CommandKind::Disarm,
            CommandRequest::Release => CommandKind::Release,
            CommandRequest::Reset => CommandKind::Reset,
            CommandRequest::Snapshot { .. } => CommandKind::Snapshot,
            CommandRequest::DiskSpace => CommandKind::DiskSpace,
        }
    }

    /// The `cmd` frame payload for this request.
    pub fn wire(&self) -> String {
        match self {
            CommandRequest::Arm => "ARM_BRM".to_string(),
            CommandRequest::Disarm => "DISARM_BRM".to_string(),
            CommandRequest::Release => "SSAG_RELEASE_BALLOON".to_string(),
            CommandRequest::Reset => "RESET_BRM".to_string(),
            CommandRequest::Snapshot { burst, interval } => {
                format!("SNAPSHOT,{burst},{interval}")
            }
            CommandRequest::DiskSpace => "DISK_SPACE".to_string(),
        }
    }
}

/// Parsed `ack` frame payload from the balloon.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CommandResponse {
    BrmArmed,
    BrmDisarmed,
    BrmActivated,
    BrmReset,
    SnapshotUpdate { burst: u32, interval: i32 },
    DiskSpace { bytes_available: u64 },
}

impl CommandResponse {
    pub fn parse(payload: &str) -> Option<Self> {
        match payload {
            "BRM_ARMED" => return Some(CommandResponse::BrmArmed),
            "BRM_DISARMED" => return Some(CommandResponse::BrmDisarmed),
            "BRM_ACTIVATED" => return Some(CommandResponse::BrmActivated),
            "BRM_RESET" => return Some(CommandResponse::BrmReset),
            _ => {}
        }

        if let Some(rest) = payload.strip_prefix("SNAPSHOT_UPDATE,") {
            let (burst, interval) = rest.split_once(',')?;
            return Some(CommandResponse::SnapshotUpdate {
                burst: burst.parse().ok()?,
                interval: interval.parse().ok()?,
            });
        }

        if let Some(bytes) = payload.strip_prefix("DISK,") {
            return Some(CommandResponse::DiskSpace {
                bytes_available: bytes.parse().ok()?,
            });
        }

        None
    }

    /// Which outstanding command this response confirms.
    pub fn confirms(&self) -> CommandKind {
        match self {
            CommandResponse::BrmArmed => CommandKind::Arm,
            CommandResponse::BrmDisarmed => CommandKind::Disarm,
            CommandResponse::BrmActivated => CommandKind::Release,
            CommandResponse::BrmReset => CommandKind::Reset,
            CommandResponse::SnapshotUpdate { .. } => CommandKind::Snapshot,
            CommandResponse::DiskSpace { .. } => CommandKind::DiskSpace,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PendingCommand {
    request: CommandRequest,
    attempts_remaining: u32,
    next_send: Instant,
}

/// What the poll loop should do for outstanding commands this turn.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CommandTurn {
    Send {
        request: CommandRequest,
        attempts_left: u32,
    },
    Exhausted {
        kind: CommandKind,
    },
}

/// Tracks commands awaiting confirmation. Each kind moves
/// idle → pending(attempts) → confirmed | exhausted; sends are handed out
/// one poll-loop turn at a time so inbound traffic keeps being serviced
/// between attempts.
pub struct CommandMachine {
    pending: Vec<PendingCommand>,
    retry_delay: Duration,
}

impl CommandMachine {
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
            retry_delay: Duration::from_secs(COMMAND_RETRY_DELAY_SECS),
        }
    }

    #[cfg(test)]
    fn with_retry_delay(retry_delay: Duration) -> Self {
        Self {
            pending: Vec::new(),
            retry_delay,
        }
    }

    /// Enter pending for this command kind, replacing any stale entry of the
    /// same kind. The first send happens on the next service turn.
    pub fn trigger(&mut self, request: CommandRequest, now: Instant) {
        self.pending.retain(|p| p.request.kind() != request.kind());
        self.pending.push(PendingCommand {
            request,
            attempts_remaining: COMMAND_ATTEMPTS,
            next_send: now,
        });
    }

    /// One poll-loop turn: collect the commands due for a (re)send and the
    /// ones whose attempt budget ran dry waiting for an ack.
    pub fn service(&mut self, now: Instant) -> Vec<CommandTurn> {
        let mut turns = Vec::new();

        self.pending.retain_mut(|p| {
            if now < p.next_send {
                return true;
            }
            if p.attempts_remaining == 0 {
                turns.push(CommandTurn::Exhausted {
                    kind: p.request.kind(),
                });
                return false;
            }
            p.attempts_remaining -= 1;
            p.next_send = now + self.retry_delay;
            turns.push(CommandTurn::Send {
                request: p.request,
                attempts_left: p.attempts_remaining,
            });
            true
        });

        turns
    }

    /// A matching ack confirms the outstanding command and cancels its
    /// remaining attempts. Returns the confirmed request, if any.
    pub fn handle_ack(&mut self, response: &CommandResponse) -> Option<CommandRequest> {
        let kind = response.confirms();
        let position = self.pending.iter().position(|p| p.request.kind() == kind)?;
        Some(self.pending.swap_remove(position).request)
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sends(turns: &[CommandTurn]) -> usize {
        turns
            .iter()
            .filter(|t| matches!(t, CommandTurn::Send { .. }))
            .count()
    }

    #[test]
    fn wire_strings_match_protocol() {
        assert_eq!(CommandRequest::Arm.wire(), "ARM_BRM");
        assert_eq!(CommandRequest::Release.wire(), "SSAG_RELEASE_BALLOON");
        assert_eq!(
            CommandRequest::Snapshot {
                burst: 5,
                interval: 30
            }
            .wire(),
            "SNAPSHOT,5,30"
        );
        assert_eq!(CommandRequest::DiskSpace.wire(), "DISK_SPACE");
    }

    #[test]
    fn responses_parse_and_map_to_kinds() {
        assert_eq!(
            CommandResponse::parse("BRM_ACTIVATED"),
            Some(CommandResponse::BrmActivated)
        );
        assert_eq!(
            CommandResponse::parse("SNAPSHOT_UPDATE,5,-1"),
            Some(CommandResponse::SnapshotUpdate {
                burst: 5,
                interval: -1
            })
        );
        assert_eq!(
            CommandResponse::parse("DISK,1048576"),
            Some(CommandResponse::DiskSpace {
                bytes_available: 1_048_576
            })
        );
        assert_eq!(CommandResponse::parse("BRM_EXPLODED"), None);
        assert_eq!(
            CommandResponse::parse("DISK,1048576").unwrap().confirms(),
            CommandKind::DiskSpace
        );
    }

    #[test]
    fn unacknowledged_command_sends_exactly_three_times_then_exhausts() {
        let delay = Duration::from_secs(2);
        let mut machine = CommandMachine::with_retry_delay(delay);
        let start = Instant::now();

        machine.trigger(CommandRequest::Release, start);

        let mut total_sends = 0;
        let mut exhausted = 0;
        for step in 0..6u32 {
            let turns = machine.service(start + delay * step);
            total_sends += sends(&turns);
            exhausted += turns
                .iter()
                .filter(|t| matches!(t, CommandTurn::Exhausted { .. }))
                .count();
        }

        assert_eq!(total_sends, COMMAND_ATTEMPTS as usize);
        assert_eq!(exhausted, 1);
        assert!(!machine.has_pending());
    }

    #[test]
    fn no_resend_before_the_retry_delay() {
        let delay = Duration::from_secs(2);
        let mut machine = CommandMachine::with_retry_delay(delay);
        let start = Instant::now();

        machine.trigger(CommandRequest::Arm, start);
        assert_eq!(sends(&machine.service(start)), 1);
        assert_eq!(sends(&machine.service(start + Duration::from_millis(100))), 0);
        assert_eq!(sends(&machine.service(start + delay)), 1);
    }

    #[test]
    fn ack_confirms_and_cancels_remaining_attempts() {
        let delay = Duration::from_secs(2);
        let mut machine = CommandMachine::with_retry_delay(delay);
        let start = Instant::now();

        machine.trigger(CommandRequest::Arm, start);
        machine.service(start);

        let confirmed = machine.handle_ack(&CommandResponse::BrmArmed);
        assert_eq!(confirmed, Some(CommandRequest::Arm));
        assert!(!machine.has_pending());
        assert!(machine.service(start + delay).is_empty());
    }

    #[test]
    fn ack_for_a_different_kind_leaves_pending_alone() {
        let mut machine = CommandMachine::new();
        let start = Instant::now();

        machine.trigger(CommandRequest::DiskSpace, start);
        assert_eq!(
            machine.handle_ack(&CommandResponse::BrmArmed),
            None
        );
        assert!(machine.has_pending());
    }

    #[test]
    fn retrigger_replaces_stale_pending_entry() {
        let mut machine = CommandMachine::new();
        let start = Instant::now();

        machine.trigger(
            CommandRequest::Snapshot {
                burst: 5,
                interval: 30,
            },
            start,
        );
        machine.service(start);
        machine.trigger(
            CommandRequest::Snapshot {
                burst: 2,
                interval: -1,
            },
            start,
        );

        let turns = machine.service(start);
        assert_eq!(turns.len(), 1);
        assert!(matches!(
            turns[0],
            CommandTurn::Send {
                request: CommandRequest::Snapshot {
                    burst: 2,
                    interval: -1
                },
                attempts_left: 2,
            }
        ));
    }

    #[test]
    fn independent_kinds_pend_concurrently() {
        let mut machine = CommandMachine::new();
        let start = Instant::now();

        machine.trigger(CommandRequest::Arm, start);
        machine.trigger(CommandRequest::DiskSpace, start);
        assert_eq!(sends(&machine.service(start)), 2);

        machine.handle_ack(&CommandResponse::BrmArmed);
        assert!(machine.has_pending());
    }
}
