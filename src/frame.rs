use thiserror::Error;

use crate::station::Station;

/// Literal sentinel closing every logical frame on the wire.
pub const FRAME_TERMINATOR: &[u8] = b",END_TX\n";

/// Image transfers are segmented into chunks of this many payload bytes;
/// the final chunk of an image is shorter.
pub const IMAGE_CHUNK_SIZE: usize = 1000;

/// Chat payloads are capped at this many characters before transmission.
pub const CHAT_MAX_CHARS: usize = 180;

#[derive(Debug, Clone, PartialEq)]
pub enum FrameBody {
    Heartbeat,
    Chat(String),
    Data(String),
    Command(String),
    Ack(String),
    Init(String),
    Image(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub sender: Station,
    pub body: FrameBody,
}

#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("unknown callsign in segment starting {0:?}")]
    UnknownSender(String),
    #[error("unknown message kind {kind:?} from {sender}")]
    UnknownKind { sender: Station, kind: String },
    #[error("missing payload for {kind} frame from {sender}")]
    MissingPayload { sender: Station, kind: &'static str },
    #[error("{kind} payload from {sender} is not valid utf-8")]
    PayloadNotUtf8 { sender: Station, kind: &'static str },
}

/// Builds one complete wire frame: `<callsign>,<body>,END_TX\n`.
pub fn encode(sender: Station, body: &FrameBody) -> Vec<u8> {
    let mut out = Vec::with_capacity(64);
    out.extend_from_slice(sender.callsign().as_bytes());
    out.push(b',');

    match body {
        FrameBody::Heartbeat => out.extend_from_slice(b"alive"),
        FrameBody::Chat(text) => {
            out.extend_from_slice(b"chat,");
            let clipped: String = text.chars().take(CHAT_MAX_CHARS).collect();
            out.extend_from_slice(clipped.as_bytes());
        }
        FrameBody::Data(fields) => {
            out.extend_from_slice(b"data,");
            out.extend_from_slice(fields.as_bytes());
        }
        FrameBody::Command(cmd) => {
            out.extend_from_slice(b"cmd,");
            out.extend_from_slice(cmd.as_bytes());
        }
        FrameBody::Ack(response) => {
            out.extend_from_slice(b"ack,");
            out.extend_from_slice(response.as_bytes());
        }
        FrameBody::Init(marker) => {
            out.extend_from_slice(b"init,");
            out.extend_from_slice(marker.as_bytes());
        }
        FrameBody::Image(chunk) => {
            out.extend_from_slice(b"image,");
            out.extend_from_slice(chunk);
        }
    }

    out.extend_from_slice(FRAME_TERMINATOR);
    out
}

/// Splits a receive burst on the frame terminator and parses every complete
/// segment. Unparseable segments are logged and dropped; an unterminated
/// trailing partial is lost for this read cycle. Never fails, regardless of
/// input bytes.
pub fn decode(buffer: &[u8]) -> Vec<Frame> {
    let mut frames = Vec::new();

    for segment in terminated_segments(buffer) {
        if segment.is_empty() {
            continue;
        }
        match parse_segment(segment) {
            Ok(frame) => frames.push(frame),
            Err(err) => log::warn!("dropping unparsed segment: {err}"),
        }
    }

    frames
}

/// Classifies one terminator-free segment. Tokenizes on commas rather than
/// slicing at fixed offsets, so callsigns of different lengths cannot shift
/// payload positions.
pub fn parse_segment(segment: &[u8]) -> Result<Frame, DecodeError> {
    let (callsign, rest) = match split_once(segment, b',') {
        Some(parts) => parts,
        None => (segment, &[] as &[u8]),
    };

    let sender = std::str::from_utf8(callsign)
        .ok()
        .and_then(Station::from_callsign)
        .ok_or_else(|| DecodeError::UnknownSender(preview(segment)))?;

    let (kind, payload) = match split_once(rest, b',') {
        Some((kind, payload)) => (kind, Some(payload)),
        None => (rest, None),
    };

    let body = match kind {
        b"alive" => FrameBody::Heartbeat,
        b"chat" => FrameBody::Chat(utf8_payload(sender, "chat", payload)?),
        b"data" => FrameBody::Data(utf8_payload(sender, "data", payload)?),
        b"cmd" => FrameBody::Command(utf8_payload(sender, "cmd", payload)?),
        b"ack" => FrameBody::Ack(utf8_payload(sender, "ack", payload)?),
        b"init" => FrameBody::Init(utf8_payload(sender, "init", payload)?),
        b"image" => {
            let chunk = payload.ok_or(DecodeError::MissingPayload {
                sender,
                kind: "image",
            })?;
            FrameBody::Image(chunk.to_vec())
        }
        other => {
            return Err(DecodeError::UnknownKind {
                sender,
                kind: String::from_utf8_lossy(other).into_owned(),
            });
        }
    };

    Ok(Frame { sender, body })
}

fn utf8_payload(
    sender: Station,
    kind: &'static str,
    payload: Option<&[u8]>,
) -> Result<String, DecodeError> {
    let bytes = payload.ok_or(DecodeError::MissingPayload { sender, kind })?;
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|_| DecodeError::PayloadNotUtf8 { sender, kind })
}

/// Yields the segments that precede each terminator. Whatever follows the
/// last terminator is an incomplete frame and is not yielded.
fn terminated_segments(buffer: &[u8]) -> Vec<&[u8]> {
    let mut segments = Vec::new();
    let mut rest = buffer;

    while let Some(pos) = find(rest, FRAME_TERMINATOR) {
        segments.push(&rest[..pos]);
        rest = &rest[pos + FRAME_TERMINATOR.len()..];
    }

    if !rest.is_empty() {
        log::debug!("discarding {} unterminated trailing bytes", rest.len());
    }

    segments
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn split_once(bytes: &[u8], sep: u8) -> Option<(&[u8], &[u8])> {
    let pos = bytes.iter().position(|&b| b == sep)?;
    Some((&bytes[..pos], &bytes[pos + 1..]))
}

fn preview(segment: &[u8]) -> String {
    String::from_utf8_lossy(&segment[..segment.len().min(24)]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_round_trip_preserves_order() {
        let sent = vec![
            Frame {
                sender: Station::Balloon,
                body: FrameBody::Heartbeat,
            },
            Frame {
                sender: Station::Chase1,
                body: FrameBody::Chat("rolling out, eta 10".to_string()),
            },
            Frame {
                sender: Station::Balloon,
                body: FrameBody::Data("123456,36.8623,-121.0413,105.2,21,-5,18,8.2,40,0.1,0.0,9.8,0".to_string()),
            },
            Frame {
                sender: Station::GroundStation,
                body: FrameBody::Ack("BRM_ARMED".to_string()),
            },
        ];

        let mut wire = Vec::new();
        for frame in &sent {
            wire.extend_from_slice(&encode(frame.sender, &frame.body));
        }

        assert_eq!(decode(&wire), sent);
    }

    #[test]
    fn heartbeat_wire_format_is_exact() {
        assert_eq!(encode(Station::Chase2, &FrameBody::Heartbeat), b"chase2,alive,END_TX\n");
    }

    #[test]
    fn chat_payload_keeps_embedded_commas() {
        let wire = b"chase1,chat,turn left, then right,END_TX\n";
        let frames = decode(wire);
        assert_eq!(frames.len(), 1);
        assert_eq!(
            frames[0].body,
            FrameBody::Chat("turn left, then right".to_string())
        );
    }

    #[test]
    fn image_chunk_keeps_raw_bytes() {
        let chunk: Vec<u8> = vec![0xff, 0xd8, b',', 0x00, 0x7f];
        let wire = encode(Station::Balloon, &FrameBody::Image(chunk.clone()));
        let frames = decode(&wire);
        assert_eq!(frames[0].body, FrameBody::Image(chunk));
    }

    #[test]
    fn garbage_between_frames_is_dropped_not_fatal() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&encode(Station::Balloon, &FrameBody::Heartbeat));
        wire.extend_from_slice(b"\xfe\xba noise without meaning,END_TX\n");
        wire.extend_from_slice(&encode(Station::Chase3, &FrameBody::Heartbeat));
        wire.extend_from_slice(b"chase9,alive,END_TX\n");

        let frames = decode(&wire);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].sender, Station::Balloon);
        assert_eq!(frames[1].sender, Station::Chase3);
    }

    #[test]
    fn unterminated_trailing_partial_is_lost() {
        let mut wire = encode(Station::Balloon, &FrameBody::Heartbeat);
        wire.extend_from_slice(b"chase1,chat,half a mess");
        assert_eq!(decode(&wire).len(), 1);
    }

    #[test]
    fn unknown_kind_reports_sender() {
        let err = parse_segment(b"hab,telemetry,1,2,3").unwrap_err();
        assert_eq!(
            err,
            DecodeError::UnknownKind {
                sender: Station::Balloon,
                kind: "telemetry".to_string()
            }
        );
    }

    #[test]
    fn unknown_sender_is_rejected() {
        assert!(matches!(
            parse_segment(b"kd6abc,alive"),
            Err(DecodeError::UnknownSender(_))
        ));
    }

    #[test]
    fn chat_is_clipped_to_limit_on_encode() {
        let long = "x".repeat(CHAT_MAX_CHARS + 40);
        let wire = encode(Station::Chase1, &FrameBody::Chat(long));
        let frames = decode(&wire);
        match &frames[0].body {
            FrameBody::Chat(text) => assert_eq!(text.len(), CHAT_MAX_CHARS),
            other => panic!("unexpected body {other:?}"),
        }
    }
}
