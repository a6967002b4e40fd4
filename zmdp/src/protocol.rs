//! Wire framing for the broker protocol
//!
//! The broker speaks a Majordomo-style multipart framing over DEALER sockets.
//! Every message starts with an empty delimiter frame (the routing convention
//! of the transport), followed by a role frame and a command byte. The layout
//! is the broker's contract and must be matched exactly:
//!
//! ```text
//! ready:     [<empty>, "C", READY, CLIENT_ROLE, <client-identity>]
//! request:   [<empty>, "C", REQUEST, <message-id>, <service>, <method>, <args>]
//! success:   [<empty>, REQUEST|SUCCESS, <message-id>, <service>, <result>]
//! failure:   [<empty>, REQUEST|FAIL, <message-id>, <service>, <error-text>]
//! heartbeat: [<empty>, "H", <client-identity>]
//! ```
//!
//! The handshake reply carries `READY|SUCCESS` with a bincode-encoded service
//! catalog, or `READY|FAIL` with a failure text.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// One multipart message on the wire, delimiter frame included.
pub type Frames = Vec<Bytes>;

/// Command byte: client ready announcement.
pub const READY: u8 = 0x01;
/// Command byte: remote method request.
pub const REQUEST: u8 = 0x02;
/// Command modifier: the request succeeded.
pub const SUCCESS: u8 = 0x10;
/// Command modifier: the request failed.
pub const FAIL: u8 = 0x20;
/// Role byte sent with the ready announcement.
pub const CLIENT_ROLE: u8 = 0x04;

/// Role frame for client-originated control and request messages.
pub const CLIENT_FRAME: &[u8] = b"C";
/// Role frame for heartbeats.
pub const HEARTBEAT_FRAME: &[u8] = b"H";

/// One remote service as announced by the broker during the handshake.
///
/// `address` is an opaque routing token understood by the broker; `methods`
/// is the ordered list of (name, docstring) pairs the service exposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    pub address: Vec<u8>,
    pub methods: Vec<(String, String)>,
}

/// Build the one-shot ready announcement sent right after connecting.
pub fn ready(identity: &[u8]) -> Frames {
    vec![
        Bytes::new(),
        Bytes::from_static(CLIENT_FRAME),
        Bytes::copy_from_slice(&[READY]),
        Bytes::copy_from_slice(&[CLIENT_ROLE]),
        Bytes::copy_from_slice(identity),
    ]
}

/// Build a framed request for one remote method call.
pub fn request(id: u8, service: &str, method: &str, args: Vec<u8>) -> Frames {
    vec![
        Bytes::new(),
        Bytes::from_static(CLIENT_FRAME),
        Bytes::copy_from_slice(&[REQUEST]),
        Bytes::copy_from_slice(&[id]),
        Bytes::copy_from_slice(service.as_bytes()),
        Bytes::copy_from_slice(method.as_bytes()),
        Bytes::from(args),
    ]
}

/// Build a heartbeat control frame carrying the client identity.
pub fn heartbeat(identity: &[u8]) -> Frames {
    vec![
        Bytes::new(),
        Bytes::from_static(HEARTBEAT_FRAME),
        Bytes::copy_from_slice(identity),
    ]
}

/// A decoded inbound message from the broker.
#[derive(Debug)]
pub enum Reply {
    /// Handshake succeeded; carries the service catalog.
    HandshakeOk { catalog: Vec<CatalogEntry> },
    /// Handshake rejected; carries the broker-supplied failure text.
    HandshakeErr { message: String },
    /// A remote call succeeded.
    Success {
        id: u8,
        service: String,
        payload: Bytes,
    },
    /// A remote call failed on the broker or worker side.
    Failure {
        id: u8,
        service: String,
        message: String,
    },
    /// Broker-side heartbeat.
    Heartbeat,
}

impl Reply {
    /// Parse one inbound multipart message.
    ///
    /// Framing errors are reported per message and must never take down the
    /// receive loop; callers log and drop.
    pub fn parse(frames: &[Bytes]) -> Result<Self> {
        let delimiter = frames
            .first()
            .ok_or_else(|| Error::protocol("empty multipart message", None, None))?;
        if !delimiter.is_empty() {
            return Err(Error::protocol(
                "missing routing delimiter frame",
                Some("empty frame".to_string()),
                Some(format!("{} bytes", delimiter.len())),
            ));
        }

        let command = frames.get(1).ok_or_else(|| {
            Error::protocol("message truncated before command frame", None, None)
        })?;
        if command.as_ref() == HEARTBEAT_FRAME {
            return Ok(Reply::Heartbeat);
        }
        let command = *command.first().ok_or_else(|| {
            Error::protocol("empty command frame", None, None)
        })?;

        match command {
            c if c == READY | SUCCESS => {
                let payload = frames.get(2).ok_or_else(|| {
                    Error::protocol("handshake reply missing catalog frame", None, None)
                })?;
                let catalog: Vec<CatalogEntry> = bincode::deserialize(payload)
                    .map_err(|e| Error::serialization("malformed service catalog", e))?;
                Ok(Reply::HandshakeOk { catalog })
            }
            c if c == READY | FAIL => {
                let text = frames.get(2).map(|f| String::from_utf8_lossy(f).into_owned());
                Ok(Reply::HandshakeErr {
                    message: text.unwrap_or_default(),
                })
            }
            c if c == REQUEST | SUCCESS => {
                let (id, service) = parse_correlation(frames)?;
                let payload = frames.get(4).cloned().ok_or_else(|| {
                    Error::protocol("reply missing payload frame", None, None)
                })?;
                Ok(Reply::Success {
                    id,
                    service,
                    payload,
                })
            }
            c if c == REQUEST | FAIL => {
                let (id, service) = parse_correlation(frames)?;
                let message = frames
                    .get(4)
                    .map(|f| String::from_utf8_lossy(f).into_owned())
                    .unwrap_or_default();
                Ok(Reply::Failure {
                    id,
                    service,
                    message,
                })
            }
            other => Err(Error::protocol(
                "unknown command byte",
                Some("READY/REQUEST command".to_string()),
                Some(format!("{other:#04x}")),
            )),
        }
    }

    /// Short tag for log and error context.
    pub fn kind(&self) -> &'static str {
        match self {
            Reply::HandshakeOk { .. } => "handshake-ok",
            Reply::HandshakeErr { .. } => "handshake-err",
            Reply::Success { .. } => "success",
            Reply::Failure { .. } => "failure",
            Reply::Heartbeat => "heartbeat",
        }
    }
}

fn parse_correlation(frames: &[Bytes]) -> Result<(u8, String)> {
    let id = *frames
        .get(2)
        .and_then(|f| f.first())
        .ok_or_else(|| Error::protocol("reply missing message-id frame", None, None))?;
    let service = frames
        .get(3)
        .ok_or_else(|| Error::protocol("reply missing service frame", None, None))?;
    let service = std::str::from_utf8(service)
        .map_err(|_| {
            Error::protocol(
                "service frame is not valid UTF-8",
                Some("UTF-8 service name".to_string()),
                None,
            )
        })?
        .to_string();
    Ok((id, service))
}
