//! Error types for the NDT control protocol.
//!
//! Every error is local to the connection that produced it: the handling
//! task logs it and closes the socket. Nothing is reported to the client.

use crate::protocol::MessageType;
use std::io;
use std::net::SocketAddr;

/// Broad classification of a [`ProtocolError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Incomplete or oversized frame.
    Framing,
    /// Body is not the JSON shape the state machine expected.
    MalformedBody,
    /// Login frame rejected.
    Login,
    /// Unexpected message type outside of login.
    ProtocolViolation,
    /// The S2C data socket could not be bound or accepted.
    Resource,
    /// Underlying transport failure.
    Transport,
}

/// Errors produced while speaking the control protocol.
#[derive(Debug)]
pub enum ProtocolError {
    /// Stream ended before a whole frame was read
    IncompleteFrame,
    /// Body does not fit in the 16-bit length field
    BodyTooLarge(usize),
    /// Body failed JSON decoding or validation
    MalformedBody(String),
    /// A frame of the wrong type arrived
    UnexpectedMessageType {
        expected: MessageType,
        actual: u8,
        during_login: bool,
    },
    /// Client did not advertise the STATUS capability
    MissingCapability(u32),
    /// S2C listener could not be bound
    Bind(SocketAddr, io::Error),
    /// S2C listener failed to accept the data connection
    DataConnect(io::Error),
    /// Transport error on the control channel
    Io(io::Error),
}

impl ProtocolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProtocolError::IncompleteFrame | ProtocolError::BodyTooLarge(_) => ErrorKind::Framing,
            ProtocolError::MalformedBody(_) => ErrorKind::MalformedBody,
            ProtocolError::UnexpectedMessageType {
                during_login: true, ..
            }
            | ProtocolError::MissingCapability(_) => ErrorKind::Login,
            ProtocolError::UnexpectedMessageType { .. } => ErrorKind::ProtocolViolation,
            ProtocolError::Bind(..) | ProtocolError::DataConnect(_) => ErrorKind::Resource,
            ProtocolError::Io(_) => ErrorKind::Transport,
        }
    }
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::IncompleteFrame => write!(f, "Incomplete frame"),
            ProtocolError::BodyTooLarge(len) => {
                write!(f, "Message body too large: {} bytes", len)
            }
            ProtocolError::MalformedBody(msg) => write!(f, "Malformed message body: {}", msg),
            ProtocolError::UnexpectedMessageType {
                expected, actual, ..
            } => write!(
                f,
                "Unexpected message type: expected {:?} ({}), got {}",
                expected, *expected as u8, actual
            ),
            ProtocolError::MissingCapability(tests) => {
                write!(f, "Client does not support TEST_STATUS (tests={})", tests)
            }
            ProtocolError::Bind(addr, e) => write!(f, "Failed to bind {}: {}", addr, e),
            ProtocolError::DataConnect(e) => write!(f, "Failed to accept data connection: {}", e),
            ProtocolError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for ProtocolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProtocolError::Bind(_, e) | ProtocolError::DataConnect(e) | ProtocolError::Io(e) => {
                Some(e)
            }
            _ => None,
        }
    }
}

impl From<io::Error> for ProtocolError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            ProtocolError::IncompleteFrame
        } else {
            ProtocolError::Io(e)
        }
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        ProtocolError::MalformedBody(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
