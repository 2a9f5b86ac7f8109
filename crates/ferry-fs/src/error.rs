use std::io;
use std::time::Duration;
use thiserror::Error;

use crate::protocol::Status;

/// Errors produced by both halves of a session.
///
/// `Request` and `Server` travel over the wire as 400 / 500 responses and leave
/// the session usable. Everything else is transport-class and ends the
/// connection it happened on.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad or missing argument, missing path, path conflict
    #[error("{0}")]
    Request(String),
    /// Unexpected I/O failure during an otherwise valid operation
    #[error("{0}")]
    Server(String),
    /// Socket failure or malformed framing
    #[error("transport: {0}")]
    Transport(String),
    /// A read deadline expired
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// Peer closed the connection
    #[error("connection closed")]
    Closed,
}

impl Error {
    pub fn request(msg: impl Into<String>) -> Self {
        Self::Request(msg.into())
    }

    pub fn server(err: io::Error) -> Self {
        Self::Server(err.to_string())
    }

    pub fn transport(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => Self::Closed,
            _ => Self::Transport(err.to_string()),
        }
    }

    /// Status code reported to the peer for this error.
    pub fn status(&self) -> Status {
        match self {
            Self::Request(_) => Status::BadRequest,
            _ => Status::ServerError,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_) | Self::Closed)
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Transport(format!("encode: {err}"))
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::Transport(format!("decode: {err}"))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
