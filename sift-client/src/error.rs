//! Error types for the sift-client engine.

use core::fmt::{self, Display, Formatter};

use thiserror::Error;

use sift_common::error::{ReplyError, StatusError};

use crate::dispatch::ConnectionId;

/// Failure raised by user stage code. Contained by the dispatcher: it is
/// logged and converted into the configured fallback verdict for the one
/// event that raised it.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// A plain handler-domain failure.
    #[error("{0}")]
    Message(String),

    /// An invalid status name reached the handler.
    #[error(transparent)]
    Status(#[from] StatusError),

    /// An invalid reply reached the handler.
    #[error(transparent)]
    Reply(#[from] ReplyError),

    /// Anything else a handler author bubbles up.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HandlerError {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

/// How a guarded handler invocation failed.
#[derive(Debug)]
pub enum HandlerFailure {
    /// The stage method returned an error.
    Error(HandlerError),
    /// The stage method panicked; the payload is rendered best-effort.
    Panic(String),
}

impl Display for HandlerFailure {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            Self::Error(error) => write!(fmt, "handler error: {error}"),
            Self::Panic(message) => write!(fmt, "handler panicked: {message}"),
        }
    }
}

/// Engine-level dispatch failures. These are the caller's bugs, not the
/// handlers', and they propagate instead of being swallowed by the
/// per-event guard.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// No session is registered for the connection.
    #[error("no session registered for connection {0}")]
    UnknownConnection(ConnectionId),

    /// The connection already has a live session.
    #[error("a session is already registered for connection {0}")]
    DuplicateConnection(ConnectionId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_failure_display() {
        let failure = HandlerFailure::Error(HandlerError::message("dns lookup failed"));
        assert_eq!(failure.to_string(), "handler error: dns lookup failed");

        let failure = HandlerFailure::Panic("index out of bounds".to_string());
        assert_eq!(failure.to_string(), "handler panicked: index out of bounds");
    }

    #[test]
    fn test_dispatch_error_display() {
        let error = DispatchError::UnknownConnection(ConnectionId::new(7));
        assert_eq!(error.to_string(), "no session registered for connection 7");
    }

    #[test]
    fn test_status_error_conversion() {
        let error: HandlerError =
            sift_common::error::StatusError::InvalidStatusName("bogus".to_string()).into();
        assert_eq!(error.to_string(), "unknown status name: \"bogus\"");
    }
}
