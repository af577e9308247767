//! Error types for amqpwire.

use thiserror::Error;

/// Reply code sent with a graceful `connection.close`.
pub const REPLY_SUCCESS: u16 = 200;

/// Reply code for authentication and authorization rejections.
pub const ACCESS_REFUSED: u16 = 403;
/// Reply code for unparseable frames.
pub const FRAME_ERROR: u16 = 501;
/// Reply code for malformed method arguments.
pub const SYNTAX_ERROR: u16 = 502;
/// Reply code for a method that is invalid in the current state.
pub const COMMAND_INVALID: u16 = 503;
/// Reply code for operations on a channel that is not open.
pub const CHANNEL_ERROR: u16 = 504;
/// Reply code for a frame type that is not legal on its channel.
pub const UNEXPECTED_FRAME: u16 = 505;

/// Classifies a connection failure so callers can decide whether to
/// retry, reconnect, or give up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Underlying I/O failure (connect, TLS, socket teardown).
    Transport,
    /// Malformed or unreadable frame, or a missed I/O deadline.
    Frame,
    /// Protocol-level violation, including a server-initiated close.
    Protocol,
    /// Non-method, non-heartbeat frame received on channel 0.
    UnexpectedFrame,
    /// No mutually supported authentication mechanism.
    Sasl,
    /// Authentication failure signalled by a socket close during tune.
    Credentials,
    /// The requested virtual host was rejected.
    Vhost,
    /// Operation on a closed channel or connection.
    Closed,
    /// RPC response did not match any expected method.
    CommandInvalid,
}

/// A connection-level failure.
///
/// Errors are cloneable because a single failure fans out to every
/// registered close listener, every open channel, and any in-flight RPC.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{reason} (code {code})")]
pub struct Error {
    /// Failure class, see [`ErrorKind`].
    pub kind: ErrorKind,
    /// Protocol reply code, or 0 when no code applies.
    pub code: u16,
    /// Human-readable reason.
    pub reason: String,
}

impl Error {
    /// I/O failure outside the framing layer.
    pub(crate) fn transport(reason: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transport,
            code: 0,
            reason: reason.into(),
        }
    }

    /// Frame could not be read, written, or parsed.
    pub(crate) fn frame(reason: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Frame,
            code: FRAME_ERROR,
            reason: reason.into(),
        }
    }

    /// Method or table arguments could not be decoded.
    pub(crate) fn syntax(reason: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Frame,
            code: SYNTAX_ERROR,
            reason: reason.into(),
        }
    }

    /// Connection exception raised by the peer via `connection.close`.
    pub(crate) fn remote_close(code: u16, reason: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Protocol,
            code,
            reason: reason.into(),
        }
    }

    /// The channel or connection is not open.
    pub fn closed() -> Self {
        Self {
            kind: ErrorKind::Closed,
            code: CHANNEL_ERROR,
            reason: "channel/connection is not open".to_string(),
        }
    }

    /// Every channel ID up to the negotiated maximum is in use.
    pub(crate) fn channel_max() -> Self {
        Self {
            kind: ErrorKind::Closed,
            code: CHANNEL_ERROR,
            reason: "channel id space exhausted".to_string(),
        }
    }

    pub(crate) fn sasl() -> Self {
        Self {
            kind: ErrorKind::Sasl,
            code: ACCESS_REFUSED,
            reason: "SASL could not negotiate a shared mechanism".to_string(),
        }
    }

    pub(crate) fn credentials() -> Self {
        Self {
            kind: ErrorKind::Credentials,
            code: ACCESS_REFUSED,
            reason: "username or password not allowed".to_string(),
        }
    }

    pub(crate) fn vhost() -> Self {
        Self {
            kind: ErrorKind::Vhost,
            code: ACCESS_REFUSED,
            reason: "no access to this vhost".to_string(),
        }
    }

    /// RPC reply matched none of the expected methods.
    pub fn command_invalid() -> Self {
        Self {
            kind: ErrorKind::CommandInvalid,
            code: COMMAND_INVALID,
            reason: "unexpected command received".to_string(),
        }
    }

    pub(crate) fn unexpected_frame() -> Self {
        Self {
            kind: ErrorKind::UnexpectedFrame,
            code: UNEXPECTED_FRAME,
            reason: "unexpected frame received on channel 0".to_string(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::transport(err.to_string())
    }
}

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
