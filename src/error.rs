//! Error and Result types.

use std::error::Error as StdError;
use std::fmt;

/// Result type returned from methods that can produce a [`hyperflow::Error`](Error).
pub type Result<T> = std::result::Result<T, Error>;

type Cause = Box<dyn StdError + Send + Sync>;

/// The error type for this crate, covering the failure modes of the
/// executor, the TCP client layer, the WebSocket engine and the HTTP
/// façade.
pub struct Error {
    inner: Box<ErrorImpl>,
}

struct ErrorImpl {
    kind: Kind,
    cause: Option<Cause>,
}

#[derive(Debug)]
pub(crate) enum Kind {
    /// An error surfaced by the underlying HTTP transport.
    Transport,
    /// An error surfaced by the reactor while multiplexing handles.
    Multi,
    /// An option setter was called with a value of the wrong category.
    InvalidOption,
    /// An argument passed to an API was not acceptable (e.g. requesting
    /// slist info for a non-slist info id).
    InvalidArgument,
    /// A logic error: the caller used the API in a way its invariants forbid.
    Logic(Logic),
    /// An in-flight operation was cancelled.
    Aborted,
    /// The WebSocket upgrade handshake failed.
    HandshakeFailed(Option<u16>),
    /// A WebSocket protocol violation, carrying the close code and reason
    /// that were (or would be) sent to the peer.
    Protocol(u16, String),
}

/// Logic errors: the caller used the API in a way its invariants forbid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Logic {
    /// A send or receive operation was already in progress on this
    /// direction of the TCP client.
    InProgress,
    /// The operation requires a connected TCP client.
    NotConnected,
    /// The handle is already attached to a different reactor.
    WrongReactor,
    /// `perform()` was called on a handle that is currently attached to an
    /// executor.
    PerformOnAttached,
}

impl fmt::Display for Logic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Logic::InProgress => "operation already in progress",
            Logic::NotConnected => "not connected",
            Logic::WrongReactor => "handle belongs to a different reactor",
            Logic::PerformOnAttached => "perform() called on an attached handle",
        })
    }
}

impl Error {
    pub(crate) fn new(kind: Kind) -> Error {
        Error {
            inner: Box::new(ErrorImpl { kind, cause: None }),
        }
    }

    pub(crate) fn with<C: Into<Cause>>(mut self, cause: C) -> Error {
        self.inner.cause = Some(cause.into());
        self
    }

    pub(crate) fn transport<C: Into<Cause>>(cause: C) -> Error {
        Error::new(Kind::Transport).with(cause)
    }

    pub(crate) fn multi<C: Into<Cause>>(cause: C) -> Error {
        Error::new(Kind::Multi).with(cause)
    }

    pub(crate) fn invalid_option() -> Error {
        Error::new(Kind::InvalidOption)
    }

    pub(crate) fn invalid_argument() -> Error {
        Error::new(Kind::InvalidArgument)
    }

    pub(crate) fn logic(kind: Logic) -> Error {
        Error::new(Kind::Logic(kind))
    }

    pub(crate) fn aborted() -> Error {
        Error::new(Kind::Aborted)
    }

    pub(crate) fn handshake_failed(status: Option<u16>) -> Error {
        Error::new(Kind::HandshakeFailed(status))
    }

    pub(crate) fn protocol(code: u16, reason: impl Into<String>) -> Error {
        Error::new(Kind::Protocol(code, reason.into()))
    }

    /// Returns true if this error means the operation was cancelled.
    pub fn is_aborted(&self) -> bool {
        matches!(self.inner.kind, Kind::Aborted)
    }

    /// Returns true if this was an error from the underlying transport.
    pub fn is_transport(&self) -> bool {
        matches!(self.inner.kind, Kind::Transport)
    }

    /// Returns true if this was a WebSocket protocol violation, and if so
    /// the close code and reason that apply.
    pub fn as_protocol(&self) -> Option<(u16, &str)> {
        match &self.inner.kind {
            Kind::Protocol(code, reason) => Some((*code, reason.as_str())),
            _ => None,
        }
    }

    /// Returns true if the WebSocket upgrade handshake failed, and if so
    /// the HTTP status code the peer responded with, if any was parsed.
    pub fn as_handshake_failed(&self) -> Option<Option<u16>> {
        match &self.inner.kind {
            Kind::HandshakeFailed(status) => Some(*status),
            _ => None,
        }
    }

    /// Returns the [`Logic`] variant if this was a caller-misuse error.
    pub fn as_logic(&self) -> Option<Logic> {
        match &self.inner.kind {
            Kind::Logic(l) => Some(*l),
            _ => None,
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = f.debug_struct("hyperflow::Error");
        builder.field("kind", &self.inner.kind);
        if let Some(ref cause) = self.inner.cause {
            builder.field("cause", cause);
        }
        builder.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner.kind {
            Kind::Transport => f.write_str("transport error"),
            Kind::Multi => f.write_str("reactor error"),
            Kind::InvalidOption => f.write_str("invalid option"),
            Kind::InvalidArgument => f.write_str("invalid argument"),
            Kind::Logic(l) => write!(f, "{}", l),
            Kind::Aborted => f.write_str("operation aborted"),
            Kind::HandshakeFailed(Some(status)) => {
                write!(f, "websocket handshake failed, server replied {}", status)
            }
            Kind::HandshakeFailed(None) => f.write_str("websocket handshake failed"),
            Kind::Protocol(code, reason) => {
                write!(f, "websocket protocol error {}: {}", code, reason)
            }
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner.cause.as_ref().map(|c| &**c as &(dyn StdError + 'static))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Error {
        Error::transport(e)
    }
}
