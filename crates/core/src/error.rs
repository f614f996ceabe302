//! Error types for the relay server library.

use std::fmt;

use crate::session::transport::TransportKind;
use crate::session::{Command, SessionState};

/// Errors detected while validating the startup configuration.
///
/// All of these are fatal: they are reported before any socket is bound.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A protocol name other than `udp` or `tcp` was requested.
    #[error("unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    /// The protocol list was empty.
    #[error("no protocols supplied")]
    NoProtocols,

    /// The publish key contains characters outside `[A-Za-z0-9]`.
    #[error("publish key must be alphanumeric")]
    InvalidSecret,

    /// A zero write timeout cannot be applied to a socket.
    #[error("write timeout must be greater than zero")]
    ZeroWriteTimeout,
}

/// Errors that reject a single RTSP request during session setup.
///
/// These are surfaced to the requesting connection as an RTSP status code
/// (see [`status`](Self::status)); the session stays unregistered or
/// unchanged and the server keeps running.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// A publish key is configured and the client supplied none.
    #[error("publish key required")]
    AuthRequired,

    /// The supplied publish key does not match.
    #[error("wrong publish key")]
    AuthFailed,

    /// The requested transport is not in the configured protocol set.
    #[error("transport not supported: {0}")]
    TransportNotSupported(TransportKind),

    /// Another session already publishes on this path.
    #[error("someone is already publishing on path: {0}")]
    PathInUse(String),

    /// A player asked for a path nobody is publishing on.
    #[error("no one is publishing on path: {0}")]
    NoPublisher(String),

    /// The command is not legal in the session's current state.
    #[error("{command} not allowed in state {state}")]
    InvalidStateTransition {
        state: SessionState,
        command: Command,
    },

    /// The `Session` header names a session this connection does not own.
    #[error("session not found")]
    SessionMismatch,
}

impl SessionError {
    /// RTSP status code reported to the client.
    pub fn status(&self) -> u16 {
        match self {
            Self::AuthRequired => 401,
            Self::AuthFailed => 403,
            Self::TransportNotSupported(_) => 461,
            Self::PathInUse(_) => 400,
            Self::NoPublisher(_) => 404,
            Self::InvalidStateTransition { .. } => 455,
            Self::SessionMismatch => 454,
        }
    }
}

/// Errors that can occur in the relay server library.
///
/// - **Startup**: [`AlreadyRunning`](Self::AlreadyRunning).
/// - **Protocol**: [`Parse`](Self::Parse), [`FrameTooLarge`](Self::FrameTooLarge).
/// - **Transport**: [`Io`](Self::Io), [`EgressFull`](Self::EgressFull),
///   [`EgressClosed`](Self::EgressClosed), [`NoDatagramEgress`](Self::NoDatagramEgress).
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse an RTSP request message.
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// Interleaved payloads carry a 16-bit length.
    #[error("interleaved frame too large: {0} bytes")]
    FrameTooLarge(usize),

    /// The destination connection's egress queue is full.
    #[error("egress queue full")]
    EgressFull,

    /// The destination connection's writer has gone away.
    #[error("egress closed")]
    EgressClosed,

    /// A datagram session exists but no UDP listener is bound.
    #[error("no datagram egress available")]
    NoDatagramEgress,

    /// [`Server::start`](crate::Server::start) was called while already running.
    #[error("server already running")]
    AlreadyRunning,
}

/// Specific kind of RTSP parse failure.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// Input was empty (no request line).
    EmptyRequest,
    /// Request line did not have the expected `Method URI Version` format.
    InvalidRequestLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyRequest => write!(f, "empty request"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidHeader => write!(f, "invalid header"),
        }
    }
}

/// Convenience alias for `Result<T, RelayError>`.
pub type Result<T> = std::result::Result<T, RelayError>;
