//! Relay sessions and their state machine.
//!
//! A session is one participant on a path: a publisher feeding media in or
//! a player receiving it. It is created by the first successful SETUP on a
//! control connection and destroyed by TEARDOWN, connection loss, or a
//! failed delivery.
//!
//! ```text
//! Init          --SETUP (mode=record)--> ReadyPublish --RECORD--> Publishing
//! Init          --SETUP----------------> ReadyPlay    --PLAY----> Playing
//! Ready*        --SETUP (same role)----> Ready*       (one more track)
//! any but Closed --TEARDOWN / error----> Closed
//! ```

pub mod transport;

use std::fmt;
use std::net::SocketAddr;

use crate::error::SessionError;
use crate::transport::ConnectionHandle;
pub use transport::{FlowKind, Track, TransportKind};

/// Opaque session handle, issued monotonically by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub(crate) u64);

impl SessionId {
    /// Value used in the RTSP `Session` header.
    pub fn header_value(&self) -> String {
        format!("{:016X}", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Publisher,
    Player,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Publisher => f.write_str("publisher"),
            Self::Player => f.write_str("player"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    ReadyPublish,
    ReadyPlay,
    Publishing,
    Playing,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "INIT",
            Self::ReadyPublish => "READY_PUBLISH",
            Self::ReadyPlay => "READY_PLAY",
            Self::Publishing => "PUBLISHING",
            Self::Playing => "PLAYING",
            Self::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

/// State-changing commands parsed out of RTSP requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Setup(Role),
    Record,
    Play,
    Teardown,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Setup(role) => write!(f, "SETUP ({role})"),
            Self::Record => f.write_str("RECORD"),
            Self::Play => f.write_str("PLAY"),
            Self::Teardown => f.write_str("TEARDOWN"),
        }
    }
}

impl SessionState {
    /// State reached by applying `command`, or
    /// [`SessionError::InvalidStateTransition`] if it is not legal here.
    pub fn next(self, command: Command) -> Result<SessionState, SessionError> {
        use Command::*;
        use SessionState::*;

        match (self, command) {
            (Init | ReadyPublish, Setup(Role::Publisher)) => Ok(ReadyPublish),
            (Init | ReadyPlay, Setup(Role::Player)) => Ok(ReadyPlay),
            (ReadyPublish, Record) => Ok(Publishing),
            (ReadyPlay, Play) => Ok(Playing),
            (Init | ReadyPublish | ReadyPlay | Publishing | Playing, Teardown) => Ok(Closed),
            (state, command) => Err(SessionError::InvalidStateTransition { state, command }),
        }
    }

    /// Whether the track list may still grow.
    pub fn is_ready(self) -> bool {
        matches!(self, SessionState::ReadyPublish | SessionState::ReadyPlay)
    }
}

/// A registered session as stored in the [`Registry`](crate::Registry).
///
/// Only the owning connection handler changes `state` and `tracks`; the
/// forwarder reads them under the registry's shared lock.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    /// Control connection's remote address; its IP is the datagram peer.
    pub peer: SocketAddr,
    pub path: String,
    pub role: Role,
    pub transport: TransportKind,
    pub tracks: Vec<Track>,
    pub state: SessionState,
    /// Writer of the owning control connection.
    pub conn: ConnectionHandle,
    /// SDP supplied by a publisher through ANNOUNCE.
    pub sdp: Option<String>,
}

impl Session {
    /// Build a session record with its first track.
    pub fn new(
        id: SessionId,
        peer: SocketAddr,
        path: &str,
        role: Role,
        transport: TransportKind,
        first_track: Track,
        conn: ConnectionHandle,
    ) -> Self {
        let state = match role {
            Role::Publisher => SessionState::ReadyPublish,
            Role::Player => SessionState::ReadyPlay,
        };
        Session {
            id,
            peer,
            path: path.to_string(),
            role,
            transport,
            tracks: vec![first_track],
            state,
            conn,
            sdp: None,
        }
    }

    pub fn with_sdp(mut self, sdp: Option<String>) -> Self {
        self.sdp = sdp;
        self
    }

    /// Destination for a datagram on `track`/`flow`, if the track exists.
    pub fn datagram_dest(&self, track: usize, flow: FlowKind) -> Option<SocketAddr> {
        self.tracks
            .get(track)
            .map(|t| SocketAddr::new(self.peer.ip(), t.port(flow)))
    }
}
