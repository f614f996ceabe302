//! Process-wide session registry.
//!
//! Holds the validated configuration, every live [`Session`] keyed by its
//! [`SessionId`], and the path → publisher index. One `parking_lot::RwLock`
//! guards the mutable state: registration changes take it exclusively,
//! forwarding and lookups share it, so concurrent forwards never serialize
//! against each other.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::RwLock;

use crate::config::{ServerConfig, Settings};
use crate::error::{ConfigError, RelayError, SessionError};
use crate::relay::DatagramEgress;
use crate::session::{FlowKind, Role, Session, SessionId, SessionState, Track, TransportKind};
use crate::transport::interleaved;

#[derive(Default)]
struct Inner {
    sessions: HashMap<SessionId, Session>,
    publishers: HashMap<String, SessionId>,
}

/// Shared registry handle. Clones refer to the same state.
#[derive(Clone)]
pub struct Registry {
    settings: Arc<Settings>,
    inner: Arc<RwLock<Inner>>,
    next_id: Arc<AtomicU64>,
}

impl Registry {
    /// Validate `config` and build an empty registry.
    pub fn configure(config: ServerConfig) -> Result<Self, ConfigError> {
        let settings = Settings::try_from(config)?;
        Ok(Self {
            settings: Arc::new(settings),
            inner: Arc::new(RwLock::new(Inner::default())),
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Issue a fresh session handle. Handles are never reused.
    pub fn next_session_id(&self) -> SessionId {
        SessionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a publisher, claiming its path.
    ///
    /// Fails with [`SessionError::PathInUse`] if another publisher holds
    /// the path; the existing publisher is left in place and `session` is
    /// not added.
    pub fn register_publisher(&self, session: Session) -> Result<(), SessionError> {
        let mut inner = self.inner.write();
        if inner.publishers.contains_key(&session.path) {
            return Err(SessionError::PathInUse(session.path));
        }

        let id = session.id;
        let path = session.path.clone();
        inner.publishers.insert(path.clone(), id);
        inner.sessions.insert(id, session);

        tracing::debug!(session_id = %id, %path, total_sessions = inner.sessions.len(), "publisher registered");
        Ok(())
    }

    pub fn register_player(&self, session: Session) {
        let mut inner = self.inner.write();
        let id = session.id;
        let path = session.path.clone();
        inner.sessions.insert(id, session);
        tracing::debug!(session_id = %id, %path, total_sessions = inner.sessions.len(), "player registered");
    }

    /// Remove a session and any publisher index entry it owns.
    ///
    /// Idempotent: returns `None` if the session is already gone.
    pub fn unregister(&self, id: SessionId) -> Option<Session> {
        let mut inner = self.inner.write();
        let session = inner.sessions.remove(&id)?;

        if inner.publishers.get(&session.path) == Some(&id) {
            inner.publishers.remove(&session.path);
        }

        tracing::debug!(
            session_id = %id,
            path = %session.path,
            role = %session.role,
            total_sessions = inner.sessions.len(),
            "session removed"
        );
        Some(session)
    }

    /// Append a track to a session that is still being set up.
    pub fn add_track(&self, id: SessionId, track: Track) -> bool {
        let mut inner = self.inner.write();
        match inner.sessions.get_mut(&id) {
            Some(session) if session.state.is_ready() => {
                session.tracks.push(track);
                true
            }
            _ => false,
        }
    }

    /// Record a state transition decided by the owning handler.
    pub fn set_state(&self, id: SessionId, state: SessionState) -> bool {
        let mut inner = self.inner.write();
        match inner.sessions.get_mut(&id) {
            Some(session) => {
                tracing::debug!(session_id = %id, old_state = %session.state, new_state = %state, "state transition");
                session.state = state;
                true
            }
            None => false,
        }
    }

    /// Snapshot of a session.
    pub fn session(&self, id: SessionId) -> Option<Session> {
        self.inner.read().sessions.get(&id).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.inner.read().sessions.len()
    }

    /// Current publisher on `path`.
    pub fn publisher(&self, path: &str) -> Option<SessionId> {
        self.inner.read().publishers.get(path).copied()
    }

    /// SDP announced by the publisher on `path`.
    pub fn publisher_sdp(&self, path: &str) -> Option<String> {
        let inner = self.inner.read();
        let id = inner.publishers.get(path)?;
        inner.sessions.get(id)?.sdp.clone()
    }

    /// Resolve a datagram source to `(path, track)` of a publishing UDP
    /// session whose client port for `flow` matches `source`.
    pub fn publisher_for_source(&self, source: SocketAddr, flow: FlowKind) -> Option<(String, usize)> {
        let inner = self.inner.read();
        inner
            .publishers
            .values()
            .filter_map(|id| inner.sessions.get(id))
            .filter(|s| {
                s.state == SessionState::Publishing
                    && s.transport == TransportKind::Datagram
                    && s.peer.ip() == source.ip()
            })
            .find_map(|s| {
                s.tracks
                    .iter()
                    .position(|t| t.port(flow) == source.port())
                    .map(|track| (s.path.clone(), track))
            })
    }

    /// Deliver a frame to every playing player on `path`.
    ///
    /// Datagram players are sent to through `datagram`; interleaved players
    /// get the frame queued on their connection's writer. A failure for one
    /// destination never stops delivery to the others: failed sessions are
    /// unregistered and their connections closed once the shared lock is
    /// released. Returns the number of successful deliveries.
    pub fn forward(
        &self,
        datagram: Option<&dyn DatagramEgress>,
        path: &str,
        track: usize,
        flow: FlowKind,
        payload: &Bytes,
    ) -> usize {
        let mut delivered = 0;
        let mut failed = Vec::new();

        {
            let inner = self.inner.read();
            for session in inner.sessions.values() {
                if session.path != path
                    || session.role != Role::Player
                    || session.state != SessionState::Playing
                {
                    continue;
                }

                let result = match session.transport {
                    TransportKind::Datagram => {
                        let Some(dest) = session.datagram_dest(track, flow) else {
                            continue;
                        };
                        match datagram {
                            Some(egress) => egress
                                .send_to(flow, payload, dest)
                                .map(|_| ())
                                .map_err(RelayError::from),
                            None => Err(RelayError::NoDatagramEgress),
                        }
                    }
                    TransportKind::StreamMultiplexed => {
                        if track >= session.tracks.len() {
                            continue;
                        }
                        let Some(channel) = interleaved::channel_id(track, flow) else {
                            continue;
                        };
                        session.conn.send_frame(channel, payload.clone())
                    }
                };

                match result {
                    Ok(()) => delivered += 1,
                    Err(e) => {
                        tracing::warn!(session_id = %session.id, path, track, %flow, error = %e, "delivery failed, tearing session down");
                        failed.push(session.id);
                    }
                }
            }
        }

        for id in failed {
            if let Some(session) = self.unregister(id) {
                session.conn.close();
            }
        }

        delivered
    }
}
