use std::net::SocketAddr;

use bytes::Bytes;

use crate::error::SessionError;
use crate::protocol::request::{RtspRequest, Target};
use crate::protocol::response::RtspResponse;
use crate::registry::Registry;
use crate::relay::Forwarder;
use crate::session::transport::TransportHeader;
use crate::session::{
    Command, FlowKind, Role, Session, SessionId, SessionState, Track, TransportKind,
};
use crate::transport::ConnectionHandle;
use crate::transport::interleaved;

/// The registered session owned by a connection.
#[derive(Debug)]
struct Active {
    id: SessionId,
    path: String,
    role: Role,
    transport: TransportKind,
    tracks: usize,
}

/// What ANNOUNCE left behind for the publisher's SETUP.
#[derive(Debug)]
struct Announce {
    path: String,
    key: Option<String>,
    sdp: String,
}

/// Handles RTSP requests for a single control connection.
///
/// Owns the connection's session end-to-end: it alone drives the session
/// state machine and registers, updates and unregisters it.
pub struct ControlHandler {
    forwarder: Forwarder,
    conn: ConnectionHandle,
    peer: SocketAddr,
    state: SessionState,
    session: Option<Active>,
    announce: Option<Announce>,
    closing: bool,
}

impl ControlHandler {
    pub fn new(forwarder: Forwarder, conn: ConnectionHandle, peer: SocketAddr) -> Self {
        ControlHandler {
            forwarder,
            conn,
            peer,
            state: SessionState::Init,
            session: None,
            announce: None,
            closing: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(|a| a.id)
    }

    /// Whether the connection should be closed after the last response.
    pub fn should_close(&self) -> bool {
        self.closing
    }

    fn registry(&self) -> &Registry {
        self.forwarder.registry()
    }

    pub fn handle(&mut self, request: &RtspRequest) -> RtspResponse {
        let cseq = request.cseq().unwrap_or("0");

        let result = match request.method.as_str() {
            "OPTIONS" => Ok(self.handle_options()),
            "DESCRIBE" => Ok(self.handle_describe(request)),
            "ANNOUNCE" => Ok(self.handle_announce(request)),
            "SETUP" => self.handle_setup(request),
            "RECORD" => self.handle_transition(request, Command::Record),
            "PLAY" => self.handle_transition(request, Command::Play),
            "TEARDOWN" => Ok(self.handle_teardown()),
            "GET_PARAMETER" => Ok(RtspResponse::ok()),
            _ => {
                tracing::warn!(method = %request.method, %cseq, "unsupported RTSP method");
                Ok(RtspResponse::new(501))
            }
        };

        let response = result.unwrap_or_else(|e| {
            tracing::warn!(peer = %self.peer, method = %request.method, error = %e, "request rejected");
            RtspResponse::rejected(&e)
        });

        response.header("CSeq", cseq)
    }

    fn handle_options(&self) -> RtspResponse {
        RtspResponse::ok().header(
            "Public",
            "OPTIONS, DESCRIBE, ANNOUNCE, SETUP, PLAY, RECORD, TEARDOWN, GET_PARAMETER",
        )
    }

    fn handle_describe(&self, request: &RtspRequest) -> RtspResponse {
        let Some(target) = Target::parse(&request.uri) else {
            return RtspResponse::bad_request();
        };

        match self.registry().publisher_sdp(&target.path) {
            Some(sdp) => RtspResponse::ok()
                .header("Content-Base", format!("{}/", request.uri.trim_end_matches('/')))
                .sdp(sdp),
            None => {
                tracing::debug!(path = %target.path, "DESCRIBE for path without publisher");
                RtspResponse::not_found()
            }
        }
    }

    fn handle_announce(&mut self, request: &RtspRequest) -> RtspResponse {
        if self.state != SessionState::Init {
            return RtspResponse::new(455);
        }
        let Some(target) = Target::parse(&request.uri) else {
            return RtspResponse::bad_request();
        };
        if request.body.is_empty() {
            tracing::warn!(path = %target.path, "ANNOUNCE without SDP body");
            return RtspResponse::bad_request();
        }

        tracing::debug!(path = %target.path, sdp_len = request.body.len(), "ANNOUNCE");
        self.announce = Some(Announce {
            path: target.path,
            key: target.key,
            sdp: request.body.clone(),
        });
        RtspResponse::ok()
    }

    fn handle_setup(&mut self, request: &RtspRequest) -> Result<RtspResponse, SessionError> {
        let Some(target) = Target::parse(&request.uri) else {
            return Ok(RtspResponse::bad_request());
        };
        let Some(header) = request.get_header("Transport").and_then(TransportHeader::parse) else {
            tracing::warn!(uri = %request.uri, "SETUP without usable Transport header");
            return Ok(RtspResponse::bad_request());
        };

        let role = if header.record {
            Role::Publisher
        } else {
            Role::Player
        };
        let next = self.state.next(Command::Setup(role))?;

        let server_ports = match header.kind {
            TransportKind::Datagram => Some(
                self.forwarder
                    .datagram_ports()
                    .filter(|_| self.registry().settings().protocols.contains(header.kind))
                    .ok_or(SessionError::TransportNotSupported(header.kind))?,
            ),
            TransportKind::StreamMultiplexed => {
                if !self.registry().settings().protocols.contains(header.kind) {
                    return Err(SessionError::TransportNotSupported(header.kind));
                }
                None
            }
        };

        let index = self.session.as_ref().map_or(0, |a| a.tracks);
        let Some(channel) = interleaved::channel_id(index, FlowKind::Primary) else {
            return Ok(RtspResponse::bad_request());
        };
        let track = match header.client_ports {
            Some((rtp, rtcp)) => Track::datagram(index, rtp, rtcp),
            None => Track::interleaved(index),
        };

        let id = match self.session.as_mut() {
            Some(active) => {
                if active.path != target.path || active.transport != header.kind {
                    tracing::warn!(session_id = %active.id, path = %target.path, "SETUP mixes paths or transports");
                    return Ok(RtspResponse::bad_request());
                }
                if !self.forwarder.registry().add_track(active.id, track) {
                    return Err(SessionError::SessionMismatch);
                }
                active.tracks += 1;
                active.id
            }
            None => self.register(&target, role, header.kind, track)?,
        };
        self.state = next;

        tracing::info!(
            session_id = %id,
            peer = %self.peer,
            path = %target.path,
            %role,
            transport = %header.kind,
            track = index,
            "track set up"
        );

        let mut transport = match server_ports {
            Some((server_rtp, server_rtcp)) => format!(
                "RTP/AVP;unicast;client_port={}-{};server_port={}-{}",
                track.rtp_port, track.rtcp_port, server_rtp, server_rtcp
            ),
            None => format!(
                "RTP/AVP/TCP;unicast;interleaved={}-{}",
                channel,
                u16::from(channel) + 1
            ),
        };
        if header.record {
            transport.push_str(";mode=record");
        }

        Ok(RtspResponse::ok()
            .header("Transport", transport)
            .header("Session", id.header_value()))
    }

    /// First SETUP on the connection: authorize and register the session.
    fn register(
        &mut self,
        target: &Target,
        role: Role,
        transport: TransportKind,
        track: Track,
    ) -> Result<SessionId, SessionError> {
        let registry = self.forwarder.registry();
        let id = registry.next_session_id();
        let session = Session::new(
            id,
            self.peer,
            &target.path,
            role,
            transport,
            track,
            self.conn.clone(),
        );

        match role {
            Role::Publisher => {
                let announce = self.announce.as_ref().filter(|a| a.path == target.path);
                let key = target
                    .key
                    .as_deref()
                    .or_else(|| announce.and_then(|a| a.key.as_deref()));
                check_publish_key(registry.settings().publish_key.as_deref(), key)?;

                let sdp = announce.map(|a| a.sdp.clone());
                registry.register_publisher(session.with_sdp(sdp))?;
            }
            Role::Player => {
                if registry.publisher(&target.path).is_none() {
                    return Err(SessionError::NoPublisher(target.path.clone()));
                }
                registry.register_player(session);
            }
        }

        self.session = Some(Active {
            id,
            path: target.path.clone(),
            role,
            transport,
            tracks: 1,
        });
        Ok(id)
    }

    fn handle_transition(
        &mut self,
        request: &RtspRequest,
        command: Command,
    ) -> Result<RtspResponse, SessionError> {
        let next = self.state.next(command)?;
        let Some(active) = self.session.as_ref() else {
            return Err(SessionError::SessionMismatch);
        };
        if let Some(requested) = request.session_id()
            && requested != active.id.header_value()
        {
            return Err(SessionError::SessionMismatch);
        }

        let id = active.id;
        if !self.registry().set_state(id, next) {
            // Torn down underneath us after a delivery failure.
            self.closing = true;
            return Err(SessionError::SessionMismatch);
        }
        self.state = next;

        tracing::info!(session_id = %id, path = %active.path, state = %next, "session started");

        Ok(RtspResponse::ok().header("Session", id.header_value()))
    }

    fn handle_teardown(&mut self) -> RtspResponse {
        self.close();
        self.closing = true;
        RtspResponse::ok()
    }

    /// Interleaved frame read off this connection.
    ///
    /// Relayed only while this connection publishes over interleaved
    /// transport and the channel maps to one of its tracks.
    pub fn handle_frame(&self, channel: u8, payload: Bytes) {
        let Some(active) = self.session.as_ref() else {
            return;
        };
        if self.state != SessionState::Publishing
            || active.transport != TransportKind::StreamMultiplexed
        {
            return;
        }

        let (track, flow) = interleaved::split_channel(channel);
        if track >= active.tracks {
            tracing::trace!(session_id = %active.id, channel, "frame on unknown channel dropped");
            return;
        }
        self.forwarder.forward(&active.path, track, flow, payload);
    }

    /// Move to CLOSED and unregister the session. Safe to call repeatedly.
    pub fn close(&mut self) {
        if let Some(active) = self.session.take() {
            self.registry().unregister(active.id);
            tracing::info!(session_id = %active.id, path = %active.path, role = %active.role, "session closed");
        }
        self.state = SessionState::Closed;
    }
}

fn check_publish_key(expected: Option<&str>, supplied: Option<&str>) -> Result<(), SessionError> {
    match (expected, supplied) {
        (None, _) => Ok(()),
        (Some(_), None) => Err(SessionError::AuthRequired),
        (Some(expected), Some(supplied)) if expected == supplied => Ok(()),
        (Some(_), Some(_)) => Err(SessionError::AuthFailed),
    }
}
