//! The relay operation shared by both ingress paths.
//!
//! UDP receive loops and interleaved frames read off publishing control
//! connections both end in [`Forwarder::forward`], which fans the frame out
//! to the path's playing sessions through the [`Registry`].

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;

use crate::registry::Registry;
use crate::session::FlowKind;

/// Outbound side of the datagram transport.
///
/// Sends are fire-and-forget: a lost datagram is never retried.
pub trait DatagramEgress: Send + Sync {
    /// Send `payload` from the socket bound for `flow` to `dest`.
    fn send_to(&self, flow: FlowKind, payload: &[u8], dest: SocketAddr) -> io::Result<usize>;

    /// Locally bound (RTP, RTCP) ports, advertised as `server_port`.
    fn local_ports(&self) -> (u16, u16);
}

/// Registry plus the egress it needs to reach datagram players.
#[derive(Clone)]
pub struct Forwarder {
    registry: Registry,
    datagram: Option<Arc<dyn DatagramEgress>>,
}

impl Forwarder {
    /// `datagram` is `None` when UDP transport is disabled.
    pub fn new(registry: Registry, datagram: Option<Arc<dyn DatagramEgress>>) -> Self {
        Self { registry, datagram }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Server (RTP, RTCP) ports, if UDP transport is bound.
    pub fn datagram_ports(&self) -> Option<(u16, u16)> {
        self.datagram.as_ref().map(|d| d.local_ports())
    }

    /// Deliver one frame to every playing session on `path`.
    ///
    /// Returns the number of sessions reached. Failed destinations are torn
    /// down; the caller never sees their errors.
    pub fn forward(&self, path: &str, track: usize, flow: FlowKind, payload: Bytes) -> usize {
        let delivered = self
            .registry
            .forward(self.datagram.as_deref(), path, track, flow, &payload);
        tracing::trace!(path, track, %flow, len = payload.len(), delivered, "frame forwarded");
        delivered
    }
}
