use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;

use crate::error::Result;
use crate::relay::{DatagramEgress, Forwarder};
use crate::session::FlowKind;

/// Receive buffer size; no UDP payload is larger, so nothing is truncated.
const MAX_DATAGRAM_LEN: usize = u16::MAX as usize;

/// How often the receive loop re-checks the `running` flag.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// UDP listener for one flow (RTP or RTCP).
///
/// Owns one bound, unconnected socket shared by every datagram session of
/// that flow. Inbound datagrams are relayed only when they come from a
/// publishing session's registered client port; everything else is dropped.
pub struct UdpListener {
    flow: FlowKind,
    socket: Arc<UdpSocket>,
}

impl UdpListener {
    pub fn bind(host: &str, port: u16, flow: FlowKind) -> Result<Self> {
        let socket = UdpSocket::bind((host, port))?;
        socket.set_read_timeout(Some(POLL_INTERVAL))?;
        tracing::info!(addr = %socket.local_addr()?, %flow, "UDP listener bound");
        Ok(Self {
            flow,
            socket: Arc::new(socket),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Send raw bytes to a specific socket address.
    pub fn send_to(&self, payload: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(payload, addr)
    }

    /// Receive loop. Exits once `running` is cleared.
    pub fn run(&self, forwarder: Forwarder, running: Arc<AtomicBool>) {
        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];

        while running.load(Ordering::SeqCst) {
            let (len, source) = match self.socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(ref e)
                    if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
                {
                    continue;
                }
                Err(e) => {
                    // ICMP port-unreachable from an earlier send surfaces
                    // here on some platforms; it concerns only that peer.
                    tracing::debug!(flow = %self.flow, error = %e, "UDP receive error");
                    continue;
                }
            };

            let Some((path, track)) = forwarder
                .registry()
                .publisher_for_source(source, self.flow)
            else {
                tracing::trace!(%source, flow = %self.flow, len, "dropping datagram from unknown source");
                continue;
            };

            forwarder.forward(&path, track, self.flow, Bytes::copy_from_slice(&buf[..len]));
        }

        tracing::debug!(flow = %self.flow, "UDP receive loop exited");
    }
}

/// The pair of UDP listeners seen as the forwarder's datagram egress.
pub struct UdpEgress {
    rtp: Arc<UdpListener>,
    rtcp: Arc<UdpListener>,
}

impl UdpEgress {
    pub fn new(rtp: Arc<UdpListener>, rtcp: Arc<UdpListener>) -> Self {
        Self { rtp, rtcp }
    }
}

impl DatagramEgress for UdpEgress {
    fn send_to(&self, flow: FlowKind, payload: &[u8], dest: SocketAddr) -> io::Result<usize> {
        match flow {
            FlowKind::Primary => self.rtp.send_to(payload, dest),
            FlowKind::Feedback => self.rtcp.send_to(payload, dest),
        }
    }

    fn local_ports(&self) -> (u16, u16) {
        let port = |l: &UdpListener| l.local_addr().map(|a| a.port()).unwrap_or(0);
        (port(&self.rtp), port(&self.rtcp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn egress_routes_by_flow() {
        let rtp = Arc::new(UdpListener::bind("127.0.0.1", 0, FlowKind::Primary).unwrap());
        let rtcp = Arc::new(UdpListener::bind("127.0.0.1", 0, FlowKind::Feedback).unwrap());
        let rtcp_port = rtcp.local_addr().unwrap().port();
        let egress = UdpEgress::new(rtp, rtcp);

        let sink = UdpSocket::bind("127.0.0.1:0").unwrap();
        sink.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

        egress
            .send_to(FlowKind::Feedback, b"report", sink.local_addr().unwrap())
            .unwrap();

        let mut buf = [0u8; 64];
        let (len, from) = sink.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"report");
        assert_eq!(from.port(), rtcp_port);
        assert_eq!(egress.local_ports().1, rtcp_port);
    }
}
