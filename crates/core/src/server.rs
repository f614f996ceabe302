use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crate::error::{RelayError, Result};
use crate::registry::Registry;
use crate::relay::{DatagramEgress, Forwarder};
use crate::session::{FlowKind, TransportKind};
use crate::transport::tcp;
use crate::transport::{UdpEgress, UdpListener};

/// RTSP relay server orchestrator.
///
/// Binds the RTSP TCP listener and, when UDP transport is enabled, the
/// RTP/RTCP UDP listeners, then runs each on its own thread against the
/// shared [`Registry`].
pub struct Server {
    registry: Registry,
    running: Arc<AtomicBool>,
    control_addr: Option<SocketAddr>,
    datagram_addrs: Option<(SocketAddr, SocketAddr)>,
}

impl Server {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            running: Arc::new(AtomicBool::new(false)),
            control_addr: None,
            datagram_addrs: None,
        }
    }

    pub fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(RelayError::AlreadyRunning);
        }

        let settings = self.registry.settings();
        let host = settings.bind_host.as_str();

        let udp = if settings.protocols.contains(TransportKind::Datagram) {
            let rtp = Arc::new(UdpListener::bind(host, settings.rtp_port, FlowKind::Primary)?);
            let rtcp = Arc::new(UdpListener::bind(host, settings.rtcp_port, FlowKind::Feedback)?);
            Some((rtp, rtcp))
        } else {
            None
        };

        let listener = TcpListener::bind((host, settings.control_port))?;
        listener.set_nonblocking(true)?;
        let control_addr = listener.local_addr()?;

        let datagram = udp.as_ref().map(|(rtp, rtcp)| {
            Arc::new(UdpEgress::new(rtp.clone(), rtcp.clone())) as Arc<dyn DatagramEgress>
        });
        let forwarder = Forwarder::new(self.registry.clone(), datagram);

        self.running.store(true, Ordering::SeqCst);

        if let Some((rtp, rtcp)) = udp {
            self.datagram_addrs = Some((rtp.local_addr()?, rtcp.local_addr()?));
            for listener in [rtp, rtcp] {
                let forwarder = forwarder.clone();
                let running = self.running.clone();
                thread::spawn(move || listener.run(forwarder, running));
            }
        }

        self.control_addr = Some(control_addr);
        tracing::info!(addr = %control_addr, "RTSP relay listening");

        let running = self.running.clone();
        thread::spawn(move || {
            tcp::accept_loop(listener, forwarder, running);
        });

        Ok(())
    }

    /// Stop accepting connections and receiving datagrams.
    ///
    /// Established control connections run until their clients leave.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        tracing::info!("server stopping");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Bound RTSP address, once started.
    pub fn control_addr(&self) -> Option<SocketAddr> {
        self.control_addr
    }

    /// Bound (RTP, RTCP) addresses, once started with UDP enabled.
    pub fn datagram_addrs(&self) -> Option<(SocketAddr, SocketAddr)> {
        self.datagram_addrs
    }
}
