use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// How a session's media travels.
///
/// Chosen per session at SETUP time from the client's `Transport` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// RTP/RTCP over the server's two shared UDP sockets.
    Datagram,
    /// RTP/RTCP interleaved inside the RTSP TCP connection.
    StreamMultiplexed,
}

impl TransportKind {
    /// Protocol name used on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Datagram => "udp",
            Self::StreamMultiplexed => "tcp",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "udp" => Ok(Self::Datagram),
            "tcp" => Ok(Self::StreamMultiplexed),
            other => Err(ConfigError::UnsupportedProtocol(other.to_string())),
        }
    }
}

/// Sub-stream of a track: RTP media or its RTCP companion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowKind {
    Primary,
    Feedback,
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => f.write_str("rtp"),
            Self::Feedback => f.write_str("rtcp"),
        }
    }
}

/// Non-empty set of enabled transport kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolSet {
    datagram: bool,
    stream: bool,
}

impl ProtocolSet {
    /// Parse protocol names (`udp`, `tcp`). Duplicates are allowed.
    pub fn parse<S: AsRef<str>>(names: &[S]) -> Result<Self, ConfigError> {
        let mut set = ProtocolSet {
            datagram: false,
            stream: false,
        };
        for name in names {
            match name.as_ref().parse::<TransportKind>()? {
                TransportKind::Datagram => set.datagram = true,
                TransportKind::StreamMultiplexed => set.stream = true,
            }
        }
        if !set.datagram && !set.stream {
            return Err(ConfigError::NoProtocols);
        }
        Ok(set)
    }

    pub fn contains(&self, kind: TransportKind) -> bool {
        match kind {
            TransportKind::Datagram => self.datagram,
            TransportKind::StreamMultiplexed => self.stream,
        }
    }
}

/// One media sub-stream of a session.
///
/// `rtp_port`/`rtcp_port` are the client's ports and only matter for
/// [`TransportKind::Datagram`] sessions; interleaved tracks carry zeros.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Track {
    pub index: usize,
    pub rtp_port: u16,
    pub rtcp_port: u16,
}

impl Track {
    pub fn datagram(index: usize, rtp_port: u16, rtcp_port: u16) -> Self {
        Self {
            index,
            rtp_port,
            rtcp_port,
        }
    }

    pub fn interleaved(index: usize) -> Self {
        Self::datagram(index, 0, 0)
    }

    /// Client port for the given flow.
    pub fn port(&self, flow: FlowKind) -> u16 {
        match flow {
            FlowKind::Primary => self.rtp_port,
            FlowKind::Feedback => self.rtcp_port,
        }
    }
}

/// Parsed client-side transport info from the RTSP `Transport` header.
///
/// ```text
/// RTP/AVP;unicast;client_port=8000-8001            -> Datagram
/// RTP/AVP/TCP;unicast;interleaved=0-1              -> StreamMultiplexed
/// RTP/AVP;unicast;client_port=8000-8001;mode=record -> Datagram, publisher
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportHeader {
    pub kind: TransportKind,
    /// `client_port=RTP-RTCP`, required for datagram transport.
    pub client_ports: Option<(u16, u16)>,
    /// `mode=record` marks a publishing client.
    pub record: bool,
}

impl TransportHeader {
    /// Parse the `Transport` header value.
    ///
    /// Returns `None` for datagram transport without a `client_port` pair.
    ///
    /// ```
    /// use relay::session::transport::{TransportHeader, TransportKind};
    ///
    /// let th = TransportHeader::parse("RTP/AVP;unicast;client_port=8000-8001").unwrap();
    /// assert_eq!(th.kind, TransportKind::Datagram);
    /// assert_eq!(th.client_ports, Some((8000, 8001)));
    ///
    /// assert!(TransportHeader::parse("RTP/AVP;unicast").is_none());
    /// ```
    pub fn parse(header: &str) -> Option<Self> {
        let mut kind = TransportKind::Datagram;
        let mut client_ports = None;
        let mut record = false;

        for part in header.split(';') {
            let part = part.trim();
            if part.eq_ignore_ascii_case("RTP/AVP/TCP") || part.starts_with("interleaved=") {
                kind = TransportKind::StreamMultiplexed;
            } else if let Some(ports) = part.strip_prefix("client_port=") {
                let (rtp, rtcp) = ports.split_once('-')?;
                client_ports = Some((rtp.trim().parse().ok()?, rtcp.trim().parse().ok()?));
            } else if let Some(mode) = part.strip_prefix("mode=") {
                record = mode.trim_matches('"').eq_ignore_ascii_case("record");
            }
        }

        if kind == TransportKind::Datagram && client_ports.is_none() {
            return None;
        }

        Some(TransportHeader {
            kind,
            client_ports,
            record,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_transport() {
        let th = TransportHeader::parse("RTP/AVP;unicast;client_port=5000-5001").unwrap();
        assert_eq!(th.kind, TransportKind::Datagram);
        assert_eq!(th.client_ports, Some((5000, 5001)));
        assert!(!th.record);
    }

    #[test]
    fn parse_no_client_port() {
        assert!(TransportHeader::parse("RTP/AVP;unicast").is_none());
    }

    #[test]
    fn parse_interleaved() {
        let th = TransportHeader::parse("RTP/AVP/TCP;unicast;interleaved=0-1").unwrap();
        assert_eq!(th.kind, TransportKind::StreamMultiplexed);
        assert_eq!(th.client_ports, None);
    }

    #[test]
    fn parse_record_mode() {
        let th =
            TransportHeader::parse("RTP/AVP/TCP;unicast;interleaved=2-3;mode=\"RECORD\"").unwrap();
        assert!(th.record);
        let th = TransportHeader::parse("RTP/AVP;unicast;client_port=6000-6001;mode=record").unwrap();
        assert!(th.record);
    }

    #[test]
    fn parse_bad_ports() {
        assert!(TransportHeader::parse("RTP/AVP;client_port=abc-1").is_none());
        assert!(TransportHeader::parse("RTP/AVP;client_port=5000").is_none());
    }

    #[test]
    fn protocol_set_parsing() {
        let set = ProtocolSet::parse(&["udp", "tcp"]).unwrap();
        assert!(set.contains(TransportKind::Datagram));
        assert!(set.contains(TransportKind::StreamMultiplexed));

        let set = ProtocolSet::parse(&["tcp"]).unwrap();
        assert!(!set.contains(TransportKind::Datagram));

        let empty: [&str; 0] = [];
        assert_eq!(ProtocolSet::parse(&empty), Err(ConfigError::NoProtocols));
        assert_eq!(
            ProtocolSet::parse(&["udp", "quic"]),
            Err(ConfigError::UnsupportedProtocol("quic".into()))
        );
    }

    #[test]
    fn track_port_by_flow() {
        let track = Track::datagram(1, 7000, 7001);
        assert_eq!(track.port(FlowKind::Primary), 7000);
        assert_eq!(track.port(FlowKind::Feedback), 7001);
    }
}
