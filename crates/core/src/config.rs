use std::time::Duration;

use crate::error::ConfigError;
use crate::session::transport::ProtocolSet;

/// Default RTSP control port.
pub const DEFAULT_CONTROL_PORT: u16 = 8554;
/// Default UDP port for RTP.
pub const DEFAULT_RTP_PORT: u16 = 8000;
/// Default UDP port for RTCP.
pub const DEFAULT_RTCP_PORT: u16 = 8001;

/// Raw server configuration, as supplied by the command line.
///
/// Validated into [`Settings`] by [`Registry::configure`](crate::Registry::configure).
/// Port `0` binds an ephemeral port.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Enabled transports: `udp`, `tcp`.
    pub protocols: Vec<String>,
    /// Interface the listeners bind to.
    pub bind_host: String,
    pub control_port: u16,
    pub rtp_port: u16,
    pub rtcp_port: u16,
    /// Key required to publish; empty disables the check.
    pub publish_key: String,
    /// Upper bound on a single blocking write to a control connection.
    pub write_timeout: Duration,
    /// Frames queued per connection before it counts as too slow.
    pub egress_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            protocols: vec!["udp".to_string(), "tcp".to_string()],
            bind_host: "0.0.0.0".to_string(),
            control_port: DEFAULT_CONTROL_PORT,
            rtp_port: DEFAULT_RTP_PORT,
            rtcp_port: DEFAULT_RTCP_PORT,
            publish_key: String::new(),
            write_timeout: Duration::from_secs(5),
            egress_queue: 256,
        }
    }
}

/// Validated configuration held by the registry.
#[derive(Debug, Clone)]
pub struct Settings {
    pub protocols: ProtocolSet,
    pub bind_host: String,
    pub control_port: u16,
    pub rtp_port: u16,
    pub rtcp_port: u16,
    pub publish_key: Option<String>,
    pub write_timeout: Duration,
    pub egress_queue: usize,
}

impl TryFrom<ServerConfig> for Settings {
    type Error = ConfigError;

    fn try_from(config: ServerConfig) -> Result<Self, Self::Error> {
        let protocols = ProtocolSet::parse(&config.protocols)?;

        let publish_key = if config.publish_key.is_empty() {
            None
        } else if config.publish_key.bytes().all(|b| b.is_ascii_alphanumeric()) {
            Some(config.publish_key)
        } else {
            return Err(ConfigError::InvalidSecret);
        };

        if config.write_timeout.is_zero() {
            return Err(ConfigError::ZeroWriteTimeout);
        }

        Ok(Settings {
            protocols,
            bind_host: config.bind_host,
            control_port: config.control_port,
            rtp_port: config.rtp_port,
            rtcp_port: config.rtcp_port,
            publish_key,
            write_timeout: config.write_timeout,
            egress_queue: config.egress_queue.max(1),
        })
    }
}
