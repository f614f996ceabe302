use std::thread;
use std::time::Duration;

use clap::Parser;
use relay::config::{DEFAULT_CONTROL_PORT, DEFAULT_RTCP_PORT, DEFAULT_RTP_PORT};
use relay::{Registry, Server, ServerConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "rtsp-relay",
    version,
    about = "RTSP relay: fans out published RTP/RTCP streams to players"
)]
struct Args {
    /// Enabled transports, comma separated (udp, tcp)
    #[arg(long, default_value = "udp,tcp")]
    protocols: String,

    /// RTSP control port
    #[arg(long, default_value_t = DEFAULT_CONTROL_PORT)]
    rtsp_port: u16,

    /// Server RTP port (udp transport)
    #[arg(long, default_value_t = DEFAULT_RTP_PORT)]
    rtp_port: u16,

    /// Server RTCP port (udp transport)
    #[arg(long, default_value_t = DEFAULT_RTCP_PORT)]
    rtcp_port: u16,

    /// Alphanumeric key publishers must present; empty disables the check
    #[arg(long, default_value = "")]
    publish_key: String,

    /// Socket write timeout for player connections, in milliseconds
    #[arg(long, default_value_t = 5000)]
    write_timeout_ms: u64,

    /// Frames queued per connection before delivery counts as failed
    #[arg(long, default_value_t = 256)]
    egress_queue: usize,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            protocols: self
                .protocols
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect(),
            control_port: self.rtsp_port,
            rtp_port: self.rtp_port,
            rtcp_port: self.rtcp_port,
            publish_key: self.publish_key,
            write_timeout: Duration::from_millis(self.write_timeout_ms),
            egress_queue: self.egress_queue,
            ..ServerConfig::default()
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let registry = match Registry::configure(args.into_config()) {
        Ok(registry) => registry,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let mut server = Server::new(registry);
    if let Err(e) = server.start() {
        eprintln!("Failed to start server: {}", e);
        std::process::exit(1);
    }

    if let Some((rtp, rtcp)) = server.datagram_addrs() {
        tracing::info!(%rtp, %rtcp, "UDP transport enabled");
    }

    loop {
        thread::park();
    }
}
