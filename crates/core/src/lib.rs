pub mod config;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod server;
pub mod session;
pub mod transport;

pub use config::ServerConfig;
pub use error::{ConfigError, RelayError, Result, SessionError};
pub use registry::Registry;
pub use relay::{DatagramEgress, Forwarder};
pub use server::Server;
