//! Network transport layer for RTSP signaling and media relay.
//!
//! - **TCP** ([`tcp`]): RTSP control connections, one reader thread and
//!   one writer thread per connection ([`connection`]). Media for
//!   interleaved sessions shares the same byte stream ([`interleaved`]).
//!
//! - **UDP** ([`udp`]): one shared socket per flow (RTP, RTCP), used both
//!   to receive from publishers and to send to players.

pub mod connection;
pub mod interleaved;
pub mod tcp;
pub mod udp;

pub use connection::{ConnectionHandle, Outbound};
pub use udp::{UdpEgress, UdpListener};
