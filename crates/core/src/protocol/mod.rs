//! RTSP control protocol: request parsing, responses, and the per-connection
//! handler that drives the session state machine.
//!
//! Only the part of the grammar the relay needs is implemented:
//!
//! | Method | Effect |
//! |--------|--------|
//! | OPTIONS | Capability discovery |
//! | DESCRIBE | SDP announced by the path's publisher |
//! | ANNOUNCE | Publisher supplies its SDP (and optionally its key) |
//! | SETUP | Negotiate one track; `mode=record` marks a publisher |
//! | RECORD | Publisher starts sending |
//! | PLAY | Player starts receiving |
//! | TEARDOWN | Destroy the session and close the connection |
//! | GET_PARAMETER | Keepalive |

pub mod handler;
pub mod request;
pub mod response;

pub use handler::ControlHandler;
pub use request::{RtspRequest, Target};
pub use response::RtspResponse;
