//! camrelay: headless camera relay over WebRTC
//!
//! Joins a room on a Socket.IO signaling server, offers one peer connection
//! carrying the local camera as an H.264 track plus a `control` data channel,
//! and logs the remote control commands that arrive on it.
//!
//! # Layout
//! - [`capture`]: camera (nokhwa) and synthetic frame sources
//! - [`webrtc`]: H.264 encoding and the peer session around the WebRTC engine
//! - [`signaling`]: Engine.IO/Socket.IO client with bounded reconnects
//! - [`session`]: the orchestrator driving the peer session from signaling events
//! - [`control`]: the control-command vocabulary
pub mod capture;
pub mod config;
pub mod control;
pub mod errors;
pub mod protocol;
pub mod session;
pub mod signaling;
pub mod timing;
pub mod webrtc;

pub use config::RelayConfig;
pub use control::{ControlCommand, ControlDispatcher};
pub use errors::{CaptureError, ConnectError, DeviceError, SessionError, SignalingError};
pub use session::{Orchestrator, RunExit};
pub use signaling::{SignalEvent, SignalSink, SignalingClient, SignalingOptions};

/// Initialize logging, defaulting to `info` when `RUST_LOG` is unset
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod lib_tests {
    use super::*;

    #[test]
    fn test_version_info() {
        assert_eq!(NAME, "camrelay");
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging();
        init_logging();
    }
}
