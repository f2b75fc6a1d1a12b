use thiserror::Error;

/// The camera could not be opened. Fatal at start-up.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("camera {index} could not be opened: {message}")]
    Open { index: u32, message: String },
    #[error("camera {index} opened but its stream failed to start: {message}")]
    Stream { index: u32, message: String },
}

/// A single frame could not be produced. The caller skips the frame.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("frame capture failed: {0}")]
    Poll(String),
    #[error("frame decode failed: {0}")]
    Decode(String),
    #[error("frame has {actual} bytes, expected {expected} for {width}x{height}")]
    BadLength {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("H.264 encoding failed: {0}")]
    Encode(String),
    #[error("frame source was released")]
    Released,
    #[error("frame source lock poisoned by previous panic")]
    Poisoned,
}

/// Signaling connect or reconnect failure.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("invalid signaling url: {0}")]
    InvalidUrl(String),
    #[error("signaling connect timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("signaling transport error: {0}")]
    Transport(String),
    #[error("signaling server rejected namespace {namespace}: {reason}")]
    Rejected { namespace: String, reason: String },
    #[error("signaling handshake failed: {0}")]
    Handshake(String),
    #[error("signaling reconnection gave up after {attempts} attempts")]
    Exhausted { attempts: u32 },
}

impl From<tokio_tungstenite::tungstenite::Error> for ConnectError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ConnectError::Transport(err.to_string())
    }
}

/// A frame received from the signaling server could not be decoded.
#[derive(Debug, Error, PartialEq)]
pub enum PacketError {
    #[error("empty packet")]
    Empty,
    #[error("unknown {layer} packet type {kind:?}")]
    UnknownType { layer: &'static str, kind: char },
    #[error("unsupported packet: {0}")]
    Unsupported(&'static str),
    #[error("malformed packet: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("signaling channel is closed")]
    Closed,
    #[error("payload could not be serialized: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors raised while driving the peer session state machine.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid session description: {0}")]
    InvalidDescription(String),
    #[error("cannot apply answer in signaling state {actual}, expected {expected}")]
    UnexpectedSignalingState {
        expected: &'static str,
        actual: String,
    },
    #[error("no active peer session")]
    NoActiveSession,
    #[error("malformed {event} payload: {message}")]
    InvalidPayload { event: String, message: String },
    #[error("signaling: {0}")]
    Signaling(#[from] SignalingError),
    #[error("webrtc engine: {0}")]
    Engine(#[from] webrtc::Error),
}

impl SessionError {
    /// Errors that are logged and dropped without affecting the session.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SessionError::InvalidDescription(_)
                | SessionError::UnexpectedSignalingState { .. }
                | SessionError::NoActiveSession
                | SessionError::InvalidPayload { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(SessionError::NoActiveSession.is_recoverable());
        assert!(SessionError::InvalidDescription("empty".into()).is_recoverable());
        assert!(SessionError::UnexpectedSignalingState {
            expected: "have-local-offer",
            actual: "stable".into(),
        }
        .is_recoverable());
        assert!(!SessionError::Signaling(SignalingError::Closed).is_recoverable());
    }

    #[test]
    fn test_error_messages() {
        let err = ConnectError::Exhausted { attempts: 5 };
        assert_eq!(
            err.to_string(),
            "signaling reconnection gave up after 5 attempts"
        );

        let err = DeviceError::Open {
            index: 0,
            message: "busy".into(),
        };
        assert!(err.to_string().contains("camera 0"));
    }
}
