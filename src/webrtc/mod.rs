/// H.264 encoding and the per-session video pump
pub mod media;
pub mod peer;

pub use media::{H264Encoder, VideoPump};
pub use peer::{
    IceCandidate, PeerEvent, PeerEventKind, PeerFactory, PeerSession, SdpType,
    SessionDescription, SignalingState,
};
