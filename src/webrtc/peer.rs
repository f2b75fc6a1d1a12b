use crate::capture::SharedSource;
use crate::config::{CameraConfig, SessionConfig};
use crate::errors::SessionError;
use crate::webrtc::media::VideoPump;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_H264};
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// SDP (Session Description Protocol) type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

impl From<RTCSdpType> for SdpType {
    fn from(sdp_type: RTCSdpType) -> Self {
        match sdp_type {
            RTCSdpType::Offer => SdpType::Offer,
            RTCSdpType::Answer => SdpType::Answer,
            RTCSdpType::Pranswer => SdpType::Pranswer,
            RTCSdpType::Rollback => SdpType::Rollback,
            RTCSdpType::Unspecified => SdpType::Offer,
        }
    }
}

/// Session description as carried over signaling: `{"type": .., "sdp": ..}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    /// Parse the SDP and require at least one media description
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.sdp.trim().is_empty() {
            return Err(SessionError::InvalidDescription("empty sdp".to_string()));
        }

        let mut reader = Cursor::new(self.sdp.as_bytes());
        let parsed = webrtc::sdp::description::session::SessionDescription::unmarshal(&mut reader)
            .map_err(|e| SessionError::InvalidDescription(format!("unparseable sdp: {}", e)))?;

        if parsed.media_descriptions.is_empty() {
            return Err(SessionError::InvalidDescription(
                "sdp has no media sections".to_string(),
            ));
        }
        Ok(())
    }
}

impl From<RTCSessionDescription> for SessionDescription {
    fn from(desc: RTCSessionDescription) -> Self {
        SessionDescription {
            sdp_type: desc.sdp_type.into(),
            sdp: desc.sdp,
        }
    }
}

/// ICE candidate received over signaling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
}

impl From<IceCandidate> for RTCIceCandidateInit {
    fn from(candidate: IceCandidate) -> Self {
        RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        }
    }
}

/// Signaling state, mirroring the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    Closed,
    Other,
}

impl From<RTCSignalingState> for SignalingState {
    fn from(state: RTCSignalingState) -> Self {
        match state {
            RTCSignalingState::Stable => SignalingState::Stable,
            RTCSignalingState::HaveLocalOffer => SignalingState::HaveLocalOffer,
            RTCSignalingState::HaveRemoteOffer => SignalingState::HaveRemoteOffer,
            RTCSignalingState::Closed => SignalingState::Closed,
            _ => SignalingState::Other,
        }
    }
}

impl fmt::Display for SignalingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignalingState::Stable => "stable",
            SignalingState::HaveLocalOffer => "have-local-offer",
            SignalingState::HaveRemoteOffer => "have-remote-offer",
            SignalingState::Closed => "closed",
            SignalingState::Other => "other",
        };
        f.write_str(s)
    }
}

/// Engine callback, forwarded to the orchestrator's loop
#[derive(Debug, Clone)]
pub struct PeerEvent {
    pub session_id: String,
    pub kind: PeerEventKind,
}

#[derive(Debug, Clone)]
pub enum PeerEventKind {
    IceConnectionState(RTCIceConnectionState),
    ConnectionState(RTCPeerConnectionState),
    ChannelOpen(String),
    ControlMessage(String),
}

/// Builds peer sessions that share one engine API and one frame source
pub struct PeerFactory {
    api: API,
    rtc_config: RTCConfiguration,
    control_label: String,
    gather_timeout: Duration,
    frame_interval: Duration,
    source: SharedSource,
    events: mpsc::UnboundedSender<PeerEvent>,
}

impl PeerFactory {
    pub fn new(
        session: &SessionConfig,
        camera: &CameraConfig,
        source: SharedSource,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Self, SessionError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = if session.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: session.ice_servers.clone(),
                ..Default::default()
            }]
        };

        Ok(Self {
            api,
            rtc_config: RTCConfiguration {
                ice_servers,
                ..Default::default()
            },
            control_label: session.control_label.clone(),
            gather_timeout: session.gather_timeout(),
            frame_interval: camera.frame_interval(),
            source,
            events,
        })
    }

    /// Create a brand-new session: fresh connection, video track and control channel
    pub async fn create(&self) -> Result<PeerSession, SessionError> {
        let id = uuid::Uuid::new_v4().to_string();
        let pc = Arc::new(self.api.new_peer_connection(self.rtc_config.clone()).await?);
        let streaming = Arc::new(AtomicBool::new(false));

        let events = self.events.clone();
        let session_id = id.clone();
        pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
            let _ = events.send(PeerEvent {
                session_id: session_id.clone(),
                kind: PeerEventKind::IceConnectionState(state),
            });
            Box::pin(async {})
        }));

        let events = self.events.clone();
        let session_id = id.clone();
        let streaming_flag = Arc::clone(&streaming);
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            streaming_flag.store(
                state == RTCPeerConnectionState::Connected,
                Ordering::Relaxed,
            );
            let _ = events.send(PeerEvent {
                session_id: session_id.clone(),
                kind: PeerEventKind::ConnectionState(state),
            });
            Box::pin(async {})
        }));

        let video = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_H264.to_owned(),
                ..Default::default()
            },
            "video".to_owned(),
            "camrelay".to_owned(),
        ));
        let rtp_sender = pc
            .add_track(Arc::clone(&video) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        // Drain RTCP so the interceptors keep running
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while rtp_sender.read(&mut rtcp_buf).await.is_ok() {}
        });

        let control = pc.create_data_channel(&self.control_label, None).await?;
        register_channel_handlers(&control, &id, &self.events);

        let pump = VideoPump::spawn(
            id.clone(),
            Arc::clone(&video),
            Arc::clone(&self.source),
            streaming,
            self.frame_interval,
        );

        log::info!("Created peer session {}", id);

        Ok(PeerSession {
            id,
            pc,
            control,
            video,
            gather_timeout: self.gather_timeout,
            _pump: pump,
        })
    }
}

fn register_channel_handlers(
    channel: &Arc<RTCDataChannel>,
    session_id: &str,
    events: &mpsc::UnboundedSender<PeerEvent>,
) {
    let open_events = events.clone();
    let open_session = session_id.to_string();
    let label = channel.label().to_string();
    channel.on_open(Box::new(move || {
        let _ = open_events.send(PeerEvent {
            session_id: open_session,
            kind: PeerEventKind::ChannelOpen(label),
        });
        Box::pin(async {})
    }));

    let message_events = events.clone();
    let message_session = session_id.to_string();
    channel.on_message(Box::new(move |msg: DataChannelMessage| {
        let text = String::from_utf8_lossy(&msg.data).into_owned();
        let _ = message_events.send(PeerEvent {
            session_id: message_session.clone(),
            kind: PeerEventKind::ControlMessage(text),
        });
        Box::pin(async {})
    }));
}

/// One WebRTC peer connection with its outbound camera track and control channel
pub struct PeerSession {
    id: String,
    pc: Arc<RTCPeerConnection>,
    control: Arc<RTCDataChannel>,
    video: Arc<TrackLocalStaticSample>,
    gather_timeout: Duration,
    _pump: VideoPump,
}

impl PeerSession {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn signaling_state(&self) -> SignalingState {
        self.pc.signaling_state().into()
    }

    pub fn connection_state(&self) -> RTCPeerConnectionState {
        self.pc.connection_state()
    }

    /// A closed session cannot be revived; it must be replaced
    pub fn is_closed(&self) -> bool {
        self.signaling_state() == SignalingState::Closed
    }

    pub fn control_channel(&self) -> &Arc<RTCDataChannel> {
        &self.control
    }

    pub fn video_track(&self) -> &Arc<TrackLocalStaticSample> {
        &self.video
    }

    /// Create an offer, set it as local description and return it for transmission
    pub async fn create_offer(&self) -> Result<SessionDescription, SessionError> {
        self.offer(None).await
    }

    /// Restart ICE on this connection and return the resulting offer.
    /// The control channel and video track survive.
    pub async fn restart_ice(&self) -> Result<SessionDescription, SessionError> {
        log::info!("Restarting ICE on session {}", self.id);
        self.offer(Some(RTCOfferOptions {
            ice_restart: true,
            ..Default::default()
        }))
        .await
    }

    async fn offer(&self, options: Option<RTCOfferOptions>) -> Result<SessionDescription, SessionError> {
        let offer = self.pc.create_offer(options).await?;
        let mut gather_complete = self.pc.gathering_complete_promise().await;
        self.pc.set_local_description(offer).await?;

        // The remote side never receives trickled candidates from us, so the
        // offer carries whatever was gathered before the deadline.
        if tokio::time::timeout(self.gather_timeout, gather_complete.recv())
            .await
            .is_err()
        {
            log::warn!(
                "ICE gathering for session {} not complete after {:?}, sending partial offer",
                self.id,
                self.gather_timeout
            );
        }

        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| SessionError::InvalidDescription("no local description".to_string()))?;
        log::debug!("Session {} local offer:\n{}", self.id, local.sdp);
        Ok(local.into())
    }

    /// Apply a remote answer. Only legal in `have-local-offer`; invalid
    /// descriptions are rejected before reaching the engine.
    pub async fn apply_answer(&self, desc: &SessionDescription) -> Result<(), SessionError> {
        if desc.sdp_type != SdpType::Answer {
            return Err(SessionError::InvalidDescription(format!(
                "expected answer, got {:?}",
                desc.sdp_type
            )));
        }
        desc.validate()?;

        let state = self.signaling_state();
        if state != SignalingState::HaveLocalOffer {
            return Err(SessionError::UnexpectedSignalingState {
                expected: "have-local-offer",
                actual: state.to_string(),
            });
        }

        let answer = RTCSessionDescription::answer(desc.sdp.clone())?;
        self.pc.set_remote_description(answer).await?;
        log::info!("Session {} applied remote answer", self.id);
        Ok(())
    }

    pub async fn apply_candidate(&self, candidate: IceCandidate) -> Result<(), SessionError> {
        log::debug!("Session {} adding ICE candidate: {}", self.id, candidate.candidate);
        self.pc.add_ice_candidate(candidate.into()).await?;
        Ok(())
    }

    pub async fn close(&self) -> Result<(), SessionError> {
        log::info!("Closing peer session {}", self.id);
        self.pc.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANSWER_SDP: &str = "v=0\r\no=- 123456789 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\nc=IN IP4 0.0.0.0\r\na=mid:0\r\n";

    #[test]
    fn test_session_description_wire_format() {
        let desc = SessionDescription::answer("v=0");
        let json = serde_json::to_value(&desc).unwrap();
        assert_eq!(json, serde_json::json!({"type": "answer", "sdp": "v=0"}));

        let back: SessionDescription =
            serde_json::from_value(serde_json::json!({"type": "offer", "sdp": "x"})).unwrap();
        assert_eq!(back.sdp_type, SdpType::Offer);
    }

    #[test]
    fn test_validate_rejects_empty_and_mediumless() {
        assert!(matches!(
            SessionDescription::answer("").validate(),
            Err(SessionError::InvalidDescription(_))
        ));

        let no_media = "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n";
        assert!(matches!(
            SessionDescription::answer(no_media).validate(),
            Err(SessionError::InvalidDescription(_))
        ));

        assert!(matches!(
            SessionDescription::answer("m=garbage").validate(),
            Err(SessionError::InvalidDescription(_))
        ));
    }

    #[test]
    fn test_validate_accepts_media_section() {
        let desc = SessionDescription::answer(ANSWER_SDP);
        assert!(desc.validate().is_ok());
    }

    #[test]
    fn test_candidate_wire_format() {
        let candidate: IceCandidate = serde_json::from_value(serde_json::json!({
            "candidate": "candidate:1 1 UDP 2122260223 192.168.1.1 5000 typ host",
            "sdpMid": "0",
            "sdpMLineIndex": 0
        }))
        .unwrap();
        assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
        assert_eq!(candidate.sdp_mline_index, Some(0));

        let init: RTCIceCandidateInit = candidate.into();
        assert_eq!(init.sdp_mline_index, Some(0));
        assert!(init.username_fragment.is_none());
    }

    #[test]
    fn test_signaling_state_display() {
        assert_eq!(SignalingState::HaveLocalOffer.to_string(), "have-local-offer");
        assert_eq!(
            SignalingState::from(RTCSignalingState::Closed),
            SignalingState::Closed
        );
    }
}
