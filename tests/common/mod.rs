//! Offline fixtures: synthetic camera, no STUN, and a second in-process peer
//! acting as the browser.

#![allow(dead_code)]

use camrelay::capture;
use camrelay::config::{CameraConfig, SessionConfig};
use camrelay::webrtc::{PeerEvent, PeerFactory, SessionDescription};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

pub fn offline_session_config() -> SessionConfig {
    SessionConfig {
        ice_servers: Vec::new(),
        gather_timeout_ms: 2000,
        idle_tick_ms: 50,
        ..SessionConfig::default()
    }
}

pub fn synthetic_camera() -> CameraConfig {
    CameraConfig {
        synthetic: true,
        width: 64,
        height: 48,
        ..CameraConfig::default()
    }
}

pub fn offline_factory() -> (PeerFactory, mpsc::UnboundedReceiver<PeerEvent>) {
    let camera = synthetic_camera();
    let source = capture::shared(capture::open_source(&camera).expect("synthetic source"));
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let factory = PeerFactory::new(&offline_session_config(), &camera, source, events_tx)
        .expect("webrtc engine");
    (factory, events_rx)
}

/// Plays the browser: accepts `offer` and returns its answer. The returned
/// connection must be kept alive for as long as the answer is in use.
pub async fn browser_answer(offer: &SessionDescription) -> (Arc<RTCPeerConnection>, SessionDescription) {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs().unwrap();
    let api = APIBuilder::new().with_media_engine(media_engine).build();

    let pc = Arc::new(
        api.new_peer_connection(RTCConfiguration::default())
            .await
            .unwrap(),
    );
    pc.set_remote_description(RTCSessionDescription::offer(offer.sdp.clone()).unwrap())
        .await
        .unwrap();

    let answer = pc.create_answer(None).await.unwrap();
    let mut gathered = pc.gathering_complete_promise().await;
    pc.set_local_description(answer).await.unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(2), gathered.recv()).await;

    let local = pc.local_description().await.unwrap();
    (pc, SessionDescription::answer(local.sdp))
}
