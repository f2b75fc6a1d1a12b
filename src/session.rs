//! Session orchestration
//!
//! The [`Orchestrator`] is the only owner of the active [`PeerSession`]. All
//! signaling events and engine callbacks are funnelled into [`Orchestrator::run`]
//! and handled one at a time, so every operation observes the state left by
//! the previous one.

use crate::control::ControlDispatcher;
use crate::errors::{ConnectError, SessionError, SignalingError};
use crate::protocol::{Inbound, JoinRequest, OfferEnvelope, EVENT_JOIN, EVENT_OFFER};
use crate::signaling::{SignalEvent, SignalSink};
use crate::webrtc::{
    IceCandidate, PeerEvent, PeerEventKind, PeerFactory, PeerSession, SessionDescription,
    SignalingState,
};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;

/// Why [`Orchestrator::run`] returned
#[derive(Debug)]
pub enum RunExit {
    Interrupted,
    SignalingFailed(ConnectError),
    SignalingClosed,
}

pub struct Orchestrator<S: SignalSink> {
    room: String,
    signaling: S,
    factory: PeerFactory,
    session: Option<PeerSession>,
    dispatcher: ControlDispatcher,
    idle_tick: Duration,
    sessions_created: u64,
}

impl<S: SignalSink> Orchestrator<S> {
    pub fn new(room: impl Into<String>, signaling: S, factory: PeerFactory, idle_tick: Duration) -> Self {
        Self {
            room: room.into(),
            signaling,
            factory,
            session: None,
            dispatcher: ControlDispatcher::new(),
            idle_tick,
            sessions_created: 0,
        }
    }

    pub fn session(&self) -> Option<&PeerSession> {
        self.session.as_ref()
    }

    pub fn dispatcher(&self) -> &ControlDispatcher {
        &self.dispatcher
    }

    /// Number of peer sessions built so far
    pub fn sessions_created(&self) -> u64 {
        self.sessions_created
    }

    /// Join the room, build the first session and send its offer
    pub async fn start(&mut self) -> Result<(), SessionError> {
        log::info!("Joining room {}", self.room);
        self.signaling.emit(
            EVENT_JOIN,
            serde_json::to_value(JoinRequest {
                room: self.room.clone(),
            })
            .map_err(SignalingError::from)?,
        )?;

        self.replace_session().await?;
        let offer = self.active()?.create_offer().await?;
        self.send_offer(offer)
    }

    /// Apply a remote answer to the active session.
    ///
    /// Invalid descriptions and answers arriving outside `have-local-offer`
    /// are logged and dropped without touching the session.
    pub async fn apply_answer(&mut self, answer: &SessionDescription) -> Result<(), SessionError> {
        let session = self.active()?;
        match session.apply_answer(answer).await {
            Err(e) if e.is_recoverable() => {
                log::warn!("Ignoring answer for session {}: {}", session.id(), e);
                Ok(())
            }
            other => other,
        }
    }

    pub async fn apply_candidate(&mut self, candidate: IceCandidate) -> Result<(), SessionError> {
        self.active()?.apply_candidate(candidate).await
    }

    /// Recover the session and return the new offer.
    ///
    /// An absent or closed session is replaced wholesale with a fresh track
    /// and control channel. A live one keeps both and restarts ICE.
    pub async fn renegotiate(&mut self) -> Result<SessionDescription, SessionError> {
        let reusable = self.session.as_ref().map(|s| !s.is_closed()).unwrap_or(false);
        if reusable {
            self.active()?.restart_ice().await
        } else {
            log::info!("No usable peer session, creating a new one");
            self.replace_session().await?;
            self.active()?.create_offer().await
        }
    }

    pub async fn handle_inbound(&mut self, name: &str, payload: serde_json::Value) -> Result<(), SessionError> {
        match Inbound::from_event(name, payload)? {
            Inbound::Answer(answer) => {
                if !answer.is_usable() {
                    log::warn!("Ignoring answer without a usable sdp");
                    return Ok(());
                }
                self.apply_answer(&answer.into_description()).await
            }
            Inbound::Candidate(candidate) => self.apply_candidate(candidate).await,
            Inbound::Renegotiate => {
                log::info!("Renegotiation requested");
                let offer = self.renegotiate().await?;
                self.send_offer(offer)
            }
            Inbound::Other(name) => {
                log::debug!("Ignoring signaling event '{}'", name);
                Ok(())
            }
        }
    }

    pub async fn handle_peer_event(&mut self, event: PeerEvent) {
        // Control messages are dispatched whichever session they came from
        if let PeerEventKind::ControlMessage(message) = &event.kind {
            self.dispatcher.dispatch(message);
            return;
        }

        let current = self.session.as_ref().map(|s| s.id() == event.session_id).unwrap_or(false);
        if !current {
            log::debug!("Ignoring event from stale session {}: {:?}", event.session_id, event.kind);
            return;
        }

        match event.kind {
            PeerEventKind::IceConnectionState(state) => {
                log::info!("Session {} ICE connection state: {}", event.session_id, state);
            }
            PeerEventKind::ConnectionState(state) => {
                log::info!("Session {} peer connection state: {}", event.session_id, state);
                if state == RTCPeerConnectionState::Failed {
                    if let Some(session) = &self.session {
                        if let Err(e) = session.close().await {
                            log::warn!("Failed to close session {}: {}", event.session_id, e);
                        }
                    }
                }
            }
            PeerEventKind::ChannelOpen(label) => {
                log::info!("Session {} data channel '{}' open", event.session_id, label);
            }
            PeerEventKind::ControlMessage(_) => {}
        }
    }

    /// Process events until interrupted or signaling gives up
    pub async fn run(
        &mut self,
        signals: &mut mpsc::UnboundedReceiver<SignalEvent>,
        peers: &mut mpsc::UnboundedReceiver<PeerEvent>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> RunExit {
        let mut idle = tokio::time::interval(self.idle_tick);
        idle.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let exit = loop {
            if *shutdown.borrow() {
                break RunExit::Interrupted;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break RunExit::Interrupted;
                    }
                }
                signal = signals.recv() => match signal {
                    Some(SignalEvent::Connected) => log::info!("Signaling connected"),
                    Some(SignalEvent::Disconnected(reason)) => {
                        log::warn!("Signaling disconnected: {}", reason);
                    }
                    Some(SignalEvent::Message { name, payload }) => {
                        if let Err(e) = self.handle_inbound(&name, payload).await {
                            if e.is_recoverable() {
                                log::warn!("Dropped '{}' event: {}", name, e);
                            } else {
                                log::error!("Handling '{}' event failed: {}", name, e);
                            }
                        }
                    }
                    Some(SignalEvent::Failed(e)) => break RunExit::SignalingFailed(e),
                    None => break RunExit::SignalingClosed,
                },
                Some(event) = peers.recv() => self.handle_peer_event(event).await,
                _ = idle.tick() => {
                    log::trace!(
                        "Idle tick, session state {}",
                        self.session.as_ref().map(|s| s.signaling_state()).unwrap_or(SignalingState::Closed)
                    );
                }
            }
        };

        self.shutdown().await;
        exit
    }

    /// Close the session, then disconnect signaling. Never fails.
    pub async fn shutdown(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.close().await {
                log::warn!("Failed to close session {}: {}", session.id(), e);
            }
        }
        self.signaling.disconnect();
    }

    fn active(&self) -> Result<&PeerSession, SessionError> {
        self.session.as_ref().ok_or(SessionError::NoActiveSession)
    }

    async fn replace_session(&mut self) -> Result<(), SessionError> {
        if let Some(old) = self.session.take() {
            if !old.is_closed() {
                if let Err(e) = old.close().await {
                    log::warn!("Failed to close session {}: {}", old.id(), e);
                }
            }
        }
        let session = self.factory.create().await?;
        self.sessions_created += 1;
        self.session = Some(session);
        Ok(())
    }

    fn send_offer(&self, offer: SessionDescription) -> Result<(), SessionError> {
        let envelope = OfferEnvelope::new(offer, &self.room);
        let payload = serde_json::to_value(envelope).map_err(SignalingError::from)?;
        self.signaling.emit(EVENT_OFFER, payload)?;
        log::info!("Sent offer to room {}", self.room);
        Ok(())
    }
}
