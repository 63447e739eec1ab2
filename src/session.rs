//! One streaming relationship with a remote peer.
//!
//! A [`Session`] owns its transport and, once connected, a media pump task
//! that owns the session's [`FrameSource`] and encoder. A supervisor task per
//! session consumes engine state changes and pump failures, drives the state
//! machine and removes the session from the registry once it is closed.

use crate::capture::{FrameSource, MediaFactory};
use crate::config::StreamConfig;
use crate::error::{CaptureError, EncodeError, PipelineError, TransportError};
use crate::peer::ice::{CandidateTally, IceCandidate};
use crate::peer::state::{SessionState, Transition};
use crate::peer::transport::{MediaSink, StateChanges, Transport};
use crate::peer::types::SessionId;
use crate::registry::SessionRegistry;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Inputs of the supervisor besides engine state changes.
#[derive(Debug)]
pub enum SessionEvent {
    MediaFailed(PipelineError),
}

enum Pump {
    Idle,
    Running(JoinHandle<()>),
    Stopped,
}

pub struct Session {
    id: SessionId,
    created_at: DateTime<Utc>,
    state: watch::Sender<SessionState>,
    transport: Box<dyn Transport>,
    sink: Arc<dyn MediaSink>,
    pump: Mutex<Pump>,
    keyframe: Arc<AtomicBool>,
    tally: Mutex<CandidateTally>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl Session {
    /// Wraps a negotiated transport. The returned receiver feeds
    /// [`spawn_supervisor`].
    pub fn new(
        id: SessionId,
        transport: Box<dyn Transport>,
        sink: Arc<dyn MediaSink>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(SessionState::New);
        let session = Session {
            id,
            created_at: Utc::now(),
            state,
            transport,
            sink,
            pump: Mutex::new(Pump::Idle),
            keyframe: Arc::new(AtomicBool::new(false)),
            tally: Mutex::new(CandidateTally::default()),
            events,
        };
        (Arc::new(session), events_rx)
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.created_at
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub fn candidate_tally(&self) -> CandidateTally {
        *self.tally.lock()
    }

    /// Feeds `requested` through the state machine. Rejected transitions
    /// leave the state untouched.
    pub fn apply_state(&self, requested: SessionState) -> Transition {
        let mut outcome = Transition::Reject;
        self.state.send_if_modified(|current| {
            outcome = current.next(requested);
            match outcome {
                Transition::Enter(next) => {
                    *current = next;
                    true
                }
                Transition::Stay | Transition::Reject => false,
            }
        });
        match outcome {
            Transition::Enter(next) => tracing::info!(session = %self.id, "state -> {next}"),
            Transition::Reject => tracing::debug!(
                session = %self.id,
                "ignoring transition {} -> {requested}",
                self.state()
            ),
            Transition::Stay => {}
        }
        outcome
    }

    pub async fn add_candidate(&self, candidate: &IceCandidate) -> Result<(), TransportError> {
        self.transport.add_ice_candidate(candidate).await?;
        self.tally.lock().record(candidate.candidate_type);
        Ok(())
    }

    /// Releases the pump and the transport. A no-op once closed.
    pub async fn close(&self) -> Result<(), TransportError> {
        if self.apply_state(SessionState::Closed) != Transition::Enter(SessionState::Closed) {
            return Ok(());
        }
        if let Pump::Running(handle) = std::mem::replace(&mut *self.pump.lock(), Pump::Stopped) {
            handle.abort();
        }
        tracing::info!(
            session = %self.id,
            age_secs = self.age().num_seconds(),
            "closing session"
        );
        self.transport.close().await
    }

    /// Makes the pump's next encoded frame a keyframe.
    pub fn request_keyframe(&self) {
        self.keyframe.store(true, Ordering::Relaxed);
    }

    /// Enters `failed` and escalates to `closed`.
    pub async fn fail(&self, reason: &str) {
        if self.apply_state(SessionState::Failed) == Transition::Reject {
            return;
        }
        let tally = self.candidate_tally();
        tracing::warn!(
            session = %self.id,
            host = tally.host,
            srflx = tally.srflx,
            prflx = tally.prflx,
            relay = tally.relay,
            "session failed: {reason}"
        );
        if tally.host_only() {
            tracing::warn!(
                session = %self.id,
                "peer only offered host candidates; a STUN or TURN server may be needed"
            );
        }
        if let Err(err) = self.close().await {
            tracing::warn!(session = %self.id, "closing failed transport: {err}");
        }
    }

    /// Starts capture and encoding once. Never restarts a stopped pump; a
    /// running one is asked for a keyframe so a reconnected receiver can
    /// decode again.
    fn start_pump(&self, media: Arc<dyn MediaFactory>, stream: StreamConfig) {
        let mut pump = self.pump.lock();
        match *pump {
            Pump::Idle => {}
            Pump::Running(_) => {
                self.request_keyframe();
                return;
            }
            Pump::Stopped => return,
        }
        let sink = Arc::clone(&self.sink);
        let keyframe = Arc::clone(&self.keyframe);
        let events = self.events.clone();
        let id = self.id.clone();
        *pump = Pump::Running(tokio::spawn(async move {
            tracing::info!(
                session = %id,
                "streaming {} at {} fps",
                stream.region,
                stream.frame_rate_hz
            );
            if let Err(err) = run_pump(sink, keyframe, media, stream).await {
                let _ = events.send(SessionEvent::MediaFailed(err));
            }
        }));
    }
}

/// Capture → encode → track, until something fails.
async fn run_pump(
    sink: Arc<dyn MediaSink>,
    keyframe: Arc<AtomicBool>,
    media: Arc<dyn MediaFactory>,
    stream: StreamConfig,
) -> Result<(), PipelineError> {
    let region = stream.region;
    let (grabber, mut encoder) = tokio::task::spawn_blocking(move || {
        let grabber = media.grabber()?;
        let encoder = media.encoder(&region)?;
        Ok::<_, PipelineError>((grabber, encoder))
    })
    .await
    .map_err(|e| CaptureError::Worker(e.to_string()))??;

    let mut source = FrameSource::new(grabber, region, stream.frame_rate_hz);
    loop {
        let frame = source.next_frame().await?;
        let session_request = keyframe.swap(false, Ordering::Relaxed);
        if sink.take_keyframe_request() || session_request {
            tracing::debug!(pts = frame.pts, "forcing keyframe");
            encoder.force_keyframe();
        }
        let (returned, encoded) = tokio::task::spawn_blocking(move || {
            let encoded = encoder.encode(&frame);
            (encoder, encoded)
        })
        .await
        .map_err(|e| EncodeError::Encode(e.to_string()))?;
        encoder = returned;

        sink.write_frame(&encoded?).await?;
    }
}

/// Drives `session` until it is closed, then deregisters it.
pub fn spawn_supervisor(
    session: Arc<Session>,
    mut state_changes: StateChanges,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    registry: Arc<SessionRegistry>,
    media: Arc<dyn MediaFactory>,
    stream: StreamConfig,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut state = session.subscribe();
        let mut engine_open = true;
        loop {
            tokio::select! {
                change = state_changes.recv(), if engine_open => match change {
                    Some(SessionState::Failed) => session.fail("transport failed").await,
                    Some(SessionState::Closed) => {
                        if let Err(err) = session.close().await {
                            tracing::warn!(session = %session.id(), "close: {err}");
                        }
                    }
                    Some(next) => {
                        let entered = session.apply_state(next);
                        if entered == Transition::Enter(SessionState::Connected) {
                            session.start_pump(Arc::clone(&media), stream.clone());
                        }
                    }
                    None => engine_open = false,
                },
                Some(event) = events.recv() => match event {
                    SessionEvent::MediaFailed(err) => session.fail(&err.to_string()).await,
                },
                _ = async {
                    // The borrow returned by wait_for is not Send.
                    let _ = state.wait_for(|s| s.is_terminal()).await;
                } => break,
            }
        }
        registry.remove(session.id());
        tracing::debug!(session = %session.id(), "supervisor finished");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::transport::TransportFactory;
    use crate::testing::{MockTransportFactory, SyntheticMedia};
    use std::time::Duration;

    type Parts = (
        Arc<Session>,
        StateChanges,
        mpsc::UnboundedReceiver<SessionEvent>,
    );

    async fn session(factory: &MockTransportFactory) -> Parts {
        let id = SessionId::generate();
        let conn = factory.connect(&id).await.unwrap();
        let sink = conn.transport.add_outbound_track().await.unwrap();
        let (session, events) = Session::new(id, conn.transport, sink);
        (session, conn.state_changes, events)
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let factory = MockTransportFactory::new();
        let (session, _changes, _events) = session(&factory).await;
        session.close().await.unwrap();
        session.close().await.unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(factory.closes(session.id()), 1);
    }

    #[tokio::test]
    async fn closed_rejects_everything() {
        let factory = MockTransportFactory::new();
        let (session, _changes, _events) = session(&factory).await;
        session.close().await.unwrap();
        assert_eq!(session.apply_state(SessionState::Connected), Transition::Reject);
        assert_eq!(session.apply_state(SessionState::Failed), Transition::Reject);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn failure_escalates_and_deregisters() {
        let factory = MockTransportFactory::new();
        let registry = Arc::new(SessionRegistry::new());
        let (session, changes, events) = session(&factory).await;
        registry.insert(Arc::clone(&session)).unwrap();
        let supervisor = spawn_supervisor(
            Arc::clone(&session),
            changes,
            events,
            Arc::clone(&registry),
            Arc::new(SyntheticMedia::default()),
            StreamConfig::default(),
        );

        factory.inject(session.id(), SessionState::Negotiating);
        factory.inject(session.id(), SessionState::Failed);
        tokio::time::timeout(Duration::from_secs(2), supervisor).await.unwrap().unwrap();

        assert_eq!(session.state(), SessionState::Closed);
        assert!(registry.lookup(session.id()).is_err());
        assert_eq!(factory.closes(session.id()), 1);
    }

    #[tokio::test]
    async fn connected_session_streams_frames() {
        let factory = MockTransportFactory::new();
        let registry = Arc::new(SessionRegistry::new());
        let (session, changes, events) = session(&factory).await;
        registry.insert(Arc::clone(&session)).unwrap();
        let stream = StreamConfig {
            region: crate::capture::MonitorRegion::new(0, 0, 16, 8),
            frame_rate_hz: 60,
            display: None,
        };
        spawn_supervisor(
            Arc::clone(&session),
            changes,
            events,
            Arc::clone(&registry),
            Arc::new(SyntheticMedia::default()),
            stream,
        );

        factory.inject(session.id(), SessionState::Negotiating);
        factory.inject(session.id(), SessionState::Connected);
        tokio::time::timeout(Duration::from_secs(2), async {
            while factory.frames_written(session.id()) < 3 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        session.close().await.unwrap();
        let written = factory.frames_written(session.id());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(factory.frames_written(session.id()), written);
    }

    async fn connected(factory: &MockTransportFactory) -> Arc<Session> {
        let registry = Arc::new(SessionRegistry::new());
        let (session, changes, events) = session(factory).await;
        registry.insert(Arc::clone(&session)).unwrap();
        let stream = StreamConfig {
            region: crate::capture::MonitorRegion::new(0, 0, 16, 8),
            frame_rate_hz: 60,
            display: None,
        };
        spawn_supervisor(
            Arc::clone(&session),
            changes,
            events,
            registry,
            Arc::new(SyntheticMedia::default()),
            stream,
        );
        factory.inject(session.id(), SessionState::Negotiating);
        factory.inject(session.id(), SessionState::Connected);
        session
    }

    async fn wait_until(what: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !what() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn receiver_request_forces_keyframe() {
        let factory = MockTransportFactory::new();
        let session = connected(&factory).await;
        let id = session.id().clone();

        wait_until(|| factory.frames_written(&id) >= 3).await;
        assert_eq!(factory.keyframes_written(&id), 1);

        factory.request_keyframe(&id);
        wait_until(|| factory.keyframes_written(&id) == 2).await;
        let frames = factory.frames_written(&id);
        wait_until(|| factory.frames_written(&id) >= frames + 3).await;
        assert_eq!(factory.keyframes_written(&id), 2);
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn reconnect_forces_keyframe() {
        let factory = MockTransportFactory::new();
        let session = connected(&factory).await;
        let id = session.id().clone();

        wait_until(|| factory.frames_written(&id) >= 3).await;
        assert_eq!(factory.keyframes_written(&id), 1);

        factory.inject(&id, SessionState::Disconnected);
        factory.inject(&id, SessionState::Connected);
        wait_until(|| factory.keyframes_written(&id) == 2).await;
        assert_eq!(session.state(), SessionState::Connected);
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn age_counts_from_creation() {
        let factory = MockTransportFactory::new();
        let (session, _changes, _events) = session(&factory).await;
        assert!(session.created_at() <= Utc::now());
        assert!(session.age() >= chrono::Duration::zero());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(session.age() >= chrono::Duration::milliseconds(20));
    }

    #[tokio::test]
    async fn capture_failure_closes_only_that_session() {
        let factory = MockTransportFactory::new();
        let registry = Arc::new(SessionRegistry::new());
        let (broken, changes, events) = session(&factory).await;
        let (healthy, _changes, _events) = session(&factory).await;
        registry.insert(Arc::clone(&broken)).unwrap();
        registry.insert(Arc::clone(&healthy)).unwrap();
        let supervisor = spawn_supervisor(
            Arc::clone(&broken),
            changes,
            events,
            Arc::clone(&registry),
            Arc::new(SyntheticMedia::failing_capture()),
            StreamConfig::default(),
        );

        factory.inject(broken.id(), SessionState::Negotiating);
        factory.inject(broken.id(), SessionState::Connected);
        tokio::time::timeout(Duration::from_secs(2), supervisor).await.unwrap().unwrap();

        assert_eq!(broken.state(), SessionState::Closed);
        assert_eq!(healthy.state(), SessionState::New);
        assert_eq!(registry.len(), 1);
    }
}
