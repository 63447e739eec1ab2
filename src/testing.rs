//! Test doubles for running sessions without a display or a network.
//!
//! [`SyntheticGrabber`] produces gradient frames; [`MockTransportFactory`]
//! records every engine call, can be scripted to fail, and lets a test push
//! connection state changes by hand.

use crate::capture::{
    EncodedFrame, Frame, MediaFactory, MonitorRegion, PixelLayout, RawImage, ScreenGrabber,
    VideoEncoder,
};
use crate::error::{CaptureError, EncodeError, TransportError};
use crate::peer::ice::IceCandidate;
use crate::peer::state::SessionState;
use crate::peer::transport::{Connection, MediaSink, Transport, TransportFactory};
use crate::peer::types::{SdpType, SessionDescription, SessionId};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Grabber producing a BGRA gradient that shifts every frame.
#[derive(Debug, Default, Clone)]
pub struct SyntheticGrabber {
    calls: usize,
    failing: Vec<usize>,
    fixed_size: Option<(u32, u32)>,
}

impl SyntheticGrabber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the grabs with these zero-based call indices.
    pub fn failing_on(mut self, calls: &[usize]) -> Self {
        self.failing = calls.to_vec();
        self
    }

    /// Ignores the requested region and always returns `width`x`height`.
    pub fn with_fixed_size(mut self, width: u32, height: u32) -> Self {
        self.fixed_size = Some((width, height));
        self
    }
}

impl ScreenGrabber for SyntheticGrabber {
    fn grab(&mut self, region: &MonitorRegion) -> Result<RawImage, CaptureError> {
        let call = self.calls;
        self.calls += 1;
        if self.failing.contains(&call) {
            return Err(CaptureError::DisplayUnavailable(format!(
                "synthetic failure on grab {call}"
            )));
        }

        let (width, height) = self.fixed_size.unwrap_or((region.width, region.height));
        let base = (call % 256) as u8;
        let mut data = Vec::with_capacity(width as usize * height as usize * 4);
        for y in 0..height {
            for x in 0..width {
                data.push(base.wrapping_add(((x + y) % 256) as u8)); // B
                data.push(base.wrapping_add((y % 256) as u8)); // G
                data.push(base.wrapping_add((x % 256) as u8)); // R
                data.push(0xff);
            }
        }
        Ok(RawImage {
            width,
            height,
            layout: PixelLayout::Bgra8,
            data,
        })
    }
}

/// Hands the RGB payload through unchanged. Only the first frame and forced
/// frames are keyframes.
#[derive(Debug, Default)]
pub struct PassthroughEncoder {
    encoded: u64,
    force_keyframe: bool,
}

impl VideoEncoder for PassthroughEncoder {
    fn encode(&mut self, frame: &Frame) -> Result<EncodedFrame, EncodeError> {
        let is_keyframe = std::mem::take(&mut self.force_keyframe) || self.encoded == 0;
        self.encoded += 1;
        Ok(EncodedFrame {
            data: Bytes::copy_from_slice(&frame.data),
            is_keyframe,
            pts: frame.pts,
            duration: frame.duration(),
        })
    }

    fn force_keyframe(&mut self) {
        self.force_keyframe = true;
    }
}

/// [`MediaFactory`] built from the synthetic stages.
#[derive(Debug, Default, Clone)]
pub struct SyntheticMedia {
    grabber: SyntheticGrabber,
}

impl SyntheticMedia {
    /// Every grab fails, so a connected session fails right away.
    pub fn failing_capture() -> Self {
        SyntheticMedia {
            grabber: SyntheticGrabber::new().failing_on(&[0]),
        }
    }
}

impl MediaFactory for SyntheticMedia {
    fn grabber(&self) -> Result<Box<dyn ScreenGrabber>, CaptureError> {
        Ok(Box::new(self.grabber.clone()))
    }

    fn encoder(&self, _region: &MonitorRegion) -> Result<Box<dyn VideoEncoder>, EncodeError> {
        Ok(Box::new(PassthroughEncoder::default()))
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Script {
    reject_remote: bool,
    reject_candidates: bool,
    stall_answer: bool,
}

#[derive(Default)]
struct Record {
    states: Option<mpsc::UnboundedSender<SessionState>>,
    candidates: Vec<IceCandidate>,
    closes: usize,
    frames: usize,
    keyframes: usize,
    keyframe_request: bool,
    fail_close: bool,
}

type Ledger = Arc<Mutex<HashMap<SessionId, Record>>>;

/// In-memory transport engine.
#[derive(Default)]
pub struct MockTransportFactory {
    script: Script,
    connects: AtomicUsize,
    ledger: Ledger,
}

impl MockTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// `set_remote_description` fails on every transport.
    pub fn rejecting_offers(mut self) -> Self {
        self.script.reject_remote = true;
        self
    }

    /// `add_ice_candidate` fails on every transport.
    pub fn rejecting_candidates(mut self) -> Self {
        self.script.reject_candidates = true;
        self
    }

    /// `create_answer` never completes.
    pub fn stalling_answers(mut self) -> Self {
        self.script.stall_answer = true;
        self
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Ids of every transport created so far.
    pub fn session_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = self.ledger.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn closes(&self, id: &SessionId) -> usize {
        self.ledger.lock().get(id).map_or(0, |r| r.closes)
    }

    pub fn total_closes(&self) -> usize {
        self.ledger.lock().values().map(|r| r.closes).sum()
    }

    pub fn candidates(&self, id: &SessionId) -> Vec<IceCandidate> {
        self.ledger
            .lock()
            .get(id)
            .map(|r| r.candidates.clone())
            .unwrap_or_default()
    }

    pub fn total_candidate_calls(&self) -> usize {
        self.ledger.lock().values().map(|r| r.candidates.len()).sum()
    }

    pub fn frames_written(&self, id: &SessionId) -> usize {
        self.ledger.lock().get(id).map_or(0, |r| r.frames)
    }

    pub fn keyframes_written(&self, id: &SessionId) -> usize {
        self.ledger.lock().get(id).map_or(0, |r| r.keyframes)
    }

    /// Acts like a PLI from the receiver of this session's track.
    pub fn request_keyframe(&self, id: &SessionId) {
        if let Some(record) = self.ledger.lock().get_mut(id) {
            record.keyframe_request = true;
        }
    }

    /// Makes `close` on this session's transport report an error.
    pub fn fail_close(&self, id: &SessionId) {
        if let Some(record) = self.ledger.lock().get_mut(id) {
            record.fail_close = true;
        }
    }

    /// Emits `state` as if the engine had changed connection state.
    pub fn inject(&self, id: &SessionId, state: SessionState) {
        if let Some(tx) = self.ledger.lock().get(id).and_then(|r| r.states.as_ref()) {
            let _ = tx.send(state);
        }
    }
}

#[async_trait]
impl TransportFactory for MockTransportFactory {
    async fn connect(&self, session_id: &SessionId) -> Result<Connection, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.ledger.lock().insert(
            session_id.clone(),
            Record {
                states: Some(tx),
                ..Default::default()
            },
        );
        Ok(Connection {
            transport: Box::new(MockTransport {
                id: session_id.clone(),
                script: self.script,
                ledger: Arc::clone(&self.ledger),
            }),
            state_changes: rx,
        })
    }
}

struct MockTransport {
    id: SessionId,
    script: Script,
    ledger: Ledger,
}

#[async_trait]
impl Transport for MockTransport {
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        if self.script.reject_remote || !desc.sdp.starts_with("v=0") {
            return Err(TransportError::Rejected("unparsable remote description".into()));
        }
        Ok(())
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        if self.script.stall_answer {
            futures::future::pending::<()>().await;
        }
        Ok(SessionDescription::answer(format!(
            "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=mock-{}\r\nt=0 0\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\n",
            self.id
        )))
    }

    async fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> Result<SessionDescription, TransportError> {
        if desc.kind != SdpType::Answer {
            return Err(TransportError::Rejected("expected an answer".into()));
        }
        Ok(desc)
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), TransportError> {
        let mut ledger = self.ledger.lock();
        let record = ledger.entry(self.id.clone()).or_default();
        record.candidates.push(candidate.clone());
        if self.script.reject_candidates {
            return Err(TransportError::Rejected("candidate refused".into()));
        }
        Ok(())
    }

    async fn add_outbound_track(&self) -> Result<Arc<dyn MediaSink>, TransportError> {
        Ok(Arc::new(MockSink {
            id: self.id.clone(),
            ledger: Arc::clone(&self.ledger),
        }))
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut ledger = self.ledger.lock();
        let record = ledger.entry(self.id.clone()).or_default();
        record.closes += 1;
        if let Some(tx) = &record.states {
            let _ = tx.send(SessionState::Closed);
        }
        if record.fail_close {
            return Err(TransportError::Rejected("close refused".into()));
        }
        Ok(())
    }
}

struct MockSink {
    id: SessionId,
    ledger: Ledger,
}

#[async_trait]
impl MediaSink for MockSink {
    async fn write_frame(&self, frame: &EncodedFrame) -> Result<(), TransportError> {
        if let Some(record) = self.ledger.lock().get_mut(&self.id) {
            record.frames += 1;
            if frame.is_keyframe {
                record.keyframes += 1;
            }
        }
        Ok(())
    }

    fn take_keyframe_request(&self) -> bool {
        self.ledger
            .lock()
            .get_mut(&self.id)
            .is_some_and(|r| std::mem::take(&mut r.keyframe_request))
    }
}
