//! The media transport engine as seen by the session layer.
//!
//! Sessions only talk to the engine through these traits, so negotiation,
//! candidate handling and teardown can be driven without a network.

use crate::capture::EncodedFrame;
use crate::error::TransportError;
use crate::peer::ice::IceCandidate;
use crate::peer::state::SessionState;
use crate::peer::types::{SessionDescription, SessionId};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Connection state changes reported by the engine, in order.
pub type StateChanges = mpsc::UnboundedReceiver<SessionState>;

/// Outbound video track.
#[async_trait]
pub trait MediaSink: Send + Sync {
    async fn write_frame(&self, frame: &EncodedFrame) -> Result<(), TransportError>;

    /// True once per keyframe request from the receiver (PLI/FIR).
    fn take_keyframe_request(&self) -> bool {
        false
    }
}

/// One peer connection. Exclusively owned by its session.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), TransportError>;

    async fn create_answer(&self) -> Result<SessionDescription, TransportError>;

    /// Applies `desc` and returns the description to hand to the peer,
    /// which may differ from `desc` (e.g. once local candidates are gathered).
    async fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> Result<SessionDescription, TransportError>;

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), TransportError>;

    async fn add_outbound_track(&self) -> Result<Arc<dyn MediaSink>, TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}

/// A fresh transport together with its state-change channel.
pub struct Connection {
    pub transport: Box<dyn Transport>,
    pub state_changes: StateChanges,
}

#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn connect(&self, session_id: &SessionId) -> Result<Connection, TransportError>;
}
