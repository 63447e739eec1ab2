//! Error types for every layer of the streaming service.
//!
//! Input validation errors (`MalformedCandidate`, `UnknownSession`) are
//! reported to the HTTP caller as 4xx; engine failures are 5xx and tear the
//! affected session down.

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// A trickled candidate string did not match the candidate attribute grammar.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CandidateParseError {
    #[error("candidate must start with 'candidate:'")]
    MissingPrefix,
    #[error("empty foundation")]
    EmptyFoundation,
    #[error("missing {0}")]
    MissingField(&'static str),
    #[error("invalid {field}: '{value}'")]
    InvalidField { field: &'static str, value: String },
    #[error("'typ' is not followed by a candidate type")]
    MissingType,
    #[error("extension '{0}' has no value")]
    DanglingExtension(String),
}

/// Display capture failed. Fatal to the owning session only.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("display unavailable: {0}")]
    DisplayUnavailable(String),
    #[error("grab failed: {0}")]
    Grab(String),
    #[error("unsupported pixel format: {0}")]
    UnsupportedFormat(String),
    #[error("captured {actual} bytes, expected {expected}")]
    BufferSize { expected: usize, actual: usize },
    #[error("capture worker stopped: {0}")]
    Worker(String),
    #[error("frame source exhausted")]
    SourceExhausted,
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("failed to create encoder: {0}")]
    Init(String),
    #[error("invalid frame: expected {expected} bytes, got {actual}")]
    InvalidFrame { expected: usize, actual: usize },
    #[error("encoding failed: {0}")]
    Encode(String),
}

/// Failures reported by the media transport engine.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Engine(#[from] webrtc::Error),
    #[error("transport has no local description")]
    MissingLocalDescription,
    #[error("transport engine did not respond within {0:?}")]
    Timeout(Duration),
    #[error("rejected by transport: {0}")]
    Rejected(String),
}

/// Reasons the media pump of a session stopped.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("session id {0} is already in use")]
    DuplicateId(String),
    #[error("session {0} not found")]
    NotFound(String),
    #[error("registry is shutting down")]
    ShuttingDown,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid configuration: {0}")]
pub struct ConfigError(pub String);

/// Errors surfaced by the signaling operations.
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("malformed candidate: {0}")]
    MalformedCandidate(#[from] CandidateParseError),
    #[error("unknown session: {0}")]
    UnknownSession(String),
    #[error("invalid session description: {0}")]
    InvalidDescription(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("negotiation failed: {0}")]
    Negotiation(#[from] TransportError),
    #[error("session id {0} issued twice")]
    DuplicateId(String),
    #[error("server is shutting down")]
    ShuttingDown,
}

impl SignalingError {
    pub fn status(&self) -> StatusCode {
        match self {
            SignalingError::MalformedCandidate(_)
            | SignalingError::UnknownSession(_)
            | SignalingError::InvalidDescription(_)
            | SignalingError::BadRequest(_) => StatusCode::BAD_REQUEST,
            SignalingError::Negotiation(_) | SignalingError::DuplicateId(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            SignalingError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<RegistryError> for SignalingError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::DuplicateId(id) => SignalingError::DuplicateId(id),
            RegistryError::NotFound(id) => SignalingError::UnknownSession(id),
            RegistryError::ShuttingDown => SignalingError::ShuttingDown,
        }
    }
}

impl IntoResponse for SignalingError {
    fn into_response(self) -> Response {
        let status = self.status();
        if let SignalingError::DuplicateId(id) = &self {
            tracing::error!(session = %id, "session id collision, id generator is broken");
        } else if status.is_server_error() {
            tracing::warn!(error = %self, "signaling request failed");
        } else {
            tracing::debug!(error = %self, "rejected signaling request");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_errors_map_to_bad_request() {
        let err = SignalingError::from(CandidateParseError::MissingPrefix);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        let err = SignalingError::from(RegistryError::NotFound("abc".into()));
        assert!(matches!(err, SignalingError::UnknownSession(ref id) if id == "abc"));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn engine_errors_map_to_server_error() {
        let err = SignalingError::from(TransportError::Timeout(Duration::from_secs(1)));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            SignalingError::from(RegistryError::ShuttingDown).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
