use super::AppState;
use crate::error::SignalingError;
use crate::peer::types::CandidateRequest;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;

/// `POST /candidate`. Trickle-ICE from the browser.
pub async fn add_candidate(
    State(service): State<AppState>,
    body: Result<Json<CandidateRequest>, JsonRejection>,
) -> Result<&'static str, SignalingError> {
    let Json(request) = body.map_err(|e| SignalingError::BadRequest(e.body_text()))?;
    service
        .add_candidate(
            &request.connection_id,
            &request.candidate,
            request.sdp_mid,
            request.sdp_mline_index,
        )
        .await?;
    Ok("OK")
}
