use super::AppState;
use crate::error::SignalingError;
use crate::peer::types::{OfferRequest, OfferResponse, SdpType, SessionDescription};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;

/// `POST /offer`
pub async fn create_offer(
    State(service): State<AppState>,
    body: Result<Json<OfferRequest>, JsonRejection>,
) -> Result<Json<OfferResponse>, SignalingError> {
    let Json(request) = body.map_err(|e| SignalingError::BadRequest(e.body_text()))?;
    let kind = request
        .kind
        .parse::<SdpType>()
        .map_err(SignalingError::InvalidDescription)?;

    let out = service
        .create_offer(SessionDescription {
            kind,
            sdp: request.sdp,
        })
        .await?;

    Ok(Json(OfferResponse {
        sdp: out.answer.sdp,
        kind: out.answer.kind,
        connection_id: out.session_id,
    }))
}
