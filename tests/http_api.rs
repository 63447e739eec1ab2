use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use screencast_lib::commands;
use screencast_lib::config::StreamConfig;
use screencast_lib::registry::SessionRegistry;
use screencast_lib::signaling::SignalingService;
use screencast_lib::testing::{MockTransportFactory, SyntheticMedia};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const OFFER: &str = "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n";

fn app(factory: MockTransportFactory) -> (Router, Arc<SignalingService>) {
    let service = Arc::new(SignalingService::new(
        Arc::new(SessionRegistry::new()),
        Arc::new(factory),
        Arc::new(SyntheticMedia::default()),
        StreamConfig::default(),
        Duration::from_millis(150),
    ));
    (commands::router(Arc::clone(&service), None), service)
}

fn post(uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body.into())
        .unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, body.to_vec())
}

async fn send_json(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let (status, body) = send(app, req).await;
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn offer_returns_answer_and_connection_id() {
    let (app, service) = app(MockTransportFactory::new());
    let (status, body) = send_json(
        &app,
        post("/offer", json!({ "sdp": OFFER, "type": "offer" }).to_string()),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["type"], "answer");
    assert!(body["sdp"].as_str().unwrap().starts_with("v=0"));
    let id = body["connectionId"].as_str().unwrap();
    assert_eq!(id.len(), 32);
    assert_eq!(service.session_count(), 1);
}

#[tokio::test]
async fn candidate_round_trip() {
    let (app, _service) = app(MockTransportFactory::new());
    let (_, offer) = send_json(
        &app,
        post("/offer", json!({ "sdp": OFFER, "type": "offer" }).to_string()),
    )
    .await;

    let (status, body) = send(
        &app,
        post(
            "/candidate",
            json!({
                "connectionId": offer["connectionId"],
                "candidate": "candidate:1 1 udp 2122260223 192.168.1.5 54321 typ host",
                "sdpMid": "0",
                "sdpMLineIndex": null
            })
            .to_string(),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"OK");
}

#[tokio::test]
async fn unknown_connection_is_a_client_error() {
    let (app, _service) = app(MockTransportFactory::new());
    let (status, body) = send_json(
        &app,
        post(
            "/candidate",
            json!({
                "connectionId": "nope",
                "candidate": "candidate:1 1 udp 1 10.0.0.1 9 typ host"
            })
            .to_string(),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("nope"));
}

#[tokio::test]
async fn malformed_json_is_rejected() {
    let (app, service) = app(MockTransportFactory::new());
    let (status, body) = send_json(&app, post("/offer", "{\"sdp\": ")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, _) = send_json(
        &app,
        post("/offer", json!({ "sdp": OFFER, "type": "sideways" }).to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(service.session_count(), 0);
}

#[tokio::test]
async fn negotiation_failure_is_a_server_error() {
    let (app, service) = app(MockTransportFactory::new().rejecting_offers());
    let (status, body) = send_json(
        &app,
        post("/offer", json!({ "sdp": OFFER, "type": "offer" }).to_string()),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].is_string());
    assert_eq!(service.session_count(), 0);
}

#[tokio::test]
async fn health_reports_session_count() {
    let (app, _service) = app(MockTransportFactory::new());
    send(
        &app,
        post("/offer", json!({ "sdp": OFFER, "type": "offer" }).to_string()),
    )
    .await;

    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, body) = send_json(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok", "sessions": 1 }));
}
