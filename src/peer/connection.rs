//! webrtc-rs implementation of the transport traits.

use crate::capture::EncodedFrame;
use crate::error::TransportError;
use crate::logger::{dump_candidate, dump_selected_pair};
use crate::peer::ice::IceCandidate;
use crate::peer::state::SessionState;
use crate::peer::transport::{Connection, MediaSink, Transport, TransportFactory};
use crate::peer::types::{IceServerConfig, SdpType, SessionDescription, SessionId};
use crate::utils::add_ice_url_scheme;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_H264};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtcp::packet::Packet;
use webrtc::rtcp::payload_feedbacks::full_intra_request::FullIntraRequest;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// Creates one `RTCPeerConnection` per session.
pub struct WebRtcTransportFactory {
    ice_servers: Vec<IceServerConfig>,
}

impl WebRtcTransportFactory {
    pub fn new(ice_servers: Vec<IceServerConfig>) -> Self {
        WebRtcTransportFactory { ice_servers }
    }
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    async fn connect(&self, session_id: &SessionId) -> Result<Connection, TransportError> {
        let mut media = MediaEngine::default();
        media.register_default_codecs()?;
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media)?;
        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(api.new_peer_connection(rtc_config(&self.ice_servers)).await?);
        let (state_tx, state_rx) = mpsc::unbounded_channel();

        // weak handle: the callback lives inside the connection itself
        let pc_stats = Arc::downgrade(&pc);
        let id = session_id.clone();
        pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
            tracing::debug!(session = %id, "Peer connection state changed to: {st}");
            if st == RTCPeerConnectionState::Failed {
                if let Some(pc) = pc_stats.upgrade() {
                    let id = id.clone();
                    tokio::spawn(async move {
                        dump_selected_pair(&pc, &id, "BEFORE-FAIL").await;
                    });
                }
            }
            if let Some(state) = session_state(st) {
                let _ = state_tx.send(state);
            }
            Box::pin(async {})
        }));

        let id = session_id.clone();
        pc.on_ice_gathering_state_change(Box::new(move |state| {
            tracing::trace!(session = %id, "ICE gathering state changed to: {state}");
            Box::pin(async {})
        }));

        Ok(Connection {
            transport: Box::new(WebRtcTransport {
                pc,
                session_id: session_id.clone(),
            }),
            state_changes: state_rx,
        })
    }
}

/// Builds the peer connection configuration
fn rtc_config(servers: &[IceServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: servers.iter().map(ice_server).collect(),
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

fn ice_server(config: &IceServerConfig) -> RTCIceServer {
    RTCIceServer {
        urls: vec![add_ice_url_scheme(config)],
        username: config.username.clone().unwrap_or_default(),
        credential: config.credential.clone().unwrap_or_default(),
    }
}

/// `Unspecified` carries no information and is dropped.
fn session_state(st: RTCPeerConnectionState) -> Option<SessionState> {
    match st {
        RTCPeerConnectionState::New => Some(SessionState::New),
        RTCPeerConnectionState::Connecting => Some(SessionState::Negotiating),
        RTCPeerConnectionState::Connected => Some(SessionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(SessionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(SessionState::Failed),
        RTCPeerConnectionState::Closed => Some(SessionState::Closed),
        RTCPeerConnectionState::Unspecified => None,
    }
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription, TransportError> {
    let rtc = match desc.kind {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp)?,
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp)?,
        SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp)?,
        SdpType::Rollback => {
            return Err(TransportError::Rejected("rollback is not supported".into()))
        }
    };
    Ok(rtc)
}

fn from_rtc(desc: &RTCSessionDescription) -> Result<SessionDescription, TransportError> {
    let kind = match desc.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        RTCSdpType::Unspecified => {
            return Err(TransportError::Rejected("description has no type".into()))
        }
    };
    Ok(SessionDescription {
        kind,
        sdp: desc.sdp.clone(),
    })
}

pub struct WebRtcTransport {
    pc: Arc<RTCPeerConnection>,
    session_id: SessionId,
}

#[async_trait]
impl Transport for WebRtcTransport {
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        self.pc.set_remote_description(to_rtc(desc)?).await?;
        Ok(())
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        let answer = self.pc.create_answer(None).await?;
        from_rtc(&answer)
    }

    /// The server does not trickle, so this waits for ICE gathering to finish
    /// and returns the description with every local candidate inlined.
    async fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> Result<SessionDescription, TransportError> {
        let desc = to_rtc(desc)?;
        let mut gather = self.pc.gathering_complete_promise().await;
        self.pc.set_local_description(desc).await?;
        let _ = gather.recv().await;

        let local = self
            .pc
            .local_description()
            .await
            .ok_or(TransportError::MissingLocalDescription)?;
        from_rtc(&local)
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), TransportError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.encode(),
            sdp_mid: candidate.sdp_mid.clone(),
            sdp_mline_index: Some(candidate.sdp_mline_index),
            username_fragment: None,
        };
        self.pc.add_ice_candidate(init).await?;
        dump_candidate("REMOTE", &self.session_id, candidate);
        Ok(())
    }

    async fn add_outbound_track(&self) -> Result<Arc<dyn MediaSink>, TransportError> {
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_H264.to_owned(),
                clock_rate: 90_000,
                ..Default::default()
            },
            "video".to_owned(),
            format!("screencast-{}", self.session_id),
        ));
        let sender = self
            .pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        // RTCP has to be drained for the interceptors (NACK, reports) to run;
        // PLI/FIR from the receiver turn into a keyframe request
        let keyframe = Arc::new(AtomicBool::new(false));
        let requested = Arc::clone(&keyframe);
        let id = self.session_id.clone();
        tokio::spawn(async move {
            while let Ok((packets, _)) = sender.read_rtcp().await {
                if requests_keyframe(&packets) {
                    tracing::debug!(session = %id, "receiver asked for a keyframe");
                    requested.store(true, Ordering::Relaxed);
                }
            }
        });

        Ok(Arc::new(WebRtcVideoSink { track, keyframe }))
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.pc.close().await?;
        Ok(())
    }
}

fn requests_keyframe(packets: &[Box<dyn Packet + Send + Sync>]) -> bool {
    packets.iter().any(|p| {
        let any = p.as_any();
        any.downcast_ref::<PictureLossIndication>().is_some()
            || any.downcast_ref::<FullIntraRequest>().is_some()
    })
}

struct WebRtcVideoSink {
    track: Arc<TrackLocalStaticSample>,
    keyframe: Arc<AtomicBool>,
}

#[async_trait]
impl MediaSink for WebRtcVideoSink {
    async fn write_frame(&self, frame: &EncodedFrame) -> Result<(), TransportError> {
        self.track
            .write_sample(&Sample {
                data: frame.data.clone(),
                duration: frame.duration,
                ..Default::default()
            })
            .await?;
        Ok(())
    }

    fn take_keyframe_request(&self) -> bool {
        self.keyframe.swap(false, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_engine_states() {
        assert_eq!(
            session_state(RTCPeerConnectionState::Connecting),
            Some(SessionState::Negotiating)
        );
        assert_eq!(
            session_state(RTCPeerConnectionState::Failed),
            Some(SessionState::Failed)
        );
        assert_eq!(session_state(RTCPeerConnectionState::Unspecified), None);
    }

    #[test]
    fn ice_servers_get_a_scheme() {
        let mut turn = IceServerConfig::from_url("t", "relay.example.org:3478");
        turn.r#type = "turn".into();
        turn.username = Some("u".into());
        turn.credential = Some("p".into());
        let config = rtc_config(&[turn]);
        assert_eq!(
            config.ice_servers[0].urls,
            vec!["turn:relay.example.org:3478".to_string()]
        );
        assert_eq!(config.ice_servers[0].username, "u");
    }

    #[test]
    fn loss_feedback_requests_keyframe() {
        use webrtc::rtcp::receiver_report::ReceiverReport;

        let report: Vec<Box<dyn Packet + Send + Sync>> =
            vec![Box::new(ReceiverReport::default())];
        assert!(!requests_keyframe(&report));

        let pli: Vec<Box<dyn Packet + Send + Sync>> = vec![
            Box::new(ReceiverReport::default()),
            Box::new(PictureLossIndication {
                sender_ssrc: 1,
                media_ssrc: 2,
            }),
        ];
        assert!(requests_keyframe(&pli));

        let fir: Vec<Box<dyn Packet + Send + Sync>> = vec![Box::new(FullIntraRequest {
            sender_ssrc: 1,
            media_ssrc: 2,
            fir: vec![],
        })];
        assert!(requests_keyframe(&fir));
    }

    #[test]
    fn rollback_is_rejected() {
        let desc = SessionDescription {
            kind: SdpType::Rollback,
            sdp: String::new(),
        };
        assert!(matches!(to_rtc(desc), Err(TransportError::Rejected(_))));
    }

    #[tokio::test]
    async fn negotiates_against_a_local_offerer() {
        let factory = WebRtcTransportFactory::new(Vec::new());
        let id = SessionId::generate();
        let answerer = factory.connect(&id).await.unwrap();
        answerer.transport.add_outbound_track().await.unwrap();

        // a second engine instance plays the browser
        let mut media = MediaEngine::default();
        media.register_default_codecs().unwrap();
        let api = APIBuilder::new().with_media_engine(media).build();
        let browser = api.new_peer_connection(RTCConfiguration::default()).await.unwrap();
        browser
            .add_transceiver_from_kind(
                webrtc::rtp_transceiver::rtp_codec::RTPCodecType::Video,
                None,
            )
            .await
            .unwrap();
        let offer = browser.create_offer(None).await.unwrap();
        browser.set_local_description(offer.clone()).await.unwrap();

        answerer
            .transport
            .set_remote_description(SessionDescription::offer(offer.sdp))
            .await
            .unwrap();
        let answer = answerer.transport.create_answer().await.unwrap();
        let local = answerer.transport.set_local_description(answer).await.unwrap();
        assert_eq!(local.kind, SdpType::Answer);
        assert!(local.sdp.contains("m=video"));

        answerer.transport.close().await.unwrap();
        browser.close().await.unwrap();
    }
}
