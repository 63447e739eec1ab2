//! Offer/answer negotiation and trickled candidates.

use crate::capture::MediaFactory;
use crate::config::StreamConfig;
use crate::error::{SignalingError, TransportError};
use crate::peer::ice::IceCandidate;
use crate::peer::transport::{MediaSink, Transport, TransportFactory};
use crate::peer::types::{SdpType, SessionDescription, SessionId};
use crate::registry::SessionRegistry;
use crate::session::{spawn_supervisor, Session};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Answer produced for an accepted offer.
#[derive(Debug, Clone)]
pub struct OfferAnswer {
    pub session_id: SessionId,
    pub answer: SessionDescription,
}

pub struct SignalingService {
    registry: Arc<SessionRegistry>,
    transports: Arc<dyn TransportFactory>,
    media: Arc<dyn MediaFactory>,
    stream: StreamConfig,
    negotiation_timeout: Duration,
}

impl SignalingService {
    pub fn new(
        registry: Arc<SessionRegistry>,
        transports: Arc<dyn TransportFactory>,
        media: Arc<dyn MediaFactory>,
        stream: StreamConfig,
        negotiation_timeout: Duration,
    ) -> Self {
        SignalingService {
            registry,
            transports,
            media,
            stream,
            negotiation_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    /// Creates a session for `remote` and returns its answer.
    ///
    /// Nothing is registered and the transport is closed unless every step
    /// succeeds within the negotiation timeout.
    pub async fn create_offer(
        &self,
        remote: SessionDescription,
    ) -> Result<OfferAnswer, SignalingError> {
        if remote.kind != SdpType::Offer {
            return Err(SignalingError::InvalidDescription(format!(
                "expected an offer, got {}",
                remote.kind
            )));
        }
        if remote.sdp.trim().is_empty() {
            return Err(SignalingError::InvalidDescription("empty sdp".into()));
        }
        if self.registry.is_draining() {
            return Err(SignalingError::ShuttingDown);
        }

        let id = SessionId::generate();
        let deadline = Instant::now() + self.negotiation_timeout;
        tracing::info!(session = %id, "new offer");

        let connection = tokio::time::timeout_at(deadline, self.transports.connect(&id))
            .await
            .map_err(|_| TransportError::Timeout(self.negotiation_timeout))??;
        let transport = connection.transport;

        let negotiated = tokio::time::timeout_at(deadline, negotiate(transport.as_ref(), remote))
            .await
            .unwrap_or(Err(TransportError::Timeout(self.negotiation_timeout)));
        let (sink, answer) = match negotiated {
            Ok(done) => done,
            Err(err) => {
                tracing::warn!(session = %id, "negotiation failed: {err}");
                if let Err(close_err) = transport.close().await {
                    tracing::debug!(session = %id, "closing after failed negotiation: {close_err}");
                }
                return Err(err.into());
            }
        };

        let (session, events) = Session::new(id.clone(), transport, sink);
        if let Err(err) = self.registry.insert(Arc::clone(&session)) {
            if let Err(close_err) = session.close().await {
                tracing::debug!(session = %id, "closing unregistered session: {close_err}");
            }
            return Err(err.into());
        }
        spawn_supervisor(
            session,
            connection.state_changes,
            events,
            Arc::clone(&self.registry),
            Arc::clone(&self.media),
            self.stream.clone(),
        );

        tracing::info!(session = %id, "answer ready");
        Ok(OfferAnswer {
            session_id: id,
            answer,
        })
    }

    /// Applies a trickled remote candidate. A missing `sdp_mline_index`
    /// means 0. A candidate the transport refuses fails the session.
    pub async fn add_candidate(
        &self,
        session_id: &str,
        raw: &str,
        sdp_mid: Option<String>,
        sdp_mline_index: Option<u16>,
    ) -> Result<(), SignalingError> {
        let session = self.registry.lookup(&SessionId::from(session_id))?;
        let candidate = IceCandidate::decode(raw)?.with_routing(sdp_mid, sdp_mline_index);

        if let Err(err) = session.add_candidate(&candidate).await {
            session.fail(&format!("candidate rejected: {err}")).await;
            self.registry.remove(session.id());
            return Err(err.into());
        }
        Ok(())
    }

    /// Closes every session; returns once all of them are closed.
    pub async fn shutdown(&self) {
        self.registry.close_all().await;
    }
}

async fn negotiate(
    transport: &dyn Transport,
    remote: SessionDescription,
) -> Result<(Arc<dyn MediaSink>, SessionDescription), TransportError> {
    // the track has to exist before the answer so it is offered as sendonly video
    let sink = transport.add_outbound_track().await?;
    transport.set_remote_description(remote).await?;
    let answer = transport.create_answer().await?;
    let answer = transport.set_local_description(answer).await?;
    Ok((sink, answer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockTransportFactory, SyntheticMedia};

    fn service(factory: Arc<MockTransportFactory>) -> SignalingService {
        SignalingService::new(
            Arc::new(SessionRegistry::new()),
            factory,
            Arc::new(SyntheticMedia::default()),
            StreamConfig::default(),
            Duration::from_millis(200),
        )
    }

    #[tokio::test]
    async fn answer_is_registered() {
        let factory = Arc::new(MockTransportFactory::new());
        let svc = service(Arc::clone(&factory));
        let out = svc.create_offer(SessionDescription::offer("v=0\r\n")).await.unwrap();
        assert_eq!(out.answer.kind, SdpType::Answer);
        assert!(svc.registry().lookup(&out.session_id).is_ok());
        assert_eq!(svc.session_count(), 1);
    }

    #[tokio::test]
    async fn answers_are_not_offers() {
        let factory = Arc::new(MockTransportFactory::new());
        let svc = service(Arc::clone(&factory));
        let err = svc
            .create_offer(SessionDescription::answer("v=0\r\n"))
            .await
            .unwrap_err();
        assert!(matches!(err, SignalingError::InvalidDescription(_)));
        assert_eq!(factory.connects(), 0);
    }

    #[tokio::test]
    async fn missing_mline_index_defaults_to_zero() {
        let factory = Arc::new(MockTransportFactory::new());
        let svc = service(Arc::clone(&factory));
        let out = svc.create_offer(SessionDescription::offer("v=0\r\n")).await.unwrap();
        svc.add_candidate(
            out.session_id.as_str(),
            "candidate:1 1 udp 2122260223 192.168.1.5 54321 typ host",
            Some("0".into()),
            None,
        )
        .await
        .unwrap();

        let applied = factory.candidates(&out.session_id);
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].sdp_mline_index, 0);
        assert_eq!(applied[0].sdp_mid.as_deref(), Some("0"));
    }
}
