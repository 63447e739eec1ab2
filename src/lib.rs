pub mod capture;
pub mod commands;
pub mod config;
pub mod error;
pub mod logger;
pub mod peer;
pub mod registry;
pub mod session;
pub mod signaling;
pub mod testing;
mod utils;

use crate::capture::SystemMedia;
use crate::config::Config;
use crate::peer::WebRtcTransportFactory;
use crate::registry::SessionRegistry;
use crate::signaling::SignalingService;
use anyhow::Context;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use std::sync::Arc;

/// Builds the signaling service for `config` on the real engine and display.
pub fn service(config: &Config) -> SignalingService {
    SignalingService::new(
        Arc::new(SessionRegistry::new()),
        Arc::new(WebRtcTransportFactory::new(config.ice_servers.clone())),
        Arc::new(SystemMedia::new(config.stream.display.clone())),
        config.stream.clone(),
        config.negotiation_timeout,
    )
}

/// Serves until Ctrl-C, then closes every session before returning.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let service = Arc::new(service(&config));
    let app = commands::router(Arc::clone(&service), config.static_dir.as_deref());

    let handle = Handle::new();
    let grace = config.shutdown_grace;
    tokio::spawn({
        let handle = handle.clone();
        async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!("cannot listen for Ctrl-C: {err}");
                return;
            }
            tracing::info!("shutting down");
            handle.graceful_shutdown(Some(grace));
        }
    });

    let served = match &config.tls {
        Some(tls) => {
            // webrtc pulls in ring as well, so the provider has to be chosen explicitly
            let _ = rustls::crypto::ring::default_provider().install_default();
            let rustls = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
                .await
                .with_context(|| {
                    format!(
                        "loading TLS material from {} and {}",
                        tls.cert_path.display(),
                        tls.key_path.display()
                    )
                })?;
            tracing::info!("listening on https://{}", config.bind);
            axum_server::bind_rustls(config.bind, rustls)
                .handle(handle)
                .serve(app.into_make_service())
                .await
        }
        None => {
            tracing::warn!("no --cert/--key given, serving plaintext HTTP");
            tracing::info!("listening on http://{}", config.bind);
            axum_server::bind(config.bind)
                .handle(handle)
                .serve(app.into_make_service())
                .await
        }
    };

    service.shutdown().await;
    served.with_context(|| format!("serving on {}", config.bind))
}
