use std::{net::SocketAddr, sync::Arc};

use anyhow::anyhow;
use config::{HealthConfig, TlsServerConfig};

use axum::{Json, Router, extract::State, routing::get};
use http::StatusCode;
use rate_limit::{RateLimitManager, StorageStatus};
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub(crate) enum HealthState {
    /// Indicates that the server is healthy and operational.
    Healthy,

    /// Serving, but quotas are weaker than configured.
    Degraded { reason: &'static str },
}

#[derive(Debug, Serialize)]
pub(crate) struct HealthReport {
    #[serde(flatten)]
    state: HealthState,
    rate_limit_storage: StorageStatus,
}

#[derive(Clone)]
pub(crate) struct HealthContext {
    pub manager: Arc<RateLimitManager>,
    pub fail_when_degraded: bool,
}

/// Handles health check requests and returns the current health status of the server.
pub(crate) async fn health(State(context): State<HealthContext>) -> (StatusCode, Json<HealthReport>) {
    let storage = context.manager.storage_status();

    if !storage.degraded {
        let report = HealthReport {
            state: HealthState::Healthy,
            rate_limit_storage: storage,
        };

        return (StatusCode::OK, Json(report));
    }

    let status = if context.fail_when_degraded {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    let report = HealthReport {
        state: HealthState::Degraded {
            reason: "Redis is unavailable; rate limits are enforced per instance from process memory",
        },
        rate_limit_storage: storage,
    };

    (status, Json(report))
}

pub(crate) fn router(health_config: &HealthConfig, context: HealthContext) -> Router {
    Router::new().route(&health_config.path, get(health)).with_state(context)
}

/// Binds the health check endpoint to the specified address and configuration.
pub(super) async fn bind_health_endpoint(
    addr: SocketAddr,
    tls_config: Option<TlsServerConfig>,
    health_config: HealthConfig,
    context: HealthContext,
) -> anyhow::Result<()> {
    let scheme = if tls_config.is_some() { "https" } else { "http" };
    let path = &health_config.path;
    let app = router(&health_config, context).into_make_service();

    log::info!("Health check endpoint exposed at {scheme}://{addr}{path}");

    match tls_config {
        Some(tls) => {
            let rustls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(&tls.certificate, &tls.key)
                .await
                .map_err(|e| anyhow!("Failed to load TLS certificate and key: {}", e))?;

            axum_server::bind_rustls(addr, rustls_config)
                .serve(app)
                .await
                .map_err(|e| anyhow!("Failed to start HTTP server in the health endpoint: {e}"))?;
        }
        None => axum_server::bind(addr)
            .serve(app)
            .await
            .map_err(|e| anyhow!("Failed to start HTTP server in the health endpoint: {e}"))?,
    }

    Ok(())
}
