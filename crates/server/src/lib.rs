//! docgate server library.
//!
//! Provides a reusable server function to serve the gate either for the binary, or for the integration tests.

#![deny(missing_docs)]

mod client_identification;
mod health;
mod introspection;
mod metrics;
mod proxy;
mod rate_limit;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use ::rate_limit::RateLimitManager;
use anyhow::anyhow;
use axum::{
    Router,
    routing::{get, post},
};
use axum_server::{Handle, tls_rustls::RustlsConfig};
use client_identification::ClientIdentificationLayer;
use config::Config;
use health::HealthContext;
use metrics::MetricsLayer;
use proxy::Upstream;
use rate_limit::RateLimitLayer;
use tokio::net::TcpListener;

/// Time given to in-flight requests after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Configuration for serving the gate.
pub struct ServeConfig {
    /// The socket address (IP and port) the server will bind to
    pub listen_address: SocketAddr,
    /// The deserialized docgate TOML configuration.
    pub config: Config,
}

/// Starts and runs the gate with the provided configuration.
pub async fn serve(ServeConfig { listen_address, config }: ServeConfig) -> anyhow::Result<()> {
    let _telemetry = telemetry::init(&config.telemetry)?;

    let manager = Arc::new(RateLimitManager::new(&config.server.rate_limits).await);
    let mut app = router(&config, manager.clone())?;

    if config.server.health.enabled {
        let context = HealthContext {
            manager,
            fail_when_degraded: config.server.health.fail_when_degraded,
        };

        match config.server.health.listen {
            Some(listen) => {
                let tls = config.server.tls.clone();
                let health_config = config.server.health.clone();

                tokio::spawn(async move {
                    if let Err(e) = health::bind_health_endpoint(listen, tls, health_config, context).await {
                        log::error!("{e}");
                    }
                });
            }
            None => app = app.merge(health::router(&config.server.health, context)),
        }
    }

    let app = app.layer(MetricsLayer);

    let listener = TcpListener::bind(listen_address)
        .await
        .map_err(|e| anyhow!("Failed to bind to {listen_address}: {e}"))?;

    match &config.server.tls {
        Some(tls_config) => {
            let rustls_config = RustlsConfig::from_pem_file(&tls_config.certificate, &tls_config.key)
                .await
                .map_err(|e| anyhow!("Failed to load TLS certificate and key: {e}"))?;

            log::info!("docgate listening on https://{listen_address}");

            let handle = Handle::new();
            let shutdown_handle = handle.clone();

            tokio::spawn(async move {
                shutdown_signal().await;
                shutdown_handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
            });

            axum_server::from_tcp_rustls(listener.into_std()?, rustls_config)
                .handle(handle)
                .serve(app.into_make_service())
                .await
                .map_err(|e| anyhow!("Failed to start HTTPS server: {e}"))?;
        }
        None => {
            log::info!("docgate listening on http://{listen_address}");

            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .map_err(|e| anyhow!("Failed to start HTTP server: {}", e))?;
        }
    }

    Ok(())
}

/// The gated routes, the introspection endpoint and their middleware.
fn router(config: &Config, manager: Arc<RateLimitManager>) -> anyhow::Result<Router> {
    let server = &config.server;
    let identification = ClientIdentificationLayer::new(server.client_identification.clone());

    let mut app = Router::new()
        .route(
            &server.rate_limits.introspection_path,
            get(introspection::rate_limit_snapshot),
        )
        .with_state(manager.clone())
        .layer(identification.clone());

    let Some(upstream_url) = &server.upstream_url else {
        log::warn!(
            "No server.upstream_url configured: tool calls and resource reads are not exposed. \
             Only the introspection and health endpoints are served."
        );

        return Ok(app);
    };

    let upstream = Upstream::new(upstream_url.clone(), &server.client_identification)?;

    let mut gated = Router::new()
        .route("/tools/{name}", post(proxy::invoke_tool))
        .route("/resources/{*path}", get(proxy::read_resource))
        .with_state(upstream);

    if manager.is_enabled() {
        // After routing, so quotas see the same decoded tool name the proxy forwards.
        gated = gated.route_layer(RateLimitLayer::new(manager));
    }

    // Identify the caller before checking quotas.
    gated = gated.layer(identification);
    app = app.merge(gated);

    log::info!("Tool calls and resource reads are forwarded to {upstream_url}");

    Ok(app)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for the shutdown signal: {e}");
        std::future::pending::<()>().await;
    }

    log::info!("Shutdown signal received, draining connections");
}
