//! docgate configuration structures to map the docgate.toml configuration.

#![deny(missing_docs)]

mod client_identification;
mod health;
mod loader;
mod rate_limit;
mod role;
mod server;
mod telemetry;

use std::path::Path;

pub use client_identification::ClientIdentificationConfig;
pub use health::HealthConfig;
pub use rate_limit::*;
pub use role::{UnknownRole, UserRole};
pub use server::{ServerConfig, TlsServerConfig};
pub use telemetry::{BatchExportConfig, ExportersConfig, OtlpExporterConfig, OtlpProtocol, TelemetryConfig};

use serde::Deserialize;

/// Main configuration structure for the docgate application.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// HTTP server configuration settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Telemetry configuration settings.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
        loader::load(path)
    }

    /// Validates quota values that serde cannot reject on its own.
    pub fn validate(&self) -> anyhow::Result<()> {
        loader::validate_rate_limits(&self.server.rate_limits)?;
        loader::validate_routes(&self.server)
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use crate::{Config, FailureMode, StorageConfig, UserRole};

    #[test]
    fn empty_config_uses_platform_defaults() {
        let config: Config = toml::from_str("").unwrap();
        let limits = &config.server.rate_limits;

        assert!(limits.enabled);
        assert_eq!(limits.failure_mode, FailureMode::Open);
        assert!(matches!(limits.storage, StorageConfig::Memory));
        assert_eq!(limits.global.as_ref().map(|q| q.limit), Some(1000));
        assert_eq!(limits.users.get(&UserRole::Default).map(|q| q.limit), Some(100));
        assert_eq!(limits.users.get(&UserRole::Admin).map(|q| q.limit), Some(500));
        assert_eq!(limits.users.get(&UserRole::AiAgent).map(|q| q.limit), Some(200));
        assert_eq!(limits.resources.read.as_ref().map(|q| q.limit), Some(300));
        assert_eq!(config.server.health.path, "/health");
        assert_eq!(config.server.client_identification.user_id_header, "X-User-Id");
    }

    #[test]
    fn all_values() {
        let config = indoc! {r#"
            [server]
            listen_address = "0.0.0.0:8000"
            upstream_url = "http://localhost:9000"

            [server.health]
            path = "/healthz"

            [server.client_identification]
            user_id_header = "X-Platform-User"
            role_header = "X-Platform-Role"

            [server.rate_limits]
            enabled = true
            interval = "30s"
            failure_mode = "closed"
            introspection_path = "/quota"

            [server.rate_limits.global]
            limit = 10

            [server.rate_limits.users]
            default = { limit = 3 }
            analyst = { limit = 4, interval = "10s" }

            [server.rate_limits.tools]
            extract_invoice_data = { limit = 2, failure_mode = "open" }

            [server.rate_limits.resources.read]
            limit = 5

            [telemetry]
            service_name = "docgate-test"
        "#};

        let config: Config = toml::from_str(config).unwrap();

        insta::assert_debug_snapshot!(&config.server.rate_limits.users, @r#"
        {
            Analyst: RateLimitQuota {
                limit: 4,
                interval: Some(
                    10s,
                ),
                failure_mode: None,
            },
            Default: RateLimitQuota {
                limit: 3,
                interval: None,
                failure_mode: None,
            },
        }
        "#);

        insta::assert_debug_snapshot!(&config.server.rate_limits.tools, @r#"
        {
            "extract_invoice_data": RateLimitQuota {
                limit: 2,
                interval: None,
                failure_mode: Some(
                    Open,
                ),
            },
        }
        "#);

        let limits = &config.server.rate_limits;
        assert_eq!(limits.interval.as_secs(), 30);
        assert_eq!(limits.failure_mode, FailureMode::Closed);
        assert_eq!(limits.introspection_path, "/quota");
        assert_eq!(config.server.health.path, "/healthz");
        assert_eq!(config.server.client_identification.role_header, "X-Platform-Role");
        assert_eq!(
            config.server.upstream_url.as_ref().map(|u| u.as_str()),
            Some("http://localhost:9000/")
        );
        assert_eq!(config.telemetry.service_name(), Some("docgate-test"));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let config = indoc! {r#"
            [server.rate_limits]
            enabled = true
            per_ip = { limit = 10 }
        "#};

        let error = toml::from_str::<Config>(config).unwrap_err();

        assert!(error.to_string().contains("unknown field `per_ip`"));
    }
}
