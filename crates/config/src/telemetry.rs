//! Telemetry configuration.

use std::{collections::BTreeMap, time::Duration};

use duration_str::deserialize_duration;
use serde::Deserialize;
use url::Url;

/// Telemetry configuration for observability.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetryConfig {
    /// Service name for telemetry identification.
    service_name: Option<String>,
    /// Custom resource attributes to attach to all telemetry.
    resource_attributes: BTreeMap<String, String>,
    /// Global exporters configuration.
    exporters: ExportersConfig,
    /// Metrics-specific configuration.
    metrics: MetricsConfig,
}

impl TelemetryConfig {
    /// Get the service name.
    pub fn service_name(&self) -> Option<&str> {
        self.service_name.as_deref()
    }

    /// Get the resource attributes.
    pub fn resource_attributes(&self) -> &BTreeMap<String, String> {
        &self.resource_attributes
    }

    /// Get the exporters configuration for metrics.
    /// Returns specific metrics exporters if configured, otherwise falls back to global.
    pub fn metrics_exporters(&self) -> &ExportersConfig {
        self.metrics.exporters.as_ref().unwrap_or(&self.exporters)
    }

    /// The OTLP exporter for metrics, if one is enabled.
    pub fn metrics_otlp_config(&self) -> Option<&OtlpExporterConfig> {
        let otlp = &self.metrics_exporters().otlp;
        otlp.enabled.then_some(otlp)
    }
}

/// Metrics-specific configuration.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct MetricsConfig {
    /// Override global exporters for metrics.
    exporters: Option<ExportersConfig>,
}

/// Exporters configuration for telemetry.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct ExportersConfig {
    /// OTLP exporter configuration.
    pub otlp: OtlpExporterConfig,
}

/// OTLP exporter configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OtlpExporterConfig {
    /// Whether this exporter is enabled.
    #[serde(default)]
    pub enabled: bool,
    /// OTLP endpoint URL.
    #[serde(default = "default_endpoint")]
    pub endpoint: Url,
    /// Protocol to use (grpc or http).
    #[serde(default)]
    pub protocol: OtlpProtocol,
    /// Request timeout.
    #[serde(deserialize_with = "deserialize_duration", default = "default_timeout")]
    pub timeout: Duration,
    /// Batch export configuration.
    #[serde(default)]
    pub batch_export: BatchExportConfig,
}

fn default_endpoint() -> Url {
    Url::parse("http://localhost:4317").expect("default URL should be valid")
}

fn default_timeout() -> Duration {
    Duration::from_secs(60)
}

impl Default for OtlpExporterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_endpoint(),
            protocol: OtlpProtocol::default(),
            timeout: default_timeout(),
            batch_export: BatchExportConfig::default(),
        }
    }
}

/// OTLP protocol selection.
#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum OtlpProtocol {
    /// gRPC protocol (default).
    #[default]
    Grpc,
    /// HTTP/protobuf protocol.
    Http,
}

/// Batch export configuration for OTLP.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatchExportConfig {
    /// Delay between batch exports.
    #[serde(deserialize_with = "deserialize_duration")]
    pub scheduled_delay: Duration,
}

impl Default for BatchExportConfig {
    fn default() -> Self {
        Self {
            scheduled_delay: Duration::from_secs(5),
        }
    }
}
