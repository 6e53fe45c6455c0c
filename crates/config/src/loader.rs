use std::path::Path;

use anyhow::{Context, bail};

use crate::{Config, RateLimitConfig, RateLimitQuota, ServerConfig, UserRole};

pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let path = path.as_ref();

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read configuration file {}", path.display()))?;

    let config: Config =
        toml::from_str(&content).with_context(|| format!("Failed to parse configuration file {}", path.display()))?;

    validate_rate_limits(&config.server.rate_limits)?;
    validate_routes(&config.server)?;

    for warning in rate_limit_warnings(&config.server.rate_limits) {
        log::warn!("{warning}");
    }

    Ok(config)
}

/// Rejects quotas that could never admit a request or would divide a zero window.
pub(crate) fn validate_rate_limits(config: &RateLimitConfig) -> anyhow::Result<()> {
    if config.interval.is_zero() {
        bail!("server.rate_limits.interval must be greater than zero");
    }

    if !config.introspection_path.starts_with('/') {
        bail!(
            "server.rate_limits.introspection_path must start with '/', got '{}'",
            config.introspection_path
        );
    }

    if let Some(global) = &config.global {
        validate_quota("server.rate_limits.global", global)?;
    }

    for (role, quota) in &config.users {
        validate_quota(&format!("server.rate_limits.users.{role}"), quota)?;
    }

    for (tool, quota) in &config.tools {
        if tool.is_empty() {
            bail!("server.rate_limits.tools contains an entry with an empty tool name");
        }

        validate_quota(&format!("server.rate_limits.tools.{tool}"), quota)?;
    }

    if let Some(read) = &config.resources.read {
        validate_quota("server.rate_limits.resources.read", read)?;
    }

    Ok(())
}

/// Rejects endpoints configured onto the same path of the same listener.
pub(crate) fn validate_routes(config: &ServerConfig) -> anyhow::Result<()> {
    let introspection = &config.rate_limits.introspection_path;

    if config.health.enabled && config.health.listen.is_none() && config.health.path == *introspection {
        bail!("server.health.path and server.rate_limits.introspection_path are both '{introspection}'");
    }

    if introspection.starts_with("/tools/") || introspection.starts_with("/resources/") {
        bail!("server.rate_limits.introspection_path '{introspection}' overlaps the gated routes");
    }

    Ok(())
}

fn validate_quota(path: &str, quota: &RateLimitQuota) -> anyhow::Result<()> {
    if quota.limit == 0 {
        bail!("{path}.limit must be greater than zero.\nTo stop limiting this dimension, remove the entry instead.");
    }

    if let Some(interval) = quota.interval
        && interval.is_zero()
    {
        bail!("{path}.interval must be greater than zero");
    }

    Ok(())
}

/// Configuration that is valid but most likely not what the operator meant.
pub(crate) fn rate_limit_warnings(config: &RateLimitConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if !config.enabled {
        warnings.push("Rate limiting is disabled; tool and resource calls are forwarded without quotas".to_string());
    }

    if !config.users.contains_key(&UserRole::Default) {
        warnings.push(
            "No [server.rate_limits.users.default] quota: users whose role has no entry are not limited per user"
                .to_string(),
        );
    }

    if let Some(global) = &config.global {
        for (role, quota) in &config.users {
            if quota.limit > global.limit {
                warnings.push(format!(
                    "User quota for role '{role}' ({}) exceeds the global quota ({}) and can never be reached",
                    quota.limit, global.limit
                ));
            }
        }
    }

    warnings
}
