use std::{fmt, io::IsTerminal, net::SocketAddr, path::PathBuf, str::FromStr};

use clap::{Parser, ValueEnum};
use config::{Config, RedisConfig, StorageConfig};
use logforth::filter::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "docgate", version, long_about = concat!("docgate v", env!("CARGO_PKG_VERSION"), ", quota gate for document intelligence tools"))]
pub struct Args {
    /// IP address on which the server will listen for incoming connections.
    /// Default: 127.0.0.1:8000
    #[arg(short, long, env = "DOCGATE_LISTEN_ADDRESS")]
    pub listen_address: Option<SocketAddr>,
    /// Path to the TOML configuration file
    #[arg(long, short, env = "DOCGATE_CONFIG_PATH", default_value = "./docgate.toml")]
    pub config: PathBuf,
    /// Redis connection URL for rate limit windows. Overrides the configured storage.
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,
    /// Set the logging level for the gate's own crates. Dependencies log at warn.
    #[arg(long = "log", env = "DOCGATE_LOG", default_value_t = LogLevel::default())]
    pub log_level: LogLevel,
    /// Set the style of log output
    #[arg(long, env = "DOCGATE_LOG_STYLE", default_value_t = LogStyle::default())]
    pub log_style: LogStyle,
}

impl Args {
    pub fn config(&self) -> anyhow::Result<Config> {
        let mut config = if self.config.exists() {
            Config::load(&self.config)?
        } else {
            log::info!(
                "No configuration file at {}, using the platform defaults",
                self.config.display()
            );

            Config::default()
        };

        if let Some(url) = &self.redis_url {
            apply_redis_url(&mut config, url);
        }

        Ok(config)
    }
}

/// Points rate limit storage at `url`, keeping other Redis settings from the file.
fn apply_redis_url(config: &mut Config, url: &str) {
    let storage = &mut config.server.rate_limits.storage;

    match storage {
        StorageConfig::Redis(redis) => redis.url = url.to_string(),
        StorageConfig::Memory => *storage = StorageConfig::Redis(Box::new(RedisConfig::from_url(url))),
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub(crate) enum LogStyle {
    /// Colorized text, used as the default with TTY output
    Color,
    /// Standard text, used as the default with non-TTY output
    Text,
    /// JSON objects
    Json,
}

impl Default for LogStyle {
    fn default() -> Self {
        if std::io::stdout().is_terminal() {
            LogStyle::Color
        } else {
            LogStyle::Text
        }
    }
}

impl AsRef<str> for LogStyle {
    fn as_ref(&self) -> &str {
        match self {
            LogStyle::Color => "color",
            LogStyle::Text => "text",
            LogStyle::Json => "json",
        }
    }
}

impl fmt::Display for LogStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub(crate) enum LogLevel {
    /// Disable logging
    Off,
    /// Only log errors
    Error,
    /// Log errors, and warnings
    Warn,
    /// Log errors, warnings, and info messages
    #[default]
    Info,
    /// Log errors, warnings, info, and debug messages
    Debug,
    /// Log errors, warnings, info, debug, and trace messages
    Trace,
}

impl LogLevel {
    /// Directive string for the log filter.
    fn directives(self) -> String {
        match self {
            LogLevel::Off => "off".to_string(),
            level => format!(
                "warn,docgate={level},server={level},rate_limit={level},config={level},telemetry={level}"
            ),
        }
    }

    pub fn env_filter(self) -> EnvFilter {
        EnvFilter::from_str(&self.directives()).expect("These all are valid env filters.")
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_ref().fmt(f)
    }
}

impl AsRef<str> for LogLevel {
    fn as_ref(&self) -> &str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use indoc::indoc;

    use super::*;

    fn args(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("docgate").chain(argv.iter().copied())).unwrap()
    }

    #[test]
    fn missing_config_file_uses_defaults() {
        let args = args(&["--config", "/nonexistent/docgate.toml"]);
        let config = args.config().unwrap();

        assert_eq!(config.server.rate_limits.global.map(|q| q.limit), Some(1000));
        assert_eq!(config.server.client_identification.user_id_header, "X-User-Id");
    }

    #[test]
    fn redis_url_flag_switches_storage_to_redis() {
        let args = args(&[
            "--config",
            "/nonexistent/docgate.toml",
            "--redis-url",
            "redis://cache:6379/2",
        ]);

        let config = args.config().unwrap();

        let StorageConfig::Redis(redis) = &config.server.rate_limits.storage else {
            unreachable!("expected redis storage");
        };

        assert_eq!(redis.url, "redis://cache:6379/2");
        assert_eq!(redis.key_prefix, "docgate:rate_limit:");
    }

    #[test]
    fn redis_url_flag_keeps_configured_redis_settings() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            indoc! {r#"
                [server.rate_limits.storage]
                type = "redis"
                url = "redis://localhost:6379/0"
                key_prefix = "staging:"
            "#}
            .as_bytes(),
        )
        .unwrap();

        let path = file.path().to_string_lossy().to_string();
        let args = args(&["--config", &path, "--redis-url", "redis://cache:6379/2"]);

        let config = args.config().unwrap();

        let StorageConfig::Redis(redis) = &config.server.rate_limits.storage else {
            unreachable!("expected redis storage");
        };

        assert_eq!(redis.url, "redis://cache:6379/2");
        assert_eq!(redis.key_prefix, "staging:");
    }

    #[test]
    fn log_level_directives_cover_workspace_crates() {
        assert_eq!(
            LogLevel::Debug.directives(),
            "warn,docgate=debug,server=debug,rate_limit=debug,config=debug,telemetry=debug"
        );
        assert_eq!(LogLevel::Off.directives(), "off");
    }
}
