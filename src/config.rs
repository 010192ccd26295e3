//! Service configuration.
//!
//! Values are layered from built-in defaults, an optional TOML file, and raw
//! environment variables (`PORT`, `LOG_LEVEL`, `REPORT_LOG_PATH`, ...), with
//! later layers overriding earlier ones.

use anyhow::{Context, bail};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::{Deserialize, Deserializer};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file read when `--config` is not given. Missing is fine.
pub const DEFAULT_CONFIG_FILE: &str = "collector.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Level for this crate's diagnostics when `RUST_LOG` is unset.
    pub log_level: String,
    pub listen_address: IpAddr,
    pub port: u16,

    /// JSON-lines file receiving accepted reports.
    pub report_log_path: PathBuf,
    /// Size threshold that triggers rotation of the report log.
    pub report_log_max_bytes: u64,
    /// Rotated files kept next to the report log (`app.json.1`, ...).
    pub report_log_backups: usize,

    pub csp_schema_path: PathBuf,
    pub hpkp_schema_path: PathBuf,

    /// Largest accepted request body; larger bodies get 413.
    pub max_body_bytes: usize,
    #[serde(deserialize_with = "deserialize_duration")]
    pub request_timeout: Duration,
    /// Grace period for in-flight requests after a shutdown signal.
    #[serde(deserialize_with = "deserialize_duration")]
    pub shutdown_timeout: Duration,

    pub rate_limit_enabled: bool,
    /// Reports accepted per client IP within a 5 second window.
    pub rate_limit_burst: u32,
    /// Reports accepted per client IP within a 1 minute window.
    pub rate_limit_per_minute: u32,

    /// Believe `CF-Connecting-IP`. Only safe when Cloudflare is the sole
    /// path to the service and overwrites the header.
    pub trust_cf_connecting_ip: bool,

    /// Served by `GET /`.
    pub description: String,
    pub contact: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            listen_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8080,
            report_log_path: PathBuf::from("/var/log/report-collector/app.json"),
            report_log_max_bytes: 1_000_000,
            report_log_backups: 5,
            csp_schema_path: PathBuf::from("schema/content-security-policy-report-2.json"),
            hpkp_schema_path: PathBuf::from("schema/http-public-key-pinning-report.json"),
            max_body_bytes: 64 * 1024,
            request_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(8),
            rate_limit_enabled: true,
            rate_limit_burst: 30,
            rate_limit_per_minute: 300,
            trust_cf_connecting_ip: false,
            description: "Collection endpoint for HTTP report-uri security headers.".to_owned(),
            contact: "security at example dot com".to_owned(),
        }
    }
}

impl Config {
    /// Load configuration from the optional file plus the environment.
    ///
    /// An explicitly requested file must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let file = match path {
            Some(path) => {
                if !path.exists() {
                    bail!("config file {} does not exist", path.display());
                }
                path.to_path_buf()
            }
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let figment = Figment::new()
            .merge(Toml::file(&file))
            .merge(Env::raw());
        Self::from_figment(figment)
    }

    /// Extract and validate a configuration from an already-assembled figment.
    pub fn from_figment(figment: Figment) -> anyhow::Result<Self> {
        let config: Config = figment.extract().context("Failed to load config")?;
        config.validate()?;
        Ok(config)
    }

    /// Semantic checks serde cannot express.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.port == 0 {
            bail!("port must be non-zero");
        }
        if self.report_log_max_bytes == 0 {
            bail!("report_log_max_bytes must be greater than zero");
        }
        if self.max_body_bytes == 0 {
            bail!("max_body_bytes must be greater than zero");
        }
        if self.rate_limit_enabled && (self.rate_limit_burst == 0 || self.rate_limit_per_minute == 0)
        {
            bail!("rate limits must be non-zero when rate limiting is enabled");
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_address, self.port)
    }
}

/// Accepts either whole seconds (`30`) or a duration string (`30s`, `1.5m`).
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawDuration {
        Seconds(u64),
        Text(String),
    }

    match RawDuration::deserialize(deserializer)? {
        RawDuration::Seconds(secs) => Ok(Duration::from_secs(secs)),
        RawDuration::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}

fn parse_duration(text: &str) -> Result<Duration, String> {
    let parsed = fundu::DurationParser::with_all_time_units()
        .parse(text.trim())
        .map_err(|e| format!("invalid duration '{text}': {e}"))?;
    Duration::try_from(parsed).map_err(|e| format!("invalid duration '{text}': {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_toml(toml: &str) -> anyhow::Result<Config> {
        Config::from_figment(Figment::new().merge(Toml::string(toml)))
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = from_toml("").unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.socket_addr().to_string(), "0.0.0.0:8080");
        assert_eq!(config.report_log_max_bytes, 1_000_000);
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert!(config.rate_limit_enabled);
        assert!(!config.trust_cf_connecting_ip);
    }

    #[test]
    fn durations_accept_seconds_and_strings() {
        let config = from_toml("request_timeout = 3\nshutdown_timeout = \"1.5m\"").unwrap();
        assert_eq!(config.request_timeout, Duration::from_secs(3));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(90));
    }

    #[test]
    fn invalid_duration_is_rejected() {
        assert!(from_toml("shutdown_timeout = \"soon\"").is_err());
    }

    #[test]
    fn file_values_override_defaults() {
        let config = from_toml(
            r#"
            port = 9000
            report_log_path = "/tmp/reports.json"
            report_log_backups = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.report_log_path, PathBuf::from("/tmp/reports.json"));
        assert_eq!(config.report_log_backups, 2);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn zero_port_fails_validation() {
        assert!(from_toml("port = 0").is_err());
    }

    #[test]
    fn zero_rate_limit_only_matters_when_enabled() {
        assert!(from_toml("rate_limit_burst = 0").is_err());
        assert!(from_toml("rate_limit_burst = 0\nrate_limit_enabled = false").is_ok());
    }

    #[test]
    fn missing_explicit_config_file_is_an_error() {
        let err = Config::load(Some(Path::new("/nonexistent/collector.toml"))).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
