//! Configuration management for Tollgate.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, TollgateError};
use crate::ratelimit::{LimitConfig, LimitTable, DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW};

/// Prefix for environment variable overrides, e.g. `TOLLGATE__SERVER__HTTP_ADDR`.
pub const ENV_PREFIX: &str = "TOLLGATE";

/// Main configuration for the Tollgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8000))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Limit applied to every operation without an override
    #[serde(default)]
    pub default: LimitRule,

    /// Per-operation overrides keyed by operation name
    #[serde(default)]
    pub operations: HashMap<String, LimitRule>,

    /// Window store settings
    #[serde(default)]
    pub store: StoreConfig,

    /// Caller identity settings
    #[serde(default)]
    pub identity: IdentityConfig,
}

/// A limit as written in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LimitRule {
    /// Requests allowed within one window
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,

    /// Window length in seconds. Fractions are allowed down to whole
    /// milliseconds; finer values are rejected at load.
    #[serde(default = "default_window_seconds")]
    pub window_seconds: f64,
}

impl Default for LimitRule {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_seconds: default_window_seconds(),
        }
    }
}

impl LimitRule {
    /// Validate into a [`LimitConfig`].
    pub fn to_limit(&self) -> Result<LimitConfig> {
        LimitConfig::from_secs_f64(self.max_requests, self.window_seconds)
    }
}

fn default_max_requests() -> u32 {
    DEFAULT_MAX_REQUESTS
}

fn default_window_seconds() -> f64 {
    DEFAULT_WINDOW.as_secs_f64()
}

/// Window store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// How often idle windows are reclaimed, in seconds
    #[serde(default = "default_reap_interval")]
    pub reap_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            reap_interval_secs: default_reap_interval(),
        }
    }
}

impl StoreConfig {
    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }
}

fn default_reap_interval() -> u64 {
    30
}

/// How callers are identified.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Honour `X-Forwarded-For` / `X-Real-IP`. Only safe behind a proxy that
    /// overwrites these headers.
    #[serde(default)]
    pub trust_proxy: bool,

    /// Bearer tokens whose holders are treated as authenticated and exempt
    #[serde(default)]
    pub exempt_tokens: Vec<String>,
}

impl TollgateConfig {
    /// Load configuration from an optional file, then environment overrides.
    ///
    /// Later sources win: built-in defaults, the file, then `TOLLGATE__*`
    /// variables. The result is validated before it is returned.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            info!(path = %path, "Loading configuration file");
            builder = builder.add_source(config::File::with_name(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: TollgateConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TollgateConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TollgateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject limits that can never be enforced.
    pub fn validate(&self) -> Result<()> {
        self.limit_table().map(|_| ())
    }

    /// Build the validated limit table.
    pub fn limit_table(&self) -> Result<LimitTable> {
        let default = self
            .rate_limiting
            .default
            .to_limit()
            .map_err(|e| TollgateError::Config(format!("default limit: {}", e)))?;

        self.rate_limiting
            .operations
            .iter()
            .try_fold(LimitTable::new(default), |table, (operation, rule)| -> Result<LimitTable> {
                let limit = rule.to_limit().map_err(|e| {
                    TollgateError::Config(format!("limit for operation '{}': {}", operation, e))
                })?;
                Ok(table.with_override(operation.clone(), limit))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TollgateConfig::default();
        assert_eq!(config.server.http_addr, default_http_addr());
        assert_eq!(config.rate_limiting.default.max_requests, 60);
        assert_eq!(config.rate_limiting.default.window_seconds, 60.0);
        assert!(!config.rate_limiting.identity.trust_proxy);

        let table = config.limit_table().unwrap();
        assert_eq!(table.resolve("anything"), &LimitConfig::default());
    }

    #[test]
    fn test_parse_overrides() {
        let yaml = r#"
server:
  http_addr: "0.0.0.0:9000"
rate_limiting:
  default:
    max_requests: 100
  operations:
    limited:
      max_requests: 2
      window_seconds: 60
    burst:
      max_requests: 5
      window_seconds: 0.5
  identity:
    trust_proxy: true
    exempt_tokens: ["s3cret"]
"#;
        let config = TollgateConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.http_addr.port(), 9000);
        assert_eq!(config.rate_limiting.identity.exempt_tokens, vec!["s3cret"]);

        let table = config.limit_table().unwrap();
        assert_eq!(table.default_limit().max_requests(), 100);
        assert_eq!(table.default_limit().window(), Duration::from_secs(60));
        assert_eq!(table.resolve("limited").max_requests(), 2);
        assert_eq!(table.resolve("burst").window(), Duration::from_millis(500));
    }

    #[test]
    fn test_zero_window_rejected_at_load() {
        let yaml = r#"
rate_limiting:
  operations:
    broken:
      max_requests: 10
      window_seconds: 0
"#;
        let err = TollgateConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_out_of_range_window_is_config_error() {
        for window in ["1.0e30", "0.0015"] {
            let yaml = format!(
                "rate_limiting:\n  default:\n    window_seconds: {}\n",
                window
            );
            assert!(matches!(
                TollgateConfig::from_yaml(&yaml),
                Err(TollgateError::Config(_))
            ));
        }
    }

    #[test]
    fn test_from_file_reads_yaml() {
        let path = std::env::temp_dir()
            .join(format!("tollgate-config-{}.yaml", std::process::id()));
        std::fs::write(
            &path,
            "rate_limiting:\n  operations:\n    limited:\n      max_requests: 2\n",
        )
        .unwrap();

        let config = TollgateConfig::from_file(&path);
        std::fs::remove_file(&path).unwrap();

        let table = config.unwrap().limit_table().unwrap();
        assert_eq!(table.resolve("limited").max_requests(), 2);
    }

    #[test]
    fn test_from_file_missing_is_io_error() {
        let path = std::env::temp_dir().join("tollgate-config-does-not-exist.yaml");
        assert!(matches!(
            TollgateConfig::from_file(path),
            Err(TollgateError::Io(_))
        ));
    }

    #[test]
    fn test_negative_max_requests_rejected_at_load() {
        let yaml = r#"
rate_limiting:
  default:
    max_requests: -1
"#;
        assert!(matches!(
            TollgateConfig::from_yaml(yaml),
            Err(TollgateError::Config(_))
        ));
    }

    #[test]
    fn test_load_without_sources_uses_defaults() {
        let config = TollgateConfig::load(None).unwrap();
        assert!(config.limit_table().is_ok());
    }
}
