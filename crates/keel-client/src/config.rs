//! Client configuration.
//!
//! Values are layered: built-in defaults, then an optional `keel.toml`,
//! then `KEEL_`-prefixed environment variables (`KEEL_BASE_URL`,
//! `KEEL_MAX_RETRIES`, ...).

use std::path::Path;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::data::{CacheConfig, DedupPolicy, RetryPolicy};
use crate::error::ConfigError;

pub const CONFIG_FILE: &str = "keel.toml";
pub const ENV_PREFIX: &str = "KEEL_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Prefix for relative request paths.
    pub base_url: Option<String>,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub exponential_backoff: bool,
    pub cache_capacity: usize,
    /// `0` disables the periodic sweep.
    pub cache_sweep_interval_secs: u64,
    pub default_cache_ttl_ms: u64,
    pub default_max_stale_ms: u64,
    pub dedup_policy: DedupPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_ms: 30_000,
            max_retries: 3,
            retry_delay_ms: 1_000,
            max_retry_delay_ms: 10_000,
            exponential_backoff: true,
            cache_capacity: 500,
            cache_sweep_interval_secs: 300,
            default_cache_ttl_ms: 300_000,
            default_max_stale_ms: 60_000,
            dedup_policy: DedupPolicy::All,
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: Some(base_url.into()),
            ..Self::default()
        }
    }

    /// Defaults, then `keel.toml` in the working directory, then the
    /// environment.
    pub fn figment() -> Figment {
        Self::layered(Toml::file(CONFIG_FILE))
    }

    pub fn load() -> Result<Self, ConfigError> {
        Ok(Self::figment().extract()?)
    }

    /// Like [`load`](Self::load) but reading the TOML layer from `path`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Ok(Self::layered(Toml::file(path.as_ref())).extract()?)
    }

    fn layered(file: figment::providers::Data<Toml>) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(file)
            .merge(Env::prefixed(ENV_PREFIX))
    }

    /// Parsed `base_url`, if one is configured.
    pub fn base_url(&self) -> Result<Option<Url>, ConfigError> {
        self.base_url
            .as_deref()
            .map(Url::parse)
            .transpose()
            .map_err(ConfigError::from)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(self.timeout_ms),
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_delay_ms),
            max_delay: Duration::from_millis(self.max_retry_delay_ms),
            exponential: self.exponential_backoff,
        }
    }

    /// Cache settings used by [`RequestOptions::cached`](crate::RequestOptions::cached).
    /// A non-zero `default_max_stale_ms` turns on stale-while-revalidate.
    pub fn cache_config(&self) -> CacheConfig {
        let config = CacheConfig::new(Duration::from_millis(self.default_cache_ttl_ms));
        match self.default_max_stale_ms {
            0 => config,
            max_stale => config.stale_while_revalidate(Duration::from_millis(max_stale)),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache_sweep_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use std::io::Write;

    #[test]
    fn defaults_without_sources() {
        Jail::expect_with(|_jail| {
            let config = ClientConfig::load().map_err(|e| e.to_string())?;
            assert_eq!(config, ClientConfig::default());
            assert_eq!(config.retry_policy(), RetryPolicy::default());
            Ok(())
        });
    }

    #[test]
    fn toml_then_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                CONFIG_FILE,
                r#"
                base_url = "https://api.example.com"
                max_retries = 5
                dedup_policy = "safe_methods"
                "#,
            )?;
            jail.set_env("KEEL_MAX_RETRIES", "1");

            let config = ClientConfig::load().map_err(|e| e.to_string())?;
            assert_eq!(config.base_url.as_deref(), Some("https://api.example.com"));
            assert_eq!(config.max_retries, 1);
            assert_eq!(config.dedup_policy, DedupPolicy::SafeMethods);
            assert_eq!(config.timeout_ms, 30_000);
            Ok(())
        });
    }

    #[test]
    fn from_explicit_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "timeout_ms = 500\ncache_sweep_interval_secs = 0").unwrap();

        let config = ClientConfig::from_file(file.path()).unwrap();
        assert_eq!(config.retry_policy().timeout, Duration::from_millis(500));
        assert!(config.sweep_interval().is_zero());
    }

    #[test]
    fn bad_base_url_is_reported() {
        let config = ClientConfig::new("not a url");
        assert!(matches!(config.base_url(), Err(ConfigError::BaseUrl(_))));
        assert!(ClientConfig::default().base_url().unwrap().is_none());
    }

    #[test]
    fn cache_defaults() {
        let cache = ClientConfig::default().cache_config();
        assert_eq!(cache.ttl, Duration::from_secs(300));
        assert_eq!(cache.max_stale_time, Duration::from_secs(60));
        assert!(cache.stale_while_revalidate);

        let no_stale = ClientConfig {
            default_max_stale_ms: 0,
            ..ClientConfig::default()
        };
        assert!(!no_stale.cache_config().stale_while_revalidate);
    }

    #[test]
    fn cache_defaults_come_from_env() {
        Jail::expect_with(|jail| {
            jail.set_env("KEEL_DEFAULT_CACHE_TTL_MS", "1500");
            jail.set_env("KEEL_DEFAULT_MAX_STALE_MS", "0");
            let cache = ClientConfig::load().map_err(|e| e.to_string())?.cache_config();
            assert_eq!(cache.ttl, Duration::from_millis(1500));
            assert!(!cache.stale_while_revalidate);
            Ok(())
        });
    }
}
