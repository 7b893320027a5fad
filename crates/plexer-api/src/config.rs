//! Configuration management for the plexer event router.
//!
//! Configuration is loaded in priority order: environment variables over
//! built-in defaults. The service works out of the box; per-consumer URLs
//! and tokens are deployment-specific overrides. Validation runs at load
//! time and boot fails fast on any violation.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::{bail, Context, Result};
use figment::{
    providers::{Env, Serialized},
    Figment,
};
use plexer_core::{AuthKind, Consumer, ConsumerRegistry};
use plexer_delivery::{ClientConfig, RetryConfig};
use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

/// Static consumer table: key, label, and auth header scheme.
///
/// URLs and tokens come from `<NAME>_URL` / `<NAME>_TOKEN` environment
/// variables; a consumer without a URL is silently absent from the
/// registry.
const CONSUMER_TABLE: &[(&str, &str, &str)] = &[
    ("heimgeist", "Heimgeist", "bearer"),
    ("atlas", "Atlas", "bearer"),
    ("chronik", "Chronik", "x-auth"),
    ("vigil", "Vigil", "x-auth"),
];

/// Complete service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Listen port. Kept as a string so the strict parse rule applies:
    /// surrounding whitespace is trimmed, any non-numeric residue rejects.
    ///
    /// Environment variable: `PORT`
    #[serde(default = "default_port", alias = "PORT", deserialize_with = "stringly")]
    pub port: String,

    /// Listen address.
    ///
    /// Environment variable: `HOST`
    #[serde(default = "default_host", alias = "HOST")]
    pub host: String,

    /// Deployment environment name.
    ///
    /// Environment variable: `NODE_ENV`
    #[serde(default = "default_environment", alias = "NODE_ENV")]
    pub node_env: String,

    /// Data directory holding the failure queue.
    ///
    /// Environment variable: `PLEXER_DATA_DIR`
    #[serde(default = "default_data_dir", alias = "PLEXER_DATA_DIR")]
    pub plexer_data_dir: String,

    /// Concurrent retry POSTs per cycle.
    ///
    /// Environment variable: `RETRY_CONCURRENCY`
    #[serde(default = "default_retry_concurrency", alias = "RETRY_CONCURRENCY")]
    pub retry_concurrency: usize,

    /// Entries per processing chunk within a retry cycle.
    ///
    /// Environment variable: `RETRY_BATCH_SIZE`
    #[serde(default = "default_retry_batch_size", alias = "RETRY_BATCH_SIZE")]
    pub retry_batch_size: usize,

    /// Per-attempt timeout for outbound POSTs, in seconds.
    ///
    /// Environment variable: `FORWARD_TIMEOUT_SECONDS`
    #[serde(default = "default_forward_timeout", alias = "FORWARD_TIMEOUT_SECONDS")]
    pub forward_timeout_seconds: u64,

    /// Bound on the shutdown drain of in-flight fanout, in seconds.
    ///
    /// Environment variable: `DRAIN_TIMEOUT_SECONDS`
    #[serde(default = "default_drain_timeout", alias = "DRAIN_TIMEOUT_SECONDS")]
    pub drain_timeout_seconds: u64,

    /// Heimgeist endpoint URL (`HEIMGEIST_URL`).
    #[serde(default, alias = "HEIMGEIST_URL")]
    pub heimgeist_url: Option<String>,
    /// Heimgeist token (`HEIMGEIST_TOKEN`).
    #[serde(default, alias = "HEIMGEIST_TOKEN")]
    pub heimgeist_token: Option<String>,
    /// Fallback token for heimgeist (`HEIMGEIST_EVENTS_TOKEN`).
    #[serde(default, alias = "HEIMGEIST_EVENTS_TOKEN")]
    pub heimgeist_events_token: Option<String>,

    /// Atlas endpoint URL (`ATLAS_URL`).
    #[serde(default, alias = "ATLAS_URL")]
    pub atlas_url: Option<String>,
    /// Atlas token (`ATLAS_TOKEN`).
    #[serde(default, alias = "ATLAS_TOKEN")]
    pub atlas_token: Option<String>,

    /// Chronik endpoint URL (`CHRONIK_URL`).
    #[serde(default, alias = "CHRONIK_URL")]
    pub chronik_url: Option<String>,
    /// Chronik token (`CHRONIK_TOKEN`).
    #[serde(default, alias = "CHRONIK_TOKEN")]
    pub chronik_token: Option<String>,

    /// Vigil endpoint URL (`VIGIL_URL`).
    #[serde(default, alias = "VIGIL_URL")]
    pub vigil_url: Option<String>,
    /// Vigil token (`VIGIL_TOKEN`).
    #[serde(default, alias = "VIGIL_TOKEN")]
    pub vigil_token: Option<String>,
}

impl Config {
    /// Loads configuration from defaults and environment overrides, then
    /// validates it.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first violated constraint; callers
    /// exit non-zero on failure.
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Env::prefixed(""));

        let config: Self = figment.extract().context("failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every constraint the environment can violate.
    ///
    /// # Errors
    ///
    /// Returns an error naming the offending variable.
    pub fn validate(&self) -> Result<()> {
        self.parse_port()?;
        if self.retry_concurrency == 0 {
            bail!("RETRY_CONCURRENCY must be a positive integer");
        }
        if self.retry_batch_size == 0 {
            bail!("RETRY_BATCH_SIZE must be a positive integer");
        }
        if self.forward_timeout_seconds == 0 {
            bail!("FORWARD_TIMEOUT_SECONDS must be a positive integer");
        }
        if self.drain_timeout_seconds == 0 {
            bail!("DRAIN_TIMEOUT_SECONDS must be a positive integer");
        }
        // Consumer URLs are checked here so a typo fails the boot, not the
        // first delivery.
        self.consumer_registry()?;
        Ok(())
    }

    /// Parses `PORT` with the strict rule: trim surrounding whitespace,
    /// reject non-numeric residue, require 1–65535.
    ///
    /// # Errors
    ///
    /// Returns an error describing the rejected value.
    pub fn parse_port(&self) -> Result<u16> {
        let trimmed = self.port.trim();
        let value: u32 = trimmed
            .parse()
            .with_context(|| format!("PORT must be an integer, got {:?}", self.port))?;
        if !(1..=65_535).contains(&value) {
            bail!("PORT must be between 1 and 65535, got {value}");
        }
        Ok(value as u16)
    }

    /// The socket address to bind.
    ///
    /// # Errors
    ///
    /// Returns an error when `HOST` or `PORT` is invalid.
    pub fn server_addr(&self) -> Result<SocketAddr> {
        let addr = format!("{}:{}", self.host, self.parse_port()?);
        addr.parse().with_context(|| format!("invalid HOST {:?}", self.host))
    }

    /// The failure-queue data directory.
    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.plexer_data_dir)
    }

    /// Per-attempt outbound timeout.
    pub fn forward_timeout(&self) -> Duration {
        Duration::from_secs(self.forward_timeout_seconds)
    }

    /// Shutdown drain bound.
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_seconds)
    }

    /// Conversion to the delivery crate's retry knobs.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig { concurrency: self.retry_concurrency, batch_size: self.retry_batch_size }
    }

    /// Conversion to the forward client configuration.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig { timeout: self.forward_timeout(), ..ClientConfig::default() }
    }

    /// Builds the consumer registry from the static table and the
    /// environment-provided URLs and tokens.
    ///
    /// Consumers without a URL are omitted. Empty tokens are treated as
    /// absent. The heimgeist token falls back to `HEIMGEIST_EVENTS_TOKEN`.
    ///
    /// # Errors
    ///
    /// Returns an error when a configured URL is not an absolute http(s)
    /// URL.
    pub fn consumer_registry(&self) -> Result<ConsumerRegistry> {
        let mut consumers = Vec::new();
        for &(key, label, auth_kind) in CONSUMER_TABLE {
            let Some(raw_url) = self.consumer_url(key) else { continue };

            let url = normalize_consumer_url(raw_url)
                .with_context(|| format!("invalid URL for consumer {key}: {raw_url:?}"))?;
            consumers.push(Consumer {
                key: key.to_string(),
                label: label.to_string(),
                url: Some(url),
                token: self.consumer_token(key),
                auth_kind: AuthKind::parse_or_bearer(auth_kind),
            });
        }
        Ok(ConsumerRegistry::new(consumers))
    }

    fn consumer_url(&self, key: &str) -> Option<&str> {
        let raw = match key {
            "heimgeist" => self.heimgeist_url.as_deref(),
            "atlas" => self.atlas_url.as_deref(),
            "chronik" => self.chronik_url.as_deref(),
            "vigil" => self.vigil_url.as_deref(),
            _ => None,
        };
        raw.map(str::trim).filter(|url| !url.is_empty())
    }

    fn consumer_token(&self, key: &str) -> Option<String> {
        let raw = match key {
            "heimgeist" => {
                non_empty(self.heimgeist_token.as_deref())
                    .or_else(|| non_empty(self.heimgeist_events_token.as_deref()))
            },
            "atlas" => non_empty(self.atlas_token.as_deref()),
            "chronik" => non_empty(self.chronik_token.as_deref()),
            "vigil" => non_empty(self.vigil_token.as_deref()),
            _ => None,
        };
        raw.map(str::to_string)
    }
}

fn non_empty(token: Option<&str>) -> Option<&str> {
    token.filter(|t| !t.trim().is_empty())
}

/// Validates an absolute http(s) URL and strips trailing path slashes,
/// preserving `/` for the root and keeping query and fragment intact.
///
/// # Errors
///
/// Returns an error for relative URLs, non-http(s) schemes, and URLs
/// without a host.
pub fn normalize_consumer_url(raw: &str) -> Result<String> {
    let mut url = Url::parse(raw).context("not an absolute URL")?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("scheme must be http or https, got {:?}", url.scheme());
    }
    if url.host_str().is_none() {
        bail!("URL has no host");
    }

    let path = url.path().trim_end_matches('/').to_string();
    if path.is_empty() {
        url.set_path("/");
    } else {
        url.set_path(&path);
    }
    Ok(url.to_string())
}

/// Accepts scalar env values whether the provider parsed them as strings
/// or numbers, preserving the raw text for strict validation.
fn stringly<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    struct Stringly;

    impl serde::de::Visitor<'_> for Stringly {
        type Value = String;

        fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("a string or number")
        }

        fn visit_str<E: serde::de::Error>(self, v: &str) -> std::result::Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_u64<E: serde::de::Error>(self, v: u64) -> std::result::Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_i64<E: serde::de::Error>(self, v: i64) -> std::result::Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_f64<E: serde::de::Error>(self, v: f64) -> std::result::Result<String, E> {
            Ok(v.to_string())
        }
    }

    deserializer.deserialize_any(Stringly)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            node_env: default_environment(),
            plexer_data_dir: default_data_dir(),
            retry_concurrency: default_retry_concurrency(),
            retry_batch_size: default_retry_batch_size(),
            forward_timeout_seconds: default_forward_timeout(),
            drain_timeout_seconds: default_drain_timeout(),
            heimgeist_url: None,
            heimgeist_token: None,
            heimgeist_events_token: None,
            atlas_url: None,
            atlas_token: None,
            chronik_url: None,
            chronik_token: None,
            vigil_url: None,
            vigil_token: None,
        }
    }
}

fn default_port() -> String {
    "3000".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_retry_concurrency() -> usize {
    plexer_delivery::DEFAULT_RETRY_CONCURRENCY
}

fn default_retry_batch_size() -> usize {
    plexer_delivery::DEFAULT_RETRY_BATCH_SIZE
}

fn default_forward_timeout() -> u64 {
    plexer_delivery::DEFAULT_FORWARD_TIMEOUT_SECONDS
}

fn default_drain_timeout() -> u64 {
    5
}
