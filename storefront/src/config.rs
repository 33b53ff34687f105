use serde::Deserialize;
use std::num::NonZeroUsize;
use thiserror::Error;
use url::Url;

pub const ENV_UPSTREAM_URL: &str = "VTEX_API_URL";
pub const ENV_APP_KEY: &str = "VTEX_API_APP_KEY";
pub const ENV_APP_TOKEN: &str = "VTEX_API_APP_TOKEN";
pub const ENV_PORT: &str = "PORT";

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_ADMIN_PORT: u16 = 3001;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Missing upstream setting: {0}")]
    MissingUpstreamSetting(&'static str),

    #[error("Invalid upstream URL {0}: {1}")]
    InvalidUpstreamUrl(String, String),

    #[error("Upstream URL must use http or https: {0}")]
    UnsupportedScheme(String),

    #[error("Upstream timeout cannot be 0")]
    InvalidTimeout,

    #[error("Invalid value for {0}: {1}")]
    InvalidEnvValue(&'static str, String),
}

/// Storefront gateway configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Main listener for incoming requests
    #[serde(default)]
    pub listener: Listener,
    /// Admin listener for health and readiness probes
    #[serde(default = "Listener::default_admin")]
    pub admin_listener: Listener,
    /// The e-commerce platform the gateway talks to
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub fanout: FanoutConfig,
}

impl Config {
    /// Builds a configuration from environment values only.
    pub fn from_env<F>(lookup: F) -> Result<Self, ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config {
            listener: Listener::default(),
            admin_listener: Listener::default_admin(),
            upstream: UpstreamConfig::default(),
            fanout: FanoutConfig::default(),
        };
        config.apply_env(lookup)?;
        Ok(config)
    }

    /// Overrides file values with the environment.
    ///
    /// Empty variables are treated as unset.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(url) = lookup(ENV_UPSTREAM_URL) {
            self.upstream.url = Some(url);
        }
        if let Some(key) = lookup(ENV_APP_KEY) {
            self.upstream.app_key = Some(key);
        }
        if let Some(token) = lookup(ENV_APP_TOKEN) {
            self.upstream.app_token = Some(token);
        }
        if let Some(port) = lookup(ENV_PORT) {
            self.listener.port = port
                .trim()
                .parse()
                .map_err(|_| ValidationError::InvalidEnvValue(ENV_PORT, port))?;
        }
        Ok(())
    }

    /// Validates the configuration and resolves the upstream settings.
    pub fn validate(&self) -> Result<ResolvedUpstream, ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;
        self.upstream.resolve()
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "0.0.0.0".into(),
            port: DEFAULT_PORT,
        }
    }
}

impl Listener {
    fn default_admin() -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port: DEFAULT_ADMIN_PORT,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

/// Upstream settings as written in the file.
///
/// The credentials are optional here because they may come from the
/// environment instead; `resolve` enforces that they are present.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct UpstreamConfig {
    pub url: Option<String>,
    pub app_key: Option<String>,
    pub app_token: Option<String>,
    /// Account name prefixed to the pricing path
    pub account: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl UpstreamConfig {
    pub fn resolve(&self) -> Result<ResolvedUpstream, ValidationError> {
        let raw_url = required(&self.url, ENV_UPSTREAM_URL)?;
        let app_key = required(&self.app_key, ENV_APP_KEY)?;
        let app_token = required(&self.app_token, ENV_APP_TOKEN)?;

        let url = Url::parse(raw_url)
            .map_err(|e| ValidationError::InvalidUpstreamUrl(raw_url.to_string(), e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
            return Err(ValidationError::UnsupportedScheme(raw_url.to_string()));
        }

        let timeout_secs = self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(ValidationError::InvalidTimeout);
        }

        Ok(ResolvedUpstream {
            url,
            app_key: app_key.to_string(),
            app_token: app_token.to_string(),
            account: self.account.clone().filter(|a| !a.is_empty()),
            timeout_secs,
        })
    }
}

fn required<'a>(
    value: &'a Option<String>,
    name: &'static str,
) -> Result<&'a str, ValidationError> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .ok_or(ValidationError::MissingUpstreamSetting(name))
}

/// Upstream settings after validation. Passed explicitly to the client.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedUpstream {
    pub url: Url,
    pub app_key: String,
    pub app_token: String,
    pub account: Option<String>,
    pub timeout_secs: u64,
}

/// Enrichment fan-out settings
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct FanoutConfig {
    /// Maximum enrichment calls in flight per request. Unbounded when absent.
    pub max_concurrency: Option<NonZeroUsize>,
}
