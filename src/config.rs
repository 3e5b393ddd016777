//! Client configuration records.
//!
//! [`ClientConfig`] enumerates everything a service client can be tuned
//! with: region, timeouts, pool size, proxies, retry behavior, and the
//! nested [`ConnectorConfig`] for connection-level options. The records
//! deserialize with `serde` and reject unrecognised keys, so a typo in a
//! config file fails at construction instead of being silently ignored.

use crate::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

/// Environment variable holding the default region.
pub const ENV_REGION: &str = "AWS_REGION";
/// Fallback environment variable for the region.
pub const ENV_DEFAULT_REGION: &str = "AWS_DEFAULT_REGION";
/// Environment variable pointing at the config file.
pub const ENV_CONFIG_FILE: &str = "AWS_CONFIG_FILE";
/// Environment variable pointing at the shared credentials file.
pub const ENV_SHARED_CREDENTIALS_FILE: &str = "AWS_SHARED_CREDENTIALS_FILE";
/// Environment variable selecting the profile to read.
pub const ENV_PROFILE: &str = "AWS_PROFILE";
/// Environment variable disabling the instance metadata provider.
pub const ENV_EC2_METADATA_DISABLED: &str = "AWS_EC2_METADATA_DISABLED";
/// Environment variable holding the web identity token file path.
pub const ENV_WEB_IDENTITY_TOKEN_FILE: &str = "AWS_WEB_IDENTITY_TOKEN_FILE";
/// Environment variable holding the role ARN for web identity federation.
pub const ENV_ROLE_ARN: &str = "AWS_ROLE_ARN";
/// Environment variable enabling client-side monitoring.
pub const ENV_CSM_ENABLED: &str = "AWS_CSM_ENABLED";
/// Environment variable for the client-side monitoring host.
pub const ENV_CSM_HOST: &str = "AWS_CSM_HOST";
/// Environment variable for the client-side monitoring port.
pub const ENV_CSM_PORT: &str = "AWS_CSM_PORT";

fn default_user_agent() -> String {
    concat!("wavecall/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_timeout() -> f64 {
    60.0
}

fn default_pool() -> usize {
    10
}

fn default_true() -> bool {
    true
}

/// How the standard retry policy schedules its backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryMode {
    /// Short-base exponential backoff.
    #[default]
    Legacy,
    /// Exponential backoff with full jitter and a 20 second cap.
    Standard,
    /// Same schedule as `standard`; client-side rate limiting is left to
    /// the embedding SDK.
    Adaptive,
}

/// Retry behavior knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Total attempts, including the first one. Must be at least 1.
    #[serde(default = "RetryConfig::default_max_attempts")]
    pub max_attempts: u32,
    /// The backoff schedule family.
    #[serde(default)]
    pub mode: RetryMode,
}

impl RetryConfig {
    fn default_max_attempts() -> u32 {
        3
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: Self::default_max_attempts(),
            mode: RetryMode::default(),
        }
    }
}

/// Connection-level options for the HTTP transport.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectorConfig {
    /// How long an idle pooled connection is kept alive, in seconds.
    ///
    /// Defaults to 12 seconds; AWS services idle-close at roughly 20, so a
    /// shorter keepalive avoids racing the server's close.
    #[serde(default = "ConnectorConfig::default_keepalive")]
    pub keepalive_timeout: Option<f64>,
    /// Close the connection after every response instead of pooling it.
    #[serde(default)]
    pub force_close: bool,
    /// Skip TLS certificate verification. For test endpoints only.
    #[serde(default)]
    pub accept_invalid_certs: bool,
    /// An extra PEM-encoded root certificate to trust.
    #[serde(default)]
    pub extra_root_ca_pem: Option<String>,
}

impl ConnectorConfig {
    fn default_keepalive() -> Option<f64> {
        Some(12.0)
    }
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            keepalive_timeout: Self::default_keepalive(),
            force_close: false,
            accept_invalid_certs: false,
            extra_root_ca_pem: None,
        }
    }
}

/// Configuration for a service client.
///
/// All fields have defaults, so `ClientConfig::default()` is a working
/// starting point. Timeouts are in seconds.
///
/// # Examples
///
/// ```
/// use wavecall::config::ClientConfig;
///
/// let config: ClientConfig = serde_json::from_str(
///     r#"{"region": "us-west-2", "read_timeout": 30.0, "retries": {"max_attempts": 5}}"#,
/// ).unwrap();
/// assert_eq!(config.region.as_deref(), Some("us-west-2"));
/// config.validate().unwrap();
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// The region the client addresses.
    #[serde(default)]
    pub region: Option<String>,
    /// The signature version the signer collaborator should apply.
    #[serde(default)]
    pub signature_version: Option<String>,
    /// The User-Agent header value.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Extra text appended to the User-Agent header.
    #[serde(default)]
    pub user_agent_extra: Option<String>,
    /// Connect timeout in seconds.
    #[serde(default = "default_timeout")]
    pub connect_timeout: f64,
    /// Read timeout in seconds. This is also the per-request timeout.
    #[serde(default = "default_timeout")]
    pub read_timeout: f64,
    /// Maximum number of pooled connections.
    #[serde(default = "default_pool")]
    pub max_pool_connections: usize,
    /// Proxy URL per URL scheme (`http`, `https`).
    #[serde(default)]
    pub proxies: HashMap<String, String>,
    /// Retry behavior.
    #[serde(default)]
    pub retries: RetryConfig,
    /// Whether operation parameters are validated before serialization.
    #[serde(default = "default_true")]
    pub validate_params: bool,
    /// Connection-level transport options.
    #[serde(default)]
    pub connector: ConnectorConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            region: None,
            signature_version: None,
            user_agent: default_user_agent(),
            user_agent_extra: None,
            connect_timeout: default_timeout(),
            read_timeout: default_timeout(),
            max_pool_connections: default_pool(),
            proxies: HashMap::new(),
            retries: RetryConfig::default(),
            validate_params: true,
            connector: ConnectorConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for non-positive timeouts or pool
    /// sizes, unknown proxy schemes, unparsable proxy URLs, zero retry
    /// attempts, or the force-close/keepalive conflict.
    pub fn validate(&self) -> Result<()> {
        if !(self.connect_timeout.is_finite() && self.connect_timeout > 0.0) {
            return Err(Error::Configuration(format!(
                "connect_timeout must be a positive number, got {}",
                self.connect_timeout
            )));
        }
        if !(self.read_timeout.is_finite() && self.read_timeout > 0.0) {
            return Err(Error::Configuration(format!(
                "read_timeout must be a positive number, got {}",
                self.read_timeout
            )));
        }
        if self.max_pool_connections == 0 {
            return Err(Error::Configuration(
                "max_pool_connections must be at least 1".to_string(),
            ));
        }
        if self.retries.max_attempts == 0 {
            return Err(Error::Configuration(
                "retries.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.connector.force_close && self.connector.keepalive_timeout.is_some() {
            return Err(Error::Configuration(
                "keepalive_timeout cannot be set when force_close is enabled".to_string(),
            ));
        }
        if let Some(keepalive) = self.connector.keepalive_timeout {
            if !(keepalive.is_finite() && keepalive > 0.0) {
                return Err(Error::Configuration(format!(
                    "keepalive_timeout must be a positive number, got {keepalive}"
                )));
            }
        }
        for (scheme, proxy_url) in &self.proxies {
            if scheme != "http" && scheme != "https" {
                return Err(Error::Configuration(format!(
                    "unknown proxy scheme \"{scheme}\", expected \"http\" or \"https\""
                )));
            }
            Url::parse(proxy_url).map_err(|e| {
                Error::Configuration(format!("invalid proxy URL \"{proxy_url}\": {e}"))
            })?;
        }
        if self.read_timeout < self.connect_timeout {
            // A per-request timeout below the connect timeout can fire
            // before the connection is even established.
            tracing::warn!(
                connect_timeout = self.connect_timeout,
                read_timeout = self.read_timeout,
                "read_timeout is smaller than connect_timeout; the effective timeout is ambiguous"
            );
        }
        Ok(())
    }

    /// The connect timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.connect_timeout)
    }

    /// The read timeout as a [`Duration`].
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.read_timeout)
    }

    /// The full User-Agent value, with any extra appended.
    pub fn full_user_agent(&self) -> String {
        match &self.user_agent_extra {
            Some(extra) => format!("{} {}", self.user_agent, extra),
            None => self.user_agent.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        ClientConfig::default().validate().unwrap();
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result: std::result::Result<ClientConfig, _> =
            serde_json::from_str(r#"{"regoin": "us-east-1"}"#);
        assert!(result.is_err());

        let result: std::result::Result<ClientConfig, _> =
            serde_json::from_str(r#"{"connector": {"use_dns_cache": true}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn force_close_conflicts_with_keepalive() {
        let mut config = ClientConfig::default();
        config.connector.force_close = true;
        assert!(config.validate().is_err());

        config.connector.keepalive_timeout = None;
        config.validate().unwrap();
    }

    #[test]
    fn proxy_urls_are_checked() {
        let mut config = ClientConfig::default();
        config
            .proxies
            .insert("http".to_string(), "http://proxy.internal:3128".to_string());
        config.validate().unwrap();

        config
            .proxies
            .insert("socks5".to_string(), "socks5://proxy:1080".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_types_fail_deserialization() {
        let result: std::result::Result<ClientConfig, _> =
            serde_json::from_str(r#"{"connect_timeout": "soon"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn user_agent_extra_is_appended() {
        let mut config = ClientConfig::default();
        config.user_agent = "wavecall/0.1.0".to_string();
        config.user_agent_extra = Some("app/1.2".to_string());
        assert_eq!(config.full_user_agent(), "wavecall/0.1.0 app/1.2");
    }
}
