//! Asynchronous credential resolution.
//!
//! Providers implement [`ProvideCredentials`]; a [`CredentialChain`]
//! awaits each provider's `load()` in order and the first non-null result
//! wins. File-backed lookups run off the event loop via `spawn_blocking`,
//! once per lookup. [`RefreshableCredentials`] wraps expiring credentials
//! behind an async `get_frozen_credentials()` that re-runs the refresh
//! callback when the expiry gets close.

use crate::config::{ENV_PROFILE, ENV_SHARED_CREDENTIALS_FILE};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::RwLock;

/// Environment variable holding the access key id.
pub const ENV_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
/// Environment variable holding the secret access key.
pub const ENV_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";
/// Environment variable holding the session token.
pub const ENV_SESSION_TOKEN: &str = "AWS_SESSION_TOKEN";

/// A set of credentials, frozen at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// The access key id.
    pub access_key_id: String,
    /// The secret access key.
    pub secret_access_key: String,
    /// The session token, for temporary credentials.
    pub session_token: Option<String>,
    /// When the credentials expire, if they do.
    pub expiry: Option<SystemTime>,
}

impl Credentials {
    /// Creates non-expiring credentials.
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
            expiry: None,
        }
    }

    /// Attaches a session token.
    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    /// Attaches an expiry.
    pub fn with_expiry(mut self, expiry: SystemTime) -> Self {
        self.expiry = Some(expiry);
        self
    }
}

/// A source of credentials.
#[async_trait]
pub trait ProvideCredentials: Send + Sync {
    /// A short name for diagnostics.
    fn name(&self) -> &'static str;

    /// Attempts to load credentials.
    ///
    /// `Ok(None)` means this source has nothing to offer and the chain
    /// should move on; an error stops the chain.
    async fn load(&self) -> Result<Option<Credentials>>;
}

/// Reads credentials from the standard environment variables.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvProvider;

#[async_trait]
impl ProvideCredentials for EnvProvider {
    fn name(&self) -> &'static str {
        "env"
    }

    async fn load(&self) -> Result<Option<Credentials>> {
        let access_key = std::env::var(ENV_ACCESS_KEY_ID).ok().filter(|v| !v.is_empty());
        let secret_key = std::env::var(ENV_SECRET_ACCESS_KEY)
            .ok()
            .filter(|v| !v.is_empty());

        match (access_key, secret_key) {
            (None, None) => Ok(None),
            (Some(access_key), Some(secret_key)) => {
                let mut credentials = Credentials::new(access_key, secret_key);
                if let Ok(token) = std::env::var(ENV_SESSION_TOKEN) {
                    if !token.is_empty() {
                        credentials = credentials.with_session_token(token);
                    }
                }
                Ok(Some(credentials))
            }
            (Some(_), None) => Err(Error::PartialCredentials {
                provider: "env".to_string(),
                missing: ENV_SECRET_ACCESS_KEY.to_string(),
            }),
            (None, Some(_)) => Err(Error::PartialCredentials {
                provider: "env".to_string(),
                missing: ENV_ACCESS_KEY_ID.to_string(),
            }),
        }
    }
}

/// Serves a fixed set of credentials.
#[derive(Debug, Clone)]
pub struct StaticProvider {
    credentials: Credentials,
}

impl StaticProvider {
    /// Wraps the given credentials.
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl ProvideCredentials for StaticProvider {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn load(&self) -> Result<Option<Credentials>> {
        Ok(Some(self.credentials.clone()))
    }
}

/// Reads a profile from the shared credentials file.
///
/// The file location comes from the explicit path, the
/// `AWS_SHARED_CREDENTIALS_FILE` environment variable, or
/// `~/.aws/credentials`, in that order. Parsing happens on a blocking
/// worker so the event loop never touches the filesystem.
#[derive(Debug, Clone)]
pub struct ProfileProvider {
    profile: String,
    path: Option<PathBuf>,
}

impl ProfileProvider {
    /// Reads the profile named by `AWS_PROFILE`, defaulting to `default`.
    pub fn new() -> Self {
        let profile = std::env::var(ENV_PROFILE).unwrap_or_else(|_| "default".to_string());
        Self {
            profile,
            path: None,
        }
    }

    /// Reads a specific profile from a specific file.
    pub fn with_path(profile: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            profile: profile.into(),
            path: Some(path.into()),
        }
    }

    fn resolve_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.path {
            return Some(path.clone());
        }
        if let Ok(path) = std::env::var(ENV_SHARED_CREDENTIALS_FILE) {
            if !path.is_empty() {
                return Some(PathBuf::from(path));
            }
        }
        std::env::var("HOME")
            .ok()
            .map(|home| PathBuf::from(home).join(".aws").join("credentials"))
    }
}

impl Default for ProfileProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProvideCredentials for ProfileProvider {
    fn name(&self) -> &'static str {
        "shared-credentials-file"
    }

    async fn load(&self) -> Result<Option<Credentials>> {
        let Some(path) = self.resolve_path() else {
            return Ok(None);
        };
        let contents = tokio::task::spawn_blocking(move || std::fs::read_to_string(path))
            .await
            .map_err(|e| Error::Configuration(format!("credential file read failed: {e}")))?;
        let contents = match contents {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::Configuration(format!(
                    "credential file read failed: {e}"
                )))
            }
        };

        let sections = parse_credentials_file(&contents);
        let Some(section) = sections.get(&self.profile) else {
            return Ok(None);
        };

        let access_key = section.get("aws_access_key_id");
        let secret_key = section.get("aws_secret_access_key");
        match (access_key, secret_key) {
            (None, None) => Ok(None),
            (Some(access_key), Some(secret_key)) => {
                let mut credentials = Credentials::new(access_key, secret_key);
                if let Some(token) = section.get("aws_session_token") {
                    credentials = credentials.with_session_token(token);
                }
                Ok(Some(credentials))
            }
            (Some(_), None) => Err(Error::PartialCredentials {
                provider: "shared-credentials-file".to_string(),
                missing: "aws_secret_access_key".to_string(),
            }),
            (None, Some(_)) => Err(Error::PartialCredentials {
                provider: "shared-credentials-file".to_string(),
                missing: "aws_access_key_id".to_string(),
            }),
        }
    }
}

/// Minimal INI parsing for the shared credentials file.
fn parse_credentials_file(contents: &str) -> HashMap<String, HashMap<String, String>> {
    let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
    let mut current: Option<String> = None;
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if line.starts_with('[') && line.ends_with(']') {
            let name = line[1..line.len() - 1].trim().to_string();
            sections.entry(name.clone()).or_default();
            current = Some(name);
            continue;
        }
        if let (Some(section), Some(eq)) = (&current, line.find('=')) {
            let key = line[..eq].trim().to_ascii_lowercase();
            let value = line[eq + 1..].trim().to_string();
            if let Some(map) = sections.get_mut(section) {
                map.insert(key, value);
            }
        }
    }
    sections
}

/// An ordered chain of credential providers.
pub struct CredentialChain {
    providers: Vec<Arc<dyn ProvideCredentials>>,
}

impl CredentialChain {
    /// Builds a chain from explicit providers.
    pub fn new(providers: Vec<Arc<dyn ProvideCredentials>>) -> Self {
        Self { providers }
    }

    /// The default chain: environment, then the shared credentials file.
    pub fn default_chain() -> Self {
        Self::new(vec![
            Arc::new(EnvProvider),
            Arc::new(ProfileProvider::new()),
        ])
    }

    /// Resolves credentials from the first provider that has them.
    ///
    /// # Errors
    ///
    /// Propagates the first provider error, or fails with a
    /// no-credentials error naming every probed provider when the chain
    /// is exhausted.
    pub async fn resolve(&self) -> Result<Credentials> {
        for provider in &self.providers {
            if let Some(credentials) = provider.load().await? {
                tracing::debug!(provider = provider.name(), "Found credentials");
                return Ok(credentials);
            }
        }
        let tried: Vec<&str> = self.providers.iter().map(|p| p.name()).collect();
        Err(Error::NoCredentials {
            tried: tried.join(", "),
        })
    }
}

#[async_trait]
impl ProvideCredentials for CredentialChain {
    fn name(&self) -> &'static str {
        "chain"
    }

    async fn load(&self) -> Result<Option<Credentials>> {
        match self.resolve().await {
            Ok(credentials) => Ok(Some(credentials)),
            Err(Error::NoCredentials { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// The async refresh callback for expiring credentials.
pub type RefreshCallback = Arc<dyn Fn() -> BoxFuture<'static, Result<Credentials>> + Send + Sync>;

/// Advisory refresh window: refresh is attempted, failures tolerated.
const ADVISORY_REFRESH_WINDOW: Duration = Duration::from_secs(15 * 60);
/// Mandatory refresh window: refresh must succeed or the call fails.
const MANDATORY_REFRESH_WINDOW: Duration = Duration::from_secs(10 * 60);

/// Credentials that refresh themselves as expiry approaches.
///
/// Inside the advisory window (15 minutes before expiry) a refresh is
/// attempted but a failure falls back to the current credentials; inside
/// the mandatory window (10 minutes) a failed refresh fails the call.
pub struct RefreshableCredentials {
    current: RwLock<Credentials>,
    refresh: RefreshCallback,
    advisory_window: Duration,
    mandatory_window: Duration,
}

impl RefreshableCredentials {
    /// Wraps initial credentials with a refresh callback.
    pub fn new(initial: Credentials, refresh: RefreshCallback) -> Self {
        Self {
            current: RwLock::new(initial),
            refresh,
            advisory_window: ADVISORY_REFRESH_WINDOW,
            mandatory_window: MANDATORY_REFRESH_WINDOW,
        }
    }

    /// Overrides the advisory and mandatory windows.
    pub fn with_windows(mut self, advisory: Duration, mandatory: Duration) -> Self {
        self.advisory_window = advisory;
        self.mandatory_window = mandatory;
        self
    }

    /// Returns a frozen snapshot, refreshing first when expiry is near.
    pub async fn get_frozen_credentials(&self) -> Result<Credentials> {
        {
            let current = self.current.read().await;
            if !self.needs_refresh(&current) {
                return Ok(current.clone());
            }
        }

        let mut guard = self.current.write().await;
        // Another caller may have refreshed while we waited for the lock.
        if !self.needs_refresh(&guard) {
            return Ok(guard.clone());
        }

        match (self.refresh)().await {
            Ok(refreshed) => {
                tracing::debug!("Refreshed expiring credentials");
                *guard = refreshed.clone();
                Ok(refreshed)
            }
            Err(e) => {
                let remaining = remaining_lifetime(&guard);
                if remaining > self.mandatory_window {
                    tracing::warn!(
                        error = %e,
                        remaining_secs = remaining.as_secs(),
                        "Credential refresh failed inside the advisory window; reusing current credentials"
                    );
                    Ok(guard.clone())
                } else {
                    Err(Error::CredentialRefresh(e.to_string()))
                }
            }
        }
    }

    fn needs_refresh(&self, credentials: &Credentials) -> bool {
        credentials.expiry.is_some() && remaining_lifetime(credentials) <= self.advisory_window
    }
}

fn remaining_lifetime(credentials: &Credentials) -> Duration {
    credentials
        .expiry
        .and_then(|expiry| expiry.duration_since(SystemTime::now()).ok())
        .unwrap_or(Duration::ZERO)
}
