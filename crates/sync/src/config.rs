//! Sync configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `FIELDTRACK_ENVELOPE_KEY` - Base64-encoded 32-byte key shared by every
//!   device of the deployment, used to encrypt email envelopes
//! - `FIELDTRACK_BOOTSTRAP_ADMIN_EMAIL` - Address of the bootstrap super-admin
//! - `FIELDTRACK_BOOTSTRAP_ADMIN_PASSWORD` - Password of the bootstrap super-admin
//!
//! ## Optional (remote document store - absent means local-only startup)
//! - `FIELDTRACK_REMOTE_URL` - Base URL of the document store API
//! - `FIELDTRACK_REMOTE_API_KEY` - Bearer key for the document store
//! - `FIELDTRACK_REMOTE_TIMEOUT_SECS` - Per-call timeout (default: 15)
//! - `FIELDTRACK_LIVE_UPDATES` - Subscribe to remote changes after loading (default: false)
//! - `FIELDTRACK_POLL_INTERVAL_SECS` - Subscription poll interval (default: 30)
//!
//! ## Optional (email transport channel - all three or none)
//! - `FIELDTRACK_MAIL_CLIENT_ID` - OAuth client ID
//! - `FIELDTRACK_MAIL_CLIENT_SECRET` - OAuth client secret
//! - `FIELDTRACK_MAIL_REDIRECT_URI` - OAuth redirect URI registered for the client
//!
//! ## Optional
//! - `FIELDTRACK_DATA_DIR` - Device storage directory (default: .fieldtrack)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use fieldtrack_core::Email;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use url::Url;

const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;
const MIN_BOOTSTRAP_PASSWORD_LENGTH: usize = 12;
const ENVELOPE_KEY_LENGTH: usize = 32;
const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 15;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
const DEFAULT_DATA_DIR: &str = ".fieldtrack";

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "secret",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Sync core configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Remote document store (absent forces local-only startup)
    pub remote: Option<RemoteConfig>,
    /// Email transport channel (absent disables broadcasting and polling)
    pub mail: Option<MailConfig>,
    /// Base64 envelope key shared across the deployment
    pub envelope_key: SecretString,
    /// Externally provisioned super-admin seeded into empty snapshots
    pub bootstrap_admin: BootstrapAdmin,
    /// Directory holding the device snapshot
    pub data_dir: PathBuf,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment (e.g., "development", "production")
    pub sentry_environment: Option<String>,
}

/// Remote document store configuration.
///
/// Implements `Debug` manually to redact the API key.
#[derive(Clone)]
pub struct RemoteConfig {
    /// Base URL of the document store API
    pub base_url: Url,
    /// Bearer key for the document store
    pub api_key: SecretString,
    /// Upper bound for every remote call
    pub timeout: Duration,
    /// Start live subscriptions after the bulk load
    pub live_updates: bool,
    /// How often the HTTP subscription polls for changes
    pub poll_interval: Duration,
}

impl std::fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("base_url", &self.base_url.as_str())
            .field("api_key", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .field("live_updates", &self.live_updates)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

/// OAuth client used for the email transport channel.
///
/// Implements `Debug` manually to redact the client secret.
#[derive(Clone)]
pub struct MailConfig {
    /// OAuth client ID
    pub client_id: String,
    /// OAuth client secret
    pub client_secret: SecretString,
    /// Redirect URI registered for the client
    pub redirect_uri: String,
}

impl std::fmt::Debug for MailConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("redirect_uri", &self.redirect_uri)
            .finish()
    }
}

/// The emergency super-admin account.
///
/// Provisioned from the environment so no credential is ever compiled in.
#[derive(Clone)]
pub struct BootstrapAdmin {
    pub email: Email,
    pub password: SecretString,
}

impl std::fmt::Debug for BootstrapAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapAdmin")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl SyncConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid,
    /// if grouped variables are only partially set, or if secrets fail
    /// validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let envelope_key = get_required_secret("FIELDTRACK_ENVELOPE_KEY")?;
        validate_envelope_key(&envelope_key, "FIELDTRACK_ENVELOPE_KEY")?;

        Ok(Self {
            remote: RemoteConfig::from_env()?,
            mail: MailConfig::from_env()?,
            envelope_key,
            bootstrap_admin: BootstrapAdmin::from_env()?,
            data_dir: PathBuf::from(get_env_or_default("FIELDTRACK_DATA_DIR", DEFAULT_DATA_DIR)),
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
        })
    }

    /// Returns the remote configuration, if the remote store is configured.
    #[must_use]
    pub const fn remote(&self) -> Option<&RemoteConfig> {
        self.remote.as_ref()
    }

    /// Returns the mail configuration, if the email channel is configured.
    #[must_use]
    pub const fn mail(&self) -> Option<&MailConfig> {
        self.mail.as_ref()
    }
}

impl RemoteConfig {
    fn from_env() -> Result<Option<Self>, ConfigError> {
        let base_url = get_optional_env("FIELDTRACK_REMOTE_URL");
        let api_key = get_optional_env("FIELDTRACK_REMOTE_API_KEY");

        match (base_url, api_key) {
            (Some(url), Some(key)) => {
                let base_url = Url::parse(&url).map_err(|e| {
                    ConfigError::InvalidEnvVar("FIELDTRACK_REMOTE_URL".to_string(), e.to_string())
                })?;
                validate_secret_strength(&key, "FIELDTRACK_REMOTE_API_KEY")?;

                Ok(Some(Self {
                    base_url,
                    api_key: SecretString::from(key),
                    timeout: Duration::from_secs(get_parsed_env(
                        "FIELDTRACK_REMOTE_TIMEOUT_SECS",
                        DEFAULT_REMOTE_TIMEOUT_SECS,
                    )?),
                    live_updates: get_parsed_env("FIELDTRACK_LIVE_UPDATES", false)?,
                    poll_interval: Duration::from_secs(get_parsed_env(
                        "FIELDTRACK_POLL_INTERVAL_SECS",
                        DEFAULT_POLL_INTERVAL_SECS,
                    )?),
                }))
            }
            (None, None) => Ok(None),
            _ => Err(ConfigError::InvalidEnvVar(
                "FIELDTRACK_REMOTE_*".to_string(),
                "Both FIELDTRACK_REMOTE_URL and FIELDTRACK_REMOTE_API_KEY must be set together"
                    .to_string(),
            )),
        }
    }
}

impl MailConfig {
    fn from_env() -> Result<Option<Self>, ConfigError> {
        let client_id = get_optional_env("FIELDTRACK_MAIL_CLIENT_ID");
        let client_secret = get_optional_env("FIELDTRACK_MAIL_CLIENT_SECRET");
        let redirect_uri = get_optional_env("FIELDTRACK_MAIL_REDIRECT_URI");

        match (client_id, client_secret, redirect_uri) {
            (Some(client_id), Some(secret), Some(redirect_uri)) => {
                // OAuth client secrets are issued by the provider; warn rather than refuse
                if let Err(e) = validate_secret_strength(&secret, "FIELDTRACK_MAIL_CLIENT_SECRET") {
                    tracing::warn!("FIELDTRACK_MAIL_CLIENT_SECRET validation warning: {e}");
                }
                Ok(Some(Self {
                    client_id,
                    client_secret: SecretString::from(secret),
                    redirect_uri,
                }))
            }
            (None, None, None) => Ok(None),
            _ => Err(ConfigError::InvalidEnvVar(
                "FIELDTRACK_MAIL_*".to_string(),
                "FIELDTRACK_MAIL_CLIENT_ID, FIELDTRACK_MAIL_CLIENT_SECRET and \
                 FIELDTRACK_MAIL_REDIRECT_URI must be set together"
                    .to_string(),
            )),
        }
    }
}

impl BootstrapAdmin {
    fn from_env() -> Result<Self, ConfigError> {
        let email = get_required_env("FIELDTRACK_BOOTSTRAP_ADMIN_EMAIL")?;
        let email = Email::parse(&email).map_err(|e| {
            ConfigError::InvalidEnvVar("FIELDTRACK_BOOTSTRAP_ADMIN_EMAIL".to_string(), e.to_string())
        })?;
        let password = get_required_secret("FIELDTRACK_BOOTSTRAP_ADMIN_PASSWORD")?;
        validate_bootstrap_password(&password, "FIELDTRACK_BOOTSTRAP_ADMIN_PASSWORD")?;

        Ok(Self { email, password })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get a required environment variable as a secret.
fn get_required_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    Ok(SecretString::from(value))
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an optional environment variable, falling back to `default` when unset.
fn get_parsed_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_optional_env(key).map_or(Ok(default), |raw| {
        raw.trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
    })
}

/// Validate that the envelope key decodes to exactly 32 bytes.
fn validate_envelope_key(key: &SecretString, var_name: &str) -> Result<(), ConfigError> {
    let decoded = STANDARD
        .decode(key.expose_secret().trim().as_bytes())
        .map_err(|e| ConfigError::InvalidEnvVar(var_name.to_string(), e.to_string()))?;
    if decoded.len() != ENVELOPE_KEY_LENGTH {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "must decode to {ENVELOPE_KEY_LENGTH} bytes (got {})",
                decoded.len()
            ),
        ));
    }
    Ok(())
}

/// Validate the bootstrap password length and strength.
fn validate_bootstrap_password(password: &SecretString, var_name: &str) -> Result<(), ConfigError> {
    let value = password.expose_secret();
    if value.len() < MIN_BOOTSTRAP_PASSWORD_LENGTH {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "must be at least {MIN_BOOTSTRAP_PASSWORD_LENGTH} characters (got {})",
                value.len()
            ),
        ));
    }
    validate_secret_strength(value, var_name)
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.chars().count() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    if let Some(pattern) = PLACEHOLDER_PATTERNS.iter().find(|p| lower.contains(*p)) {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!("appears to be a placeholder (contains '{pattern}')"),
        ));
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use a randomly generated secret."
            ),
        ));
    }

    Ok(())
}
