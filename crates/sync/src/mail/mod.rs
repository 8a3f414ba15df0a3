//! Email transport channel.
//!
//! An email account doubles as a slow, best-effort broadcast medium. Packets
//! are sealed by the [`crate::envelope::EnvelopeCodec`], sent from the acting
//! user to their hierarchy peers, and picked up again by polling the inbox
//! for tagged subjects.
//!
//! - [`MailTransport`] is the provider seam: OAuth consent, send, list
//! - [`gmail::GmailTransport`] talks to the Gmail REST API
//! - [`memory::MemoryMailbox`] is an in-process mailbox for tests
//! - [`EmailChannel`] holds the session token and implements broadcast,
//!   polling and deduplication

pub mod channel;
pub mod gmail;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use fieldtrack_core::Email;
use secrecy::SecretString;
use thiserror::Error;

pub use channel::{BroadcastOutcome, EmailChannel, PAGE_SIZE, ReceiveSummary};
pub use gmail::GmailTransport;
pub use memory::{MemoryMailbox, StaticConsent};

/// Seconds before expiry at which a token is treated as expired.
const EXPIRY_BUFFER_SECS: i64 = 60;

/// Errors from the mail provider.
#[derive(Debug, Error)]
pub enum MailError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider answered with an error.
    #[error("mail API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The user declined or the consent flow failed.
    #[error("consent failed: {0}")]
    Consent(String),

    /// The message could not be built.
    #[error("failed to build message: {0}")]
    Message(String),

    /// Failed to parse a provider response.
    #[error("parse error: {0}")]
    Parse(String),

    /// No valid token for this session.
    #[error("not authenticated")]
    NotAuthenticated,
}

/// Access token for the mail provider.
#[derive(Clone)]
pub struct MailToken {
    pub access_token: SecretString,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for MailToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailToken")
            .field("access_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl MailToken {
    /// A token valid for `lifetime` from now.
    #[must_use]
    pub fn new(access_token: SecretString, lifetime: Duration) -> Self {
        Self {
            access_token,
            expires_at: Utc::now() + lifetime,
        }
    }

    /// Whether the token is expired or expires within a minute.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at - Duration::seconds(EXPIRY_BUFFER_SECS)
    }
}

/// One message to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    /// Primary recipient; also the sending account.
    pub to: Email,
    pub bcc: Vec<Email>,
    pub subject: String,
    pub body: String,
}

/// One message found in the inbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    pub id: String,
    pub subject: Option<String>,
    /// Full plain-text body, when the provider returned it.
    pub body: Option<String>,
    /// Provider preview; may be truncated.
    pub snippet: Option<String>,
}

/// Interactive step of the OAuth consent flow.
#[async_trait]
pub trait ConsentPrompt: Send + Sync {
    /// Show `authorization_url` to the user and return the code they obtained.
    async fn request_code(&self, authorization_url: &str) -> Result<String, MailError>;
}

/// Mail provider operations.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Run the consent flow and return a token.
    async fn authorize(&self, prompt: &dyn ConsentPrompt) -> Result<MailToken, MailError>;

    /// Send one message.
    async fn send(&self, token: &MailToken, mail: OutgoingMail) -> Result<(), MailError>;

    /// Messages matching `query`, newest first, at most `max_results`.
    async fn list_messages(
        &self,
        token: &MailToken,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<MailMessage>, MailError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_expiry_buffer() {
        let fresh = MailToken::new(SecretString::from("t".to_string()), Duration::hours(1));
        assert!(!fresh.is_expired());

        let nearly = MailToken::new(SecretString::from("t".to_string()), Duration::seconds(30));
        assert!(nearly.is_expired());
    }

    #[test]
    fn test_token_debug_redacts() {
        let token = MailToken::new(
            SecretString::from("ya29.secret-token".to_string()),
            Duration::hours(1),
        );
        let debug_output = format!("{token:?}");
        assert!(!debug_output.contains("ya29"));
        assert!(debug_output.contains("[REDACTED]"));
    }
}
