//! In-process mailbox.
//!
//! Every sent message is also delivered to the shared inbox, so one
//! `MemoryMailbox` stands in for the accounts of a whole organization.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Duration;
use secrecy::SecretString;

use super::{ConsentPrompt, MailError, MailMessage, MailToken, MailTransport, OutgoingMail};

const SNIPPET_LEN: usize = 200;

#[derive(Default)]
struct MailboxState {
    sent: Vec<OutgoingMail>,
    inbox: Vec<MailMessage>,
    next_id: u64,
    last_max_results: Option<usize>,
}

/// Mail transport held in memory.
#[derive(Clone, Default)]
pub struct MemoryMailbox {
    state: Arc<Mutex<MailboxState>>,
    fail_auth: Arc<AtomicBool>,
}

impl std::fmt::Debug for MemoryMailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("MemoryMailbox")
            .field("sent", &state.sent.len())
            .field("inbox", &state.inbox.len())
            .finish_non_exhaustive()
    }
}

impl MemoryMailbox {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the consent flow fail.
    pub fn set_fail_auth(&self, fail: bool) {
        self.fail_auth.store(fail, Ordering::SeqCst);
    }

    /// Messages sent so far, oldest first.
    #[must_use]
    pub fn sent(&self) -> Vec<OutgoingMail> {
        self.lock().sent.clone()
    }

    /// Put a message in the inbox; returns its id.
    pub fn deliver(&self, subject: &str, body: &str) -> String {
        let mut state = self.lock();
        let id = next_id(&mut state);
        state.inbox.push(MailMessage {
            id: id.clone(),
            subject: Some(subject.to_string()),
            body: Some(body.to_string()),
            snippet: Some(body.chars().take(SNIPPET_LEN).collect()),
        });
        id
    }

    /// Put a fully specified message in the inbox.
    pub fn deliver_message(&self, message: MailMessage) {
        self.lock().inbox.push(message);
    }

    /// `max_results` of the most recent listing.
    #[must_use]
    pub fn last_max_results(&self) -> Option<usize> {
        self.lock().last_max_results
    }

    fn lock(&self) -> MutexGuard<'_, MailboxState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn next_id(state: &mut MailboxState) -> String {
    state.next_id += 1;
    format!("m{}", state.next_id)
}

/// The quoted term of a `subject:"..."` query, or the bare query.
fn subject_filter(query: &str) -> &str {
    let term = query.strip_prefix("subject:").unwrap_or(query);
    term.trim_matches('"')
}

#[async_trait]
impl MailTransport for MemoryMailbox {
    async fn authorize(&self, prompt: &dyn ConsentPrompt) -> Result<MailToken, MailError> {
        if self.fail_auth.load(Ordering::SeqCst) {
            return Err(MailError::Consent("access_denied".to_string()));
        }
        let code = prompt.request_code("memory://consent").await?;
        if code.trim().is_empty() {
            return Err(MailError::Consent("no authorization code entered".to_string()));
        }
        Ok(MailToken::new(
            SecretString::from(format!("memory-{}", code.trim())),
            Duration::hours(1),
        ))
    }

    async fn send(&self, token: &MailToken, mail: OutgoingMail) -> Result<(), MailError> {
        if token.is_expired() {
            return Err(MailError::NotAuthenticated);
        }
        let mut state = self.lock();
        let id = next_id(&mut state);
        state.inbox.push(MailMessage {
            id,
            subject: Some(mail.subject.clone()),
            body: Some(mail.body.clone()),
            snippet: Some(mail.body.chars().take(SNIPPET_LEN).collect()),
        });
        state.sent.push(mail);
        Ok(())
    }

    async fn list_messages(
        &self,
        token: &MailToken,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<MailMessage>, MailError> {
        if token.is_expired() {
            return Err(MailError::NotAuthenticated);
        }
        let filter = subject_filter(query);
        let mut state = self.lock();
        state.last_max_results = Some(max_results);
        Ok(state
            .inbox
            .iter()
            .rev()
            .filter(|m| m.subject.as_deref().is_some_and(|s| s.contains(filter)))
            .take(max_results)
            .cloned()
            .collect())
    }
}

/// Consent prompt that always answers with the same code.
#[derive(Debug, Clone)]
pub struct StaticConsent {
    code: String,
}

impl StaticConsent {
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self { code: code.into() }
    }
}

#[async_trait]
impl ConsentPrompt for StaticConsent {
    async fn request_code(&self, _authorization_url: &str) -> Result<String, MailError> {
        Ok(self.code.clone())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use fieldtrack_core::Email;

    use super::*;

    #[tokio::test]
    async fn test_list_filters_by_subject_newest_first() {
        let mailbox = MemoryMailbox::new();
        let token = mailbox.authorize(&StaticConsent::new("c")).await.unwrap();

        mailbox.deliver("[FieldTrack-Sync] plan a", "one");
        mailbox.deliver("Lunch?", "two");
        mailbox
            .send(
                &token,
                OutgoingMail {
                    to: Email::parse("rep@acme.io").unwrap(),
                    bcc: Vec::new(),
                    subject: "[FieldTrack-Sync] customer b".to_string(),
                    body: "three".to_string(),
                },
            )
            .await
            .unwrap();

        let listed = mailbox
            .list_messages(&token, "subject:\"[FieldTrack-Sync]\"", 10)
            .await
            .unwrap();
        let bodies: Vec<_> = listed.iter().filter_map(|m| m.body.as_deref()).collect();
        assert_eq!(bodies, vec!["three", "one"]);

        let limited = mailbox
            .list_messages(&token, "subject:\"[FieldTrack-Sync]\"", 1)
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_code_rejected() {
        let mailbox = MemoryMailbox::new();
        assert!(mailbox.authorize(&StaticConsent::new("  ")).await.is_err());
    }
}
