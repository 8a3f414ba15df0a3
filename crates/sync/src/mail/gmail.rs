//! Gmail REST implementation of the mail transport.
//!
//! # OAuth Flow
//!
//! 1. Build the consent URL with [`GmailTransport::authorization_url`]
//! 2. The user approves and is redirected with `?code=...&state=...`
//! 3. The code (or the whole redirect URL) is handed back through the
//!    [`ConsentPrompt`]
//! 4. [`GmailTransport::exchange_code`] trades it for an access token
//!
//! Messages are built with lettre as RFC 5322 text and submitted as
//! base64url `raw` payloads.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use chrono::Duration;
use lettre::Message;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use rand::RngCore;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use super::{ConsentPrompt, MailError, MailMessage, MailToken, MailTransport, OutgoingMail};
use crate::config::MailConfig;

const AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
const SCOPES: &str =
    "https://www.googleapis.com/auth/gmail.send https://www.googleapis.com/auth/gmail.readonly";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    /// Token lifetime in seconds.
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct FullMessage {
    id: String,
    #[serde(default)]
    snippet: Option<String>,
    #[serde(default)]
    payload: Option<MessagePart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagePart {
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    headers: Vec<Header>,
    #[serde(default)]
    body: Option<PartBody>,
    #[serde(default)]
    parts: Vec<MessagePart>,
}

#[derive(Debug, Deserialize)]
struct Header {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct PartBody {
    #[serde(default)]
    data: Option<String>,
}

/// Gmail API client.
#[derive(Clone)]
pub struct GmailTransport {
    client: Client,
    config: MailConfig,
}

impl std::fmt::Debug for GmailTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GmailTransport")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl GmailTransport {
    #[must_use]
    pub fn new(config: MailConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    /// The consent URL the user must open.
    ///
    /// `state` is echoed back on the redirect and checked on return.
    #[must_use]
    pub fn authorization_url(&self, state: &str) -> String {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", SCOPES)
            .append_pair("access_type", "online")
            .append_pair("prompt", "consent")
            .append_pair("state", state)
            .finish();
        format!("{AUTH_ENDPOINT}?{query}")
    }

    /// Exchange an authorization code for an access token.
    ///
    /// # Errors
    ///
    /// Returns `MailError::Consent` if the provider rejects the code.
    #[instrument(skip(self, code))]
    pub async fn exchange_code(&self, code: &str) -> Result<MailToken, MailError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.expose_secret()),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ];

        let response = self.client.post(TOKEN_ENDPOINT).form(&params).send().await?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(MailError::Consent(format!("Token exchange failed: {text}")));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| MailError::Parse(e.to_string()))?;
        Ok(MailToken::new(
            SecretString::from(token.access_token),
            Duration::seconds(token.expires_in),
        ))
    }

    async fn fetch_message(&self, token: &MailToken, id: &str) -> Result<MailMessage, MailError> {
        let mut url = api_url(&["messages", id])?;
        url.query_pairs_mut().append_pair("format", "full");

        let response = self
            .client
            .get(url)
            .bearer_auth(token.access_token.expose_secret())
            .send()
            .await?;
        let message: FullMessage = check(response)
            .await?
            .json()
            .await
            .map_err(|e| MailError::Parse(e.to_string()))?;

        let payload = message.payload.unwrap_or_default();
        Ok(MailMessage {
            id: message.id,
            subject: header(&payload, "Subject"),
            body: plain_body(&payload),
            snippet: message.snippet,
        })
    }
}

#[async_trait]
impl MailTransport for GmailTransport {
    #[instrument(skip(self, prompt))]
    async fn authorize(&self, prompt: &dyn ConsentPrompt) -> Result<MailToken, MailError> {
        let mut bytes = [0u8; 16];
        rand::rng().fill_bytes(&mut bytes);
        let state = hex::encode(bytes);

        let answer = prompt.request_code(&self.authorization_url(&state)).await?;
        let code = extract_code(&answer, &state)?;
        self.exchange_code(&code).await
    }

    #[instrument(skip(self, token, mail), fields(bcc = mail.bcc.len()))]
    async fn send(&self, token: &MailToken, mail: OutgoingMail) -> Result<(), MailError> {
        let raw = URL_SAFE.encode(build_message(&mail)?.formatted());

        let response = self
            .client
            .post(api_url(&["messages", "send"])?)
            .bearer_auth(token.access_token.expose_secret())
            .json(&serde_json::json!({ "raw": raw }))
            .send()
            .await?;
        check(response).await?;
        debug!("Envelope sent");
        Ok(())
    }

    #[instrument(skip(self, token))]
    async fn list_messages(
        &self,
        token: &MailToken,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<MailMessage>, MailError> {
        let mut url = api_url(&["messages"])?;
        url.query_pairs_mut()
            .append_pair("q", query)
            .append_pair("maxResults", &max_results.to_string());

        let response = self
            .client
            .get(url)
            .bearer_auth(token.access_token.expose_secret())
            .send()
            .await?;
        let list: ListResponse = check(response)
            .await?
            .json()
            .await
            .map_err(|e| MailError::Parse(e.to_string()))?;

        let mut messages = Vec::with_capacity(list.messages.len());
        for reference in list.messages.into_iter().take(max_results) {
            messages.push(self.fetch_message(token, &reference.id).await?);
        }
        Ok(messages)
    }
}

fn api_url(segments: &[&str]) -> Result<Url, MailError> {
    let mut url = Url::parse(API_BASE).map_err(|e| MailError::Parse(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|()| MailError::Parse("API base cannot carry a path".to_string()))?
        .extend(segments);
    Ok(url)
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, MailError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(MailError::Api {
        status: status.as_u16(),
        message,
    })
}

fn mailbox(email: &fieldtrack_core::Email) -> Result<Mailbox, MailError> {
    email
        .as_str()
        .parse()
        .map_err(|e: lettre::address::AddressError| MailError::Message(e.to_string()))
}

/// Build the RFC 5322 message, keeping the Bcc header for the provider.
fn build_message(mail: &OutgoingMail) -> Result<Message, MailError> {
    let sender = mailbox(&mail.to)?;
    let mut builder = Message::builder()
        .from(sender.clone())
        .to(sender)
        .subject(mail.subject.clone())
        .keep_bcc();
    for recipient in &mail.bcc {
        builder = builder.bcc(mailbox(recipient)?);
    }
    builder
        .header(ContentType::TEXT_PLAIN)
        .body(mail.body.clone())
        .map_err(|e| MailError::Message(e.to_string()))
}

/// Accept either a bare code or the full redirect URL.
fn extract_code(answer: &str, expected_state: &str) -> Result<String, MailError> {
    let answer = answer.trim();
    if answer.is_empty() {
        return Err(MailError::Consent("no authorization code entered".to_string()));
    }

    let Ok(url) = Url::parse(answer) else {
        return Ok(answer.to_string());
    };

    let mut code = None;
    let mut state = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => return Err(MailError::Consent(value.into_owned())),
            _ => {}
        }
    }

    if state.as_deref() != Some(expected_state) {
        return Err(MailError::Consent("state mismatch in redirect".to_string()));
    }
    code.ok_or_else(|| MailError::Consent("redirect carried no code".to_string()))
}

fn header(part: &MessagePart, name: &str) -> Option<String> {
    part.headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.clone())
}

/// The first plain-text body in the MIME tree.
fn plain_body(part: &MessagePart) -> Option<String> {
    let is_plain = part
        .mime_type
        .as_deref()
        .is_none_or(|mime| mime.starts_with("text/plain"));
    if is_plain
        && part.parts.is_empty()
        && let Some(text) = part.body.as_ref().and_then(|b| b.data.as_deref()).and_then(decode_data)
    {
        return Some(text);
    }
    part.parts.iter().find_map(plain_body)
}

fn decode_data(data: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD
        .decode(data.trim_end_matches('=').as_bytes())
        .ok()?;
    String::from_utf8(bytes).ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use fieldtrack_core::Email;

    use super::*;

    fn transport() -> GmailTransport {
        GmailTransport::new(MailConfig {
            client_id: "client-123.apps.test".to_string(),
            client_secret: SecretString::from("s3cr3t-Zq8!vT2#".to_string()),
            redirect_uri: "http://localhost:8765/callback".to_string(),
        })
    }

    #[test]
    fn test_authorization_url_encodes_params() {
        let url = transport().authorization_url("abc123");
        assert!(url.starts_with(AUTH_ENDPOINT));
        assert!(url.contains("client_id=client-123.apps.test"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A8765%2Fcallback"));
        assert!(url.contains("state=abc123"));
        assert!(url.contains("gmail.send"));
    }

    #[test]
    fn test_extract_code_from_redirect() {
        let code = extract_code(
            "http://localhost:8765/callback?state=xyz&code=4%2F0Ab",
            "xyz",
        )
        .unwrap();
        assert_eq!(code, "4/0Ab");

        assert!(extract_code("http://localhost/cb?state=other&code=1", "xyz").is_err());
        assert!(extract_code("http://localhost/cb?error=access_denied", "xyz").is_err());
        assert_eq!(extract_code("  raw-code ", "xyz").unwrap(), "raw-code");
        assert!(extract_code("   ", "xyz").is_err());
    }

    #[test]
    fn test_message_keeps_bcc() {
        let mail = OutgoingMail {
            to: Email::parse("rep@acme.io").unwrap(),
            bcc: vec![
                Email::parse("mgr@acme.io").unwrap(),
                Email::parse("se@acme.io").unwrap(),
            ],
            subject: "[FieldTrack-Sync] plan 2026-04-01T09:00:00Z".to_string(),
            body: "QUJD".to_string(),
        };
        let raw = String::from_utf8(build_message(&mail).unwrap().formatted()).unwrap();

        assert!(raw.contains("To: rep@acme.io"));
        assert!(raw.contains("From: rep@acme.io"));
        assert!(raw.contains("Bcc: mgr@acme.io, se@acme.io"));
        assert!(raw.contains("Subject: [FieldTrack-Sync] plan 2026-04-01T09:00:00Z"));
    }

    #[test]
    fn test_plain_body_prefers_text_part() {
        let encoded = URL_SAFE_NO_PAD.encode("envelope body");
        let json = serde_json::json!({
            "mimeType": "multipart/alternative",
            "headers": [{"name": "Subject", "value": "[FieldTrack-Sync] customer x"}],
            "parts": [
                {"mimeType": "text/html", "body": {"data": URL_SAFE_NO_PAD.encode("<p>x</p>")}},
                {"mimeType": "text/plain", "body": {"data": encoded}}
            ]
        });
        let part: MessagePart = serde_json::from_value(json).unwrap();

        assert_eq!(plain_body(&part).as_deref(), Some("envelope body"));
        assert_eq!(
            header(&part, "subject").as_deref(),
            Some("[FieldTrack-Sync] customer x")
        );
    }

    #[test]
    fn test_api_url() {
        let url = api_url(&["messages", "send"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://gmail.googleapis.com/gmail/v1/users/me/messages/send"
        );
    }
}
