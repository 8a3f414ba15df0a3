//! Email channel commands.
//!
//! The mail token lives for one process only, so `poll` runs the consent
//! flow itself before reading the inbox.

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use fieldtrack_sync::mail::{ConsentPrompt, GmailTransport, MailError};
use fieldtrack_sync::{EmailChannel, EnvelopeCodec, SyncConfig};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use super::{CliError, connect};

/// Asks for the authorization code on the terminal.
struct TerminalConsent;

#[async_trait]
impl ConsentPrompt for TerminalConsent {
    async fn request_code(&self, authorization_url: &str) -> Result<String, MailError> {
        {
            let mut out = std::io::stdout().lock();
            writeln!(out, "Open this URL to authorize FieldTrack:\n\n  {authorization_url}\n")
                .and_then(|()| write!(out, "Paste the code or the full redirect URL: "))
                .and_then(|()| out.flush())
                .map_err(|e| MailError::Consent(e.to_string()))?;
        }

        let mut line = String::new();
        BufReader::new(tokio::io::stdin())
            .read_line(&mut line)
            .await
            .map_err(|e| MailError::Consent(e.to_string()))?;
        Ok(line.trim().to_string())
    }
}

fn channel(config: &SyncConfig) -> Result<EmailChannel, CliError> {
    let mail = config.mail().ok_or(CliError::MailNotConfigured)?;
    let codec = EnvelopeCodec::from_base64_key(&config.envelope_key)?;
    Ok(EmailChannel::new(
        Arc::new(GmailTransport::new(mail.clone())),
        codec,
    ))
}

/// Run the consent flow once.
///
/// # Errors
///
/// Returns `SyncError::AuthRequired` if consent fails.
pub async fn authorize(config: &SyncConfig) -> Result<(), CliError> {
    channel(config)?.authenticate(&TerminalConsent).await?;
    info!("Email channel authorized");
    Ok(())
}

/// Authorize, then fold up to `limit` recent envelopes into the replica.
///
/// # Errors
///
/// Returns an error if consent or listing fails.
pub async fn poll(config: &SyncConfig, limit: usize) -> Result<(), CliError> {
    let channel = channel(config)?;
    let engine = connect(config).await?;

    channel.authenticate(&TerminalConsent).await?;
    let summary = channel.receive_into(engine.store(), limit).await?;

    let mut out = std::io::stdout().lock();
    writeln!(out, "received:        {}", summary.received)?;
    writeln!(out, "inserted:        {}", summary.inserted)?;
    writeln!(out, "merged:          {}", summary.merged)?;
    writeln!(out, "unchanged:       {}", summary.unchanged)?;
    writeln!(out, "skipped:         {}", summary.skipped)?;
    writeln!(out, "decode failures: {}", channel.decode_failures())?;
    Ok(())
}
