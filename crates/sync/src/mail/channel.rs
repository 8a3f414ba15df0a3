//! Broadcast and inbox polling over a mail transport.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use fieldtrack_core::{Email, PacketPayload, SyncPacket, User};
use moka::future::Cache;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use super::{ConsentPrompt, MailError, MailToken, MailTransport, OutgoingMail};
use crate::envelope::{self, EnvelopeCodec};
use crate::error::{Result, SyncError};
use crate::hierarchy::resolve_recipients;
use crate::store::{Confirmation, LocalReplicaStore, Mutation};

/// Upper bound on messages requested per poll.
pub const PAGE_SIZE: usize = 50;

const SEEN_CAPACITY: u64 = 10_000;
const SEEN_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Result of [`EmailChannel::broadcast`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastOutcome {
    /// Nobody to notify; nothing was sent.
    Skipped,
    /// One message went out, addressed to this many recipients in total.
    Sent { recipients: usize },
}

/// Counts from one [`EmailChannel::receive_into`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiveSummary {
    /// New packets decoded from the inbox.
    pub received: usize,
    /// Records absent locally and inserted.
    pub inserted: usize,
    /// Existing plans that gained status entries or attachments.
    pub merged: usize,
    /// Packets that changed nothing.
    pub unchanged: usize,
    /// Packets whose organization is unknown locally.
    pub skipped: usize,
}

struct Inner {
    transport: Arc<dyn MailTransport>,
    codec: EnvelopeCodec,
    token: RwLock<Option<MailToken>>,
    seen_messages: Cache<String, ()>,
    seen_packets: Cache<String, ()>,
    decode_failures: AtomicU64,
}

/// Email account used as a broadcast medium between hierarchy peers.
///
/// Holds the session token obtained by [`EmailChannel::authenticate`] and
/// remembers which messages and packets it has already returned, so a
/// message delivered twice is only folded in once.
#[derive(Clone)]
pub struct EmailChannel {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for EmailChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailChannel")
            .field("codec", &self.inner.codec)
            .field("decode_failures", &self.decode_failures())
            .finish_non_exhaustive()
    }
}

impl EmailChannel {
    #[must_use]
    pub fn new(transport: Arc<dyn MailTransport>, codec: EnvelopeCodec) -> Self {
        let seen = || {
            Cache::builder()
                .max_capacity(SEEN_CAPACITY)
                .time_to_live(SEEN_TTL)
                .build()
        };

        Self {
            inner: Arc::new(Inner {
                transport,
                codec,
                token: RwLock::new(None),
                seen_messages: seen(),
                seen_packets: seen(),
                decode_failures: AtomicU64::new(0),
            }),
        }
    }

    /// Run the provider's consent flow and keep the token for this session.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::AuthRequired` if consent fails. The flow is not
    /// retried.
    #[instrument(skip(self, prompt))]
    pub async fn authenticate(&self, prompt: &dyn ConsentPrompt) -> Result<()> {
        match self.inner.transport.authorize(prompt).await {
            Ok(token) => {
                info!(expires_at = %token.expires_at, "Email channel authorized");
                *self.inner.token.write().await = Some(token);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Email authorization failed");
                Err(SyncError::AuthRequired(e.to_string()))
            }
        }
    }

    /// Whether a usable token is held.
    pub async fn is_authenticated(&self) -> bool {
        self.inner
            .token
            .read()
            .await
            .as_ref()
            .is_some_and(|token| !token.is_expired())
    }

    /// Envelopes that could not be decoded since the channel was created.
    #[must_use]
    pub fn decode_failures(&self) -> u64 {
        self.inner.decode_failures.load(Ordering::Relaxed)
    }

    /// Send `packet` to the hierarchy peers of `actor`.
    ///
    /// One message goes out with the actor as primary recipient and every
    /// other peer blind-copied.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::AuthRequired` without a valid session token and
    /// `SyncError::Mail` if the provider rejects the message.
    pub async fn broadcast(&self, packet: &SyncPacket, actor: &User) -> Result<BroadcastOutcome> {
        self.broadcast_to(packet, actor, resolve_recipients(actor))
            .await
    }

    /// Send `packet` to an already resolved recipient set.
    ///
    /// # Errors
    ///
    /// Same as [`EmailChannel::broadcast`].
    #[instrument(skip_all, fields(kind = %packet.kind(), actor = %actor.email, recipients = recipients.len()))]
    pub async fn broadcast_to(
        &self,
        packet: &SyncPacket,
        actor: &User,
        recipients: BTreeSet<Email>,
    ) -> Result<BroadcastOutcome> {
        if recipients.is_empty() {
            debug!("No recipients; broadcast skipped");
            return Ok(BroadcastOutcome::Skipped);
        }

        let token = self.token().await?;
        let envelope = self.inner.codec.encode(packet)?;

        let mail = OutgoingMail {
            to: actor.email.clone(),
            bcc: recipients
                .iter()
                .filter(|email| **email != actor.email)
                .cloned()
                .collect(),
            subject: envelope.subject,
            body: envelope.body,
        };

        match self.inner.transport.send(&token, mail).await {
            Ok(()) => {
                info!(recipients = recipients.len(), "Broadcast sent");
                Ok(BroadcastOutcome::Sent {
                    recipients: recipients.len(),
                })
            }
            Err(e) => Err(self.transport_error(e).await),
        }
    }

    /// Decode the newest tagged messages not seen before.
    ///
    /// At most `limit` messages are listed, capped at [`PAGE_SIZE`]. Messages
    /// that fail to decode are skipped and counted.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::AuthRequired` without a valid session token and
    /// `SyncError::Mail` if listing fails.
    #[instrument(skip(self))]
    pub async fn fetch_recent(&self, limit: usize) -> Result<Vec<SyncPacket>> {
        let token = self.token().await?;
        let messages = match self
            .inner
            .transport
            .list_messages(&token, &envelope::search_query(), limit.min(PAGE_SIZE))
            .await
        {
            Ok(messages) => messages,
            Err(e) => return Err(self.transport_error(e).await),
        };

        let mut packets = Vec::new();
        for message in messages {
            if self.inner.seen_messages.contains_key(&message.id) {
                continue;
            }
            self.inner.seen_messages.insert(message.id.clone(), ()).await;

            if let Some(subject) = &message.subject
                && !envelope::is_envelope_subject(subject)
            {
                debug!(message = %message.id, "Ignoring untagged message");
                continue;
            }

            let text = message
                .body
                .filter(|body| !body.trim().is_empty())
                .or(message.snippet)
                .unwrap_or_default();

            let Some(packet) = self.inner.codec.decode(&text) else {
                self.inner.decode_failures.fetch_add(1, Ordering::Relaxed);
                debug!(message = %message.id, "Skipping undecodable envelope");
                continue;
            };

            let fingerprint = fingerprint(&packet)?;
            if self.inner.seen_packets.contains_key(&fingerprint) {
                debug!(message = %message.id, "Skipping re-delivered packet");
                continue;
            }
            self.inner.seen_packets.insert(fingerprint, ()).await;
            packets.push(packet);
        }

        debug!(count = packets.len(), "Fetched packets");
        Ok(packets)
    }

    /// Fetch new packets and fold them into `store`.
    ///
    /// Absent records are inserted as unconfirmed. Existing plans gain any
    /// missing status entries and attachments; existing users and customers
    /// keep their local version.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`EmailChannel::fetch_recent`].
    #[instrument(skip(self, store))]
    pub async fn receive_into(&self, store: &LocalReplicaStore, limit: usize) -> Result<ReceiveSummary> {
        let mut summary = ReceiveSummary::default();

        for packet in self.fetch_recent(limit).await? {
            summary.received += 1;
            let snapshot = store.snapshot();

            let (mutation, merged) = match packet.payload {
                PacketPayload::Plan(incoming) => match snapshot.plan(&incoming.id) {
                    Some(local) => {
                        let mut local = local.clone();
                        if !local.absorb(&incoming) {
                            summary.unchanged += 1;
                            continue;
                        }
                        (Mutation::Plan(local), true)
                    }
                    None => (Mutation::Plan(incoming), false),
                },
                PacketPayload::Customer(incoming) => {
                    if snapshot.customer(&incoming.id).is_some() {
                        summary.unchanged += 1;
                        continue;
                    }
                    (Mutation::Customer(incoming), false)
                }
                PacketPayload::UserRegistration(incoming) => {
                    if snapshot.user(&incoming.id).is_some() {
                        summary.unchanged += 1;
                        continue;
                    }
                    (Mutation::User(incoming), false)
                }
            };

            match store.apply_local(mutation, Confirmation::Pending).await {
                Ok(()) if merged => summary.merged += 1,
                Ok(()) => summary.inserted += 1,
                Err(SyncError::Integrity(reason)) => {
                    debug!(%reason, "Skipping packet for unknown organization");
                    summary.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            received = summary.received,
            inserted = summary.inserted,
            merged = summary.merged,
            "Inbox folded into replica"
        );
        Ok(summary)
    }

    async fn token(&self) -> Result<MailToken> {
        match self.inner.token.read().await.as_ref() {
            Some(token) if !token.is_expired() => Ok(token.clone()),
            Some(_) => Err(SyncError::AuthRequired("session token expired".to_string())),
            None => Err(SyncError::AuthRequired("not authenticated".to_string())),
        }
    }

    /// Map a provider error, dropping the token when it was rejected.
    async fn transport_error(&self, error: MailError) -> SyncError {
        match error {
            MailError::NotAuthenticated | MailError::Api { status: 401, .. } => {
                warn!(error = %error, "Mail provider rejected the session token");
                *self.inner.token.write().await = None;
                SyncError::AuthRequired(error.to_string())
            }
            other => SyncError::Mail(other),
        }
    }
}

fn fingerprint(packet: &SyncPacket) -> Result<String> {
    let bytes = serde_json::to_vec(packet)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}
