//! Encrypted text envelopes for sync packets.
//!
//! An envelope is what travels through a text-only channel such as email:
//!
//! - subject: `[FieldTrack-Sync] <packet type> <RFC 3339 timestamp>`
//! - body: base64 of `nonce || ciphertext`, wrapped at 76 columns
//!
//! The ciphertext is AES-256-GCM over the packet's JSON form, keyed with the
//! deployment-wide envelope key. Nothing of the payload appears in clear text.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::SecondsFormat;
use fieldtrack_core::SyncPacket;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};

use crate::config::ConfigError;

/// Prefix identifying sync envelopes among ordinary mail.
pub const SUBJECT_TAG: &str = "[FieldTrack-Sync]";

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const LINE_WIDTH: usize = 76;

/// A framed, encrypted packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub subject: String,
    pub body: String,
}

/// Encrypts and frames packets, and reverses the process.
#[derive(Clone)]
pub struct EnvelopeCodec {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for EnvelopeCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeCodec")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl EnvelopeCodec {
    #[must_use]
    pub fn new(key: &[u8; KEY_LEN]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    /// Build a codec from the base64 key held in configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEnvVar` if the key is not base64 or does
    /// not decode to 32 bytes.
    pub fn from_base64_key(key: &SecretString) -> Result<Self, ConfigError> {
        let invalid = |reason: String| {
            ConfigError::InvalidEnvVar("FIELDTRACK_ENVELOPE_KEY".to_string(), reason)
        };
        let raw = STANDARD
            .decode(key.expose_secret().trim().as_bytes())
            .map_err(|e| invalid(e.to_string()))?;
        let key: [u8; KEY_LEN] = raw
            .as_slice()
            .try_into()
            .map_err(|_| invalid(format!("must decode to {KEY_LEN} bytes")))?;
        Ok(Self::new(&key))
    }

    /// Encrypt and frame a packet.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Serialization` if the packet cannot be rendered as
    /// JSON, or `SyncError::Integrity` if encryption fails.
    pub fn encode(&self, packet: &SyncPacket) -> crate::error::Result<Envelope> {
        let plaintext = serde_json::to_vec(packet)?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_ref())
            .map_err(|_| crate::SyncError::Integrity("envelope encryption failed".to_string()))?;

        let mut framed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        framed.extend_from_slice(&nonce_bytes);
        framed.extend_from_slice(&ciphertext);

        Ok(Envelope {
            subject: subject_for(packet),
            body: wrap_lines(&STANDARD.encode(framed)),
        })
    }

    /// Decrypt an envelope body back into a packet.
    ///
    /// Returns `None` for anything that is not a well-formed envelope sealed
    /// with this codec's key. Never panics on arbitrary input.
    #[must_use]
    pub fn decode(&self, body: &str) -> Option<SyncPacket> {
        let compact: String = body.chars().filter(|c| !c.is_whitespace()).collect();
        let framed = STANDARD.decode(compact.as_bytes()).ok()?;
        if framed.len() <= NONCE_LEN {
            return None;
        }
        let (nonce_bytes, ciphertext) = framed.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .ok()?;
        serde_json::from_slice(&plaintext).ok()
    }
}

/// Mailbox search query matching every envelope subject.
#[must_use]
pub fn search_query() -> String {
    format!("subject:\"{SUBJECT_TAG}\"")
}

/// Whether a subject line belongs to a sync envelope.
#[must_use]
pub fn is_envelope_subject(subject: &str) -> bool {
    subject.trim_start().starts_with(SUBJECT_TAG)
}

fn subject_for(packet: &SyncPacket) -> String {
    format!(
        "{SUBJECT_TAG} {} {}",
        packet.kind(),
        packet.sent_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    )
}

fn wrap_lines(encoded: &str) -> String {
    // base64 output is ASCII, so byte chunks are char boundaries
    encoded
        .as_bytes()
        .chunks(LINE_WIDTH)
        .map(|line| String::from_utf8_lossy(line).into_owned())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};
    use fieldtrack_core::{
        Attachment, AttachmentPayload, CompetitorShare, ConversionDetails, Customer, CustomerId,
        Email, Hierarchy, MediaKind, NewProjectDetails, OrganizationId, PacketPayload, Plan,
        PlanDetails, PlanId, RetentionDetails, Role, StatusUpdate, User, UserId,
    };
    use rust_decimal::Decimal;

    use super::*;

    fn codec() -> EnvelopeCodec {
        EnvelopeCodec::new(&[42u8; KEY_LEN])
    }

    fn packet() -> SyncPacket {
        let customer = Customer {
            id: CustomerId::new("c1"),
            organization_id: OrganizationId::new("acme"),
            created_by: UserId::new("u1"),
            name: "Globex Confidential".to_string(),
            contact_person: "Hank".to_string(),
            phone: Some("+1 555 0100".to_string()),
            email: None,
            address: None,
            industry: Some("Chemicals".to_string()),
            competitors: Vec::new(),
            annual_potential: Decimal::new(250_000, 0),
            created_at: Utc.with_ymd_and_hms(2026, 4, 1, 8, 30, 0).unwrap(),
        };
        SyncPacket::new(
            PacketPayload::Customer(customer),
            Email::parse("rep@acme.io").unwrap(),
            Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let codec = codec();
        let envelope = codec.encode(&packet()).unwrap();
        assert_eq!(codec.decode(&envelope.body), Some(packet()));
    }

    fn plan(id: &str, details: PlanDetails) -> Plan {
        Plan {
            id: PlanId::new(id),
            organization_id: OrganizationId::new("acme"),
            customer_id: CustomerId::new("c1"),
            created_by: UserId::new("u1"),
            details,
            status: "quoted".to_string(),
            status_updates: vec![
                StatusUpdate {
                    status: "open".to_string(),
                    updated_by: UserId::new("u1"),
                    updated_at: Utc.with_ymd_and_hms(2026, 4, 2, 10, 0, 0).unwrap(),
                },
                StatusUpdate {
                    status: "quoted".to_string(),
                    updated_by: UserId::new("u2"),
                    updated_at: Utc.with_ymd_and_hms(2026, 4, 9, 16, 45, 12).unwrap(),
                },
            ],
            attachments: vec![
                Attachment::inline("site.jpg", MediaKind::Image, (0..=255).collect()),
                Attachment::inline("empty.bin", MediaKind::Other, Vec::new()),
                Attachment {
                    name: "quote.pdf".to_string(),
                    media_kind: MediaKind::Document,
                    payload: AttachmentPayload::Remote {
                        url: "https://blobs.example/plans/p1/quote.pdf".to_string(),
                    },
                },
            ],
            created_at: Utc.with_ymd_and_hms(2026, 4, 2, 9, 0, 0).unwrap(),
        }
    }

    fn registration() -> User {
        User {
            id: UserId::new("u7"),
            email: Email::parse("new.rep@acme.io").unwrap(),
            name: "Nia Newcomer".to_string(),
            password_hash: "$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA".to_string(),
            role: Role::SalesEngineer,
            organization_id: OrganizationId::new("acme"),
            approved: false,
            hierarchy: Hierarchy {
                manager_email: Some("boss@acme.io".to_string()),
                ..Hierarchy::default()
            },
            created_at: Utc.with_ymd_and_hms(2026, 4, 3, 7, 15, 0).unwrap(),
        }
    }

    #[test]
    fn test_roundtrip_every_payload_kind() {
        let codec = codec();
        let mut customer = match packet().payload {
            PacketPayload::Customer(customer) => customer,
            other => panic!("unexpected payload {other:?}"),
        };
        customer.competitors = vec![CompetitorShare {
            name: "Initech".to_string(),
            share_percent: Decimal::new(375, 1),
        }];

        let payloads = vec![
            PacketPayload::Customer(customer),
            PacketPayload::UserRegistration(registration()),
            PacketPayload::Plan(plan(
                "p1",
                PlanDetails::NewProject(NewProjectDetails {
                    project_name: "Line 4".to_string(),
                    application: "Cutting fluid".to_string(),
                    expected_volume: Decimal::new(12_500, 1),
                    target_price: Some(Decimal::new(399, 2)),
                    expected_start: NaiveDate::from_ymd_opt(2026, 9, 1),
                }),
            )),
            PacketPayload::Plan(plan(
                "p2",
                PlanDetails::Conversion(ConversionDetails {
                    current_supplier: "Initech".to_string(),
                    current_product: "Lube 9".to_string(),
                    proposed_product: "Coolant X".to_string(),
                    volume: Decimal::new(800, 0),
                    expected_conversion: None,
                }),
            )),
            PacketPayload::Plan(plan(
                "p3",
                PlanDetails::Retention(RetentionDetails {
                    product: "Coolant X".to_string(),
                    current_volume: Decimal::new(1200, 0),
                    competitor_threat: Some("Initech".to_string()),
                    actions: vec!["Site visit".to_string(), "Price review".to_string()],
                }),
            )),
        ];

        for payload in payloads {
            let kind = payload.kind();
            let packet = SyncPacket::new(
                payload,
                Email::parse("rep@acme.io").unwrap(),
                Utc.with_ymd_and_hms(2026, 4, 10, 12, 0, 0).unwrap(),
            );
            let envelope = codec.encode(&packet).unwrap();
            assert!(envelope.subject.contains(kind.as_str()), "{}", envelope.subject);
            assert_eq!(codec.decode(&envelope.body), Some(packet));
        }
    }

    #[test]
    fn test_subject_format_and_no_plaintext() {
        let envelope = codec().encode(&packet()).unwrap();

        assert_eq!(
            envelope.subject,
            "[FieldTrack-Sync] customer 2026-04-01T09:00:00Z"
        );
        assert!(is_envelope_subject(&envelope.subject));
        assert!(!envelope.body.contains("Globex"));
        assert!(!envelope.subject.contains("Globex"));
        assert!(envelope.body.lines().all(|l| l.len() <= LINE_WIDTH));
    }

    #[test]
    fn test_nonce_differs_per_encode() {
        let codec = codec();
        let a = codec.encode(&packet()).unwrap();
        let b = codec.encode(&packet()).unwrap();
        assert_ne!(a.body, b.body);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let codec = codec();
        assert_eq!(codec.decode(""), None);
        assert_eq!(codec.decode("hello there, not an envelope"), None);
        assert_eq!(codec.decode("AAAA"), None);
        assert_eq!(codec.decode(&STANDARD.encode([0u8; 64])), None);
        assert_eq!(codec.decode("\u{1F600}\u{0}\u{FFFF}"), None);
    }

    #[test]
    fn test_decode_rejects_other_key() {
        let envelope = codec().encode(&packet()).unwrap();
        let other = EnvelopeCodec::new(&[7u8; KEY_LEN]);
        assert_eq!(other.decode(&envelope.body), None);
    }

    #[test]
    fn test_decode_rejects_tampered_body() {
        let codec = codec();
        let envelope = codec.encode(&packet()).unwrap();
        let mut raw = STANDARD.decode(envelope.body.replace('\n', "")).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        assert_eq!(codec.decode(&STANDARD.encode(raw)), None);
    }

    #[test]
    fn test_from_base64_key() {
        let key = SecretString::from(STANDARD.encode([42u8; KEY_LEN]));
        let from_config = EnvelopeCodec::from_base64_key(&key).unwrap();
        let envelope = codec().encode(&packet()).unwrap();
        assert_eq!(from_config.decode(&envelope.body), Some(packet()));

        let short = SecretString::from(STANDARD.encode([1u8; 8]));
        assert!(EnvelopeCodec::from_base64_key(&short).is_err());
    }

    #[test]
    fn test_search_query() {
        assert_eq!(search_query(), "subject:\"[FieldTrack-Sync]\"");
    }
}
