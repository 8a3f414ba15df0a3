//! Plan records: the sales opportunities tracked against a customer.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::id::{CustomerId, OrganizationId, PlanId, UserId};
use super::record::{Collection, Record};

/// Plan variant tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanKind {
    NewProject,
    Conversion,
    Retention,
}

impl PlanKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NewProject => "new_project",
            Self::Conversion => "conversion",
            Self::Retention => "retention",
        }
    }
}

/// Winning a brand-new application at the customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProjectDetails {
    pub project_name: String,
    pub application: String,
    pub expected_volume: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_start: Option<NaiveDate>,
}

/// Converting the customer away from a competitor's product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionDetails {
    pub current_supplier: String,
    pub current_product: String,
    pub proposed_product: String,
    pub volume: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_conversion: Option<NaiveDate>,
}

/// Keeping existing business that is at risk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionDetails {
    pub product: String,
    pub current_volume: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub competitor_threat: Option<String>,
    #[serde(default)]
    pub actions: Vec<String>,
}

/// Tag-specific technical and commercial attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlanDetails {
    NewProject(NewProjectDetails),
    Conversion(ConversionDetails),
    Retention(RetentionDetails),
}

impl PlanDetails {
    #[must_use]
    pub const fn kind(&self) -> PlanKind {
        match self {
            Self::NewProject(_) => PlanKind::NewProject,
            Self::Conversion(_) => PlanKind::Conversion,
            Self::Retention(_) => PlanKind::Retention,
        }
    }
}

/// One entry of a plan's status log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: String,
    pub updated_by: UserId,
    pub updated_at: DateTime<Utc>,
}

/// Broad media type of an attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Document,
    Audio,
    Video,
    #[default]
    Other,
}

impl MediaKind {
    /// Content type used when uploading a payload of this kind.
    #[must_use]
    pub const fn content_type(self) -> &'static str {
        match self {
            Self::Image => "image/*",
            Self::Document => "application/pdf",
            Self::Audio => "audio/*",
            Self::Video => "video/*",
            Self::Other => "application/octet-stream",
        }
    }
}

/// Where an attachment's bytes live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttachmentPayload {
    /// Bytes carried inside the record (not yet uploaded).
    Inline {
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    /// Durable pointer into blob storage. Never re-uploaded.
    Remote { url: String },
}

/// A file attached to a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    #[serde(default)]
    pub media_kind: MediaKind,
    pub payload: AttachmentPayload,
}

impl Attachment {
    /// An attachment whose bytes still need uploading.
    #[must_use]
    pub fn inline(name: impl Into<String>, media_kind: MediaKind, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            media_kind,
            payload: AttachmentPayload::Inline { data },
        }
    }

    #[must_use]
    pub const fn is_remote(&self) -> bool {
        matches!(self.payload, AttachmentPayload::Remote { .. })
    }
}

/// A sales plan against a customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    pub organization_id: OrganizationId,
    pub customer_id: CustomerId,
    pub created_by: UserId,
    pub details: PlanDetails,
    pub status: String,
    #[serde(default)]
    pub status_updates: Vec<StatusUpdate>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub created_at: DateTime<Utc>,
}

impl Plan {
    #[must_use]
    pub const fn kind(&self) -> PlanKind {
        self.details.kind()
    }

    /// Set the current status and append it to the status log.
    pub fn record_status(&mut self, status: impl Into<String>, by: UserId, at: DateTime<Utc>) {
        let status = status.into();
        self.status.clone_from(&status);
        self.status_updates.push(StatusUpdate {
            status,
            updated_by: by,
            updated_at: at,
        });
    }

    /// Fold entries from another copy of the same plan into this one.
    ///
    /// Missing status-log entries are inserted in chronological order and
    /// attachments unknown by name are appended. Returns whether anything
    /// changed. The current status follows the newest log entry.
    pub fn absorb(&mut self, other: &Self) -> bool {
        let mut changed = false;

        for update in &other.status_updates {
            if !self.status_updates.contains(update) {
                self.status_updates.push(update.clone());
                changed = true;
            }
        }
        if changed {
            self.status_updates.sort_by_key(|u| u.updated_at);
            if let Some(latest) = self.status_updates.last() {
                self.status.clone_from(&latest.status);
            }
        }

        for attachment in &other.attachments {
            if !self.attachments.iter().any(|a| a.name == attachment.name) {
                self.attachments.push(attachment.clone());
                changed = true;
            }
        }

        changed
    }
}

impl Record for Plan {
    const COLLECTION: Collection = Collection::Plans;

    fn id(&self) -> &str {
        self.id.as_str()
    }

    fn organization_id(&self) -> &OrganizationId {
        &self.organization_id
    }
}

/// Serde adapter storing binary payloads as standard base64 text.
mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
