//! Organization (tenant) records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::OrganizationId;
use super::record::{Collection, Record};

/// A tenant. Its users may only sign in once it has been approved, except for
/// the system-global organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
    #[serde(default)]
    pub approved: bool,
    pub created_at: DateTime<Utc>,
}

impl Organization {
    /// A freshly registered, unapproved organization.
    #[must_use]
    pub fn register(name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: OrganizationId::generate(),
            name: name.into(),
            approved: false,
            created_at: now,
        }
    }

    /// The system-global organization. Always approved.
    #[must_use]
    pub fn system(now: DateTime<Utc>) -> Self {
        Self {
            id: OrganizationId::system(),
            name: "System".to_string(),
            approved: true,
            created_at: now,
        }
    }

    /// Whether users of this organization may authenticate.
    #[must_use]
    pub fn allows_sign_in(&self) -> bool {
        self.approved || self.id.is_system()
    }
}

impl Record for Organization {
    const COLLECTION: Collection = Collection::Organizations;

    fn id(&self) -> &str {
        self.id.as_str()
    }

    fn organization_id(&self) -> &OrganizationId {
        &self.id
    }
}
