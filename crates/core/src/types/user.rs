//! User records and their hierarchy links.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::email::Email;
use super::id::{OrganizationId, UserId};
use super::record::{Collection, Record};
use super::role::Role;

/// Manager/subordinate links attached to a user.
///
/// Entries are raw strings as entered by administrators; they are validated
/// when recipients are resolved, not when stored, so one malformed entry never
/// blocks a hierarchy update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Hierarchy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manager_email: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub regional_sales_managers: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sales_engineers: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dealers: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub field_sales: Vec<String>,
}

impl Hierarchy {
    /// Every subordinate entry across all tiers, in tier order.
    pub fn subordinates(&self) -> impl Iterator<Item = &str> {
        self.regional_sales_managers
            .iter()
            .chain(&self.sales_engineers)
            .chain(&self.dealers)
            .chain(&self.field_sales)
            .map(String::as_str)
    }

    /// Whether no manager and no subordinates are recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.manager_email.is_none() && self.subordinates().next().is_none()
    }
}

/// A user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: Email,
    pub name: String,
    /// Argon2id PHC string.
    pub password_hash: String,
    pub role: Role,
    pub organization_id: OrganizationId,
    #[serde(default)]
    pub approved: bool,
    #[serde(default)]
    pub hierarchy: Hierarchy,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Whether this user administers every organization.
    #[must_use]
    pub fn is_super_admin(&self) -> bool {
        self.role == Role::SuperAdmin
    }
}

impl Record for User {
    const COLLECTION: Collection = Collection::Users;

    fn id(&self) -> &str {
        self.id.as_str()
    }

    fn organization_id(&self) -> &OrganizationId {
        &self.organization_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subordinates_span_all_tiers() {
        let hierarchy = Hierarchy {
            manager_email: None,
            regional_sales_managers: vec!["rsm@acme.io".to_string()],
            sales_engineers: vec!["se@acme.io".to_string()],
            dealers: vec!["dealer@acme.io".to_string()],
            field_sales: vec!["fs@acme.io".to_string()],
        };
        let all: Vec<&str> = hierarchy.subordinates().collect();
        assert_eq!(all, ["rsm@acme.io", "se@acme.io", "dealer@acme.io", "fs@acme.io"]);
        assert!(!hierarchy.is_empty());
    }

    #[test]
    fn test_missing_hierarchy_deserializes_empty() {
        let json = serde_json::json!({
            "id": "u1",
            "email": "rep@acme.io",
            "name": "Rep",
            "password_hash": "x",
            "role": "field_sales",
            "organization_id": "acme",
            "created_at": "2026-01-05T10:00:00Z"
        });
        let user: User = serde_json::from_value(json).expect("valid user document");
        assert!(user.hierarchy.is_empty());
        assert!(!user.approved);
    }
}
