//! The four synchronized collections and the trait tying records to them.

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use super::id::OrganizationId;

/// A named collection in the remote document store and the local replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Organizations,
    Users,
    Customers,
    Plans,
}

impl Collection {
    /// All collections, in load order (organizations first so references resolve).
    pub const ALL: [Self; 4] = [
        Self::Organizations,
        Self::Users,
        Self::Customers,
        Self::Plans,
    ];

    /// Collection name as used by the remote document store.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Organizations => "organizations",
            Self::Users => "users",
            Self::Customers => "customers",
            Self::Plans => "plans",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A document that lives in one of the synchronized collections.
pub trait Record: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The collection this record type is stored in.
    const COLLECTION: Collection;

    /// Document identifier.
    fn id(&self) -> &str;

    /// Organization that owns the record. Organizations own themselves.
    fn organization_id(&self) -> &OrganizationId;
}
