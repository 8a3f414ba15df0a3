//! The four collections held together as one consistent snapshot.

use fieldtrack_core::{
    Collection, Customer, CustomerId, Email, Organization, OrganizationId, Plan, PlanId, Record,
    User, UserId,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An add-or-update of one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Organization(Organization),
    User(User),
    Customer(Customer),
    Plan(Plan),
}

impl Mutation {
    #[must_use]
    pub const fn collection(&self) -> Collection {
        match self {
            Self::Organization(_) => Collection::Organizations,
            Self::User(_) => Collection::Users,
            Self::Customer(_) => Collection::Customers,
            Self::Plan(_) => Collection::Plans,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Organization(r) => r.id(),
            Self::User(r) => r.id(),
            Self::Customer(r) => r.id(),
            Self::Plan(r) => r.id(),
        }
    }

    #[must_use]
    pub fn organization_id(&self) -> &OrganizationId {
        match self {
            Self::Organization(r) => Record::organization_id(r),
            Self::User(r) => Record::organization_id(r),
            Self::Customer(r) => Record::organization_id(r),
            Self::Plan(r) => Record::organization_id(r),
        }
    }

    /// The record in document form.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be serialized.
    pub fn to_document(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::Organization(r) => serde_json::to_value(r),
            Self::User(r) => serde_json::to_value(r),
            Self::Customer(r) => serde_json::to_value(r),
            Self::Plan(r) => serde_json::to_value(r),
        }
    }

    /// Parse a document of `collection`.
    ///
    /// # Errors
    ///
    /// Returns an error if the document does not match the record shape.
    pub fn from_document(collection: Collection, document: Value) -> Result<Self, serde_json::Error> {
        Ok(match collection {
            Collection::Organizations => Self::Organization(serde_json::from_value(document)?),
            Collection::Users => Self::User(serde_json::from_value(document)?),
            Collection::Customers => Self::Customer(serde_json::from_value(document)?),
            Collection::Plans => Self::Plan(serde_json::from_value(document)?),
        })
    }
}

impl From<Organization> for Mutation {
    fn from(record: Organization) -> Self {
        Self::Organization(record)
    }
}

impl From<User> for Mutation {
    fn from(record: User) -> Self {
        Self::User(record)
    }
}

impl From<Customer> for Mutation {
    fn from(record: Customer) -> Self {
        Self::Customer(record)
    }
}

impl From<Plan> for Mutation {
    fn from(record: Plan) -> Self {
        Self::Plan(record)
    }
}

/// The in-memory contents of the replica.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    pub organizations: Vec<Organization>,
    pub users: Vec<User>,
    pub customers: Vec<Customer>,
    pub plans: Vec<Plan>,
}

impl Snapshot {
    #[must_use]
    pub fn organization(&self, id: &OrganizationId) -> Option<&Organization> {
        self.organizations.iter().find(|o| &o.id == id)
    }

    #[must_use]
    pub fn user(&self, id: &UserId) -> Option<&User> {
        self.users.iter().find(|u| &u.id == id)
    }

    /// First user registered under `email`, in any organization.
    #[must_use]
    pub fn user_by_email(&self, email: &Email) -> Option<&User> {
        self.users.iter().find(|u| &u.email == email)
    }

    #[must_use]
    pub fn customer(&self, id: &CustomerId) -> Option<&Customer> {
        self.customers.iter().find(|c| &c.id == id)
    }

    #[must_use]
    pub fn plan(&self, id: &PlanId) -> Option<&Plan> {
        self.plans.iter().find(|p| &p.id == id)
    }

    /// Number of records in `collection`.
    #[must_use]
    pub fn len(&self, collection: Collection) -> usize {
        match collection {
            Collection::Organizations => self.organizations.len(),
            Collection::Users => self.users.len(),
            Collection::Customers => self.customers.len(),
            Collection::Plans => self.plans.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        Collection::ALL.iter().all(|c| self.len(*c) == 0)
    }

    #[must_use]
    pub fn contains(&self, collection: Collection, id: &str) -> bool {
        self.ids(collection).iter().any(|existing| existing == id)
    }

    /// Ids of every record in `collection`, in stored order.
    #[must_use]
    pub fn ids(&self, collection: Collection) -> Vec<String> {
        match collection {
            Collection::Organizations => ids_of(&self.organizations),
            Collection::Users => ids_of(&self.users),
            Collection::Customers => ids_of(&self.customers),
            Collection::Plans => ids_of(&self.plans),
        }
    }

    /// A copy of one record wrapped as a mutation.
    #[must_use]
    pub fn mutation_for(&self, collection: Collection, id: &str) -> Option<Mutation> {
        match collection {
            Collection::Organizations => find(&self.organizations, id).map(Mutation::Organization),
            Collection::Users => find(&self.users, id).map(Mutation::User),
            Collection::Customers => find(&self.customers, id).map(Mutation::Customer),
            Collection::Plans => find(&self.plans, id).map(Mutation::Plan),
        }
    }

    /// Insert the record, or replace the one with the same id in place.
    pub fn upsert(&mut self, mutation: Mutation) {
        match mutation {
            Mutation::Organization(r) => upsert_into(&mut self.organizations, r),
            Mutation::User(r) => upsert_into(&mut self.users, r),
            Mutation::Customer(r) => upsert_into(&mut self.customers, r),
            Mutation::Plan(r) => upsert_into(&mut self.plans, r),
        }
    }

    /// Remove a record. Returns whether it was present.
    pub fn remove(&mut self, collection: Collection, id: &str) -> bool {
        match collection {
            Collection::Organizations => remove_from(&mut self.organizations, id),
            Collection::Users => remove_from(&mut self.users, id),
            Collection::Customers => remove_from(&mut self.customers, id),
            Collection::Plans => remove_from(&mut self.plans, id),
        }
    }
}

fn ids_of<R: Record>(records: &[R]) -> Vec<String> {
    records.iter().map(|r| r.id().to_string()).collect()
}

fn find<R: Record>(records: &[R], id: &str) -> Option<R> {
    records.iter().find(|r| r.id() == id).cloned()
}

fn upsert_into<R: Record>(records: &mut Vec<R>, record: R) {
    match records.iter_mut().find(|r| r.id() == record.id()) {
        Some(existing) => *existing = record,
        None => records.push(record),
    }
}

fn remove_from<R: Record>(records: &mut Vec<R>, id: &str) -> bool {
    let before = records.len();
    records.retain(|r| r.id() != id);
    records.len() != before
}

/// Overlay `fields` onto `base` one top-level field at a time.
///
/// Fields present in `fields` win; fields only present in `base` are kept.
/// The `id` field is never overwritten.
pub fn merge_fields(base: &mut Value, fields: &Map<String, Value>) {
    let Value::Object(target) = base else {
        *base = Value::Object(fields.clone());
        return;
    };
    for (key, value) in fields {
        if key == "id" && target.contains_key("id") {
            continue;
        }
        target.insert(key.clone(), value.clone());
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_upsert_replaces_in_place() {
        let mut snapshot = Snapshot::default();
        let mut acme = Organization::register("Acme", Utc::now());
        snapshot.upsert(Organization::system(Utc::now()).into());
        snapshot.upsert(acme.clone().into());

        acme.approved = true;
        snapshot.upsert(acme.clone().into());

        assert_eq!(snapshot.organizations.len(), 2);
        assert!(snapshot.organization(&acme.id).unwrap().approved);
        assert_eq!(snapshot.ids(Collection::Organizations)[1], acme.id.as_str());
    }

    #[test]
    fn test_remove_and_contains() {
        let mut snapshot = Snapshot::default();
        let org = Organization::system(Utc::now());
        snapshot.upsert(org.clone().into());

        assert!(snapshot.contains(Collection::Organizations, "system"));
        assert!(snapshot.remove(Collection::Organizations, "system"));
        assert!(!snapshot.remove(Collection::Organizations, "system"));
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_merge_fields_overlays_top_level() {
        let mut base = json!({"id": "c1", "name": "Globex", "phone": "1", "industry": "Oil"});
        let fields = json!({"id": "other", "name": "Globex Corp", "address": "Main St"});
        merge_fields(&mut base, fields.as_object().unwrap());

        assert_eq!(
            base,
            json!({"id": "c1", "name": "Globex Corp", "phone": "1", "industry": "Oil", "address": "Main St"})
        );
    }

    #[test]
    fn test_mutation_document_roundtrip() {
        let org = Organization::register("Acme", Utc::now());
        let mutation = Mutation::from(org);
        let document = mutation.to_document().unwrap();
        let back = Mutation::from_document(Collection::Organizations, document).unwrap();
        assert_eq!(back, mutation);
        assert_eq!(back.collection(), Collection::Organizations);
    }
}
