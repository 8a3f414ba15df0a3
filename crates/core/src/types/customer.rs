//! Customer records.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::email::Email;
use super::id::{CustomerId, OrganizationId, UserId};
use super::record::{Collection, Record};

/// A competitor present at the customer and its estimated share.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompetitorShare {
    pub name: String,
    /// Share of the customer's spend, in percent.
    pub share_percent: Decimal,
}

/// A customer account owned by an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub organization_id: OrganizationId,
    pub created_by: UserId,
    pub name: String,
    pub contact_person: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<Email>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    #[serde(default)]
    pub competitors: Vec<CompetitorShare>,
    /// Estimated yearly business potential.
    pub annual_potential: Decimal,
    pub created_at: DateTime<Utc>,
}

impl Customer {
    /// Sum of all recorded competitor shares, in percent.
    #[must_use]
    pub fn competitor_share_total(&self) -> Decimal {
        self.competitors.iter().map(|c| c.share_percent).sum()
    }
}

impl Record for Customer {
    const COLLECTION: Collection = Collection::Customers;

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
    fn test_competitor_share_total() {
        let customer = Customer {
            id: CustomerId::new("c1"),
            organization_id: OrganizationId::new("acme"),
            created_by: UserId::new("u1"),
            name: "Globex".to_string(),
            contact_person: "Hank".to_string(),
            phone: None,
            email: None,
            address: None,
            industry: None,
            competitors: vec![
                CompetitorShare {
                    name: "Initech".to_string(),
                    share_percent: Decimal::new(305, 1),
                },
                CompetitorShare {
                    name: "Umbrella".to_string(),
                    share_percent: Decimal::new(20, 0),
                },
            ],
            annual_potential: Decimal::new(125_000, 0),
            created_at: Utc::now(),
        };
        assert_eq!(customer.competitor_share_total(), Decimal::new(505, 1));
    }
}
