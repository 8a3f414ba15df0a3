//! User roles.

use serde::{Deserialize, Serialize};

/// Role of a user inside an organization.
///
/// Variants are declared from most to least privileged, so the derived
/// ordering can be used for "at least" checks: `role <= Role::OrgAdmin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Global administrator; approves organizations.
    SuperAdmin,
    /// Administrator of a single organization; approves its users.
    OrgAdmin,
    RegionalSalesManager,
    SalesEngineer,
    Dealer,
    FieldSales,
}

impl Role {
    /// All roles in privilege order.
    pub const ALL: [Self; 6] = [
        Self::SuperAdmin,
        Self::OrgAdmin,
        Self::RegionalSalesManager,
        Self::SalesEngineer,
        Self::Dealer,
        Self::FieldSales,
    ];

    /// Whether this role may approve users of its own organization.
    #[must_use]
    pub const fn can_approve_users(self) -> bool {
        matches!(self, Self::SuperAdmin | Self::OrgAdmin)
    }

    /// Stable string form, matching the serialized representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SuperAdmin => "super_admin",
            Self::OrgAdmin => "org_admin",
            Self::RegionalSalesManager => "regional_sales_manager",
            Self::SalesEngineer => "sales_engineer",
            Self::Dealer => "dealer",
            Self::FieldSales => "field_sales",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| format!("invalid role: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_privilege_ordering() {
        assert!(Role::SuperAdmin < Role::OrgAdmin);
        assert!(Role::OrgAdmin < Role::FieldSales);
        assert!(Role::Dealer < Role::FieldSales);
    }

    #[test]
    fn test_round_trips_through_str() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>(), Ok(role));
        }
        assert!("owner".parse::<Role>().is_err());
    }

    #[test]
    fn test_serde_matches_display() {
        let json = serde_json::to_string(&Role::RegionalSalesManager).unwrap_or_default();
        assert_eq!(json, "\"regional_sales_manager\"");
    }
}
