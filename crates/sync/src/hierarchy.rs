//! Recipient resolution over the organizational hierarchy.
//!
//! Hierarchy links are stored on each user as raw address strings. Two views
//! are offered: [`resolve_recipients`] looks only at one user's own links,
//! while [`HierarchyGraph`] builds the directed manager → subordinate relation
//! across a whole user set so links recorded on either end are honoured.

use std::collections::{BTreeMap, BTreeSet};

use fieldtrack_core::{Email, User};

/// Compute the addresses that must receive a change made by `user`.
///
/// The result contains the user's own address, the manager (if any) and
/// every subordinate across all tiers. Entries that are not valid addresses
/// are dropped. An empty set means "do not broadcast".
#[must_use]
pub fn resolve_recipients(user: &User) -> BTreeSet<Email> {
    let mut recipients = BTreeSet::new();
    recipients.insert(user.email.clone());

    let links = user
        .hierarchy
        .manager_email
        .as_deref()
        .into_iter()
        .chain(user.hierarchy.subordinates());

    for raw in links {
        match Email::parse(raw) {
            Ok(email) => {
                recipients.insert(email);
            }
            Err(e) => {
                tracing::debug!(user = %user.email, entry = raw, error = %e, "Skipping invalid hierarchy address");
            }
        }
    }

    recipients
}

/// Directed manager → subordinate relation keyed by address.
#[derive(Debug, Clone, Default)]
pub struct HierarchyGraph {
    managers: BTreeMap<Email, Email>,
    subordinates: BTreeMap<Email, BTreeSet<Email>>,
}

impl HierarchyGraph {
    /// Build the relation from every user's recorded links.
    ///
    /// A link is taken from the subordinate's `manager_email` as well as from
    /// the manager's subordinate lists. When a subordinate names a manager
    /// explicitly, that entry wins over lists kept on other users.
    #[must_use]
    pub fn from_users<'a>(users: impl IntoIterator<Item = &'a User>) -> Self {
        let mut graph = Self::default();
        let mut declared = Vec::new();

        for user in users {
            if let Some(manager) = user
                .hierarchy
                .manager_email
                .as_deref()
                .and_then(|raw| Email::parse(raw).ok())
            {
                declared.push((manager, user.email.clone()));
            }
            for subordinate in user
                .hierarchy
                .subordinates()
                .filter_map(|raw| Email::parse(raw).ok())
            {
                graph.link(&user.email, subordinate);
            }
        }

        for (manager, subordinate) in declared {
            graph.link(&manager, subordinate);
        }

        graph
    }

    fn link(&mut self, manager: &Email, subordinate: Email) {
        if *manager == subordinate {
            return;
        }
        if let Some(previous) = self.managers.insert(subordinate.clone(), manager.clone())
            && previous != *manager
            && let Some(reports) = self.subordinates.get_mut(&previous)
        {
            reports.remove(&subordinate);
        }
        self.subordinates
            .entry(manager.clone())
            .or_default()
            .insert(subordinate);
    }

    /// The manager of `email`, if one is recorded.
    #[must_use]
    pub fn manager_of(&self, email: &Email) -> Option<&Email> {
        self.managers.get(email)
    }

    /// Direct subordinates of `email`.
    pub fn subordinates_of(&self, email: &Email) -> impl Iterator<Item = &Email> {
        self.subordinates.get(email).into_iter().flatten()
    }

    /// Self, manager and direct subordinates of `email`.
    #[must_use]
    pub fn recipients_for(&self, email: &Email) -> BTreeSet<Email> {
        let mut recipients = BTreeSet::new();
        recipients.insert(email.clone());
        if let Some(manager) = self.manager_of(email) {
            recipients.insert(manager.clone());
        }
        recipients.extend(self.subordinates_of(email).cloned());
        recipients
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;
    use fieldtrack_core::{Hierarchy, OrganizationId, Role, UserId};

    use super::*;

    fn user(email: &str, hierarchy: Hierarchy) -> User {
        User {
            id: UserId::generate(),
            email: Email::parse(email).unwrap(),
            name: email.to_string(),
            password_hash: String::new(),
            role: Role::FieldSales,
            organization_id: OrganizationId::new("acme"),
            approved: true,
            hierarchy,
            created_at: Utc::now(),
        }
    }

    fn emails(list: &[&str]) -> BTreeSet<Email> {
        list.iter().map(|e| Email::parse(e).unwrap()).collect()
    }

    #[test]
    fn test_resolve_includes_self() {
        let rep = user("rep@acme.io", Hierarchy::default());
        assert_eq!(resolve_recipients(&rep), emails(&["rep@acme.io"]));
    }

    #[test]
    fn test_resolve_includes_manager_and_all_tiers() {
        let rsm = user(
            "rsm@acme.io",
            Hierarchy {
                manager_email: Some("vp@acme.io".to_string()),
                regional_sales_managers: Vec::new(),
                sales_engineers: vec!["se@acme.io".to_string()],
                dealers: vec!["dealer@acme.io".to_string()],
                field_sales: vec!["fs1@acme.io".to_string(), "fs2@acme.io".to_string()],
            },
        );

        assert_eq!(
            resolve_recipients(&rsm),
            emails(&[
                "rsm@acme.io",
                "vp@acme.io",
                "se@acme.io",
                "dealer@acme.io",
                "fs1@acme.io",
                "fs2@acme.io",
            ])
        );
    }

    #[test]
    fn test_resolve_excludes_invalid_and_deduplicates() {
        let rep = user(
            "rep@acme.io",
            Hierarchy {
                manager_email: Some("not-an-address".to_string()),
                field_sales: vec![
                    "FS@Acme.io".to_string(),
                    "fs@acme.io ".to_string(),
                    String::new(),
                    "rep@acme.io".to_string(),
                ],
                ..Hierarchy::default()
            },
        );

        assert_eq!(
            resolve_recipients(&rep),
            emails(&["rep@acme.io", "fs@acme.io"])
        );
    }

    #[test]
    fn test_resolve_is_order_independent() {
        let forward = user(
            "rep@acme.io",
            Hierarchy {
                dealers: vec!["a@acme.io".to_string(), "b@acme.io".to_string()],
                field_sales: vec!["c@acme.io".to_string()],
                ..Hierarchy::default()
            },
        );
        let reversed = user(
            "rep@acme.io",
            Hierarchy {
                dealers: vec!["c@acme.io".to_string()],
                field_sales: vec!["b@acme.io".to_string(), "a@acme.io".to_string()],
                ..Hierarchy::default()
            },
        );

        assert_eq!(resolve_recipients(&forward), resolve_recipients(&reversed));
    }

    #[test]
    fn test_graph_links_from_both_ends() {
        let manager = user(
            "mgr@acme.io",
            Hierarchy {
                field_sales: vec!["a@acme.io".to_string()],
                ..Hierarchy::default()
            },
        );
        let b = user(
            "b@acme.io",
            Hierarchy {
                manager_email: Some("mgr@acme.io".to_string()),
                ..Hierarchy::default()
            },
        );

        let graph = HierarchyGraph::from_users([&manager, &b]);
        let mgr = Email::parse("mgr@acme.io").unwrap();

        assert_eq!(
            graph.subordinates_of(&mgr).cloned().collect::<BTreeSet<_>>(),
            emails(&["a@acme.io", "b@acme.io"])
        );
        assert_eq!(
            graph.manager_of(&Email::parse("a@acme.io").unwrap()),
            Some(&mgr)
        );
        assert_eq!(
            graph.recipients_for(&Email::parse("b@acme.io").unwrap()),
            emails(&["b@acme.io", "mgr@acme.io"])
        );
    }

    #[test]
    fn test_graph_declared_manager_wins() {
        let old = user(
            "old@acme.io",
            Hierarchy {
                dealers: vec!["d@acme.io".to_string()],
                ..Hierarchy::default()
            },
        );
        let dealer = user(
            "d@acme.io",
            Hierarchy {
                manager_email: Some("new@acme.io".to_string()),
                ..Hierarchy::default()
            },
        );

        let graph = HierarchyGraph::from_users([&dealer, &old]);
        let d = Email::parse("d@acme.io").unwrap();

        assert_eq!(graph.manager_of(&d), Some(&Email::parse("new@acme.io").unwrap()));
        assert_eq!(
            graph
                .subordinates_of(&Email::parse("old@acme.io").unwrap())
                .count(),
            0
        );
    }
}
