//! End-to-end scenario: an organization registers, gets approved, and its
//! field rep keeps working after the remote store goes away.

#![allow(clippy::unwrap_used)]

use fieldtrack_core::{Email, Hierarchy, Role};
use fieldtrack_integration_tests::{ROOT_EMAIL, ROOT_PASSWORD, TestContext, customer};
use fieldtrack_sync::{AccountError, LocalOnlyReason, SyncState, WriteOutcome, resolve_recipients};

#[tokio::test]
async fn test_acme_registration_to_offline_customer() {
    let ctx = TestContext::connected().unwrap();
    assert_eq!(ctx.engine.init().await.unwrap(), SyncState::Connected);

    // Registration leaves the organization pending
    let (acme, _) = ctx
        .accounts
        .register_organization("Acme", "boss@acme.io", "Bea Boss", "acme-pass-1")
        .await
        .unwrap();
    assert!(matches!(
        ctx.accounts.login("boss@acme.io", "acme-pass-1").await,
        Err(AccountError::PendingApproval(_))
    ));

    // The super-admin approves it
    let root = ctx.accounts.login(ROOT_EMAIL, ROOT_PASSWORD).await.unwrap();
    ctx.accounts
        .approve_organization(&root, &acme.id)
        .await
        .unwrap();
    let boss = ctx.accounts.login("boss@acme.io", "acme-pass-1").await.unwrap();

    // A field rep joins, reporting to the org-admin
    let rep = ctx
        .accounts
        .register_user(&acme.id, "rep@acme.io", "Rita Rep", "rep-pass-12", Role::FieldSales)
        .await
        .unwrap();
    ctx.accounts.approve_user(&boss, &rep.id).await.unwrap();
    ctx.accounts
        .set_hierarchy(
            &boss,
            &rep.id,
            Hierarchy {
                manager_email: Some("boss@acme.io".to_string()),
                ..Hierarchy::default()
            },
        )
        .await
        .unwrap();
    let rep = ctx.accounts.login("rep@acme.io", "rep-pass-12").await.unwrap();

    // The remote store starts rejecting writes
    ctx.remote.set_fail_writes(true);
    let outcome = ctx
        .tracker
        .add_customer(&rep, customer("globex", &acme.id, &rep.id))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        WriteOutcome::LocalOnly {
            reason: LocalOnlyReason::RemoteFailed
        }
    );
    assert_eq!(ctx.engine.mode(), SyncState::Degraded);
    assert!(
        ctx.store()
            .customers()
            .iter()
            .any(|c| c.id.as_str() == "globex")
    );

    let recipients = resolve_recipients(&rep);
    assert!(recipients.contains(&Email::parse("rep@acme.io").unwrap()));
    assert!(recipients.contains(&Email::parse("boss@acme.io").unwrap()));
}
