//! Fallback to local-only mode and device persistence.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use fieldtrack_core::{Collection, Organization, OrganizationId, UserId};
use fieldtrack_integration_tests::{ENVELOPE_KEY, TestContext, customer};
use fieldtrack_sync::mail::MemoryMailbox;
use fieldtrack_sync::remote::MemoryRemoteStore;
use fieldtrack_sync::store::{MemoryDeviceStorage, SNAPSHOT_KEY};
use fieldtrack_sync::{LocalOnlyReason, SyncError, SyncState, WriteOutcome};

async fn acme(ctx: &TestContext) -> OrganizationId {
    let mut organization = Organization::register("Acme", chrono::Utc::now());
    organization.approved = true;
    let id = organization.id.clone();
    ctx.engine.write(organization.into()).await.unwrap();
    id
}

#[tokio::test]
async fn test_failed_write_keeps_record_and_later_writes_persist() {
    let ctx = TestContext::connected().unwrap();
    ctx.engine.init().await.unwrap();
    let org = acme(&ctx).await;
    let author = UserId::new("u1");

    ctx.remote.set_fail_writes(true);
    let first = ctx
        .engine
        .write(customer("c1", &org, &author).into())
        .await
        .unwrap();
    assert_eq!(
        first,
        WriteOutcome::LocalOnly {
            reason: LocalOnlyReason::RemoteFailed
        }
    );
    assert_eq!(ctx.engine.mode(), SyncState::Degraded);

    // Writes are local-only now, even though the remote has recovered
    ctx.remote.set_fail_writes(false);
    let writes_before = ctx.remote.write_count();
    let second = ctx
        .engine
        .write(customer("c2", &org, &author).into())
        .await
        .unwrap();
    assert_eq!(
        second,
        WriteOutcome::LocalOnly {
            reason: LocalOnlyReason::Degraded
        }
    );
    assert_eq!(ctx.remote.write_count(), writes_before);
    assert!(ctx.device.contains(SNAPSHOT_KEY));
    assert!(!ctx.store().is_confirmed(Collection::Customers, "c2").await);

    // A restarted device that cannot reach the remote reloads both records
    let restarted = TestContext::assemble(
        Some(MemoryRemoteStore::new()),
        Arc::clone(&ctx.device),
        MemoryMailbox::new(),
        &ENVELOPE_KEY,
    )
    .unwrap();
    restarted.remote.set_fail_reads(true);
    assert!(matches!(
        restarted.engine.init().await,
        Err(SyncError::RemoteUnavailable(_))
    ));
    let ids = restarted.store().snapshot().ids(Collection::Customers);
    assert_eq!(ids, vec!["c1".to_string(), "c2".to_string()]);
}

#[tokio::test]
async fn test_reinitialize_pushes_unconfirmed_records() {
    let ctx = TestContext::connected().unwrap();
    ctx.engine.init().await.unwrap();
    let org = acme(&ctx).await;

    let author = UserId::new("u1");
    ctx.engine
        .write(customer("c0", &org, &author).into())
        .await
        .unwrap();
    assert!(ctx.store().is_confirmed(Collection::Customers, "c0").await);

    ctx.remote.set_fail_writes(true);
    ctx.engine
        .write(customer("c1", &org, &author).into())
        .await
        .unwrap();
    assert_eq!(ctx.engine.mode(), SyncState::Degraded);

    // Offline edit of a record the remote already holds
    let fields = serde_json::json!({"name": "Offline Rename", "industry": "Chemicals"});
    let outcome = ctx
        .engine
        .update_fields(
            Collection::Customers,
            "c0",
            fields.as_object().unwrap().clone(),
        )
        .await
        .unwrap();
    assert!(!outcome.is_confirmed());
    assert!(!ctx.store().is_confirmed(Collection::Customers, "c0").await);

    ctx.remote.set_fail_writes(false);
    assert_eq!(ctx.engine.reinitialize().await.unwrap(), SyncState::Connected);
    assert!(ctx.remote.document(Collection::Customers, "c1").is_some());
    assert!(ctx.store().is_confirmed(Collection::Customers, "c1").await);

    let snapshot = ctx.store().snapshot();
    let local = snapshot
        .mutation_for(Collection::Customers, "c0")
        .unwrap()
        .to_document()
        .unwrap();
    let remote = ctx.remote.document(Collection::Customers, "c0").unwrap();
    assert_eq!(local["name"], "Offline Rename");
    assert_eq!(local["industry"], "Chemicals");
    assert_eq!(remote, local);
    assert!(ctx.store().is_confirmed(Collection::Customers, "c0").await);
    assert!(ctx.store().unconfirmed_records().await.is_empty());
}

#[tokio::test]
async fn test_offline_device_starts_degraded_from_storage() {
    let device = Arc::new(MemoryDeviceStorage::new());
    device.set_fail_reads(true);
    let ctx = TestContext::assemble(None, device, MemoryMailbox::new(), &ENVELOPE_KEY).unwrap();

    assert_eq!(ctx.engine.init().await.unwrap(), SyncState::Degraded);
    // Unreadable storage still yields the seeded replica
    assert!(
        ctx.store()
            .snapshot()
            .organization(&OrganizationId::system())
            .is_some()
    );
    assert_eq!(ctx.store().users().len(), 1);
}
