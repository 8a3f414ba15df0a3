//! Writes against a healthy remote store.

#![allow(clippy::unwrap_used)]

use fieldtrack_core::{Attachment, Collection, MediaKind, OrganizationId, PlanId, UserId};
use fieldtrack_integration_tests::{ROOT_EMAIL, ROOT_PASSWORD, TestContext, customer, retention_plan};
use fieldtrack_sync::{SyncState, WriteOutcome};
use serde_json::Value;

fn by_id(mut documents: Vec<Value>) -> Vec<Value> {
    documents.sort_by(|a, b| a["id"].as_str().cmp(&b["id"].as_str()));
    documents
}

#[tokio::test]
async fn test_successful_writes_leave_replica_equal_to_remote() {
    let ctx = TestContext::connected().unwrap();
    ctx.engine.init().await.unwrap();

    let (acme, _) = ctx
        .accounts
        .register_organization("Acme", "boss@acme.io", "Bea Boss", "acme-pass-1")
        .await
        .unwrap();
    let root = ctx.accounts.login(ROOT_EMAIL, ROOT_PASSWORD).await.unwrap();
    ctx.accounts.approve_organization(&root, &acme.id).await.unwrap();

    let author = UserId::new("u-field");
    for id in ["c1", "c2", "c3"] {
        let outcome = ctx
            .tracker
            .add_customer(&root, customer(id, &acme.id, &author))
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Confirmed);
    }

    let mut plan = retention_plan("p1", &customer("c1", &acme.id, &author));
    plan.attachments
        .push(Attachment::inline("site.jpg", MediaKind::Image, vec![0xff, 0xd8]));
    ctx.tracker.add_plan(&root, plan).await.unwrap();
    ctx.tracker
        .update_plan_status(&root, &PlanId::new("p1"), "negotiating")
        .await
        .unwrap();

    assert_eq!(ctx.engine.mode(), SyncState::Connected);
    assert_eq!(ctx.blobs.len(), 1);

    let snapshot = ctx.store().snapshot();
    for collection in [Collection::Customers, Collection::Plans] {
        let local: Vec<Value> = snapshot
            .ids(collection)
            .iter()
            .map(|id| snapshot.mutation_for(collection, id).unwrap().to_document().unwrap())
            .collect();
        assert_eq!(by_id(local), by_id(ctx.remote.documents(collection)), "{collection}");
    }

    // Organizations and users written remotely match too; the seeded system
    // records exist only locally.
    for collection in [Collection::Organizations, Collection::Users] {
        for document in ctx.remote.documents(collection) {
            let id = document["id"].as_str().unwrap();
            let local = snapshot.mutation_for(collection, id).unwrap().to_document().unwrap();
            assert_eq!(local, document);
        }
    }
    assert!(snapshot.organization(&OrganizationId::system()).is_some());
}
