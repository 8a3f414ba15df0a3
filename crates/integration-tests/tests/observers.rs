//! Change notification registration.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use fieldtrack_core::{Collection, Organization, UserId};
use fieldtrack_integration_tests::{TestContext, customer};
use fieldtrack_sync::ChangeKind;
use fieldtrack_sync::mail::MemoryMailbox;

#[tokio::test]
async fn test_deregistered_observers_receive_nothing() {
    let ctx = TestContext::offline(MemoryMailbox::new()).unwrap();
    ctx.engine.init().await.unwrap();

    let mut acme = Organization::register("Acme", chrono::Utc::now());
    acme.approved = true;
    let org = acme.id.clone();

    let kept = Arc::new(AtomicUsize::new(0));
    let dropped = Arc::new(AtomicUsize::new(0));
    let upserts = Arc::new(std::sync::Mutex::new(Vec::new()));

    let kept_subscription = {
        let kept = Arc::clone(&kept);
        let upserts = Arc::clone(&upserts);
        ctx.store().subscribe(move |event| {
            kept.fetch_add(1, Ordering::SeqCst);
            if let ChangeKind::Upsert { collection, id } = &event.kind {
                upserts.lock().unwrap().push((*collection, id.clone()));
            }
        })
    };
    let dropped_subscription = {
        let dropped = Arc::clone(&dropped);
        ctx.store().subscribe(move |_| {
            dropped.fetch_add(1, Ordering::SeqCst);
        })
    };

    ctx.engine.write(acme.into()).await.unwrap();
    assert_eq!(kept.load(Ordering::SeqCst), 1);
    assert_eq!(dropped.load(Ordering::SeqCst), 1);

    dropped_subscription.unsubscribe();
    ctx.engine
        .write(customer("c1", &org, &UserId::new("u1")).into())
        .await
        .unwrap();

    assert_eq!(kept.load(Ordering::SeqCst), 2);
    assert_eq!(dropped.load(Ordering::SeqCst), 1);
    assert_eq!(
        upserts.lock().unwrap().last(),
        Some(&(Collection::Customers, "c1".to_string()))
    );

    // Dropping the handle deregisters too
    drop(kept_subscription);
    ctx.engine
        .write(customer("c2", &org, &UserId::new("u1")).into())
        .await
        .unwrap();
    assert_eq!(kept.load(Ordering::SeqCst), 2);
}
