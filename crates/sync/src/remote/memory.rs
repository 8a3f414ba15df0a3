//! In-process remote collaborators.
//!
//! Used by tests and demos in place of a real backend. Writes can be made to
//! fail on demand to exercise the engine's fallback to local-only mode.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use fieldtrack_core::Collection;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use super::{BlobStore, RemoteError, RemoteStore, SnapshotStream};
use crate::store::merge_fields;

const SUBSCRIPTION_BUFFER: usize = 16;

type Subscribers = HashMap<Collection, Vec<mpsc::Sender<Result<Vec<Value>, RemoteError>>>>;

#[derive(Default)]
struct State {
    collections: HashMap<Collection, BTreeMap<String, Value>>,
    subscribers: Subscribers,
}

/// Document store held in memory.
#[derive(Clone, Default)]
pub struct MemoryRemoteStore {
    state: Arc<Mutex<State>>,
    fail_reads: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
    writes: Arc<AtomicUsize>,
}

impl std::fmt::Debug for MemoryRemoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRemoteStore")
            .field("fail_reads", &self.fail_reads.load(Ordering::SeqCst))
            .field("fail_writes", &self.fail_writes.load(Ordering::SeqCst))
            .field("writes", &self.write_count())
            .finish_non_exhaustive()
    }
}

impl MemoryRemoteStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `fetch_all` and `subscribe` fail.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make `put` and `patch` fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes so far.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Insert a document directly, bypassing failure injection.
    pub fn seed(&self, collection: Collection, document: Value) {
        if let Some(id) = document.get("id").and_then(Value::as_str) {
            let id = id.to_string();
            self.lock()
                .collections
                .entry(collection)
                .or_default()
                .insert(id, document);
        }
    }

    /// The stored document, if any.
    #[must_use]
    pub fn document(&self, collection: Collection, id: &str) -> Option<Value> {
        self.lock()
            .collections
            .get(&collection)
            .and_then(|docs| docs.get(id))
            .cloned()
    }

    /// Every stored document of `collection`, ordered by id.
    #[must_use]
    pub fn documents(&self, collection: Collection) -> Vec<Value> {
        documents_of(&self.lock(), collection)
    }

    /// Drop all live subscriptions; their streams report closure.
    pub fn close_subscriptions(&self) {
        let mut state = self.lock();
        for (collection, senders) in state.subscribers.drain() {
            for sender in senders {
                let _ = sender.try_send(Err(RemoteError::SubscriptionClosed(collection)));
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_writes(&self) -> Result<(), RemoteError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("writes disabled".to_string()));
        }
        Ok(())
    }

    fn check_reads(&self) -> Result<(), RemoteError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("reads disabled".to_string()));
        }
        Ok(())
    }

    fn publish(state: &mut State, collection: Collection) {
        let snapshot = documents_of(state, collection);
        if let Some(senders) = state.subscribers.get_mut(&collection) {
            senders.retain(|sender| sender.try_send(Ok(snapshot.clone())).is_ok());
        }
    }
}

fn documents_of(state: &State, collection: Collection) -> Vec<Value> {
    state
        .collections
        .get(&collection)
        .map(|docs| docs.values().cloned().collect())
        .unwrap_or_default()
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn fetch_all(&self, collection: Collection) -> Result<Vec<Value>, RemoteError> {
        self.check_reads()?;
        Ok(self.documents(collection))
    }

    async fn subscribe(&self, collection: Collection) -> Result<SnapshotStream, RemoteError> {
        self.check_reads()?;
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        self.lock().subscribers.entry(collection).or_default().push(tx);
        Ok(rx)
    }

    async fn put(&self, collection: Collection, id: &str, document: Value) -> Result<(), RemoteError> {
        self.check_writes()?;
        let mut state = self.lock();
        state
            .collections
            .entry(collection)
            .or_default()
            .insert(id.to_string(), document);
        Self::publish(&mut state, collection);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn patch(
        &self,
        collection: Collection,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<(), RemoteError> {
        self.check_writes()?;
        let mut state = self.lock();
        let document = state
            .collections
            .get_mut(&collection)
            .and_then(|docs| docs.get_mut(id))
            .ok_or_else(|| RemoteError::Status {
                status: 404,
                body: format!("{collection}/{id} not found"),
            })?;
        merge_fields(document, &fields);
        Self::publish(&mut state, collection);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Blob storage held in memory.
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<Mutex<HashMap<String, (String, Vec<u8>)>>>,
    fail_uploads: Arc<AtomicBool>,
}

impl std::fmt::Debug for MemoryBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBlobStore")
            .field("blobs", &self.len())
            .finish_non_exhaustive()
    }
}

impl MemoryBlobStore {
    /// URL scheme of uploaded blobs.
    pub const URL_PREFIX: &'static str = "memory://blobs/";

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    /// Number of stored blobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Content type and bytes stored at `path`.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<(String, Vec<u8>)> {
        self.blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, RemoteError> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("uploads disabled".to_string()));
        }
        self.blobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_string(), (content_type.to_string(), bytes));
        Ok(format!("{}{path}", Self::URL_PREFIX))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_put_patch_fetch() {
        let remote = MemoryRemoteStore::new();
        remote
            .put(Collection::Customers, "c1", json!({"id": "c1", "name": "Globex"}))
            .await
            .unwrap();
        remote
            .patch(
                Collection::Customers,
                "c1",
                json!({"industry": "Oil"}).as_object().unwrap().clone(),
            )
            .await
            .unwrap();

        let docs = remote.fetch_all(Collection::Customers).await.unwrap();
        assert_eq!(docs, vec![json!({"id": "c1", "name": "Globex", "industry": "Oil"})]);
        assert_eq!(remote.write_count(), 2);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let remote = MemoryRemoteStore::new();
        remote.set_fail_writes(true);
        assert!(
            remote
                .put(Collection::Plans, "p1", json!({"id": "p1"}))
                .await
                .is_err()
        );
        assert!(remote.document(Collection::Plans, "p1").is_none());

        remote.set_fail_reads(true);
        assert!(remote.fetch_all(Collection::Plans).await.is_err());
    }

    #[tokio::test]
    async fn test_subscription_receives_snapshots() {
        let remote = MemoryRemoteStore::new();
        let mut stream = remote.subscribe(Collection::Users).await.unwrap();

        remote
            .put(Collection::Users, "u1", json!({"id": "u1"}))
            .await
            .unwrap();
        let snapshot = stream.recv().await.unwrap().unwrap();
        assert_eq!(snapshot.len(), 1);

        remote.close_subscriptions();
        assert!(matches!(
            stream.recv().await,
            Some(Err(RemoteError::SubscriptionClosed(Collection::Users)))
        ));
        assert!(stream.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_blob_upload_returns_url() {
        let blobs = MemoryBlobStore::new();
        let url = blobs
            .upload("plans/p1/0-photo.jpg", vec![1, 2, 3], "image/*")
            .await
            .unwrap();
        assert_eq!(url, "memory://blobs/plans/p1/0-photo.jpg");
        assert_eq!(blobs.get("plans/p1/0-photo.jpg").unwrap().1, vec![1, 2, 3]);
    }
}
