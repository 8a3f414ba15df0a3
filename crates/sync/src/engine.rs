//! Remote sync engine: connection lifecycle and write policy.
//!
//! # Write Policy
//!
//! - `Connected`: commit to the remote store first, then apply locally as
//!   confirmed
//! - `Degraded`: apply locally as unconfirmed (persisted on the device)
//! - a remote failure while connected demotes the session, applies the
//!   write locally as unconfirmed and reports [`WriteOutcome::LocalOnly`]
//!
//! Writes run on a spawned task, so dropping the caller's future never
//! abandons a remote commit halfway: whatever the remote answers is applied
//! to the replica. Writes take turns: one finishes applying locally before
//! the next reads its record.
//!
//! The session only returns to `Connected` through [`RemoteSyncEngine::reinitialize`].

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use fieldtrack_core::{Attachment, AttachmentPayload, Collection, PlanId};
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::config::{RemoteConfig, SyncConfig};
use crate::error::{Result, SyncError};
use crate::remote::sanitize::sanitize_document;
use crate::remote::{
    BlobStore, HttpBlobStore, HttpRemoteStore, RemoteError, RemoteStore, SnapshotStream,
};
use crate::store::{
    Confirmation, FileDeviceStorage, LocalReplicaStore, Mutation, SyncState, merge_fields,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Tunables for the engine.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Upper bound for every remote call; hitting it counts as a failure.
    pub timeout: Duration,
    /// Start live subscriptions after a successful bulk load.
    pub live_updates: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            live_updates: false,
        }
    }
}

impl From<&RemoteConfig> for EngineOptions {
    fn from(config: &RemoteConfig) -> Self {
        Self {
            timeout: config.timeout,
            live_updates: config.live_updates,
        }
    }
}

/// The remote collaborators the engine talks to.
#[derive(Clone)]
pub struct RemoteBackend {
    pub documents: Arc<dyn RemoteStore>,
    pub blobs: Arc<dyn BlobStore>,
}

impl std::fmt::Debug for RemoteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteBackend").finish_non_exhaustive()
    }
}

/// Why a write was only applied locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalOnlyReason {
    /// The session was already local-only.
    Degraded,
    /// The remote commit failed and the session was demoted.
    RemoteFailed,
}

/// Result of a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Committed remotely and applied locally.
    Confirmed,
    /// Applied locally only; the change is unconfirmed.
    LocalOnly { reason: LocalOnlyReason },
}

impl WriteOutcome {
    #[must_use]
    pub const fn is_confirmed(self) -> bool {
        matches!(self, Self::Confirmed)
    }
}

struct Inner {
    store: LocalReplicaStore,
    backend: Option<RemoteBackend>,
    options: EngineOptions,
    init_attempted: AtomicBool,
    subscriptions: Mutex<Vec<JoinHandle<()>>>,
    /// Held from reading a record until its change is applied locally.
    writes: tokio::sync::Mutex<()>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        for handle in self
            .subscriptions
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            handle.abort();
        }
    }
}

/// Owns the connection to the remote store. Cheap to clone.
#[derive(Clone)]
pub struct RemoteSyncEngine {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RemoteSyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSyncEngine")
            .field("mode", &self.mode())
            .field("remote_configured", &self.inner.backend.is_some())
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

impl RemoteSyncEngine {
    #[must_use]
    pub fn new(
        store: LocalReplicaStore,
        backend: Option<RemoteBackend>,
        options: EngineOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                backend,
                options,
                init_attempted: AtomicBool::new(false),
                subscriptions: Mutex::new(Vec::new()),
                writes: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Build an engine backed by the file system and, when configured, the
    /// HTTP document store.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::RemoteUnavailable` if the HTTP clients cannot be built.
    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        let device = Arc::new(FileDeviceStorage::new(&config.data_dir));
        let store = LocalReplicaStore::new(device, config.bootstrap_admin.clone());

        let (backend, options) = match config.remote() {
            Some(remote) => (
                Some(RemoteBackend {
                    documents: Arc::new(HttpRemoteStore::new(remote)?),
                    blobs: Arc::new(HttpBlobStore::new(remote)?),
                }),
                EngineOptions::from(remote),
            ),
            None => (None, EngineOptions::default()),
        };

        Ok(Self::new(store, backend, options))
    }

    #[must_use]
    pub fn store(&self) -> &LocalReplicaStore {
        &self.inner.store
    }

    #[must_use]
    pub fn mode(&self) -> SyncState {
        self.inner.store.mode()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Connect to the remote store and load the replica.
    ///
    /// Without remote configuration the session goes straight to `Degraded`
    /// and the replica is loaded from the device. Otherwise all four
    /// collections are bulk-loaded; on failure the session degrades and the
    /// replica comes from the device.
    ///
    /// # Errors
    ///
    /// Only the first call surfaces a connection failure; later calls report
    /// the resulting mode instead.
    #[instrument(skip(self))]
    pub async fn init(&self) -> Result<SyncState> {
        let first = !self.inner.init_attempted.swap(true, Ordering::SeqCst);
        match self.connect().await {
            Ok(state) => Ok(state),
            Err(e) if first => Err(e),
            Err(e) => {
                debug!(error = %e, "Repeated init failed; staying local-only");
                Ok(self.mode())
            }
        }
    }

    /// Try to leave local-only mode.
    ///
    /// Unconfirmed records are pushed to the remote store once connected.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::ConfigMissing` when no remote store is configured,
    /// or the connection failure.
    #[instrument(skip(self))]
    pub async fn reinitialize(&self) -> Result<SyncState> {
        if self.inner.backend.is_none() {
            return Err(SyncError::ConfigMissing(
                "remote store is not configured".to_string(),
            ));
        }
        self.inner.init_attempted.store(true, Ordering::SeqCst);
        self.connect().await
    }

    async fn connect(&self) -> Result<SyncState> {
        let store = &self.inner.store;
        let Some(backend) = &self.inner.backend else {
            let missing = SyncError::ConfigMissing("remote store is not configured".to_string());
            warn!(error = %missing, "Starting in local-only mode");
            store.transition(SyncState::Degraded);
            store.load().await;
            return Ok(SyncState::Degraded);
        };

        if store.mode().is_connected() {
            return Ok(SyncState::Connected);
        }

        store.transition(SyncState::Connecting);
        // Pick up unconfirmed records left on the device by earlier sessions.
        store.load().await;

        let collections = match self.bulk_load(backend).await {
            Ok(collections) => collections,
            Err(e) => {
                warn!(error = %e, "Remote bulk load failed; continuing local-only");
                store.transition(SyncState::Degraded);
                return Err(e.into());
            }
        };

        let applied = store.replace_all(collections).await;
        store.transition(SyncState::Connected);
        info!(documents = applied, "Connected to remote store");

        self.flush_unconfirmed(backend).await;
        if self.inner.options.live_updates && self.mode().is_connected() {
            self.start_subscriptions(backend).await;
        }

        Ok(self.mode())
    }

    async fn bulk_load(
        &self,
        backend: &RemoteBackend,
    ) -> std::result::Result<Vec<(Collection, Vec<Value>)>, RemoteError> {
        let mut collections = Vec::with_capacity(Collection::ALL.len());
        for collection in Collection::ALL {
            let documents = self.call(backend.documents.fetch_all(collection)).await?;
            debug!(collection = %collection, count = documents.len(), "Fetched collection");
            collections.push((
                collection,
                documents.into_iter().map(sanitize_document).collect(),
            ));
        }
        Ok(collections)
    }

    /// Push every unconfirmed record. Stops (and demotes) at the first failure.
    async fn flush_unconfirmed(&self, backend: &RemoteBackend) -> usize {
        let _turn = self.inner.writes.lock().await;
        let pending = self.inner.store.unconfirmed_records().await;
        if pending.is_empty() {
            return 0;
        }
        info!(count = pending.len(), "Pushing unconfirmed records");

        let mut flushed = 0;
        for mutation in pending {
            let document = match mutation.to_document() {
                Ok(document) => document,
                Err(e) => {
                    warn!(id = mutation.id(), error = %e, "Cannot serialize unconfirmed record");
                    continue;
                }
            };
            let collection = mutation.collection();
            match self
                .call(backend.documents.put(collection, mutation.id(), document))
                .await
            {
                Ok(()) => {
                    self.inner.store.mark_confirmed(collection, mutation.id()).await;
                    flushed += 1;
                }
                Err(e) => {
                    self.demote(&e);
                    break;
                }
            }
        }
        flushed
    }

    async fn start_subscriptions(&self, backend: &RemoteBackend) {
        for collection in Collection::ALL {
            match self.call(backend.documents.subscribe(collection)).await {
                Ok(stream) => {
                    let handle = tokio::spawn(follow_subscription(
                        self.inner.store.clone(),
                        collection,
                        stream,
                    ));
                    self.inner
                        .subscriptions
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(handle);
                }
                Err(e) => {
                    self.demote(&e);
                    return;
                }
            }
        }
        info!("Live subscriptions started");
    }

    fn demote(&self, error: &RemoteError) {
        warn!(error = %error, "Remote failure; switching to local-only mode");
        self.inner.store.transition(SyncState::Degraded);
        for handle in self
            .inner
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            handle.abort();
        }
    }

    async fn call<T>(
        &self,
        future: impl Future<Output = std::result::Result<T, RemoteError>>,
    ) -> std::result::Result<T, RemoteError> {
        let timeout = self.inner.options.timeout;
        tokio::time::timeout(timeout, future)
            .await
            .map_err(|_| RemoteError::Timeout(timeout))?
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Add or update one record under the current write policy.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Integrity` if the record references an unknown
    /// organization. Remote failures are not errors; they yield
    /// [`WriteOutcome::LocalOnly`].
    #[instrument(skip(self, mutation), fields(collection = %mutation.collection(), id = mutation.id()))]
    pub async fn write(&self, mutation: Mutation) -> Result<WriteOutcome> {
        let engine = self.clone();
        tokio::spawn(async move {
            let _turn = engine.inner.writes.lock().await;
            engine.commit(mutation).await
        })
        .await?
    }

    async fn commit(&self, mutation: Mutation) -> Result<WriteOutcome> {
        let store = &self.inner.store;
        store.validate(&mutation)?;

        let backend = match &self.inner.backend {
            Some(backend) if store.mode().is_connected() => backend,
            _ => {
                store.apply_local(mutation, Confirmation::Pending).await?;
                return Ok(WriteOutcome::LocalOnly {
                    reason: LocalOnlyReason::Degraded,
                });
            }
        };

        let document = mutation.to_document()?;
        let remote = self
            .call(
                backend
                    .documents
                    .put(mutation.collection(), mutation.id(), document),
            )
            .await;

        match remote {
            Ok(()) => {
                store.apply_local(mutation, Confirmation::Remote).await?;
                Ok(WriteOutcome::Confirmed)
            }
            Err(e) => {
                self.demote(&e);
                store.apply_local(mutation, Confirmation::Pending).await?;
                Ok(WriteOutcome::LocalOnly {
                    reason: LocalOnlyReason::RemoteFailed,
                })
            }
        }
    }

    /// Update some fields of one record under the current write policy.
    ///
    /// Records the remote store does not know yet are sent whole.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::NotFound` if the record does not exist locally.
    #[instrument(skip(self, fields), fields(collection = %collection))]
    pub async fn update_fields(
        &self,
        collection: Collection,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<WriteOutcome> {
        let engine = self.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            let _turn = engine.inner.writes.lock().await;
            engine.commit_fields(collection, &id, fields).await
        })
        .await?
    }

    /// Update a record with fields computed from its current version.
    ///
    /// `edit` sees the record as it is when this write's turn comes, so
    /// concurrent edits of the same record each build on the previous one.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::NotFound` if the record does not exist locally,
    /// or the error returned by `edit`.
    #[instrument(skip(self, edit), fields(collection = %collection))]
    pub async fn modify<F>(&self, collection: Collection, id: &str, edit: F) -> Result<WriteOutcome>
    where
        F: FnOnce(Mutation) -> Result<Map<String, Value>> + Send + 'static,
    {
        let engine = self.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            let _turn = engine.inner.writes.lock().await;
            let current = engine
                .inner
                .store
                .snapshot()
                .mutation_for(collection, &id)
                .ok_or_else(|| SyncError::NotFound(format!("{collection}/{id}")))?;
            let fields = edit(current)?;
            engine.commit_fields(collection, &id, fields).await
        })
        .await?
    }

    async fn commit_fields(
        &self,
        collection: Collection,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<WriteOutcome> {
        let store = &self.inner.store;
        let current = store
            .snapshot()
            .mutation_for(collection, id)
            .ok_or_else(|| SyncError::NotFound(format!("{collection}/{id}")))?;

        let backend = match &self.inner.backend {
            Some(backend) if store.mode().is_connected() => backend,
            _ => {
                store
                    .apply_patch(collection, id, &fields, Confirmation::Pending)
                    .await?;
                return Ok(WriteOutcome::LocalOnly {
                    reason: LocalOnlyReason::Degraded,
                });
            }
        };

        let remote = if store.is_confirmed(collection, id).await {
            self.call(backend.documents.patch(collection, id, fields.clone()))
                .await
        } else {
            let mut document = current.to_document()?;
            merge_fields(&mut document, &fields);
            self.call(backend.documents.put(collection, id, document))
                .await
        };

        match remote {
            Ok(()) => {
                store
                    .apply_patch(collection, id, &fields, Confirmation::Remote)
                    .await?;
                Ok(WriteOutcome::Confirmed)
            }
            Err(e) => {
                self.demote(&e);
                store
                    .apply_patch(collection, id, &fields, Confirmation::Pending)
                    .await?;
                Ok(WriteOutcome::LocalOnly {
                    reason: LocalOnlyReason::RemoteFailed,
                })
            }
        }
    }

    /// Replace inline attachments with durable blob URLs.
    ///
    /// URL attachments pass through untouched. Inline payloads are uploaded
    /// one at a time while connected; in local-only mode they are kept
    /// inline. An upload failure does not change the session mode.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::UploadFailure` naming the first attachment that
    /// could not be uploaded.
    #[instrument(skip(self, attachments), fields(plan = %owner, count = attachments.len()))]
    pub async fn upload_attachments(
        &self,
        owner: &PlanId,
        attachments: Vec<Attachment>,
    ) -> Result<Vec<Attachment>> {
        let backend = match &self.inner.backend {
            Some(backend) if self.mode().is_connected() => backend,
            _ => {
                debug!("Local-only; keeping attachment payloads inline");
                return Ok(attachments);
            }
        };

        let mut uploaded = Vec::with_capacity(attachments.len());
        for (index, attachment) in attachments.into_iter().enumerate() {
            let Attachment {
                name,
                media_kind,
                payload,
            } = attachment;

            let payload = match payload {
                AttachmentPayload::Inline { data } => {
                    let path = format!("plans/{owner}/{index}-{}", name.replace('/', "_"));
                    let url = self
                        .call(backend.blobs.upload(&path, data, media_kind.content_type()))
                        .await
                        .map_err(|e| SyncError::UploadFailure(format!("{name}: {e}")))?;
                    debug!(attachment = %name, %url, "Uploaded attachment");
                    AttachmentPayload::Remote { url }
                }
                remote @ AttachmentPayload::Remote { .. } => remote,
            };

            uploaded.push(Attachment {
                name,
                media_kind,
                payload,
            });
        }
        Ok(uploaded)
    }
}

/// Fold remote snapshots into the replica until the subscription breaks or
/// the session leaves `Connected`.
async fn follow_subscription(
    store: LocalReplicaStore,
    collection: Collection,
    mut stream: SnapshotStream,
) {
    let mut mode = store.watch_mode();
    loop {
        tokio::select! {
            message = stream.recv() => match message {
                Some(Ok(documents)) => {
                    let documents = documents.into_iter().map(sanitize_document).collect();
                    store.replace_collection(collection, documents).await;
                }
                Some(Err(e)) => {
                    warn!(collection = %collection, error = %e, "Subscription failed; switching to local-only mode");
                    store.transition(SyncState::Degraded);
                    break;
                }
                None => {
                    warn!(collection = %collection, "Subscription closed; switching to local-only mode");
                    store.transition(SyncState::Degraded);
                    break;
                }
            },
            changed = mode.changed() => {
                if changed.is_err() || !mode.borrow().is_connected() {
                    break;
                }
            }
        }
    }
}
