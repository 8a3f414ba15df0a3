//! Local replica of the four synchronized collections.
//!
//! The replica is the single in-process source of truth. It owns:
//!
//! - the current [`Snapshot`] of organizations, users, customers and plans
//! - the bookkeeping of which records are confirmed by the remote store
//! - the transport [`SyncState`], the one place the session mode lives
//!
//! Mutations are serialized through an async mutex (read, modify, persist,
//! publish). Readers get the last published snapshot without waiting.
//! While not connected, every mutation persists the full replica to
//! [`DeviceStorage`].

pub mod device;
pub mod snapshot;

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::Utc;
use fieldtrack_core::{
    Collection, Customer, Hierarchy, Organization, OrganizationId, Plan, Role, User, UserId,
};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, instrument, warn};

pub use device::{DeviceStorage, FileDeviceStorage, MemoryDeviceStorage, StorageError};
pub use snapshot::{Mutation, Snapshot, merge_fields};

use crate::config::BootstrapAdmin;
use crate::error::{Result, SyncError};
use crate::notifier::{ChangeEvent, ChangeKind, ChangeNotifier, Subscription};

/// Device storage key holding the persisted replica.
pub const SNAPSHOT_KEY: &str = "snapshot";

/// Id of the seeded bootstrap super-admin.
pub const BOOTSTRAP_ADMIN_ID: &str = "bootstrap-admin";

const FORMAT_VERSION: u32 = 1;

type RecordKey = (Collection, String);

/// Transport mode of the session.
///
/// ```text
/// Uninitialized -> Connecting -> Connected
///       |              |            |
///       +--------------+--> Degraded <+
///                              |
///                              +-> Connecting (explicit reinitialize)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Uninitialized,
    Connecting,
    Connected,
    /// Local-only: writes are applied and persisted on the device.
    Degraded,
}

impl SyncState {
    /// Whether moving from `self` to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Uninitialized, Self::Connecting | Self::Degraded)
                | (Self::Connecting, Self::Connected | Self::Degraded)
                | (Self::Connected, Self::Degraded)
                | (Self::Degraded, Self::Connecting)
        )
    }

    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Degraded => "degraded",
        }
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a locally applied record is known to the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// The remote store accepted the record.
    Remote,
    /// Applied optimistically; not yet known to the remote store.
    Pending,
}

#[derive(Debug, Default)]
struct ReplicaState {
    snapshot: Snapshot,
    confirmed: BTreeSet<RecordKey>,
    pending: BTreeSet<RecordKey>,
    loaded: bool,
}

impl ReplicaState {
    fn mark(&mut self, key: RecordKey, confirmation: Confirmation) {
        match confirmation {
            Confirmation::Remote => {
                self.pending.remove(&key);
                self.confirmed.insert(key);
            }
            Confirmation::Pending => {
                self.confirmed.remove(&key);
                self.pending.insert(key);
            }
        }
    }
}

#[derive(Serialize)]
struct PersistedRef<'a> {
    version: u32,
    snapshot: &'a Snapshot,
    confirmed: &'a BTreeSet<RecordKey>,
    pending: &'a BTreeSet<RecordKey>,
}

#[derive(Deserialize)]
struct Persisted {
    version: u32,
    snapshot: Snapshot,
    #[serde(default)]
    confirmed: BTreeSet<RecordKey>,
    #[serde(default)]
    pending: BTreeSet<RecordKey>,
}

struct Inner {
    state: Mutex<ReplicaState>,
    published: RwLock<Arc<Snapshot>>,
    mode: watch::Sender<SyncState>,
    ever_connected: AtomicBool,
    device: Arc<dyn DeviceStorage>,
    bootstrap: BootstrapAdmin,
    notifier: ChangeNotifier,
}

/// The in-process replica. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct LocalReplicaStore {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for LocalReplicaStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalReplicaStore")
            .field("mode", &self.mode())
            .field("bootstrap", &self.inner.bootstrap)
            .field("notifier", &self.inner.notifier)
            .finish_non_exhaustive()
    }
}

impl LocalReplicaStore {
    #[must_use]
    pub fn new(device: Arc<dyn DeviceStorage>, bootstrap: BootstrapAdmin) -> Self {
        let (mode, _) = watch::channel(SyncState::Uninitialized);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(ReplicaState::default()),
                published: RwLock::new(Arc::new(Snapshot::default())),
                mode,
                ever_connected: AtomicBool::new(false),
                device,
                bootstrap,
                notifier: ChangeNotifier::new(),
            }),
        }
    }

    // =========================================================================
    // Mode
    // =========================================================================

    /// The current transport mode.
    #[must_use]
    pub fn mode(&self) -> SyncState {
        *self.inner.mode.borrow()
    }

    /// Receiver that observes every mode change.
    #[must_use]
    pub fn watch_mode(&self) -> watch::Receiver<SyncState> {
        self.inner.mode.subscribe()
    }

    /// Move to `next`. Illegal transitions are refused and logged.
    ///
    /// Returns whether the mode is `next` afterwards.
    pub fn transition(&self, next: SyncState) -> bool {
        let mut reached = false;
        self.inner.mode.send_if_modified(|current| {
            if *current == next {
                reached = true;
                return false;
            }
            if !current.can_transition_to(next) {
                warn!(from = %current, to = %next, "Refusing illegal sync mode transition");
                return false;
            }
            info!(from = %current, to = %next, "Sync mode changed");
            *current = next;
            reached = true;
            true
        });
        if reached && next.is_connected() {
            self.inner.ever_connected.store(true, Ordering::SeqCst);
        }
        reached
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// The last published snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(
            &self
                .inner
                .published
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    #[must_use]
    pub fn organizations(&self) -> Vec<Organization> {
        self.snapshot().organizations.clone()
    }

    #[must_use]
    pub fn users(&self) -> Vec<User> {
        self.snapshot().users.clone()
    }

    #[must_use]
    pub fn customers(&self) -> Vec<Customer> {
        self.snapshot().customers.clone()
    }

    #[must_use]
    pub fn plans(&self) -> Vec<Plan> {
        self.snapshot().plans.clone()
    }

    /// Whether the record is known to the remote store in its current form.
    pub async fn is_confirmed(&self, collection: Collection, id: &str) -> bool {
        let state = self.inner.state.lock().await;
        state.snapshot.contains(collection, id)
            && state.confirmed.contains(&(collection, id.to_string()))
    }

    /// Records applied locally that the remote store has not acknowledged.
    pub async fn unconfirmed_records(&self) -> Vec<Mutation> {
        let state = self.inner.state.lock().await;
        state
            .pending
            .iter()
            .filter_map(|(collection, id)| state.snapshot.mutation_for(*collection, id))
            .collect()
    }

    /// Check a mutation against the current snapshot without applying it.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Integrity` if the record references an
    /// organization that does not exist.
    pub fn validate(&self, mutation: &Mutation) -> Result<()> {
        check_integrity(&self.snapshot(), mutation)
    }

    /// Register an observer called after every mutation or replacement.
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.inner.notifier.subscribe(observer)
    }

    // =========================================================================
    // Loading
    // =========================================================================

    /// Return the last known snapshot, loading it from device storage if no
    /// remote connection was ever established.
    ///
    /// Device read failures are not fatal: the replica falls back to a seeded
    /// snapshot holding the system organization and the bootstrap admin.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Arc<Snapshot> {
        let mut state = self.inner.state.lock().await;
        if state.loaded || self.inner.ever_connected.load(Ordering::SeqCst) {
            return self.snapshot();
        }

        match self.read_device() {
            Ok(Some(persisted)) => {
                info!(
                    organizations = persisted.snapshot.organizations.len(),
                    users = persisted.snapshot.users.len(),
                    customers = persisted.snapshot.customers.len(),
                    plans = persisted.snapshot.plans.len(),
                    pending = persisted.pending.len(),
                    "Loaded replica from device storage"
                );
                state.snapshot = persisted.snapshot;
                state.confirmed = persisted.confirmed;
                state.pending = persisted.pending;
            }
            Ok(None) => info!("No replica on device; starting from seed"),
            Err(e) => warn!(error = %e, "Device storage unreadable; starting from seed"),
        }
        state.loaded = true;
        self.ensure_seed(&mut state.snapshot);

        self.publish_and_notify(&state, ChangeKind::Reload)
    }

    fn read_device(&self) -> Result<Option<Persisted>, StorageError> {
        let Some(bytes) = self.inner.device.get(SNAPSHOT_KEY)? else {
            return Ok(None);
        };
        let persisted: Persisted = serde_json::from_slice(&bytes)?;
        if persisted.version != FORMAT_VERSION {
            warn!(
                version = persisted.version,
                expected = FORMAT_VERSION,
                "Device replica written by another format version"
            );
        }
        Ok(Some(persisted))
    }

    /// Add the system organization and bootstrap admin when missing.
    fn ensure_seed(&self, snapshot: &mut Snapshot) {
        let now = Utc::now();
        let system = OrganizationId::system();
        if snapshot.organization(&system).is_none() {
            snapshot.upsert(Organization::system(now).into());
        }

        let admin = &self.inner.bootstrap;
        if snapshot.user_by_email(&admin.email).is_some() {
            return;
        }
        let password_hash = match crate::accounts::hash_password(admin.password.expose_secret()) {
            Ok(hash) => hash,
            Err(e) => {
                // An empty hash never verifies, so the account stays locked.
                warn!(error = %e, "Could not hash bootstrap admin password");
                String::new()
            }
        };
        snapshot.upsert(
            User {
                id: UserId::new(BOOTSTRAP_ADMIN_ID),
                email: admin.email.clone(),
                name: "Bootstrap Admin".to_string(),
                password_hash,
                role: Role::SuperAdmin,
                organization_id: system,
                approved: true,
                hierarchy: Hierarchy::default(),
                created_at: now,
            }
            .into(),
        );
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Add or update one record.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Integrity` if the record references an
    /// organization that does not exist.
    #[instrument(skip(self, mutation), fields(collection = %mutation.collection(), id = mutation.id()))]
    pub async fn apply_local(&self, mutation: Mutation, confirmation: Confirmation) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        check_integrity(&state.snapshot, &mutation)?;

        let collection = mutation.collection();
        let id = mutation.id().to_string();
        state.snapshot.upsert(mutation);
        state.mark((collection, id.clone()), confirmation);

        self.persist_if_local(&state);
        self.publish_and_notify(&state, ChangeKind::Upsert { collection, id });
        Ok(())
    }

    /// Merge a partial update into one record.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::NotFound` if the record does not exist,
    /// `SyncError::Serialization` if the merged document is not a valid
    /// record, or `SyncError::Integrity` if it references an unknown
    /// organization.
    #[instrument(skip(self, fields), fields(collection = %collection))]
    pub async fn apply_patch(
        &self,
        collection: Collection,
        id: &str,
        fields: &Map<String, Value>,
        confirmation: Confirmation,
    ) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        let current = state
            .snapshot
            .mutation_for(collection, id)
            .ok_or_else(|| SyncError::NotFound(format!("{collection}/{id}")))?;

        let mut document = current.to_document()?;
        merge_fields(&mut document, fields);
        let mutation = Mutation::from_document(collection, document)?;
        check_integrity(&state.snapshot, &mutation)?;

        state.snapshot.upsert(mutation);
        state.mark((collection, id.to_string()), confirmation);

        self.persist_if_local(&state);
        self.publish_and_notify(
            &state,
            ChangeKind::Patch {
                collection,
                id: id.to_string(),
            },
        );
        Ok(())
    }

    /// Record that the remote store now holds the current version.
    pub async fn mark_confirmed(&self, collection: Collection, id: &str) {
        let mut state = self.inner.state.lock().await;
        if state.snapshot.contains(collection, id) {
            state.mark((collection, id.to_string()), Confirmation::Remote);
            self.persist_if_local(&state);
        }
    }

    /// Replace one collection with the remote's full set of documents.
    ///
    /// Each document is merged field by field over the local copy, remote
    /// fields winning. Unconfirmed local records keep their local version,
    /// and are kept even when absent from the remote set; other local
    /// records absent from it are dropped. Returns the number of remote
    /// records accounted for.
    #[instrument(skip(self, documents), fields(collection = %collection, count = documents.len()))]
    pub async fn replace_collection(&self, collection: Collection, documents: Vec<Value>) -> usize {
        let mut state = self.inner.state.lock().await;
        let applied = replace_in(&mut state, collection, documents);
        self.ensure_seed(&mut state.snapshot);
        state.loaded = true;

        self.persist(&state);
        self.publish_and_notify(&state, ChangeKind::Replace { collection });
        applied
    }

    /// Replace every collection at once from a bulk load.
    ///
    /// Collections are applied in the given order inside one critical
    /// section, so observers only ever see the combined result.
    #[instrument(skip(self, collections))]
    pub async fn replace_all(&self, collections: Vec<(Collection, Vec<Value>)>) -> usize {
        let mut state = self.inner.state.lock().await;
        let mut applied = 0;
        for (collection, documents) in collections {
            applied += replace_in(&mut state, collection, documents);
            // Seeded records must exist before dependent collections are checked.
            self.ensure_seed(&mut state.snapshot);
        }
        state.loaded = true;

        self.persist(&state);
        self.publish_and_notify(&state, ChangeKind::Reload);
        applied
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn persist_if_local(&self, state: &ReplicaState) {
        if !self.mode().is_connected() {
            self.persist(state);
        }
    }

    fn persist(&self, state: &ReplicaState) {
        let persisted = PersistedRef {
            version: FORMAT_VERSION,
            snapshot: &state.snapshot,
            confirmed: &state.confirmed,
            pending: &state.pending,
        };
        let result = serde_json::to_vec(&persisted)
            .map_err(StorageError::from)
            .and_then(|bytes| self.inner.device.set(SNAPSHOT_KEY, &bytes));
        match result {
            Ok(()) => debug!(pending = state.pending.len(), "Persisted replica to device"),
            Err(e) => warn!(error = %e, "Failed to persist replica to device storage"),
        }
    }

    fn publish_and_notify(&self, state: &ReplicaState, kind: ChangeKind) -> Arc<Snapshot> {
        let snapshot = Arc::new(state.snapshot.clone());
        *self
            .inner
            .published
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::clone(&snapshot);

        self.inner.notifier.notify(&ChangeEvent {
            kind,
            snapshot: Arc::clone(&snapshot),
        });
        snapshot
    }
}

fn check_integrity(snapshot: &Snapshot, mutation: &Mutation) -> Result<()> {
    if matches!(mutation, Mutation::Organization(_)) {
        return Ok(());
    }
    let organization = mutation.organization_id();
    if snapshot.organization(organization).is_none() {
        return Err(SyncError::Integrity(format!(
            "{}/{} references unknown organization {organization}",
            mutation.collection(),
            mutation.id()
        )));
    }
    Ok(())
}

fn replace_in(state: &mut ReplicaState, collection: Collection, documents: Vec<Value>) -> usize {
    let mut remote_ids = HashSet::new();

    for document in documents {
        let Some(id) = document.get("id").and_then(Value::as_str).map(str::to_string) else {
            warn!(collection = %collection, "Skipping remote document without id");
            continue;
        };

        // Local edits the remote has not acknowledged are newer than any
        // remote copy; they stay pending until pushed.
        if state.pending.contains(&(collection, id.clone()))
            && state.snapshot.contains(collection, &id)
        {
            debug!(collection = %collection, id = %id, "Keeping unconfirmed local version");
            remote_ids.insert(id);
            continue;
        }

        let merged = match (
            state.snapshot.mutation_for(collection, &id),
            document.as_object(),
        ) {
            (Some(local), Some(fields)) => match local.to_document() {
                Ok(mut base) => {
                    merge_fields(&mut base, fields);
                    base
                }
                Err(_) => document,
            },
            _ => document,
        };

        let mutation = match Mutation::from_document(collection, merged) {
            Ok(mutation) => mutation,
            Err(e) => {
                warn!(collection = %collection, id = %id, error = %e, "Skipping malformed remote document");
                continue;
            }
        };
        if let Err(e) = check_integrity(&state.snapshot, &mutation) {
            warn!(error = %e, "Skipping remote document");
            continue;
        }

        state.snapshot.upsert(mutation);
        state.mark((collection, id.clone()), Confirmation::Remote);
        remote_ids.insert(id);
    }

    for id in state.snapshot.ids(collection) {
        if remote_ids.contains(&id) {
            continue;
        }
        let key = (collection, id);
        if state.pending.contains(&key) {
            debug!(collection = %collection, id = %key.1, "Keeping unconfirmed local record");
            continue;
        }
        state.snapshot.remove(collection, &key.1);
        state.confirmed.remove(&key);
    }

    remote_ids.len()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use fieldtrack_core::{CustomerId, Email};
    use rust_decimal::Decimal;
    use secrecy::SecretString;
    use serde_json::json;

    use super::*;

    fn bootstrap() -> BootstrapAdmin {
        BootstrapAdmin {
            email: Email::parse("root@fieldtrack.test").unwrap(),
            password: SecretString::from("Tq7#vL2!pZ9@mW4k".to_string()),
        }
    }

    fn store_with(device: Arc<MemoryDeviceStorage>) -> LocalReplicaStore {
        LocalReplicaStore::new(device, bootstrap())
    }

    fn customer(id: &str, org: &str) -> Customer {
        Customer {
            id: CustomerId::new(id),
            organization_id: OrganizationId::new(org),
            created_by: UserId::new(BOOTSTRAP_ADMIN_ID),
            name: format!("Customer {id}"),
            contact_person: "Hank".to_string(),
            phone: None,
            email: None,
            address: None,
            industry: None,
            competitors: Vec::new(),
            annual_potential: Decimal::new(1000, 0),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_state_transitions() {
        use SyncState::{Connected, Connecting, Degraded, Uninitialized};

        assert!(Uninitialized.can_transition_to(Connecting));
        assert!(Uninitialized.can_transition_to(Degraded));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connecting.can_transition_to(Degraded));
        assert!(Connected.can_transition_to(Degraded));
        assert!(Degraded.can_transition_to(Connecting));

        assert!(!Uninitialized.can_transition_to(Connected));
        assert!(!Degraded.can_transition_to(Connected));
        assert!(!Connected.can_transition_to(Connecting));
        assert!(!Connected.can_transition_to(Uninitialized));
    }

    #[test]
    fn test_transition_refuses_illegal_moves() {
        let store = store_with(Arc::new(MemoryDeviceStorage::new()));
        assert!(!store.transition(SyncState::Connected));
        assert_eq!(store.mode(), SyncState::Uninitialized);

        assert!(store.transition(SyncState::Degraded));
        assert!(!store.transition(SyncState::Connected));
        assert_eq!(store.mode(), SyncState::Degraded);
    }

    #[tokio::test]
    async fn test_load_seeds_when_device_empty() {
        let store = store_with(Arc::new(MemoryDeviceStorage::new()));
        let snapshot = store.load().await;

        assert!(snapshot.organization(&OrganizationId::system()).is_some());
        let admin = snapshot.user_by_email(&bootstrap().email).unwrap();
        assert_eq!(admin.id.as_str(), BOOTSTRAP_ADMIN_ID);
        assert!(admin.is_super_admin());
        assert!(admin.password_hash.starts_with("$argon2"));
    }

    #[tokio::test]
    async fn test_load_survives_unreadable_device() {
        let device = Arc::new(MemoryDeviceStorage::new());
        device.set(SNAPSHOT_KEY, b"{ not json").unwrap();
        let store = store_with(Arc::clone(&device));

        let snapshot = store.load().await;
        assert_eq!(snapshot.organizations.len(), 1);
        assert_eq!(snapshot.users.len(), 1);

        device.set_fail_reads(true);
        let store = store_with(device);
        assert_eq!(store.load().await.users.len(), 1);
    }

    #[tokio::test]
    async fn test_apply_local_rejects_unknown_organization() {
        let store = store_with(Arc::new(MemoryDeviceStorage::new()));
        store.load().await;

        let result = store
            .apply_local(customer("c1", "ghost").into(), Confirmation::Pending)
            .await;
        assert!(matches!(result, Err(SyncError::Integrity(_))));
        assert!(store.customers().is_empty());
    }

    #[tokio::test]
    async fn test_degraded_writes_persist_and_reload() {
        let device = Arc::new(MemoryDeviceStorage::new());
        let store = store_with(Arc::clone(&device));
        store.transition(SyncState::Degraded);
        store.load().await;

        store
            .apply_local(customer("c1", "system").into(), Confirmation::Pending)
            .await
            .unwrap();
        assert!(device.contains(SNAPSHOT_KEY));
        assert!(!store.is_confirmed(Collection::Customers, "c1").await);

        let reopened = store_with(device);
        let snapshot = reopened.load().await;
        assert_eq!(snapshot.customers.len(), 1);
        assert_eq!(reopened.unconfirmed_records().await.len(), 1);
    }

    #[tokio::test]
    async fn test_confirmed_writes_are_reported() {
        let store = store_with(Arc::new(MemoryDeviceStorage::new()));
        store.load().await;
        store
            .apply_local(customer("c1", "system").into(), Confirmation::Remote)
            .await
            .unwrap();

        assert!(store.is_confirmed(Collection::Customers, "c1").await);
        assert!(store.unconfirmed_records().await.is_empty());
    }

    #[tokio::test]
    async fn test_apply_patch_merges_fields() {
        let store = store_with(Arc::new(MemoryDeviceStorage::new()));
        store.load().await;
        store
            .apply_local(customer("c1", "system").into(), Confirmation::Remote)
            .await
            .unwrap();

        let fields = json!({"industry": "Chemicals", "phone": "555"});
        store
            .apply_patch(
                Collection::Customers,
                "c1",
                fields.as_object().unwrap(),
                Confirmation::Pending,
            )
            .await
            .unwrap();

        let updated = &store.customers()[0];
        assert_eq!(updated.industry.as_deref(), Some("Chemicals"));
        assert_eq!(updated.phone.as_deref(), Some("555"));
        assert_eq!(updated.name, "Customer c1");
        assert!(!store.is_confirmed(Collection::Customers, "c1").await);

        let missing = store
            .apply_patch(
                Collection::Customers,
                "nope",
                fields.as_object().unwrap(),
                Confirmation::Pending,
            )
            .await;
        assert!(matches!(missing, Err(SyncError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_replace_collection_field_level_merge() {
        let store = store_with(Arc::new(MemoryDeviceStorage::new()));
        store.load().await;

        let mut local = customer("c1", "system");
        local.industry = Some("Oil".to_string());
        store
            .apply_local(local.into(), Confirmation::Remote)
            .await
            .unwrap();
        store
            .apply_local(customer("c2", "system").into(), Confirmation::Pending)
            .await
            .unwrap();
        store
            .apply_local(customer("c3", "system").into(), Confirmation::Remote)
            .await
            .unwrap();

        let mut remote = serde_json::to_value(customer("c1", "system")).unwrap();
        remote["name"] = json!("Globex Remote");
        remote.as_object_mut().unwrap().remove("industry");

        let applied = store
            .replace_collection(Collection::Customers, vec![remote])
            .await;
        assert_eq!(applied, 1);

        let customers = store.customers();
        let c1 = customers.iter().find(|c| c.id.as_str() == "c1").unwrap();
        assert_eq!(c1.name, "Globex Remote");
        assert_eq!(c1.industry.as_deref(), Some("Oil"));

        // Unconfirmed c2 is kept, confirmed c3 is gone from the remote.
        assert!(customers.iter().any(|c| c.id.as_str() == "c2"));
        assert!(!customers.iter().any(|c| c.id.as_str() == "c3"));
        assert!(store.is_confirmed(Collection::Customers, "c1").await);
    }

    #[tokio::test]
    async fn test_replace_collection_keeps_pending_local_version() {
        let store = store_with(Arc::new(MemoryDeviceStorage::new()));
        store.load().await;

        let mut local = customer("c1", "system");
        local.name = "Offline Rename".to_string();
        local.industry = Some("Chemicals".to_string());
        store
            .apply_local(local.clone().into(), Confirmation::Pending)
            .await
            .unwrap();

        let remote = serde_json::to_value(customer("c1", "system")).unwrap();
        let applied = store
            .replace_collection(Collection::Customers, vec![remote])
            .await;
        assert_eq!(applied, 1);

        assert_eq!(store.customers(), vec![local]);
        assert!(!store.is_confirmed(Collection::Customers, "c1").await);
        assert_eq!(store.unconfirmed_records().await.len(), 1);
    }

    #[tokio::test]
    async fn test_replace_all_keeps_seed() {
        let store = store_with(Arc::new(MemoryDeviceStorage::new()));
        store.load().await;

        let acme = json!({
            "id": "acme",
            "name": "Acme",
            "approved": true,
            "created_at": "2026-01-01T00:00:00Z"
        });
        store
            .replace_all(vec![
                (Collection::Organizations, vec![acme]),
                (Collection::Users, Vec::new()),
            ])
            .await;

        let snapshot = store.snapshot();
        assert_eq!(snapshot.organizations.len(), 2);
        assert!(snapshot.user_by_email(&bootstrap().email).is_some());
    }

    #[tokio::test]
    async fn test_observers_see_updated_store() {
        let store = store_with(Arc::new(MemoryDeviceStorage::new()));
        store.load().await;

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let subscription = store.subscribe(move |event| {
            counter.store(event.snapshot.customers.len(), Ordering::SeqCst);
        });

        store
            .apply_local(customer("c1", "system").into(), Confirmation::Pending)
            .await
            .unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        subscription.unsubscribe();
        store
            .apply_local(customer("c2", "system").into(), Confirmation::Pending)
            .await
            .unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
