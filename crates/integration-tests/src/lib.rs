//! Integration tests for FieldTrack.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p fieldtrack-integration-tests
//! ```
//!
//! Every collaborator is in-process: the remote document store, blob
//! storage, device storage and mailbox. No network or credentials needed.
//!
//! # Test Categories
//!
//! - `end_to_end` - Registration, approval, offline fallback, recipients
//! - `connected` - Writes against a healthy remote
//! - `degraded` - Fallback to local-only mode and device persistence
//! - `observers` - Change notification registration
//! - `email_roundtrip` - Broadcast on one device, poll on another

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use fieldtrack_core::{
    Customer, CustomerId, Email, EmailError, OrganizationId, Plan, PlanDetails, PlanId,
    RetentionDetails, UserId,
};
use fieldtrack_sync::engine::RemoteBackend;
use fieldtrack_sync::mail::MemoryMailbox;
use fieldtrack_sync::remote::{MemoryBlobStore, MemoryRemoteStore};
use fieldtrack_sync::store::MemoryDeviceStorage;
use fieldtrack_sync::{
    AccountService, BootstrapAdmin, EmailChannel, EngineOptions, EnvelopeCodec, LocalReplicaStore,
    RemoteSyncEngine, Tracker,
};
use rust_decimal::Decimal;
use secrecy::SecretString;

/// Bootstrap super-admin address used by every context.
pub const ROOT_EMAIL: &str = "root@fieldtrack.test";
/// Bootstrap super-admin password used by every context.
pub const ROOT_PASSWORD: &str = "Tq7#vL2!pZ9@mW4k";
/// Envelope key shared by devices of one deployment.
pub const ENVELOPE_KEY: [u8; 32] = [42; 32];

/// One device wired to in-memory collaborators.
pub struct TestContext {
    pub engine: RemoteSyncEngine,
    pub accounts: AccountService,
    pub tracker: Tracker,
    pub channel: EmailChannel,
    pub remote: MemoryRemoteStore,
    pub blobs: MemoryBlobStore,
    pub device: Arc<MemoryDeviceStorage>,
    pub mailbox: MemoryMailbox,
}

impl TestContext {
    /// A device with a healthy remote, fresh storage and its own mailbox.
    ///
    /// # Errors
    ///
    /// Returns an error if the bootstrap address does not parse.
    pub fn connected() -> Result<Self, EmailError> {
        Self::assemble(
            Some(MemoryRemoteStore::new()),
            Arc::new(MemoryDeviceStorage::new()),
            MemoryMailbox::new(),
            &ENVELOPE_KEY,
        )
    }

    /// A device without remote configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the bootstrap address does not parse.
    pub fn offline(mailbox: MemoryMailbox) -> Result<Self, EmailError> {
        Self::assemble(
            None,
            Arc::new(MemoryDeviceStorage::new()),
            mailbox,
            &ENVELOPE_KEY,
        )
    }

    /// Wire a device from explicit parts. `remote: None` leaves the engine
    /// without a backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the bootstrap address does not parse.
    pub fn assemble(
        remote: Option<MemoryRemoteStore>,
        device: Arc<MemoryDeviceStorage>,
        mailbox: MemoryMailbox,
        envelope_key: &[u8; 32],
    ) -> Result<Self, EmailError> {
        let store = LocalReplicaStore::new(device.clone(), bootstrap_admin()?);
        let blobs = MemoryBlobStore::new();

        let backend = remote.as_ref().map(|remote| RemoteBackend {
            documents: Arc::new(remote.clone()),
            blobs: Arc::new(blobs.clone()),
        });
        let engine = RemoteSyncEngine::new(store, backend, EngineOptions::default());
        let channel = EmailChannel::new(Arc::new(mailbox.clone()), EnvelopeCodec::new(envelope_key));

        Ok(Self {
            accounts: AccountService::new(engine.clone()),
            tracker: Tracker::new(engine.clone(), Some(channel.clone())),
            engine,
            channel,
            remote: remote.unwrap_or_default(),
            blobs,
            device,
            mailbox,
        })
    }

    #[must_use]
    pub fn store(&self) -> &LocalReplicaStore {
        self.engine.store()
    }
}

/// The bootstrap super-admin credentials.
///
/// # Errors
///
/// Returns an error if [`ROOT_EMAIL`] does not parse.
pub fn bootstrap_admin() -> Result<BootstrapAdmin, EmailError> {
    Ok(BootstrapAdmin {
        email: Email::parse(ROOT_EMAIL)?,
        password: SecretString::from(ROOT_PASSWORD.to_string()),
    })
}

/// A customer of `organization`.
#[must_use]
pub fn customer(id: &str, organization: &OrganizationId, created_by: &UserId) -> Customer {
    Customer {
        id: CustomerId::new(id),
        organization_id: organization.clone(),
        created_by: created_by.clone(),
        name: format!("Customer {id}"),
        contact_person: "Hank Scorpio".to_string(),
        phone: Some("+1 555 0100".to_string()),
        email: None,
        address: Some("1 Cypress Creek".to_string()),
        industry: Some("Manufacturing".to_string()),
        competitors: Vec::new(),
        annual_potential: Decimal::new(250_000, 0),
        created_at: Utc::now(),
    }
}

/// A retention plan against `customer`.
#[must_use]
pub fn retention_plan(id: &str, customer: &Customer) -> Plan {
    Plan {
        id: PlanId::new(id),
        organization_id: customer.organization_id.clone(),
        customer_id: customer.id.clone(),
        created_by: customer.created_by.clone(),
        details: PlanDetails::Retention(RetentionDetails {
            product: "Coolant X".to_string(),
            current_volume: Decimal::new(1200, 0),
            competitor_threat: Some("Initech".to_string()),
            actions: vec!["quarterly review".to_string()],
        }),
        status: "open".to_string(),
        status_updates: Vec::new(),
        attachments: Vec::new(),
        created_at: Utc
            .with_ymd_and_hms(2026, 3, 1, 9, 0, 0)
            .single()
            .unwrap_or_else(Utc::now),
    }
}
