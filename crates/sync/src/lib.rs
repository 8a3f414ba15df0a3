//! FieldTrack Sync - the data synchronization core.
//!
//! Keeps the four record collections (organizations, users, customers, plans)
//! consistent across three places:
//!
//! - a remote document store, authoritative while reachable
//! - a per-device snapshot used when offline
//! - an email account used as a best-effort broadcast channel between
//!   members of an organizational hierarchy
//!
//! # Flow
//!
//! 1. A caller asks the [`engine::RemoteSyncEngine`] to write a record
//! 2. While connected the write is committed remotely first, then applied to
//!    the [`store::LocalReplicaStore`]
//! 3. On any remote failure the engine demotes the session to local-only mode;
//!    the write is still applied locally and persisted to device storage
//! 4. Observers registered on the store are notified after every mutation
//! 5. Optionally the change is broadcast through the
//!    [`mail::EmailChannel`] to the acting user's hierarchy peers
//!
//! Inbound changes arrive either as remote subscription snapshots or by
//! polling the inbox for encrypted envelopes.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod accounts;
pub mod config;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod hierarchy;
pub mod mail;
pub mod notifier;
pub mod remote;
pub mod store;
pub mod tracker;

pub use accounts::{AccountError, AccountService};
pub use config::{BootstrapAdmin, ConfigError, SyncConfig};
pub use engine::{EngineOptions, LocalOnlyReason, RemoteSyncEngine, WriteOutcome};
pub use envelope::{Envelope, EnvelopeCodec};
pub use error::SyncError;
pub use hierarchy::{HierarchyGraph, resolve_recipients};
pub use mail::{BroadcastOutcome, EmailChannel};
pub use notifier::{ChangeEvent, ChangeKind, Subscription};
pub use store::{LocalReplicaStore, Mutation, Snapshot, SyncState};
pub use tracker::Tracker;
