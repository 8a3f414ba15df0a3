//! Remote collaborators: the document store and blob storage.
//!
//! The engine only sees these two narrow traits. The wire protocol of the
//! managed backend lives entirely in the implementations:
//!
//! - [`http`]: REST/JSON over reqwest
//! - [`memory`]: in-process maps with failure injection, for tests and demos
//!
//! Every document read through a [`RemoteStore`] should be passed through
//! [`sanitize::sanitize_document`] before it reaches the replica.

pub mod http;
pub mod memory;
pub mod sanitize;

use async_trait::async_trait;
use fieldtrack_core::Collection;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::mpsc;

pub use http::{HttpBlobStore, HttpRemoteStore};
pub use memory::{MemoryBlobStore, MemoryRemoteStore};

/// Full-collection snapshots pushed by a live subscription.
pub type SnapshotStream = mpsc::Receiver<Result<Vec<Value>, RemoteError>>;

/// Errors from the remote document store or blob storage.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with a non-success status.
    #[error("remote returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Failed to parse a response.
    #[error("parse error: {0}")]
    Parse(String),

    /// The call did not finish within the configured timeout.
    #[error("remote call timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The backend refused the call outright.
    #[error("remote unavailable: {0}")]
    Unavailable(String),

    /// A live subscription ended.
    #[error("subscription to {0} closed")]
    SubscriptionClosed(Collection),
}

/// Narrow read/write/subscribe interface over the four collections.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Every document of `collection`.
    async fn fetch_all(&self, collection: Collection) -> Result<Vec<Value>, RemoteError>;

    /// Start receiving full snapshots of `collection` whenever it changes.
    ///
    /// The stream ends (or yields an error) when the subscription breaks.
    async fn subscribe(&self, collection: Collection) -> Result<SnapshotStream, RemoteError>;

    /// Create or replace one document.
    async fn put(&self, collection: Collection, id: &str, document: Value) -> Result<(), RemoteError>;

    /// Merge `fields` into one existing document.
    async fn patch(
        &self,
        collection: Collection,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<(), RemoteError>;
}

/// Durable storage for attachment payloads.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` at `path` and return the durable download URL.
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str)
    -> Result<String, RemoteError>;
}
