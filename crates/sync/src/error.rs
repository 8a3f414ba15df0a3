//! Top-level error type of the sync core.

use thiserror::Error;

use crate::mail::MailError;
use crate::remote::RemoteError;
use crate::store::StorageError;

/// Errors surfaced by the sync core.
///
/// Remote and transport failures are normally absorbed by the engine as a
/// transition to local-only mode; only the first `init()` and explicit
/// uploads return them to the caller.
#[derive(Debug, Error)]
pub enum SyncError {
    /// No remote configuration was supplied.
    #[error("remote configuration missing: {0}")]
    ConfigMissing(String),

    /// The remote document store could not be reached or rejected a call.
    #[error("remote store unavailable: {0}")]
    RemoteUnavailable(#[from] RemoteError),

    /// An inline attachment could not be uploaded to blob storage.
    #[error("attachment upload failed: {0}")]
    UploadFailure(String),

    /// An envelope could not be decrypted or parsed.
    #[error("envelope could not be decoded")]
    DecodeFailure,

    /// The email channel needs (re-)authorization by the user.
    #[error("email authorization required: {0}")]
    AuthRequired(String),

    /// Device storage read or write failed.
    #[error("device storage error: {0}")]
    Storage(#[from] StorageError),

    /// A record references an organization that does not exist.
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// The requested record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The acting user may not perform the operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Sending through the email channel failed.
    #[error("mail transport error: {0}")]
    Mail(#[from] MailError),

    /// A record could not be converted to or from its document form.
    #[error("document serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A background write task was cancelled or panicked.
    #[error("write task interrupted: {0}")]
    Interrupted(String),
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Interrupted(err.to_string())
    }
}

/// Result alias for the sync core.
pub type Result<T, E = SyncError> = std::result::Result<T, E>;
