//! Command implementations.

pub mod mail;
pub mod org;
pub mod status;

use fieldtrack_sync::{AccountError, ConfigError, RemoteSyncEngine, SyncConfig, SyncError};
use thiserror::Error;
use tracing::warn;

/// Errors that can occur while running a command.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Account(#[from] AccountError),

    /// The mail variables are not set.
    #[error("email channel is not configured (set FIELDTRACK_MAIL_CLIENT_ID, FIELDTRACK_MAIL_CLIENT_SECRET and FIELDTRACK_MAIL_REDIRECT_URI)")]
    MailNotConfigured,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Build the engine and initialize it, falling back to the device replica.
pub async fn connect(config: &SyncConfig) -> Result<RemoteSyncEngine, CliError> {
    let engine = RemoteSyncEngine::from_config(config)?;
    if let Err(e) = engine.init().await {
        warn!(error = %e, "Remote store unavailable; using device replica");
    }
    Ok(engine)
}
