//! `status` - sync mode and collection counts.

use std::io::Write;

use fieldtrack_core::Collection;
use fieldtrack_sync::SyncConfig;

use super::{CliError, connect};

/// Initialize the engine and print what the replica holds.
///
/// # Errors
///
/// Returns an error if the engine cannot be built or stdout is closed.
pub async fn show(config: &SyncConfig) -> Result<(), CliError> {
    let engine = connect(config).await?;
    let store = engine.store();
    let snapshot = store.snapshot();
    let unconfirmed = store.unconfirmed_records().await.len();

    let mut out = std::io::stdout().lock();
    writeln!(out, "mode:          {}", engine.mode())?;
    writeln!(
        out,
        "remote:        {}",
        config
            .remote()
            .map_or("not configured", |remote| remote.base_url.as_str())
    )?;
    writeln!(out, "data dir:      {}", config.data_dir.display())?;
    for collection in Collection::ALL {
        writeln!(
            out,
            "{:<15}{}",
            format!("{collection}:"),
            snapshot.len(collection)
        )?;
    }
    writeln!(out, "unconfirmed:   {unconfirmed}")?;
    Ok(())
}
