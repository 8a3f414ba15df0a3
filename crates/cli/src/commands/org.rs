//! Organization management commands.
//!
//! Approvals act as the bootstrap super-admin configured through
//! `FIELDTRACK_BOOTSTRAP_ADMIN_EMAIL` / `FIELDTRACK_BOOTSTRAP_ADMIN_PASSWORD`.

use std::io::Write;

use fieldtrack_core::OrganizationId;
use fieldtrack_sync::{AccountService, SyncConfig};
use secrecy::ExposeSecret;
use tracing::info;

use super::{CliError, connect};

/// Print every organization with its approval state.
///
/// # Errors
///
/// Returns an error if the engine cannot be built or stdout is closed.
pub async fn list(config: &SyncConfig) -> Result<(), CliError> {
    let engine = connect(config).await?;

    let mut out = std::io::stdout().lock();
    for organization in engine.store().organizations() {
        let state = if organization.allows_sign_in() {
            "approved"
        } else {
            "pending"
        };
        writeln!(out, "{}\t{state}\t{}", organization.id, organization.name)?;
    }
    Ok(())
}

/// Approve an organization.
///
/// # Errors
///
/// Returns an error if the bootstrap credentials are rejected or the
/// organization does not exist.
pub async fn approve(config: &SyncConfig, id: &str) -> Result<(), CliError> {
    let engine = connect(config).await?;
    let accounts = AccountService::new(engine.clone());

    let admin = &config.bootstrap_admin;
    let actor = accounts
        .login(admin.email.as_str(), admin.password.expose_secret())
        .await?;

    let organization = accounts
        .approve_organization(&actor, &OrganizationId::new(id))
        .await?;

    info!(
        organization = %organization.id,
        name = %organization.name,
        mode = %engine.mode(),
        "Organization approved"
    );
    Ok(())
}
