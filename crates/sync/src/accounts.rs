//! Account service: registration, approval and sign-in.
//!
//! Accounts are ordinary records in the `organizations` and `users`
//! collections, so every change goes through the [`RemoteSyncEngine`] and
//! follows the same connected / local-only write policy as business data.
//!
//! # Approval Model
//!
//! - A registered organization and its first org-admin start unapproved
//! - Only a super-admin approves organizations; doing so also approves the
//!   organization's pending org-admins
//! - Users are approved by a super-admin or an org-admin of their organization
//! - Members of the system organization never wait for organization approval

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use chrono::Utc;
use fieldtrack_core::{
    Collection, Email, Hierarchy, Organization, OrganizationId, Role, User, UserId,
};
use serde_json::Map;
use thiserror::Error;
use tracing::{info, instrument};

use crate::engine::RemoteSyncEngine;
use crate::error::SyncError;
use crate::store::Mutation;

/// Minimum password length.
const MIN_PASSWORD_LENGTH: usize = 8;

/// Errors from account operations.
#[derive(Debug, Error)]
pub enum AccountError {
    /// Invalid email format.
    #[error("invalid email: {0}")]
    InvalidEmail(#[from] fieldtrack_core::EmailError),

    /// Wrong password or unknown account.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// The organization or the user has not been approved yet.
    #[error("pending approval: {0}")]
    PendingApproval(String),

    /// An account with this email already exists.
    #[error("user already exists")]
    UserAlreadyExists,

    /// Password too weak or invalid.
    #[error("password validation failed: {0}")]
    WeakPassword(String),

    /// The organization or user does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The acting user may not perform the operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Password hashing error.
    #[error("password hashing error")]
    PasswordHash,

    /// The write could not be applied.
    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl From<serde_json::Error> for AccountError {
    fn from(err: serde_json::Error) -> Self {
        Self::Sync(SyncError::Serialization(err))
    }
}

/// Account operations over the sync engine.
#[derive(Debug, Clone)]
pub struct AccountService {
    engine: RemoteSyncEngine,
}

impl AccountService {
    #[must_use]
    pub const fn new(engine: RemoteSyncEngine) -> Self {
        Self { engine }
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register a new organization together with its first administrator.
    ///
    /// Both start unapproved.
    ///
    /// # Errors
    ///
    /// Returns `AccountError::InvalidEmail` if the email format is invalid.
    /// Returns `AccountError::WeakPassword` if the password doesn't meet requirements.
    /// Returns `AccountError::UserAlreadyExists` if the email is already registered.
    #[instrument(skip(self, password))]
    pub async fn register_organization(
        &self,
        name: &str,
        admin_email: &str,
        admin_name: &str,
        password: &str,
    ) -> Result<(Organization, User), AccountError> {
        let email = Email::parse(admin_email)?;
        validate_password(password)?;
        self.ensure_unregistered(&email)?;

        let now = Utc::now();
        let organization = Organization::register(name.trim(), now);
        self.engine.write(organization.clone().into()).await?;

        let admin = User {
            id: UserId::generate(),
            email,
            name: admin_name.trim().to_string(),
            password_hash: hash_password(password)?,
            role: Role::OrgAdmin,
            organization_id: organization.id.clone(),
            approved: false,
            hierarchy: Hierarchy::default(),
            created_at: now,
        };
        self.engine.write(admin.clone().into()).await?;

        info!(organization = %organization.id, admin = %admin.email, "Organization registered");
        Ok((organization, admin))
    }

    /// Register a user in an existing organization. The user starts
    /// unapproved.
    ///
    /// # Errors
    ///
    /// Returns `AccountError::NotFound` if the organization does not exist.
    /// Returns `AccountError::Forbidden` when asked for a super-admin.
    /// Returns `AccountError::UserAlreadyExists` if the email is already registered.
    #[instrument(skip(self, password))]
    pub async fn register_user(
        &self,
        organization_id: &OrganizationId,
        email: &str,
        name: &str,
        password: &str,
        role: Role,
    ) -> Result<User, AccountError> {
        let email = Email::parse(email)?;
        validate_password(password)?;

        if role == Role::SuperAdmin {
            return Err(AccountError::Forbidden(
                "super-admins cannot self-register".to_string(),
            ));
        }
        if self
            .engine
            .store()
            .snapshot()
            .organization(organization_id)
            .is_none()
        {
            return Err(AccountError::NotFound(format!(
                "organization {organization_id}"
            )));
        }
        self.ensure_unregistered(&email)?;

        let user = User {
            id: UserId::generate(),
            email,
            name: name.trim().to_string(),
            password_hash: hash_password(password)?,
            role,
            organization_id: organization_id.clone(),
            approved: false,
            hierarchy: Hierarchy::default(),
            created_at: Utc::now(),
        };
        self.engine.write(user.clone().into()).await?;

        info!(user = %user.email, %role, "User registered");
        Ok(user)
    }

    // =========================================================================
    // Sign-in
    // =========================================================================

    /// Sign in with email and password.
    ///
    /// # Errors
    ///
    /// Returns `AccountError::InvalidCredentials` if the email/password is wrong.
    /// Returns `AccountError::PendingApproval` if the organization or the
    /// user has not been approved.
    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<User, AccountError> {
        let email = Email::parse(email)?;
        let snapshot = self.engine.store().snapshot();

        let user = snapshot
            .user_by_email(&email)
            .ok_or(AccountError::InvalidCredentials)?;
        verify_password(password, &user.password_hash)?;

        let organization_approved = snapshot
            .organization(&user.organization_id)
            .is_some_and(Organization::allows_sign_in);
        if !organization_approved {
            return Err(AccountError::PendingApproval(format!(
                "organization {} awaits approval",
                user.organization_id
            )));
        }
        if !user.approved {
            return Err(AccountError::PendingApproval(
                "account awaits approval".to_string(),
            ));
        }

        Ok(user.clone())
    }

    // =========================================================================
    // Administration
    // =========================================================================

    /// Approve an organization and its pending org-admins.
    ///
    /// # Errors
    ///
    /// Returns `AccountError::Forbidden` unless `actor` is a super-admin.
    /// Returns `AccountError::NotFound` if the organization does not exist.
    #[instrument(skip(self, actor), fields(actor = %actor.email))]
    pub async fn approve_organization(
        &self,
        actor: &User,
        organization_id: &OrganizationId,
    ) -> Result<Organization, AccountError> {
        if !actor.is_super_admin() {
            return Err(AccountError::Forbidden(
                "only super-admins approve organizations".to_string(),
            ));
        }

        let snapshot = self.engine.store().snapshot();
        let mut organization = snapshot
            .organization(organization_id)
            .cloned()
            .ok_or_else(|| AccountError::NotFound(format!("organization {organization_id}")))?;

        organization.approved = true;
        self.engine.write(organization.clone().into()).await?;

        let pending_admins = snapshot.users.iter().filter(|u| {
            u.organization_id == *organization_id && u.role == Role::OrgAdmin && !u.approved
        });
        for admin in pending_admins {
            let mut admin = admin.clone();
            admin.approved = true;
            self.engine.write(Mutation::User(admin)).await?;
        }

        info!(organization = %organization.id, "Organization approved");
        Ok(organization)
    }

    /// Approve a user.
    ///
    /// # Errors
    ///
    /// Returns `AccountError::Forbidden` unless `actor` administers the
    /// user's organization.
    /// Returns `AccountError::NotFound` if the user does not exist.
    #[instrument(skip(self, actor), fields(actor = %actor.email))]
    pub async fn approve_user(&self, actor: &User, user_id: &UserId) -> Result<User, AccountError> {
        let mut user = self.administered_user(actor, user_id)?;
        user.approved = true;
        self.engine.write(user.clone().into()).await?;

        info!(user = %user.email, "User approved");
        Ok(user)
    }

    /// Replace a user's hierarchy links.
    ///
    /// # Errors
    ///
    /// Returns `AccountError::Forbidden` unless `actor` administers the
    /// user's organization.
    /// Returns `AccountError::NotFound` if the user does not exist.
    #[instrument(skip(self, actor, hierarchy), fields(actor = %actor.email))]
    pub async fn set_hierarchy(
        &self,
        actor: &User,
        user_id: &UserId,
        hierarchy: Hierarchy,
    ) -> Result<User, AccountError> {
        let user = self.administered_user(actor, user_id)?;

        let mut fields = Map::new();
        fields.insert("hierarchy".to_string(), serde_json::to_value(&hierarchy)?);
        self.engine
            .update_fields(Collection::Users, user.id.as_str(), fields)
            .await?;

        Ok(User { hierarchy, ..user })
    }

    fn ensure_unregistered(&self, email: &Email) -> Result<(), AccountError> {
        if self.engine.store().snapshot().user_by_email(email).is_some() {
            return Err(AccountError::UserAlreadyExists);
        }
        Ok(())
    }

    fn administered_user(&self, actor: &User, user_id: &UserId) -> Result<User, AccountError> {
        let user = self
            .engine
            .store()
            .snapshot()
            .user(user_id)
            .cloned()
            .ok_or_else(|| AccountError::NotFound(format!("user {user_id}")))?;

        let allowed = actor.is_super_admin()
            || (actor.role.can_approve_users()
                && actor.approved
                && actor.organization_id == user.organization_id);
        if !allowed {
            return Err(AccountError::Forbidden(format!(
                "{} does not administer {}",
                actor.email, user.organization_id
            )));
        }
        Ok(user)
    }
}

/// Validate password meets requirements.
fn validate_password(password: &str) -> Result<(), AccountError> {
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(AccountError::WeakPassword(format!(
            "password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    Ok(())
}

/// Hash a password using Argon2id.
///
/// # Errors
///
/// Returns `AccountError::PasswordHash` if hashing fails.
pub fn hash_password(password: &str) -> Result<String, AccountError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| AccountError::PasswordHash)
}

/// Verify a password against a hash.
fn verify_password(password: &str, hash: &str) -> Result<(), AccountError> {
    let parsed_hash = PasswordHash::new(hash).map_err(|_| AccountError::InvalidCredentials)?;
    let argon2 = Argon2::default();

    argon2
        .verify_password(password.as_bytes(), &parsed_hash)
        .map_err(|_| AccountError::InvalidCredentials)
}
