//! Sales-tracking operations for one acting user.
//!
//! `Tracker` combines the engine's write policy with the optional email
//! channel: every successful change is offered to the actor's hierarchy
//! peers when a channel is authenticated. Broadcasting never fails a write.

use std::collections::BTreeSet;

use chrono::Utc;
use fieldtrack_core::{
    Attachment, Collection, Customer, Email, OrganizationId, PacketPayload, Plan, PlanId,
    SyncPacket, User,
};
use serde_json::Map;
use tracing::{debug, instrument, warn};

use crate::engine::{RemoteSyncEngine, WriteOutcome};
use crate::error::{Result, SyncError};
use crate::hierarchy::{HierarchyGraph, resolve_recipients};
use crate::mail::{BroadcastOutcome, EmailChannel};
use crate::store::Mutation;

/// Customer and plan operations.
#[derive(Debug, Clone)]
pub struct Tracker {
    engine: RemoteSyncEngine,
    channel: Option<EmailChannel>,
}

impl Tracker {
    #[must_use]
    pub const fn new(engine: RemoteSyncEngine, channel: Option<EmailChannel>) -> Self {
        Self { engine, channel }
    }

    #[must_use]
    pub const fn engine(&self) -> &RemoteSyncEngine {
        &self.engine
    }

    #[must_use]
    pub const fn channel(&self) -> Option<&EmailChannel> {
        self.channel.as_ref()
    }

    /// Add or update a customer.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Forbidden` if `actor` belongs to another
    /// organization, or the engine's write error.
    #[instrument(skip(self, actor, customer), fields(actor = %actor.email, customer = %customer.id))]
    pub async fn add_customer(&self, actor: &User, customer: Customer) -> Result<WriteOutcome> {
        authorize(actor, &customer.organization_id)?;

        let outcome = self.engine.write(customer.clone().into()).await?;
        self.announce(actor, PacketPayload::Customer(customer)).await;
        Ok(outcome)
    }

    /// Add a plan, uploading its inline attachments first.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Forbidden` if `actor` belongs to another
    /// organization, `SyncError::NotFound` if the customer is unknown,
    /// `SyncError::UploadFailure` if an attachment cannot be uploaded, or the
    /// engine's write error.
    #[instrument(skip(self, actor, plan), fields(actor = %actor.email, plan = %plan.id))]
    pub async fn add_plan(&self, actor: &User, mut plan: Plan) -> Result<WriteOutcome> {
        authorize(actor, &plan.organization_id)?;
        if self.engine.store().snapshot().customer(&plan.customer_id).is_none() {
            return Err(SyncError::NotFound(format!("customer {}", plan.customer_id)));
        }

        let attachments = std::mem::take(&mut plan.attachments);
        plan.attachments = self.engine.upload_attachments(&plan.id, attachments).await?;

        let outcome = self.engine.write(plan.clone().into()).await?;
        self.announce(actor, PacketPayload::Plan(plan)).await;
        Ok(outcome)
    }

    /// Set a plan's status and append it to the status log.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::NotFound` if the plan is unknown,
    /// `SyncError::Forbidden` if `actor` belongs to another organization, or
    /// the engine's write error.
    #[instrument(skip(self, actor), fields(actor = %actor.email))]
    pub async fn update_plan_status(
        &self,
        actor: &User,
        plan_id: &PlanId,
        status: &str,
    ) -> Result<WriteOutcome> {
        authorize(actor, &self.plan(plan_id)?.organization_id)?;

        let by = actor.id.clone();
        let status = status.to_string();
        let outcome = self
            .engine
            .modify(Collection::Plans, plan_id.as_str(), move |current| {
                let mut plan = into_plan(current)?;
                plan.record_status(status, by, Utc::now());

                let mut fields = Map::new();
                fields.insert("status".to_string(), serde_json::to_value(&plan.status)?);
                fields.insert(
                    "status_updates".to_string(),
                    serde_json::to_value(&plan.status_updates)?,
                );
                Ok(fields)
            })
            .await?;

        self.announce(actor, PacketPayload::Plan(self.plan(plan_id)?))
            .await;
        Ok(outcome)
    }

    /// Attach one more file to a plan.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::NotFound` if the plan is unknown,
    /// `SyncError::Forbidden` if `actor` belongs to another organization,
    /// `SyncError::UploadFailure` if the upload fails, or the engine's write
    /// error.
    #[instrument(skip(self, actor, attachment), fields(actor = %actor.email, attachment = %attachment.name))]
    pub async fn add_plan_attachment(
        &self,
        actor: &User,
        plan_id: &PlanId,
        attachment: Attachment,
    ) -> Result<WriteOutcome> {
        authorize(actor, &self.plan(plan_id)?.organization_id)?;

        let uploaded = self
            .engine
            .upload_attachments(plan_id, vec![attachment])
            .await?;

        let outcome = self
            .engine
            .modify(Collection::Plans, plan_id.as_str(), move |current| {
                let mut plan = into_plan(current)?;
                plan.attachments.extend(uploaded);

                let mut fields = Map::new();
                fields.insert(
                    "attachments".to_string(),
                    serde_json::to_value(&plan.attachments)?,
                );
                Ok(fields)
            })
            .await?;

        self.announce(actor, PacketPayload::Plan(self.plan(plan_id)?))
            .await;
        Ok(outcome)
    }

    /// Wrap a record into a packet and send it to `actor`'s peers.
    ///
    /// Without a configured channel nothing is sent.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::AuthRequired` if the channel is not authenticated,
    /// or the channel's send error.
    #[instrument(skip(self, actor, payload), fields(actor = %actor.email, kind = %payload.kind()))]
    pub async fn broadcast_change(
        &self,
        actor: &User,
        payload: PacketPayload,
    ) -> Result<BroadcastOutcome> {
        let Some(channel) = &self.channel else {
            debug!("No email channel configured");
            return Ok(BroadcastOutcome::Skipped);
        };
        let packet = SyncPacket::new(payload, actor.email.clone(), Utc::now());
        channel
            .broadcast_to(&packet, actor, self.recipients(actor))
            .await
    }

    /// The actor's own links plus links recorded on colleagues' profiles.
    fn recipients(&self, actor: &User) -> BTreeSet<Email> {
        let snapshot = self.engine.store().snapshot();
        let graph = HierarchyGraph::from_users(
            snapshot
                .users
                .iter()
                .filter(|user| user.organization_id == actor.organization_id),
        );

        let mut recipients = resolve_recipients(actor);
        recipients.extend(graph.recipients_for(&actor.email));
        recipients
    }

    /// Broadcast after a write when a session is available.
    async fn announce(&self, actor: &User, payload: PacketPayload) {
        let Some(channel) = &self.channel else {
            return;
        };
        if !channel.is_authenticated().await {
            debug!("Email channel not authenticated; change not broadcast");
            return;
        }
        if let Err(e) = self.broadcast_change(actor, payload).await {
            warn!(error = %e, "Broadcast failed");
        }
    }

    fn plan(&self, plan_id: &PlanId) -> Result<Plan> {
        self.engine
            .store()
            .snapshot()
            .plan(plan_id)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(format!("plan {plan_id}")))
    }
}

fn into_plan(mutation: Mutation) -> Result<Plan> {
    match mutation {
        Mutation::Plan(plan) => Ok(plan),
        other => Err(SyncError::NotFound(format!("plan {}", other.id()))),
    }
}

fn authorize(actor: &User, organization_id: &OrganizationId) -> Result<()> {
    if actor.is_super_admin() || actor.organization_id == *organization_id {
        return Ok(());
    }
    Err(SyncError::Forbidden(format!(
        "{} is not a member of {organization_id}",
        actor.email
    )))
}
