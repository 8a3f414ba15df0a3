//! Core types for FieldTrack.
//!
//! This module provides type-safe wrappers for domain concepts and the record
//! types stored in the four synchronized collections.

pub mod customer;
pub mod email;
pub mod id;
pub mod organization;
pub mod packet;
pub mod plan;
pub mod record;
pub mod role;
pub mod user;

pub use customer::{CompetitorShare, Customer};
pub use email::{Email, EmailError};
pub use id::*;
pub use organization::Organization;
pub use packet::{PacketKind, PacketPayload, SyncPacket};
pub use plan::{
    Attachment, AttachmentPayload, ConversionDetails, MediaKind, NewProjectDetails, Plan,
    PlanDetails, PlanKind, RetentionDetails, StatusUpdate,
};
pub use record::{Collection, Record};
pub use role::Role;
pub use user::{Hierarchy, User};
