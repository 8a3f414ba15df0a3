//! Sync packets: the unit carried by the email transport channel.
//!
//! A packet is built right before it is sent and discarded as soon as its
//! payload has been folded into the receiving replica. It is never stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::customer::Customer;
use super::email::Email;
use super::plan::Plan;
use super::user::User;

/// Packet type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketKind {
    Plan,
    Customer,
    UserRegistration,
}

impl PacketKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Customer => "customer",
            Self::UserRegistration => "user_registration",
        }
    }
}

impl std::fmt::Display for PacketKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The record carried by a packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "record", rename_all = "snake_case")]
pub enum PacketPayload {
    Plan(Plan),
    Customer(Customer),
    UserRegistration(User),
}

impl PacketPayload {
    #[must_use]
    pub const fn kind(&self) -> PacketKind {
        match self {
            Self::Plan(_) => PacketKind::Plan,
            Self::Customer(_) => PacketKind::Customer,
            Self::UserRegistration(_) => PacketKind::UserRegistration,
        }
    }
}

/// A change notification travelling between devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPacket {
    pub payload: PacketPayload,
    pub sent_at: DateTime<Utc>,
    pub sender: Email,
}

impl SyncPacket {
    #[must_use]
    pub const fn new(payload: PacketPayload, sender: Email, sent_at: DateTime<Utc>) -> Self {
        Self {
            payload,
            sent_at,
            sender,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> PacketKind {
        self.payload.kind()
    }
}
