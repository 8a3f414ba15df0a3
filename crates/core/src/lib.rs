//! FieldTrack Core - Shared domain types.
//!
//! This crate provides the record types shared by every FieldTrack component:
//! - `sync` - Local replica, remote sync engine and email transport channel
//! - `cli` - Command-line tools for inspecting and driving a device
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no storage access, no HTTP
//! clients. Everything that moves records between devices lives in the sync
//! crate and speaks in terms of these types.
//!
//! # Modules
//!
//! - [`types`] - Type-safe IDs, emails, roles and the four record collections

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
