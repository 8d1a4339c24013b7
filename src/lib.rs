//! Affinity CRM mirror and reconciling writer.
//!
//! The write path maps intents ("this company should exist with these field
//! values") onto the minimal set of remote creates, updates and deletes:
//! - [`reconcile`] finds or creates people, companies, opportunities and list entries
//! - [`fields`] resolves field names across both API generations and diffs values
//! - [`writer::Writer`] composes them and records rate-limit entitlements in [`db`]

pub mod affinity;
pub mod config;
pub mod db;
pub mod error;
pub mod fields;
pub mod intent;
mod migrations;
pub mod reconcile;
pub mod writer;

#[cfg(test)]
mod test_support;

pub use error::SyncError;
pub use writer::{ListScope, UpdateSummary, Writer};
