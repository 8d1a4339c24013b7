//! Find-or-create reconciliation against the remote service.

pub mod entities;
pub mod list_entries;

pub use entities::{CachedLookup, EntityResolver};
pub use list_entries::ListEntryReconciler;
