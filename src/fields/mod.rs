//! Field metadata resolution and value codec.

pub mod catalog;
pub mod codec;

pub use catalog::{parse_legacy_id, FieldCatalog, FieldMap, ResolvedField};
pub use codec::{normalize, reconcile, to_wire_values, wire_eq, FieldDiff, FieldInput, ValueType};
