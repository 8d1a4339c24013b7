//! Field value validation, normalisation and diffing.
//!
//! Caller values arrive as [`FieldInput`]; the remote service stores each
//! value of a multi-valued field as its own field-value row, so a normalised
//! value is always a list of wire scalars.

use chrono::{DateTime, NaiveDateTime};
use serde_json::{json, Number, Value};

use crate::affinity::types::{FieldValue, Location};
use crate::error::SyncError;

/// Wire format for datetimes: ISO-8601 without offset or fraction.
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Shape of a single stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    /// Person or company id.
    EntityRef,
    Text,
    Number,
    DateTime,
    Location,
}

/// Declared value type of a field, parsed from the versioned metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Person,
    PersonMulti,
    Company,
    CompanyMulti,
    Text,
    TextMulti,
    Number,
    NumberMulti,
    DateTime,
    Location,
    LocationMulti,
    Dropdown,
    DropdownMulti,
}

impl ValueType {
    pub fn parse(raw: &str) -> Result<Self, SyncError> {
        let value_type = match raw {
            "person" => ValueType::Person,
            "person-multi" => ValueType::PersonMulti,
            "company" => ValueType::Company,
            "company-multi" => ValueType::CompanyMulti,
            "text" | "filterable-text" => ValueType::Text,
            "text-multi" | "filterable-text-multi" => ValueType::TextMulti,
            "number" => ValueType::Number,
            "number-multi" => ValueType::NumberMulti,
            "datetime" => ValueType::DateTime,
            "location" => ValueType::Location,
            "location-multi" => ValueType::LocationMulti,
            "dropdown" | "ranked-dropdown" => ValueType::Dropdown,
            "dropdown-multi" => ValueType::DropdownMulti,
            other => return Err(SyncError::UnknownFieldType(other.to_string())),
        };
        Ok(value_type)
    }

    pub fn element(&self) -> ElementKind {
        match self {
            ValueType::Person
            | ValueType::PersonMulti
            | ValueType::Company
            | ValueType::CompanyMulti => ElementKind::EntityRef,
            ValueType::Text
            | ValueType::TextMulti
            | ValueType::Dropdown
            | ValueType::DropdownMulti => ElementKind::Text,
            ValueType::Number | ValueType::NumberMulti => ElementKind::Number,
            ValueType::DateTime => ElementKind::DateTime,
            ValueType::Location | ValueType::LocationMulti => ElementKind::Location,
        }
    }

    pub fn is_multi(&self) -> bool {
        matches!(
            self,
            ValueType::PersonMulti
                | ValueType::CompanyMulti
                | ValueType::TextMulti
                | ValueType::NumberMulti
                | ValueType::LocationMulti
                | ValueType::DropdownMulti
        )
    }
}

/// A caller-supplied field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldInput {
    /// Clears the field when overwriting.
    Null,
    Int(i64),
    IntList(Vec<i64>),
    Number(f64),
    NumberList(Vec<f64>),
    Text(String),
    TextList(Vec<String>),
    DateTime(NaiveDateTime),
    Location(Location),
    LocationList(Vec<Location>),
    /// A list with no element type, such as `[]`. Clears a multi-valued field.
    EmptyList,
}

impl FieldInput {
    pub fn is_list(&self) -> bool {
        matches!(
            self,
            FieldInput::IntList(_)
                | FieldInput::NumberList(_)
                | FieldInput::TextList(_)
                | FieldInput::LocationList(_)
                | FieldInput::EmptyList
        )
    }

    fn describe(&self) -> &'static str {
        match self {
            FieldInput::Null => "null",
            FieldInput::Int(_) => "integer",
            FieldInput::IntList(_) => "integer list",
            FieldInput::Number(_) => "number",
            FieldInput::NumberList(_) => "number list",
            FieldInput::Text(_) => "text",
            FieldInput::TextList(_) => "text list",
            FieldInput::DateTime(_) => "datetime",
            FieldInput::Location(_) => "location",
            FieldInput::LocationList(_) => "location list",
            FieldInput::EmptyList => "empty list",
        }
    }

    /// Whether each element fits `kind`. Integers are accepted as numbers.
    fn fits(&self, kind: ElementKind) -> bool {
        match self {
            FieldInput::Null | FieldInput::EmptyList => true,
            FieldInput::Int(_) | FieldInput::IntList(_) => {
                matches!(kind, ElementKind::EntityRef | ElementKind::Number)
            }
            FieldInput::Number(_) | FieldInput::NumberList(_) => kind == ElementKind::Number,
            FieldInput::Text(_) | FieldInput::TextList(_) => kind == ElementKind::Text,
            FieldInput::DateTime(_) => kind == ElementKind::DateTime,
            FieldInput::Location(_) | FieldInput::LocationList(_) => {
                kind == ElementKind::Location
            }
        }
    }
}

impl From<&str> for FieldInput {
    fn from(value: &str) -> Self {
        FieldInput::Text(value.to_string())
    }
}

impl From<String> for FieldInput {
    fn from(value: String) -> Self {
        FieldInput::Text(value)
    }
}

impl From<i64> for FieldInput {
    fn from(value: i64) -> Self {
        FieldInput::Int(value)
    }
}

impl From<f64> for FieldInput {
    fn from(value: f64) -> Self {
        FieldInput::Number(value)
    }
}

impl From<NaiveDateTime> for FieldInput {
    fn from(value: NaiveDateTime) -> Self {
        FieldInput::DateTime(value)
    }
}

impl From<Location> for FieldInput {
    fn from(value: Location) -> Self {
        FieldInput::Location(value)
    }
}

impl From<Vec<String>> for FieldInput {
    fn from(value: Vec<String>) -> Self {
        FieldInput::TextList(value)
    }
}

impl From<Vec<i64>> for FieldInput {
    fn from(value: Vec<i64>) -> Self {
        FieldInput::IntList(value)
    }
}

/// Validate `input` against the field's declared type and multiplicity and
/// return the wire values to store.
pub fn normalize(
    field_name: &str,
    input: &FieldInput,
    declared: &str,
    allows_multiple: bool,
) -> Result<Vec<Value>, SyncError> {
    let value_type = ValueType::parse(declared)?;

    if input.is_list() && !allows_multiple {
        return Err(SyncError::Multiplicity(field_name.to_string()));
    }

    if !input.fits(value_type.element()) || (input.is_list() && !value_type.is_multi()) {
        return Err(SyncError::TypeMismatch {
            field: field_name.to_string(),
            expected: declared.to_string(),
            found: input.describe().to_string(),
        });
    }

    Ok(to_wire_values(input))
}

/// Wire values for `input` without type checks. Null and empty entries are
/// dropped and a scalar becomes a one-element list.
pub fn to_wire_values(input: &FieldInput) -> Vec<Value> {
    match input {
        FieldInput::Null | FieldInput::EmptyList => Vec::new(),
        FieldInput::Int(v) => vec![json!(v)],
        FieldInput::IntList(vs) => vs.iter().map(|v| json!(v)).collect(),
        FieldInput::Number(v) => number(*v).into_iter().collect(),
        FieldInput::NumberList(vs) => vs.iter().filter_map(|v| number(*v)).collect(),
        FieldInput::Text(v) => text(v).into_iter().collect(),
        FieldInput::TextList(vs) => vs.iter().filter_map(|v| text(v)).collect(),
        FieldInput::DateTime(dt) => vec![Value::String(format_datetime(dt))],
        FieldInput::Location(loc) => location(loc).into_iter().collect(),
        FieldInput::LocationList(locs) => locs.iter().filter_map(location).collect(),
    }
}

pub fn format_datetime(dt: &NaiveDateTime) -> String {
    dt.format(DATETIME_FORMAT).to_string()
}

fn number(v: f64) -> Option<Value> {
    Number::from_f64(v).map(Value::Number)
}

fn text(v: &str) -> Option<Value> {
    if v.trim().is_empty() {
        None
    } else {
        Some(Value::String(v.to_string()))
    }
}

fn location(loc: &Location) -> Option<Value> {
    let parts = [&loc.street_address, &loc.city, &loc.state, &loc.country];
    if parts.iter().all(|p| p.as_deref().map_or(true, str::is_empty)) {
        return None;
    }
    Some(json!({
        "streetAddress": loc.street_address,
        "city": loc.city,
        "state": loc.state,
        "country": loc.country,
    }))
}

/// Equality between a normalised desired value and a value read back from
/// the service.
pub fn wire_eq(desired: &Value, current: &Value) -> bool {
    if desired == current {
        return true;
    }
    match (desired, current) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        // Dropdowns read back as `{id, text}`.
        (Value::String(a), Value::Object(obj)) if obj.contains_key("text") => {
            obj.get("text").and_then(Value::as_str) == Some(a.as_str())
        }
        (Value::String(a), Value::String(b)) => same_instant(a, b),
        (Value::Object(_), Value::Object(_)) => {
            match (
                serde_json::from_value::<Location>(desired.clone()),
                serde_json::from_value::<Location>(current.clone()),
            ) {
                (Ok(a), Ok(b)) => a == b,
                _ => false,
            }
        }
        _ => false,
    }
}

/// A desired wire datetime against a stored one that may carry an offset.
fn same_instant(desired: &str, current: &str) -> bool {
    let Ok(wanted) = NaiveDateTime::parse_from_str(desired, DATETIME_FORMAT) else {
        return false;
    };
    let stored = DateTime::parse_from_rfc3339(current)
        .map(|dt| dt.naive_utc())
        .or_else(|_| NaiveDateTime::parse_from_str(current, DATETIME_FORMAT));
    matches!(stored, Ok(stored) if stored == wanted)
}

/// Remote operations needed to move one field from `current` to `desired`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldDiff {
    pub to_add: Vec<Value>,
    pub to_remove: Vec<FieldValue>,
}

impl FieldDiff {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Diff desired wire values against the stored values of one field.
///
/// Existing values win unless `overwrite` is set.
pub fn reconcile(desired: &[Value], current: &[FieldValue], overwrite: bool) -> FieldDiff {
    if !current.is_empty() && !overwrite {
        return FieldDiff::default();
    }

    let to_remove = current
        .iter()
        .filter(|fv| !desired.iter().any(|d| wire_eq(d, &fv.value)))
        .cloned()
        .collect();
    let to_add = desired
        .iter()
        .filter(|d| !current.iter().any(|fv| wire_eq(d, &fv.value)))
        .cloned()
        .collect();

    FieldDiff { to_add, to_remove }
}
