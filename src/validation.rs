//! Validation Support
//!
//! This module applies a [`Schema`] to raw caller input. [`validate`] turns a JSON object into a
//! typed [`Record`] or reports every violation it found, never just the first one.
//!
//! # Example
//!
//! ```rust
//! use resourcecrate::schema::{Field, Schema};
//! use resourcecrate::validation::{validate, Mode, ViolationKind};
//! use serde_json::json;
//!
//! let schema = Schema::define("person", vec![
//!     Field::integer("id"),
//!     Field::string("name").required(),
//!     Field::integer("age").min(0),
//! ], "id")?;
//!
//! let errors = validate(&schema, &json!({"name": "Ann", "age": -1}), Mode::Create).unwrap_err();
//! assert_eq!(errors.len(), 1);
//! assert_eq!(errors.errors()[0].field, "age");
//! assert_eq!(errors.errors()[0].kind, ViolationKind::OutOfRange);
//! # Ok::<(), resourcecrate::SchemaError>(())
//! ```
//!
//! Coercion fails closed: strings are never read as numbers or booleans, floats are never
//! truncated into integers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::fmt;

use crate::schema::{Field, FieldType, IdentityPolicy, Schema};
use crate::value::{Identity, Record, Value};

/// What is wrong with a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    Missing,
    UnknownField,
    TypeMismatch,
    OutOfRange,
    Length,
    Pattern,
    NotInEnum,
    ImmutableField,
    NotAnObject,
    InvalidIdentity,
}

/// Validation error with field path, kind and message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    /// Dotted path of the offending field (`address.city`), empty for the input as a whole
    pub field: String,
    pub kind: ViolationKind,
    /// Human-readable error message
    pub message: String,
}

impl ValidationError {
    /// Create a new validation error
    #[must_use]
    pub fn new(field: impl Into<String>, kind: ViolationKind, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.field.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.field, self.message)
        }
    }
}

impl std::error::Error for ValidationError {}

/// Collection of validation errors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct ValidationErrors {
    errors: Vec<ValidationError>,
}

impl ValidationErrors {
    /// Create a new empty validation errors collection
    #[must_use]
    pub const fn new() -> Self {
        Self { errors: Vec::new() }
    }

    /// A collection holding one error
    #[must_use]
    pub fn single(field: impl Into<String>, kind: ViolationKind, message: impl Into<String>) -> Self {
        Self {
            errors: vec![ValidationError::new(field, kind, message)],
        }
    }

    /// Add a validation error
    pub fn add(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    /// Check if there are any errors
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Get the number of errors
    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Get all errors
    #[must_use]
    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    /// Errors reported for one field path
    pub fn for_field<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a ValidationError> + 'a {
        self.errors.iter().filter(move |e| e.field == field)
    }

    /// Convert to Result
    ///
    /// # Errors
    ///
    /// Returns `self` when at least one error was collected.
    pub fn result(self) -> Result<(), Self> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Validation failed with {} error(s):", self.errors.len())?;
        for error in &self.errors {
            write!(f, "\n  - {error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

impl IntoIterator for ValidationErrors {
    type Item = ValidationError;
    type IntoIter = std::vec::IntoIter<ValidationError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}

/// Which CRUD intent the input is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Full record: required fields must be present, absent optionals get their default or `null`
    Create,
    /// Partial record: only supplied fields are checked and returned
    Update,
}

/// Validate and normalize raw input against `schema`.
///
/// # Errors
///
/// Returns every violation found. A non-object input yields a single `NotAnObject` error.
pub fn validate(schema: &Schema, input: &JsonValue, mode: Mode) -> Result<Record, ValidationErrors> {
    let Some(object) = input.as_object() else {
        return Err(ValidationErrors::single(
            "",
            ViolationKind::NotAnObject,
            format!("Expected an object, got {}", json_type(input)),
        ));
    };
    let mut errors = ValidationErrors::new();
    let record = validate_object(schema, object, mode, "", &mut errors);
    errors.result().map(|()| record)
}

/// Check that `identity` has one non-null value of the right type per identity field.
///
/// # Errors
///
/// `InvalidIdentity` violations naming the offending key component.
pub fn validate_identity(schema: &Schema, identity: &Identity) -> Result<(), ValidationErrors> {
    let key = schema.identity_key();
    if identity.len() != key.len() {
        return Err(ValidationErrors::single(
            key.join(","),
            ViolationKind::InvalidIdentity,
            format!("Expected {} identity value(s), got {}", key.len(), identity.len()),
        ));
    }
    let mut errors = ValidationErrors::new();
    for (name, value) in key.iter().zip(identity.values()) {
        let Some(field) = schema.field(name) else { continue };
        if value.is_null() || !value.conforms_to(field.field_type()) {
            errors.add(ValidationError::new(
                name.as_str(),
                ViolationKind::InvalidIdentity,
                format!("Expected a {} identity, got {}", field.field_type().name(), value.type_name()),
            ));
        }
    }
    errors.result()
}

fn validate_object(
    schema: &Schema,
    object: &Map<String, JsonValue>,
    mode: Mode,
    prefix: &str,
    errors: &mut ValidationErrors,
) -> Record {
    for key in object.keys() {
        if schema.field(key).is_none() {
            errors.add(ValidationError::new(
                join_path(prefix, key),
                ViolationKind::UnknownField,
                "Unknown field",
            ));
        }
    }

    let mut record = Record::new();
    for field in schema.fields() {
        let path = join_path(prefix, field.name());
        let is_identity = schema.is_identity(field.name());
        match object.get(field.name()) {
            None if mode == Mode::Update => {}
            None => {
                if let Some(default) = field.default() {
                    record.push(field.name(), default.clone());
                } else if is_identity {
                    if schema.identity_policy() == IdentityPolicy::CallerAssigned {
                        errors.add(ValidationError::new(path, ViolationKind::Missing, "This field is required"));
                    }
                } else if field.is_required() {
                    errors.add(ValidationError::new(path, ViolationKind::Missing, "This field is required"));
                } else {
                    record.push(field.name(), Value::Null);
                }
            }
            Some(JsonValue::Null) => {
                if is_identity {
                    errors.add(ValidationError::new(
                        path,
                        ViolationKind::InvalidIdentity,
                        "Identity fields cannot be null",
                    ));
                } else if field.is_required() {
                    errors.add(ValidationError::new(path, ViolationKind::Missing, "This field is required"));
                } else {
                    record.push(field.name(), Value::Null);
                }
            }
            Some(raw) => {
                if let Some(value) = coerce_field(field, raw, &path, errors) {
                    record.push(field.name(), value);
                }
            }
        }
    }
    record
}

/// Coerce a non-null JSON value into `field`'s type and check its constraints
pub(crate) fn coerce_field(field: &Field, raw: &JsonValue, path: &str, errors: &mut ValidationErrors) -> Option<Value> {
    if let FieldType::Nested(schema) = field.field_type() {
        let Some(object) = raw.as_object() else {
            errors.add(ValidationError::new(
                path,
                ViolationKind::TypeMismatch,
                format!("Expected an object, got {}", json_type(raw)),
            ));
            return None;
        };
        let before = errors.len();
        let record = validate_object(schema, object, Mode::Create, path, errors);
        return (errors.len() == before).then_some(Value::Nested(record));
    }

    let value = match coerce_type(field.field_type(), raw, path) {
        Ok(value) => value,
        Err(err) => {
            errors.add(err);
            return None;
        }
    };

    let constraints = field.constraints();
    let checked = match &value {
        #[allow(clippy::cast_precision_loss)]
        Value::Integer(i) => validators::validate_range(path, *i as f64, constraints.min, constraints.max),
        Value::Float(f) => validators::validate_range(path, *f, constraints.min, constraints.max),
        Value::String(s) => validators::validate_length(path, s, constraints.min_length, constraints.max_length)
            .and_then(|()| match constraints.regex() {
                Some(regex) => validators::validate_pattern(path, s, regex),
                None => Ok(()),
            }),
        _ => Ok(()),
    };
    match checked {
        Ok(()) => Some(value),
        Err(err) => {
            errors.add(err);
            None
        }
    }
}

/// Type coercion only, shared with filter value parsing
pub(crate) fn coerce_type(field_type: &FieldType, raw: &JsonValue, path: &str) -> Result<Value, ValidationError> {
    let mismatch = || {
        ValidationError::new(
            path,
            ViolationKind::TypeMismatch,
            format!("Expected {}, got {}", field_type.name(), json_type(raw)),
        )
    };
    match (field_type, raw) {
        (FieldType::String, JsonValue::String(s)) => Ok(Value::String(s.clone())),
        (FieldType::Integer, JsonValue::Number(n)) => n.as_i64().map(Value::Integer).ok_or_else(mismatch),
        (FieldType::Float, JsonValue::Number(n)) => n.as_f64().map(Value::Float).ok_or_else(mismatch),
        (FieldType::Boolean, JsonValue::Bool(b)) => Ok(Value::Bool(*b)),
        (FieldType::Timestamp, JsonValue::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|t| Value::Timestamp(t.with_timezone(&Utc)))
            .map_err(|_| {
                ValidationError::new(
                    path,
                    ViolationKind::TypeMismatch,
                    format!("Expected an RFC 3339 timestamp, got `{s}`"),
                )
            }),
        (FieldType::Enum(members), JsonValue::String(s)) => validators::validate_member(path, s, members)
            .map(|()| Value::Enum(s.clone())),
        _ => Err(mismatch()),
    }
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

fn json_type(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(n) if n.is_f64() => "float",
        JsonValue::Number(_) => "integer",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

/// Helper validators for the field constraints
pub mod validators {
    use super::{ValidationError, ViolationKind};
    use regex::Regex;
    use std::fmt;

    /// Validate string length (in characters) is within range
    ///
    /// # Errors
    ///
    /// A `Length` violation when the string is too short or too long.
    pub fn validate_length(
        field: &str,
        value: &str,
        min: Option<usize>,
        max: Option<usize>,
    ) -> Result<(), ValidationError> {
        let len = value.chars().count();

        if let Some(min_len) = min {
            if len < min_len {
                return Err(ValidationError::new(
                    field,
                    ViolationKind::Length,
                    format!("Must be at least {min_len} characters"),
                ));
            }
        }

        if let Some(max_len) = max {
            if len > max_len {
                return Err(ValidationError::new(
                    field,
                    ViolationKind::Length,
                    format!("Must be at most {max_len} characters"),
                ));
            }
        }

        Ok(())
    }

    /// Validate number is within range
    ///
    /// # Errors
    ///
    /// An `OutOfRange` violation when the value is below `min` or above `max`.
    pub fn validate_range<T: PartialOrd + fmt::Display>(
        field: &str,
        value: T,
        min: Option<T>,
        max: Option<T>,
    ) -> Result<(), ValidationError> {
        if let Some(min_val) = min {
            if value < min_val {
                return Err(ValidationError::new(
                    field,
                    ViolationKind::OutOfRange,
                    format!("Must be at least {min_val}"),
                ));
            }
        }

        if let Some(max_val) = max {
            if value > max_val {
                return Err(ValidationError::new(
                    field,
                    ViolationKind::OutOfRange,
                    format!("Must be at most {max_val}"),
                ));
            }
        }

        Ok(())
    }

    /// Validate string matches a pattern
    ///
    /// # Errors
    ///
    /// A `Pattern` violation when `regex` does not match.
    pub fn validate_pattern(field: &str, value: &str, regex: &Regex) -> Result<(), ValidationError> {
        if regex.is_match(value) {
            Ok(())
        } else {
            Err(ValidationError::new(
                field,
                ViolationKind::Pattern,
                format!("Must match pattern `{}`", regex.as_str()),
            ))
        }
    }

    /// Validate value is one of the enum members
    ///
    /// # Errors
    ///
    /// A `NotInEnum` violation listing the allowed members.
    pub fn validate_member(field: &str, value: &str, members: &[String]) -> Result<(), ValidationError> {
        if members.iter().any(|m| m == value) {
            Ok(())
        } else {
            Err(ValidationError::new(
                field,
                ViolationKind::NotInEnum,
                format!("Must be one of: {}", members.join(", ")),
            ))
        }
    }
}
