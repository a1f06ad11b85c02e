//! # Schema Model
//!
//! A [`Schema`] is the declarative description of a resource: its fields, their semantic types
//! and constraints, and the identity key. Schemas are checked once when they are defined and are
//! immutable afterwards; cloning one is an `Arc` bump.
//!
//! ```rust
//! use resourcecrate::schema::{Field, IdentityPolicy, Schema};
//!
//! let address = Schema::embedded("address", vec![
//!     Field::string("city").required(),
//!     Field::string("zip").pattern(r"^\d{5}$"),
//! ])?;
//!
//! let person = Schema::builder("person")
//!     .field(Field::integer("id"))
//!     .field(Field::string("name").required().min_length(1))
//!     .field(Field::integer("age").min(0))
//!     .field(Field::enumeration("role", ["admin", "member"]).default_value("member"))
//!     .field(Field::nested("address", address))
//!     .identity("id")
//!     .policy(IdentityPolicy::BackendGenerated)
//!     .build()?;
//!
//! assert_eq!(person.identity_key(), ["id"]);
//! # Ok::<(), resourcecrate::SchemaError>(())
//! ```

mod field;

pub use field::{Bound, Constraints, Field, FieldType};

use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;

use crate::errors::SchemaError;
use crate::filtering::conditions::{FilterOp, operators_for};
use crate::validation::{self, ValidationErrors};

/// Who assigns the identity of a new record.
///
/// Without an explicit policy a single integer or string key is `BackendGenerated` and any other
/// key is `CallerAssigned`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityPolicy {
    /// The caller must supply every identity field on create
    CallerAssigned,
    /// The engine generates a UUID v4 string when the caller omits it
    EngineGenerated,
    /// The repository assigns it (auto-increment or UUID) when the caller omits it. Only a single
    /// integer or string key qualifies.
    BackendGenerated,
}

/// Immutable resource definition.
#[derive(Debug, Clone)]
pub struct Schema(Arc<SchemaInner>);

#[derive(Debug)]
struct SchemaInner {
    name: String,
    fields: Vec<Field>,
    identity_key: Vec<String>,
    identity_policy: IdentityPolicy,
}

impl Schema {
    /// Define a resource schema with the default identity policy for its key.
    ///
    /// # Errors
    ///
    /// See [`SchemaBuilder::build`].
    pub fn define(
        name: impl Into<String>,
        fields: impl IntoIterator<Item = Field>,
        identity_key: impl IntoIdentityKey,
    ) -> Result<Self, SchemaError> {
        Self::builder(name).fields(fields).identity(identity_key).build()
    }

    /// Define a schema without identity, usable only as the type of a nested field.
    ///
    /// # Errors
    ///
    /// Same checks as [`SchemaBuilder::build`], minus the identity ones.
    pub fn embedded(name: impl Into<String>, fields: impl IntoIterator<Item = Field>) -> Result<Self, SchemaError> {
        Self::builder(name).fields(fields).build_embedded()
    }

    #[must_use]
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            name: name.into(),
            fields: Vec::new(),
            identity_key: Vec::new(),
            policy: None,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Fields in declaration order
    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.0.fields
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.0.fields.iter().find(|f| f.name() == name)
    }

    #[must_use]
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.0.fields.iter().position(|f| f.name() == name)
    }

    /// Identity field names in key order; empty for embedded schemas
    #[must_use]
    pub fn identity_key(&self) -> &[String] {
        &self.0.identity_key
    }

    #[must_use]
    pub fn has_identity(&self) -> bool {
        !self.0.identity_key.is_empty()
    }

    #[must_use]
    pub fn is_identity(&self, field: &str) -> bool {
        self.0.identity_key.iter().any(|k| k == field)
    }

    #[must_use]
    pub fn identity_policy(&self) -> IdentityPolicy {
        self.0.identity_policy
    }

    /// Operators a list request may apply to `field`, `None` if there is no such field
    #[must_use]
    pub fn filter_operators(&self, field: &str) -> Option<&'static [FilterOp]> {
        self.field(field).map(|f| operators_for(f.field_type()))
    }
}

/// Incremental [`Schema`] construction.
#[derive(Debug)]
pub struct SchemaBuilder {
    name: String,
    fields: Vec<Field>,
    identity_key: Vec<String>,
    policy: Option<IdentityPolicy>,
}

impl SchemaBuilder {
    #[must_use]
    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    #[must_use]
    pub fn fields(mut self, fields: impl IntoIterator<Item = Field>) -> Self {
        self.fields.extend(fields);
        self
    }

    #[must_use]
    pub fn identity(mut self, key: impl IntoIdentityKey) -> Self {
        self.identity_key = key.into_identity_key();
        self
    }

    #[must_use]
    pub const fn policy(mut self, policy: IdentityPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Check the definition and freeze it.
    ///
    /// # Errors
    ///
    /// - `EmptyName` / `EmptyIdentity` / `MissingIdentity` / `DuplicateField`
    /// - `NestedCycle` when a nested schema (transitively) carries this schema's name
    /// - `InvalidConstraint` for contradictory or mistyped constraints and defaults
    /// - `InvalidIdentity` for non-scalar identity fields or an unusable policy
    pub fn build(self) -> Result<Schema, SchemaError> {
        if self.identity_key.is_empty() {
            return Err(SchemaError::EmptyIdentity { schema: self.name });
        }
        self.finish()
    }

    fn build_embedded(mut self) -> Result<Schema, SchemaError> {
        self.identity_key.clear();
        self.finish()
    }

    fn finish(mut self) -> Result<Schema, SchemaError> {
        if self.name.trim().is_empty() {
            return Err(SchemaError::EmptyName);
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if !seen.insert(field.name()) {
                return Err(SchemaError::DuplicateField {
                    schema: self.name.clone(),
                    field: field.name().to_string(),
                });
            }
        }

        for field in &self.fields {
            if let FieldType::Nested(nested) = field.field_type() {
                if let Some(path) = find_cycle(&self.name, nested, field.name()) {
                    return Err(SchemaError::NestedCycle {
                        schema: self.name.clone(),
                        path,
                    });
                }
            }
        }

        let generatable = backend_can_generate(&self.fields, &self.identity_key);
        let policy = self.policy.unwrap_or(if generatable {
            IdentityPolicy::BackendGenerated
        } else {
            IdentityPolicy::CallerAssigned
        });
        check_identity(&self.name, &self.fields, &self.identity_key, policy)?;

        for field in &mut self.fields {
            prepare_field(field)?;
        }

        Ok(Schema(Arc::new(SchemaInner {
            name: self.name,
            fields: self.fields,
            identity_key: self.identity_key,
            identity_policy: policy,
        })))
    }
}

/// Path to a nested schema named `root`, if any
fn find_cycle(root: &str, nested: &Schema, path: &str) -> Option<String> {
    if nested.name() == root {
        return Some(path.to_string());
    }
    nested.fields().iter().find_map(|field| match field.field_type() {
        FieldType::Nested(inner) => find_cycle(root, inner, &format!("{path}.{}", field.name())),
        _ => None,
    })
}

/// Repositories generate a single integer (sequence) or string (UUID) key
fn backend_can_generate(fields: &[Field], identity_key: &[String]) -> bool {
    match identity_key {
        [key] => fields
            .iter()
            .any(|f| f.name() == key && matches!(f.field_type(), FieldType::Integer | FieldType::String)),
        _ => false,
    }
}

fn check_identity(
    schema: &str,
    fields: &[Field],
    identity_key: &[String],
    policy: IdentityPolicy,
) -> Result<(), SchemaError> {
    let mut seen = HashSet::new();
    for key in identity_key {
        let Some(field) = fields.iter().find(|f| f.name() == key) else {
            return Err(SchemaError::MissingIdentity {
                schema: schema.to_string(),
                field: key.clone(),
            });
        };
        if !seen.insert(key.as_str()) {
            return Err(SchemaError::InvalidIdentity {
                field: key.clone(),
                reason: "listed more than once in the identity key".to_string(),
            });
        }
        if !matches!(
            field.field_type(),
            FieldType::String | FieldType::Integer | FieldType::Enum(_)
        ) {
            return Err(SchemaError::InvalidIdentity {
                field: key.clone(),
                reason: format!("{} fields cannot be part of an identity", field.field_type().name()),
            });
        }
    }

    if policy == IdentityPolicy::BackendGenerated && !backend_can_generate(fields, identity_key) {
        return Err(SchemaError::InvalidIdentity {
            field: identity_key.join(","),
            reason: "backend-generated identities need exactly one integer or string field".to_string(),
        });
    }

    if policy == IdentityPolicy::EngineGenerated {
        let single_string = match identity_key {
            [key] => fields
                .iter()
                .any(|f| f.name() == key && matches!(f.field_type(), FieldType::String)),
            _ => false,
        };
        if !single_string {
            return Err(SchemaError::InvalidIdentity {
                field: identity_key.join(","),
                reason: "engine-generated identities need exactly one string field".to_string(),
            });
        }
    }
    Ok(())
}

/// Check constraints against the field type, compile the pattern and normalize the default
fn prepare_field(field: &mut Field) -> Result<(), SchemaError> {
    let invalid = |reason: String| SchemaError::InvalidConstraint {
        field: field.name().to_string(),
        reason,
    };
    let field_type = field.field_type();
    let constraints = field.constraints();

    if (constraints.min.is_some() || constraints.max.is_some()) && !field_type.is_numeric() {
        return Err(invalid(format!("min/max do not apply to {} fields", field_type.name())));
    }
    if let (Some(min), Some(max)) = (constraints.min, constraints.max) {
        if min > max {
            return Err(invalid(format!("min {min} is greater than max {max}")));
        }
    }
    if (constraints.min_length.is_some() || constraints.max_length.is_some() || constraints.pattern.is_some())
        && !matches!(field_type, FieldType::String)
    {
        return Err(invalid(format!(
            "length and pattern constraints do not apply to {} fields",
            field_type.name()
        )));
    }
    if let (Some(min), Some(max)) = (constraints.min_length, constraints.max_length) {
        if min > max {
            return Err(invalid(format!("min_length {min} is greater than max_length {max}")));
        }
    }
    if let FieldType::Enum(members) = field_type {
        if members.is_empty() {
            return Err(invalid("enum declares no members".to_string()));
        }
    }

    let regex = match &constraints.pattern {
        Some(pattern) => Some(Regex::new(pattern).map_err(|e| invalid(format!("invalid pattern: {e}")))?),
        None => None,
    };
    field.constraints_mut().regex = regex;

    if let Some(raw) = field.raw_default().cloned() {
        let mut errors = ValidationErrors::new();
        let value = validation::coerce_field(field, &raw, field.name(), &mut errors);
        match (value, errors.errors().first()) {
            (Some(value), None) => field.set_default(value),
            (_, Some(err)) => {
                return Err(SchemaError::InvalidConstraint {
                    field: field.name().to_string(),
                    reason: format!("default value rejected: {}", err.message),
                });
            }
            (None, None) => {}
        }
    }
    Ok(())
}

/// Anything that names one or more identity fields.
pub trait IntoIdentityKey {
    fn into_identity_key(self) -> Vec<String>;
}

impl IntoIdentityKey for &str {
    fn into_identity_key(self) -> Vec<String> {
        vec![self.to_string()]
    }
}

impl IntoIdentityKey for String {
    fn into_identity_key(self) -> Vec<String> {
        vec![self]
    }
}

impl IntoIdentityKey for &[&str] {
    fn into_identity_key(self) -> Vec<String> {
        self.iter().map(ToString::to_string).collect()
    }
}

impl<const N: usize> IntoIdentityKey for [&str; N] {
    fn into_identity_key(self) -> Vec<String> {
        self.iter().map(ToString::to_string).collect()
    }
}

impl IntoIdentityKey for Vec<String> {
    fn into_identity_key(self) -> Vec<String> {
        self
    }
}
