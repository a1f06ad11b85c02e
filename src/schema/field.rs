use regex::Regex;
use serde_json::Value as JsonValue;

use super::Schema;
use crate::value::Value;

/// A numeric range bound accepted by [`Field::min`] and [`Field::max`].
///
/// 64-bit integers beyond 2^53 round to the nearest representable `f64`.
pub trait Bound {
    fn into_bound(self) -> f64;
}

macro_rules! lossless_bound {
    ($($ty:ty),*) => {
        $(impl Bound for $ty {
            fn into_bound(self) -> f64 {
                f64::from(self)
            }
        })*
    };
}

lossless_bound!(i8, i16, i32, u8, u16, u32, f32, f64);

#[allow(clippy::cast_precision_loss)]
impl Bound for i64 {
    fn into_bound(self) -> f64 {
        self as f64
    }
}

#[allow(clippy::cast_precision_loss)]
impl Bound for u64 {
    fn into_bound(self) -> f64 {
        self as f64
    }
}

/// Semantic type of a field. The validator and both repositories interpret this closed set.
#[derive(Debug, Clone)]
pub enum FieldType {
    String,
    Integer,
    Float,
    Boolean,
    Timestamp,
    /// One of a fixed set of string members
    Enum(Vec<String>),
    /// An embedded object described by its own schema, stored and replaced whole
    Nested(Schema),
}

impl FieldType {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Timestamp => "timestamp",
            Self::Enum(_) => "enum",
            Self::Nested(_) => "object",
        }
    }

    /// Types with a meaningful `<` / `>`
    #[must_use]
    pub const fn is_ordered(&self) -> bool {
        matches!(self, Self::Integer | Self::Float | Self::Timestamp)
    }

    #[must_use]
    pub const fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer | Self::Float)
    }

    #[must_use]
    pub const fn is_nested(&self) -> bool {
        matches!(self, Self::Nested(_))
    }
}

/// Value constraints checked by the validator after type coercion.
#[derive(Debug, Clone, Default)]
pub struct Constraints {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub pattern: Option<String>,
    pub(crate) regex: Option<Regex>,
}

impl Constraints {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.min.is_none()
            && self.max.is_none()
            && self.min_length.is_none()
            && self.max_length.is_none()
            && self.pattern.is_none()
    }

    pub(crate) const fn regex(&self) -> Option<&Regex> {
        self.regex.as_ref()
    }
}

/// A named, typed field of a [`Schema`].
///
/// ```rust
/// use resourcecrate::schema::Field;
///
/// let age = Field::integer("age").min(0).max(150);
/// let email = Field::string("email").required().pattern(r"^[^@\s]+@[^@\s]+$");
/// ```
#[derive(Debug, Clone)]
pub struct Field {
    name: String,
    field_type: FieldType,
    required: bool,
    raw_default: Option<JsonValue>,
    default: Option<Value>,
    constraints: Constraints,
}

impl Field {
    #[must_use]
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
            raw_default: None,
            default: None,
            constraints: Constraints::default(),
        }
    }

    #[must_use]
    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::String)
    }

    #[must_use]
    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Integer)
    }

    #[must_use]
    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Float)
    }

    #[must_use]
    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Boolean)
    }

    #[must_use]
    pub fn timestamp(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Timestamp)
    }

    #[must_use]
    pub fn enumeration<I, S>(name: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(name, FieldType::Enum(members.into_iter().map(Into::into).collect()))
    }

    #[must_use]
    pub fn nested(name: impl Into<String>, schema: Schema) -> Self {
        Self::new(name, FieldType::Nested(schema))
    }

    /// Must be present (or defaulted) on create and may never be `null`
    #[must_use]
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Value used on create when the field is absent. Checked against the field when the schema
    /// is defined.
    #[must_use]
    pub fn default_value(mut self, value: impl Into<JsonValue>) -> Self {
        let value = value.into();
        self.raw_default = (!value.is_null()).then_some(value);
        self
    }

    #[must_use]
    pub fn min(mut self, min: impl Bound) -> Self {
        self.constraints.min = Some(min.into_bound());
        self
    }

    #[must_use]
    pub fn max(mut self, max: impl Bound) -> Self {
        self.constraints.max = Some(max.into_bound());
        self
    }

    #[must_use]
    pub const fn min_length(mut self, min: usize) -> Self {
        self.constraints.min_length = Some(min);
        self
    }

    #[must_use]
    pub const fn max_length(mut self, max: usize) -> Self {
        self.constraints.max_length = Some(max);
        self
    }

    /// Regular expression string values must match (unanchored, as `Regex::is_match`)
    #[must_use]
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.constraints.pattern = Some(pattern.into());
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn field_type(&self) -> &FieldType {
        &self.field_type
    }

    #[must_use]
    pub const fn is_required(&self) -> bool {
        self.required
    }

    /// Normalized default value
    #[must_use]
    pub const fn default(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    #[must_use]
    pub const fn constraints(&self) -> &Constraints {
        &self.constraints
    }

    pub(crate) const fn raw_default(&self) -> Option<&JsonValue> {
        self.raw_default.as_ref()
    }

    pub(crate) const fn constraints_mut(&mut self) -> &mut Constraints {
        &mut self.constraints
    }

    pub(crate) fn set_default(&mut self, value: Value) {
        self.default = Some(value);
    }
}
