//! Bulk operations.
//!
//! Items are processed one at a time and independently: a failing item does not roll back the
//! ones before it and does not stop the ones after it. Bulk updates are last-write-wins.

use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::debug;

use super::engine::ResourceEngine;
use crate::errors::EngineError;
use crate::validation::{self, Mode, ValidationErrors, ViolationKind};
use crate::value::{Identity, Record};

/// An item of a bulk request that failed
#[derive(Debug, Clone, PartialEq)]
pub struct BulkFailure {
    /// Position of the item in the request
    pub index: usize,
    pub error: EngineError,
}

/// Outcome of a bulk request
#[derive(Debug, Clone, PartialEq)]
pub struct BulkReport<T> {
    pub succeeded: Vec<T>,
    pub failed: Vec<BulkFailure>,
}

impl<T> BulkReport<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            succeeded: Vec::new(),
            failed: Vec::new(),
        }
    }

    /// Whether every item succeeded
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, index: usize, outcome: Result<T, EngineError>) {
        match outcome {
            Ok(item) => self.succeeded.push(item),
            Err(error) => self.failed.push(BulkFailure { index, error }),
        }
    }
}

impl<T> Default for BulkReport<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct FailureSummary<'a> {
    index: usize,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    violations: Option<&'a ValidationErrors>,
}

impl Serialize for BulkFailure {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let violations = match &self.error {
            EngineError::Validation(errors) => Some(errors),
            _ => None,
        };
        FailureSummary {
            index: self.index,
            error: self.error.to_string(),
            violations,
        }
        .serialize(serializer)
    }
}

impl<T: Serialize> Serialize for BulkReport<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("BulkReport", 2)?;
        state.serialize_field("succeeded", &self.succeeded)?;
        state.serialize_field("failed", &self.failed)?;
        state.end()
    }
}

impl ResourceEngine {
    /// Create every input independently.
    pub async fn create_many(&self, inputs: &[JsonValue]) -> BulkReport<Record> {
        debug!(resource = %self.schema().name(), items = inputs.len(), "bulk create");
        let mut report = BulkReport::new();
        for (index, input) in inputs.iter().enumerate() {
            report.record(index, self.create(input).await);
        }
        report
    }

    /// Apply partial updates; each input object carries the identity fields of its target.
    pub async fn update_many(&self, inputs: &[JsonValue]) -> BulkReport<Record> {
        debug!(resource = %self.schema().name(), items = inputs.len(), "bulk update");
        let mut report = BulkReport::new();
        for (index, input) in inputs.iter().enumerate() {
            let outcome = match self.target_of(input) {
                Ok(identity) => self.update(identity, input, None).await,
                Err(error) => Err(error),
            };
            report.record(index, outcome);
        }
        report
    }

    /// Delete every identity independently; the report lists the deleted identities.
    pub async fn delete_many(&self, identities: Vec<Identity>) -> BulkReport<Identity> {
        debug!(resource = %self.schema().name(), items = identities.len(), "bulk delete");
        let mut report = BulkReport::new();
        for (index, identity) in identities.into_iter().enumerate() {
            let outcome = self.delete(identity.clone(), None).await.map(|()| identity);
            report.record(index, outcome);
        }
        report
    }

    fn target_of(&self, input: &JsonValue) -> Result<Identity, EngineError> {
        let patch = validation::validate(self.schema(), input, Mode::Update)?;
        patch.identity(self.schema()).ok_or_else(|| {
            EngineError::Validation(ValidationErrors::single(
                self.schema().identity_key().join(","),
                ViolationKind::Missing,
                "Bulk updates need the identity of each item",
            ))
        })
    }
}
