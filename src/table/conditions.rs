//! Preconditions, update actions and range filters.
//!
//! These are typed descriptions; each backend decides how to evaluate them.
//! A conditional write moves through
//! `Building -> Submitted -> {Applied | PreconditionFailed | Failed}`:
//! the caller builds a [`Precondition`], the table submits it with the write,
//! and [`resolve`] classifies the backend's answer.

use aws_sdk_dynamodb::types::AttributeValue;
use serde::Serialize;

use crate::error::{BackendError, Error, FailureKind};
use crate::table::codec::to_value;
use crate::table::entity::Entity;
use crate::table::types::WriteOutcome;

/// Condition the stored item must satisfy for a write to apply
///
/// Attribute paths are dot-separated map paths, e.g. `info.rating`.
#[derive(Debug, Clone, PartialEq)]
pub enum Precondition {
    /// The attribute is present
    AttributeExists(String),
    /// The attribute is absent
    AttributeNotExists(String),
    /// The attribute is present and equal to the value
    Equals(String, AttributeValue),
    /// Every inner condition holds
    All(Vec<Precondition>),
}

impl Precondition {
    /// The attribute must be present
    pub fn exists(path: impl Into<String>) -> Self {
        Precondition::AttributeExists(path.into())
    }

    /// The attribute must be absent
    pub fn not_exists(path: impl Into<String>) -> Self {
        Precondition::AttributeNotExists(path.into())
    }

    /// The attribute must equal `value`
    pub fn equals(path: impl Into<String>, value: AttributeValue) -> Self {
        Precondition::Equals(path.into(), value)
    }

    /// The attribute must equal the serialized form of `value`
    pub fn equals_value<V: Serialize>(path: impl Into<String>, value: &V) -> Result<Self, Error> {
        Ok(Precondition::Equals(path.into(), to_value(value)?))
    }

    /// An item must already be stored at the key (update-only write)
    pub fn item_exists<T: Entity>() -> Self {
        Precondition::exists(T::PARTITION_KEY)
    }

    /// No item may be stored at the key (create-only write)
    pub fn item_absent<T: Entity>() -> Self {
        Precondition::not_exists(T::PARTITION_KEY)
    }

    /// Combine with another condition
    pub fn and(self, other: Precondition) -> Self {
        match self {
            Precondition::All(mut conditions) => {
                conditions.push(other);
                Precondition::All(conditions)
            }
            first => Precondition::All(vec![first, other]),
        }
    }
}

/// One attribute-level change
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateAction {
    /// Set the attribute at the path
    Set(String, AttributeValue),
    /// Remove the attribute at the path
    Remove(String),
}

impl UpdateAction {
    /// Path the action touches
    pub fn path(&self) -> &str {
        match self {
            UpdateAction::Set(path, _) | UpdateAction::Remove(path) => path,
        }
    }
}

/// Ordered set of attribute-level changes applied to one item
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    actions: Vec<UpdateAction>,
}

impl Update {
    /// An empty update
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the attribute at `path`
    pub fn set(mut self, path: impl Into<String>, value: AttributeValue) -> Self {
        self.actions.push(UpdateAction::Set(path.into(), value));
        self
    }

    /// Set the attribute at `path` to the serialized form of `value`
    pub fn set_value<V: Serialize>(self, path: impl Into<String>, value: &V) -> Result<Self, Error> {
        Ok(self.set(path, to_value(value)?))
    }

    /// Remove the attribute at `path`
    pub fn remove(mut self, path: impl Into<String>) -> Self {
        self.actions.push(UpdateAction::Remove(path.into()));
        self
    }

    /// Actions in submission order
    pub fn actions(&self) -> &[UpdateAction] {
        &self.actions
    }

    /// Whether there is nothing to apply
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Reject updates that are empty or touch key attributes of `T`
    pub(crate) fn validate<T: Entity>(&self) -> Result<(), Error> {
        if self.is_empty() {
            return Err(Error::Expression("update has no actions".to_string()));
        }
        for action in &self.actions {
            let root = action.path().split('.').next().unwrap_or_default();
            if T::is_key_attribute(root) {
                return Err(Error::Expression(format!(
                    "key attribute `{root}` cannot be updated"
                )));
            }
            if action.path().split('.').any(str::is_empty) {
                return Err(Error::Expression(format!(
                    "invalid attribute path `{}`",
                    action.path()
                )));
            }
        }
        Ok(())
    }
}

/// Inclusive range condition on one attribute
#[derive(Debug, Clone, PartialEq)]
pub struct RangeFilter {
    /// Attribute path the range applies to
    pub attribute: String,
    /// Lower bound, inclusive
    pub low: AttributeValue,
    /// Upper bound, inclusive
    pub high: AttributeValue,
}

impl RangeFilter {
    /// `attribute BETWEEN low AND high`
    pub fn between(attribute: impl Into<String>, low: AttributeValue, high: AttributeValue) -> Self {
        Self {
            attribute: attribute.into(),
            low,
            high,
        }
    }

    /// Same as [`between`](Self::between) with serialized bounds
    pub fn between_values<V: Serialize>(
        attribute: impl Into<String>,
        low: &V,
        high: &V,
    ) -> Result<Self, Error> {
        Ok(Self::between(attribute, to_value(low)?, to_value(high)?))
    }
}

/// Classify the backend's answer to a conditional write
///
/// A precondition failure becomes [`WriteOutcome::PreconditionFailed`];
/// every other failure stays an error.
pub(crate) fn resolve<R>(result: Result<R, BackendError>) -> Result<WriteOutcome<R>, Error> {
    match result {
        Ok(value) => Ok(WriteOutcome::Applied(value)),
        Err(err) if err.kind == FailureKind::PreconditionFailed => {
            tracing::debug!(
                table = %err.table,
                operation = err.operation,
                "precondition failed"
            );
            Ok(WriteOutcome::PreconditionFailed)
        }
        Err(err) => Err(err.into()),
    }
}
