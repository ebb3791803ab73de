//! Renders typed conditions, updates and filters into DynamoDB expression
//! strings.
//!
//! Every path segment becomes a `#nN` name placeholder and every value a
//! `:vN` value placeholder, so reserved words never need special handling.

use aws_sdk_dynamodb::types::AttributeValue;
use std::collections::HashMap;

use crate::error::Error;
use crate::table::conditions::{Precondition, RangeFilter, Update, UpdateAction};

/// Accumulates placeholders for one request's expressions
#[derive(Debug, Default)]
pub struct ExpressionBuilder {
    names: HashMap<String, String>,
    aliases: HashMap<String, String>,
    values: HashMap<String, AttributeValue>,
}

impl ExpressionBuilder {
    /// Empty builder
    pub fn new() -> Self {
        Self::default()
    }

    fn name(&mut self, segment: &str) -> String {
        if let Some(placeholder) = self.aliases.get(segment) {
            return placeholder.clone();
        }
        let placeholder = format!("#n{}", self.names.len());
        let _ = self.names.insert(placeholder.clone(), segment.to_string());
        let _ = self
            .aliases
            .insert(segment.to_string(), placeholder.clone());
        placeholder
    }

    /// Placeholder form of a dot-separated attribute path
    pub fn path(&mut self, path: &str) -> Result<String, Error> {
        if path.is_empty() || path.split('.').any(str::is_empty) {
            return Err(Error::Expression(format!("invalid attribute path `{path}`")));
        }
        Ok(path
            .split('.')
            .map(|segment| self.name(segment))
            .collect::<Vec<_>>()
            .join("."))
    }

    /// Placeholder for a value
    pub fn value(&mut self, value: AttributeValue) -> String {
        let placeholder = format!(":v{}", self.values.len());
        let _ = self.values.insert(placeholder.clone(), value);
        placeholder
    }

    /// Condition expression
    pub fn condition(&mut self, precondition: &Precondition) -> Result<String, Error> {
        match precondition {
            Precondition::AttributeExists(path) => {
                Ok(format!("attribute_exists({})", self.path(path)?))
            }
            Precondition::AttributeNotExists(path) => {
                Ok(format!("attribute_not_exists({})", self.path(path)?))
            }
            Precondition::Equals(path, value) => {
                let path = self.path(path)?;
                Ok(format!("{path} = {}", self.value(value.clone())))
            }
            Precondition::All(conditions) => {
                if conditions.is_empty() {
                    return Err(Error::Expression("empty condition group".to_string()));
                }
                let parts = conditions
                    .iter()
                    .map(|condition| self.condition(condition).map(|c| format!("({c})")))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(parts.join(" AND "))
            }
        }
    }

    /// Update expression
    pub fn update(&mut self, update: &Update) -> Result<String, Error> {
        let mut sets = Vec::new();
        let mut removes = Vec::new();

        for action in update.actions() {
            match action {
                UpdateAction::Set(path, value) => {
                    let path = self.path(path)?;
                    sets.push(format!("{path} = {}", self.value(value.clone())));
                }
                UpdateAction::Remove(path) => removes.push(self.path(path)?),
            }
        }

        let mut clauses = Vec::new();
        if !sets.is_empty() {
            clauses.push(format!("SET {}", sets.join(", ")));
        }
        if !removes.is_empty() {
            clauses.push(format!("REMOVE {}", removes.join(", ")));
        }
        if clauses.is_empty() {
            return Err(Error::Expression("update has no actions".to_string()));
        }
        Ok(clauses.join(" "))
    }

    /// Filter expression for an inclusive range
    pub fn filter(&mut self, filter: &RangeFilter) -> Result<String, Error> {
        let path = self.path(&filter.attribute)?;
        let low = self.value(filter.low.clone());
        let high = self.value(filter.high.clone());
        Ok(format!("{path} BETWEEN {low} AND {high}"))
    }

    /// Key condition on the partition key
    pub fn key_condition(&mut self, name: &str, value: AttributeValue) -> String {
        let name = self.name(name);
        format!("{name} = {}", self.value(value))
    }

    /// Projection expression
    pub fn projection(&mut self, paths: &[String]) -> Result<String, Error> {
        Ok(paths
            .iter()
            .map(|path| self.path(path))
            .collect::<Result<Vec<_>, _>>()?
            .join(", "))
    }

    /// Name and value maps, `None` when empty
    #[allow(clippy::type_complexity)]
    pub fn build(
        self,
    ) -> (
        Option<HashMap<String, String>>,
        Option<HashMap<String, AttributeValue>>,
    ) {
        let names = (!self.names.is_empty()).then_some(self.names);
        let values = (!self.values.is_empty()).then_some(self.values);
        (names, values)
    }
}
