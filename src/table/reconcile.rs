//! Turns raw backend payloads into typed outcomes.
//!
//! Both backends answer in raw attribute maps; everything a caller sees goes
//! through here so the outcome model is the same whichever store answered.

use std::collections::HashSet;

use crate::backend::{KeySchema, Operation, canonical_key};
use crate::error::{BackendError, Error, FailureKind};
use crate::table::codec::{key_from_item, key_matches, unmarshal};
use crate::table::entity::Entity;
use crate::table::types::{CompositeKey, Item, Outcome};

/// Single-item read
///
/// Nothing, an empty payload, or a payload for another key are all
/// `NotFound`. A payload that does not decode is an error.
pub(crate) fn reconcile_get<T: Entity>(
    table: &str,
    requested: &Item,
    payload: Option<Item>,
) -> Result<Outcome<T>, Error> {
    let Some(item) = payload.filter(|item| !item.is_empty()) else {
        return Ok(Outcome::NotFound);
    };

    if !key_matches(requested, &item) {
        tracing::warn!(table, "backend returned an item for another key");
        return Ok(Outcome::NotFound);
    }

    unmarshal(item).map(Outcome::Found)
}

/// Query or scan pages, in backend order
pub(crate) fn reconcile_items<T: Entity>(items: Vec<Item>) -> Result<Vec<T>, Error> {
    items
        .into_iter()
        .filter(|item| !item.is_empty())
        .map(unmarshal)
        .collect()
}

/// Batch read results; order is whatever the backend produced
///
/// Empty placeholders and items whose key was not requested are dropped.
pub(crate) fn reconcile_batch<T: Entity>(
    table: &str,
    requested: &[Item],
    items: Vec<Item>,
) -> Result<Vec<T>, Error> {
    let schema = KeySchema::of::<T>();
    let requested: HashSet<String> = requested.iter().map(canonical_key).collect();

    let mut entities = Vec::with_capacity(items.len());
    for item in items.into_iter().filter(|item| !item.is_empty()) {
        let wanted = schema
            .key_of(&item)
            .is_some_and(|key| requested.contains(&canonical_key(&key)));
        if !wanted {
            tracing::warn!(table, "dropping batch item that was not requested");
            continue;
        }
        entities.push(unmarshal(item)?);
    }
    Ok(entities)
}

/// Transactional read results, positional to the requested keys
///
/// An answer with a different number of positions than requested is an
/// error; no position is guessed.
pub(crate) fn reconcile_transact<T: Entity>(
    table: &str,
    requested: &[Item],
    responses: Vec<Option<Item>>,
) -> Result<Vec<T>, Error> {
    if responses.len() != requested.len() {
        return Err(BackendError::new(
            FailureKind::Unknown,
            Operation::TransactGetItems.as_str(),
            table,
            format!(
                "requested {} items, backend answered {}",
                requested.len(),
                responses.len()
            ),
        )
        .into());
    }

    let mut entities = Vec::with_capacity(responses.len());
    for (key, response) in requested.iter().zip(responses) {
        let Some(item) = response.filter(|item| !item.is_empty()) else {
            continue;
        };
        if !key_matches(key, &item) {
            tracing::warn!(table, "transactional read returned an item for another key");
            continue;
        }
        entities.push(unmarshal(item)?);
    }
    Ok(entities)
}

/// Attributes returned by an update, merged over the key projection
pub(crate) fn reconcile_update<T: Entity>(
    key: Item,
    attributes: Option<Item>,
) -> Result<Option<T>, Error> {
    let Some(attributes) = attributes.filter(|item| !item.is_empty()) else {
        return Ok(None);
    };
    let mut item = key;
    item.extend(attributes);
    unmarshal(item).map(Some)
}

/// Typed keys of key projections the backend declined
pub(crate) fn typed_keys<T: Entity>(keys: &[Item]) -> Result<Vec<CompositeKey<T::PK, T::SK>>, Error> {
    keys.iter().map(key_from_item::<T>).collect()
}
