//! In-process backend for tests and local runs.
//!
//! Enforces the direct store's request rules (per-call limits, key schema,
//! condition evaluation, nested update paths, paging) and adds hooks to
//! count calls, inject failures, simulate unprocessed items and add latency.

use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::ops::Bound;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

use crate::backend::{
    Backend, BackendResult, BatchGetRequest, BatchGetResponse, BatchWrite, BatchWriteRequest,
    BatchWriteResponse, DeleteItemRequest, GetItemRequest, KeySchema, Operation, Page,
    PutItemRequest, QueryRequest, ScanRequest, Select, TransactGet, TransactWriteOp,
    UpdateItemRequest, canonical_key,
};
use crate::config::{MAX_READ_CHUNK_SIZE, MAX_TRANSACT_ITEMS, MAX_WRITE_CHUNK_SIZE};
use crate::error::{BackendError, FailureKind};
use crate::table::conditions::{Precondition, RangeFilter, Update, UpdateAction};
use crate::table::{Item, ReturnValues};

type Rows = BTreeMap<String, Item>;

#[derive(Debug, Default)]
struct Hooks {
    calls: HashMap<Operation, usize>,
    failures: HashMap<Operation, VecDeque<FailureKind>>,
    batch_capacity: Option<usize>,
    latency: Option<Duration>,
}

/// In-memory table store
///
/// Clones share the same data and hooks.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    schemas: Arc<HashMap<String, KeySchema>>,
    page_size: Option<usize>,
    tables: Arc<RwLock<HashMap<String, Rows>>>,
    hooks: Arc<Mutex<Hooks>>,
}

impl MemoryBackend {
    /// Store without tables
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a table; requests to undeclared tables fail with
    /// `TableNotFound`
    pub fn with_table(mut self, table: impl Into<String>, schema: KeySchema) -> Self {
        let _ = Arc::make_mut(&mut self.schemas).insert(table.into(), schema);
        self
    }

    /// Maximum number of items evaluated per query or scan page
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size.max(1));
        self
    }

    /// Number of calls made to `operation` so far
    pub async fn calls(&self, operation: Operation) -> usize {
        self.hooks
            .lock()
            .await
            .calls
            .get(&operation)
            .copied()
            .unwrap_or_default()
    }

    /// Reset every call counter
    pub async fn reset_calls(&self) {
        self.hooks.lock().await.calls.clear();
    }

    /// Fail the next call to `operation` with `kind`
    ///
    /// Queued failures are consumed one per call, in order.
    pub async fn fail_next(&self, operation: Operation, kind: FailureKind) {
        self.hooks
            .lock()
            .await
            .failures
            .entry(operation)
            .or_default()
            .push_back(kind);
    }

    /// Process at most `capacity` items per batch get or batch write call;
    /// the rest is reported unprocessed
    pub async fn set_batch_capacity(&self, capacity: Option<usize>) {
        self.hooks.lock().await.batch_capacity = capacity;
    }

    /// Delay every call by `latency`
    pub async fn set_latency(&self, latency: Option<Duration>) {
        self.hooks.lock().await.latency = latency;
    }

    /// Number of items stored in `table`
    pub async fn item_count(&self, table: &str) -> usize {
        self.tables
            .read()
            .await
            .get(table)
            .map_or(0, BTreeMap::len)
    }

    /// Store an item as is, skipping conditions and hooks
    ///
    /// The item must still carry the table's key attributes.
    pub async fn insert_raw(&self, table: &str, item: Item) -> BackendResult<()> {
        let schema = self.schema(Operation::PutItem, table)?;
        let key = key_projection(Operation::PutItem, table, schema, &item, false)?;
        let _ = self
            .tables
            .write()
            .await
            .entry(table.to_string())
            .or_default()
            .insert(canonical_key(&key), item);
        Ok(())
    }

    /// Count the call, then apply injected failures and latency
    async fn enter(&self, operation: Operation, table: &str) -> BackendResult<Option<usize>> {
        let (failure, latency, capacity) = {
            let mut hooks = self.hooks.lock().await;
            *hooks.calls.entry(operation).or_default() += 1;
            let failure = hooks
                .failures
                .get_mut(&operation)
                .and_then(VecDeque::pop_front);
            (failure, hooks.latency, hooks.batch_capacity)
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(kind) = failure {
            return Err(BackendError::new(
                kind,
                operation.as_str(),
                table,
                "injected failure",
            ));
        }
        Ok(capacity)
    }

    fn schema(&self, operation: Operation, table: &str) -> BackendResult<&KeySchema> {
        self.schemas.get(table).ok_or_else(|| {
            BackendError::new(
                FailureKind::TableNotFound,
                operation.as_str(),
                table,
                "requested resource not found",
            )
        })
    }

    fn page_limit(&self, limit: Option<u32>) -> usize {
        let requested = limit.map_or(usize::MAX, |limit| limit.max(1) as usize);
        requested.min(self.page_size.unwrap_or(usize::MAX))
    }
}

fn validation(operation: Operation, table: &str, message: impl Into<String>) -> BackendError {
    BackendError::new(FailureKind::Validation, operation.as_str(), table, message)
}

fn condition_failed(operation: Operation, table: &str) -> BackendError {
    BackendError::new(
        FailureKind::PreconditionFailed,
        operation.as_str(),
        table,
        "the conditional request failed",
    )
}

/// Key projection of `item`; with `exact`, `item` must be a bare key
fn key_projection(
    operation: Operation,
    table: &str,
    schema: &KeySchema,
    item: &Item,
    exact: bool,
) -> BackendResult<Item> {
    let key = schema.key_of(item).ok_or_else(|| {
        validation(
            operation,
            table,
            "the provided key element does not match the schema",
        )
    })?;
    if exact && key.len() != item.len() {
        return Err(validation(
            operation,
            table,
            "the provided key element does not match the schema",
        ));
    }
    Ok(key)
}

/// Value at a dot-separated path
fn get_path<'a>(item: &'a Item, path: &str) -> Option<&'a AttributeValue> {
    let mut segments = path.split('.');
    let mut current = item.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            AttributeValue::M(map) => map.get(segment)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Parent map of the last path segment, `None` when an intermediate
/// segment is missing or not a map
fn parent_mut<'a>(item: &'a mut Item, path: &'a str) -> Option<(&'a mut Item, &'a str)> {
    let segments: Vec<&str> = path.split('.').collect();
    let (last, parents) = segments.split_last()?;
    let mut current = item;
    for segment in parents {
        current = match current.get_mut(*segment)? {
            AttributeValue::M(map) => map,
            _ => return None,
        };
    }
    Some((current, *last))
}

/// Copy the value at `path` into `target`, creating intermediate maps
fn copy_path(source: &Item, target: &mut Item, path: &str) {
    let Some(value) = get_path(source, path) else {
        return;
    };
    let segments: Vec<&str> = path.split('.').collect();
    let Some((last, parents)) = segments.split_last() else {
        return;
    };
    let mut current = target;
    for segment in parents {
        let entry = current
            .entry((*segment).to_string())
            .or_insert_with(|| AttributeValue::M(HashMap::new()));
        current = match entry {
            AttributeValue::M(map) => map,
            _ => return,
        };
    }
    let _ = current.insert((*last).to_string(), value.clone());
}

fn project(item: &Item, paths: &[String]) -> Item {
    let mut projected = Item::new();
    for path in paths {
        copy_path(item, &mut projected, path);
    }
    projected
}

/// Ordering between two scalar values of the same type
fn compare_values(a: &AttributeValue, b: &AttributeValue) -> Option<Ordering> {
    match (a, b) {
        (AttributeValue::S(a), AttributeValue::S(b)) => Some(a.cmp(b)),
        (AttributeValue::N(a), AttributeValue::N(b)) => {
            let a: f64 = a.parse().ok()?;
            let b: f64 = b.parse().ok()?;
            a.partial_cmp(&b)
        }
        (AttributeValue::B(a), AttributeValue::B(b)) => Some(a.as_ref().cmp(b.as_ref())),
        _ => None,
    }
}

fn values_equal(a: &AttributeValue, b: &AttributeValue) -> bool {
    match compare_values(a, b) {
        Some(ordering) => ordering == Ordering::Equal,
        None => a == b,
    }
}

fn matches_filter(item: &Item, filter: &RangeFilter) -> bool {
    let Some(value) = get_path(item, &filter.attribute) else {
        return false;
    };
    matches!(
        compare_values(&filter.low, value),
        Some(Ordering::Less | Ordering::Equal)
    ) && matches!(
        compare_values(value, &filter.high),
        Some(Ordering::Less | Ordering::Equal)
    )
}

fn evaluate(precondition: &Precondition, existing: Option<&Item>) -> Result<bool, String> {
    Ok(match precondition {
        Precondition::AttributeExists(path) => existing.and_then(|i| get_path(i, path)).is_some(),
        Precondition::AttributeNotExists(path) => {
            existing.and_then(|i| get_path(i, path)).is_none()
        }
        Precondition::Equals(path, expected) => existing
            .and_then(|i| get_path(i, path))
            .is_some_and(|value| values_equal(value, expected)),
        Precondition::All(conditions) => {
            if conditions.is_empty() {
                return Err("empty condition group".to_string());
            }
            for condition in conditions {
                if !evaluate(condition, existing)? {
                    return Ok(false);
                }
            }
            true
        }
    })
}

fn check(
    operation: Operation,
    table: &str,
    precondition: Option<&Precondition>,
    existing: Option<&Item>,
) -> BackendResult<()> {
    match precondition.map(|p| evaluate(p, existing)) {
        None | Some(Ok(true)) => Ok(()),
        Some(Ok(false)) => Err(condition_failed(operation, table)),
        Some(Err(message)) => Err(validation(operation, table, message)),
    }
}

/// Apply `update` to a copy of `existing` (or of the bare key)
fn apply_update(
    operation: Operation,
    table: &str,
    schema: &KeySchema,
    key: &Item,
    existing: Option<&Item>,
    update: &Update,
) -> BackendResult<Item> {
    if update.is_empty() {
        return Err(validation(operation, table, "update has no actions"));
    }

    let mut item = existing.cloned().unwrap_or_else(|| key.clone());
    for action in update.actions() {
        let path = action.path();
        let root = path.split('.').next().unwrap_or_default();
        if schema.is_key_attribute(root) {
            return Err(validation(
                operation,
                table,
                format!("cannot update attribute {root}: it is part of the key"),
            ));
        }
        if path.split('.').any(str::is_empty) {
            return Err(validation(operation, table, format!("invalid path `{path}`")));
        }

        match action {
            UpdateAction::Set(path, value) => {
                let (parent, last) = parent_mut(&mut item, path).ok_or_else(|| {
                    validation(
                        operation,
                        table,
                        "the document path provided in the update expression is invalid for update",
                    )
                })?;
                let _ = parent.insert(last.to_string(), value.clone());
            }
            UpdateAction::Remove(path) => {
                if let Some((parent, last)) = parent_mut(&mut item, path) {
                    let _ = parent.remove(last);
                }
            }
        }
    }
    Ok(item)
}

fn updated_paths(update: &Update) -> Vec<String> {
    update
        .actions()
        .iter()
        .map(|action| action.path().to_string())
        .collect()
}

fn non_empty(item: Item) -> Option<Item> {
    (!item.is_empty()).then_some(item)
}

/// Cut one page out of ordered candidates
fn page(
    candidates: Vec<&Item>,
    schema: &KeySchema,
    limit: usize,
    filter: Option<&RangeFilter>,
    projection: Option<&[String]>,
    select: Select,
) -> Page {
    let more = candidates.len() > limit;
    let evaluated: Vec<&Item> = candidates.into_iter().take(limit).collect();
    let last_evaluated_key = if more {
        evaluated.last().and_then(|item| schema.key_of(item))
    } else {
        None
    };

    let matching: Vec<&Item> = evaluated
        .into_iter()
        .filter(|item| filter.is_none_or(|f| matches_filter(item, f)))
        .collect();
    let count = matching.len();

    let items = match select {
        Select::Count => Vec::new(),
        Select::Items => matching
            .into_iter()
            .map(|item| match projection {
                Some(paths) => project(item, paths),
                None => item.clone(),
            })
            .collect(),
    };

    Page {
        items,
        count,
        last_evaluated_key,
    }
}

fn reject_duplicates<'a>(
    operation: Operation,
    table: &str,
    keys: impl IntoIterator<Item = &'a String>,
) -> BackendResult<()> {
    let mut seen = HashSet::new();
    for key in keys {
        if !seen.insert(key) {
            return Err(validation(
                operation,
                table,
                "provided list of item keys contains duplicates",
            ));
        }
    }
    Ok(())
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn get_item(&self, request: GetItemRequest) -> BackendResult<Option<Item>> {
        let op = Operation::GetItem;
        let _ = self.enter(op, &request.table).await?;
        let schema = self.schema(op, &request.table)?;
        let key = key_projection(op, &request.table, schema, &request.key, true)?;

        let tables = self.tables.read().await;
        let found = tables
            .get(&request.table)
            .and_then(|rows| rows.get(&canonical_key(&key)));

        Ok(found.map(|item| match &request.projection {
            Some(paths) => project(item, paths),
            None => item.clone(),
        }))
    }

    async fn put_item(&self, request: PutItemRequest) -> BackendResult<Option<Item>> {
        let op = Operation::PutItem;
        let _ = self.enter(op, &request.table).await?;
        let schema = self.schema(op, &request.table)?;
        let key = key_projection(op, &request.table, schema, &request.item, false)?;
        let canonical = canonical_key(&key);

        let mut tables = self.tables.write().await;
        let rows = tables.entry(request.table.clone()).or_default();
        check(
            op,
            &request.table,
            request.precondition.as_ref(),
            rows.get(&canonical),
        )?;

        let old = rows.insert(canonical, request.item);
        Ok(if request.return_old { old } else { None })
    }

    async fn delete_item(&self, request: DeleteItemRequest) -> BackendResult<Option<Item>> {
        let op = Operation::DeleteItem;
        let _ = self.enter(op, &request.table).await?;
        let schema = self.schema(op, &request.table)?;
        let key = key_projection(op, &request.table, schema, &request.key, true)?;
        let canonical = canonical_key(&key);

        let mut tables = self.tables.write().await;
        let rows = tables.entry(request.table.clone()).or_default();
        check(
            op,
            &request.table,
            request.precondition.as_ref(),
            rows.get(&canonical),
        )?;

        let old = rows.remove(&canonical);
        Ok(if request.return_old { old } else { None })
    }

    async fn update_item(&self, request: UpdateItemRequest) -> BackendResult<Option<Item>> {
        let op = Operation::UpdateItem;
        let _ = self.enter(op, &request.table).await?;
        let schema = self.schema(op, &request.table)?;
        let key = key_projection(op, &request.table, schema, &request.key, true)?;
        let canonical = canonical_key(&key);

        let mut tables = self.tables.write().await;
        let rows = tables.entry(request.table.clone()).or_default();
        let existing = rows.get(&canonical);
        check(op, &request.table, request.precondition.as_ref(), existing)?;

        let updated = apply_update(op, &request.table, schema, &key, existing, &request.update)?;
        let paths = updated_paths(&request.update);
        let returned = match request.return_values {
            ReturnValues::None => None,
            ReturnValues::AllOld => existing.cloned(),
            ReturnValues::UpdatedOld => existing.and_then(|old| non_empty(project(old, &paths))),
            ReturnValues::AllNew => Some(updated.clone()),
            ReturnValues::UpdatedNew => non_empty(project(&updated, &paths)),
        };

        let _ = rows.insert(canonical, updated);
        Ok(returned)
    }

    async fn query(&self, request: QueryRequest) -> BackendResult<Page> {
        let op = Operation::Query;
        let _ = self.enter(op, &request.table).await?;
        let schema = self.schema(op, &request.table)?;
        let (name, value) = &request.partition_key;
        if *name != schema.partition_key {
            return Err(validation(
                op,
                &request.table,
                "query key condition not supported",
            ));
        }

        let tables = self.tables.read().await;
        let empty = Rows::new();
        let rows = tables.get(&request.table).unwrap_or(&empty);

        let mut candidates: Vec<&Item> = rows
            .values()
            .filter(|item| item.get(name).is_some_and(|v| values_equal(v, value)))
            .collect();
        if let Some(sort_key) = &schema.sort_key {
            candidates.sort_by(|a, b| match (a.get(sort_key), b.get(sort_key)) {
                (Some(a), Some(b)) => compare_values(a, b).unwrap_or(Ordering::Equal),
                _ => Ordering::Equal,
            });
        }
        if !request.scan_forward {
            candidates.reverse();
        }
        if let Some(start) = &request.exclusive_start_key {
            let position = candidates
                .iter()
                .position(|item| schema.key_of(item).as_ref() == Some(start));
            if let Some(position) = position {
                let _ = candidates.drain(..=position);
            }
        }

        Ok(page(
            candidates,
            schema,
            self.page_limit(request.limit),
            request.filter.as_ref(),
            request.projection.as_deref(),
            Select::Items,
        ))
    }

    async fn scan(&self, request: ScanRequest) -> BackendResult<Page> {
        let op = Operation::Scan;
        let _ = self.enter(op, &request.table).await?;
        let schema = self.schema(op, &request.table)?;

        let tables = self.tables.read().await;
        let empty = Rows::new();
        let rows = tables.get(&request.table).unwrap_or(&empty);

        let candidates: Vec<&Item> = match &request.exclusive_start_key {
            Some(start) => rows
                .range::<String, _>((Bound::Excluded(canonical_key(start)), Bound::Unbounded))
                .map(|(_, item)| item)
                .collect(),
            None => rows.values().collect(),
        };

        Ok(page(
            candidates,
            schema,
            self.page_limit(request.limit),
            request.filter.as_ref(),
            request.projection.as_deref(),
            request.select,
        ))
    }

    async fn batch_get(&self, request: BatchGetRequest) -> BackendResult<BatchGetResponse> {
        let op = Operation::BatchGetItem;
        let capacity = self.enter(op, &request.table).await?;
        let schema = self.schema(op, &request.table)?;
        if request.keys.len() > MAX_READ_CHUNK_SIZE {
            return Err(validation(
                op,
                &request.table,
                format!("too many items requested, limit is {MAX_READ_CHUNK_SIZE}"),
            ));
        }

        let mut canonical = Vec::with_capacity(request.keys.len());
        for key in &request.keys {
            let key = key_projection(op, &request.table, schema, key, true)?;
            canonical.push(canonical_key(&key));
        }
        reject_duplicates(op, &request.table, &canonical)?;

        let served = capacity.unwrap_or(usize::MAX).min(request.keys.len());
        let tables = self.tables.read().await;
        let rows = tables.get(&request.table);

        let items = canonical[..served]
            .iter()
            .filter_map(|key| rows.and_then(|rows| rows.get(key)))
            .map(|item| match &request.projection {
                Some(paths) => project(item, paths),
                None => item.clone(),
            })
            .collect();

        Ok(BatchGetResponse {
            items,
            unprocessed_keys: request.keys[served..].to_vec(),
        })
    }

    async fn batch_write(&self, request: BatchWriteRequest) -> BackendResult<BatchWriteResponse> {
        let op = Operation::BatchWriteItem;
        let capacity = self.enter(op, &request.table).await?;
        let schema = self.schema(op, &request.table)?;
        if request.writes.len() > MAX_WRITE_CHUNK_SIZE {
            return Err(validation(
                op,
                &request.table,
                format!("too many items in batch write, limit is {MAX_WRITE_CHUNK_SIZE}"),
            ));
        }

        let mut canonical = Vec::with_capacity(request.writes.len());
        for write in &request.writes {
            let exact = matches!(write, BatchWrite::Delete(_));
            let key = key_projection(op, &request.table, schema, write.item(), exact)?;
            canonical.push(canonical_key(&key));
        }
        reject_duplicates(op, &request.table, &canonical)?;

        let served = capacity.unwrap_or(usize::MAX).min(request.writes.len());
        let mut writes = request.writes;
        let unprocessed = writes.split_off(served);

        let mut tables = self.tables.write().await;
        let rows = tables.entry(request.table.clone()).or_default();
        for (write, key) in writes.into_iter().zip(canonical) {
            match write {
                BatchWrite::Put(item) => {
                    let _ = rows.insert(key, item);
                }
                BatchWrite::Delete(_) => {
                    let _ = rows.remove(&key);
                }
            }
        }

        Ok(BatchWriteResponse { unprocessed })
    }

    async fn transact_get(&self, items: Vec<TransactGet>) -> BackendResult<Vec<Option<Item>>> {
        let op = Operation::TransactGetItems;
        let Some(first_table) = items.first().map(|item| item.table.clone()) else {
            return Ok(Vec::new());
        };
        let _ = self.enter(op, &first_table).await?;
        if items.len() > MAX_TRANSACT_ITEMS {
            return Err(validation(
                op,
                &first_table,
                format!("too many transaction items, limit is {MAX_TRANSACT_ITEMS}"),
            ));
        }

        let tables = self.tables.read().await;
        let mut responses = Vec::with_capacity(items.len());
        for item in &items {
            let schema = self.schema(op, &item.table)?;
            let key = key_projection(op, &item.table, schema, &item.key, true)?;
            let found = tables
                .get(&item.table)
                .and_then(|rows| rows.get(&canonical_key(&key)))
                .map(|stored| match &item.projection {
                    Some(paths) => project(stored, paths),
                    None => stored.clone(),
                });
            responses.push(found);
        }
        Ok(responses)
    }

    async fn transact_write(&self, items: Vec<TransactWriteOp>) -> BackendResult<()> {
        let op = Operation::TransactWriteItems;
        let Some(first_table) = items.first().map(|item| item.table().to_string()) else {
            return Ok(());
        };
        let _ = self.enter(op, &first_table).await?;
        if items.len() > MAX_TRANSACT_ITEMS {
            return Err(validation(
                op,
                &first_table,
                format!("too many transaction items, limit is {MAX_TRANSACT_ITEMS}"),
            ));
        }

        let mut tables = self.tables.write().await;

        // Resolve every item against the current state before touching it.
        let mut staged: Vec<(String, String, Option<Item>)> = Vec::with_capacity(items.len());
        let mut targets = Vec::with_capacity(items.len());
        let mut failed_items = Vec::new();

        for (index, item) in items.iter().enumerate() {
            let table = item.table();
            let schema = self.schema(op, table)?;
            let (key, precondition) = match item {
                TransactWriteOp::Put {
                    item, precondition, ..
                } => (
                    key_projection(op, table, schema, item, false)?,
                    precondition.as_ref(),
                ),
                TransactWriteOp::Update {
                    key, precondition, ..
                }
                | TransactWriteOp::Delete {
                    key, precondition, ..
                } => (
                    key_projection(op, table, schema, key, true)?,
                    precondition.as_ref(),
                ),
                TransactWriteOp::ConditionCheck {
                    key, precondition, ..
                } => (key_projection(op, table, schema, key, true)?, Some(precondition)),
            };
            let canonical = canonical_key(&key);
            targets.push(format!("{table}/{canonical}"));

            let existing = tables.get(table).and_then(|rows| rows.get(&canonical));
            match check(op, table, precondition, existing) {
                Ok(()) => {}
                Err(err) if err.kind == FailureKind::PreconditionFailed => {
                    failed_items.push(index);
                    continue;
                }
                Err(err) => return Err(err),
            }

            let next = match item {
                TransactWriteOp::Put { item, .. } => Some(Some(item.clone())),
                TransactWriteOp::Update { update, .. } => Some(Some(apply_update(
                    op, table, schema, &key, existing, update,
                )?)),
                TransactWriteOp::Delete { .. } => Some(None),
                TransactWriteOp::ConditionCheck { .. } => None,
            };
            if let Some(next) = next {
                staged.push((table.to_string(), canonical, next));
            }
        }

        reject_duplicates(op, &first_table, &targets)?;

        if !failed_items.is_empty() {
            return Err(BackendError::new(
                FailureKind::PreconditionFailed,
                op.as_str(),
                first_table,
                "transaction cancelled, conditional check failed",
            )
            .with_failed_items(failed_items));
        }

        for (table, key, next) in staged {
            let rows = tables.entry(table).or_default();
            let _ = match next {
                Some(item) => rows.insert(key, item),
                None => rows.remove(&key),
            };
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(value: &str) -> AttributeValue {
        AttributeValue::S(value.to_string())
    }

    fn n(value: i64) -> AttributeValue {
        AttributeValue::N(value.to_string())
    }

    fn backend() -> MemoryBackend {
        MemoryBackend::new().with_table(
            "scores",
            KeySchema::new("user_id").with_sort_key("game_title"),
        )
    }

    fn row(user: &str, game: &str, score: i64) -> Item {
        Item::from([
            ("user_id".to_string(), s(user)),
            ("game_title".to_string(), s(game)),
            ("score".to_string(), n(score)),
            (
                "info".to_string(),
                AttributeValue::M(HashMap::from([("comment".to_string(), s("fine"))])),
            ),
        ])
    }

    fn key(user: &str, game: &str) -> Item {
        Item::from([
            ("user_id".to_string(), s(user)),
            ("game_title".to_string(), s(game)),
        ])
    }

    fn put(item: Item) -> PutItemRequest {
        PutItemRequest {
            table: "scores".into(),
            item,
            precondition: None,
            return_old: false,
        }
    }

    #[tokio::test]
    async fn test_unknown_table_is_reported() {
        let err = MemoryBackend::new()
            .put_item(put(row("u", "g", 1)))
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::TableNotFound);
    }

    #[tokio::test]
    async fn test_put_condition_is_evaluated() {
        let backend = backend();
        backend.put_item(put(row("u", "g", 1))).await.unwrap();

        let mut request = put(row("u", "g", 2));
        request.precondition = Some(Precondition::not_exists("user_id"));
        let err = backend.put_item(request).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::PreconditionFailed);
    }

    #[tokio::test]
    async fn test_update_nested_path_returns_updated_new() {
        let backend = backend();
        backend.put_item(put(row("u", "g", 1))).await.unwrap();

        let returned = backend
            .update_item(UpdateItemRequest {
                table: "scores".into(),
                key: key("u", "g"),
                update: Update::new().set("info.rating", n(9)),
                precondition: None,
                return_values: ReturnValues::UpdatedNew,
            })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(returned.len(), 1);
        assert_eq!(get_path(&returned, "info.rating"), Some(&n(9)));
        assert!(get_path(&returned, "info.comment").is_none());
    }

    #[tokio::test]
    async fn test_update_missing_parent_is_rejected() {
        let backend = backend();
        let err = backend
            .update_item(UpdateItemRequest {
                table: "scores".into(),
                key: key("new", "g"),
                update: Update::new().set("info.rating", n(9)),
                precondition: None,
                return_values: ReturnValues::None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::Validation);
    }

    #[tokio::test]
    async fn test_query_pages_in_sort_key_order() {
        let backend = backend().with_page_size(2);
        for game in ["c", "a", "b"] {
            backend.put_item(put(row("u", game, 1))).await.unwrap();
        }
        backend.put_item(put(row("other", "a", 1))).await.unwrap();

        let mut request = QueryRequest {
            table: "scores".into(),
            partition_key: ("user_id".into(), s("u")),
            filter: None,
            projection: None,
            consistent_read: false,
            scan_forward: true,
            limit: None,
            exclusive_start_key: None,
        };
        let first = backend.query(request.clone()).await.unwrap();
        assert_eq!(first.count, 2);
        assert_eq!(first.items[0].get("game_title"), Some(&s("a")));

        request.exclusive_start_key = first.last_evaluated_key;
        let second = backend.query(request).await.unwrap();
        assert_eq!(second.count, 1);
        assert_eq!(second.items[0].get("game_title"), Some(&s("c")));
        assert!(second.last_evaluated_key.is_none());
    }

    #[tokio::test]
    async fn test_scan_count_with_range_filter() {
        let backend = backend();
        for (game, score) in [("a", 50), ("b", 95), ("c", 100), ("d", 101)] {
            backend.put_item(put(row("u", game, score))).await.unwrap();
        }

        let page = backend
            .scan(ScanRequest {
                table: "scores".into(),
                filter: Some(RangeFilter::between("score", n(90), n(100))),
                select: Select::Count,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.count, 2);
        assert!(page.items.is_empty());
    }

    #[tokio::test]
    async fn test_batch_limits_and_capacity() {
        let backend = backend();
        let writes: Vec<BatchWrite> = (0..26)
            .map(|i| BatchWrite::Put(row("u", &i.to_string(), i)))
            .collect();
        let err = backend
            .batch_write(BatchWriteRequest {
                table: "scores".into(),
                writes: writes.clone(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::Validation);

        backend.set_batch_capacity(Some(10)).await;
        let response = backend
            .batch_write(BatchWriteRequest {
                table: "scores".into(),
                writes: writes[..25].to_vec(),
            })
            .await
            .unwrap();
        assert_eq!(response.unprocessed.len(), 15);
        assert_eq!(backend.item_count("scores").await, 10);
        assert_eq!(backend.calls(Operation::BatchWriteItem).await, 2);
    }

    #[tokio::test]
    async fn test_transaction_is_all_or_nothing() {
        let backend = backend();
        backend.put_item(put(row("u", "a", 100))).await.unwrap();

        let err = backend
            .transact_write(vec![
                TransactWriteOp::Put {
                    table: "scores".into(),
                    item: row("u", "b", 1),
                    precondition: None,
                },
                TransactWriteOp::Update {
                    table: "scores".into(),
                    key: key("u", "a"),
                    update: Update::new().set("score", n(1)),
                    precondition: Some(Precondition::equals("score", n(99))),
                },
            ])
            .await
            .unwrap_err();

        assert_eq!(err.kind, FailureKind::PreconditionFailed);
        assert_eq!(err.failed_items, vec![1]);
        assert_eq!(backend.item_count("scores").await, 1);
    }

    #[tokio::test]
    async fn test_injected_failure_is_consumed_once() {
        let backend = backend();
        backend
            .fail_next(Operation::PutItem, FailureKind::Throttled)
            .await;

        let err = backend.put_item(put(row("u", "g", 1))).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::Throttled);
        backend.put_item(put(row("u", "g", 1))).await.unwrap();
        assert_eq!(backend.calls(Operation::PutItem).await, 2);
    }
}
