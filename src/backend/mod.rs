//! Transport boundary between tables and physical stores.
//!
//! A [`Backend`] executes one raw, entity-agnostic operation against a named
//! table and answers with a raw payload or a [`BackendError`] tagged with a
//! [`FailureKind`](crate::error::FailureKind). Three implementations ship with
//! the crate:
//!
//! - [`DynamoDbBackend`]: the direct store, over `aws-sdk-dynamodb`
//! - [`CachedBackend`]: an item cache in front of any other backend
//! - [`MemoryBackend`]: an in-process store for tests and local runs

use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;
use std::fmt::Write;

use crate::error::BackendError;
use crate::table::conditions::{Precondition, RangeFilter, Update};
use crate::table::Entity;
use crate::table::{Item, ReturnValues};

pub mod cached;
pub mod dynamodb;
pub mod expression;
pub mod memory;

pub use cached::CachedBackend;
pub use dynamodb::DynamoDbBackend;
pub use memory::MemoryBackend;

/// Result type of every backend call
pub type BackendResult<T> = Result<T, BackendError>;

/// Backend operations, named after the store's API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Single item read
    GetItem,
    /// Single item write
    PutItem,
    /// Single item removal
    DeleteItem,
    /// Attribute-level change of one item
    UpdateItem,
    /// One page of a partition query
    Query,
    /// One page of a table scan
    Scan,
    /// Multi-item read
    BatchGetItem,
    /// Multi-item write
    BatchWriteItem,
    /// Atomic multi-item read
    TransactGetItems,
    /// Atomic multi-item write
    TransactWriteItems,
}

impl Operation {
    /// Name as used by the store's API
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::GetItem => "GetItem",
            Operation::PutItem => "PutItem",
            Operation::DeleteItem => "DeleteItem",
            Operation::UpdateItem => "UpdateItem",
            Operation::Query => "Query",
            Operation::Scan => "Scan",
            Operation::BatchGetItem => "BatchGetItem",
            Operation::BatchWriteItem => "BatchWriteItem",
            Operation::TransactGetItems => "TransactGetItems",
            Operation::TransactWriteItems => "TransactWriteItems",
        }
    }
}

/// Key attribute names of a table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySchema {
    /// Partition key attribute
    pub partition_key: String,
    /// Sort key attribute, if the table has one
    pub sort_key: Option<String>,
}

impl KeySchema {
    /// Schema with a partition key only
    pub fn new(partition_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            sort_key: None,
        }
    }

    /// Add a sort key
    pub fn with_sort_key(mut self, sort_key: impl Into<String>) -> Self {
        self.sort_key = Some(sort_key.into());
        self
    }

    /// Schema declared by an entity type
    pub fn of<T: Entity>() -> Self {
        Self {
            partition_key: T::PARTITION_KEY.to_string(),
            sort_key: T::SORT_KEY.map(str::to_string),
        }
    }

    /// Whether `name` is a key attribute
    pub fn is_key_attribute(&self, name: &str) -> bool {
        name == self.partition_key || self.sort_key.as_deref() == Some(name)
    }

    /// Key projection of `item`, `None` when a key attribute is missing
    pub fn key_of(&self, item: &Item) -> Option<Item> {
        let mut key = Item::with_capacity(2);
        let _ = key.insert(
            self.partition_key.clone(),
            item.get(&self.partition_key)?.clone(),
        );
        if let Some(sort_key) = &self.sort_key {
            let _ = key.insert(sort_key.clone(), item.get(sort_key)?.clone());
        }
        Some(key)
    }
}

/// Stable string form of a key projection, usable as a map key
///
/// Attribute names are sorted so equal projections always render equally.
pub fn canonical_key(key: &Item) -> String {
    let mut names: Vec<&String> = key.keys().collect();
    names.sort();

    let mut out = String::new();
    for name in names {
        let _ = write!(out, "{name}={:?};", key[name]);
    }
    out
}

/// Single item read
#[derive(Debug, Clone)]
pub struct GetItemRequest {
    /// Target table
    pub table: String,
    /// Key projection
    pub key: Item,
    /// Strongly consistent read
    pub consistent_read: bool,
    /// Attribute paths to return, all when `None`
    pub projection: Option<Vec<String>>,
}

/// Full item write
#[derive(Debug, Clone)]
pub struct PutItemRequest {
    /// Target table
    pub table: String,
    /// Item to store, key attributes included
    pub item: Item,
    /// Condition the stored item must satisfy
    pub precondition: Option<Precondition>,
    /// Return the overwritten item
    pub return_old: bool,
}

/// Single item removal
#[derive(Debug, Clone)]
pub struct DeleteItemRequest {
    /// Target table
    pub table: String,
    /// Key projection
    pub key: Item,
    /// Condition the stored item must satisfy
    pub precondition: Option<Precondition>,
    /// Return the removed item
    pub return_old: bool,
}

/// Attribute-level change of one item
#[derive(Debug, Clone)]
pub struct UpdateItemRequest {
    /// Target table
    pub table: String,
    /// Key projection
    pub key: Item,
    /// Changes to apply
    pub update: Update,
    /// Condition the stored item must satisfy
    pub precondition: Option<Precondition>,
    /// Attributes to return
    pub return_values: ReturnValues,
}

/// One page of a partition query
#[derive(Debug, Clone)]
pub struct QueryRequest {
    /// Target table
    pub table: String,
    /// Partition key attribute name and value
    pub partition_key: (String, AttributeValue),
    /// Range condition applied after the key condition
    pub filter: Option<RangeFilter>,
    /// Attribute paths to return
    pub projection: Option<Vec<String>>,
    /// Strongly consistent read
    pub consistent_read: bool,
    /// Ascending sort key order
    pub scan_forward: bool,
    /// Items evaluated per page
    pub limit: Option<u32>,
    /// Resume after this key
    pub exclusive_start_key: Option<Item>,
}

/// What a scan returns
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Select {
    /// Matching items
    #[default]
    Items,
    /// Only the number of matching items
    Count,
}

/// One page of a table scan
#[derive(Debug, Clone, Default)]
pub struct ScanRequest {
    /// Target table
    pub table: String,
    /// Range condition
    pub filter: Option<RangeFilter>,
    /// Attribute paths to return
    pub projection: Option<Vec<String>>,
    /// Items or count
    pub select: Select,
    /// Strongly consistent read
    pub consistent_read: bool,
    /// Items evaluated per page
    pub limit: Option<u32>,
    /// Resume after this key
    pub exclusive_start_key: Option<Item>,
}

/// One page of query or scan results
#[derive(Debug, Clone, Default)]
pub struct Page {
    /// Matching items (empty for `Select::Count`)
    pub items: Vec<Item>,
    /// Number of matching items in the page
    pub count: usize,
    /// Present when more pages follow
    pub last_evaluated_key: Option<Item>,
}

/// Multi-item read against one table
#[derive(Debug, Clone)]
pub struct BatchGetRequest {
    /// Target table
    pub table: String,
    /// Key projections
    pub keys: Vec<Item>,
    /// Strongly consistent read
    pub consistent_read: bool,
    /// Attribute paths to return
    pub projection: Option<Vec<String>>,
}

/// Answer to a [`BatchGetRequest`]
#[derive(Debug, Clone, Default)]
pub struct BatchGetResponse {
    /// Items found, in no particular order
    pub items: Vec<Item>,
    /// Keys the store declined to process
    pub unprocessed_keys: Vec<Item>,
}

/// One write of a batch
#[derive(Debug, Clone, PartialEq)]
pub enum BatchWrite {
    /// Store the full item
    Put(Item),
    /// Remove the item at the key projection
    Delete(Item),
}

impl BatchWrite {
    /// Item or key the write carries
    pub fn item(&self) -> &Item {
        match self {
            BatchWrite::Put(item) | BatchWrite::Delete(item) => item,
        }
    }
}

/// Multi-item write against one table
#[derive(Debug, Clone)]
pub struct BatchWriteRequest {
    /// Target table
    pub table: String,
    /// Writes in submission order
    pub writes: Vec<BatchWrite>,
}

/// Answer to a [`BatchWriteRequest`]
#[derive(Debug, Clone, Default)]
pub struct BatchWriteResponse {
    /// Writes the store declined to process
    pub unprocessed: Vec<BatchWrite>,
}

/// One read of a transaction
#[derive(Debug, Clone)]
pub struct TransactGet {
    /// Target table
    pub table: String,
    /// Key projection
    pub key: Item,
    /// Attribute paths to return
    pub projection: Option<Vec<String>>,
}

/// One write of a transaction
#[derive(Debug, Clone)]
pub enum TransactWriteOp {
    /// Store a full item
    Put {
        /// Target table
        table: String,
        /// Item to store
        item: Item,
        /// Condition the stored item must satisfy
        precondition: Option<Precondition>,
    },
    /// Change attributes of an item
    Update {
        /// Target table
        table: String,
        /// Key projection
        key: Item,
        /// Changes to apply
        update: Update,
        /// Condition the stored item must satisfy
        precondition: Option<Precondition>,
    },
    /// Remove an item
    Delete {
        /// Target table
        table: String,
        /// Key projection
        key: Item,
        /// Condition the stored item must satisfy
        precondition: Option<Precondition>,
    },
    /// Only check a condition
    ConditionCheck {
        /// Target table
        table: String,
        /// Key projection
        key: Item,
        /// Condition the stored item must satisfy
        precondition: Precondition,
    },
}

impl TransactWriteOp {
    /// Table the write targets
    pub fn table(&self) -> &str {
        match self {
            TransactWriteOp::Put { table, .. }
            | TransactWriteOp::Update { table, .. }
            | TransactWriteOp::Delete { table, .. }
            | TransactWriteOp::ConditionCheck { table, .. } => table,
        }
    }
}

/// Raw operations of one physical store
///
/// Implementations must be safe to share between concurrent callers. None
/// of the operations retries on its own; batch operations report what the
/// store declined instead.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Read one item; `None` when absent
    async fn get_item(&self, request: GetItemRequest) -> BackendResult<Option<Item>>;

    /// Store one item; returns the overwritten item when asked to
    async fn put_item(&self, request: PutItemRequest) -> BackendResult<Option<Item>>;

    /// Remove one item; removing an absent item is not an error
    async fn delete_item(&self, request: DeleteItemRequest) -> BackendResult<Option<Item>>;

    /// Change attributes of one item, creating it when absent
    async fn update_item(&self, request: UpdateItemRequest) -> BackendResult<Option<Item>>;

    /// Read one page of a partition
    async fn query(&self, request: QueryRequest) -> BackendResult<Page>;

    /// Read one page of the whole table
    async fn scan(&self, request: ScanRequest) -> BackendResult<Page>;

    /// Read several items in one call
    async fn batch_get(&self, request: BatchGetRequest) -> BackendResult<BatchGetResponse>;

    /// Write several items in one call, without atomicity
    async fn batch_write(&self, request: BatchWriteRequest) -> BackendResult<BatchWriteResponse>;

    /// Read several items atomically; answers are positional
    async fn transact_get(&self, items: Vec<TransactGet>) -> BackendResult<Vec<Option<Item>>>;

    /// Write several items atomically; all or nothing
    async fn transact_write(&self, items: Vec<TransactWriteOp>) -> BackendResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(value: &str) -> AttributeValue {
        AttributeValue::S(value.to_string())
    }

    #[test]
    fn test_canonical_key_ignores_insertion_order() {
        let mut a = Item::new();
        let _ = a.insert("user_id".into(), s("u1"));
        let _ = a.insert("game_title".into(), s("g1"));

        let mut b = Item::new();
        let _ = b.insert("game_title".into(), s("g1"));
        let _ = b.insert("user_id".into(), s("u1"));

        assert_eq!(canonical_key(&a), canonical_key(&b));
    }

    #[test]
    fn test_key_schema_projection() {
        let schema = KeySchema::new("user_id").with_sort_key("game_title");
        let mut item = Item::new();
        let _ = item.insert("user_id".into(), s("u1"));
        let _ = item.insert("game_title".into(), s("g1"));
        let _ = item.insert("score".into(), AttributeValue::N("10".into()));

        let key = schema.key_of(&item).unwrap();
        assert_eq!(key.len(), 2);
        assert!(!key.contains_key("score"));

        let _ = item.remove("game_title");
        assert!(schema.key_of(&item).is_none());
    }
}
