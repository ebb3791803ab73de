use std::fmt;
use std::future::Future;
use std::marker::PhantomData;

use crate::backend::{
    Backend, BackendResult, CachedBackend, DeleteItemRequest, DynamoDbBackend, GetItemRequest,
    KeySchema, Page, PutItemRequest, QueryRequest, ScanRequest, Select, UpdateItemRequest,
};
use crate::config::TableConfig;
use crate::error::Error;
use crate::table::codec::{key_item, key_of, key_projection, marshal, to_value, unmarshal};
use crate::table::conditions::{Precondition, RangeFilter, Update, resolve};
use crate::table::entity::Entity;
use crate::table::reconcile::{reconcile_get, reconcile_items, reconcile_update};
use crate::table::types::{
    DeleteOptions, GetOptions, Item, Outcome, PutOptions, QueryOptions, ScanOptions,
    UpdateOptions, WriteOutcome,
};

/// Typed gateway to one table
///
/// Built from a [`Backend`] and an immutable [`TableConfig`]. A table holds
/// no mutable state of its own, so one instance can serve concurrent
/// callers (share it by reference or behind an `Arc`).
///
/// # Example
///
/// ```rust
/// use dynamo_gateway::backend::{KeySchema, MemoryBackend};
/// use dynamo_gateway::{Entity, Outcome, Table, TableConfig};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// struct Score {
///     user_id: String,
///     game_title: String,
///     #[serde(default)]
///     score: i64,
/// }
///
/// impl Entity for Score {
///     type PK = String;
///     type SK = String;
///     const PARTITION_KEY: &'static str = "user_id";
///     const SORT_KEY: Option<&'static str> = Some("game_title");
///
///     fn partition_key(&self) -> String {
///         self.user_id.clone()
///     }
///
///     fn sort_key(&self) -> Option<String> {
///         Some(self.game_title.clone())
///     }
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), dynamo_gateway::Error> {
/// let backend = MemoryBackend::new().with_table("GameScores", KeySchema::of::<Score>());
/// let table: Table<Score, _> = Table::new(backend, TableConfig::new("GameScores"))?;
///
/// let score = Score { user_id: "u1".into(), game_title: "g1".into(), score: 100 };
/// table.put(&score).await?;
///
/// let found = table.get(&"u1".to_string(), Some(&"g1".to_string())).await?;
/// assert_eq!(found, Outcome::Found(score));
/// # Ok(())
/// # }
/// ```
pub struct Table<T, B> {
    backend: B,
    config: TableConfig,
    _entity: PhantomData<fn() -> T>,
}

/// Table served directly by DynamoDB
pub type DirectTable<T> = Table<T, DynamoDbBackend>;

/// Table served through the item cache in front of DynamoDB
pub type CachedTable<T> = Table<T, CachedBackend<DynamoDbBackend>>;

impl<T, B: fmt::Debug> fmt::Debug for Table<T, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("table_name", &self.config.table_name)
            .field("backend", &self.backend)
            .finish()
    }
}

impl<T, B: Clone> Clone for Table<T, B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            config: self.config.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity> Table<T, DynamoDbBackend> {
    /// Direct table with a client built from `config`
    pub async fn connect(config: TableConfig) -> Result<Self, Error> {
        config.validate()?;
        let backend = DynamoDbBackend::from_config(&config).await;
        Self::new(backend, config)
    }
}

impl<T: Entity> Table<T, CachedBackend<DynamoDbBackend>> {
    /// Cached table with a client built from `config`
    pub async fn connect_cached(config: TableConfig) -> Result<Self, Error> {
        config.validate()?;
        let backend = CachedBackend::from_config(
            DynamoDbBackend::from_config(&config).await,
            &config.cache,
        )
        .with_table(config.table_name.clone(), KeySchema::of::<T>());
        Self::new(backend, config)
    }
}

impl<T: Entity, B: Backend> Table<T, B> {
    /// Table over `backend`; fails when `config` is unusable
    pub fn new(backend: B, config: TableConfig) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            backend,
            config,
            _entity: PhantomData,
        })
    }

    /// Table name
    pub fn name(&self) -> &str {
        &self.config.table_name
    }

    /// Configuration the table was built with
    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    /// Backend the table talks to
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Requested paths plus the key attributes
    pub(crate) fn projection(&self, paths: Option<Vec<String>>) -> Option<Vec<String>> {
        let mut paths = paths?;
        for key in std::iter::once(T::PARTITION_KEY).chain(T::SORT_KEY) {
            if !paths.iter().any(|path| path == key) {
                paths.push(key.to_string());
            }
        }
        Some(paths)
    }

    fn decode_old(old: Option<Item>) -> Result<Option<T>, Error> {
        old.filter(|item| !item.is_empty())
            .map(unmarshal)
            .transpose()
    }

    /// Get an item by key
    ///
    /// A missing record and a record returned for another key are both
    /// [`Outcome::NotFound`].
    pub async fn get(&self, partition_key: &T::PK, sort_key: Option<&T::SK>) -> Result<Outcome<T>, Error> {
        self.get_with(partition_key, sort_key, GetOptions::default())
            .await
    }

    /// Get an item by key with read options
    pub async fn get_with(
        &self,
        partition_key: &T::PK,
        sort_key: Option<&T::SK>,
        options: GetOptions,
    ) -> Result<Outcome<T>, Error> {
        let key = key_item::<T>(partition_key, sort_key)?;
        let payload = self
            .backend
            .get_item(GetItemRequest {
                table: self.name().to_string(),
                key: key.clone(),
                consistent_read: options.consistent_read,
                projection: self.projection(options.projection),
            })
            .await?;

        reconcile_get(self.name(), &key, payload)
    }

    /// Put an item, replacing any record at its key
    pub async fn put(&self, entity: &T) -> Result<(), Error> {
        let _ = self.put_with(entity, PutOptions::default()).await?;
        Ok(())
    }

    /// Put an item with a precondition and/or returning the replaced item
    pub async fn put_with(&self, entity: &T, options: PutOptions) -> Result<WriteOutcome<Option<T>>, Error> {
        let item = marshal(entity)?;
        let _ = key_projection::<T>(&item)?;

        let result = self
            .backend
            .put_item(PutItemRequest {
                table: self.name().to_string(),
                item,
                precondition: options.precondition,
                return_old: options.return_old,
            })
            .await;

        match resolve(result)? {
            WriteOutcome::Applied(old) => Ok(WriteOutcome::Applied(Self::decode_old(old)?)),
            WriteOutcome::PreconditionFailed => Ok(WriteOutcome::PreconditionFailed),
        }
    }

    /// Put an item only if a record already exists at its key
    pub async fn put_if_exists(&self, entity: &T) -> Result<WriteOutcome, Error> {
        let outcome = self
            .put_with(entity, PutOptions::precondition(Precondition::item_exists::<T>()))
            .await?;
        Ok(outcome.map(|_| ()))
    }

    /// Put an item only if no record exists at its key
    pub async fn put_if_absent(&self, entity: &T) -> Result<WriteOutcome, Error> {
        let outcome = self
            .put_with(entity, PutOptions::precondition(Precondition::item_absent::<T>()))
            .await?;
        Ok(outcome.map(|_| ()))
    }

    /// Delete an item by key; deleting a missing item succeeds
    pub async fn delete(&self, partition_key: &T::PK, sort_key: Option<&T::SK>) -> Result<(), Error> {
        let _ = self
            .delete_with(partition_key, sort_key, DeleteOptions::default())
            .await?;
        Ok(())
    }

    /// Delete an item with a precondition and/or returning the deleted item
    pub async fn delete_with(
        &self,
        partition_key: &T::PK,
        sort_key: Option<&T::SK>,
        options: DeleteOptions,
    ) -> Result<WriteOutcome<Option<T>>, Error> {
        let key = key_item::<T>(partition_key, sort_key)?;

        let result = self
            .backend
            .delete_item(DeleteItemRequest {
                table: self.name().to_string(),
                key,
                precondition: options.precondition,
                return_old: options.return_old,
            })
            .await;

        match resolve(result)? {
            WriteOutcome::Applied(old) => Ok(WriteOutcome::Applied(Self::decode_old(old)?)),
            WriteOutcome::PreconditionFailed => Ok(WriteOutcome::PreconditionFailed),
        }
    }

    /// Apply attribute-level changes to the item at `entity`'s key
    ///
    /// Returns the updated attributes merged over the key, decoded into an
    /// entity; attributes the update did not touch take their serde
    /// defaults.
    pub async fn update(&self, entity: &T, update: Update) -> Result<Option<T>, Error> {
        let outcome = self
            .update_with(entity, update, UpdateOptions::default())
            .await?;
        Ok(outcome.applied().flatten())
    }

    /// Update with a precondition and a choice of returned attributes
    pub async fn update_with(
        &self,
        entity: &T,
        update: Update,
        options: UpdateOptions,
    ) -> Result<WriteOutcome<Option<T>>, Error> {
        update.validate::<T>()?;
        let key = key_of(entity)?;

        let result = self
            .backend
            .update_item(UpdateItemRequest {
                table: self.name().to_string(),
                key: key.clone(),
                update,
                precondition: options.precondition,
                return_values: options.return_values,
            })
            .await;

        match resolve(result)? {
            WriteOutcome::Applied(attributes) => {
                Ok(WriteOutcome::Applied(reconcile_update(key, attributes)?))
            }
            WriteOutcome::PreconditionFailed => Ok(WriteOutcome::PreconditionFailed),
        }
    }

    /// Every item sharing a partition key, in sort key order
    pub async fn query(&self, partition_key: &T::PK) -> Result<Vec<T>, Error> {
        self.query_with(partition_key, QueryOptions::default()).await
    }

    /// Query with a range filter, projection or ordering
    pub async fn query_with(&self, partition_key: &T::PK, options: QueryOptions) -> Result<Vec<T>, Error> {
        let base = QueryRequest {
            table: self.name().to_string(),
            partition_key: (T::PARTITION_KEY.to_string(), to_value(partition_key)?),
            filter: options.filter,
            projection: self.projection(options.projection),
            consistent_read: options.consistent_read,
            scan_forward: options.scan_forward,
            limit: options.page_size,
            exclusive_start_key: None,
        };
        let backend = &self.backend;

        let (items, _) = self
            .drain_pages(move |start| {
                let mut request = base.clone();
                request.exclusive_start_key = start;
                backend.query(request)
            })
            .await?;

        reconcile_items(items)
    }

    /// Every item whose attribute lies in the inclusive range
    ///
    /// Reads the whole table; cost grows with table size, not with the
    /// number of matches.
    pub async fn scan(&self, filter: &RangeFilter) -> Result<Vec<T>, Error> {
        self.scan_with(Some(filter), ScanOptions::default()).await
    }

    /// Scan with an optional range filter, projection and page size
    pub async fn scan_with(&self, filter: Option<&RangeFilter>, options: ScanOptions) -> Result<Vec<T>, Error> {
        let base = ScanRequest {
            table: self.name().to_string(),
            filter: filter.cloned(),
            projection: self.projection(options.projection),
            select: Select::Items,
            consistent_read: options.consistent_read,
            limit: options.page_size,
            exclusive_start_key: None,
        };
        let backend = &self.backend;

        let (items, _) = self
            .drain_pages(move |start| {
                let mut request = base.clone();
                request.exclusive_start_key = start;
                backend.scan(request)
            })
            .await?;

        reconcile_items(items)
    }

    /// Number of items whose attribute lies in the inclusive range,
    /// counted by the backend
    pub async fn count(&self, filter: &RangeFilter) -> Result<usize, Error> {
        let base = ScanRequest {
            table: self.name().to_string(),
            filter: Some(filter.clone()),
            select: Select::Count,
            ..ScanRequest::default()
        };
        let backend = &self.backend;

        let (_, count) = self
            .drain_pages(move |start| {
                let mut request = base.clone();
                request.exclusive_start_key = start;
                backend.scan(request)
            })
            .await?;

        Ok(count)
    }

    /// Follow `last_evaluated_key` until the backend reports the last page
    async fn drain_pages<F, Fut>(&self, mut fetch: F) -> Result<(Vec<Item>, usize), Error>
    where
        F: FnMut(Option<Item>) -> Fut,
        Fut: Future<Output = BackendResult<Page>>,
    {
        let mut items = Vec::new();
        let mut count = 0;
        let mut pages = 0;
        let mut start = None;

        loop {
            let page = fetch(start.take()).await?;
            pages += 1;
            count += page.count;
            items.extend(page.items);

            match page.last_evaluated_key {
                Some(key) => start = Some(key),
                None => break,
            }
        }

        tracing::debug!(table = self.name(), pages, count, "pages drained");
        Ok((items, count))
    }
}
