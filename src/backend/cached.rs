//! Read-through / write-through item cache in front of another backend.

use async_trait::async_trait;
use lru::LruCache;
use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::backend::{
    Backend, BackendResult, BatchGetRequest, BatchGetResponse, BatchWrite, BatchWriteRequest,
    BatchWriteResponse, DeleteItemRequest, GetItemRequest, KeySchema, Page, PutItemRequest,
    QueryRequest, ScanRequest, TransactGet, TransactWriteOp, UpdateItemRequest, canonical_key,
};
use crate::config::CacheConfig;
use crate::table::{Item, ReturnValues};

#[derive(Debug, Clone)]
struct CacheEntry {
    item: Item,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Cached items plus the write history used to reject stale fills
///
/// Every write through the cache bumps `generation` and records it for the
/// key it touched. A read-through fill carries the generation seen before
/// its backend read and is dropped when the key was written since. Write
/// records are LRU-bounded; `floor` is the newest generation forgotten, so
/// a key without a record counts as written at `floor`.
#[derive(Debug)]
struct CacheState {
    entries: LruCache<String, CacheEntry>,
    writes: LruCache<String, u64>,
    generation: u64,
    floor: u64,
}

impl CacheState {
    fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: LruCache::new(capacity),
            writes: LruCache::new(capacity),
            generation: 0,
            floor: 0,
        }
    }

    fn record_write(&mut self, cache_key: &str) {
        self.generation += 1;
        let pushed = self.writes.push(cache_key.to_string(), self.generation);
        if let Some((forgotten, generation)) = pushed {
            if forgotten != cache_key {
                self.floor = self.floor.max(generation);
            }
        }
    }

    fn written_since(&self, cache_key: &str, generation: u64) -> bool {
        self.writes
            .peek(cache_key)
            .map_or(self.floor > generation, |written| *written > generation)
    }

    fn clear(&mut self) {
        self.generation += 1;
        self.floor = self.generation;
        self.entries.clear();
        self.writes.clear();
    }
}

/// Caching tier wrapping any [`Backend`]
///
/// Full items are cached per table and key projection, bounded by an LRU
/// capacity and a time to live.
///
/// - `get_item` and `batch_get` are served from the cache when possible,
///   unless a consistent read or a projection is requested
/// - `put_item` stores the written item; deletes, updates and batch or
///   transactional writes evict the keys they touch and re-store full items
///   when the write carried one
/// - `query`, `scan` and `transact_get` always go to the wrapped backend
/// - a read that was in flight while a write to the same key went through
///   this tier does not fill the cache
///
/// Writes made directly to the wrapped store are not seen until the cached
/// entry expires or is evicted. Only tables registered with
/// [`with_table`](Self::with_table) are cached.
#[derive(Debug)]
pub struct CachedBackend<B> {
    inner: B,
    schemas: HashMap<String, KeySchema>,
    cache: Mutex<CacheState>,
    ttl: Duration,
}

impl<B: Backend> CachedBackend<B> {
    /// Cache of at most `capacity` items, each kept for `ttl`
    pub fn new(inner: B, capacity: NonZeroUsize, ttl: Duration) -> Self {
        Self {
            inner,
            schemas: HashMap::new(),
            cache: Mutex::new(CacheState::new(capacity)),
            ttl,
        }
    }

    /// Cache sized from configuration
    pub fn from_config(inner: B, config: &CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity).unwrap_or(NonZeroUsize::MIN);
        Self::new(inner, capacity, Duration::from_secs(config.ttl_secs))
    }

    /// Cache items of `table`, keyed by `schema`
    pub fn with_table(mut self, table: impl Into<String>, schema: KeySchema) -> Self {
        let _ = self.schemas.insert(table.into(), schema);
        self
    }

    /// Wrapped backend
    pub fn inner(&self) -> &B {
        &self.inner
    }

    /// Number of cached items, expired ones included
    pub async fn len(&self) -> usize {
        self.cache.lock().await.entries.len()
    }

    /// Whether nothing is cached
    pub async fn is_empty(&self) -> bool {
        self.cache.lock().await.entries.is_empty()
    }

    /// Drop every cached item
    ///
    /// Reads in flight while this runs do not fill the cache.
    pub async fn invalidate_all(&self) {
        self.cache.lock().await.clear();
    }

    fn cache_key(&self, table: &str, item: &Item) -> Option<String> {
        let key = self.schemas.get(table)?.key_of(item)?;
        Some(format!("{table}/{}", canonical_key(&key)))
    }

    async fn lookup(&self, cache_key: &str) -> Option<Item> {
        let mut cache = self.cache.lock().await;
        match cache.entries.get(cache_key) {
            Some(entry) if entry.is_expired() => {
                let _ = cache.entries.pop(cache_key);
                None
            }
            Some(entry) => Some(entry.item.clone()),
            None => None,
        }
    }

    fn entry(&self, item: Item) -> CacheEntry {
        CacheEntry {
            item,
            expires_at: Instant::now() + self.ttl,
        }
    }

    /// Generation to pass to [`fill`](Self::fill) for a read starting now
    async fn generation(&self) -> u64 {
        self.cache.lock().await.generation
    }

    /// Cache an item written through this tier
    async fn store(&self, table: &str, item: Item) {
        let Some(cache_key) = self.cache_key(table, &item) else {
            return;
        };
        let entry = self.entry(item);
        let mut cache = self.cache.lock().await;
        cache.record_write(&cache_key);
        let _ = cache.entries.put(cache_key, entry);
    }

    /// Cache an item read from the wrapped backend, unless the key was
    /// written through this tier after `generation`
    async fn fill(&self, table: &str, item: Item, generation: u64) {
        let Some(cache_key) = self.cache_key(table, &item) else {
            return;
        };
        let entry = self.entry(item);
        let mut cache = self.cache.lock().await;
        if cache.written_since(&cache_key, generation) {
            tracing::trace!(table, "skipping fill of a key written during the read");
            return;
        }
        let _ = cache.entries.put(cache_key, entry);
    }

    async fn evict(&self, table: &str, key: &Item) {
        if let Some(cache_key) = self.cache_key(table, key) {
            let mut cache = self.cache.lock().await;
            cache.record_write(&cache_key);
            let _ = cache.entries.pop(&cache_key);
        }
    }
}

#[async_trait]
impl<B: Backend> Backend for CachedBackend<B> {
    async fn get_item(&self, request: GetItemRequest) -> BackendResult<Option<Item>> {
        let cacheable = !request.consistent_read && request.projection.is_none();
        let cache_key = self.cache_key(&request.table, &request.key);

        if let (true, Some(cache_key)) = (cacheable, &cache_key) {
            if let Some(item) = self.lookup(cache_key).await {
                tracing::trace!(table = %request.table, "cache hit");
                return Ok(Some(item));
            }
            tracing::trace!(table = %request.table, "cache miss");
        }

        let table = request.table.clone();
        let full_item = request.projection.is_none();
        let generation = self.generation().await;
        let found = self.inner.get_item(request).await?;

        if let (true, Some(_), Some(item)) = (full_item, &cache_key, &found) {
            self.fill(&table, item.clone(), generation).await;
        }
        Ok(found)
    }

    async fn put_item(&self, request: PutItemRequest) -> BackendResult<Option<Item>> {
        let table = request.table.clone();
        let item = request.item.clone();

        match self.inner.put_item(request).await {
            Ok(old) => {
                self.store(&table, item).await;
                Ok(old)
            }
            Err(err) => {
                self.evict(&table, &item).await;
                Err(err)
            }
        }
    }

    async fn delete_item(&self, request: DeleteItemRequest) -> BackendResult<Option<Item>> {
        let table = request.table.clone();
        let key = request.key.clone();

        let result = self.inner.delete_item(request).await;
        self.evict(&table, &key).await;
        result
    }

    async fn update_item(&self, request: UpdateItemRequest) -> BackendResult<Option<Item>> {
        let table = request.table.clone();
        let key = request.key.clone();
        let returns_full_item = request.return_values == ReturnValues::AllNew;

        let result = self.inner.update_item(request).await;
        self.evict(&table, &key).await;

        if let (true, Ok(Some(item))) = (returns_full_item, &result) {
            self.store(&table, item.clone()).await;
        }
        result
    }

    async fn query(&self, request: QueryRequest) -> BackendResult<Page> {
        self.inner.query(request).await
    }

    async fn scan(&self, request: ScanRequest) -> BackendResult<Page> {
        self.inner.scan(request).await
    }

    async fn batch_get(&self, request: BatchGetRequest) -> BackendResult<BatchGetResponse> {
        let cacheable = !request.consistent_read
            && request.projection.is_none()
            && self.schemas.contains_key(&request.table);
        if !cacheable {
            return self.inner.batch_get(request).await;
        }

        let mut hits = Vec::new();
        let mut misses = Vec::new();
        for key in request.keys {
            let cached = match self.cache_key(&request.table, &key) {
                Some(cache_key) => self.lookup(&cache_key).await,
                None => None,
            };
            match cached {
                Some(item) => hits.push(item),
                None => misses.push(key),
            }
        }
        tracing::trace!(
            table = %request.table,
            hits = hits.len(),
            misses = misses.len(),
            "batch cache lookup"
        );

        if misses.is_empty() {
            return Ok(BatchGetResponse {
                items: hits,
                unprocessed_keys: Vec::new(),
            });
        }

        let generation = self.generation().await;
        let mut response = self
            .inner
            .batch_get(BatchGetRequest {
                table: request.table.clone(),
                keys: misses,
                consistent_read: false,
                projection: None,
            })
            .await?;

        for item in &response.items {
            self.fill(&request.table, item.clone(), generation).await;
        }
        response.items.extend(hits);
        Ok(response)
    }

    async fn batch_write(&self, request: BatchWriteRequest) -> BackendResult<BatchWriteResponse> {
        let table = request.table.clone();
        let writes = request.writes.clone();

        let result = self.inner.batch_write(request).await;

        let declined: HashSet<String> = match &result {
            Ok(response) => response
                .unprocessed
                .iter()
                .filter_map(|write| self.cache_key(&table, write.item()))
                .collect(),
            Err(_) => HashSet::new(),
        };

        for write in writes {
            let applied = result.is_ok()
                && self
                    .cache_key(&table, write.item())
                    .is_some_and(|cache_key| !declined.contains(&cache_key));
            match write {
                BatchWrite::Put(item) if applied => self.store(&table, item).await,
                other => self.evict(&table, other.item()).await,
            }
        }
        result
    }

    async fn transact_get(&self, items: Vec<TransactGet>) -> BackendResult<Vec<Option<Item>>> {
        self.inner.transact_get(items).await
    }

    async fn transact_write(&self, items: Vec<TransactWriteOp>) -> BackendResult<()> {
        let touched = items.clone();
        let result = self.inner.transact_write(items).await;

        for op in touched {
            match op {
                TransactWriteOp::Put { table, item, .. } if result.is_ok() => {
                    self.store(&table, item).await;
                }
                TransactWriteOp::Put { table, item, .. } => self.evict(&table, &item).await,
                TransactWriteOp::Update { table, key, .. }
                | TransactWriteOp::Delete { table, key, .. } => self.evict(&table, &key).await,
                TransactWriteOp::ConditionCheck { .. } => {}
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, Operation};
    use aws_sdk_dynamodb::types::AttributeValue;

    fn schema() -> KeySchema {
        KeySchema::new("id")
    }

    fn item(id: &str, value: i64) -> Item {
        Item::from([
            ("id".to_string(), AttributeValue::S(id.to_string())),
            ("value".to_string(), AttributeValue::N(value.to_string())),
        ])
    }

    fn key(id: &str) -> Item {
        Item::from([("id".to_string(), AttributeValue::S(id.to_string()))])
    }

    fn cached(memory: &MemoryBackend) -> CachedBackend<MemoryBackend> {
        CachedBackend::new(memory.clone(), NonZeroUsize::MIN.saturating_add(9), Duration::from_secs(60))
            .with_table("t", schema())
    }

    fn get(id: &str) -> GetItemRequest {
        GetItemRequest {
            table: "t".into(),
            key: key(id),
            consistent_read: false,
            projection: None,
        }
    }

    fn put(item: Item) -> PutItemRequest {
        PutItemRequest {
            table: "t".into(),
            item,
            precondition: None,
            return_old: false,
        }
    }

    #[tokio::test]
    async fn test_read_through_serves_second_read_from_cache() {
        let memory = MemoryBackend::new().with_table("t", schema());
        memory.insert_raw("t", item("a", 1)).await.unwrap();
        let cached = cached(&memory);

        assert!(cached.get_item(get("a")).await.unwrap().is_some());
        assert!(cached.get_item(get("a")).await.unwrap().is_some());
        assert_eq!(memory.calls(Operation::GetItem).await, 1);
    }

    #[tokio::test]
    async fn test_not_found_is_not_cached() {
        let memory = MemoryBackend::new().with_table("t", schema());
        let cached = cached(&memory);

        assert!(cached.get_item(get("a")).await.unwrap().is_none());
        assert!(cached.get_item(get("a")).await.unwrap().is_none());
        assert_eq!(memory.calls(Operation::GetItem).await, 2);
        assert!(cached.is_empty().await);
    }

    #[tokio::test]
    async fn test_stale_until_evicted() {
        let memory = MemoryBackend::new().with_table("t", schema());
        let cached = cached(&memory);
        cached.put_item(put(item("a", 1))).await.unwrap();

        // Written behind the cache's back.
        memory.insert_raw("t", item("a", 2)).await.unwrap();
        let seen = cached.get_item(get("a")).await.unwrap().unwrap();
        assert_eq!(seen.get("value"), Some(&AttributeValue::N("1".into())));

        let mut consistent = get("a");
        consistent.consistent_read = true;
        let seen = cached.get_item(consistent).await.unwrap().unwrap();
        assert_eq!(seen.get("value"), Some(&AttributeValue::N("2".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let memory = MemoryBackend::new().with_table("t", schema());
        let cached = cached(&memory);
        cached.put_item(put(item("a", 1))).await.unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cached.get_item(get("a")).await.unwrap().is_some());
        assert_eq!(memory.calls(Operation::GetItem).await, 1);
    }

    #[tokio::test]
    async fn test_delete_evicts() {
        let memory = MemoryBackend::new().with_table("t", schema());
        let cached = cached(&memory);
        cached.put_item(put(item("a", 1))).await.unwrap();

        cached
            .delete_item(DeleteItemRequest {
                table: "t".into(),
                key: key("a"),
                precondition: None,
                return_old: false,
            })
            .await
            .unwrap();
        assert!(cached.get_item(get("a")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_batch_get_forwards_only_misses() {
        let memory = MemoryBackend::new().with_table("t", schema());
        memory.insert_raw("t", item("b", 2)).await.unwrap();
        let cached = cached(&memory);
        cached.put_item(put(item("a", 1))).await.unwrap();

        let response = cached
            .batch_get(BatchGetRequest {
                table: "t".into(),
                keys: vec![key("a"), key("b"), key("c")],
                consistent_read: false,
                projection: None,
            })
            .await
            .unwrap();
        assert_eq!(response.items.len(), 2);
        assert_eq!(memory.calls(Operation::BatchGetItem).await, 1);

        let response = cached
            .batch_get(BatchGetRequest {
                table: "t".into(),
                keys: vec![key("a"), key("b")],
                consistent_read: false,
                projection: None,
            })
            .await
            .unwrap();
        assert_eq!(response.items.len(), 2);
        assert_eq!(memory.calls(Operation::BatchGetItem).await, 1);
    }

    #[test]
    fn test_fill_is_rejected_after_a_write() {
        let mut state = CacheState::new(NonZeroUsize::MIN.saturating_add(1));
        let before = state.generation;
        state.record_write("t/a");

        assert!(state.written_since("t/a", before));
        assert!(!state.written_since("t/a", state.generation));
        assert!(!state.written_since("t/b", before));
    }

    #[test]
    fn test_forgotten_writes_raise_the_floor() {
        let mut state = CacheState::new(NonZeroUsize::MIN);
        state.record_write("t/a");
        let after_a = state.generation;
        state.record_write("t/b");

        // "t/a" fell out of the write history: only reads started after
        // its write may fill it.
        assert!(!state.written_since("t/a", after_a));
        assert!(state.written_since("t/a", after_a - 1));
        assert!(state.written_since("t/b", after_a));
    }

    #[test]
    fn test_clear_rejects_fills_started_before_it() {
        let mut state = CacheState::new(NonZeroUsize::MIN);
        let before = state.generation;
        state.clear();

        assert!(state.written_since("t/a", before));
        assert!(!state.written_since("t/a", state.generation));
    }

    #[tokio::test]
    async fn test_unregistered_table_passes_through() {
        let memory = MemoryBackend::new().with_table("other", schema());
        memory.insert_raw("other", item("a", 1)).await.unwrap();
        let cached = CachedBackend::new(memory.clone(), NonZeroUsize::MIN, Duration::from_secs(60));

        let mut request = get("a");
        request.table = "other".into();
        let _ = cached.get_item(request.clone()).await.unwrap();
        let _ = cached.get_item(request).await.unwrap();
        assert_eq!(memory.calls(Operation::GetItem).await, 2);
    }
}
