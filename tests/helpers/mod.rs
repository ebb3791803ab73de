#![allow(dead_code, unused_imports)]

/// Test helpers and fixtures for table integration tests
///
/// Every suite runs against the in-memory backend unless it says
/// otherwise; the store is shared by clones, so a test can keep a handle
/// to inspect call counters while a table owns another.
pub mod fixtures;

pub use dynamo_gateway::backend::Operation;
pub use dynamo_gateway::{
    AttributeValue, CompositeKey, Entity, KeySchema, MemoryBackend, Outcome, Table, TableConfig,
    WriteOutcome,
};
pub use fixtures::{GameScore, TABLE, key, score};

use tracing_subscriber::EnvFilter;

/// Install a test subscriber honoring `RUST_LOG` (idempotent)
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// In-memory store with the game scores table declared
pub fn memory_backend() -> MemoryBackend {
    init_tracing();
    MemoryBackend::new().with_table(TABLE, KeySchema::of::<GameScore>())
}

/// Game scores table over a shared in-memory store
pub fn memory_table(backend: &MemoryBackend) -> Table<GameScore, MemoryBackend> {
    memory_table_with(backend, TableConfig::new(TABLE))
}

/// Same as [`memory_table`] with a custom configuration
pub fn memory_table_with(
    backend: &MemoryBackend,
    config: TableConfig,
) -> Table<GameScore, MemoryBackend> {
    Table::new(backend.clone(), config).expect("valid table config")
}

/// `count` scores for one user, titled `game_000`, `game_001`, ...
pub fn scores_for(user_id: &str, count: usize) -> Vec<GameScore> {
    (0..count)
        .map(|i| score(user_id, &format!("game_{i:03}"), i as i64 * 10))
        .collect()
}

/// Seed the store through a table
pub async fn seed(table: &Table<GameScore, MemoryBackend>, scores: &[GameScore]) {
    for score in scores {
        table.put(score).await.expect("seed put");
    }
}
