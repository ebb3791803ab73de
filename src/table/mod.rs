//! Typed table gateway over a [`Backend`](crate::backend::Backend).

mod batch;
pub mod chunker;
pub mod codec;
pub mod conditions;
mod entity;
mod operations;
mod reconcile;
mod types;

pub use batch::TransactWrite;
pub use chunker::{Chunk, Chunker};
pub use conditions::{Precondition, RangeFilter, Update, UpdateAction};
pub use entity::Entity;
pub use operations::{CachedTable, DirectTable, Table};
pub use types::{
    BatchOptions, BatchOutcome, BatchOutput, CompositeKey, DeleteOptions, GetOptions, Item,
    Outcome, PartitionKey, PutOptions, QueryOptions, ReturnValues, ScanOptions, SortKey,
    TransactOutcome, TransactWriteOutput, UpdateOptions, WriteOutcome,
};
