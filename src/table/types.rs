use aws_sdk_dynamodb::types::AttributeValue;
use std::collections::HashMap;
use tokio::time::Instant;

use crate::table::conditions::{Precondition, RangeFilter};

/// Raw attribute map as exchanged with a backend
pub type Item = HashMap<String, AttributeValue>;

/// Partition key type alias
pub type PartitionKey<PK> = PK;

/// Sort key type alias
pub type SortKey<SK> = Option<SK>;

/// Composite key type alias
pub type CompositeKey<PK, SK> = (PK, SortKey<SK>);

/// Result of a single-item read
#[must_use = "a lookup may find nothing; check the outcome"]
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    /// The record exists and its key matched the request
    Found(T),
    /// No record at that key
    NotFound,
}

impl<T> Outcome<T> {
    /// Whether a record was found
    pub fn is_found(&self) -> bool {
        matches!(self, Outcome::Found(_))
    }

    /// Convert into an `Option`
    pub fn into_option(self) -> Option<T> {
        match self {
            Outcome::Found(value) => Some(value),
            Outcome::NotFound => None,
        }
    }
}

impl<T> From<Option<T>> for Outcome<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Outcome::NotFound, Outcome::Found)
    }
}

/// Result of a conditional write
///
/// `PreconditionFailed` means another writer won the race (or the record is
/// not in the expected state). It is an expected result, not an error:
/// re-read and retry, or give up.
#[must_use = "a conditional write may not have been applied"]
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome<T = ()> {
    /// The write was applied; carries whatever the backend returned
    Applied(T),
    /// The precondition did not hold; nothing was written
    PreconditionFailed,
}

impl<T> WriteOutcome<T> {
    /// Whether the write was applied
    pub fn is_applied(&self) -> bool {
        matches!(self, WriteOutcome::Applied(_))
    }

    /// The returned value, if the write was applied
    pub fn applied(self) -> Option<T> {
        match self {
            WriteOutcome::Applied(value) => Some(value),
            WriteOutcome::PreconditionFailed => None,
        }
    }

    /// Map the applied value
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> WriteOutcome<U> {
        match self {
            WriteOutcome::Applied(value) => WriteOutcome::Applied(f(value)),
            WriteOutcome::PreconditionFailed => WriteOutcome::PreconditionFailed,
        }
    }
}

/// Whether a chunked operation covered its whole input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Every chunk was submitted and fully processed
    Complete,
    /// The backend declined part of a chunk; the remainder must be resubmitted
    PartiallyProcessed,
}

/// Output of a chunked batch or transactional operation
///
/// `R` is the per-item result, `I` the input item type, used to hand back
/// whatever still has to be submitted.
#[must_use = "batch results may be partial; check `unprocessed`"]
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutput<R, I = R> {
    /// Results accumulated across chunks, in chunk order
    pub items: Vec<R>,
    /// Number of results produced: entities found for reads, items
    /// applied for writes
    pub processed: usize,
    /// Number of chunks submitted and answered
    pub chunks: usize,
    /// Inputs the backend declined, followed by inputs never submitted
    pub unprocessed: Vec<I>,
}

impl<R, I> Default for BatchOutput<R, I> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            processed: 0,
            chunks: 0,
            unprocessed: Vec::new(),
        }
    }
}

impl<R, I> BatchOutput<R, I> {
    /// Whether the whole input was processed
    pub fn outcome(&self) -> BatchOutcome {
        if self.unprocessed.is_empty() {
            BatchOutcome::Complete
        } else {
            BatchOutcome::PartiallyProcessed
        }
    }

    /// Shorthand for `outcome() == BatchOutcome::Complete`
    pub fn is_complete(&self) -> bool {
        self.outcome() == BatchOutcome::Complete
    }
}

/// How a transactional write ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactOutcome {
    /// Every chunk committed
    Committed,
    /// A chunk was cancelled because a precondition did not hold
    PreconditionFailed {
        /// Index of the cancelled chunk
        chunk: usize,
        /// Input positions of the items whose condition failed
        failed_items: Vec<usize>,
    },
}

/// Output of [`Table::transact_write`](crate::table::Table::transact_write)
#[must_use = "a transaction may have been cancelled by a precondition"]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactWriteOutput {
    /// Items committed by chunks before the end of the run
    pub committed: usize,
    /// Final state of the run
    pub outcome: TransactOutcome,
}

/// Which attributes a write returns
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReturnValues {
    /// Nothing
    #[default]
    None,
    /// The whole item as it was before the write
    AllOld,
    /// The updated attributes as they were before the write
    UpdatedOld,
    /// The whole item after the write
    AllNew,
    /// The updated attributes after the write
    UpdatedNew,
}

/// Options for a single-item read
#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    /// Strongly consistent read; bypasses the cache tier
    pub consistent_read: bool,
    /// Attribute paths to return; key attributes are always added
    pub projection: Option<Vec<String>>,
}

/// Options for a put
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    /// Condition the stored item must satisfy for the put to apply
    pub precondition: Option<Precondition>,
    /// Return the overwritten item
    pub return_old: bool,
}

impl PutOptions {
    /// Options with only a precondition set
    pub fn precondition(precondition: Precondition) -> Self {
        Self {
            precondition: Some(precondition),
            return_old: false,
        }
    }
}

/// Options for a delete
#[derive(Debug, Clone, Default)]
pub struct DeleteOptions {
    /// Condition the stored item must satisfy for the delete to apply
    pub precondition: Option<Precondition>,
    /// Return the deleted item
    pub return_old: bool,
}

/// Options for an update
#[derive(Debug, Clone)]
pub struct UpdateOptions {
    /// Condition the stored item must satisfy for the update to apply
    pub precondition: Option<Precondition>,
    /// Attributes to return, `UpdatedNew` by default
    pub return_values: ReturnValues,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            precondition: None,
            return_values: ReturnValues::UpdatedNew,
        }
    }
}

/// Options for a partition query
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Inclusive range condition applied after the key condition
    pub filter: Option<RangeFilter>,
    /// Attribute paths to return; key attributes are always added
    pub projection: Option<Vec<String>>,
    /// Strongly consistent read
    pub consistent_read: bool,
    /// Ascending sort key order (backend default)
    pub scan_forward: bool,
    /// Items evaluated per backend page
    pub page_size: Option<u32>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            filter: None,
            projection: None,
            consistent_read: false,
            scan_forward: true,
            page_size: None,
        }
    }
}

/// Options for a table scan
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Attribute paths to return; key attributes are always added
    pub projection: Option<Vec<String>>,
    /// Strongly consistent read
    pub consistent_read: bool,
    /// Items evaluated per backend page
    pub page_size: Option<u32>,
}

/// Options for chunked operations
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchOptions {
    /// No chunk is submitted after this instant and the chunk in flight
    /// is cancelled when it passes
    pub deadline: Option<Instant>,
    /// Strongly consistent reads (batch get only)
    pub consistent_read: bool,
}

impl BatchOptions {
    /// Options with a deadline
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            consistent_read: false,
        }
    }
}
