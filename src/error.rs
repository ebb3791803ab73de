use std::error::Error as StdError;
use std::fmt;

use crate::table::BatchOutput;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Machine-readable classification of a backend failure
///
/// Every backend maps its native errors onto these kinds so callers can
/// branch on the kind instead of on error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// A condition attached to the write evaluated to false
    PreconditionFailed,
    /// Throughput or request-rate limits were exceeded
    Throttled,
    /// A concurrent transaction touched the same item
    Conflict,
    /// The table does not exist
    TableNotFound,
    /// The backend rejected the request shape
    Validation,
    /// The request never got a well-formed answer (I/O, timeout, 5xx)
    Transport,
    /// Anything the backend did not classify
    Unknown,
}

impl FailureKind {
    /// Stable name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::PreconditionFailed => "precondition_failed",
            FailureKind::Throttled => "throttled",
            FailureKind::Conflict => "conflict",
            FailureKind::TableNotFound => "table_not_found",
            FailureKind::Validation => "validation",
            FailureKind::Transport => "transport",
            FailureKind::Unknown => "unknown",
        }
    }

    /// Whether resubmitting the same request later can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureKind::Throttled | FailureKind::Conflict | FailureKind::Transport
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured failure returned by a [`Backend`](crate::backend::Backend)
#[derive(Debug, thiserror::Error)]
#[error("{operation} on table `{table}` failed ({kind}): {message}")]
pub struct BackendError {
    /// Failure classification
    pub kind: FailureKind,
    /// Name of the backend operation, e.g. `PutItem`
    pub operation: &'static str,
    /// Table the request targeted
    pub table: String,
    /// Human-readable detail, for logs only
    pub message: String,
    /// Positions (within the request) of transactional items whose
    /// condition failed
    pub failed_items: Vec<usize>,
    #[source]
    source: Option<BoxError>,
}

impl BackendError {
    /// Create a new backend error
    pub fn new(
        kind: FailureKind,
        operation: &'static str,
        table: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            operation,
            table: table.into(),
            message: message.into(),
            failed_items: Vec::new(),
            source: None,
        }
    }

    /// Attach the native error that caused this failure
    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Record which transactional items failed their condition
    pub fn with_failed_items(mut self, failed_items: Vec<usize>) -> Self {
        self.failed_items = failed_items;
        self
    }
}

/// Table operation error
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An entity or value could not be converted to attribute values
    #[error("failed to encode item: {0}")]
    Encoding(#[source] serde_dynamo::Error),
    /// A non-empty payload could not be converted back into an entity
    #[error("failed to decode item: {0}")]
    Decoding(#[source] serde_dynamo::Error),
    /// A key was missing components required by the table
    #[error("invalid key: {0}")]
    InvalidKey(String),
    /// A condition, update or filter could not be expressed
    #[error("invalid expression: {0}")]
    Expression(String),
    /// The table configuration is unusable
    #[error("invalid table configuration: {0}")]
    Config(String),
    /// The caller's deadline passed before the operation finished
    #[error("deadline exceeded")]
    DeadlineExceeded,
    /// The backend reported a failure
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl Error {
    /// Failure kind reported by the backend, if the error came from one
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            Error::Backend(e) => Some(e.kind),
            _ => None,
        }
    }

    /// Check if a write was rejected because its precondition did not hold
    ///
    /// Table operations already turn this into
    /// [`WriteOutcome::PreconditionFailed`](crate::table::WriteOutcome); it
    /// only surfaces as an error from raw [`Backend`](crate::backend::Backend)
    /// calls.
    pub fn is_precondition_failed(&self) -> bool {
        self.kind() == Some(FailureKind::PreconditionFailed)
    }

    /// Check if resubmitting the request later may succeed
    pub fn is_retryable(&self) -> bool {
        self.kind().is_some_and(|kind| kind.is_retryable())
    }

    /// Check if the error is a serialization/deserialization error
    pub fn is_serialization_error(&self) -> bool {
        matches!(self, Error::Encoding(_) | Error::Decoding(_))
    }
}

/// A chunked operation that stopped at a failing chunk
///
/// `partial` holds everything the chunks before the failure produced; those
/// effects are committed and are not rolled back.
#[derive(thiserror::Error)]
#[error(
    "chunked operation stopped after {} processed items in {} chunks: {}",
    .partial.processed,
    .partial.chunks,
    .source
)]
pub struct BatchError<R, I = R> {
    /// Output accumulated before the failure
    pub partial: BatchOutput<R, I>,
    /// Cause of the failure
    #[source]
    pub source: Error,
}

impl<R, I> BatchError<R, I> {
    /// Discard the partial output, keeping only the cause
    pub fn into_source(self) -> Error {
        self.source
    }
}

impl<R, I> fmt::Debug for BatchError<R, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchError")
            .field("processed", &self.partial.processed)
            .field("chunks", &self.partial.chunks)
            .field("source", &self.source)
            .finish()
    }
}

impl<R, I> From<BatchError<R, I>> for Error {
    fn from(e: BatchError<R, I>) -> Self {
        e.source
    }
}
