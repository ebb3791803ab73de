//! # DynamoDB Table Gateway
//!
//! Typed, batched access to a DynamoDB table through interchangeable
//! backends:
//! - Point reads and writes with preconditions (`put_if_absent`, CAS updates)
//! - Partition queries, range scans and server-side counts over every page
//! - Batch and transactional reads and writes, split into bounded chunks
//! - A direct backend, a caching tier in front of it, and an in-memory
//!   store for tests
//!
//! ## Features
//!
//! - **Type-safe**: entities are plain `serde` types, keys are associated types
//! - **Async-first**: built on `tokio` and `aws-sdk-dynamodb`
//! - **Honest batches**: partial progress is reported, never silently retried
//! - **Expected races are values**: a failed precondition is an outcome, not an error
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dynamo_gateway::{DirectTable, Entity, Error, Outcome, TableConfig};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct User {
//!     user_id: String,
//!     email: String,
//!     name: String,
//! }
//!
//! impl Entity for User {
//!     type PK = String;
//!     type SK = String;
//!
//!     const PARTITION_KEY: &'static str = "user_id";
//!
//!     fn partition_key(&self) -> Self::PK {
//!         self.user_id.clone()
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let table: DirectTable<User> = DirectTable::connect(TableConfig::new("users")).await?;
//!
//!     let user = User {
//!         user_id: "123".to_string(),
//!         email: "user@example.com".to_string(),
//!         name: "John Doe".to_string(),
//!     };
//!     if table.put_if_absent(&user).await?.is_applied() {
//!         println!("created");
//!     }
//!
//!     if let Outcome::Found(user) = table.get(&"123".to_string(), None).await? {
//!         println!("{}", user.name);
//!     }
//!
//!     Ok(())
//! }
//! ```
#![deny(
    bad_style,
    improper_ctypes,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    overflowing_literals,
    path_statements,
    patterns_in_fns_without_body,
    unconditional_recursion,
    unused_allocation,
    unused_comparisons,
    unused_parens,
    while_true,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unknown_lints,
    unused_mut
)]
#![warn(
    dead_code,
    deprecated,
    missing_debug_implementations,
    missing_docs,
    unreachable_code,
    unreachable_pub,
    unused,
    unused_qualifications,
    unused_results
)]

mod error;
pub use error::{BackendError, BatchError, Error, FailureKind};

/// Transport boundary and backend implementations
pub mod backend;

/// Table and client configuration
pub mod config;

/// Key-set helpers over entities
pub mod methods;

/// Typed table gateway
pub mod table;

// Re-export main types for convenience
pub use backend::{Backend, CachedBackend, DynamoDbBackend, KeySchema, MemoryBackend};
pub use config::{CacheConfig, TableConfig};
pub use methods::EntityMethods;
pub use table::{
    BatchOptions, BatchOutcome, BatchOutput, CachedTable, CompositeKey, DeleteOptions,
    DirectTable, Entity, GetOptions, Outcome, Precondition, PutOptions, QueryOptions,
    RangeFilter, ReturnValues, ScanOptions, Table, TransactOutcome, TransactWrite,
    TransactWriteOutput, Update, UpdateOptions, WriteOutcome,
};

// Re-export SDK types that appear in the public API
pub use aws_config::{BehaviorVersion, Region, SdkConfig};
pub use aws_sdk_dynamodb::types::AttributeValue;

