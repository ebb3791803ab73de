use std::collections::HashSet;

use crate::backend::{
    Backend, BatchGetRequest, BatchWrite, BatchWriteRequest, KeySchema, TransactGet,
    TransactWriteOp, canonical_key,
};
use crate::error::{BatchError, Error, FailureKind};
use crate::table::chunker::{Chunk, Chunker};
use crate::table::codec::{composite_key_item, key_projection, marshal};
use crate::table::conditions::{Precondition, Update};
use crate::table::entity::Entity;
use crate::table::operations::Table;
use crate::table::reconcile::{reconcile_batch, reconcile_transact, typed_keys};
use crate::table::types::{
    BatchOptions, BatchOutput, CompositeKey, Item, TransactOutcome, TransactWriteOutput,
};

/// One write of a transaction against a table of `T`
#[derive(Debug, Clone)]
pub enum TransactWrite<T: Entity> {
    /// Store the entity
    Put {
        /// Entity to store
        entity: T,
        /// Condition the stored item must satisfy
        precondition: Option<Precondition>,
    },
    /// Change attributes of the item at `key`
    Update {
        /// Target key
        key: CompositeKey<T::PK, T::SK>,
        /// Changes to apply
        update: Update,
        /// Condition the stored item must satisfy
        precondition: Option<Precondition>,
    },
    /// Remove the item at `key`
    Delete {
        /// Target key
        key: CompositeKey<T::PK, T::SK>,
        /// Condition the stored item must satisfy
        precondition: Option<Precondition>,
    },
    /// Only check that the item at `key` satisfies `precondition`
    ConditionCheck {
        /// Target key
        key: CompositeKey<T::PK, T::SK>,
        /// Condition the stored item must satisfy
        precondition: Precondition,
    },
}

impl<T: Entity> TransactWrite<T> {
    /// Unconditional put
    pub fn put(entity: T) -> Self {
        TransactWrite::Put {
            entity,
            precondition: None,
        }
    }

    /// Unconditional update
    pub fn update(key: CompositeKey<T::PK, T::SK>, update: Update) -> Self {
        TransactWrite::Update {
            key,
            update,
            precondition: None,
        }
    }

    /// Unconditional delete
    pub fn delete(key: CompositeKey<T::PK, T::SK>) -> Self {
        TransactWrite::Delete {
            key,
            precondition: None,
        }
    }

    /// Check without writing
    pub fn condition_check(key: CompositeKey<T::PK, T::SK>, precondition: Precondition) -> Self {
        TransactWrite::ConditionCheck { key, precondition }
    }

    /// Attach a precondition, replacing any previous one
    pub fn with_precondition(self, precondition: Precondition) -> Self {
        match self {
            TransactWrite::Put { entity, .. } => TransactWrite::Put {
                entity,
                precondition: Some(precondition),
            },
            TransactWrite::Update { key, update, .. } => TransactWrite::Update {
                key,
                update,
                precondition: Some(precondition),
            },
            TransactWrite::Delete { key, .. } => TransactWrite::Delete {
                key,
                precondition: Some(precondition),
            },
            TransactWrite::ConditionCheck { key, .. } => {
                TransactWrite::ConditionCheck { key, precondition }
            }
        }
    }

    fn encode(&self, table: &str) -> Result<TransactWriteOp, Error> {
        let table = table.to_string();
        let op = match self {
            TransactWrite::Put {
                entity,
                precondition,
            } => {
                let item = marshal(entity)?;
                let _ = key_projection::<T>(&item)?;
                TransactWriteOp::Put {
                    table,
                    item,
                    precondition: precondition.clone(),
                }
            }
            TransactWrite::Update {
                key,
                update,
                precondition,
            } => {
                update.validate::<T>()?;
                TransactWriteOp::Update {
                    table,
                    key: composite_key_item::<T>(key)?,
                    update: update.clone(),
                    precondition: precondition.clone(),
                }
            }
            TransactWrite::Delete { key, precondition } => TransactWriteOp::Delete {
                table,
                key: composite_key_item::<T>(key)?,
                precondition: precondition.clone(),
            },
            TransactWrite::ConditionCheck { key, precondition } => {
                TransactWriteOp::ConditionCheck {
                    table,
                    key: composite_key_item::<T>(key)?,
                    precondition: precondition.clone(),
                }
            }
        };
        Ok(op)
    }
}

/// Encode every input before the first chunk goes out
fn encode_all<R, I: Clone, E>(
    inputs: &[I],
    encode: impl FnMut(&I) -> Result<E, Error>,
) -> Result<Vec<E>, BatchError<R, I>> {
    inputs
        .iter()
        .map(encode)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| BatchError {
            partial: BatchOutput {
                unprocessed: inputs.to_vec(),
                ..BatchOutput::default()
            },
            source,
        })
}

impl<T: Entity, B: Backend> Table<T, B> {
    /// Read many items by key
    ///
    /// Keys are submitted in chunks of `read_chunk_size`. Missing keys are
    /// simply absent from the output; result order is unspecified.
    pub async fn batch_get(
        &self,
        keys: &[CompositeKey<T::PK, T::SK>],
    ) -> Result<BatchOutput<T, CompositeKey<T::PK, T::SK>>, BatchError<T, CompositeKey<T::PK, T::SK>>>
    {
        self.batch_get_with(keys, BatchOptions::default()).await
    }

    /// Batch read with a deadline or strongly consistent reads
    pub async fn batch_get_with(
        &self,
        keys: &[CompositeKey<T::PK, T::SK>],
        options: BatchOptions,
    ) -> Result<BatchOutput<T, CompositeKey<T::PK, T::SK>>, BatchError<T, CompositeKey<T::PK, T::SK>>>
    {
        let encoded: Vec<Item> = encode_all::<T, _, _>(keys, composite_key_item::<T>)?;
        let chunker = Chunker::new(self.config().read_chunk_size).with_deadline(options.deadline);
        let size = chunker.chunk_size();
        let backend = self.backend();
        let table = self.name();

        chunker
            .run(keys, |index, chunk| {
                let offset = index * size;
                let requested = encoded[offset..offset + chunk.len()].to_vec();
                let request = BatchGetRequest {
                    table: table.to_string(),
                    keys: requested.clone(),
                    consistent_read: options.consistent_read,
                    projection: None,
                };

                async move {
                    let response = backend.batch_get(request).await?;
                    let entities = reconcile_batch::<T>(table, &requested, response.items)?;
                    let unprocessed = typed_keys::<T>(&response.unprocessed_keys)?;
                    Ok::<_, Error>(Chunk::partial(entities, unprocessed))
                }
            })
            .await
    }

    /// Put many entities
    ///
    /// Not atomic: each chunk of `write_chunk_size` stands on its own. The
    /// output lists the written entities; entities the backend declined are
    /// returned in `unprocessed` for the caller to resubmit.
    pub async fn batch_write(&self, entities: &[T]) -> Result<BatchOutput<T>, BatchError<T>>
    where
        T: Clone,
    {
        self.batch_write_with(entities, BatchOptions::default())
            .await
    }

    /// Batch put with a deadline
    pub async fn batch_write_with(
        &self,
        entities: &[T],
        options: BatchOptions,
    ) -> Result<BatchOutput<T>, BatchError<T>>
    where
        T: Clone,
    {
        let writes = encode_all::<T, _, _>(entities, |entity| {
            let item = marshal(entity)?;
            let key = key_projection::<T>(&item)?;
            Ok((BatchWrite::Put(item), canonical_key(&key)))
        })?;
        self.write_chunks(entities, writes, options).await
    }

    /// Delete many items by key; deleting a missing item succeeds
    pub async fn batch_delete(
        &self,
        keys: &[CompositeKey<T::PK, T::SK>],
    ) -> Result<BatchOutput<CompositeKey<T::PK, T::SK>>, BatchError<CompositeKey<T::PK, T::SK>>>
    {
        self.batch_delete_with(keys, BatchOptions::default()).await
    }

    /// Batch delete with a deadline
    pub async fn batch_delete_with(
        &self,
        keys: &[CompositeKey<T::PK, T::SK>],
        options: BatchOptions,
    ) -> Result<BatchOutput<CompositeKey<T::PK, T::SK>>, BatchError<CompositeKey<T::PK, T::SK>>>
    {
        let writes = encode_all::<CompositeKey<T::PK, T::SK>, _, _>(keys, |key| {
            let key = composite_key_item::<T>(key)?;
            let canonical = canonical_key(&key);
            Ok((BatchWrite::Delete(key), canonical))
        })?;
        self.write_chunks(keys, writes, options).await
    }

    /// Submit pre-encoded writes, splitting each chunk's inputs into
    /// written and declined by key
    async fn write_chunks<I: Clone>(
        &self,
        inputs: &[I],
        writes: Vec<(BatchWrite, String)>,
        options: BatchOptions,
    ) -> Result<BatchOutput<I>, BatchError<I>> {
        let chunker = Chunker::new(self.config().write_chunk_size).with_deadline(options.deadline);
        let size = chunker.chunk_size();
        let schema = KeySchema::of::<T>();
        let backend = self.backend();
        let table = self.name();
        let writes = &writes;
        let schema = &schema;

        chunker
            .run(inputs, |index, chunk| {
                let offset = index * size;
                let encoded = &writes[offset..offset + chunk.len()];
                let request = BatchWriteRequest {
                    table: table.to_string(),
                    writes: encoded.iter().map(|(write, _)| write.clone()).collect(),
                };

                async move {
                    let response = backend.batch_write(request).await?;
                    let declined: HashSet<String> = response
                        .unprocessed
                        .iter()
                        .filter_map(|write| schema.key_of(write.item()))
                        .map(|key| canonical_key(&key))
                        .collect();

                    let mut written = Vec::with_capacity(chunk.len());
                    let mut unprocessed = Vec::with_capacity(declined.len());
                    for (input, (_, key)) in chunk.iter().zip(encoded) {
                        if declined.contains(key) {
                            unprocessed.push(input.clone());
                        } else {
                            written.push(input.clone());
                        }
                    }
                    Ok::<_, Error>(Chunk::partial(written, unprocessed))
                }
            })
            .await
    }

    /// Read many items, each chunk as one atomic snapshot
    ///
    /// Atomicity holds per chunk of `read_chunk_size` only.
    pub async fn transact_get(
        &self,
        keys: &[CompositeKey<T::PK, T::SK>],
    ) -> Result<BatchOutput<T, CompositeKey<T::PK, T::SK>>, BatchError<T, CompositeKey<T::PK, T::SK>>>
    {
        self.transact_get_with(keys, BatchOptions::default()).await
    }

    /// Transactional read with a deadline
    pub async fn transact_get_with(
        &self,
        keys: &[CompositeKey<T::PK, T::SK>],
        options: BatchOptions,
    ) -> Result<BatchOutput<T, CompositeKey<T::PK, T::SK>>, BatchError<T, CompositeKey<T::PK, T::SK>>>
    {
        let encoded: Vec<Item> = encode_all::<T, _, _>(keys, composite_key_item::<T>)?;
        let chunker = Chunker::new(self.config().read_chunk_size).with_deadline(options.deadline);
        let size = chunker.chunk_size();
        let backend = self.backend();
        let table = self.name();

        chunker
            .run(keys, |index, chunk| {
                let offset = index * size;
                let requested = encoded[offset..offset + chunk.len()].to_vec();
                let gets: Vec<TransactGet> = requested
                    .iter()
                    .map(|key| TransactGet {
                        table: table.to_string(),
                        key: key.clone(),
                        projection: None,
                    })
                    .collect();

                async move {
                    let responses = backend.transact_get(gets).await?;
                    let entities = reconcile_transact::<T>(table, &requested, responses)?;
                    Ok::<_, Error>(Chunk::complete(entities))
                }
            })
            .await
    }

    /// Apply writes atomically, chunk by chunk
    ///
    /// Each chunk of `write_chunk_size` commits or fails as a whole. A
    /// precondition that does not hold cancels its chunk and ends the run
    /// with [`TransactOutcome::PreconditionFailed`]; chunks committed
    /// before it stay committed and later chunks are never submitted.
    pub async fn transact_write(
        &self,
        writes: &[TransactWrite<T>],
    ) -> Result<TransactWriteOutput, BatchError<(), TransactWrite<T>>>
    where
        T: Clone,
    {
        self.transact_write_with(writes, BatchOptions::default())
            .await
    }

    /// Transactional write with a deadline
    pub async fn transact_write_with(
        &self,
        writes: &[TransactWrite<T>],
        options: BatchOptions,
    ) -> Result<TransactWriteOutput, BatchError<(), TransactWrite<T>>>
    where
        T: Clone,
    {
        let table = self.name();
        let encoded = encode_all::<(), _, _>(writes, |write| write.encode(table))?;
        let chunker = Chunker::new(self.config().write_chunk_size).with_deadline(options.deadline);
        let size = chunker.chunk_size();
        let backend = self.backend();

        let result = chunker
            .run(writes, |index, chunk| {
                let offset = index * size;
                let ops = encoded[offset..offset + chunk.len()].to_vec();

                async move {
                    let committed = ops.len();
                    backend.transact_write(ops).await?;
                    Ok::<_, Error>(Chunk::complete(vec![(); committed]))
                }
            })
            .await;

        match result {
            Ok(output) => Ok(TransactWriteOutput {
                committed: output.processed,
                outcome: TransactOutcome::Committed,
            }),
            Err(BatchError {
                partial,
                source: Error::Backend(err),
            }) if err.kind == FailureKind::PreconditionFailed => {
                let chunk = partial.chunks;
                let offset = chunk * size;
                tracing::debug!(
                    table,
                    chunk,
                    committed = partial.processed,
                    "transaction cancelled by precondition"
                );
                Ok(TransactWriteOutput {
                    committed: partial.processed,
                    outcome: TransactOutcome::PreconditionFailed {
                        chunk,
                        failed_items: err.failed_items.iter().map(|i| offset + i).collect(),
                    },
                })
            }
            Err(err) => Err(err),
        }
    }
}
