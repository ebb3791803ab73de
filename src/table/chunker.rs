//! Sequential chunked submission of large inputs.

use std::future::Future;
use tokio::time::{Instant, timeout_at};

use crate::error::{BatchError, Error};
use crate::table::types::BatchOutput;

/// What one chunk submission produced
#[derive(Debug)]
pub struct Chunk<R, I> {
    /// Results the backend returned for the chunk
    pub results: Vec<R>,
    /// Chunk inputs the backend declined to process
    pub unprocessed: Vec<I>,
}

impl<R, I> Chunk<R, I> {
    /// A fully processed chunk
    pub fn complete(results: Vec<R>) -> Self {
        Self {
            results,
            unprocessed: Vec::new(),
        }
    }

    /// A chunk the backend only partly processed
    pub fn partial(results: Vec<R>, unprocessed: Vec<I>) -> Self {
        Self {
            results,
            unprocessed,
        }
    }
}

/// Splits inputs into bounded chunks and submits them one after another
///
/// Chunk `n + 1` is only submitted once chunk `n` has been answered. A chunk
/// error, a partially processed chunk or a passed deadline stops the run;
/// effects of chunks already answered stay committed. Unprocessed items are
/// never resubmitted automatically.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
    deadline: Option<Instant>,
}

impl Chunker {
    /// Chunker with the given maximum chunk size (at least 1)
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            deadline: None,
        }
    }

    /// Stop submitting chunks once `deadline` passes
    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Maximum chunk size
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Run `operation` once per chunk of `items`, in order
    ///
    /// The operation receives the chunk index and the chunk. On a
    /// partially processed chunk the output's `unprocessed` holds the
    /// declined items followed by every item never submitted. On error the
    /// partial output's `unprocessed` holds the failing chunk and every
    /// item after it.
    pub async fn run<'a, I, R, F, Fut>(
        &self,
        items: &'a [I],
        mut operation: F,
    ) -> Result<BatchOutput<R, I>, BatchError<R, I>>
    where
        I: Clone,
        F: FnMut(usize, &'a [I]) -> Fut,
        Fut: Future<Output = Result<Chunk<R, I>, Error>>,
    {
        let mut output = BatchOutput::default();

        for (index, chunk) in items.chunks(self.chunk_size).enumerate() {
            let offset = index * self.chunk_size;

            let answer = match self.deadline {
                Some(deadline) if Instant::now() >= deadline => Err(Error::DeadlineExceeded),
                Some(deadline) => timeout_at(deadline, operation(index, chunk))
                    .await
                    .unwrap_or(Err(Error::DeadlineExceeded)),
                None => operation(index, chunk).await,
            };

            let answer = match answer {
                Ok(answer) => answer,
                Err(source) => {
                    tracing::debug!(
                        chunk = index,
                        processed = output.processed,
                        error = %source,
                        "chunked operation stopped"
                    );
                    output.unprocessed = items[offset..].to_vec();
                    return Err(BatchError {
                        partial: output,
                        source,
                    });
                }
            };

            output.chunks += 1;
            output.processed += answer.results.len();
            output.items.extend(answer.results);

            tracing::debug!(
                chunk = index,
                size = chunk.len(),
                unprocessed = answer.unprocessed.len(),
                processed = output.processed,
                "chunk answered"
            );

            if !answer.unprocessed.is_empty() {
                output.unprocessed = answer.unprocessed;
                output
                    .unprocessed
                    .extend_from_slice(&items[offset + chunk.len()..]);
                break;
            }
        }

        Ok(output)
    }
}
