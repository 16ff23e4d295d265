//! # Batch Accumulation
//!
//! Groups decoded change events into transaction-aligned batches.
//!
//! - `BEGIN` and unknown events are ignored.
//! - `COMMIT` requests a flush but is never appended.
//! - `INSERT`, `UPDATE` and `DELETE` are appended; once the batch holds more
//!   than `max_events` a flush is requested even without a commit.
//!
//! A flush hands the batch to every registered [`BatchHandler`] in order,
//! waits for each to finish, then acknowledges the highest position in the
//! batch and recycles the events. An empty batch never reaches a handler.
//!
//! ```ignore
//! let mut batcher = BatchAccumulator::new(20_000, handlers, positions, pool);
//! for event in decoded {
//!     batcher.ingest(event).await;
//! }
//! ```

use crate::common::{BatchHandler, ChangeEvent, Operation, PositionTracker, RecordPool};
use std::sync::Arc;
use tracing::debug;

/// Default flush threshold.
pub const DEFAULT_BATCH_SIZE: usize = 20_000;

/// What a flush did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushOutcome {
    /// Events handed to the handlers
    pub events: usize,
    /// Position acknowledged afterwards, if any event carried one
    pub acknowledged: Option<u64>,
}

/// Owns the in-flight batch. Only the consumption loop touches it.
pub struct BatchAccumulator {
    batch: Vec<ChangeEvent>,
    max_events: usize,
    handlers: Arc<[Arc<dyn BatchHandler>]>,
    positions: Arc<PositionTracker>,
    pool: Arc<RecordPool>,
    flushes: u64,
}

impl BatchAccumulator {
    pub fn new(
        max_events: usize,
        handlers: Arc<[Arc<dyn BatchHandler>]>,
        positions: Arc<PositionTracker>,
        pool: Arc<RecordPool>,
    ) -> Self {
        Self {
            batch: Vec::new(),
            max_events: max_events.max(1),
            handlers,
            positions,
            pool,
            flushes: 0,
        }
    }

    /// Ingest one decoded event, flushing if it completes a batch.
    pub async fn ingest(&mut self, event: ChangeEvent) -> Option<FlushOutcome> {
        let should_flush = match event.operation {
            Operation::Begin | Operation::Unknown => {
                self.pool.release(event);
                false
            }
            Operation::Commit => {
                self.pool.release(event);
                true
            }
            Operation::Insert | Operation::Update | Operation::Delete => {
                self.positions.track(event.position);
                self.batch.push(event);
                self.batch.len() > self.max_events
            }
        };

        if should_flush {
            self.flush().await
        } else {
            None
        }
    }

    /// Deliver the in-flight batch. No-op when empty.
    pub async fn flush(&mut self) -> Option<FlushOutcome> {
        if self.batch.is_empty() {
            return None;
        }

        for handler in self.handlers.iter() {
            handler.handle(&self.batch).await;
        }

        let acknowledged = self.positions.take_batch_max();
        if let Some(lsn) = acknowledged {
            self.positions.acknowledge(lsn);
        }

        let events = self.batch.len();
        self.pool.release_all(&mut self.batch);
        self.flushes += 1;

        debug!(
            events,
            acknowledged = ?acknowledged.map(crate::common::format_lsn),
            "Flushed batch"
        );

        Some(FlushOutcome {
            events,
            acknowledged,
        })
    }

    /// Drop the in-flight batch without delivering it.
    ///
    /// Used after a reconnect: the server replays everything past the last
    /// acknowledged position.
    pub fn discard(&mut self) -> usize {
        let dropped = self.batch.len();
        self.pool.release_all(&mut self.batch);
        self.positions.take_batch_max();
        dropped
    }

    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    /// Number of completed flushes.
    pub fn flushes(&self) -> u64 {
        self.flushes
    }
}

impl std::fmt::Debug for BatchAccumulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchAccumulator")
            .field("pending", &self.batch.len())
            .field("max_events", &self.max_events)
            .field("handlers", &self.handlers.len())
            .field("flushes", &self.flushes)
            .finish()
    }
}
