//! Reuse pool for decoded change events
//!
//! Decoding happens once per WAL message, so events are recycled instead of
//! allocated fresh: [`RecordPool::checkout`] hands out an empty event and
//! [`RecordPool::release`] resets it and puts it back on a bounded free
//! list. When the free list is full the event is simply dropped.
//!
//! The pool is `Send + Sync`; in practice only the consumption loop touches it.

use crate::common::ChangeEvent;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicU64, Ordering};

/// Default number of idle events kept on the free list.
pub const DEFAULT_POOL_CAPACITY: usize = 1024;

/// Record pool statistics
#[derive(Debug, Default)]
pub struct PoolStats {
    /// Total checkouts
    pub checkouts: AtomicU64,
    /// Total releases
    pub releases: AtomicU64,
    /// Checkouts served by a fresh allocation
    pub misses: AtomicU64,
    /// Releases dropped because the free list was full
    pub discarded: AtomicU64,
}

impl PoolStats {
    /// Events currently checked out and not yet released.
    pub fn in_use(&self) -> u64 {
        let out = self.checkouts.load(Ordering::Relaxed);
        let back = self.releases.load(Ordering::Relaxed);
        out.saturating_sub(back)
    }

    /// Get hit rate (0.0 - 1.0)
    pub fn hit_rate(&self) -> f64 {
        let checkouts = self.checkouts.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        if checkouts == 0 {
            1.0
        } else {
            1.0 - (misses as f64 / checkouts as f64)
        }
    }
}

/// Bounded free list of [`ChangeEvent`]s.
pub struct RecordPool {
    free: (Sender<ChangeEvent>, Receiver<ChangeEvent>),
    stats: PoolStats,
}

impl RecordPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            free: bounded(capacity.max(1)),
            stats: PoolStats::default(),
        }
    }

    /// Take an empty event, reusing an idle one when available.
    pub fn checkout(&self) -> ChangeEvent {
        self.stats.checkouts.fetch_add(1, Ordering::Relaxed);
        match self.free.1.try_recv() {
            Ok(event) => event,
            Err(_) => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                ChangeEvent::default()
            }
        }
    }

    /// Reset an event and return it to the free list.
    pub fn release(&self, mut event: ChangeEvent) {
        self.stats.releases.fetch_add(1, Ordering::Relaxed);
        event.reset();
        if self.free.0.try_send(event).is_err() {
            self.stats.discarded.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Release every event in `events`, leaving it empty.
    pub fn release_all(&self, events: &mut Vec<ChangeEvent>) {
        for event in events.drain(..) {
            self.release(event);
        }
    }

    /// Number of idle events on the free list.
    pub fn available(&self) -> usize {
        self.free.1.len()
    }

    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }
}

impl Default for RecordPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY)
    }
}

impl std::fmt::Debug for RecordPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordPool")
            .field("available", &self.available())
            .field("stats", &self.stats)
            .finish()
    }
}
