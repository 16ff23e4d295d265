//! WAL position tracking
//!
//! Three offsets are shared between the consumption loop and the heartbeat
//! task:
//!
//! | offset         | advanced by                         | reported as        |
//! |----------------|-------------------------------------|--------------------|
//! | `received`     | keepalives and data messages        | write position     |
//! | `acknowledged` | a completed batch flush             | flush and apply    |
//! | `max_in_batch` | every event appended to the batch   | (scratch)          |
//!
//! Each cell is an independent atomic and only moves forward; there is no
//! cross-field atomicity. `max_in_batch == 0` means the batch is empty.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Offsets reported in one standby status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusPositions {
    pub received: u64,
    pub flushed: u64,
    pub applied: u64,
}

impl fmt::Display for StatusPositions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "received={} flushed={} applied={}",
            format_lsn(self.received),
            format_lsn(self.flushed),
            format_lsn(self.applied)
        )
    }
}

#[derive(Debug, Default)]
pub struct PositionTracker {
    received: AtomicU64,
    acknowledged: AtomicU64,
    max_in_batch: AtomicU64,
}

impl PositionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance `received` if `lsn` is strictly greater. Returns true if it moved.
    pub fn observe_received(&self, lsn: u64) -> bool {
        self.received.fetch_max(lsn, Ordering::AcqRel) < lsn
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Acquire)
    }

    /// Advance `acknowledged` to `lsn`. `received` is raised with it so it
    /// never falls behind.
    pub fn acknowledge(&self, lsn: u64) {
        self.received.fetch_max(lsn, Ordering::AcqRel);
        self.acknowledged.fetch_max(lsn, Ordering::AcqRel);
    }

    pub fn acknowledged(&self) -> u64 {
        self.acknowledged.load(Ordering::Acquire)
    }

    /// Record the position of an event appended to the in-flight batch.
    pub fn track(&self, lsn: u64) {
        self.max_in_batch.fetch_max(lsn, Ordering::AcqRel);
    }

    /// Highest position in the in-flight batch, if any.
    pub fn max_in_batch(&self) -> Option<u64> {
        match self.max_in_batch.load(Ordering::Acquire) {
            0 => None,
            lsn => Some(lsn),
        }
    }

    /// Take the batch high-water mark, leaving it empty.
    pub fn take_batch_max(&self) -> Option<u64> {
        match self.max_in_batch.swap(0, Ordering::AcqRel) {
            0 => None,
            lsn => Some(lsn),
        }
    }

    /// Positions for the next status reply. Flush and apply are always the
    /// acknowledged position.
    pub fn status(&self) -> StatusPositions {
        let acknowledged = self.acknowledged();
        StatusPositions {
            received: self.received(),
            flushed: acknowledged,
            applied: acknowledged,
        }
    }
}

/// Format a WAL position as `XXXXXXXX/XXXXXXXX`.
pub fn format_lsn(lsn: u64) -> String {
    format!("{:X}/{:X}", lsn >> 32, lsn & 0xFFFF_FFFF)
}

/// Parse a `high/low` hex WAL position.
pub fn parse_lsn(lsn: &str) -> Option<u64> {
    let (high, low) = lsn.split_once('/')?;
    let high = u64::from_str_radix(high, 16).ok()?;
    let low = u64::from_str_radix(low, 16).ok()?;
    if high > u32::MAX as u64 || low > u32::MAX as u64 {
        return None;
    }
    Some((high << 32) | low)
}
