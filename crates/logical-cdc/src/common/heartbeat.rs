//! # Replication Heartbeat
//!
//! A background task that sends a standby status update on a fixed interval
//! whether or not data is flowing. Without it an idle slot never learns the
//! client's position and the server keeps WAL around indefinitely.
//!
//! Send failures are counted and logged; they never stop the task. The task
//! ends when its cancellation token fires.
//!
//! ```rust,ignore
//! let stats = Arc::new(HeartbeatStats::default());
//! let handle = spawn_heartbeat(reporter, Duration::from_secs(5), cancel.clone(), stats.clone());
//! ```

use crate::common::Result;
use std::future::Future;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default heartbeat interval.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Heartbeat statistics.
#[derive(Debug, Default)]
pub struct HeartbeatStats {
    /// Total heartbeats sent
    heartbeats_sent: AtomicU64,
    /// Heartbeats that failed to send
    heartbeats_failed: AtomicU64,
    /// Last successful heartbeat timestamp (epoch millis)
    last_heartbeat_ts: AtomicI64,
}

impl HeartbeatStats {
    /// Record a heartbeat.
    pub fn record_heartbeat(&self) {
        self.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
        self.last_heartbeat_ts
            .store(chrono::Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Record a failed heartbeat.
    pub fn record_failure(&self) {
        self.heartbeats_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get total heartbeats sent.
    pub fn heartbeats_sent(&self) -> u64 {
        self.heartbeats_sent.load(Ordering::Relaxed)
    }

    /// Get failed heartbeat count.
    pub fn heartbeats_failed(&self) -> u64 {
        self.heartbeats_failed.load(Ordering::Relaxed)
    }

    /// Get last heartbeat timestamp.
    pub fn last_heartbeat_ts(&self) -> i64 {
        self.last_heartbeat_ts.load(Ordering::Relaxed)
    }

    /// Healthy if a heartbeat went out within `max_age` (or none is due yet).
    pub fn is_healthy(&self, max_age: Duration) -> bool {
        let last = self.last_heartbeat_ts();
        if last == 0 {
            return true;
        }
        let age = chrono::Utc::now().timestamp_millis() - last;
        age <= max_age.as_millis() as i64
    }
}

/// Sends one heartbeat to the server.
pub trait HeartbeatCallback: Send + Sync {
    fn send_heartbeat(&self) -> impl Future<Output = Result<()>> + Send;
}

/// Spawn the periodic heartbeat task.
///
/// The first beat fires one full `interval` after spawning.
pub fn spawn_heartbeat<C>(
    callback: Arc<C>,
    interval: Duration,
    cancel: CancellationToken,
    stats: Arc<HeartbeatStats>,
) -> JoinHandle<()>
where
    C: HeartbeatCallback + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Heartbeat task stopped");
                    break;
                }
                _ = ticker.tick() => {
                    match callback.send_heartbeat().await {
                        Ok(()) => stats.record_heartbeat(),
                        Err(e) => {
                            stats.record_failure();
                            warn!(error = %e, "Heartbeat failed");
                        }
                    }
                }
            }
        }
    })
}
