//! Traits at the seams of the replication client
//!
//! - [`BatchHandler`]: the consuming application's callback
//! - [`ReplicationConnector`] / [`ReplicationSession`]: the replication
//!   transport. [`crate::postgres::PgConnector`] is the production
//!   implementation; tests substitute scripted ones.

use crate::common::{ChangeEvent, Result, StatusPositions};
use crate::postgres::protocol::message::ReplicationMessage;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Receives every flushed batch.
///
/// The batch is never empty and is in arrival order. The consumption loop
/// waits for `handle` to return before acknowledging the batch or reading
/// more WAL, so a slow handler slows replication down.
#[async_trait]
pub trait BatchHandler: Send + Sync {
    async fn handle(&self, events: &[ChangeEvent]);
}

#[async_trait]
impl<F> BatchHandler for F
where
    F: Fn(&[ChangeEvent]) + Send + Sync,
{
    async fn handle(&self, events: &[ChangeEvent]) {
        self(events)
    }
}

/// Result of `CREATE_REPLICATION_SLOT`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotInfo {
    pub slot_name: String,
    /// WAL position the slot is consistent from, as `X/Y`
    pub consistent_point: Option<String>,
    pub snapshot_name: Option<String>,
    pub output_plugin: Option<String>,
}

/// Opens replication sessions.
#[async_trait]
pub trait ReplicationConnector: Send + Sync {
    type Session: ReplicationSession + 'static;

    /// Open and authenticate a new session.
    async fn connect(&self) -> Result<Self::Session>;
}

/// One replication connection.
///
/// All methods take `&self`: the consumption loop and the heartbeat task
/// share the session, so implementations must allow a status update to be
/// written while another task waits for a message.
#[async_trait]
pub trait ReplicationSession: Send + Sync {
    /// Create a logical slot using `plugin`.
    ///
    /// Fails with SQLSTATE 42710 when the slot already exists.
    async fn create_slot(&self, slot: &str, plugin: &str) -> Result<SlotInfo>;

    /// Enter streaming mode. `from == 0` resumes from the slot's confirmed position.
    async fn start_streaming(&self, slot: &str, from: u64) -> Result<()>;

    /// Wait for the next keepalive or data message.
    ///
    /// Returns [`crate::CdcError::Cancelled`] once `cancel` fires.
    async fn wait_for_message(&self, cancel: &CancellationToken) -> Result<ReplicationMessage>;

    /// Send a standby status update.
    async fn send_status(&self, status: StatusPositions) -> Result<()>;

    /// False once the connection is known to be broken.
    fn is_alive(&self) -> bool;

    async fn close(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Operation;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Collector {
        seen: AtomicUsize,
    }

    #[async_trait]
    impl BatchHandler for Collector {
        async fn handle(&self, events: &[ChangeEvent]) {
            self.seen.fetch_add(events.len(), Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_closure_handler() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let handler: Arc<dyn BatchHandler> = Arc::new(move |events: &[ChangeEvent]| {
            c.fetch_add(events.len(), Ordering::SeqCst);
        });

        let events = vec![
            ChangeEvent {
                operation: Operation::Insert,
                ..Default::default()
            };
            3
        ];
        handler.handle(&events).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_struct_handler() {
        let collector = Collector {
            seen: AtomicUsize::new(0),
        };
        collector.handle(&[ChangeEvent::default()]).await;
        assert_eq!(collector.seen.load(Ordering::SeqCst), 1);
    }
}
