//! Scripted replication transport for session tests
//!
//! Each [`MockConnector::connect`] hands out the next script. A session
//! replays its steps from `wait_for_message` and then blocks until
//! cancelled. Everything the controller does to a session is recorded in
//! the shared [`MockState`].

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use logical_cdc::common::{
    CdcError, ChangeEvent, ReplicationConnector, ReplicationSession, Result, SlotInfo,
    StatusPositions,
};
use logical_cdc::postgres::ReplicationMessage;
use logical_cdc::LogicalConfig;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

static INIT: Once = Once::new();

/// Initialize test logging (idempotent)
pub fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive("logical_cdc=debug".parse().unwrap()),
            )
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// One scripted outcome of `wait_for_message`.
#[derive(Debug, Clone)]
pub enum Step {
    Message(ReplicationMessage),
    /// Error with the connection still usable
    Transient(String),
    /// Connection lost
    Drop,
}

pub fn xlog(lsn: u64, line: &str) -> Step {
    Step::Message(ReplicationMessage::XLogData {
        wal_start: lsn,
        wal_end: lsn,
        timestamp: 0,
        data: Bytes::from(line.to_string()),
    })
}

pub fn keepalive(lsn: u64, reply_requested: bool) -> Step {
    Step::Message(ReplicationMessage::Keepalive {
        wal_end: lsn,
        timestamp: 0,
        reply_requested,
    })
}

/// `BEGIN`, one insert per id into `book`, `COMMIT`, at consecutive LSNs
/// starting from `lsn`.
pub fn book_transaction(lsn: u64, ids: &[i64]) -> Vec<Step> {
    let mut steps = vec![xlog(lsn, "BEGIN 1")];
    for (i, id) in ids.iter().enumerate() {
        steps.push(xlog(
            lsn + 1 + i as u64,
            &format!("table public.book: INSERT: id[integer]:{id} title[text]:'Book {id}'"),
        ));
    }
    steps.push(xlog(lsn + 1 + ids.len() as u64, "COMMIT 1"));
    steps
}

/// What the controller did to the transport.
#[derive(Debug, Default)]
pub struct MockState {
    pub connects: AtomicUsize,
    pub closes: AtomicUsize,
    pub slot_exists: AtomicBool,
    pub slot_creations: AtomicUsize,
    pub statuses: Mutex<Vec<StatusPositions>>,
    pub stream_starts: Mutex<Vec<(String, u64)>>,
    pub consumed: AtomicUsize,
}

impl MockState {
    pub fn statuses(&self) -> Vec<StatusPositions> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

pub struct MockConnector {
    scripts: Mutex<VecDeque<Vec<Step>>>,
    pub state: Arc<MockState>,
}

impl MockConnector {
    /// One script per successful connect; connecting past the last fails.
    pub fn new(scripts: Vec<Vec<Step>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            state: Arc::new(MockState::default()),
        }
    }
}

#[async_trait]
impl ReplicationConnector for MockConnector {
    type Session = MockSession;

    async fn connect(&self) -> Result<MockSession> {
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(CdcError::ConnectionClosed)?;
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(MockSession {
            steps: Mutex::new(script.into()),
            alive: AtomicBool::new(true),
            state: self.state.clone(),
        })
    }
}

pub struct MockSession {
    steps: Mutex<VecDeque<Step>>,
    alive: AtomicBool,
    state: Arc<MockState>,
}

#[async_trait]
impl ReplicationSession for MockSession {
    async fn create_slot(&self, slot: &str, plugin: &str) -> Result<SlotInfo> {
        if self.state.slot_exists.swap(true, Ordering::SeqCst) {
            return Err(CdcError::postgres(
                "42710",
                format!("replication slot \"{slot}\" already exists"),
            ));
        }
        self.state.slot_creations.fetch_add(1, Ordering::SeqCst);
        Ok(SlotInfo {
            slot_name: slot.to_string(),
            consistent_point: Some("0/16B6C50".to_string()),
            snapshot_name: None,
            output_plugin: Some(plugin.to_string()),
        })
    }

    async fn start_streaming(&self, slot: &str, from: u64) -> Result<()> {
        self.state
            .stream_starts
            .lock()
            .unwrap()
            .push((slot.to_string(), from));
        Ok(())
    }

    async fn wait_for_message(&self, cancel: &CancellationToken) -> Result<ReplicationMessage> {
        if cancel.is_cancelled() {
            return Err(CdcError::Cancelled);
        }
        if !self.alive.load(Ordering::SeqCst) {
            return Err(CdcError::ConnectionClosed);
        }

        let next = self.steps.lock().unwrap().pop_front();
        let Some(step) = next else {
            cancel.cancelled().await;
            return Err(CdcError::Cancelled);
        };
        self.state.consumed.fetch_add(1, Ordering::SeqCst);

        match step {
            Step::Message(message) => Ok(message),
            Step::Transient(msg) => Err(CdcError::replication(msg)),
            Step::Drop => {
                self.alive.store(false, Ordering::SeqCst);
                Err(CdcError::ConnectionClosed)
            }
        }
    }

    async fn send_status(&self, status: StatusPositions) -> Result<()> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(CdcError::ConnectionClosed);
        }
        self.state.statuses.lock().unwrap().push(status);
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.alive.store(false, Ordering::SeqCst);
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn test_config() -> LogicalConfig {
    LogicalConfig::builder()
        .user("replicator")
        .database("shop")
        .table("book")
        .slot_name("book_cache_slot")
        .build()
        .unwrap()
}

/// Batches seen by a handler, cloned.
pub type Batches = Arc<Mutex<Vec<Vec<ChangeEvent>>>>;

/// Poll `condition` until it holds or five seconds pass.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
