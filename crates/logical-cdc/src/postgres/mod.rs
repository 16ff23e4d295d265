//! PostgreSQL logical replication with the `test_decoding` output plugin
//!
//! Supports:
//! - PostgreSQL 10+ with `wal_level = logical`
//! - Cleartext, MD5 and SCRAM-SHA-256 authentication
//! - Slot creation on first start, resume on later starts
//! - Transaction-aligned batching with acknowledgement after delivery
//! - Periodic standby status updates and one-shot reconnect
//!
//! # Architecture
//!
//! ```text
//! PostgreSQL WAL → ReplicationClient → TestDecodingDecoder → ChangeEvent
//!                                                    ↓
//!                           BatchAccumulator → BatchHandler(s)
//! ```

pub mod config;
pub mod protocol;
mod source;
mod type_mapper;

pub use config::{LogicalConfig, LogicalConfigBuilder, OUTPUT_PLUGIN};
pub use protocol::*;
pub use source::*;
pub use type_mapper::*;
