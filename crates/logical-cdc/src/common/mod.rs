//! # Common Replication Types
//!
//! Transport-independent building blocks of the replication client:
//!
//! - [`ChangeEvent`] / [`TypedValue`] / [`Operation`] - decoded change records
//! - [`RecordPool`] - reusable event allocations
//! - [`PositionTracker`] - received and acknowledged WAL positions
//! - [`BatchAccumulator`] - transaction-aligned batching and acknowledgement
//! - [`spawn_heartbeat`] - periodic standby status updates
//! - [`BatchHandler`], [`ReplicationConnector`], [`ReplicationSession`] - seams
//! - [`Validator`] - identifier and connection string checks
//! - [`CdcError`] - error type
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  ChangeEvent    ←── decoded row change or tx marker  │
//! │  RecordPool     ←── checkout / release of events     │
//! │  PositionTracker←── received / acknowledged LSNs     │
//! │  BatchAccumulator ─→ BatchHandler (in order)         │
//! │  Heartbeat      ←── status update every interval     │
//! └──────────────────────────────────────────────────────┘
//! ```

mod batch;
mod error;
mod event;
mod heartbeat;
mod pool;
mod position;
mod traits;
mod validation;

pub use batch::*;
pub use error::*;
pub use event::*;
pub use heartbeat::*;
pub use pool::*;
pub use position::*;
pub use traits::*;
pub use validation::*;
