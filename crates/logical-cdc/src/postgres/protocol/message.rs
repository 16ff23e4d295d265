//! Streaming replication messages
//!
//! Payloads carried inside CopyData (`d`) frames once the connection is in
//! CopyBoth mode:
//!
//! - `k` primary keepalive (server → client)
//! - `w` XLogData (server → client), one `test_decoding` line per message
//! - `r` standby status update (client → server)
//!
//! Timestamps on the wire are microseconds since 2000-01-01 00:00:00 UTC.

use crate::common::{CdcError, Result, StatusPositions};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Unix time of the PostgreSQL epoch (2000-01-01), in milliseconds.
const PG_EPOCH_UNIX_MILLIS: i64 = 946_684_800_000;

const KEEPALIVE_LEN: usize = 8 + 8 + 1;
const XLOG_HEADER_LEN: usize = 8 + 8 + 8;

/// A message received while streaming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicationMessage {
    /// Primary keepalive
    Keepalive {
        /// Server's current end of WAL
        wal_end: u64,
        /// Server send time (PostgreSQL epoch micros)
        timestamp: i64,
        reply_requested: bool,
    },
    /// WAL data
    XLogData {
        /// Position of this message's data in the WAL
        wal_start: u64,
        wal_end: u64,
        /// Server send time (PostgreSQL epoch micros)
        timestamp: i64,
        data: Bytes,
    },
}

impl ReplicationMessage {
    /// Decode a CopyData payload.
    pub fn parse(mut payload: Bytes) -> Result<Self> {
        if !payload.has_remaining() {
            return Err(CdcError::replication("empty CopyData payload"));
        }

        match payload.get_u8() {
            b'k' => {
                if payload.remaining() < KEEPALIVE_LEN {
                    return Err(CdcError::replication("truncated keepalive message"));
                }
                Ok(Self::Keepalive {
                    wal_end: payload.get_u64(),
                    timestamp: payload.get_i64(),
                    reply_requested: payload.get_u8() == 1,
                })
            }
            b'w' => {
                if payload.remaining() < XLOG_HEADER_LEN {
                    return Err(CdcError::replication("truncated XLogData header"));
                }
                let wal_start = payload.get_u64();
                let wal_end = payload.get_u64();
                let timestamp = payload.get_i64();
                Ok(Self::XLogData {
                    wal_start,
                    wal_end,
                    timestamp,
                    data: payload,
                })
            }
            other => Err(CdcError::replication(format!(
                "unexpected streaming message type: {:?}",
                other as char
            ))),
        }
    }

    /// Highest WAL position this message proves the server has sent.
    pub fn position(&self) -> u64 {
        match self {
            Self::Keepalive { wal_end, .. } => *wal_end,
            Self::XLogData { wal_start, .. } => *wal_start,
        }
    }
}

/// Encode a standby status update (`r`) payload.
pub fn encode_status_update(status: StatusPositions, now_unix_millis: i64) -> Bytes {
    let mut payload = BytesMut::with_capacity(34);
    payload.put_u8(b'r');
    payload.put_u64(status.received);
    payload.put_u64(status.flushed);
    payload.put_u64(status.applied);
    payload.put_i64(unix_millis_to_pg_micros(now_unix_millis));
    // Do not request an immediate reply
    payload.put_u8(0);
    payload.freeze()
}

/// Convert a PostgreSQL-epoch microsecond timestamp to Unix milliseconds.
pub fn pg_micros_to_unix_millis(micros: i64) -> i64 {
    micros.div_euclid(1000) + PG_EPOCH_UNIX_MILLIS
}

/// Convert Unix milliseconds to a PostgreSQL-epoch microsecond timestamp.
pub fn unix_millis_to_pg_micros(millis: i64) -> i64 {
    (millis - PG_EPOCH_UNIX_MILLIS).saturating_mul(1000)
}
