//! PostgreSQL replication client
//!
//! Low-level TCP client for the streaming replication protocol. Supports
//! cleartext, MD5 and SCRAM-SHA-256 authentication, slot creation and
//! `test_decoding` streaming.
//!
//! The socket is split into halves behind separate locks: the consumption
//! loop holds the read half while it waits for WAL, and status updates go
//! out through the write half in the meantime.

use super::message::{encode_status_update, ReplicationMessage};
use crate::common::{
    format_lsn, CdcError, ReplicationConnector, ReplicationSession, Result, SlotInfo,
    StatusPositions, Validator, CONNECTION_TIMEOUT_SECS,
};
use crate::postgres::config::LogicalConfig;
use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use md5::{Digest, Md5};
use postgres_protocol::authentication::sasl::{ChannelBinding, ScramSha256, SCRAM_SHA_256};
use postgres_protocol::message::{backend, frontend};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Opens [`ReplicationClient`]s from a [`LogicalConfig`].
#[derive(Debug, Clone)]
pub struct PgConnector {
    config: LogicalConfig,
}

impl PgConnector {
    pub fn new(config: LogicalConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ReplicationConnector for PgConnector {
    type Session = ReplicationClient;

    async fn connect(&self) -> Result<ReplicationClient> {
        ReplicationClient::connect(
            &self.config.host,
            self.config.port,
            &self.config.user,
            &self.config.database,
            self.config.password.as_deref(),
        )
        .await
    }
}

/// PostgreSQL connection in logical replication mode (without TLS)
pub struct ReplicationClient {
    reader: Mutex<BufReader<OwnedReadHalf>>,
    writer: Mutex<OwnedWriteHalf>,
    alive: AtomicBool,
}

impl ReplicationClient {
    /// Connect to PostgreSQL in replication mode
    pub async fn connect(
        host: &str,
        port: u16,
        user: &str,
        database: &str,
        password: Option<&str>,
    ) -> Result<Self> {
        info!(host, port, user, database, "Connecting in replication mode");

        let stream = timeout(
            Duration::from_secs(CONNECTION_TIMEOUT_SECS),
            TcpStream::connect((host, port)),
        )
        .await
        .map_err(|_| {
            CdcError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("connection timeout after {}s", CONNECTION_TIMEOUT_SECS),
            ))
        })??;
        stream.set_nodelay(true)?;

        let (read_half, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        // 1. Startup
        let params = [
            ("user", user),
            ("database", database),
            ("replication", "database"),
            ("application_name", "logical-cdc"),
        ];
        let mut buf = BytesMut::new();
        frontend::startup_message(params.into_iter(), &mut buf)?;
        write_buf(&mut writer, &buf).await?;

        // 2. Authentication
        authenticate(&mut reader, &mut writer, user, password).await?;

        // 3. Wait for ReadyForQuery
        loop {
            let (type_code, body) = read_frame(&mut reader).await?;
            match type_code {
                b'Z' => {
                    debug!("Ready for query");
                    break;
                }
                b'E' => return Err(parse_error_response(&body)),
                // ParameterStatus, BackendKeyData, NoticeResponse
                _ => {}
            }
        }

        Ok(Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            alive: AtomicBool::new(true),
        })
    }

    /// Run a replication command, collecting the first data row.
    async fn simple_query(&self, query: &str) -> Result<Option<Vec<Option<String>>>> {
        let mut buf = BytesMut::new();
        frontend::query(query, &mut buf)?;
        self.write(&buf).await?;

        let mut reader = self.reader.lock().await;
        let mut row = None;
        let mut error = None;
        loop {
            let (type_code, body) = self.checked(read_frame(&mut reader).await)?;
            match type_code {
                b'D' if row.is_none() => row = Some(parse_data_row(body)?),
                b'E' => error = Some(parse_error_response(&body)),
                b'Z' => break,
                // RowDescription, CommandComplete, NoticeResponse
                _ => {}
            }
        }

        match error {
            Some(e) => Err(e),
            None => Ok(row),
        }
    }

    async fn write(&self, buf: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let result = write_buf(&mut writer, buf).await;
        self.checked(result)
    }

    /// Any failure reading or writing a frame leaves the stream unusable.
    fn checked<T>(&self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.alive.store(false, Ordering::Release);
        }
        result
    }
}

#[async_trait]
impl ReplicationSession for ReplicationClient {
    async fn create_slot(&self, slot: &str, plugin: &str) -> Result<SlotInfo> {
        Validator::validate_slot_name(slot).map_err(|e| CdcError::config(e.to_string()))?;

        let query = format!("CREATE_REPLICATION_SLOT {} LOGICAL {}", slot, plugin);
        let row = self.simple_query(&query).await?.unwrap_or_default();
        let mut columns = row.into_iter();

        let info = SlotInfo {
            slot_name: columns
                .next()
                .flatten()
                .unwrap_or_else(|| slot.to_string()),
            consistent_point: columns.next().flatten(),
            snapshot_name: columns.next().flatten(),
            output_plugin: columns.next().flatten(),
        };
        info!(
            slot = %info.slot_name,
            consistent_point = ?info.consistent_point,
            "Created replication slot"
        );
        Ok(info)
    }

    async fn start_streaming(&self, slot: &str, from: u64) -> Result<()> {
        Validator::validate_slot_name(slot).map_err(|e| CdcError::config(e.to_string()))?;

        let query = format!("START_REPLICATION SLOT {} LOGICAL {}", slot, format_lsn(from));
        let mut buf = BytesMut::new();
        frontend::query(&query, &mut buf)?;
        self.write(&buf).await?;

        let mut reader = self.reader.lock().await;
        loop {
            let (type_code, body) = self.checked(read_frame(&mut reader).await)?;
            match type_code {
                // CopyBothResponse
                b'W' => {
                    info!(slot, lsn = %format_lsn(from), "Entered CopyBoth mode");
                    return Ok(());
                }
                b'E' => {
                    let error = parse_error_response(&body);
                    // Drain to ReadyForQuery so the connection stays usable
                    loop {
                        let (type_code, _) = self.checked(read_frame(&mut reader).await)?;
                        if type_code == b'Z' {
                            break;
                        }
                    }
                    return Err(error);
                }
                b'N' => debug!("Notice during START_REPLICATION"),
                other => {
                    return Err(CdcError::replication(format!(
                        "Unexpected response to START_REPLICATION: {:?}",
                        other as char
                    )))
                }
            }
        }
    }

    async fn wait_for_message(&self, cancel: &CancellationToken) -> Result<ReplicationMessage> {
        // A cancelled read may leave a partial frame behind; the session is
        // not reused after cancellation.
        let mut reader = self.reader.lock().await;
        loop {
            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CdcError::Cancelled),
                frame = read_frame(&mut reader) => self.checked(frame)?,
            };

            match frame {
                (b'd', body) => return ReplicationMessage::parse(body),
                (b'c', _) => {
                    info!("Replication stream ended (CopyDone)");
                    self.alive.store(false, Ordering::Release);
                    return Err(CdcError::ConnectionClosed);
                }
                (b'E', body) => {
                    self.alive.store(false, Ordering::Release);
                    return Err(parse_error_response(&body));
                }
                (b'N', _) => debug!("Notice while streaming"),
                (other, _) => {
                    return Err(CdcError::replication(format!(
                        "Unexpected message type while streaming: {:?}",
                        other as char
                    )))
                }
            }
        }
    }

    async fn send_status(&self, status: StatusPositions) -> Result<()> {
        let payload = encode_status_update(status, chrono::Utc::now().timestamp_millis());
        let mut frame = BytesMut::with_capacity(1 + 4 + payload.len());
        frame.put_u8(b'd');
        frame.put_i32((payload.len() + 4) as i32);
        frame.put_slice(&payload);
        self.write(&frame).await
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    async fn close(&self) -> Result<()> {
        self.alive.store(false, Ordering::Release);
        let mut buf = BytesMut::new();
        frontend::terminate(&mut buf);
        let mut writer = self.writer.lock().await;
        if let Err(e) = write_buf(&mut writer, &buf).await {
            debug!(error = %e, "Terminate not delivered");
        }
        writer.shutdown().await?;
        Ok(())
    }
}

async fn authenticate(
    reader: &mut BufReader<OwnedReadHalf>,
    writer: &mut OwnedWriteHalf,
    user: &str,
    password: Option<&str>,
) -> Result<()> {
    let require_password =
        || password.ok_or_else(|| CdcError::config("Password required but not provided"));
    let mut scram: Option<ScramSha256> = None;

    loop {
        let (type_code, body) = read_frame(reader).await?;
        if type_code == b'E' {
            return Err(parse_error_response(&body));
        }

        let mut raw_msg = BytesMut::with_capacity(1 + 4 + body.len());
        raw_msg.put_u8(type_code);
        raw_msg.put_i32((body.len() + 4) as i32);
        raw_msg.put_slice(&body);

        let msg = backend::Message::parse(&mut raw_msg)?
            .ok_or_else(|| CdcError::replication("Failed to parse auth message"))?;

        let mut buf = BytesMut::new();
        match msg {
            backend::Message::AuthenticationOk => {
                debug!("Authentication successful");
                return Ok(());
            }
            backend::Message::AuthenticationCleartextPassword => {
                frontend::password_message(require_password()?.as_bytes(), &mut buf)?;
            }
            backend::Message::AuthenticationMd5Password(body) => {
                let hash = hash_md5_password(user, require_password()?, &body.salt());
                frontend::password_message(hash.as_bytes(), &mut buf)?;
            }
            backend::Message::AuthenticationSasl(_) => {
                let client =
                    ScramSha256::new(require_password()?.as_bytes(), ChannelBinding::unsupported());
                frontend::sasl_initial_response(SCRAM_SHA_256, client.message(), &mut buf)?;
                scram = Some(client);
            }
            backend::Message::AuthenticationSaslContinue(body) => {
                let client = scram
                    .as_mut()
                    .ok_or_else(|| CdcError::replication("SASL continue without SASL start"))?;
                client.update(body.data())?;
                frontend::sasl_response(client.message(), &mut buf)?;
            }
            backend::Message::AuthenticationSaslFinal(body) => {
                let client = scram
                    .as_mut()
                    .ok_or_else(|| CdcError::replication("SASL final without SASL start"))?;
                client.finish(body.data())?;
                continue;
            }
            _ => {
                return Err(CdcError::replication(format!(
                    "Unexpected message during auth: {:?}",
                    type_code as char
                )))
            }
        }
        write_buf(writer, &buf).await?;
    }
}

async fn write_buf(writer: &mut OwnedWriteHalf, buf: &[u8]) -> Result<()> {
    writer.write_all(buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one backend message: type byte, length, body.
async fn read_frame(reader: &mut BufReader<OwnedReadHalf>) -> Result<(u8, Bytes)> {
    let type_code = match reader.read_u8().await {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(CdcError::ConnectionClosed)
        }
        Err(e) => return Err(e.into()),
    };
    let len = reader.read_i32().await?;
    if len < 4 {
        return Err(CdcError::replication(format!("Invalid frame length {len}")));
    }
    let len = len as usize - 4;
    Validator::validate_message_size(len).map_err(|e| CdcError::replication(e.to_string()))?;

    let mut body = BytesMut::zeroed(len);
    reader.read_exact(&mut body).await?;
    Ok((type_code, body.freeze()))
}

/// Extract SQLSTATE and message from an ErrorResponse body.
fn parse_error_response(body: &[u8]) -> CdcError {
    let mut code = String::new();
    let mut message = String::new();
    let mut fields = body;

    while let Some((&field, rest)) = fields.split_first() {
        if field == 0 {
            break;
        }
        let end = rest.iter().position(|b| *b == 0).unwrap_or(rest.len());
        let value = String::from_utf8_lossy(&rest[..end]);
        match field {
            b'C' => code = value.into_owned(),
            b'M' => message = value.into_owned(),
            _ => {}
        }
        fields = rest.get(end + 1..).unwrap_or_default();
    }

    if code.is_empty() {
        warn!("ErrorResponse without SQLSTATE");
    }
    CdcError::postgres(code, message)
}

/// Decode a DataRow body into optional text columns.
fn parse_data_row(mut body: Bytes) -> Result<Vec<Option<String>>> {
    let truncated = || CdcError::replication("truncated DataRow");
    if body.remaining() < 2 {
        return Err(truncated());
    }
    let count = body.get_i16().max(0) as usize;
    let mut columns = Vec::with_capacity(count);
    for _ in 0..count {
        if body.remaining() < 4 {
            return Err(truncated());
        }
        let len = body.get_i32();
        if len < 0 {
            columns.push(None);
            continue;
        }
        let len = len as usize;
        if body.remaining() < len {
            return Err(truncated());
        }
        let value = body.split_to(len);
        columns.push(Some(String::from_utf8_lossy(&value).into_owned()));
    }
    Ok(columns)
}

fn hash_md5_password(user: &str, pass: &str, salt: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(pass);
    hasher.update(user);
    let first = hex::encode(hasher.finalize());

    let mut hasher = Md5::new();
    hasher.update(first);
    hasher.update(salt);
    let second = hex::encode(hasher.finalize());

    format!("md5{}", second)
}
