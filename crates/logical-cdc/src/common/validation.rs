//! Input validation for replication settings
//!
//! Slot names end up inside replication commands verbatim, so they are
//! restricted to what PostgreSQL itself accepts for a slot.

use anyhow::{anyhow, Result};
use regex::Regex;
use std::sync::LazyLock;

/// PostgreSQL identifier limit (NAMEDATALEN - 1)
const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Maximum backend message size (64 MB)
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Maximum connection timeout (30 seconds)
pub const CONNECTION_TIMEOUT_SECS: u64 = 30;

/// Replication slot names: lower-case letters, digits and underscores
static SLOT_NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9_]{1,63}$").expect("valid slot name regex"));

pub struct Validator;

impl Validator {
    /// Validate a replication slot name.
    pub fn validate_slot_name(name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(anyhow!("Slot name cannot be empty"));
        }

        if name.len() > MAX_IDENTIFIER_LENGTH {
            return Err(anyhow!(
                "Slot name too long: {} chars (max: {})",
                name.len(),
                MAX_IDENTIFIER_LENGTH
            ));
        }

        if !SLOT_NAME_REGEX.is_match(name) {
            return Err(anyhow!(
                "Invalid slot name '{}': may only contain lower case letters, numbers and underscores",
                name
            ));
        }

        Ok(())
    }

    /// Validate the watched table name (unqualified, unquoted).
    pub fn validate_table_name(name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(anyhow!("Table name cannot be empty"));
        }

        if name.len() > MAX_IDENTIFIER_LENGTH {
            return Err(anyhow!(
                "Table name too long: {} chars (max: {})",
                name.len(),
                MAX_IDENTIFIER_LENGTH
            ));
        }

        if name.contains('\0') {
            return Err(anyhow!("Table name cannot contain NUL"));
        }

        Ok(())
    }

    /// Validate message size
    pub fn validate_message_size(size: usize) -> Result<()> {
        if size > MAX_MESSAGE_SIZE {
            return Err(anyhow!(
                "Message size {} bytes exceeds maximum {}",
                size,
                MAX_MESSAGE_SIZE
            ));
        }
        Ok(())
    }

    /// Validate a connection URL
    pub fn validate_connection_url(url: &str) -> Result<()> {
        if url.is_empty() {
            return Err(anyhow!("Connection URL cannot be empty"));
        }

        let valid_schemes = ["postgres://", "postgresql://"];
        if !valid_schemes.iter().any(|s| url.starts_with(s)) {
            return Err(anyhow!(
                "Invalid connection URL scheme. Expected one of: {:?}",
                valid_schemes
            ));
        }

        Ok(())
    }
}
