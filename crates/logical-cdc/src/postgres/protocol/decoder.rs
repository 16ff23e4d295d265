//! test_decoding decoder
//!
//! Turns the text of one XLogData message into a [`ChangeEvent`] for the
//! watched table. Lines for other tables are recognised from their prelude
//! alone and never fully scanned.

use super::parser::{self, unquote_identifier, ParseResult};
use crate::common::{
    CdcError, ChangeEvent, Operation, RecordPool, Result, TypedValue, OPERATION_FIELD,
};
use crate::postgres::type_mapper::{coerce_column, UNCHANGED_TOAST};
use std::collections::HashMap;

/// Decodes `test_decoding` lines for a single table.
#[derive(Debug, Clone)]
pub struct TestDecodingDecoder {
    table: String,
}

impl TestDecodingDecoder {
    /// `table` is the unqualified, unquoted table name to keep.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Decode one message.
    ///
    /// Returns `Ok(None)` for changes to other tables. `BEGIN` and `COMMIT`
    /// lines always decode, with no schema or table.
    pub fn decode(
        &self,
        data: &[u8],
        position: u64,
        timestamp_ms: i64,
        pool: &RecordPool,
    ) -> Result<Option<ChangeEvent>> {
        let line = std::str::from_utf8(data)
            .map_err(|e| CdcError::replication(format!("invalid UTF-8 in WAL data: {e}")))?;

        let prelude = parser::parse(line, true)?;
        if prelude.is_transaction() {
            let mut event = pool.checkout();
            event.operation = Operation::from_name(&prelude.operation);
            event.position = position;
            event.timestamp = timestamp_ms;
            return Ok(Some(event));
        }

        let (schema, table) = split_relation(&prelude.relation);
        if table != self.table {
            return Ok(None);
        }

        let parsed = parser::parse(line, false)?;
        let mut event = pool.checkout();
        fill_event(&mut event, parsed, schema, table);
        event.position = position;
        event.timestamp = timestamp_ms;
        Ok(Some(event))
    }
}

fn fill_event(event: &mut ChangeEvent, parsed: ParseResult, schema: String, table: String) {
    let operation = Operation::from_name(&parsed.operation);
    event.operation = operation;
    event.schema = schema;
    event.table = table;

    type_columns(parsed.columns, &mut event.columns);
    type_columns(parsed.old_columns, &mut event.old_columns);

    event.columns.insert(
        OPERATION_FIELD.to_string(),
        TypedValue::String(operation.name().to_string()),
    );
}

fn type_columns(
    raw: HashMap<String, parser::ColumnValue>,
    typed: &mut HashMap<String, TypedValue>,
) {
    for (name, column) in raw {
        if !column.quoted && column.value == UNCHANGED_TOAST {
            continue;
        }
        let value = coerce_column(&column);
        typed.insert(name, value);
    }
}

/// Split `schema.table` at the first dot outside double quotes, unquoting
/// both halves. A relation without a dot has an empty schema.
pub fn split_relation(relation: &str) -> (String, String) {
    let mut in_quotes = false;
    for (i, c) in relation.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '.' if !in_quotes => {
                return (
                    unquote_identifier(&relation[..i]),
                    unquote_identifier(&relation[i + 1..]),
                );
            }
            _ => {}
        }
    }
    (String::new(), unquote_identifier(relation))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(line: &str) -> Result<Option<ChangeEvent>> {
        TestDecodingDecoder::new("book").decode(
            line.as_bytes(),
            0x2A,
            1_700_000_000_000,
            &RecordPool::new(4),
        )
    }

    #[test]
    fn test_decode_insert() {
        let event = decode("table public.book: INSERT: id[integer]:7 name[text]:'O''Reilly' price[numeric(6,2)]:9.5 sold[boolean]:true")
            .unwrap()
            .unwrap();

        assert_eq!(event.operation, Operation::Insert);
        assert_eq!(event.schema, "public");
        assert_eq!(event.table, "book");
        assert_eq!(event.position, 0x2A);
        assert_eq!(event.timestamp, 1_700_000_000_000);
        assert_eq!(event.get("id"), Some(&TypedValue::Int(7)));
        assert_eq!(event.get("name"), Some(&TypedValue::String("O'Reilly".into())));
        assert_eq!(event.get("price"), Some(&TypedValue::Float(9.5)));
        assert_eq!(event.get("sold"), Some(&TypedValue::Bool(true)));
        assert_eq!(
            event.get(OPERATION_FIELD),
            Some(&TypedValue::String("INSERT".into()))
        );
    }

    #[test]
    fn test_decode_update_with_old_key() {
        let event = decode(
            "table public.book: UPDATE: old-key: id[integer]:7 new-tuple: id[integer]:8 note[text]:null",
        )
        .unwrap()
        .unwrap();

        assert_eq!(event.operation, Operation::Update);
        assert_eq!(event.get_old("id"), Some(&TypedValue::Int(7)));
        assert_eq!(event.get("id"), Some(&TypedValue::Int(8)));
        assert_eq!(event.get("note"), Some(&TypedValue::Null));
        assert!(event.get_old(OPERATION_FIELD).is_none());
    }

    #[test]
    fn test_decode_delete_without_tuple() {
        let event = decode("table public.book: DELETE: (no-tuple-data)")
            .unwrap()
            .unwrap();
        assert_eq!(event.operation, Operation::Delete);
        assert_eq!(event.columns.len(), 1);
        assert!(event.get(OPERATION_FIELD).is_some());
    }

    #[test]
    fn test_decode_skips_unchanged_toast() {
        let event = decode(
            "table public.book: UPDATE: id[integer]:1 body[text]:unchanged-toast-datum",
        )
        .unwrap()
        .unwrap();
        assert!(event.get("body").is_none());
        assert_eq!(event.get("id"), Some(&TypedValue::Int(1)));
    }

    #[test]
    fn test_decode_filters_other_tables() {
        assert!(decode("table public.author: INSERT: id[integer]:1")
            .unwrap()
            .is_none());
        assert!(decode("table public.bookshelf: INSERT: id[integer]:1")
            .unwrap()
            .is_none());
        // Other tables are not fully scanned, so a malformed body is ignored
        assert!(decode("table public.author: INSERT: name[text]:'unterminated")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_decode_transaction_markers() {
        let begin = decode("BEGIN 529").unwrap().unwrap();
        assert_eq!(begin.operation, Operation::Begin);
        assert!(begin.table.is_empty());

        let commit = decode("COMMIT 529").unwrap().unwrap();
        assert_eq!(commit.operation, Operation::Commit);
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(decode("nope"), Err(CdcError::Parse(_))));
        assert!(matches!(
            decode("table public.book: INSERT: id[integer]:'1"),
            Err(CdcError::Parse(_))
        ));
        let pool = RecordPool::new(1);
        assert!(TestDecodingDecoder::new("book")
            .decode(&[0xff, 0xfe, 0xfd, 0xfc, 0xfb], 0, 0, &pool)
            .is_err());
    }

    #[test]
    fn test_split_relation() {
        assert_eq!(
            split_relation("public.book"),
            ("public".into(), "book".into())
        );
        assert_eq!(
            split_relation(r#""My.Schema"."Book""#),
            ("My.Schema".into(), "Book".into())
        );
        assert_eq!(split_relation("book"), (String::new(), "book".into()));
    }
}
