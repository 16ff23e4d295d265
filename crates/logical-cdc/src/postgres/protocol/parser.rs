//! Parser for `test_decoding` output lines
//!
//! `test_decoding` renders every change as one line of text:
//!
//! ```text
//! BEGIN 529
//! table public.book: INSERT: id[integer]:7 name[text]:'O''Reilly'
//! table public.book: UPDATE: old-key: id[integer]:7 new-tuple: id[integer]:8 name[text]:'x'
//! table public.book: DELETE: (no-tuple-data)
//! COMMIT 529
//! ```
//!
//! Table lines are scanned once, left to right, by a small state machine.
//! Each byte is handled by `Cursor::step`; the cursor holds everything that
//! must survive between bytes and nothing else. Delimiters are all ASCII, so
//! slicing at their offsets is always on a char boundary.

use std::collections::HashMap;
use thiserror::Error;

const TABLE_PREFIX: &str = "table";
const NO_TUPLE_DATA: &str = "(no-tuple-data)";
const OLD_KEY_HEADER: &str = "old-key";
const NEW_TUPLE_HEADER: &str = "new-tuple";

/// States of the table-line scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    Initial,
    Relation,
    Operation,
    EscapedIdentifier,
    ColumnName,
    ColumnType,
    OpenSquareBracket,
    ColumnValue,
    ColumnQuotedValue,
    End,
}

/// Errors produced while parsing one line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("message too short")]
    MessageTooShort,

    #[error("malformed transaction line: {0:?}")]
    MalformedTransaction(String),

    #[error("unknown logical message: {0:?}")]
    UnknownMessage(String),

    #[error("expected {expected:?} at offset {offset} in {state:?} state")]
    UnexpectedCharacter {
        offset: usize,
        expected: char,
        state: ParserState,
    },

    #[error("unexpected end of message in {0:?} state")]
    InvalidEndState(ParserState),
}

/// One column as rendered by the decoder, before typing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnValue {
    /// Raw text, with quoting removed
    pub value: String,
    /// Source type name, e.g. `integer` or `character varying[]`
    pub type_name: String,
    /// The value was rendered inside single quotes
    pub quoted: bool,
}

impl ColumnValue {
    /// The unquoted `null` marker. A quoted `'null'` is a string.
    pub fn is_null(&self) -> bool {
        !self.quoted && self.value == "null"
    }
}

/// Outcome of parsing one line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseResult {
    /// Transaction id, for `BEGIN`/`COMMIT` lines
    pub transaction: Option<String>,
    /// Qualified relation, e.g. `public.book`
    pub relation: String,
    /// Operation keyword, e.g. `INSERT` or `BEGIN`
    pub operation: String,
    pub no_tuple_data: bool,
    pub columns: HashMap<String, ColumnValue>,
    /// Columns under an `old-key:` header
    pub old_columns: HashMap<String, ColumnValue>,
}

impl ParseResult {
    pub fn is_transaction(&self) -> bool {
        self.transaction.is_some()
    }
}

/// Parse one `test_decoding` line.
///
/// With `prelude_only`, scanning stops once the relation and operation are
/// known and no columns are collected.
pub fn parse(line: &str, prelude_only: bool) -> Result<ParseResult, ParseError> {
    if line.len() < 5 {
        return Err(ParseError::MessageTooShort);
    }

    let keyword = &line.as_bytes()[..5];
    match keyword {
        b"BEGIN" | b"COMMI" => parse_transaction(line),
        b"table" if line.as_bytes().get(TABLE_PREFIX.len()) == Some(&b' ') => {
            let mut result = ParseResult::default();
            Cursor::new(&mut result, prelude_only).run(line)?;
            Ok(result)
        }
        _ => Err(ParseError::UnknownMessage(
            line.chars().take(32).collect(),
        )),
    }
}

fn parse_transaction(line: &str) -> Result<ParseResult, ParseError> {
    let mut fields = line.split_whitespace();
    match (fields.next(), fields.next(), fields.next()) {
        (Some(operation), Some(xid), None) => Ok(ParseResult {
            transaction: Some(xid.to_string()),
            operation: operation.to_string(),
            ..Default::default()
        }),
        _ => Err(ParseError::MalformedTransaction(line.to_string())),
    }
}

/// What the scan loop does after a step.
enum Step {
    Next,
    /// Consume the following byte as well
    SkipNext,
    Stop,
}

struct Cursor<'r> {
    state: ParserState,
    /// State to return to when a quoted span closes
    prev: ParserState,
    token_start: usize,
    old_tuple: bool,
    quoted: bool,
    column_name: String,
    column_type: String,
    prelude_only: bool,
    result: &'r mut ParseResult,
}

impl<'r> Cursor<'r> {
    fn new(result: &'r mut ParseResult, prelude_only: bool) -> Self {
        Self {
            state: ParserState::Initial,
            prev: ParserState::Initial,
            token_start: 0,
            old_tuple: false,
            quoted: false,
            column_name: String::new(),
            column_type: String::new(),
            prelude_only,
            result,
        }
    }

    fn run(mut self, line: &str) -> Result<(), ParseError> {
        let bytes = line.as_bytes();
        self.state = ParserState::Relation;
        self.token_start = TABLE_PREFIX.len() + 1;

        // One extra iteration with `None` marks the end of input
        let mut i = self.token_start;
        while i <= bytes.len() {
            let current = bytes.get(i).copied();
            let next = bytes.get(i + 1).copied();
            match self.step(line, i, current, next)? {
                Step::Next => i += 1,
                Step::SkipNext => i += 2,
                Step::Stop => break,
            }
        }

        let accepted = if self.prelude_only {
            ParserState::ColumnName
        } else {
            ParserState::End
        };
        if self.state != accepted {
            return Err(ParseError::InvalidEndState(self.state));
        }
        Ok(())
    }

    fn step(
        &mut self,
        line: &str,
        i: usize,
        current: Option<u8>,
        next: Option<u8>,
    ) -> Result<Step, ParseError> {
        use ParserState as S;

        match (self.state, current) {
            (S::Relation | S::ColumnName | S::ColumnType, Some(b'"')) => {
                self.prev = self.state;
                self.state = S::EscapedIdentifier;
            }

            (S::EscapedIdentifier, Some(b'"')) => {
                if next == Some(b'"') {
                    return Ok(Step::SkipNext);
                }
                self.state = self.prev;
            }

            (S::Relation, Some(b':')) => {
                self.expect(i + 1, next, b' ')?;
                self.result.relation = line[self.token_start..i].to_string();
                self.token_start = i + 2;
                self.state = S::Operation;
                return Ok(Step::SkipNext);
            }

            (S::Operation, Some(b':')) => {
                self.expect(i + 1, next, b' ')?;
                self.result.operation = line[self.token_start..i].to_string();
                self.token_start = i + 2;
                self.state = S::ColumnName;
                if self.prelude_only {
                    return Ok(Step::Stop);
                }
                return Ok(Step::SkipNext);
            }

            (S::ColumnName, Some(b'[')) => {
                self.column_name = unquote_identifier(&line[self.token_start..i]);
                self.token_start = i + 1;
                self.state = S::ColumnType;
            }

            (S::ColumnName, Some(b':')) => {
                self.expect(i + 1, next, b' ')?;
                match &line[self.token_start..i] {
                    OLD_KEY_HEADER => self.old_tuple = true,
                    NEW_TUPLE_HEADER => self.old_tuple = false,
                    _ => {}
                }
                self.token_start = i + 2;
                return Ok(Step::SkipNext);
            }

            (S::ColumnName, Some(b'(')) if &line[i..] == NO_TUPLE_DATA => {
                self.result.no_tuple_data = true;
                self.state = S::End;
                return Ok(Step::Stop);
            }

            (S::ColumnType, Some(b'[')) => self.state = S::OpenSquareBracket,

            (S::OpenSquareBracket, Some(b']')) => self.state = S::ColumnType,

            (S::ColumnType, Some(b']')) => {
                self.expect(i + 1, next, b':')?;
                self.column_type = line[self.token_start..i].to_string();
                self.token_start = i + 2;
                self.state = S::ColumnValue;
                return Ok(Step::SkipNext);
            }

            (S::ColumnValue, Some(b'\'')) if i == self.token_start => {
                self.quoted = true;
                self.state = S::ColumnQuotedValue;
            }

            (S::ColumnQuotedValue, Some(b'\'')) => {
                if next == Some(b'\'') {
                    return Ok(Step::SkipNext);
                }
                self.state = S::ColumnValue;
            }

            (S::ColumnValue, Some(b' ') | None) => {
                self.store_column(&line[self.token_start..i]);
                if current.is_none() {
                    self.state = S::End;
                    return Ok(Step::Stop);
                }
                self.token_start = i + 1;
                self.state = S::ColumnName;
            }

            _ => {}
        }

        Ok(Step::Next)
    }

    fn expect(&self, offset: usize, found: Option<u8>, expected: u8) -> Result<(), ParseError> {
        if found == Some(expected) {
            Ok(())
        } else {
            Err(ParseError::UnexpectedCharacter {
                offset,
                expected: expected as char,
                state: self.state,
            })
        }
    }

    fn store_column(&mut self, raw: &str) {
        let value = if self.quoted {
            let inner = raw
                .strip_prefix('\'')
                .and_then(|s| s.strip_suffix('\''))
                .unwrap_or(raw);
            inner.replace("''", "'")
        } else {
            raw.to_string()
        };

        let column = ColumnValue {
            value,
            type_name: std::mem::take(&mut self.column_type),
            quoted: self.quoted,
        };
        let name = std::mem::take(&mut self.column_name);
        if self.old_tuple {
            self.result.old_columns.insert(name, column);
        } else {
            self.result.columns.insert(name, column);
        }
        self.quoted = false;
    }
}

/// Strip double quotes from an identifier, collapsing `""` to `"`.
pub fn unquote_identifier(ident: &str) -> String {
    match ident
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
    {
        Some(inner) => inner.replace("\"\"", "\""),
        None => ident.to_string(),
    }
}
