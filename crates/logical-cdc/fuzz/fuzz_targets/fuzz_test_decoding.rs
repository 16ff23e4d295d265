#![no_main]
//! Fuzz test for the test_decoding parser and decoder
//!
//! Any byte sequence must produce an event, a filtered result or an error.

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use logical_cdc::common::RecordPool;
use logical_cdc::postgres::protocol::parser;
use logical_cdc::postgres::{ReplicationMessage, TestDecodingDecoder};

fuzz_target!(|data: &[u8]| {
    let pool = RecordPool::new(4);
    let decoder = TestDecodingDecoder::new("book");
    if let Ok(Some(event)) = decoder.decode(data, 0, 0, &pool) {
        pool.release(event);
    }

    if let Ok(line) = std::str::from_utf8(data) {
        let _ = parser::parse(line, true);
        let _ = parser::parse(line, false);

        for prefix in [
            "table public.book: ",
            "table public.book: INSERT: ",
            "BEGIN ",
            "COMMIT ",
        ] {
            let prefixed = format!("{prefix}{line}");
            let _ = parser::parse(&prefixed, false);
            if let Ok(Some(event)) = decoder.decode(prefixed.as_bytes(), 0, 0, &pool) {
                pool.release(event);
            }
        }
    }

    for tag in [b'k', b'w'] {
        let mut framed = vec![tag];
        framed.extend_from_slice(data);
        let _ = ReplicationMessage::parse(Bytes::from(framed));
    }
});
