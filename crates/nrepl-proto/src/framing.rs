// Copyright (C) 2025 Tom Waddington
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

//! Message framing and completion detection.
//!
//! Two questions get answered here. First, is a structurally-parsed message
//! possibly a premature parse of a longer value still arriving? Second, has
//! a multi-message response reached its terminal point?
//!
//! Terminal detection operates on the decoded map: a response sequence is
//! done once any message's `status` list contains `"done"`. The raw
//! length-prefix comparison is only a guard applied while a decode is still
//! provisional, before the codec commits a message.

use crate::codec;
use crate::message::Message;

/// Fields whose payload can be large enough to straddle packet boundaries.
const STREAMED_FIELDS: &[&str] = &["value", "out"];

/// True when this message terminates its exchange.
pub fn is_terminal(message: &Message) -> bool {
    message.has_status("done")
}

/// True when the decoded sequence has seen its terminal message. Messages
/// buffered past the terminal one belong to nobody and are dropped by the
/// transport.
pub fn response_done(messages: &[Message]) -> bool {
    messages.iter().any(is_terminal)
}

/// Check a structurally-complete message against its raw bytes.
///
/// A `value`/`out` payload can itself contain bytes that look like a dict
/// terminator before its declared length is reached. Compare the length
/// prefix announced on the wire (`5:value<N>:` / `3:out<N>:`) with the
/// decoded field's actual byte length, and require the final raw byte to be
/// the dict terminator. Shorter-than-declared means incomplete-by-content:
/// the message must not be committed yet.
pub(crate) fn content_complete(raw: &[u8], message: &Message) -> bool {
    if raw.last() != Some(&b'e') {
        return false;
    }

    for field in STREAMED_FIELDS {
        let Some(decoded) = message.field_str(field) else {
            continue;
        };
        let Some(declared) = declared_length(raw, field) else {
            continue;
        };
        if decoded.len() < declared {
            return false;
        }
    }

    true
}

/// The length prefix of the string stored under the top-level `field` key,
/// e.g. `184` out of `5:value184:`.
///
/// Walks the dict's actual key/value boundaries rather than searching the
/// raw bytes, so a payload in an earlier field that happens to contain
/// bencode-looking text (stdout echoing `5:value99:`, say) is never
/// mistaken for the key.
fn declared_length(raw: &[u8], field: &str) -> Option<usize> {
    if raw.first() != Some(&b'd') {
        return None;
    }

    let mut pos = 1;
    while pos < raw.len() && raw[pos] != b'e' {
        let key_end = scan_end(raw, pos)?;
        if string_payload(&raw[pos..key_end]) == Some(field.as_bytes()) {
            // The value may extend past the received bytes; read its
            // declared prefix directly.
            return prefix_length(&raw[key_end..]);
        }
        pos = scan_end(raw, key_end)?;
    }
    None
}

/// End offset of the bencode value at `start`, for values fully present in
/// the buffer.
fn scan_end(raw: &[u8], start: usize) -> Option<usize> {
    match codec::scan_value(raw, start) {
        Ok(codec::Scan::End(end)) => Some(end),
        _ => None,
    }
}

/// The bytes of a bencode string, `b"value"` out of `b"5:value"`.
fn string_payload(bytes: &[u8]) -> Option<&[u8]> {
    if !bytes.first()?.is_ascii_digit() {
        return None;
    }
    let colon = bytes.iter().position(|b| *b == b':')?;
    Some(&bytes[colon + 1..])
}

/// The declared length of the bencode string starting these bytes, without
/// requiring its payload to be present.
fn prefix_length(bytes: &[u8]) -> Option<usize> {
    if !bytes.first()?.is_ascii_digit() {
        return None;
    }
    let colon = bytes.iter().position(|b| *b == b':')?;
    std::str::from_utf8(&bytes[..colon]).ok()?.parse().ok()
}
