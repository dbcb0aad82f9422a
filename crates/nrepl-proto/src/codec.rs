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

//! Bencode codec for nREPL messages.
//!
//! Encoding is a single-shot transform of a [`Request`]'s wire map.
//! Decoding is incremental: the transport accumulates network bytes and
//! calls [`decode_all`], which extracts however many complete top-level
//! messages the buffer currently holds and reports how many bytes it
//! consumed. Messages may be split at arbitrary byte boundaries, including
//! mid-length-prefix, so "not enough bytes yet" is a first-class scan
//! outcome rather than an error.
//!
//! Bencode format:
//! - Strings: `<length>:<bytes>` (e.g. "4:spam")
//! - Integers: `i<number>e` (e.g. "i42e")
//! - Lists: `l<items>e`
//! - Dictionaries: `d<key><value>...e`

use crate::error::{NReplError, Result};
use crate::framing;
use crate::message::{Message, Request};

/// Maximum allowed length for a single bencode string (100MB).
/// Prevents a malicious or broken server from causing OOM with a huge
/// declared length.
const MAX_STRING_LENGTH: usize = 100 * 1024 * 1024;

/// Outcome of scanning for the end of one top-level bencode value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Scan {
    /// One complete value ends at this byte offset.
    End(usize),
    /// The buffer holds only a prefix; more bytes are needed.
    Partial,
}

/// Messages extracted by one [`decode_all`] pass plus the byte count they
/// occupied. `data[consumed..]` is the remainder to extend with the next
/// network read.
#[derive(Debug, Default)]
pub struct DecodedChunk {
    pub messages: Vec<Message>,
    pub consumed: usize,
}

pub fn encode(request: &Request) -> Result<Vec<u8>> {
    request.validate()?;
    serde_bencode::to_bytes(&request.to_wire())
        .map_err(|e| NReplError::codec(e.to_string(), 0))
}

/// Find where the bencode value starting at `start` ends.
///
/// Returns `Scan::Partial` when the buffer is a prefix of a valid value and
/// an error only for bytes no continuation could repair.
pub(crate) fn scan_value(data: &[u8], start: usize) -> Result<Scan> {
    let mut pos = start;

    if pos >= data.len() {
        return Ok(Scan::Partial);
    }

    match data[pos] {
        b'i' => {
            // Integer: i<number>e
            pos += 1;
            while pos < data.len() && data[pos] != b'e' {
                pos += 1;
            }
            if pos >= data.len() {
                return Ok(Scan::Partial);
            }
            Ok(Scan::End(pos + 1))
        }
        b'l' => {
            // List: l<items>e
            pos += 1;
            while pos < data.len() && data[pos] != b'e' {
                match scan_value(data, pos)? {
                    Scan::End(next) => pos = next,
                    Scan::Partial => return Ok(Scan::Partial),
                }
            }
            if pos >= data.len() {
                return Ok(Scan::Partial);
            }
            Ok(Scan::End(pos + 1))
        }
        b'd' => {
            // Dict: d<key><value>...e
            pos += 1;
            while pos < data.len() && data[pos] != b'e' {
                match scan_value(data, pos)? {
                    Scan::End(next) => pos = next,
                    Scan::Partial => return Ok(Scan::Partial),
                }
                match scan_value(data, pos)? {
                    Scan::End(next) => pos = next,
                    Scan::Partial => return Ok(Scan::Partial),
                }
            }
            if pos >= data.len() {
                return Ok(Scan::Partial);
            }
            Ok(Scan::End(pos + 1))
        }
        b'0'..=b'9' => {
            // String: <length>:<bytes>
            let len_start = pos;
            while pos < data.len() && data[pos] != b':' {
                if !data[pos].is_ascii_digit() {
                    return Err(NReplError::codec_with_preview(
                        "invalid byte in string length",
                        pos,
                        data,
                    ));
                }
                pos += 1;
            }
            if pos >= data.len() {
                // Possibly mid-length-prefix.
                return Ok(Scan::Partial);
            }

            let len = std::str::from_utf8(&data[len_start..pos])
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .ok_or_else(|| NReplError::codec("invalid string length value", pos))?;

            if len > MAX_STRING_LENGTH {
                return Err(NReplError::codec(
                    format!(
                        "string length {} exceeds maximum allowed size of {} bytes",
                        len, MAX_STRING_LENGTH
                    ),
                    pos,
                ));
            }

            pos += 1; // skip ':'

            let end_pos = pos.checked_add(len).ok_or_else(|| {
                NReplError::codec(
                    format!("string length {} overflows at position {}", len, pos),
                    pos,
                )
            })?;

            if end_pos > data.len() {
                // Declared length claims more bytes than received so far.
                return Ok(Scan::Partial);
            }

            Ok(Scan::End(end_pos))
        }
        _ => Err(NReplError::codec_with_preview(
            format!("invalid bencode byte: 0x{:02x}", data[pos]),
            pos,
            data,
        )),
    }
}

/// Decode exactly one top-level value starting at offset 0.
///
/// Returns the message and the number of bytes it occupied. A buffer that
/// holds only a prefix fails with [`NReplError::Incomplete`] carrying the
/// received byte count, the structured replacement for sniffing a
/// continuation out of a decoder's error text.
pub fn decode_one(data: &[u8]) -> Result<(Message, usize)> {
    match scan_value(data, 0)? {
        Scan::Partial => Err(NReplError::Incomplete {
            received: data.len(),
        }),
        Scan::End(len) => {
            let message: Message = serde_bencode::from_bytes(&data[..len])
                .map_err(|e| NReplError::codec_with_preview(e.to_string(), 0, &data[..len]))?;
            Ok((message, len))
        }
    }
}

/// Decode as many complete messages as the buffer holds.
///
/// Stops, preserving the unconsumed suffix, when the remaining bytes are an
/// incomplete continuation, when a structurally-complete message fails the
/// content-completeness check (its bytes stay in the remainder for the next
/// read to extend), or when the bytes are malformed. The latter is logged
/// and the pass abandoned, never fatal to the stream.
pub fn decode_all(data: &[u8]) -> DecodedChunk {
    let mut chunk = DecodedChunk::default();

    while chunk.consumed < data.len() {
        let rest = &data[chunk.consumed..];
        let len = match scan_value(rest, 0) {
            Ok(Scan::End(len)) => len,
            Ok(Scan::Partial) => break,
            Err(e) => {
                tracing::warn!(error = %e, "abandoning decode pass on malformed bencode");
                break;
            }
        };

        let message: Message = match serde_bencode::from_bytes(&rest[..len]) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "abandoning decode pass on undecodable message");
                break;
            }
        };

        if !framing::content_complete(&rest[..len], &message) {
            // Parsed, but an embedded payload claims more bytes than we
            // have. Leave everything from here on for the next read.
            break;
        }

        chunk.messages.push(message);
        chunk.consumed += len;
    }

    chunk
}
