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

use std::time::Duration;

pub type Result<T> = std::result::Result<T, NReplError>;

/// Error taxonomy for the protocol layer.
///
/// Evaluation exceptions (`ex` in a response) are deliberately *not* part of
/// this enum: the server reporting an exception is a normal result variant
/// carried in the decoded messages, and callers branch on it explicitly.
#[derive(Debug, thiserror::Error)]
pub enum NReplError {
    /// The TCP connection could not be established or died mid-exchange.
    /// Fatal to the exchange; never retried here.
    #[error("connection error: {0}")]
    Transport(#[from] std::io::Error),

    /// The exchange never saw a terminal `done` status within the deadline.
    /// The socket has been force-closed by the time this is returned.
    #[error("timed out after {duration:?} while waiting on {operation}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    /// Malformed bytes that streaming incompleteness cannot explain.
    #[error("codec error at byte {position}: {message}")]
    Codec { message: String, position: usize },

    /// The buffer holds only a prefix of a bencode value. This is the normal
    /// streaming signal, surfaced structurally rather than by parsing an
    /// exception message out of the decoder.
    #[error("incomplete bencode value ({received} bytes buffered)")]
    Incomplete { received: usize },

    /// The server answered, but the response violates the operation's
    /// contract (e.g. a clone reply without `new-session`).
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// Programmer misuse: an operation was attempted with no connection
    /// state at all. Fails loudly and immediately.
    #[error("not connected to an nREPL server")]
    NotConnected,
}

impl NReplError {
    pub fn codec(message: impl Into<String>, position: usize) -> Self {
        Self::Codec {
            message: message.into(),
            position,
        }
    }

    /// Codec error with a hex preview of the offending bytes, for logs.
    pub fn codec_with_preview(
        message: impl Into<String>,
        position: usize,
        buffer: &[u8],
    ) -> Self {
        let preview_len = buffer.len().min(64);
        let hex_preview = buffer[..preview_len]
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(" ");

        Self::Codec {
            message: format!("{} (buffer preview: {})", message.into(), hex_preview),
            position,
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// True when the peer refused the connection outright. Callers use this
    /// to invalidate a cached host/port that is evidently no longer serving.
    pub fn is_connection_refused(&self) -> bool {
        matches!(
            self,
            NReplError::Transport(e) if e.kind() == std::io::ErrorKind::ConnectionRefused
        )
    }
}
