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

//! One request/response exchange over one dedicated connection.
//!
//! Every [`Transport::exchange`] call opens its own socket, writes the
//! encoded request once, accumulates incoming bytes through the codec until
//! the framing layer reports a terminal message, then tears the connection
//! down. Concurrent exchanges never share a decode buffer; the only shared
//! state in the system is the connection descriptor the caller consulted to
//! build this transport.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::codec;
use crate::error::{NReplError, Result};
use crate::framing;
use crate::message::{Message, Request};

/// Default per-exchange deadline. An nREPL server that never emits a
/// terminal status would otherwise hang its caller forever.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

const READ_BUF_SIZE: usize = 4096;

/// Address and deadline for exchanges against one server. Cheap to clone;
/// holds no socket between calls.
#[derive(Debug, Clone)]
pub struct Transport {
    addr: String,
    timeout: Duration,
}

impl Transport {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Execute one exchange: connect, send, collect messages oldest-first
    /// until terminal. The socket is closed on every exit path: success,
    /// transport error, or deadline.
    pub async fn exchange(&self, request: &Request) -> Result<Vec<Message>> {
        match tokio::time::timeout(self.timeout, self.run(request)).await {
            Ok(result) => result,
            Err(_) => {
                // The future owning the socket was dropped by the timeout,
                // which closes it.
                Err(NReplError::timeout(request.op(), self.timeout))
            }
        }
    }

    async fn run(&self, request: &Request) -> Result<Vec<Message>> {
        let encoded = codec::encode(request)?;

        let mut stream = TcpStream::connect(&self.addr).await?;
        stream.write_all(&encoded).await?;
        stream.flush().await?;

        let mut buffer: Vec<u8> = Vec::new();
        let mut read_buf = [0u8; READ_BUF_SIZE];
        let mut messages: Vec<Message> = Vec::new();

        loop {
            let n = stream.read(&mut read_buf).await?;
            if n == 0 {
                return Err(NReplError::Transport(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed before terminal status",
                )));
            }
            buffer.extend_from_slice(&read_buf[..n]);

            let chunk = codec::decode_all(&buffer);
            buffer.drain(..chunk.consumed);

            for message in chunk.messages {
                let terminal = framing::is_terminal(&message);
                messages.push(message);
                if terminal {
                    // Anything decoded past the terminal message is not
                    // this exchange's concern.
                    let _ = stream.shutdown().await;
                    return Ok(messages);
                }
            }
        }
    }
}
