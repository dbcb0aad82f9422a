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

//! # nrepl-proto
//!
//! Streaming bencode client protocol layer for nREPL servers.
//!
//! The codec incrementally decodes a growing byte buffer into complete
//! messages despite arbitrary packet fragmentation; the framing layer
//! decides when a multi-message response is done; the transport runs one
//! request/response exchange per dedicated connection; the client layers
//! the nREPL operations (clone, close, complete, info, eval, load-file,
//! stacktrace, ls-sessions, test) on top.
//!
//! ## Example
//!
//! ```no_run
//! use nrepl_proto::NReplClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = NReplClient::new("localhost:7888");
//!     let outcome = client.eval("(+ 1 2)", None).await?;
//!     println!("Result: {:?}", outcome.value());
//!     Ok(())
//! }
//! ```

pub mod codec;
mod client;
mod error;
pub mod framing;
mod message;
mod transport;

pub use client::{EvalOutcome, NReplClient};
pub use error::{NReplError, Result};
pub use message::{CompletionCandidate, Message, Request, Value};
pub use transport::{DEFAULT_TIMEOUT, Transport};
