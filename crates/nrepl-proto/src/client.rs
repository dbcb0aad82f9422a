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

//! Protocol operations.
//!
//! Each operation shapes a request, runs one transport exchange, and
//! interprets the response. Network-level failures reject the whole
//! operation; protocol-level "failure" (an `ex` field, a missing
//! `new-session`, absent `completions`) is a normal result value that
//! callers branch on explicitly.

use std::time::Duration;

use crate::error::{NReplError, Result};
use crate::message::{Message, Request};
use crate::transport::Transport;

/// Result of an eval-class operation.
///
/// `messages` is the full decoded sequence, oldest first. When the client
/// opened the session itself and the evaluation reported an exception,
/// `stacktrace` carries the frames fetched before the session was closed.
#[derive(Debug, Clone)]
pub struct EvalOutcome {
    pub messages: Vec<Message>,
    pub stacktrace: Option<Vec<Message>>,
}

impl EvalOutcome {
    fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            stacktrace: None,
        }
    }

    /// The exception summary, if the server reported one.
    pub fn exception(&self) -> Option<&str> {
        self.messages.iter().find_map(Message::ex)
    }

    /// The printed result value, if any message carried one.
    pub fn value(&self) -> Option<&str> {
        self.messages.iter().find_map(Message::value)
    }

    /// Stdout fragments in arrival order.
    pub fn output(&self) -> Vec<&str> {
        self.messages.iter().filter_map(Message::out).collect()
    }

    /// Stderr fragments in arrival order.
    pub fn errors(&self) -> Vec<&str> {
        self.messages.iter().filter_map(Message::err).collect()
    }

    /// The namespace the evaluation ended in.
    pub fn ns(&self) -> Option<&str> {
        self.messages.iter().find_map(Message::ns)
    }
}

/// nREPL client bound to one server address.
///
/// Stateless between calls: every operation runs on its own connection, so
/// a single client can serve many concurrent exchanges.
#[derive(Debug, Clone)]
pub struct NReplClient {
    transport: Transport,
}

impl NReplClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            transport: Transport::new(addr),
        }
    }

    pub fn with_timeout(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            transport: Transport::with_timeout(addr, timeout),
        }
    }

    pub fn addr(&self) -> &str {
        self.transport.addr()
    }

    /// Clone a session, optionally from an existing one. Fails if the reply
    /// lacks a `new-session` field.
    pub async fn clone_session(&self, from: Option<&str>) -> Result<String> {
        let messages = self
            .transport
            .exchange(&Request::clone_session(from))
            .await?;

        messages
            .iter()
            .find_map(Message::new_session)
            .map(str::to_string)
            .ok_or_else(|| NReplError::protocol("clone response carried no new-session"))
    }

    /// Release a server-side session. Every session this client opens is
    /// released through here; orphaned sessions accumulate server-side.
    pub async fn close(&self, session: &str) -> Result<Vec<Message>> {
        self.transport.exchange(&Request::close(session)).await
    }

    /// Completion candidates for a symbol prefix. The reply may lack a
    /// `completions` field entirely; that is "no suggestions", not an
    /// error, so the raw first message is returned for the caller to probe.
    pub async fn complete(&self, symbol: &str, ns: &str) -> Result<Message> {
        let messages = self
            .transport
            .exchange(&Request::complete(symbol, ns))
            .await?;
        Ok(first_message(messages))
    }

    /// Symbol metadata (docstring, file, arglists). Absent fields signal
    /// "not found", not an error.
    pub async fn info(&self, symbol: &str, ns: &str, session: Option<&str>) -> Result<Message> {
        let messages = self
            .transport
            .exchange(&Request::info(symbol, ns, session))
            .await?;
        Ok(first_message(messages))
    }

    /// Evaluate code. With an explicit session the caller owns the session
    /// lifecycle. With `None` the client runs the whole causal sequence:
    /// clone, eval, fetch the stacktrace when the server reports `ex`, and
    /// close the session exactly once on every path.
    pub async fn eval(&self, code: &str, session: Option<&str>) -> Result<EvalOutcome> {
        match session {
            Some(session) => {
                let messages = self
                    .transport
                    .exchange(&Request::eval(code, session))
                    .await?;
                Ok(EvalOutcome::new(messages))
            }
            None => {
                self.eval_in_fresh_session(|session| Request::eval(code, session))
                    .await
            }
        }
    }

    /// Evaluate a whole file's contents via `load-file`. Session handling
    /// mirrors [`NReplClient::eval`].
    pub async fn load_file(
        &self,
        contents: &str,
        file_path: &str,
        session: Option<&str>,
    ) -> Result<EvalOutcome> {
        match session {
            Some(session) => {
                let messages = self
                    .transport
                    .exchange(&Request::load_file(contents, file_path, session))
                    .await?;
                Ok(EvalOutcome::new(messages))
            }
            None => {
                self.eval_in_fresh_session(|session| {
                    Request::load_file(contents, file_path, session)
                })
                .await
            }
        }
    }

    /// Stacktrace frames for the last exception in `session`.
    pub async fn stacktrace(&self, session: &str) -> Result<Vec<Message>> {
        self.transport.exchange(&Request::stacktrace(session)).await
    }

    /// Ids of all sessions currently alive on the server.
    pub async fn ls_sessions(&self) -> Result<Vec<String>> {
        let messages = self.transport.exchange(&Request::ls_sessions()).await?;
        Ok(messages
            .iter()
            .find_map(Message::sessions)
            .unwrap_or_default())
    }

    /// Run tests: a single namespace (loading it first) when given, the
    /// whole project otherwise. The sequence carries per-var results and a
    /// summary message; a compilation failure shows up as `ex` in the data.
    pub async fn run_tests(&self, ns: Option<&str>) -> Result<Vec<Message>> {
        let request = match ns {
            Some(ns) => Request::test(ns),
            None => Request::test_all(),
        };
        self.transport.exchange(&request).await
    }

    /// clone → eval → stacktrace-on-`ex` → close. The close runs exactly
    /// once whether the evaluation succeeded, reported an exception, or the
    /// exchange itself failed; a failed stacktrace or close is tolerated
    /// (the primary result still stands).
    async fn eval_in_fresh_session<F>(&self, make_request: F) -> Result<EvalOutcome>
    where
        F: FnOnce(&str) -> Request,
    {
        let session = self.clone_session(None).await?;

        let outcome = match self.transport.exchange(&make_request(&session)).await {
            Ok(messages) => {
                let mut outcome = EvalOutcome::new(messages);
                if outcome.exception().is_some() {
                    match self.stacktrace(&session).await {
                        Ok(frames) => outcome.stacktrace = Some(frames),
                        Err(e) => {
                            tracing::warn!(error = %e, session, "stacktrace fetch failed")
                        }
                    }
                }
                Ok(outcome)
            }
            Err(e) => Err(e),
        };

        if let Err(e) = self.close(&session).await {
            tracing::warn!(error = %e, session, "failed to close session");
        }

        outcome
    }
}

/// Collapse a response sequence to its first message. An exchange always
/// ends with at least the terminal message, so this never invents data.
fn first_message(messages: Vec<Message>) -> Message {
    messages.into_iter().next().unwrap_or_default()
}
