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

//! # clj-repl
//!
//! Editor-facing layer over [`nrepl_proto`]: one connection descriptor, a
//! controller for servers this process starts itself, ClojureScript
//! session discovery, and light Clojure source scanning.
//!
//! [`CljConnection`] is the front door. It holds the explicit connection
//! state, builds a protocol client per operation, and tears its own state
//! down when the server stops answering.

pub mod controller;
pub mod discovery;
mod error;
pub mod parser;
mod state;

pub use controller::{ReplController, local_nrepl_port};
pub use discovery::SessionKind;
pub use error::{CljError, Result};
pub use state::{ConnectionInfo, ConnectionState};

use std::path::Path;
use std::time::Duration;

use nrepl_proto::{EvalOutcome, Message, NReplClient};

/// Session routing decision for a source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplSession {
    pub kind: SessionKind,
    /// `None` for the default Clojure context, or when no ClojureScript
    /// session could be discovered.
    pub id: Option<String>,
}

/// A connection to one nREPL server, possibly one this object started.
///
/// Operations called while disconnected fail with
/// [`nrepl_proto::NReplError::NotConnected`]. A refused connection during
/// any operation drops the cached descriptor, so the next call reports
/// disconnection instead of hammering a dead address.
pub struct CljConnection {
    state: ConnectionState,
    controller: tokio::sync::Mutex<ReplController>,
    timeout: Duration,
}

impl Default for CljConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl CljConnection {
    pub fn new() -> Self {
        Self::with_timeout(nrepl_proto::DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            state: ConnectionState::new(),
            controller: tokio::sync::Mutex::new(ReplController::new()),
            timeout,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn current(&self) -> Option<ConnectionInfo> {
        self.state.current()
    }

    /// Connect to a running server. The handshake clones and immediately
    /// releases a session, proving the address speaks nREPL before the
    /// descriptor is installed.
    pub async fn connect(&self, host: &str, port: u16) -> Result<()> {
        let info = ConnectionInfo::new(host, port);
        let client = NReplClient::with_timeout(info.addr(), self.timeout);

        let session = client.clone_session(None).await?;
        if let Err(e) = client.close(&session).await {
            tracing::warn!(error = %e, "failed to close handshake session");
        }

        tracing::info!(%info, "connected to nREPL");
        self.state.connect(info);
        Ok(())
    }

    /// Start a server in `project_dir` via the controller, then connect to
    /// the address it announces.
    pub async fn start_and_connect(&self, project_dir: &Path) -> Result<ConnectionInfo> {
        let info = self.controller.lock().await.start(project_dir).await?;
        self.connect(&info.host, info.port).await?;
        Ok(info)
    }

    /// Drop the connection descriptor and stop the server if this object
    /// started it. Returns whether there was a connection to drop.
    pub async fn disconnect(&self) -> bool {
        self.controller.lock().await.stop().await;
        self.state.disconnect()
    }

    pub async fn complete(&self, symbol: &str, ns: &str) -> Result<Message> {
        let client = self.client()?;
        self.guard(client.complete(symbol, ns).await)
    }

    pub async fn info(&self, symbol: &str, ns: &str, session: Option<&str>) -> Result<Message> {
        let client = self.client()?;
        self.guard(client.info(symbol, ns, session).await)
    }

    pub async fn evaluate(&self, code: &str, session: Option<&str>) -> Result<EvalOutcome> {
        let client = self.client()?;
        self.guard(client.eval(code, session).await)
    }

    pub async fn evaluate_file(
        &self,
        contents: &str,
        file_path: &str,
        session: Option<&str>,
    ) -> Result<EvalOutcome> {
        let client = self.client()?;
        self.guard(client.load_file(contents, file_path, session).await)
    }

    pub async fn stacktrace(&self, session: &str) -> Result<Vec<Message>> {
        let client = self.client()?;
        self.guard(client.stacktrace(session).await)
    }

    /// Close a session. With `None`, closes the cached ClojureScript
    /// session (when there is one) and clears the cache.
    pub async fn close(&self, session: Option<&str>) -> Result<Vec<Message>> {
        let client = self.client()?;
        match session {
            Some(session) => self.guard(client.close(session).await),
            None => {
                let Some(cached) = self.state.cljs_session() else {
                    return Ok(Vec::new());
                };
                let result = self.guard(client.close(&cached).await);
                self.state.cache_cljs_session(None);
                result
            }
        }
    }

    pub async fn list_sessions(&self) -> Result<Vec<String>> {
        let client = self.client()?;
        self.guard(client.ls_sessions().await)
    }

    /// Run tests in one namespace, or the whole project with `None`.
    pub async fn run_tests(&self, ns: Option<&str>) -> Result<Vec<Message>> {
        let client = self.client()?;
        self.guard(client.run_tests(ns).await)
    }

    /// Decide which session should evaluate `file_name`, discovering and
    /// caching the ClojureScript session on first use.
    pub async fn session_for_file(&self, file_name: &str) -> Result<ReplSession> {
        let client = self.client()?;
        let (kind, id) =
            self.guard(discovery::session_for_file(&client, &self.state, file_name).await)?;
        Ok(ReplSession { kind, id })
    }

    fn client(&self) -> Result<NReplClient> {
        let info = self
            .state
            .current()
            .ok_or(nrepl_proto::NReplError::NotConnected)?;
        Ok(NReplClient::with_timeout(info.addr(), self.timeout))
    }

    /// A refused connection means the descriptor points at a dead server;
    /// drop it so callers see a clean disconnected state.
    fn guard<T>(&self, result: nrepl_proto::Result<T>) -> Result<T> {
        if let Err(e) = &result
            && e.is_connection_refused()
        {
            tracing::warn!(error = %e, "connection refused, dropping connection state");
            self.state.disconnect();
        }
        result.map_err(Into::into)
    }
}
