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

//! Connection state.
//!
//! One explicit object holds the current connection descriptor plus the
//! cached ClojureScript session id. No globals: whoever owns the state
//! decides its scope. Updates are whole-value swaps under a mutex, so
//! readers never observe a half-written descriptor.

use std::sync::Mutex;

/// Where the nREPL server lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub host: String,
    pub port: u16,
}

impl ConnectionInfo {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "nrepl://{}:{}", self.host, self.port)
    }
}

#[derive(Debug)]
struct Connected {
    info: ConnectionInfo,
    cljs_session: Option<String>,
}

/// Mutable connection descriptor shared by everything layered on top.
#[derive(Debug, Default)]
pub struct ConnectionState {
    inner: Mutex<Option<Connected>>,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a new descriptor, replacing any previous one atomically.
    /// The ClojureScript session cache starts empty for a new server.
    pub fn connect(&self, info: ConnectionInfo) {
        let mut inner = self.inner.lock().unwrap();
        *inner = Some(Connected {
            info,
            cljs_session: None,
        });
    }

    /// Drop the descriptor. Returns whether there was one to drop.
    pub fn disconnect(&self) -> bool {
        self.inner.lock().unwrap().take().is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock().unwrap().is_some()
    }

    pub fn current(&self) -> Option<ConnectionInfo> {
        self.inner.lock().unwrap().as_ref().map(|c| c.info.clone())
    }

    pub fn cljs_session(&self) -> Option<String> {
        self.inner
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|c| c.cljs_session.clone())
    }

    /// Cache (or clear) the discovered ClojureScript session id. A no-op
    /// when disconnected: a stale discovery result must not resurrect state.
    pub fn cache_cljs_session(&self, session: Option<String>) {
        if let Some(connected) = self.inner.lock().unwrap().as_mut() {
            connected.cljs_session = session;
        }
    }
}
