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

//! External nREPL server lifecycle.
//!
//! Starts `lein repl :headless` with the middleware the protocol operations
//! rely on injected via `update-in`, watches stdout for the
//! `nrepl://host:port` announcement, and later tears the whole process
//! group down. Leiningen forks a JVM, so killing only the direct child
//! leaves the server running; the child is put in its own process group at
//! spawn time and the group is signalled as a unit.

use std::path::Path;
use std::process::Stdio;

use lazy_static::lazy_static;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use crate::error::{CljError, Result};
use crate::state::ConnectionInfo;

const LEIN_COMMAND: &str = "lein";

/// Middleware injection. cider-nrepl supplies `complete`, `info`,
/// `stacktrace` and the `test` ops the protocol layer sends.
const LEIN_ARGS: &[&str] = &[
    "update-in",
    ":dependencies",
    "conj",
    "[org.clojure/tools.nrepl \"0.2.12\" :exclusions [org.clojure/clojure]]",
    "--",
    "update-in",
    ":plugins",
    "conj",
    "[refactor-nrepl \"2.3.0-SNAPSHOT\"]",
    "--",
    "update-in",
    ":plugins",
    "conj",
    "[cider/cider-nrepl \"0.15.0-SNAPSHOT\"]",
    "--",
    "repl",
    ":headless",
];

lazy_static! {
    static ref PORT_ANNOUNCEMENT: Regex = Regex::new(r"nrepl://([^\s:/]+):(\d+)").unwrap();
}

/// Handle on a server process this crate started. Dropping the controller
/// without calling [`ReplController::stop`] leaves the server running.
#[derive(Debug, Default)]
pub struct ReplController {
    child: Option<Child>,
}

impl ReplController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }

    /// Spawn the server in `project_dir` and wait for it to announce its
    /// address. Resolves once the announcement line arrives; fails if the
    /// process exits first.
    pub async fn start(&mut self, project_dir: &Path) -> Result<ConnectionInfo> {
        let mut command = Command::new(LEIN_COMMAND);
        command
            .args(LEIN_ARGS)
            .current_dir(project_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CljError::Startup("stdout of nREPL process not captured".into()))?;

        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            tracing::debug!(%line, "nrepl server output");
            if let Some(info) = parse_announcement(&line) {
                tracing::info!(%info, "nrepl server started");
                // Keep draining stdout so the server never blocks on a
                // full pipe.
                tokio::spawn(async move {
                    while let Ok(Some(line)) = lines.next_line().await {
                        tracing::trace!(%line, "nrepl server output");
                    }
                });
                self.child = Some(child);
                return Ok(info);
            }
        }

        let status = child.wait().await?;
        Err(CljError::Startup(format!(
            "nREPL process exited ({status}) before announcing nrepl://host:port"
        )))
    }

    /// Kill the server's process group and reap the child.
    pub async fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        if let Some(pid) = child.id() {
            kill_process_group(pid);
        }
        match child.wait().await {
            Ok(status) => tracing::debug!(%status, "nrepl server stopped"),
            Err(e) => tracing::warn!(error = %e, "failed to reap nrepl server"),
        }
    }
}

/// Pull host and port out of a stdout line like
/// `nREPL server started on port 51837 on host 127.0.0.1 - nrepl://127.0.0.1:51837`.
pub fn parse_announcement(line: &str) -> Option<ConnectionInfo> {
    let captures = PORT_ANNOUNCEMENT.captures(line)?;
    let host = captures.get(1)?.as_str();
    let port: u16 = captures.get(2)?.as_str().parse().ok()?;
    Some(ConnectionInfo::new(host, port))
}

/// Port of a server some other tool already started, read from the
/// project-local `.nrepl-port` file or Leiningen's global
/// `~/.lein/repl-port`.
pub fn local_nrepl_port(project_dir: Option<&Path>) -> Option<u16> {
    if let Some(dir) = project_dir
        && let Some(port) = port_from_file(&dir.join(".nrepl-port"))
    {
        return Some(port);
    }
    port_from_file(&dirs::home_dir()?.join(".lein").join("repl-port"))
}

fn port_from_file(path: &Path) -> Option<u16> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    // The child was spawned with process_group(0), so the group id equals
    // its pid. Negative pid signals the whole group.
    unsafe {
        libc::kill(-(pid as i32), libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn kill_process_group(pid: u32) {
    let _ = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .status();
}
