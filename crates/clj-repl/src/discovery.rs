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

//! ClojureScript session discovery.
//!
//! An nREPL server hosting a ClojureScript REPL exposes it as just another
//! session; nothing in `ls-sessions` says which runtime a session fronts.
//! The only reliable probe is behavioral: evaluate a JavaScript-only
//! expression and see whether it works. Probes run in a throwaway clone of
//! each candidate so the candidate itself is never perturbed, and the
//! clone is always closed again.

use nrepl_proto::{NReplClient, NReplError};

use crate::state::ConnectionState;

/// Evaluates to `42` on a ClojureScript runtime, throws on the JVM.
const CLJS_PROBE: &str = "(js/parseInt \"42\")";

/// Which runtime a file's evaluations should target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Clojure,
    ClojureScript,
}

/// Probe every live session until one evaluates JavaScript. `Ok(None)`
/// means the server hosts no ClojureScript REPL, which is a normal
/// outcome, not an error.
pub async fn find_clojurescript_session(
    client: &NReplClient,
) -> Result<Option<String>, NReplError> {
    let sessions = client.ls_sessions().await?;
    tracing::debug!(count = sessions.len(), "probing sessions for ClojureScript");

    for candidate in sessions {
        if probe_session(client, &candidate).await? {
            tracing::debug!(session = %candidate, "found ClojureScript session");
            return Ok(Some(candidate));
        }
    }
    Ok(None)
}

/// Evaluate the probe in a throwaway clone of `candidate`. An exception is
/// the expected answer on a JVM session; only a transport failure aborts
/// the search.
async fn probe_session(client: &NReplClient, candidate: &str) -> Result<bool, NReplError> {
    let probe = client.clone_session(Some(candidate)).await?;
    let outcome = client.eval(CLJS_PROBE, Some(&probe)).await;

    if let Err(e) = client.close(&probe).await {
        tracing::warn!(error = %e, session = %probe, "failed to close probe session");
    }

    Ok(outcome?.value() == Some("42"))
}

/// Route a file to the session kind that should evaluate it, using (and
/// filling) the state's cached ClojureScript session id. `.cljs` files go
/// to a ClojureScript session when one can be found; everything else runs
/// in the default Clojure context.
pub async fn session_for_file(
    client: &NReplClient,
    state: &ConnectionState,
    file_name: &str,
) -> Result<(SessionKind, Option<String>), NReplError> {
    if !file_name.ends_with(".cljs") {
        return Ok((SessionKind::Clojure, None));
    }

    if let Some(cached) = state.cljs_session() {
        return Ok((SessionKind::ClojureScript, Some(cached)));
    }

    let found = find_clojurescript_session(client).await?;
    state.cache_cljs_session(found.clone());
    Ok((SessionKind::ClojureScript, found))
}
