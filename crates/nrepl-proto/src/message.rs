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

//! Request and response model.
//!
//! Requests are a closed set of variants, one per nREPL `op`, so that a
//! malformed operation cannot be expressed. Responses stay generic: the
//! server is free to attach middleware-specific keys, so a [`Message`] is an
//! ordered map of [`Value`]s with typed accessors for the fields the client
//! cares about.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{NReplError, Result};

/// A bencode value as it appears in nREPL traffic.
///
/// nREPL byte-strings are decoded as UTF-8 [`String`]s; a response carrying
/// invalid UTF-8 is rejected by the codec as malformed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

/// One decoded nREPL response message. Immutable once decoded.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message(BTreeMap<String, Value>);

impl Message {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The `status` field as a list of strings; empty when absent.
    pub fn status(&self) -> Vec<&str> {
        self.get("status")
            .and_then(Value::as_list)
            .map(|items| items.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    pub fn has_status(&self, wanted: &str) -> bool {
        self.status().iter().any(|s| *s == wanted)
    }

    pub fn session(&self) -> Option<&str> {
        self.field_str("session")
    }

    pub fn new_session(&self) -> Option<&str> {
        self.field_str("new-session")
    }

    pub fn value(&self) -> Option<&str> {
        self.field_str("value")
    }

    pub fn out(&self) -> Option<&str> {
        self.field_str("out")
    }

    pub fn err(&self) -> Option<&str> {
        self.field_str("err")
    }

    /// The exception summary of a failed evaluation. Its presence is a
    /// normal result variant, not an error of this layer.
    pub fn ex(&self) -> Option<&str> {
        self.field_str("ex")
    }

    pub fn ns(&self) -> Option<&str> {
        self.field_str("ns")
    }

    /// Session ids from an `ls-sessions` reply.
    pub fn sessions(&self) -> Option<Vec<String>> {
        self.get("sessions").and_then(Value::as_list).map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
    }

    /// Completion candidates, when the middleware provided any. `None`
    /// means "no completions available", which callers render as an empty
    /// suggestion list rather than treating as a failure.
    pub fn completions(&self) -> Option<Vec<CompletionCandidate>> {
        self.get("completions").and_then(Value::as_list).map(|items| {
            items
                .iter()
                .filter_map(Value::as_map)
                .map(CompletionCandidate::from_map)
                .collect()
        })
    }
}

impl FromIterator<(String, Value)> for Message {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Message(iter.into_iter().collect())
    }
}

impl From<BTreeMap<String, Value>> for Message {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Message(map)
    }
}

/// A single completion candidate from the `complete` operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionCandidate {
    pub candidate: String,
    pub ns: Option<String>,
    pub candidate_type: Option<String>,
}

impl CompletionCandidate {
    fn from_map(map: &BTreeMap<String, Value>) -> Self {
        let text = |key: &str| {
            map.get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        CompletionCandidate {
            candidate: text("candidate").unwrap_or_default(),
            ns: text("ns"),
            candidate_type: text("type"),
        }
    }
}

/// A client request, one variant per wire `op`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Clone {
        session: Option<String>,
    },
    Close {
        session: String,
    },
    Complete {
        symbol: String,
        ns: String,
    },
    Info {
        symbol: String,
        ns: String,
        session: Option<String>,
    },
    Eval {
        code: String,
        session: String,
    },
    LoadFile {
        file: String,
        file_path: String,
        session: String,
    },
    Stacktrace {
        session: String,
    },
    LsSessions,
    Test {
        ns: String,
    },
    TestAll,
}

impl Request {
    pub fn clone_session(from: Option<&str>) -> Self {
        Request::Clone {
            session: from.map(str::to_string),
        }
    }

    pub fn close(session: &str) -> Self {
        Request::Close {
            session: session.to_string(),
        }
    }

    pub fn complete(symbol: &str, ns: &str) -> Self {
        Request::Complete {
            symbol: symbol.to_string(),
            ns: ns.to_string(),
        }
    }

    pub fn info(symbol: &str, ns: &str, session: Option<&str>) -> Self {
        Request::Info {
            symbol: symbol.to_string(),
            ns: ns.to_string(),
            session: session.map(str::to_string),
        }
    }

    pub fn eval(code: &str, session: &str) -> Self {
        Request::Eval {
            code: code.to_string(),
            session: session.to_string(),
        }
    }

    pub fn load_file(file: &str, file_path: &str, session: &str) -> Self {
        Request::LoadFile {
            file: file.to_string(),
            file_path: file_path.to_string(),
            session: session.to_string(),
        }
    }

    pub fn stacktrace(session: &str) -> Self {
        Request::Stacktrace {
            session: session.to_string(),
        }
    }

    pub fn ls_sessions() -> Self {
        Request::LsSessions
    }

    pub fn test(ns: &str) -> Self {
        Request::Test { ns: ns.to_string() }
    }

    pub fn test_all() -> Self {
        Request::TestAll
    }

    pub fn op(&self) -> &'static str {
        match self {
            Request::Clone { .. } => "clone",
            Request::Close { .. } => "close",
            Request::Complete { .. } => "complete",
            Request::Info { .. } => "info",
            Request::Eval { .. } => "eval",
            Request::LoadFile { .. } => "load-file",
            Request::Stacktrace { .. } => "stacktrace",
            Request::LsSessions => "ls-sessions",
            Request::Test { .. } => "test",
            Request::TestAll => "test-all",
        }
    }

    /// The wire form: an ordered map with absent fields omitted entirely.
    /// Bencode has no null marker distinct from omission.
    pub(crate) fn to_wire(&self) -> BTreeMap<String, Value> {
        let mut map = BTreeMap::new();
        map.insert("op".to_string(), Value::from(self.op()));

        let mut put = |key: &str, value: &str| {
            map.insert(key.to_string(), Value::from(value));
        };

        match self {
            Request::Clone { session } | Request::Info { session, .. } => {
                if let Some(session) = session {
                    put("session", session);
                }
            }
            Request::Close { session } | Request::Stacktrace { session } => {
                put("session", session);
            }
            Request::Eval { code, session } => {
                put("code", code);
                put("session", session);
                put("id", &uuid::Uuid::new_v4().to_string());
            }
            Request::LoadFile {
                file,
                file_path,
                session,
            } => {
                put("file", file);
                put("file-path", file_path);
                put("session", session);
                put("id", &uuid::Uuid::new_v4().to_string());
            }
            Request::LsSessions | Request::TestAll | Request::Complete { .. } | Request::Test { .. } => {}
        }

        match self {
            Request::Complete { symbol, ns } | Request::Info { symbol, ns, .. } => {
                map.insert("symbol".to_string(), Value::from(symbol.as_str()));
                map.insert("ns".to_string(), Value::from(ns.as_str()));
            }
            Request::Test { ns } => {
                map.insert("ns".to_string(), Value::from(ns.as_str()));
                map.insert("load".to_string(), Value::Int(1));
            }
            _ => {}
        }

        map
    }

    /// Construction-time validation, enforced before encoding.
    pub(crate) fn validate(&self) -> Result<()> {
        let session = match self {
            Request::Close { session }
            | Request::Eval { session, .. }
            | Request::LoadFile { session, .. }
            | Request::Stacktrace { session } => Some(session),
            Request::Clone { session } | Request::Info { session, .. } => session.as_ref(),
            _ => None,
        };
        if let Some(session) = session
            && session.is_empty()
        {
            return Err(NReplError::protocol(format!(
                "{} request with empty session id",
                self.op()
            )));
        }

        if let Request::Complete { symbol, .. } | Request::Info { symbol, .. } = self
            && symbol.is_empty()
        {
            return Err(NReplError::protocol(format!(
                "{} request with empty symbol",
                self.op()
            )));
        }

        Ok(())
    }
}
