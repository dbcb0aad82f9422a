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

use nrepl_proto::NReplError;

pub type Result<T> = std::result::Result<T, CljError>;

#[derive(Debug, thiserror::Error)]
pub enum CljError {
    /// Protocol-layer failure, forwarded as-is.
    #[error(transparent)]
    Nrepl(#[from] NReplError),

    /// The external nREPL process could not be started or never announced
    /// an address to connect to.
    #[error("nREPL startup failed: {0}")]
    Startup(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CljError {
    /// True when the underlying failure was a refused TCP connection, the
    /// signal that cached connection state points at a dead server.
    pub fn is_connection_refused(&self) -> bool {
        match self {
            CljError::Nrepl(e) => e.is_connection_refused(),
            CljError::Io(e) => e.kind() == std::io::ErrorKind::ConnectionRefused,
            CljError::Startup(_) => false,
        }
    }
}
