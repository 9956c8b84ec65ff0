// SPDX-License-Identifier: AGPL-3.0-or-later
// Toro - Transaction Status Oracle for Wide-Column Stores
// Copyright (C) 2026 Toro Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Error types for Toro
//!
//! Conflicts and stale transactions are *not* errors: they are expected
//! commit outcomes and surface as `Aborted` replies. The variants here are
//! either fatal (journal/oracle durability lost, the epoch must end) or
//! programming/operational faults (bad configuration, corrupt journal).

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TsoError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The state journal can no longer persist records. Fatal: no further
    /// client replies are released and the epoch must be restarted.
    #[error("state journal unavailable: {0}")]
    JournalUnavailable(String),

    /// A fresh timestamp range could not be durably reserved. Fatal.
    #[error("timestamp range reservation failed: {0}")]
    OracleRangeFailure(String),

    /// The journal contains a damaged record before its tail. A torn tail
    /// (truncated final record) is tolerated during replay; this is not.
    #[error("corrupt journal record at offset {offset}: {reason}")]
    CorruptRecord { offset: u64, reason: String },

    #[error("oracle is shut down")]
    Shutdown,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, TsoError>;
