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

//! Toro TSO
//!
//! The transaction status oracle for a snapshot-isolation transactional
//! layer over a wide-column store: the single authority that hands out
//! transaction timestamps, arbitrates write-write conflicts at commit
//! time, and keeps a compact, recoverable view of recent commits.
//!
//! # Components
//!
//! - [`oracle`]: monotone timestamp allocator, durable in ranges
//! - [`commit_map`]: bounded cell -> last-commit-timestamp map whose
//!   evictions drive the low watermark
//! - [`uncommitted`]: bitmap-bucketed set of open start timestamps
//! - [`journal`]: batched append-only state log; replies gate on its acks
//! - [`state`]: the [`Tso`] aggregate orchestrating all of the above,
//!   including journal replay on startup
//!
//! # Example
//!
//! ```no_run
//! use toro_core::{CellId, TsoConfig};
//! use toro_tso::{CommitOutcome, Tso};
//!
//! # fn main() -> toro_core::Result<()> {
//! let tso = Tso::open("/var/lib/toro", TsoConfig::from_env()?)?;
//!
//! let ts = tso.begin()?;
//! let write_set = [CellId::fingerprint(1, b"row", b"cf", b"col")];
//! match tso.commit(ts, &write_set)?.wait()? {
//!     CommitOutcome::Committed { commit_ts } => {
//!         // record (ts -> commit_ts) in the commit table
//!         let _ = commit_ts;
//!     }
//!     CommitOutcome::Aborted { .. } => {
//!         // roll back, then report tso.full_abort(ts)
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod commit_map;
pub mod journal;
pub mod oracle;
mod recovery;
pub mod state;
pub mod uncommitted;

pub use commit_map::CommitHashMap;
pub use journal::{
    read_records, Completion, FileJournal, JournalStats, NullJournal, StateJournal, StateRecord,
};
pub use oracle::{FileRangeStore, MemoryRangeStore, RangeStore, TimestampOracle};
pub use state::{AbortReason, CommitOutcome, CommitPending, Tso, TsoStats, TsoView};
pub use uncommitted::UncommittedSet;
