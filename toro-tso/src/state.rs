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

//! Transaction state machine
//!
//! [`Tso`] is the single owning aggregate: oracle, commit hash map,
//! uncommitted set, and the low watermark all live behind one mutex, so
//! every request observes the outcome of every earlier-ordered request -
//! in particular, the `(allocate commit timestamp, write commit map)`
//! critical section of a commit is linearized against all others, which is
//! what makes first-committer-wins sound.
//!
//! Replies are two-phase: `commit` decides the outcome and enqueues the
//! journal record under the lock, then returns a [`CommitPending`] that
//! resolves only after the journal acknowledges durability. Begin and
//! full-abort have no journal record and reply immediately.
//!
//! A journal or oracle failure is fatal: the aggregate poisons itself,
//! every later operation fails fast, and a supervisor is expected to start
//! a new epoch.

use std::path::Path;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use toro_core::{CellId, Result, Timestamp, TsoConfig, TsoError};

use crate::commit_map::CommitHashMap;
use crate::journal::{
    read_records, Completion, FileJournal, NullJournal, StateJournal, StateRecord,
};
use crate::oracle::{FileRangeStore, MemoryRangeStore, TimestampOracle};
use crate::recovery;
use crate::uncommitted::UncommittedSet;

/// Why a commit request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// A cell in the write set was committed past the transaction's start
    /// timestamp (or is held by an unresolved aborted transaction).
    Conflict,
    /// The transaction started below the low watermark (or is no longer
    /// tracked as live); its conflicts can no longer be checked.
    Stale,
}

/// Outcome of a commit request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed { commit_ts: Timestamp },
    Aborted { reason: AbortReason },
}

/// A decided commit whose reply is gated on journal durability.
#[must_use = "the outcome must not be released before the journal ack"]
pub struct CommitPending {
    outcome: CommitOutcome,
    completion: Completion,
}

impl CommitPending {
    /// Block until the journal record is durable, then release the outcome.
    pub fn wait(self) -> Result<CommitOutcome> {
        self.completion.wait()?;
        Ok(self.outcome)
    }
}

/// Operation counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct TsoStats {
    pub begins: u64,
    pub commits: u64,
    pub conflict_aborts: u64,
    pub stale_aborts: u64,
    pub full_aborts: u64,
    /// Transactions force-aborted because their uncommitted-set bucket was
    /// recycled before the client resolved them.
    pub recycled_aborts: u64,
    pub watermark_advances: u64,
}

/// Snapshot of the TSO's public view, broadcast to clients out of band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TsoView {
    /// Commits at or below this timestamp must be resolved against the
    /// external commit table.
    pub low_watermark: Timestamp,
    /// Last timestamp handed out.
    pub last_ts: Timestamp,
}

enum Fatal {
    Journal(String),
    Oracle(String),
    Shutdown,
}

impl Fatal {
    fn to_error(&self) -> TsoError {
        match self {
            Fatal::Journal(reason) => TsoError::JournalUnavailable(reason.clone()),
            Fatal::Oracle(reason) => TsoError::OracleRangeFailure(reason.clone()),
            Fatal::Shutdown => TsoError::Shutdown,
        }
    }
}

pub(crate) struct TsoCore {
    pub(crate) oracle: TimestampOracle,
    pub(crate) commits: CommitHashMap,
    pub(crate) uncommitted: UncommittedSet,
    pub(crate) low_watermark: Timestamp,
    pub(crate) stats: TsoStats,
    fatal: Option<Fatal>,
}

impl TsoCore {
    /// Fold an eviction watermark candidate into the low watermark.
    /// Returns true when the watermark advanced.
    pub(crate) fn advance_watermark(&mut self, candidate: Timestamp) -> bool {
        if candidate > self.low_watermark {
            self.low_watermark = candidate;
            self.commits.release_below(candidate);
            self.stats.watermark_advances += 1;
            true
        } else {
            false
        }
    }

    fn check_fatal(&self) -> Result<()> {
        match &self.fatal {
            Some(fatal) => Err(fatal.to_error()),
            None => Ok(()),
        }
    }

    fn poison(&mut self, error: &TsoError) {
        if self.fatal.is_some() {
            return;
        }
        warn!(error = %error, "fatal failure; poisoning TSO epoch");
        self.fatal = Some(match error {
            TsoError::OracleRangeFailure(reason) => Fatal::Oracle(reason.clone()),
            TsoError::Shutdown => Fatal::Shutdown,
            other => Fatal::Journal(other.to_string()),
        });
    }
}

/// The transaction status oracle.
pub struct Tso {
    core: Mutex<TsoCore>,
    journal: Box<dyn StateJournal>,
}

impl Tso {
    /// Assemble a TSO from parts and replay a journal tail into it.
    ///
    /// `records` is the decoded journal (empty for a fresh epoch). The
    /// low watermark seeds from the oracle's durable frontier when there is
    /// no journal to replay, and from the replayed state otherwise.
    pub fn bootstrap(
        config: &TsoConfig,
        oracle: TimestampOracle,
        journal: Box<dyn StateJournal>,
        records: &[StateRecord],
    ) -> Result<Tso> {
        config.validate()?;
        let initial_watermark = if records.is_empty() { oracle.get() } else { 0 };
        let uncommitted =
            UncommittedSet::new(oracle.first(), config.bucket_count(), config.bucket_size());
        let mut core = TsoCore {
            commits: CommitHashMap::new(config.max_items, initial_watermark),
            uncommitted,
            low_watermark: initial_watermark,
            stats: TsoStats::default(),
            fatal: None,
            oracle,
        };
        recovery::replay(&mut core, records);
        Ok(Tso {
            core: Mutex::new(core),
            journal,
        })
    }

    /// Open a durable TSO under `dir`: oracle ranges in `oracle.ranges`,
    /// state journal in `state.journal`. Replays any existing journal.
    pub fn open(dir: impl AsRef<Path>, config: TsoConfig) -> Result<Tso> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let journal_path = dir.join("state.journal");
        let records = read_records(&journal_path)?;
        let store = FileRangeStore::open(dir.join("oracle.ranges"))?;
        let oracle = TimestampOracle::new(Box::new(store), config.oracle_range)?;
        let journal = FileJournal::open(&journal_path, &config)?;
        info!(dir = %dir.display(), replayed = records.len(), "opening TSO");
        Self::bootstrap(&config, oracle, Box::new(journal), &records)
    }

    /// A TSO with no durability at all: memory-backed oracle, no-op
    /// journal. For tests and embedded arbitration.
    pub fn in_memory(config: &TsoConfig) -> Result<Tso> {
        let oracle =
            TimestampOracle::new(Box::new(MemoryRangeStore::new()), config.oracle_range)?;
        Self::bootstrap(config, oracle, Box::new(NullJournal::new()), &[])
    }

    /// Begin a transaction: allocate its start timestamp and mark it live.
    pub fn begin(&self) -> Result<Timestamp> {
        let mut core = self.core.lock();
        core.check_fatal()?;
        let start_ts = match core.oracle.next() {
            Ok(ts) => ts,
            Err(e) => {
                core.poison(&e);
                return Err(e);
            }
        };
        let stragglers = core.uncommitted.start(start_ts);
        for abandoned in stragglers {
            // The client disappeared without resolving this transaction;
            // record the abort so replay agrees it never committed.
            core.stats.recycled_aborts += 1;
            self.append_or_poison(
                &mut core,
                &StateRecord::Abort {
                    start_ts: abandoned,
                },
            )?;
        }
        core.stats.begins += 1;
        Ok(start_ts)
    }

    /// Decide a commit request.
    ///
    /// The returned [`CommitPending`] resolves after the decision is
    /// durable; the caller must not reveal the outcome earlier.
    pub fn commit(&self, start_ts: Timestamp, write_set: &[CellId]) -> Result<CommitPending> {
        let mut core = self.core.lock();
        core.check_fatal()?;

        // Stale start: below the watermark its conflicts are unverifiable;
        // if it is not tracked as live it was already resolved (or its
        // bucket recycled, or it predates a restart).
        let stale =
            start_ts < core.low_watermark || !core.uncommitted.is_uncommitted(start_ts);
        // A write past the start timestamp is a genuine conflict; a cell
        // held by an unresolved abort blocks too, but must not chain a new
        // block of its own (the final commit after the full-abort report
        // would otherwise never get through).
        let committed_conflict = !stale
            && write_set.iter().any(|&cell| {
                matches!(core.commits.latest_write(cell), Some(prev) if prev > start_ts)
            });
        let blocked_conflict = !stale
            && !committed_conflict
            && write_set.iter().any(|&cell| core.commits.is_blocked(cell));

        if !stale && !committed_conflict && !blocked_conflict {
            let commit_ts = match core.oracle.next() {
                Ok(ts) => ts,
                Err(e) => {
                    core.poison(&e);
                    return Err(e);
                }
            };
            let evicted = core.commits.set_committed(start_ts, commit_ts, write_set);
            core.uncommitted.committed(start_ts);
            let completion = self.append_or_poison(
                &mut core,
                &StateRecord::Commit {
                    start_ts,
                    commit_ts,
                    write_set: write_set.to_vec(),
                },
            )?;
            if core.advance_watermark(evicted) {
                // Rides in the same batch as (or later than) the commit
                // that caused the eviction, so a recovered watermark never
                // outruns the commits below it.
                let low_watermark = core.low_watermark;
                self.append_or_poison(
                    &mut core,
                    &StateRecord::LowWatermark {
                        watermark: low_watermark,
                    },
                )?;
            }
            core.stats.commits += 1;
            Ok(CommitPending {
                outcome: CommitOutcome::Committed { commit_ts },
                completion,
            })
        } else {
            let reason = if stale {
                core.stats.stale_aborts += 1;
                AbortReason::Stale
            } else {
                core.stats.conflict_aborts += 1;
                AbortReason::Conflict
            };
            if committed_conflict {
                // The client may have dirtied these cells already; keep
                // them as conflict blockers until it confirms cleanup.
                core.commits.set_half_aborted(start_ts, write_set);
            }
            core.uncommitted.abort(start_ts);
            let completion =
                self.append_or_poison(&mut core, &StateRecord::Abort { start_ts })?;
            Ok(CommitPending {
                outcome: CommitOutcome::Aborted { reason },
                completion,
            })
        }
    }

    /// The client finished cleaning up an aborted transaction; stop
    /// blocking its cells. Idempotent, no journal record (the abort
    /// itself is already durable).
    pub fn full_abort(&self, start_ts: Timestamp) -> Result<()> {
        let mut core = self.core.lock();
        core.check_fatal()?;
        core.commits.set_full_aborted(start_ts);
        core.stats.full_aborts += 1;
        Ok(())
    }

    /// Commits at or below the low watermark are unknown to this TSO;
    /// clients resolve them against the external commit table.
    pub fn low_watermark(&self) -> Timestamp {
        self.core.lock().low_watermark
    }

    /// The TSO-served view of a cell's most recent commit timestamp, if it
    /// is still above the eviction horizon. Readers consult this for
    /// versions stamped above the low watermark and fall back to the
    /// external commit table below it.
    pub fn latest_write(&self, cell: CellId) -> Option<Timestamp> {
        self.core.lock().commits.latest_write(cell)
    }

    /// Snapshot for the periodic out-of-band broadcast.
    pub fn view(&self) -> TsoView {
        let core = self.core.lock();
        TsoView {
            low_watermark: core.low_watermark,
            last_ts: core.oracle.get(),
        }
    }

    pub fn stats(&self) -> TsoStats {
        self.core.lock().stats
    }

    /// Flush and close the journal; all later operations fail with
    /// [`TsoError::Shutdown`].
    pub fn shutdown(&self) {
        {
            let mut core = self.core.lock();
            if core.fatal.is_none() {
                core.fatal = Some(Fatal::Shutdown);
            }
        }
        if let Err(e) = self.journal.flush() {
            warn!(error = %e, "journal flush during shutdown failed");
        }
        self.journal.shutdown();
    }

    fn append_or_poison(&self, core: &mut TsoCore, record: &StateRecord) -> Result<Completion> {
        match self.journal.append(record) {
            Ok(completion) => Ok(completion),
            Err(e) => {
                core.poison(&e);
                Err(e)
            }
        }
    }
}
