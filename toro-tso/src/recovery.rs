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

//! Journal replay
//!
//! Folds a decoded journal tail into a fresh core. Commit records pass
//! through the commit hash map exactly as they did live, so evictions -
//! and therefore the low watermark - replay identically; explicit
//! low-watermark checkpoints fold in on top. Abort records are final by
//! the time they are replayed: the in-epoch half-abort courtesy is not
//! resurrected (readers resolve aborted versions through the external
//! commit table), so they contribute nothing to the rebuilt state.
//!
//! In-flight transactions at crash time left no record and are not
//! re-entered as live; their eventual commit attempt aborts as stale.
//!
//! The oracle is expected to already sit above everything in the journal -
//! its durable range reservations always outrun allocated timestamps.

use tracing::info;

use crate::journal::StateRecord;
use crate::state::TsoCore;

pub(crate) fn replay(core: &mut TsoCore, records: &[StateRecord]) {
    if records.is_empty() {
        return;
    }
    let mut commits = 0u64;
    let mut aborts = 0u64;
    let mut max_commit_ts = 0u64;

    for record in records {
        match record {
            StateRecord::Commit {
                start_ts,
                commit_ts,
                write_set,
            } => {
                let evicted = core.commits.set_committed(*start_ts, *commit_ts, write_set);
                core.advance_watermark(evicted);
                max_commit_ts = max_commit_ts.max(*commit_ts);
                commits += 1;
            }
            StateRecord::Abort { .. } => {
                aborts += 1;
            }
            StateRecord::LowWatermark { watermark } => {
                core.advance_watermark(*watermark);
            }
        }
    }

    debug_assert!(
        core.oracle.first() > max_commit_ts,
        "oracle resumed below the journal tail"
    );
    info!(
        commits,
        aborts,
        low_watermark = core.low_watermark,
        resume_at = core.oracle.first(),
        "journal replay complete"
    );
}

#[cfg(test)]
mod tests {
    use toro_core::{CellId, TsoConfig};

    use crate::journal::{NullJournal, StateRecord};
    use crate::oracle::{MemoryRangeStore, RangeStore, TimestampOracle};
    use crate::state::Tso;

    fn cells(raw: &[u64]) -> Vec<CellId> {
        raw.iter().copied().map(CellId::new).collect()
    }

    fn config() -> TsoConfig {
        TsoConfig {
            max_items: 4,
            max_commits: 64,
            oracle_range: 1_000,
            ..TsoConfig::default()
        }
    }

    fn resumed_oracle(high_water: u64) -> TimestampOracle {
        let mut store = MemoryRangeStore::new();
        store.persist(high_water).unwrap();
        TimestampOracle::new(Box::new(store), 1_000).unwrap()
    }

    #[test]
    fn test_replay_rebuilds_commit_map() {
        let records = vec![
            StateRecord::Commit {
                start_ts: 5,
                commit_ts: 6,
                write_set: cells(&[1, 2]),
            },
            StateRecord::Abort { start_ts: 7 },
        ];
        let tso = Tso::bootstrap(
            &config(),
            resumed_oracle(1_000),
            Box::new(NullJournal::new()),
            &records,
        )
        .unwrap();

        // A new transaction starting below Tc=6 conflicts on the replayed
        // cells exactly as it would have pre-crash. (It cannot arise from
        // this oracle, but the map must still know the answer.)
        let view = tso.view();
        assert!(view.last_ts >= 1_000);
        assert_eq!(view.low_watermark, 0);

        let ts = tso.begin().unwrap();
        let outcome = tso.commit(ts, &cells(&[1])).unwrap().wait().unwrap();
        // Started after the replayed commit: no conflict.
        assert!(matches!(
            outcome,
            crate::state::CommitOutcome::Committed { .. }
        ));
    }

    #[test]
    fn test_replay_restores_watermark_through_evictions() {
        // Capacity 4: six commits force two evictions (Tc 2 and 4).
        let records: Vec<StateRecord> = (0..6u64)
            .map(|i| StateRecord::Commit {
                start_ts: 2 * i + 1,
                commit_ts: 2 * i + 2,
                write_set: cells(&[100 + i]),
            })
            .collect();
        let tso = Tso::bootstrap(
            &config(),
            resumed_oracle(1_000),
            Box::new(NullJournal::new()),
            &records,
        )
        .unwrap();
        assert_eq!(tso.low_watermark(), 4);
    }

    #[test]
    fn test_replay_folds_watermark_checkpoints() {
        let records = vec![
            StateRecord::Commit {
                start_ts: 1,
                commit_ts: 2,
                write_set: cells(&[1]),
            },
            StateRecord::LowWatermark { watermark: 50 },
        ];
        let tso = Tso::bootstrap(
            &config(),
            resumed_oracle(1_000),
            Box::new(NullJournal::new()),
            &records,
        )
        .unwrap();
        assert_eq!(tso.low_watermark(), 50);
    }

    #[test]
    fn test_empty_journal_seeds_watermark_from_oracle() {
        // No journal to replay: everything before this epoch is unknown,
        // so the watermark starts at the oracle's durable frontier.
        let tso = Tso::bootstrap(
            &config(),
            resumed_oracle(1_000),
            Box::new(NullJournal::new()),
            &[],
        )
        .unwrap();
        assert_eq!(tso.low_watermark(), 1_000);
    }
}
