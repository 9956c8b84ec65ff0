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

//! Crash-recovery and property tests: oracle monotonicity across restarts,
//! conflict soundness under random interleavings, watermark monotonicity,
//! and replay equivalence of the durable state.

use std::collections::HashSet;
use std::time::Duration;

use proptest::prelude::*;

use toro_core::{CellId, Timestamp, TsoConfig};
use toro_tso::{AbortReason, CommitOutcome, FileRangeStore, TimestampOracle, Tso};

fn cells(raw: &[u64]) -> Vec<CellId> {
    raw.iter().copied().map(CellId::new).collect()
}

fn small_config() -> TsoConfig {
    TsoConfig {
        max_items: 4,
        max_commits: 64,
        oracle_range: 10_000,
        // Keep journal-gated replies snappy under hundreds of commits.
        flush_timeout: Duration::from_millis(1),
        ..TsoConfig::default()
    }
}

fn commit_ts(tso: &Tso, start_ts: Timestamp, write_set: &[CellId]) -> Timestamp {
    match tso.commit(start_ts, write_set).unwrap().wait().unwrap() {
        CommitOutcome::Committed { commit_ts } => commit_ts,
        other => panic!("expected commit, got {other:?}"),
    }
}

fn abort_reason(tso: &Tso, start_ts: Timestamp, write_set: &[CellId]) -> AbortReason {
    match tso.commit(start_ts, write_set).unwrap().wait().unwrap() {
        CommitOutcome::Aborted { reason } => reason,
        other => panic!("expected abort, got {other:?}"),
    }
}

#[test]
fn recovery_restores_view_and_conflict_memory() {
    let dir = tempfile::tempdir().unwrap();
    let config = TsoConfig {
        max_items: 32,
        ..small_config()
    };
    let h1 = CellId::new(1);
    let h2 = CellId::new(2);

    let (pre_l, pre_h1, pre_h2, pre_last, in_flight) = {
        let tso = Tso::open(dir.path(), config.clone()).unwrap();
        // A clean commit on two cells.
        let t1 = tso.begin().unwrap();
        commit_ts(&tso, t1, &[h1, h2]);
        // A conflict pair on h1: the later-ordered commit loses.
        let t2 = tso.begin().unwrap();
        let t3 = tso.begin().unwrap();
        commit_ts(&tso, t3, &[h1]);
        assert_eq!(abort_reason(&tso, t2, &[h1]), AbortReason::Conflict);
        // One transaction is still open at crash time.
        let in_flight = tso.begin().unwrap();

        let snapshot = (
            tso.low_watermark(),
            tso.latest_write(h1),
            tso.latest_write(h2),
            tso.view().last_ts,
            in_flight,
        );
        tso.shutdown();
        snapshot
    };

    let tso = Tso::open(dir.path(), config).unwrap();

    // The durable state survived: watermark and per-cell commit memory.
    assert_eq!(tso.low_watermark(), pre_l);
    assert_eq!(tso.latest_write(h1), pre_h1);
    assert_eq!(tso.latest_write(h2), pre_h2);

    // The oracle resumed strictly above everything the old epoch served.
    let ts = tso.begin().unwrap();
    assert!(ts > pre_last);

    // The pre-crash in-flight transaction left no record; its commit
    // attempt is refused rather than checked against lost context.
    assert_eq!(
        abort_reason(&tso, in_flight, &[h1]),
        AbortReason::Stale
    );
    tso.shutdown();
}

#[test]
fn aborted_blockers_are_final_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = small_config();
    let contended = CellId::new(9);

    let loser = {
        let tso = Tso::open(dir.path(), config.clone()).unwrap();
        let winner = tso.begin().unwrap();
        let loser = tso.begin().unwrap();
        commit_ts(&tso, winner, &[contended]);
        assert_eq!(abort_reason(&tso, loser, &[contended]), AbortReason::Conflict);
        // No full-abort report before the crash: the cell is blocked.
        tso.shutdown();
        loser
    };

    let tso = Tso::open(dir.path(), config).unwrap();
    // Replay treats the abort as final; the block is not resurrected and a
    // fresh writer gets through. Readers resolve the loser's dirty version
    // through the commit table, where it never appears.
    let retry = tso.begin().unwrap();
    let tc = commit_ts(&tso, retry, &[contended]);
    assert!(tc > retry);
    // The stale full-abort report is still accepted quietly.
    tso.full_abort(loser).unwrap();
    tso.shutdown();
}

#[test]
fn torn_journal_tail_does_not_block_startup() {
    let dir = tempfile::tempdir().unwrap();
    let config = small_config();
    let h = CellId::new(5);

    {
        let tso = Tso::open(dir.path(), config.clone()).unwrap();
        let t1 = tso.begin().unwrap();
        commit_ts(&tso, t1, &[h]);
        let t2 = tso.begin().unwrap();
        commit_ts(&tso, t2, &[CellId::new(6)]);
        tso.shutdown();
    }

    // Crash mid-append: the final frame is torn.
    let journal = dir.path().join("state.journal");
    let len = std::fs::metadata(&journal).unwrap().len();
    let file = std::fs::OpenOptions::new().write(true).open(&journal).unwrap();
    file.set_len(len - 3).unwrap();
    drop(file);

    let tso = Tso::open(dir.path(), config).unwrap();
    // The first commit survived; the torn one is gone, which is exactly
    // what an unacknowledged reply permits.
    assert!(tso.latest_write(h).is_some());
    let ts = tso.begin().unwrap();
    commit_ts(&tso, ts, &[CellId::new(7)]);
    tso.shutdown();
}

#[test]
fn oracle_outputs_increase_across_many_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("oracle.ranges");
    let mut previous = 0u64;
    for round in 0..5 {
        let store = FileRangeStore::open(&path).unwrap();
        let mut oracle = TimestampOracle::new(Box::new(store), 64).unwrap();
        for _ in 0..(round * 37 + 5) {
            let ts = oracle.next().unwrap();
            assert!(ts > previous, "restart {round}: {ts} <= {previous}");
            previous = ts;
        }
    }
}

#[derive(Debug, Clone)]
enum Op {
    Begin(Vec<u64>),
    Commit(prop::sample::Index),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        prop::collection::vec(0u64..6, 0..4).prop_map(Op::Begin),
        any::<prop::sample::Index>().prop_map(Op::Commit),
    ]
}

/// Drive a random interleaving, asserting watermark monotonicity along the
/// way; returns every successful commit as `(start, commit, write set)`.
fn run_workload(tso: &Tso, ops: &[Op]) -> Vec<(Timestamp, Timestamp, HashSet<u64>)> {
    let mut open: Vec<(Timestamp, Vec<u64>)> = Vec::new();
    let mut committed = Vec::new();
    let mut watermark = tso.low_watermark();

    for op in ops {
        match op {
            Op::Begin(write_set) => {
                let ts = tso.begin().unwrap();
                open.push((ts, write_set.clone()));
            }
            Op::Commit(index) => {
                if open.is_empty() {
                    continue;
                }
                let (ts, raw_set) = open.remove(index.index(open.len()));
                let write_set = cells(&raw_set);
                match tso.commit(ts, &write_set).unwrap().wait().unwrap() {
                    CommitOutcome::Committed { commit_ts } => {
                        committed.push((ts, commit_ts, raw_set.into_iter().collect()));
                    }
                    CommitOutcome::Aborted { .. } => {
                        tso.full_abort(ts).unwrap();
                    }
                }
            }
        }
        let now = tso.low_watermark();
        assert!(now >= watermark, "watermark regressed: {now} < {watermark}");
        watermark = now;
    }
    committed
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Conflict soundness: of any two committed transactions whose write
    /// sets intersect, the earlier-started one must have committed before
    /// the later one's conflict check could have missed it. Formally, no
    /// committed pair may satisfy `ts_i < tc_j < tc_i` with overlapping
    /// write sets.
    #[test]
    fn prop_overlapping_commits_are_serialized(
        ops in prop::collection::vec(op_strategy(), 1..80),
    ) {
        // Tiny capacity so eviction and staleness paths run hot too.
        let tso = Tso::in_memory(&small_config()).unwrap();
        let committed = run_workload(&tso, &ops);

        for (i, (ts_i, tc_i, set_i)) in committed.iter().enumerate() {
            for (j, (_, tc_j, set_j)) in committed.iter().enumerate() {
                if i == j {
                    continue;
                }
                if ts_i < tc_j && tc_j < tc_i {
                    prop_assert!(
                        set_i.is_disjoint(set_j),
                        "overlapping commits interleaved: ({ts_i},{tc_i}) vs tc {tc_j}",
                    );
                }
            }
        }
    }

    /// Every timestamp the TSO hands out is strictly larger than every
    /// earlier one, across begins and commits alike.
    #[test]
    fn prop_timestamps_strictly_increase(
        ops in prop::collection::vec(op_strategy(), 1..60),
    ) {
        let tso = Tso::in_memory(&small_config()).unwrap();
        let mut last_seen = 0u64;
        let mut open: Vec<(Timestamp, Vec<u64>)> = Vec::new();
        for op in &ops {
            match op {
                Op::Begin(write_set) => {
                    let ts = tso.begin().unwrap();
                    prop_assert!(ts > last_seen);
                    last_seen = ts;
                    open.push((ts, write_set.clone()));
                }
                Op::Commit(index) => {
                    if open.is_empty() {
                        continue;
                    }
                    let (ts, raw_set) = open.remove(index.index(open.len()));
                    if let CommitOutcome::Committed { commit_ts } =
                        tso.commit(ts, &cells(&raw_set)).unwrap().wait().unwrap()
                    {
                        prop_assert!(commit_ts > last_seen);
                        last_seen = commit_ts;
                    }
                }
            }
        }
    }

    /// Replaying the journal reproduces the durable view: watermark,
    /// per-cell commit memory, and an oracle strictly above the old epoch.
    #[test]
    fn prop_recovery_reproduces_durable_state(
        write_sets in prop::collection::vec(
            prop::collection::hash_set(0u64..12, 1..4),
            5..40,
        ),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let config = small_config();

        let (pre_l, pre_writes, pre_last) = {
            let tso = Tso::open(dir.path(), config.clone()).unwrap();
            for write_set in &write_sets {
                let raw: Vec<u64> = write_set.iter().copied().collect();
                let ts = tso.begin().unwrap();
                // Sequential transactions never overlap, so each commits.
                commit_ts(&tso, ts, &cells(&raw));
            }
            let pre_writes: Vec<Option<Timestamp>> =
                (0..12).map(|c| tso.latest_write(CellId::new(c))).collect();
            let snapshot = (tso.low_watermark(), pre_writes, tso.view().last_ts);
            tso.shutdown();
            snapshot
        };

        let tso = Tso::open(dir.path(), config).unwrap();
        prop_assert_eq!(tso.low_watermark(), pre_l);
        for (c, expected) in pre_writes.iter().enumerate() {
            prop_assert_eq!(&tso.latest_write(CellId::new(c as u64)), expected);
        }
        let ts = tso.begin().unwrap();
        prop_assert!(ts > pre_last);
        tso.shutdown();
    }
}
