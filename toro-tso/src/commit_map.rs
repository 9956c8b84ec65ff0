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

//! Commit hash map
//!
//! A bounded, approximate "last commit timestamp per written cell" map. It
//! answers the commit-time conflict check in O(1) average and, because it is
//! bounded, continuously sheds its oldest entries: the largest commit
//! timestamp ever evicted is the map's contribution to the TSO low
//! watermark. Anything at or below that watermark is simply unknown here -
//! the state machine aborts transactions too old to be checked.
//!
//! Layout: closed addressing over a power-of-two bucket array (kept at
//! load factor <= 0.5) with `SmallVec` chains, plus an insertion-order ring
//! of `{start_ts, commit_ts, cell}`. Commit timestamps are monotonic, so
//! insertion order *is* commit-timestamp order and the ring head is always
//! the oldest-by-Tc entry. Ring entries whose cell has since been
//! overwritten are stale: eviction skips (and discards) them, and the ring
//! is compacted down to its live entries whenever it outgrows twice the
//! map's capacity, so it stays O(capacity) even under overwrite-heavy
//! workloads that never evict.
//!
//! The map also carries the half-abort side table: write sets of aborted
//! transactions whose clients have not yet confirmed cleanup. A cell with a
//! live half-abort on it blocks every later commit touching it - possibly a
//! false conflict, never a false commit.

use std::collections::{HashMap, VecDeque};

use smallvec::SmallVec;

use toro_core::{CellId, Timestamp};

#[derive(Debug, Clone, Copy)]
struct Slot {
    cell: CellId,
    commit_ts: Timestamp,
}

#[derive(Debug, Clone, Copy)]
struct RingEntry {
    #[allow(dead_code)]
    start_ts: Timestamp,
    commit_ts: Timestamp,
    cell: CellId,
}

pub struct CommitHashMap {
    buckets: Box<[SmallVec<[Slot; 2]>]>,
    mask: u64,
    /// Live cells in the map; bounded by `capacity`.
    len: usize,
    capacity: usize,
    /// Insertion-order (= Tc-order) ring driving eviction.
    ring: VecDeque<RingEntry>,
    /// Largest commit timestamp ever evicted; seeded with the epoch's
    /// initial watermark.
    largest_evicted: Timestamp,
    /// Half-aborted transactions: start timestamp -> written cells.
    half_aborted: HashMap<Timestamp, Vec<CellId>>,
    /// Cells with at least one live half-abort, refcounted.
    blocked: HashMap<CellId, u32>,
}

impl CommitHashMap {
    pub fn new(capacity: usize, initial_watermark: Timestamp) -> Self {
        let capacity = capacity.max(1);
        // Load factor <= 0.5: twice as many buckets as entries.
        let bucket_count = (capacity * 2).next_power_of_two();
        let buckets = (0..bucket_count)
            .map(|_| SmallVec::new())
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            buckets,
            mask: bucket_count as u64 - 1,
            len: 0,
            capacity,
            ring: VecDeque::with_capacity(capacity),
            largest_evicted: initial_watermark,
            half_aborted: HashMap::new(),
            blocked: HashMap::new(),
        }
    }

    fn bucket_of(&self, cell: CellId) -> usize {
        (cell.raw() & self.mask) as usize
    }

    /// Last recorded commit timestamp for `cell`, if it is still in the map.
    pub fn latest_write(&self, cell: CellId) -> Option<Timestamp> {
        self.buckets[self.bucket_of(cell)]
            .iter()
            .find(|slot| slot.cell == cell)
            .map(|slot| slot.commit_ts)
    }

    /// Is `cell` blocked by a half-aborted transaction?
    pub fn is_blocked(&self, cell: CellId) -> bool {
        self.blocked.contains_key(&cell)
    }

    /// Record a commit: stamp every cell of the write set with `commit_ts`,
    /// evicting oldest-by-Tc entries when at capacity. Returns the largest
    /// commit timestamp ever evicted (the watermark candidate).
    ///
    /// `commit_ts` must be larger than every previously recorded commit
    /// timestamp - the oracle guarantees this.
    pub fn set_committed(
        &mut self,
        start_ts: Timestamp,
        commit_ts: Timestamp,
        write_set: &[CellId],
    ) -> Timestamp {
        for &cell in write_set {
            let bucket = self.bucket_of(cell);
            if let Some(slot) = self.buckets[bucket]
                .iter_mut()
                .find(|slot| slot.cell == cell)
            {
                debug_assert!(slot.commit_ts <= commit_ts);
                slot.commit_ts = commit_ts;
            } else {
                if self.len == self.capacity {
                    self.evict_oldest();
                }
                self.buckets[self.bucket_of(cell)].push(Slot { cell, commit_ts });
                self.len += 1;
            }
            self.ring.push_back(RingEntry {
                start_ts,
                commit_ts,
                cell,
            });
            if self.ring.len() > self.capacity * 2 {
                self.compact_ring();
            }
        }
        self.largest_evicted
    }

    /// Drop stale ring entries, keeping only the entry that currently owns
    /// each cell. Runs after at least `capacity` pushes, so the scan is
    /// O(1) amortized and the ring never exceeds `2 * capacity`.
    fn compact_ring(&mut self) {
        let buckets = &self.buckets;
        let mask = self.mask;
        self.ring.retain(|entry| {
            let bucket = (entry.cell.raw() & mask) as usize;
            buckets[bucket]
                .iter()
                .any(|slot| slot.cell == entry.cell && slot.commit_ts == entry.commit_ts)
        });
    }

    /// Drop the oldest live entry by commit timestamp, skipping stale ring
    /// entries for cells that have since been overwritten.
    fn evict_oldest(&mut self) {
        while let Some(oldest) = self.ring.pop_front() {
            let bucket = self.bucket_of(oldest.cell);
            let chain = &mut self.buckets[bucket];
            if let Some(pos) = chain
                .iter()
                .position(|slot| slot.cell == oldest.cell && slot.commit_ts == oldest.commit_ts)
            {
                chain.swap_remove(pos);
                self.len -= 1;
                if oldest.commit_ts > self.largest_evicted {
                    self.largest_evicted = oldest.commit_ts;
                }
                return;
            }
        }
    }

    /// Record a half-abort: the transaction's cells block later commits
    /// until the client confirms cleanup (or the watermark passes the
    /// transaction's start timestamp).
    pub fn set_half_aborted(&mut self, start_ts: Timestamp, write_set: &[CellId]) {
        if write_set.is_empty() {
            return;
        }
        let cells = self.half_aborted.entry(start_ts).or_default();
        for &cell in write_set {
            cells.push(cell);
            *self.blocked.entry(cell).or_insert(0) += 1;
        }
    }

    /// Client confirmed cleanup of an aborted transaction. Idempotent.
    pub fn set_full_aborted(&mut self, start_ts: Timestamp) {
        if let Some(cells) = self.half_aborted.remove(&start_ts) {
            for cell in cells {
                if let Some(count) = self.blocked.get_mut(&cell) {
                    *count -= 1;
                    if *count == 0 {
                        self.blocked.remove(&cell);
                    }
                }
            }
        }
    }

    /// Release half-abort entries whose start timestamp fell below the
    /// watermark: readers resolve those versions through the external
    /// commit table, so the block is no longer load-bearing.
    pub fn release_below(&mut self, watermark: Timestamp) {
        let expired: Vec<Timestamp> = self
            .half_aborted
            .keys()
            .copied()
            .filter(|&ts| ts < watermark)
            .collect();
        for ts in expired {
            self.set_full_aborted(ts);
        }
    }

    /// Largest commit timestamp ever evicted.
    pub fn largest_evicted(&self) -> Timestamp {
        self.largest_evicted
    }

    /// Live cells currently in the map.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
