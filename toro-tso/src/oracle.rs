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

//! Timestamp oracle
//!
//! A single monotone 64-bit counter feeds both start and commit timestamps.
//! Durability works in ranges: before any timestamp past the reserved
//! high-water is handed out, the next high-water is recorded through a
//! [`RangeStore`] and fsynced. On restart the counter resumes just above the
//! last recorded high-water - the unused tail of the old range is skipped,
//! which is fine because only monotonicity matters, not density.
//!
//! A failed reservation is fatal ([`TsoError::OracleRangeFailure`]): the
//! state machine poisons itself and the epoch must be restarted.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ReadBytesExt};
use tracing::{debug, info};

use toro_core::{Result, Timestamp, TsoError};

/// Durable backing for oracle range reservations.
///
/// `persist` must not return until the record is durable; the oracle hands
/// out no timestamp above a high-water that could be lost.
pub trait RangeStore: Send {
    /// Last durably recorded high-water, if any.
    fn load(&mut self) -> Result<Option<Timestamp>>;

    /// Durably record a new high-water (8 bytes big-endian on disk).
    fn persist(&mut self, high_water: Timestamp) -> Result<()>;
}

/// In-memory range store for tests and throwaway epochs.
#[derive(Debug, Default)]
pub struct MemoryRangeStore {
    high_water: Option<Timestamp>,
}

impl MemoryRangeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend a previous epoch reserved up to `high_water`.
    pub fn resuming_at(high_water: Timestamp) -> Self {
        Self {
            high_water: Some(high_water),
        }
    }

    pub fn high_water(&self) -> Option<Timestamp> {
        self.high_water
    }
}

impl RangeStore for MemoryRangeStore {
    fn load(&mut self) -> Result<Option<Timestamp>> {
        Ok(self.high_water)
    }

    fn persist(&mut self, high_water: Timestamp) -> Result<()> {
        self.high_water = Some(high_water);
        Ok(())
    }
}

/// File-backed range store: an append-only file of 8-byte big-endian
/// `RANGE(highWater)` records, fsynced per append.
pub struct FileRangeStore {
    file: File,
    path: PathBuf,
}

impl FileRangeStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .create(true)
            .append(true)
            .open(&path)?;
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RangeStore for FileRangeStore {
    fn load(&mut self) -> Result<Option<Timestamp>> {
        let len = self.file.metadata()?.len();
        // A torn trailing record (crash mid-append) is ignored; the record
        // before it was the last one acknowledged.
        let whole = len / 8;
        if whole == 0 {
            return Ok(None);
        }
        self.file.seek(SeekFrom::Start((whole - 1) * 8))?;
        let high_water = self.file.read_u64::<BigEndian>()?;
        Ok(Some(high_water))
    }

    fn persist(&mut self, high_water: Timestamp) -> Result<()> {
        self.file.write_all(&high_water.to_be_bytes())?;
        self.file.sync_data()?;
        Ok(())
    }
}

/// The monotone timestamp allocator.
pub struct TimestampOracle {
    /// Next timestamp to hand out.
    next: Timestamp,
    /// First timestamp of this epoch.
    first: Timestamp,
    /// Exclusive upper bound of the reserved range.
    high_water: Timestamp,
    range: u64,
    store: Box<dyn RangeStore>,
}

impl TimestampOracle {
    /// Open an oracle over `store`, reserving the first range of this epoch.
    ///
    /// A fresh store starts the epoch at 1 (zero is "never"); a store with
    /// history resumes just above its recorded high-water.
    pub fn new(mut store: Box<dyn RangeStore>, range: u64) -> Result<Self> {
        let resumed = store.load()?;
        let first = resumed.unwrap_or(0) + 1;
        let high_water = first
            .checked_add(range)
            .ok_or_else(|| TsoError::OracleRangeFailure("timestamp space exhausted".into()))?;
        store
            .persist(high_water)
            .map_err(|e| TsoError::OracleRangeFailure(e.to_string()))?;
        info!(first, high_water, "timestamp oracle epoch started");
        Ok(Self {
            next: first,
            first,
            high_water,
            range,
            store,
        })
    }

    /// Allocate the next timestamp. Reserves (and durably records) a new
    /// range first when the current one is exhausted.
    pub fn next(&mut self) -> Result<Timestamp> {
        if self.next >= self.high_water {
            let next_high = self
                .high_water
                .checked_add(self.range)
                .ok_or_else(|| TsoError::OracleRangeFailure("timestamp space exhausted".into()))?;
            self.store
                .persist(next_high)
                .map_err(|e| TsoError::OracleRangeFailure(e.to_string()))?;
            debug!(high_water = next_high, "reserved timestamp range");
            self.high_water = next_high;
        }
        let ts = self.next;
        self.next += 1;
        Ok(ts)
    }

    /// First timestamp of this epoch (used to base the uncommitted-set
    /// bucket window).
    pub fn first(&self) -> Timestamp {
        self.first
    }

    /// Last timestamp handed out, without advancing. Before any allocation
    /// this is `first() - 1` - the durable frontier of the previous epoch,
    /// or zero ("never") on a cold start.
    pub fn get(&self) -> Timestamp {
        self.next - 1
    }

    /// Exclusive upper bound of the currently reserved range.
    pub fn reserved_high_water(&self) -> Timestamp {
        self.high_water
    }
}
