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

//! TSO configuration
//!
//! All capacity and batching knobs live in one immutable value constructed
//! at startup. Environment variables override the defaults; nothing is read
//! after construction and there is no process-global mutable state.

use std::env;
use std::time::Duration;

use crate::error::{Result, TsoError};

/// Capacity of the commit hash map. Larger keeps conflict-check memory for
/// longer and slows the low watermark down.
pub const DEFAULT_MAX_ITEMS: usize = 100_000;

/// Sizing input for the uncommitted-set bucket grid.
pub const DEFAULT_MAX_COMMITS: usize = 100_000;

/// Longest the journal holds a partial batch before flushing.
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_millis(10);

/// Journal batch budget in bytes.
pub const DEFAULT_BATCH_SIZE: usize = 1024;

/// Timestamps reserved per durable oracle range record.
pub const DEFAULT_ORACLE_RANGE: u64 = 1_000_000;

/// Immutable TSO configuration.
#[derive(Debug, Clone)]
pub struct TsoConfig {
    /// Commit hash map capacity (`TORO_MAX_ITEMS`).
    pub max_items: usize,
    /// Uncommitted-set sizing input (`TORO_MAX_COMMITS`).
    pub max_commits: usize,
    /// Journal batch flush timeout (`TORO_FLUSH_TIMEOUT_MS`).
    pub flush_timeout: Duration,
    /// Journal batch byte budget (`TORO_BATCH_SIZE`).
    pub batch_size: usize,
    /// Timestamps per oracle allocation range (`TORO_ORACLE_RANGE`).
    pub oracle_range: u64,
}

impl Default for TsoConfig {
    fn default() -> Self {
        Self {
            max_items: DEFAULT_MAX_ITEMS,
            max_commits: DEFAULT_MAX_COMMITS,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
            batch_size: DEFAULT_BATCH_SIZE,
            oracle_range: DEFAULT_ORACLE_RANGE,
        }
    }
}

impl TsoConfig {
    /// Build a configuration from the defaults plus `TORO_*` environment
    /// overrides.
    pub fn from_env() -> Result<Self> {
        let config = Self {
            max_items: env_usize("TORO_MAX_ITEMS", DEFAULT_MAX_ITEMS)?,
            max_commits: env_usize("TORO_MAX_COMMITS", DEFAULT_MAX_COMMITS)?,
            flush_timeout: Duration::from_millis(env_u64(
                "TORO_FLUSH_TIMEOUT_MS",
                DEFAULT_FLUSH_TIMEOUT.as_millis() as u64,
            )?),
            batch_size: env_usize("TORO_BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
            oracle_range: env_u64("TORO_ORACLE_RANGE", DEFAULT_ORACLE_RANGE)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_items == 0 {
            return Err(TsoError::InvalidConfig("max_items must be > 0".into()));
        }
        if self.max_commits < 4 {
            return Err(TsoError::InvalidConfig("max_commits must be >= 4".into()));
        }
        if self.batch_size == 0 {
            return Err(TsoError::InvalidConfig("batch_size must be > 0".into()));
        }
        if self.oracle_range == 0 {
            return Err(TsoError::InvalidConfig("oracle_range must be > 0".into()));
        }
        Ok(())
    }

    /// Timestamps covered by one uncommitted-set bucket. Power of two,
    /// roughly `sqrt(max_commits)`.
    pub fn bucket_size(&self) -> u64 {
        pow2_ceil((self.max_commits as f64).sqrt())
    }

    /// Number of uncommitted-set buckets. Power of two; doubled so the
    /// window comfortably covers `max_commits` in-flight timestamps.
    pub fn bucket_count(&self) -> u64 {
        pow2_ceil(self.max_commits as f64 / self.bucket_size() as f64) * 2
    }
}

/// Smallest power of two >= `d`, never below 2.
fn pow2_ceil(d: f64) -> u64 {
    let exp = d.log2().ceil().max(1.0);
    2f64.powf(exp) as u64
}

fn env_u64(key: &str, default: u64) -> Result<u64> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| {
            TsoError::InvalidConfig(format!("{key}={raw} is not a valid integer"))
        }),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(e) => Err(TsoError::InvalidConfig(format!("{key}: {e}"))),
    }
}

fn env_usize(key: &str, default: usize) -> Result<usize> {
    Ok(env_u64(key, default as u64)? as usize)
}
