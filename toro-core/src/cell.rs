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

//! Cell fingerprints
//!
//! A cell is one `(table, row key, column family, column qualifier)` slot in
//! the wide-column store. The TSO only ever sees cells as 64-bit xxh3
//! fingerprints; two distinct cells hashing to the same fingerprint turn a
//! would-be commit into an abort, never the reverse, so collisions cost
//! throughput but not correctness.

use std::fmt;

/// 64-bit fingerprint of a written cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId(u64);

impl CellId {
    /// Wrap a fingerprint computed elsewhere (clients usually hash on their
    /// side and ship raw fingerprints in the commit request).
    pub const fn new(raw: u64) -> Self {
        CellId(raw)
    }

    /// Fingerprint a cell coordinate. Each variable-length part is
    /// length-delimited before hashing so `("ab", "c")` and `("a", "bc")`
    /// cannot collide structurally.
    pub fn fingerprint(table_id: u64, row_key: &[u8], family: &[u8], qualifier: &[u8]) -> Self {
        let mut buf =
            Vec::with_capacity(8 + 12 + row_key.len() + family.len() + qualifier.len());
        buf.extend_from_slice(&table_id.to_be_bytes());
        for part in [row_key, family, qualifier] {
            buf.extend_from_slice(&(part.len() as u32).to_be_bytes());
            buf.extend_from_slice(part);
        }
        CellId(twox_hash::xxh3::hash64(&buf))
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl From<u64> for CellId {
    fn from(raw: u64) -> Self {
        CellId(raw)
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}
