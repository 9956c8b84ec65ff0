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

//! Toro Core
//!
//! Fundamental types shared by the Toro transaction status oracle:
//!
//! - **Errors**: the workspace-wide [`TsoError`] / [`Result`] pair
//! - **Configuration**: immutable [`TsoConfig`] with environment overrides
//! - **Cell fingerprints**: [`CellId`], the 64-bit identity of a written cell
//!
//! The engine itself (timestamp oracle, commit hash map, uncommitted set,
//! state journal, transaction state machine) lives in the `toro-tso` crate.

pub mod cell;
pub mod config;
pub mod error;

pub use cell::CellId;
pub use config::TsoConfig;
pub use error::{Result, TsoError};

/// Timestamp - monotonically increasing within a TSO epoch.
///
/// Zero is reserved as "never". Start timestamps and commit timestamps are
/// drawn from the same counter and distinguished only by context.
pub type Timestamp = u64;
