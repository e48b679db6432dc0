// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
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

//! Per-file mutual exclusion for balance updates.

use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Hands out one async lock per balance file path.
///
/// Locks are created on first use and kept for the lifetime of the registry,
/// so memory grows with the number of distinct files ever touched.
#[derive(Debug, Default)]
pub struct LockRegistry {
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Returns the lock guarding `path`, creating it on first use.
    ///
    /// Every call with the same path returns the same lock instance.
    pub fn get_lock(&self, path: &Path) -> Arc<Mutex<()>> {
        // Fast path avoids cloning the key when the lock already exists
        if let Some(lock) = self.locks.get(path) {
            return Arc::clone(lock.value());
        }
        self.locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Number of paths that have a lock.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
