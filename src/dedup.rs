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

//! Time-windowed record of purchase ids that were already credited.

use crate::base::PurchaseId;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::time::{Duration, Instant};

/// Remembers purchase ids for a retention window so redelivered
/// notifications are not credited twice.
///
/// Entries live in memory only and are gone after a restart. An entry
/// expires once its age exceeds the retention window; expired entries are
/// evicted lazily on every lookup.
///
/// The sentinel id `"0"` must never be passed in; callers bypass the cache
/// for it (see [`PurchaseId::is_sentinel`]).
#[derive(Debug)]
pub struct DedupCache {
    /// Purchase id to the instant it was first seen.
    seen: DashMap<PurchaseId, Instant>,
    retention: Duration,
}

impl DedupCache {
    pub const DEFAULT_RETENTION: Duration = Duration::from_secs(3600);

    /// Creates an empty cache with the default one-hour window.
    pub fn new() -> Self {
        Self::with_retention(Self::DEFAULT_RETENTION)
    }

    pub fn with_retention(retention: Duration) -> Self {
        Self {
            seen: DashMap::new(),
            retention,
        }
    }

    /// Returns `true` if `id` was seen within the retention window.
    pub fn is_processed(&self, id: &PurchaseId) -> bool {
        self.is_processed_at(id, Instant::now())
    }

    /// Records `id` as processed. An id already present keeps its original
    /// first-seen time.
    pub fn mark_processed(&self, id: &PurchaseId) {
        self.mark_processed_at(id, Instant::now());
    }

    /// Atomically checks and records `id`.
    ///
    /// Returns `true` if the caller is the first to see `id` within the
    /// window, `false` if it is a duplicate.
    pub fn claim(&self, id: &PurchaseId) -> bool {
        self.claim_at(id, Instant::now())
    }

    /// Number of ids currently remembered, expired ones included.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub(crate) fn is_processed_at(&self, id: &PurchaseId, now: Instant) -> bool {
        self.evict_expired(now);
        self.seen.contains_key(id)
    }

    pub(crate) fn mark_processed_at(&self, id: &PurchaseId, now: Instant) {
        debug_assert!(!id.is_sentinel(), "sentinel purchase id must bypass dedup");
        self.seen.entry(id.clone()).or_insert(now);
    }

    pub(crate) fn claim_at(&self, id: &PurchaseId, now: Instant) -> bool {
        debug_assert!(!id.is_sentinel(), "sentinel purchase id must bypass dedup");
        self.evict_expired(now);

        // Entry API keeps check-and-insert atomic across concurrent callers
        match self.seen.entry(id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(now);
                true
            }
        }
    }

    fn evict_expired(&self, now: Instant) {
        self.seen
            .retain(|_, first_seen| now.saturating_duration_since(*first_seen) <= self.retention);
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new()
    }
}
