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

//! Sliding-window limiter for outbound identity lookups.

use crate::error::RateLimitError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::{Instant, sleep_until};

/// Bounds how many acquisitions complete within any trailing window.
///
/// Timestamps of recent acquisitions are kept in order; a caller that finds
/// the window full sleeps until the oldest timestamp leaves it and then
/// re-checks. The mutex is never held across an await point.
#[derive(Debug)]
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    acquisitions: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Creates a limiter allowing `per_second` acquisitions per second.
    ///
    /// A limit of zero is treated as one.
    pub fn new(per_second: usize) -> Self {
        Self::with_window(per_second, Duration::from_secs(1))
    }

    pub fn with_window(limit: usize, window: Duration) -> Self {
        let limit = limit.max(1);
        Self {
            limit,
            window,
            acquisitions: Mutex::new(VecDeque::with_capacity(limit)),
        }
    }

    /// Waits until one more unit of work may start.
    ///
    /// Never fails. There is no internal timeout; use
    /// [`acquire_before`](Self::acquire_before) to bound the wait.
    pub async fn acquire(&self) {
        loop {
            match self.try_reserve(Instant::now()) {
                Ok(()) => return,
                Err(free_at) => sleep_until(free_at).await,
            }
        }
    }

    /// Like [`acquire`](Self::acquire), but gives up when no slot frees up
    /// before `deadline`.
    ///
    /// # Errors
    ///
    /// [`RateLimitError::DeadlineExceeded`] when the next free slot lies past
    /// the deadline. Nothing is recorded in that case.
    pub async fn acquire_before(&self, deadline: Instant) -> Result<(), RateLimitError> {
        loop {
            match self.try_reserve(Instant::now()) {
                Ok(()) => return Ok(()),
                Err(free_at) if free_at > deadline => {
                    return Err(RateLimitError::DeadlineExceeded);
                }
                Err(free_at) => sleep_until(free_at).await,
            }
        }
    }

    /// Number of acquisitions still inside the window at `now`.
    pub fn in_flight(&self) -> usize {
        let now = Instant::now();
        let mut acquisitions = self.acquisitions.lock();
        self.evict_expired(&mut acquisitions, now);
        acquisitions.len()
    }

    /// Records an acquisition at `now` if the window has room, otherwise
    /// returns the instant the oldest acquisition expires.
    fn try_reserve(&self, now: Instant) -> Result<(), Instant> {
        let mut acquisitions = self.acquisitions.lock();
        self.evict_expired(&mut acquisitions, now);

        if acquisitions.len() < self.limit {
            acquisitions.push_back(now);
            return Ok(());
        }

        // limit >= 1, so a full window always has a front entry
        let oldest = acquisitions.front().copied().unwrap_or(now);
        Err(oldest + self.window)
    }

    fn evict_expired(&self, acquisitions: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = acquisitions.front() {
            if now.duration_since(*oldest) >= self.window {
                acquisitions.pop_front();
            } else {
                break;
            }
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn first_acquire_is_immediate() {
        let limiter = RateLimiter::new(1);
        let start = Instant::now();
        limiter.acquire().await;
        assert_eq!(Instant::now(), start);
    }

    #[tokio::test(start_paused = true)]
    async fn second_acquire_waits_for_window() {
        let limiter = RateLimiter::new(1);
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(Instant::now() - start >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn limit_of_two_admits_burst_of_two() {
        let limiter = RateLimiter::new(2);
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(Instant::now(), start);

        limiter.acquire().await;
        assert!(Instant::now() - start >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn never_more_than_limit_per_window() {
        let limiter = Arc::new(RateLimiter::new(1));
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                Instant::now()
            }));
        }

        let mut times = Vec::new();
        for handle in handles {
            times.push(handle.await.unwrap());
        }
        times.sort();

        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(1));
        }
        assert!(times[3] - start >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_exceeded_when_window_is_full() {
        let limiter = RateLimiter::new(1);
        limiter.acquire().await;

        let deadline = Instant::now() + Duration::from_millis(200);
        let result = limiter.acquire_before(deadline).await;
        assert_eq!(result, Err(RateLimitError::DeadlineExceeded));
        assert_eq!(limiter.in_flight(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_met_when_slot_frees_in_time() {
        let limiter = RateLimiter::new(1);
        limiter.acquire().await;

        let deadline = Instant::now() + Duration::from_secs(2);
        assert_eq!(limiter.acquire_before(deadline).await, Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_acquisitions_are_evicted() {
        let limiter = RateLimiter::new(3);
        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(limiter.in_flight(), 2);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(limiter.in_flight(), 0);
    }

    #[test]
    fn zero_limit_is_treated_as_one() {
        let limiter = RateLimiter::new(0);
        assert_eq!(limiter.limit, 1);
    }
}
