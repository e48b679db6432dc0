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

//! Buyer identity resolution.
//!
//! The pipeline only depends on [`IdentityResolver`]. Backends that call a
//! remote service should be wrapped in [`RateLimitedResolver`], which waits
//! on the shared [`RateLimiter`] before every call and retries rate-limited
//! responses a bounded number of times.

use crate::base::{BuyerRef, Identity};
use crate::config::Config;
use crate::error::LookupError;
use crate::rate_limiter::RateLimiter;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Result of a successful lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(Identity),
    NotRegistered,
}

/// Maps a buyer reference to the identity owning a balance file.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn lookup_identity(&self, buyer: &BuyerRef) -> Result<Resolution, LookupError>;
}

/// Bounded retry schedule for rate-limited lookups.
///
/// Attempt `n` that is rate limited waits `backoff * n` before attempt `n + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.lookup_max_attempts.max(1),
            backoff: config.lookup_backoff,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

/// Rate-limited, retrying wrapper around another resolver.
pub struct RateLimitedResolver<R> {
    inner: R,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
}

impl<R: IdentityResolver> RateLimitedResolver<R> {
    pub fn new(inner: R, limiter: Arc<RateLimiter>, policy: RetryPolicy) -> Self {
        Self {
            inner,
            limiter,
            policy,
        }
    }
}

#[async_trait]
impl<R: IdentityResolver> IdentityResolver for RateLimitedResolver<R> {
    async fn lookup_identity(&self, buyer: &BuyerRef) -> Result<Resolution, LookupError> {
        let attempts = self.policy.max_attempts.max(1);

        for attempt in 1..=attempts {
            self.limiter.acquire().await;

            match self.inner.lookup_identity(buyer).await {
                Err(LookupError::RateLimited) if attempt < attempts => {
                    let delay = self.policy.backoff * attempt;
                    warn!(%buyer, attempt, ?delay, "identity lookup rate limited, backing off");
                    tokio::time::sleep(delay).await;
                }
                Err(LookupError::RateLimited) => break,
                other => return other,
            }
        }

        Err(LookupError::RetriesExhausted { attempts })
    }
}

/// In-memory buyer directory.
///
/// Stands in for the registration store: buyers map to identities, and a
/// buyer with no entry (or a blank one) is not registered.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    entries: HashMap<BuyerRef, Identity>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a JSON object of `{"<buyer ref>": "<identity>"}` pairs.
    pub fn from_json_file(path: &Path) -> io::Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let raw: HashMap<String, String> = serde_json::from_reader(reader)?;
        let mut directory = Self::new();
        for (buyer, identity) in raw {
            directory.insert(BuyerRef(buyer), Identity(identity));
        }
        Ok(directory)
    }

    pub fn insert(&mut self, buyer: BuyerRef, identity: Identity) {
        self.entries.insert(buyer, identity);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl IdentityResolver for StaticDirectory {
    async fn lookup_identity(&self, buyer: &BuyerRef) -> Result<Resolution, LookupError> {
        match self.entries.get(buyer) {
            Some(identity) if !identity.as_str().trim().is_empty() => {
                debug!(%buyer, %identity, "buyer resolved");
                Ok(Resolution::Resolved(identity.clone()))
            }
            _ => Ok(Resolution::NotRegistered),
        }
    }
}

#[async_trait]
impl<T: IdentityResolver + ?Sized> IdentityResolver for Arc<T> {
    async fn lookup_identity(&self, buyer: &BuyerRef) -> Result<Resolution, LookupError> {
        (**self).lookup_identity(buyer).await
    }
}
