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

//! Error types for notification ingestion and balance updates.

use thiserror::Error;

/// Balance update errors.
///
/// Every variant leaves the balance file exactly as it was before the call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Delta is negative; this ledger only ever credits
    #[error("invalid delta {0} (must be non-negative)")]
    InvalidDelta(i64),

    /// No balance file exists for the identity
    #[error("balance record not found: {0}")]
    RecordNotFound(String),

    /// Balance file could not be read or is not a JSON object
    #[error("corrupt balance record: {0}")]
    CorruptRecord(String),

    /// Current balance plus delta does not fit the balance type
    #[error("balance overflow (current {current}, delta {delta})")]
    Overflow { current: i64, delta: i64 },

    /// Writing the updated record failed
    #[error("failed to persist balance record: {0}")]
    PersistFailure(String),
}

/// Reasons a notification is rejected before any balance work happens.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Payload exceeds the configured byte ceiling
    #[error("payload too large ({size} bytes, limit {limit})")]
    PayloadTooLarge { size: usize, limit: usize },

    /// Attachment is not a `.json` document
    #[error("not a json document: {0}")]
    NotJson(String),

    /// Payload is not valid UTF-8 JSON
    #[error("malformed document: {0}")]
    MalformedDocument(String),

    /// Required top-level sections are missing or have the wrong shape
    #[error("structural error: missing or invalid {}", .missing.join(", "))]
    StructuralError { missing: Vec<String> },
}

/// Identity lookup failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    /// Lookup service asked us to slow down
    #[error("lookup service rate limited the request")]
    RateLimited,

    /// Lookup service failed or could not be reached
    #[error("lookup service unavailable: {0}")]
    Unavailable(String),

    /// Every retry attempt was rate limited
    #[error("lookup retries exhausted after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
}

/// Rate limiter errors.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitError {
    /// No slot became free before the caller's deadline
    #[error("rate limiter deadline exceeded")]
    DeadlineExceeded,
}
