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

//! # Sale Ledger
//!
//! Ingests purchase notifications and credits their value to per-user
//! balance files.
//!
//! ## Core Components
//!
//! - [`SaleIngestionPipeline`]: validates, deduplicates, aggregates, resolves
//!   and credits one notification, always returning a [`ProcessingOutcome`]
//! - [`BalanceLedger`]: read-modify-write of one `<identity>.json` balance file
//! - [`LockRegistry`]: one async lock per balance file
//! - [`DedupCache`]: time-windowed memory of processed purchase ids
//! - [`RateLimiter`]: sliding-window limiter for identity lookups
//! - [`AuditLog`]: append-only text record of every processed notification
//!
//! ## Example
//!
//! ```no_run
//! use sale_ledger::{
//!     AuditLog, BalanceLedger, BuyerRef, DedupCache, Identity, LockRegistry,
//!     ProcessingOutcome, SaleIngestionPipeline, StaticDirectory,
//! };
//! use std::sync::Arc;
//!
//! # async fn run() -> std::io::Result<()> {
//! let mut directory = StaticDirectory::new();
//! directory.insert(BuyerRef::new("98765"), Identity::new("76561198000000000"));
//!
//! let ledger = BalanceLedger::new("balances", "Balance", Arc::new(LockRegistry::new()));
//! let pipeline = SaleIngestionPipeline::new(
//!     Arc::new(DedupCache::new()),
//!     Arc::new(ledger),
//!     Arc::new(directory),
//!     Arc::new(AuditLog::open("sales_audit.log")?),
//! );
//!
//! let raw = br#"{"purchase": {"id": "123"}, "user": {"id": "98765"},
//!     "delivered_products": [{"id": "A", "content": [{"id": 1, "type": "number", "value": "500"}]}]}"#;
//! let outcome = pipeline.process_notification(raw).await;
//! assert!(matches!(outcome, ProcessingOutcome::Accepted { .. }));
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency
//!
//! Notifications for different identities proceed independently. Two
//! notifications for the same identity are applied one after the other in
//! the order they obtain the file lock, which is not necessarily the order
//! they were received.

pub mod aggregation;
pub mod audit;
mod base;
pub mod config;
pub mod dedup;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod lock_registry;
pub mod notification;
pub mod pipeline;
pub mod rate_limiter;

pub use aggregation::{AggregationResult, aggregate};
pub use audit::{AuditLog, AuditLogEntry, LedgerOutcome};
pub use base::{BuyerRef, Identity, PurchaseId};
pub use config::Config;
pub use dedup::DedupCache;
pub use error::{LedgerError, LookupError, RateLimitError, RejectReason};
pub use identity::{IdentityResolver, RateLimitedResolver, Resolution, RetryPolicy, StaticDirectory};
pub use ledger::{BackupMode, Balance, BalanceLedger};
pub use lock_registry::LockRegistry;
pub use notification::{ContentEntry, DeliveredProduct, PurchaseNotification};
pub use pipeline::{ProcessingOutcome, SaleIngestionPipeline, Stage};
pub use rate_limiter::RateLimiter;
