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

//! Sale ingestion pipeline.
//!
//! One notification moves through
//! `Received -> Validated -> Deduplicated -> Aggregated -> IdentityResolved
//! -> LedgerApplied -> Logged -> Done`, or stops early with a rejection.
//! Once a notification passes deduplication it always runs to `Done`: lookup
//! and ledger failures become part of the audited outcome instead of errors.

use crate::aggregation::{AggregationResult, aggregate};
use crate::audit::{AuditLog, AuditLogEntry, LedgerOutcome};
use crate::base::{Identity, PurchaseId};
use crate::config::Config;
use crate::dedup::DedupCache;
use crate::error::RejectReason;
use crate::identity::{IdentityResolver, Resolution};
use crate::ledger::{BackupMode, Balance, BalanceLedger};
use crate::notification::PurchaseNotification;
use std::fmt;
use std::io;
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Pipeline stages, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Received,
    Validated,
    Deduplicated,
    Aggregated,
    IdentityResolved,
    LedgerApplied,
    Logged,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Structured result of processing one notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingOutcome {
    /// Notification ran to completion; `ledger` says what happened to the balance.
    Accepted {
        purchase_id: PurchaseId,
        identity: Option<Identity>,
        total_value: Balance,
        ledger: LedgerOutcome,
    },
    /// Purchase id was already processed within the dedup window.
    Duplicate { purchase_id: PurchaseId },
    /// Notification was refused before any balance work. `stage` is the
    /// stage it failed to enter: `Received` for intake checks (attachment
    /// type, payload size), `Validated` for decoding and structure.
    Rejected { stage: Stage, reason: RejectReason },
}

impl ProcessingOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    pub fn purchase_id(&self) -> Option<&PurchaseId> {
        match self {
            Self::Accepted { purchase_id, .. } | Self::Duplicate { purchase_id } => {
                Some(purchase_id)
            }
            Self::Rejected { .. } => None,
        }
    }

    /// Short label for reporting.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Accepted { .. } => "accepted",
            Self::Duplicate { .. } => "duplicate",
            Self::Rejected { .. } => "rejected",
        }
    }
}

/// Validates, deduplicates and credits purchase notifications.
///
/// The dedup cache and ledger (with its lock registry) are shared,
/// process-wide state: construct them once and pass the same instances to
/// every pipeline that touches the same balance files.
pub struct SaleIngestionPipeline {
    dedup: Arc<DedupCache>,
    ledger: Arc<BalanceLedger>,
    resolver: Arc<dyn IdentityResolver>,
    audit: Arc<AuditLog>,
    max_payload_bytes: usize,
}

impl SaleIngestionPipeline {
    pub fn new(
        dedup: Arc<DedupCache>,
        ledger: Arc<BalanceLedger>,
        resolver: Arc<dyn IdentityResolver>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            dedup,
            ledger,
            resolver,
            audit,
            max_payload_bytes: Config::DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }

    pub fn with_max_payload_bytes(mut self, limit: usize) -> Self {
        self.max_payload_bytes = limit;
        self
    }

    /// Processes a delivered attachment, ignoring anything that is not a
    /// `.json` document.
    pub async fn process_attachment(&self, filename: &str, raw: &[u8]) -> ProcessingOutcome {
        if !filename.to_ascii_lowercase().ends_with(".json") {
            info!(filename, "ignoring non-json attachment");
            return ProcessingOutcome::Rejected {
                stage: Stage::Received,
                reason: RejectReason::NotJson(filename.to_string()),
            };
        }
        debug!(filename, size = raw.len(), "processing attachment");
        self.process_notification(raw).await
    }

    /// Processes one raw notification document.
    ///
    /// Never fails: every problem is reported through the returned outcome.
    pub async fn process_notification(&self, raw: &[u8]) -> ProcessingOutcome {
        if raw.len() > self.max_payload_bytes {
            warn!(size = raw.len(), limit = self.max_payload_bytes, "notification too large");
            return ProcessingOutcome::Rejected {
                stage: Stage::Received,
                reason: RejectReason::PayloadTooLarge {
                    size: raw.len(),
                    limit: self.max_payload_bytes,
                },
            };
        }

        match PurchaseNotification::from_slice(raw) {
            Ok(notification) => self.process(notification).await,
            Err(reason) => {
                warn!(%reason, "notification rejected");
                ProcessingOutcome::Rejected {
                    stage: Stage::Validated,
                    reason,
                }
            }
        }
    }

    /// Processes a notification that already passed structural validation.
    pub async fn process(&self, notification: PurchaseNotification) -> ProcessingOutcome {
        let PurchaseNotification {
            purchase_id,
            buyer_ref,
            delivered_items,
        } = notification;
        let sentinel = purchase_id.is_sentinel();
        enter(&purchase_id, Stage::Validated);

        // The id is claimed up front so a redelivery arriving while this one
        // is in flight counts as a duplicate.
        if !sentinel && !self.dedup.claim(&purchase_id) {
            info!(%purchase_id, "duplicate notification ignored");
            return ProcessingOutcome::Duplicate { purchase_id };
        }
        if sentinel {
            debug!("test notification, dedup bypassed");
        }
        enter(&purchase_id, Stage::Deduplicated);

        let AggregationResult {
            total_value,
            codes,
            dedup_keys,
        } = aggregate(&delivered_items);
        debug!(%purchase_id, total_value, codes = codes.len(), "notification aggregated");
        enter(&purchase_id, Stage::Aggregated);

        let identity = match self.resolver.lookup_identity(&buyer_ref).await {
            Ok(Resolution::Resolved(identity)) => Ok(identity),
            Ok(Resolution::NotRegistered) => {
                info!(%purchase_id, buyer = %buyer_ref, "buyer not registered");
                Err("not registered".to_string())
            }
            Err(e) => {
                warn!(%purchase_id, buyer = %buyer_ref, error = %e, "identity lookup failed");
                Err(e.to_string())
            }
        };

        enter(&purchase_id, Stage::IdentityResolved);

        let backup = if sentinel {
            BackupMode::Skip
        } else {
            BackupMode::Snapshot
        };
        let ledger = match &identity {
            Ok(identity) => match self.ledger.apply_with(identity, total_value, backup).await {
                Ok(new_balance) => LedgerOutcome::Success { new_balance },
                Err(e) => {
                    error!(%purchase_id, %identity, error = %e, "balance update failed");
                    LedgerOutcome::Failed(e)
                }
            },
            Err(reason) => LedgerOutcome::IdentityUnresolved {
                reason: reason.clone(),
            },
        };
        let identity = identity.ok();
        enter(&purchase_id, Stage::LedgerApplied);

        let entry = AuditLogEntry {
            timestamp: chrono::Local::now(),
            purchase_id: purchase_id.clone(),
            buyer: buyer_ref,
            identity: identity.clone(),
            total_value,
            codes,
            dedup_keys,
            outcome: ledger.clone(),
        };
        let audit = Arc::clone(&self.audit);
        let written = tokio::task::spawn_blocking(move || audit.append(&entry))
            .await
            .unwrap_or_else(|e| Err(io::Error::other(e)));
        if let Err(e) = written {
            error!(%purchase_id, log = %self.audit.path().display(), error = %e, "failed to write audit entry");
        }

        enter(&purchase_id, Stage::Logged);

        if !sentinel {
            self.dedup.mark_processed(&purchase_id);
        }
        enter(&purchase_id, Stage::Done);

        info!(%purchase_id, total_value, outcome = %ledger, "notification processed");
        ProcessingOutcome::Accepted {
            purchase_id,
            identity,
            total_value,
            ledger,
        }
    }
}

fn enter(purchase_id: &PurchaseId, stage: Stage) {
    trace!(%purchase_id, %stage, "stage reached");
}
