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

//! Append-only, human-readable audit log of processed notifications.

use crate::base::{BuyerRef, Identity, PurchaseId};
use crate::error::LedgerError;
use crate::ledger::Balance;
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::fmt::{self, Write as _};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const RULE: &str = "==================================================";
const HEADER: &str = "=== Sales Audit Log ===\n";

/// Result of the balance step for one notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerOutcome {
    /// Balance credited.
    Success { new_balance: Balance },
    /// Buyer could not be resolved; ledger was not touched.
    IdentityUnresolved { reason: String },
    /// Ledger rejected the credit; balance file unchanged.
    Failed(LedgerError),
}

impl LedgerOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn new_balance(&self) -> Option<Balance> {
        match self {
            Self::Success { new_balance } => Some(*new_balance),
            _ => None,
        }
    }
}

impl fmt::Display for LedgerOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success { new_balance } => write!(f, "Success (new balance: {new_balance})"),
            Self::IdentityUnresolved { reason } => {
                write!(f, "Not updated: identity unresolved ({reason})")
            }
            Self::Failed(e) => write!(f, "Failed: {e}"),
        }
    }
}

/// One processed notification, success or not.
#[derive(Debug, Clone)]
pub struct AuditLogEntry {
    pub timestamp: DateTime<Local>,
    pub purchase_id: PurchaseId,
    pub buyer: BuyerRef,
    pub identity: Option<Identity>,
    pub total_value: Balance,
    pub codes: Vec<String>,
    pub dedup_keys: Vec<String>,
    pub outcome: LedgerOutcome,
}

impl AuditLogEntry {
    /// Renders the entry as a delimited text block.
    pub fn render(&self) -> String {
        let mut block = String::new();
        // Writing into a String cannot fail
        let _ = self.write_block(&mut block);
        block
    }

    fn write_block(&self, out: &mut String) -> fmt::Result {
        writeln!(out)?;
        writeln!(out, "{RULE}")?;
        writeln!(out, "Timestamp: {}", self.timestamp.format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(out, "Purchase ID: {}", self.purchase_id)?;
        writeln!(out, "Buyer: {}", self.buyer)?;
        match &self.identity {
            Some(identity) => writeln!(out, "Identity: {identity}")?,
            None => writeln!(out, "Identity: unresolved")?,
        }
        writeln!(out, "Total Value: {}", self.total_value)?;
        if !self.codes.is_empty() {
            writeln!(out, "Codes:")?;
            for code in &self.codes {
                writeln!(out, "- {code}")?;
            }
        }
        if !self.dedup_keys.is_empty() {
            writeln!(out, "Counted Items: {}", self.dedup_keys.join(", "))?;
        }
        writeln!(out, "Balance Status: {}", self.outcome)?;
        writeln!(out, "{RULE}")
    }
}

/// Append-only audit log file.
///
/// Appends are serialized so concurrent entries never interleave. `append`
/// blocks on file I/O; async callers run it through `spawn_blocking`.
#[derive(Debug)]
pub struct AuditLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl AuditLog {
    /// Opens (creating if needed) the audit log at `path`.
    ///
    /// A new log starts with a header line.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        if file.metadata()?.len() == 0 {
            file.write_all(HEADER.as_bytes())?;
        }

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, entry: &AuditLogEntry) -> io::Result<()> {
        let block = entry.render();
        let mut file = self.file.lock();
        file.write_all(block.as_bytes())?;
        file.flush()
    }
}
