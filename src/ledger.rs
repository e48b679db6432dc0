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

//! File-backed balance ledger.
//!
//! Each identity owns one `<identity>.json` file under the ledger root. The
//! ledger only ever credits: it reads the file, adds a non-negative delta to
//! the configured balance field and writes the whole record back, holding
//! the file's lock from [`LockRegistry`] for the entire read-modify-write.

use crate::base::Identity;
use crate::config::Config;
use crate::error::LedgerError;
use crate::lock_registry::LockRegistry;
use serde::Serialize;
use serde_json::{Map, Value};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Balance amount in the smallest currency unit.
pub type Balance = i64;

/// Whether to snapshot the balance file before overwriting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupMode {
    /// Copy the file to `<file>.bak.<timestamp>` first, if backups are enabled.
    Snapshot,
    /// Never snapshot (test traffic).
    Skip,
}

#[derive(Debug)]
pub struct BalanceLedger {
    root: PathBuf,
    balance_field: String,
    locks: Arc<LockRegistry>,
    backups_enabled: bool,
}

impl BalanceLedger {
    /// Creates a ledger over `root` with backups enabled.
    pub fn new(
        root: impl Into<PathBuf>,
        balance_field: impl Into<String>,
        locks: Arc<LockRegistry>,
    ) -> Self {
        Self {
            root: root.into(),
            balance_field: balance_field.into(),
            locks,
            backups_enabled: true,
        }
    }

    pub fn from_config(config: &Config, locks: Arc<LockRegistry>) -> Self {
        Self::new(&config.balance_dir, &config.balance_field, locks)
            .with_backups(config.backups_enabled)
    }

    pub fn with_backups(mut self, enabled: bool) -> Self {
        self.backups_enabled = enabled;
        self
    }

    pub fn balance_field(&self) -> &str {
        &self.balance_field
    }

    /// Path of the balance file owned by `identity`.
    ///
    /// # Errors
    ///
    /// [`LedgerError::RecordNotFound`] if the identity cannot name a file
    /// directly under the ledger root.
    pub fn record_path(&self, identity: &Identity) -> Result<PathBuf, LedgerError> {
        let name = identity.as_str();
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(LedgerError::RecordNotFound(name.to_string()));
        }
        Ok(self.root.join(format!("{name}.json")))
    }

    /// Reads the current balance of `identity` under its lock.
    pub async fn balance(&self, identity: &Identity) -> Result<Balance, LedgerError> {
        let path = self.record_path(identity)?;
        let lock = self.locks.get_lock(&path);
        let _guard = lock.lock().await;

        let record = read_record(&path).await?;
        Ok(current_balance(&record, &self.balance_field)?.max(0))
    }

    /// Credits `delta` to `identity`, snapshotting the file first when
    /// backups are enabled.
    pub async fn apply(&self, identity: &Identity, delta: Balance) -> Result<Balance, LedgerError> {
        self.apply_with(identity, delta, BackupMode::Snapshot).await
    }

    /// Credits `delta` to `identity` and returns the new balance.
    ///
    /// Concurrent calls for the same identity are serialized on the file's
    /// lock; calls for different identities never wait on each other. The
    /// lock is released on every exit path, and once the write has started
    /// it is held until the write completes even if this future is dropped.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidDelta`] - `delta` is negative.
    /// - [`LedgerError::RecordNotFound`] - no balance file for `identity`.
    /// - [`LedgerError::CorruptRecord`] - file unreadable or not a JSON object.
    /// - [`LedgerError::Overflow`] - the sum does not fit in [`Balance`].
    /// - [`LedgerError::PersistFailure`] - writing the new record failed.
    ///
    /// On any error the file is left as it was.
    pub async fn apply_with(
        &self,
        identity: &Identity,
        delta: Balance,
        backup: BackupMode,
    ) -> Result<Balance, LedgerError> {
        if delta < 0 {
            warn!(%identity, delta, "rejecting negative delta");
            return Err(LedgerError::InvalidDelta(delta));
        }

        let path = self.record_path(identity)?;
        let guard = self.locks.get_lock(&path).lock_owned().await;

        let mut record = read_record(&path).await?;
        let (previous, new_balance) = credit(&mut record, &self.balance_field, delta)?;
        let contents = render_record(record)?;

        let snapshot = self.backups_enabled && backup == BackupMode::Snapshot;
        let target = path.clone();
        // The guard moves into the blocking task: the write outlives a dropped
        // caller, and the file stays locked until it finishes.
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            if snapshot {
                match create_backup(&target) {
                    Ok(backup_path) => debug!(backup = %backup_path.display(), "balance file backed up"),
                    Err(e) => warn!(file = %target.display(), error = %e, "backup failed, continuing"),
                }
            }
            write_atomic(&target, &contents)
        })
        .await
        .map_err(|e| LedgerError::PersistFailure(e.to_string()))?
        .map_err(|e| LedgerError::PersistFailure(e.to_string()))?;

        info!(%identity, delta, previous, new_balance, "balance credited");
        Ok(new_balance)
    }
}

async fn read_record(path: &Path) -> Result<Map<String, Value>, LedgerError> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            warn!(file = %path.display(), "balance file not found");
            return Err(LedgerError::RecordNotFound(path.display().to_string()));
        }
        Err(e) => return Err(LedgerError::CorruptRecord(format!("unreadable: {e}"))),
    };

    match serde_json::from_slice::<Value>(&raw) {
        Ok(Value::Object(record)) => Ok(record),
        Ok(_) => Err(LedgerError::CorruptRecord("not a json object".into())),
        Err(e) => {
            warn!(file = %path.display(), error = %e, "balance file is not valid json");
            Err(LedgerError::CorruptRecord(e.to_string()))
        }
    }
}

/// Adds `delta` to the balance field of `record`, returning the previous
/// (clamped) and new balance.
fn credit(
    record: &mut Map<String, Value>,
    field: &str,
    delta: Balance,
) -> Result<(Balance, Balance), LedgerError> {
    if delta < 0 {
        return Err(LedgerError::InvalidDelta(delta));
    }

    let mut current = current_balance(record, field)?;
    if current < 0 {
        warn!(current, "stored balance is negative, clamping to 0");
        current = 0;
    }

    let new_balance = current
        .checked_add(delta)
        .ok_or(LedgerError::Overflow { current, delta })?
        .max(0);

    record.insert(field.to_string(), Value::from(new_balance));
    Ok((current, new_balance))
}

/// Reads the balance field leniently.
///
/// Integers, finite floats (truncated) and integer strings are accepted;
/// a missing field or any other value counts as zero. Numbers outside the
/// [`Balance`] range are rejected rather than silently reset.
fn current_balance(record: &Map<String, Value>, field: &str) -> Result<Balance, LedgerError> {
    let value = match record.get(field) {
        Some(value) => value,
        None => {
            debug!(field, "balance field missing, treating as 0");
            return Ok(0);
        }
    };

    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Ok(i);
            }
            match n.as_f64() {
                Some(f) if f.is_finite() && f >= i64::MIN as f64 && f < i64::MAX as f64 => {
                    Ok(f.trunc() as Balance)
                }
                _ => Err(LedgerError::CorruptRecord(format!(
                    "balance {n} out of range"
                ))),
            }
        }
        Value::String(s) => match s.trim().parse::<Balance>() {
            Ok(i) => Ok(i),
            Err(_) => {
                warn!(field, value = %s, "balance is not numeric, treating as 0");
                Ok(0)
            }
        },
        other => {
            warn!(field, value = %other, "balance is not numeric, treating as 0");
            Ok(0)
        }
    }
}

fn render_record(record: Map<String, Value>) -> Result<Vec<u8>, LedgerError> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    Value::Object(record)
        .serialize(&mut serializer)
        .map_err(|e| LedgerError::PersistFailure(e.to_string()))?;
    Ok(buf)
}

/// Copies `path` to `<path>.bak.<YYYYmmdd_HHMMSS>`.
fn create_backup(path: &Path) -> io::Result<PathBuf> {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".bak.{stamp}"));
    let backup = PathBuf::from(name);
    std::fs::copy(path, &backup)?;
    Ok(backup)
}

/// Replaces `path` with `contents` via a temp file in the same directory,
/// so readers see either the old or the new record, never a partial one.
fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;

    if let Ok(metadata) = std::fs::metadata(path) {
        let _ = std::fs::set_permissions(tmp.path(), metadata.permissions());
    }

    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
