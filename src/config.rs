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

//! Runtime configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Ingestion settings.
///
/// # Environment variables
///
/// | Variable | Default | Meaning |
/// |----------|---------|---------|
/// | BALANCE_FIELD | Balance | JSON key holding the balance |
/// | BALANCE_DIR | ./balances | Directory of `<identity>.json` balance files |
/// | AUDIT_LOG_PATH | sales_audit.log | Append-only audit log |
/// | DEDUP_RETENTION_SECS | 3600 | Dedup window |
/// | MAX_PAYLOAD_BYTES | 1048576 | Inbound document ceiling |
/// | LOOKUP_RATE_PER_SEC | 1 | Identity lookups per second |
/// | LOOKUP_MAX_ATTEMPTS | 3 | Attempts for a rate-limited lookup |
/// | LOOKUP_BACKOFF_MS | 2000 | Base delay between lookup retries |
/// | BACKUPS_ENABLED | true | Snapshot balance files before writing |
#[derive(Debug, Clone)]
pub struct Config {
    pub balance_field: String,
    pub balance_dir: PathBuf,
    pub audit_log_path: PathBuf,
    pub dedup_retention: Duration,
    pub max_payload_bytes: usize,
    pub lookup_rate_per_sec: usize,
    pub lookup_max_attempts: u32,
    pub lookup_backoff: Duration,
    pub backups_enabled: bool,
}

impl Config {
    pub const DEFAULT_BALANCE_FIELD: &'static str = "Balance";
    pub const DEFAULT_DEDUP_RETENTION: Duration = Duration::from_secs(3600);
    pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

    /// Loads configuration from environment variables.
    ///
    /// Unset or unparseable variables fall back to their defaults.
    pub fn from_env() -> Self {
        Self {
            balance_field: std::env::var("BALANCE_FIELD")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| Self::DEFAULT_BALANCE_FIELD.into()),
            balance_dir: std::env::var("BALANCE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("balances")),
            audit_log_path: std::env::var("AUDIT_LOG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("sales_audit.log")),
            dedup_retention: env_parse("DEDUP_RETENTION_SECS")
                .map(Duration::from_secs)
                .unwrap_or(Self::DEFAULT_DEDUP_RETENTION),
            max_payload_bytes: env_parse("MAX_PAYLOAD_BYTES")
                .unwrap_or(Self::DEFAULT_MAX_PAYLOAD_BYTES),
            lookup_rate_per_sec: env_parse("LOOKUP_RATE_PER_SEC")
                .filter(|n| *n > 0)
                .unwrap_or(1),
            lookup_max_attempts: env_parse("LOOKUP_MAX_ATTEMPTS")
                .filter(|n| *n > 0)
                .unwrap_or(3),
            lookup_backoff: env_parse("LOOKUP_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(Duration::from_secs(2)),
            backups_enabled: env_parse("BACKUPS_ENABLED").unwrap_or(true),
        }
    }

    /// Overrides the storage locations, keeping everything else from the
    /// environment.
    ///
    /// Used by tests to point at temporary directories.
    pub fn with_overrides(
        balance_dir: impl Into<PathBuf>,
        audit_log_path: impl Into<PathBuf>,
    ) -> Self {
        let mut config = Self::from_env();
        config.balance_dir = balance_dir.into();
        config.audit_log_path = audit_log_path.into();
        config
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
