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

use clap::Parser;
use csv::Writer;
use sale_ledger::{
    AuditLog, BalanceLedger, Config, DedupCache, LockRegistry, ProcessingOutcome,
    RateLimitedResolver, RateLimiter, RetryPolicy, SaleIngestionPipeline, StaticDirectory,
};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Sale Ledger - credit purchase notifications to balance files
///
/// Reads purchase notification documents, credits their value to the
/// matching `<identity>.json` balance files and writes one CSV row per
/// document to stdout. Storage locations and limits come from the
/// environment (or a `.env` file); see `Config`.
#[derive(Parser, Debug)]
#[command(name = "sale-ledger")]
#[command(about = "Credits purchase notifications to per-user balance files", long_about = None)]
struct Args {
    /// Notification documents (`.json`) to ingest
    #[arg(value_name = "FILE", required = true)]
    inputs: Vec<PathBuf>,

    /// JSON object mapping buyer references to identities
    #[arg(long, value_name = "FILE")]
    directory: Option<PathBuf>,
}

/// One CSV output row.
#[derive(Debug, Serialize)]
struct OutcomeRow {
    file: String,
    purchase_id: String,
    outcome: &'static str,
    total: Option<i64>,
    new_balance: Option<i64>,
    detail: String,
}

impl OutcomeRow {
    fn new(file: String, outcome: &ProcessingOutcome) -> Self {
        let purchase_id = outcome
            .purchase_id()
            .map(ToString::to_string)
            .unwrap_or_default();
        let (total, new_balance, detail) = match outcome {
            ProcessingOutcome::Accepted {
                total_value, ledger, ..
            } => (Some(*total_value), ledger.new_balance(), ledger.to_string()),
            ProcessingOutcome::Duplicate { .. } => (None, None, "already processed".to_string()),
            ProcessingOutcome::Rejected { stage, reason } => {
                (None, None, format!("{reason} (at {stage})"))
            }
        };
        Self {
            file,
            purchase_id,
            outcome: outcome.label(),
            total,
            new_balance,
            detail,
        }
    }
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    init_logging();

    let args = Args::parse();
    let config = Config::from_env();

    let pipeline = match build_pipeline(&config, &args) {
        Ok(pipeline) => Arc::new(pipeline),
        Err(e) => {
            eprintln!("Error initializing pipeline: {}", e);
            process::exit(1);
        }
    };

    let rows = ingest_files(pipeline, args.inputs).await;

    if let Err(e) = write_outcomes(&rows, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("sale_ledger=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_pipeline(config: &Config, args: &Args) -> std::io::Result<SaleIngestionPipeline> {
    let directory = match &args.directory {
        Some(path) => StaticDirectory::from_json_file(path)?,
        None => {
            warn!("no buyer directory given, every buyer will be unresolved");
            StaticDirectory::new()
        }
    };
    info!(buyers = directory.len(), "buyer directory loaded");

    let limiter = Arc::new(RateLimiter::new(config.lookup_rate_per_sec));
    let resolver = RateLimitedResolver::new(directory, limiter, RetryPolicy::from_config(config));

    let ledger = BalanceLedger::from_config(config, Arc::new(LockRegistry::new()));
    let audit = AuditLog::open(&config.audit_log_path)?;
    info!(
        balances = %config.balance_dir.display(),
        audit = %audit.path().display(),
        "pipeline ready"
    );

    Ok(SaleIngestionPipeline::new(
        Arc::new(DedupCache::with_retention(config.dedup_retention)),
        Arc::new(ledger),
        Arc::new(resolver),
        Arc::new(audit),
    )
    .with_max_payload_bytes(config.max_payload_bytes))
}

/// Ingests every file concurrently, returning rows in input order.
async fn ingest_files(pipeline: Arc<SaleIngestionPipeline>, inputs: Vec<PathBuf>) -> Vec<OutcomeRow> {
    let handles: Vec<_> = inputs
        .into_iter()
        .map(|path| {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move {
                let name = path.display().to_string();
                let raw = match tokio::fs::read(&path).await {
                    Ok(raw) => raw,
                    Err(e) => {
                        warn!(file = %name, error = %e, "cannot read input");
                        return None;
                    }
                };
                let filename = path
                    .file_name()
                    .map(|f| f.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let outcome = pipeline.process_attachment(&filename, &raw).await;
                Some(OutcomeRow::new(name, &outcome))
            })
        })
        .collect();

    let mut rows = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(Some(row)) => rows.push(row),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "ingest task failed"),
        }
    }
    rows
}

/// Writes outcome rows as CSV.
///
/// Columns: `file, purchase_id, outcome, total, new_balance, detail`
fn write_outcomes<W: Write>(rows: &[OutcomeRow], writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sale_ledger::{Identity, LedgerError, LedgerOutcome, PurchaseId, RejectReason, Stage};

    #[test]
    fn accepted_row_carries_balance() {
        let outcome = ProcessingOutcome::Accepted {
            purchase_id: PurchaseId::new("123"),
            identity: Some(Identity::new("7656")),
            total_value: 500,
            ledger: LedgerOutcome::Success { new_balance: 1500 },
        };
        let row = OutcomeRow::new("a.json".into(), &outcome);
        assert_eq!(row.purchase_id, "123");
        assert_eq!(row.outcome, "accepted");
        assert_eq!(row.total, Some(500));
        assert_eq!(row.new_balance, Some(1500));
    }

    #[test]
    fn failed_ledger_row_has_no_balance() {
        let outcome = ProcessingOutcome::Accepted {
            purchase_id: PurchaseId::new("9"),
            identity: Some(Identity::new("7656")),
            total_value: 10,
            ledger: LedgerOutcome::Failed(LedgerError::RecordNotFound("x".into())),
        };
        let row = OutcomeRow::new("b.json".into(), &outcome);
        assert_eq!(row.new_balance, None);
        assert!(row.detail.contains("not found"));
    }

    #[test]
    fn writes_csv_with_header() {
        let rows = vec![
            OutcomeRow::new(
                "a.json".into(),
                &ProcessingOutcome::Duplicate {
                    purchase_id: PurchaseId::new("1"),
                },
            ),
            OutcomeRow::new(
                "b.txt".into(),
                &ProcessingOutcome::Rejected {
                    stage: Stage::Received,
                    reason: RejectReason::NotJson("b.txt".into()),
                },
            ),
        ];

        let mut output = Vec::new();
        write_outcomes(&rows, &mut output).unwrap();
        let text = String::from_utf8(output).unwrap();

        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("file,purchase_id,outcome,total,new_balance,detail")
        );
        assert_eq!(lines.next(), Some("a.json,1,duplicate,,,already processed"));
        assert_eq!(
            lines.next(),
            Some("b.txt,,rejected,,,not a json document: b.txt (at Received)")
        );
    }
}
