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

//! Concurrency tests for the ledger and pipeline.
//!
//! These verify that credits to the same balance file serialize on its lock,
//! that different files never wait on each other, and that concurrent
//! redeliveries of one purchase are credited once.

use sale_ledger::{
    AuditLog, BalanceLedger, BuyerRef, DedupCache, Identity, LockRegistry, ProcessingOutcome,
    SaleIngestionPipeline, StaticDirectory,
};
use serde_json::json;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn seed(dir: &Path, identity: &str, balance: i64) {
    fs::write(
        dir.join(format!("{identity}.json")),
        json!({ "Balance": balance, "Owner": identity }).to_string(),
    )
    .unwrap();
}

fn ledger(dir: &Path, locks: Arc<LockRegistry>) -> Arc<BalanceLedger> {
    Arc::new(BalanceLedger::new(dir, "Balance", locks).with_backups(false))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_credits_to_one_identity_all_land() {
    let dir = tempfile::tempdir().unwrap();
    seed(dir.path(), "7656", 1000);
    let ledger = ledger(dir.path(), Arc::new(LockRegistry::new()));

    let handles: Vec<_> = (0..50)
        .map(|_| {
            let ledger = Arc::clone(&ledger);
            tokio::spawn(async move { ledger.apply(&Identity::new("7656"), 10).await })
        })
        .collect();

    let mut balances = Vec::new();
    for handle in handles {
        balances.push(handle.await.unwrap().unwrap());
    }

    // Every intermediate balance is distinct: no two credits saw the same state
    balances.sort_unstable();
    balances.dedup();
    assert_eq!(balances.len(), 50);
    assert_eq!(ledger.balance(&Identity::new("7656")).await, Ok(1500));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn credits_to_different_identities_are_isolated() {
    let dir = tempfile::tempdir().unwrap();
    for n in 0..10 {
        seed(dir.path(), &format!("id{n}"), n * 100);
    }
    let ledger = ledger(dir.path(), Arc::new(LockRegistry::new()));

    let mut handles = Vec::new();
    for round in 0..5 {
        for n in 0..10 {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move {
                ledger
                    .apply(&Identity::new(format!("id{n}")), round + 1)
                    .await
            }));
        }
    }
    for handle in futures::future::join_all(handles).await {
        handle.unwrap().unwrap();
    }

    // 1 + 2 + 3 + 4 + 5
    for n in 0..10 {
        assert_eq!(
            ledger.balance(&Identity::new(format!("id{n}"))).await,
            Ok(n * 100 + 15)
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn held_lock_only_blocks_its_own_file() {
    let dir = tempfile::tempdir().unwrap();
    seed(dir.path(), "a", 0);
    seed(dir.path(), "b", 0);
    let locks = Arc::new(LockRegistry::new());
    let ledger = ledger(dir.path(), Arc::clone(&locks));

    let lock_a = locks.get_lock(&dir.path().join("a.json"));
    let guard = lock_a.lock().await;

    let other = tokio::time::timeout(
        Duration::from_secs(5),
        ledger.apply(&Identity::new("b"), 7),
    )
    .await;
    assert_eq!(other, Ok(Ok(7)));

    let blocked = tokio::time::timeout(
        Duration::from_millis(200),
        ledger.apply(&Identity::new("a"), 7),
    )
    .await;
    assert!(blocked.is_err(), "credit must wait while the file is locked");

    drop(guard);
    assert_eq!(ledger.apply(&Identity::new("a"), 7).await, Ok(7));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_redeliveries_credit_once() {
    let dir = tempfile::tempdir().unwrap();
    seed(dir.path(), "7656", 1000);

    let mut directory = StaticDirectory::new();
    directory.insert(BuyerRef::new("u-1"), Identity::new("7656"));
    let pipeline = Arc::new(SaleIngestionPipeline::new(
        Arc::new(DedupCache::new()),
        ledger(dir.path(), Arc::new(LockRegistry::new())),
        Arc::new(directory),
        Arc::new(AuditLog::open(dir.path().join("audit.log")).unwrap()),
    ));

    let raw = json!({
        "purchase": {"id": "123"},
        "user": {"id": "u-1"},
        "delivered_products": [{"id": "A", "content": [{"id": 1, "type": "number", "value": "500"}]}]
    })
    .to_string();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let pipeline = Arc::clone(&pipeline);
            let raw = raw.clone();
            tokio::spawn(async move { pipeline.process_notification(raw.as_bytes()).await })
        })
        .collect();

    let outcomes: Vec<ProcessingOutcome> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|h| h.unwrap())
        .collect();

    assert_eq!(outcomes.iter().filter(|o| o.is_accepted()).count(), 1);
    assert_eq!(outcomes.iter().filter(|o| o.label() == "duplicate").count(), 7);

    let record: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("7656.json")).unwrap()).unwrap();
    assert_eq!(record["Balance"], json!(1500));
    assert_eq!(record["Owner"], json!("7656"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dropped_credit_never_overwrites_a_later_one() {
    let dir = tempfile::tempdir().unwrap();
    // A large record keeps each write in flight long enough to be interrupted
    fs::write(
        dir.path().join("7656.json"),
        json!({ "Balance": 0, "Padding": "x".repeat(4 * 1024 * 1024) }).to_string(),
    )
    .unwrap();
    let ledger = ledger(dir.path(), Arc::new(LockRegistry::new()));
    let identity = Identity::new("7656");

    for round in 1..=10u64 {
        let interrupted = tokio::time::timeout(
            Duration::from_micros(500 * round),
            ledger.apply(&identity, 1),
        )
        .await;

        let after = ledger.apply(&identity, 1).await.unwrap();
        assert_eq!(ledger.balance(&identity).await, Ok(after));
        if let Ok(result) = interrupted {
            assert!(result.unwrap() < after);
        }
    }
}
