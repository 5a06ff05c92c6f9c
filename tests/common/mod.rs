#![allow(dead_code)]

use audit_ledger::audit::{AuditLedger, FileStore, FixedClock, LedgerEntry, MemoryStore, SqliteStore};
use audit_ledger::config::LedgerConfig;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;

/// Fixed starting instant for deterministic chains
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
}

pub fn fixed_clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::new(t0()))
}

/// Config with quick retries and small verification batches
pub fn test_config() -> LedgerConfig {
    let mut config = LedgerConfig::default();
    config.append.retry_backoff_ms = 1;
    config.query.verify_batch_size = 3;
    config
}

pub async fn memory_ledger(clock: Arc<FixedClock>) -> (AuditLedger, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let ledger = AuditLedger::open(store.clone(), clock, &test_config())
        .await
        .expect("Failed to open memory ledger");
    (ledger, store)
}

pub async fn file_ledger(path: &Path, clock: Arc<FixedClock>) -> AuditLedger {
    let store = Arc::new(FileStore::open(path).expect("Failed to open ledger file"));
    AuditLedger::open(store, clock, &test_config())
        .await
        .expect("Failed to open file ledger")
}

pub fn sqlite_url(dir: &Path) -> String {
    format!("sqlite://{}", dir.join("audit.db").display())
}

pub async fn sqlite_ledger(url: &str, clock: Arc<FixedClock>) -> AuditLedger {
    let store = Arc::new(SqliteStore::connect(url).await.expect("Failed to open database"));
    AuditLedger::open(store, clock, &test_config())
        .await
        .expect("Failed to open sqlite ledger")
}

/// Approval-style payloads used across tests
pub fn approval_payloads(count: usize) -> Vec<Value> {
    (0..count)
        .map(|i| {
            json!({
                "tenant_id": (i % 3) as u64,
                "actor_id": format!("actor-{}", i % 4),
                "action": if i % 2 == 0 { "approve" } else { "deny" },
                "resource": format!("r{}", i),
                "decision": if i % 2 == 0 { "approve" } else { "deny" },
                "reason": null
            })
        })
        .collect()
}

/// Append `payloads`, advancing the clock one second between entries
pub async fn append_all(ledger: &AuditLedger, clock: &FixedClock, payloads: &[Value]) -> Vec<String> {
    let mut hashes = Vec::new();
    for payload in payloads {
        let receipt = ledger
            .append_value(payload.clone())
            .await
            .expect("Failed to append");
        hashes.push(receipt.hash);
        clock.advance(chrono::Duration::seconds(1));
    }
    hashes
}

/// Apply one field mutation to a stored entry
#[derive(Debug, Clone, Copy)]
pub enum Tamper {
    Payload,
    Timestamp,
    PrevHash,
    Hash,
}

pub const ALL_TAMPERS: [Tamper; 4] = [Tamper::Payload, Tamper::Timestamp, Tamper::PrevHash, Tamper::Hash];

pub fn tamper_entry(entry: &mut LedgerEntry, tamper: Tamper) {
    match tamper {
        Tamper::Payload => {
            let mut value = entry.payload.clone().into_value();
            value["resource"] = json!("tampered");
            entry.payload = audit_ledger::Payload::from_value(value).unwrap();
        }
        Tamper::Timestamp => {
            entry.timestamp = entry.timestamp + chrono::Duration::microseconds(1);
        }
        Tamper::PrevHash => {
            entry.prev_hash = format!("sha256:{}", "f".repeat(64));
        }
        Tamper::Hash => {
            entry.hash = format!("sha256:{}", "e".repeat(64));
        }
    }
}
