use anyhow::{anyhow, Result};
use clap::{Arg, ArgAction, Command};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{error, info};

use audit_ledger::audit::chain::{is_well_formed_hash, CHAIN_VERSION, HASH_ALGORITHM};
use audit_ledger::audit::{verify_snapshot, FileStore, LedgerEntry, StoredRecord};

fn main() -> Result<()> {
    // Parse command line arguments
    let matches = Command::new("verify-audit-log")
        .version("1.0.0")
        .about("Verify audit ledger file integrity offline")
        .arg(
            Arg::new("log-path")
                .short('l')
                .long("log-path")
                .value_name("PATH")
                .help("Path to the JSON Lines ledger file")
                .required(true),
        )
        .arg(
            Arg::new("head-hash")
                .long("head-hash")
                .value_name("HASH")
                .help("Expected hash of the last entry, retained elsewhere"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Enable verbose output"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .action(ArgAction::SetTrue)
                .help("Suppress output except errors"),
        )
        .get_matches();

    let log_path = matches
        .get_one::<String>("log-path")
        .ok_or_else(|| anyhow!("--log-path is required"))?;
    let expected_head = matches.get_one::<String>("head-hash");
    let verbose = matches.get_flag("verbose");
    let quiet = matches.get_flag("quiet");

    // Set log level based on flags
    let level = if quiet {
        tracing::Level::ERROR
    } else if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    if let Err(e) = verify_ledger_file(log_path, expected_head, verbose) {
        error!("Audit ledger verification failed: {}", e);
        std::process::exit(1);
    }

    if !quiet {
        println!("✓ Audit ledger verification completed successfully");
    }

    Ok(())
}

fn verify_ledger_file(
    log_path: &str,
    expected_head: Option<&String>,
    verbose: bool,
) -> Result<()> {
    info!("Verifying audit ledger: {}", log_path);

    if !Path::new(log_path).exists() {
        return Err(anyhow!("Audit ledger file not found: {}", log_path));
    }

    if let Some(expected) = expected_head {
        if !is_well_formed_hash(expected) {
            return Err(anyhow!(
                "Expected head hash must look like {}:<64 hex digits>, got {}",
                HASH_ALGORITHM,
                expected
            ));
        }
    }

    // Read-only: a torn trailing line is evidence, not something to repair.
    let snapshot = FileStore::inspect(log_path)?;

    if verbose {
        println!("Loaded {} ledger lines", snapshot.records.len());
        if snapshot.torn_tail > 0 {
            println!("Found {} bytes of unterminated trailing data", snapshot.torn_tail);
        }
    }

    let report = verify_snapshot(&snapshot);
    if !report.ok {
        return Err(anyhow!(report.summary()));
    }

    let entries: Vec<LedgerEntry> = snapshot
        .records
        .into_iter()
        .filter_map(|record| match record {
            StoredRecord::Entry(entry) => Some(entry),
            StoredRecord::Undecodable(_) => None,
        })
        .collect();

    if verbose {
        println!("✓ Hash chain integrity verified");
    }

    if let Some(expected) = expected_head {
        if &report.last_hash != expected {
            return Err(anyhow!(
                "Head hash mismatch. Expected: {}, Got: {}",
                expected,
                report.last_hash
            ));
        }

        if verbose {
            println!("✓ Head hash matches retained value");
        }
    }

    if verbose {
        print_summary(&entries, &report.last_hash);
    }

    Ok(())
}

fn print_summary(entries: &[LedgerEntry], head_hash: &str) {
    println!("\nAudit Ledger Summary:");
    println!("  Chain format: {} v{}", HASH_ALGORITHM, CHAIN_VERSION);
    println!("  Total entries: {}", entries.len());
    if let (Some(first), Some(last)) = (entries.first(), entries.last()) {
        println!("  First entry: {}", first.timestamp);
        println!("  Last entry: {}", last.timestamp);
    }
    println!("  Head hash: {}", head_hash);

    let mut actions = BTreeMap::new();
    for entry in entries {
        let action = entry
            .payload
            .get("action")
            .and_then(|v| v.as_str())
            .unwrap_or("(none)")
            .to_string();
        *actions.entry(action).or_insert(0usize) += 1;
    }

    println!("\nAction distribution:");
    for (action, count) in actions {
        println!("  {}: {}", action, count);
    }
}
