use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use audit_ledger::audit::{AuditLedger, Checkpoint, EntryFilter, FieldMatch};
use audit_ledger::config::{LedgerConfig, DEFAULT_CONFIG_FILE};

#[derive(Parser)]
#[command(name = "audit-ledger", version, about = "Tamper-evident audit ledger")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Append a JSON object to the ledger
    Append {
        #[arg(short, long)]
        payload: String,
    },
    /// Replay the chain and report the first inconsistency
    Verify {
        #[arg(long, default_value_t = 0)]
        from: u64,
        #[arg(long)]
        to: Option<u64>,
        #[arg(long, requires = "checkpoint_hash")]
        checkpoint_sequence: Option<u64>,
        #[arg(long, requires = "checkpoint_sequence")]
        checkpoint_hash: Option<String>,
    },
    /// List entries
    List {
        #[arg(long)]
        from: Option<u64>,
        #[arg(long)]
        to: Option<u64>,
        /// RFC 3339 lower time bound
        #[arg(long)]
        since: Option<DateTime<Utc>>,
        /// RFC 3339 upper time bound
        #[arg(long)]
        until: Option<DateTime<Utc>>,
        /// Payload match as key=value (repeatable)
        #[arg(long = "field")]
        fields: Vec<String>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        desc: bool,
    },
    /// Print the current chain head
    Head,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = LedgerConfig::load_from(&cli.config)?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let ledger = AuditLedger::from_config(&config)
        .await
        .context("Failed to open audit ledger")?;

    match cli.command {
        Command::Append { payload } => {
            let value: serde_json::Value =
                serde_json::from_str(&payload).context("Payload is not valid JSON")?;
            let receipt = ledger.append_value(value).await?;
            info!("Appended entry {}", receipt.sequence);
            println!("{}", serde_json::to_string_pretty(&receipt)?);
        }
        Command::Verify {
            from,
            to,
            checkpoint_sequence,
            checkpoint_hash,
        } => {
            let report = match (checkpoint_sequence, checkpoint_hash) {
                (Some(sequence), Some(hash)) => {
                    ledger
                        .verify_checkpoint(&Checkpoint { sequence, hash })
                        .await?
                }
                _ => ledger.verify(from, to).await?,
            };

            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.ok {
                error!("{}", report.summary());
                std::process::exit(1);
            }
        }
        Command::List {
            from,
            to,
            since,
            until,
            fields,
            limit,
            desc,
        } => {
            let mut filter = EntryFilter::new();
            filter.from_sequence = from;
            filter.to_sequence = to;
            filter.since = since;
            filter.until = until;
            filter.limit = limit;
            for raw in &fields {
                let field = FieldMatch::parse(raw)
                    .ok_or_else(|| anyhow!("Invalid field filter '{}', expected key=value", raw))?;
                filter.fields.push(field);
            }
            if desc {
                filter = filter.descending();
            }

            let page = ledger.list(&filter).await?;
            println!("{}", serde_json::to_string_pretty(&page)?);
        }
        Command::Head => {
            let head = ledger.head().await;
            println!("{}", serde_json::to_string_pretty(&head)?);
        }
    }

    Ok(())
}
