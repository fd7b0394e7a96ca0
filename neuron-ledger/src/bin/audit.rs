//! Ledger audit binary
//!
//! Replays every classroom's log against the stored balances.
//!
//! Usage: `ledger-audit [config.toml]`. Without a path the configuration
//! comes from `LEDGER_*` environment variables. Exits non-zero if any
//! classroom fails reconciliation.

use anyhow::Context;
use neuron_ledger::{Config, Ledger, MemoryDirectory, Storage};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // Load configuration
    let config = match std::env::args().nth(1) {
        Some(path) => {
            let mut config = Config::from_file(&path)
                .with_context(|| format!("loading config from {}", path))?;
            config.apply_env()?;
            config
        }
        None => Config::from_env()?,
    };

    tracing::info!(data_dir = ?config.data_dir, "Starting ledger audit");

    let storage = Arc::new(Storage::open(&config).context("opening ledger store")?);
    let stats = storage.get_stats()?;
    tracing::info!(
        classrooms = stats.total_classrooms,
        next_transaction_id = stats.next_transaction_id,
        "Store opened"
    );

    // Reconciliation never resolves users
    let ledger = Ledger::with_store(
        storage,
        Arc::new(MemoryDirectory::new()),
        config.retry.clone(),
    )?;

    let results = ledger.reconcile_all().await?;
    let mut failed = 0;

    for result in &results {
        if result.is_clean() {
            tracing::info!(
                classroom_id = %result.classroom_id,
                records = result.records,
                pool = result.replayed_pool,
                members = result.replayed_members,
                "Classroom reconciled"
            );
        } else {
            failed += 1;
            for discrepancy in &result.discrepancies {
                tracing::error!(
                    classroom_id = %result.classroom_id,
                    "{}",
                    discrepancy
                );
            }
        }
        println!("{}", serde_json::to_string(result)?);
    }

    tracing::info!(classrooms = results.len(), failed, "Audit finished");

    if failed > 0 {
        anyhow::bail!("{} of {} classrooms failed reconciliation", failed, results.len());
    }
    Ok(())
}
