//! Bank Ledger - command line entry point
//!
//! ```text
//! bank_ledger [--env dev] init-schema
//! bank_ledger [--env dev] create-account --owner alice --balance 1000 --currency USD
//! bank_ledger [--env dev] transfer --from 1 --to 2 --amount 100
//! bank_ledger [--env dev] account --id 1
//! ```
//!
//! Transfers run against PostgreSQL and are retried on transient failures
//! according to the `retry` config section.

use std::sync::Arc;

use anyhow::{Context, bail};

use bank_ledger::config::AppConfig;
use bank_ledger::db::Database;
use bank_ledger::transfer::adapters::PostgresStore;
use bank_ledger::transfer::schema::ensure_schema;
use bank_ledger::transfer::{
    CreateAccountParams, Store, TransferService, TransferTxParams, with_retry,
};

const USAGE: &str = "usage: bank_ledger [--env <name>] <init-schema|create-account|transfer|account> [options]";

// ============================================================
// ARGUMENTS
// ============================================================

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// First argument that is neither a flag nor a flag's value
fn get_command() -> Option<String> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut i = 0;
    while i < args.len() {
        if args[i].starts_with('-') {
            i += 2;
            continue;
        }
        return Some(args[i].clone());
    }
    None
}

fn get_arg(flag: &str) -> Option<String> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == flag && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
    }
    None
}

fn require_arg(flag: &str) -> anyhow::Result<String> {
    get_arg(flag).with_context(|| format!("missing {}\n{}", flag, USAGE))
}

fn require_i64(flag: &str) -> anyhow::Result<i64> {
    let raw = require_arg(flag)?;
    raw.parse()
        .with_context(|| format!("{} expects an integer, got {:?}", flag, raw))
}

// ============================================================
// MAIN
// ============================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let app_config = AppConfig::load(&env)?;
    let _log_guard = bank_ledger::logging::init_logging(&app_config);

    tracing::info!(
        env = %env,
        git_hash = env!("BANK_LEDGER_GIT_HASH"),
        "Starting bank_ledger"
    );

    let Some(command) = get_command() else {
        bail!(USAGE);
    };

    let database_url = app_config
        .database_url()
        .context("no database configured: set DATABASE_URL or postgres_url")?;
    let db = Database::connect(&database_url, &app_config.database)
        .await
        .context("Failed to connect to PostgreSQL")?;
    db.health_check().await.context("PostgreSQL health check failed")?;

    let store = Arc::new(
        PostgresStore::new(db.pool().clone())
            .with_lock_timeout(app_config.transfer.lock_timeout()),
    );

    match command.as_str() {
        "init-schema" => {
            ensure_schema(db.pool()).await?;
            println!("schema ready");
        }
        "create-account" => {
            let params = CreateAccountParams {
                owner: require_arg("--owner")?,
                balance: require_i64("--balance")?,
                currency: get_arg("--currency").unwrap_or_else(|| "USD".to_string()),
            };
            let account = store.create_account(params).await?;
            println!("{}", serde_json::to_string_pretty(&account)?);
        }
        "transfer" => {
            let params = TransferTxParams::new(
                require_i64("--from")?,
                require_i64("--to")?,
                require_i64("--amount")?,
            );
            let service = TransferService::new(Arc::clone(&store), app_config.transfer.settings());
            let policy = app_config.retry;

            let result = with_retry(&policy, || service.transfer_tx(params))
                .await
                .with_context(|| {
                    format!(
                        "transfer {} -> {} of {} failed",
                        params.from_account_id, params.to_account_id, params.amount
                    )
                })?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        "account" => {
            let account = store.get_account(require_i64("--id")?).await?;
            println!("{}", serde_json::to_string_pretty(&account)?);
        }
        other => bail!("unknown command {:?}\n{}", other, USAGE),
    }

    Ok(())
}
