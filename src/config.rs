use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

use crate::transfer::{OverdraftPolicy, RetryPolicy, TransferSettings};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    /// Emit per-phase `LEDGER_TX` events
    pub enable_tracing: bool,
    /// PostgreSQL connection URL; `DATABASE_URL` overrides it when set
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    /// Caller-side retry used by the CLI
    #[serde(default)]
    pub retry: RetryPolicy,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub max_connections: u32,
    pub acquire_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_connections: 20,
            acquire_timeout_ms: 5_000,
        }
    }
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

/// Transfer orchestrator options. `0` disables a timeout.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct TransferConfig {
    #[serde(default)]
    pub overdraft: OverdraftPolicy,
    #[serde(default)]
    pub deadline_ms: u64,
    #[serde(default)]
    pub lock_timeout_ms: u64,
}

impl TransferConfig {
    pub fn settings(&self) -> TransferSettings {
        TransferSettings {
            overdraft: self.overdraft,
            deadline: non_zero_millis(self.deadline_ms),
        }
    }

    /// Server-side bound on row-lock waits. Never longer than the deadline,
    /// so a transfer the client gave up on cannot keep waiting for a lock.
    pub fn lock_timeout(&self) -> Option<Duration> {
        match (
            non_zero_millis(self.lock_timeout_ms),
            non_zero_millis(self.deadline_ms),
        ) {
            (Some(lock), Some(deadline)) => Some(lock.min(deadline)),
            (lock, deadline) => lock.or(deadline),
        }
    }
}

fn non_zero_millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

impl AppConfig {
    pub fn load(env: &str) -> anyhow::Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse {}", config_path))
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// `DATABASE_URL` first, then `postgres_url`
    pub fn database_url(&self) -> Option<String> {
        std::env::var("DATABASE_URL")
            .ok()
            .or_else(|| self.postgres_url.clone())
    }
}
