//! Bootstrap DDL for the ledger tables
//!
//! Production deployments manage schema with their own migration tool;
//! this exists so a fresh database (and the test suite) can run transfers.

use sqlx::PgPool;

use super::error::LedgerError;

const CREATE_ACCOUNTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id          BIGSERIAL PRIMARY KEY,
    owner       VARCHAR NOT NULL,
    balance     BIGINT NOT NULL,
    currency    VARCHAR NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

const CREATE_ENTRIES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS entries (
    id          BIGSERIAL PRIMARY KEY,
    account_id  BIGINT NOT NULL REFERENCES accounts (id),
    amount      BIGINT NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

const CREATE_TRANSFERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS transfers (
    id               BIGSERIAL PRIMARY KEY,
    from_account_id  BIGINT NOT NULL REFERENCES accounts (id),
    to_account_id    BIGINT NOT NULL REFERENCES accounts (id),
    amount           BIGINT NOT NULL CHECK (amount > 0),
    created_at       TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

const TABLES: &[&str] = &[
    CREATE_ACCOUNTS_TABLE,
    CREATE_ENTRIES_TABLE,
    CREATE_TRANSFERS_TABLE,
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS entries_account_id_idx ON entries (account_id)",
    "CREATE INDEX IF NOT EXISTS transfers_from_to_idx ON transfers (from_account_id, to_account_id)",
    "CREATE INDEX IF NOT EXISTS transfers_to_idx ON transfers (to_account_id)",
];

/// Create the accounts, entries and transfers tables if missing.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), LedgerError> {
    tracing::info!("Ensuring ledger schema...");

    for &ddl in TABLES.iter().chain(INDEXES) {
        sqlx::query(ddl).execute(pool).await?;
    }

    tracing::info!("Ledger schema ready");
    Ok(())
}
