//! Store backends the CLI can operate on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledger_store::{
    InMemoryLedgerStore, LedgerStore, PostgresLedgerStore, Result, TransactionId,
};
use sqlx::postgres::PgPoolOptions;

use crate::config::Config;

/// Operator-only capabilities on top of [`LedgerStore`].
#[async_trait]
pub trait OperatorStore: LedgerStore + Clone + 'static {
    /// Applies schema migrations. Returns whether anything had to be run.
    async fn migrate(&self) -> Result<bool>;

    /// Rewrites a transaction's timestamps; fixtures only.
    async fn backdate(
        &self,
        id: TransactionId,
        created: DateTime<Utc>,
        expires: Option<DateTime<Utc>>,
    ) -> Result<()>;
}

#[async_trait]
impl OperatorStore for InMemoryLedgerStore {
    async fn migrate(&self) -> Result<bool> {
        Ok(false)
    }

    async fn backdate(
        &self,
        id: TransactionId,
        created: DateTime<Utc>,
        expires: Option<DateTime<Utc>>,
    ) -> Result<()> {
        InMemoryLedgerStore::backdate(self, id, created, expires).await
    }
}

#[async_trait]
impl OperatorStore for PostgresLedgerStore {
    async fn migrate(&self) -> Result<bool> {
        self.run_migrations().await?;
        Ok(true)
    }

    async fn backdate(
        &self,
        id: TransactionId,
        created: DateTime<Utc>,
        expires: Option<DateTime<Utc>>,
    ) -> Result<()> {
        PostgresLedgerStore::backdate(self, id, created, expires).await
    }
}

/// Opens a pooled PostgreSQL store.
pub async fn connect(config: &Config) -> anyhow::Result<PostgresLedgerStore> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;

    tracing::info!(
        max_connections = config.database_max_connections,
        "connected to PostgreSQL"
    );
    Ok(PostgresLedgerStore::new(pool))
}
