use super::PersistLayer;
use crate::registry::RegistrySnapshot;
use anyhow::Context;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;

/// Persists the registry snapshot as a single JSON blob in a one-row
/// table. A relational schema normalized to templates/instances tables
/// would let SQL query individual instances, but nothing in the gateway
/// needs that — every read and write operates on the whole tree, so a
/// one-row blob avoids a join layer with no callers.
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await
            .context("failed to connect to registry database")?;

        sqlx::migrate!("./migrations").run(&pool).await.context("failed to run registry migrations")?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl PersistLayer for SqlitePersistence {
    async fn save(&self, snapshot: &RegistrySnapshot) -> anyhow::Result<()> {
        let payload = serde_json::to_string(snapshot)?;
        sqlx::query(
            "INSERT INTO registry_snapshot (id, payload, updated_at) VALUES (1, ?1, datetime('now'))
             ON CONFLICT(id) DO UPDATE SET payload = excluded.payload, updated_at = excluded.updated_at",
        )
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load(&self) -> anyhow::Result<Option<RegistrySnapshot>> {
        let row = sqlx::query("SELECT payload FROM registry_snapshot WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let payload: String = row.try_get("payload")?;
                match serde_json::from_str(&payload) {
                    Ok(snapshot) => Ok(Some(snapshot)),
                    Err(err) => {
                        tracing::warn!(error = %err, "corrupt registry snapshot in database, starting fresh");
                        Ok(None)
                    }
                }
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcp_gateway_core::Template;

    #[tokio::test]
    async fn round_trips_snapshot() {
        let persistence = SqlitePersistence::connect("sqlite::memory:").await.unwrap();
        let mut snapshot = RegistrySnapshot::default();
        snapshot.templates.insert("echo".to_string(), Template::new("echo"));

        persistence.save(&snapshot).await.unwrap();
        let loaded = persistence.load().await.unwrap().unwrap();
        assert!(loaded.templates.contains_key("echo"));
    }

    #[tokio::test]
    async fn empty_database_loads_as_none() {
        let persistence = SqlitePersistence::connect("sqlite::memory:").await.unwrap();
        assert!(persistence.load().await.unwrap().is_none());
    }
}
