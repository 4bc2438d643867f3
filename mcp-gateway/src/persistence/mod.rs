//! # Persistence Drivers
//!
//! The registry persists its whole snapshot through exactly one
//! [`PersistLayer`] implementation, chosen at startup from
//! [`crate::config::PersistenceConfig`]. There is no fallback between the
//! two at runtime — a misconfigured gateway fails to start rather than
//! silently running unpersisted.

mod file_snapshot;
mod sqlite;

pub use file_snapshot::FileSnapshotPersistence;
pub use sqlite::SqlitePersistence;

use crate::registry::RegistrySnapshot;
use async_trait::async_trait;

#[async_trait]
pub trait PersistLayer: Send + Sync {
    async fn save(&self, snapshot: &RegistrySnapshot) -> anyhow::Result<()>;
    async fn load(&self) -> anyhow::Result<Option<RegistrySnapshot>>;
}
