use super::PersistLayer;
use crate::registry::RegistrySnapshot;
use async_trait::async_trait;
use std::path::PathBuf;

/// Snapshots the registry to a single JSON file. Writes go to
/// `<path>.tmp` first, then rename over `path` — a crash mid-write never
/// leaves a half-written file where the gateway expects a complete one.
pub struct FileSnapshotPersistence {
    path: PathBuf,
}

impl FileSnapshotPersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PersistLayer for FileSnapshotPersistence {
    async fn save(&self, snapshot: &RegistrySnapshot) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp_path = self.path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(snapshot)?;
        tokio::fs::write(&tmp_path, content).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }

    async fn load(&self) -> anyhow::Result<Option<RegistrySnapshot>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(snapshot) => Ok(Some(snapshot)),
                Err(err) => {
                    tracing::warn!(path = %self.path.display(), error = %err, "corrupt registry snapshot, starting fresh");
                    Ok(None)
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}
