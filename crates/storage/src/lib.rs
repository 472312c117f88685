//! Chunk storage for tessera upload sessions.
//!
//! This crate provides:
//! - The [`ChunkStore`] abstraction over per-session chunk directories
//! - Existence-scan progress counting
//! - Ordered merge into a final artifact with atomic publication
//! - A local filesystem backend

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::filesystem::FilesystemChunkStore;
pub use error::{StorageError, StorageResult};
pub use traits::{ChunkStore, MergedArtifact, SessionDirEntry};

use std::sync::Arc;
use tessera_core::config::StorageConfig;

/// Create a chunk store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn ChunkStore>> {
    config.validate().map_err(StorageError::Config)?;
    let store = FilesystemChunkStore::new(&config.temp_root, &config.artifact_root).await?;
    Ok(Arc::new(store))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tempfile::tempdir;
    use tessera_core::SessionId;

    #[tokio::test]
    async fn from_config_filesystem_ok() {
        let temp = tempdir().unwrap();
        let config = StorageConfig {
            temp_root: temp.path().join("temp"),
            artifact_root: temp.path().join("static"),
        };

        let store = from_config(&config).await.unwrap();
        let id = SessionId::new();
        store.init_session(id).await.unwrap();
        store
            .write_chunk(id, 0, Bytes::from_static(b"hi"))
            .await
            .unwrap();
        assert_eq!(store.count_received(id, 1).await.unwrap(), 1);
        assert!(config.artifact_root.is_dir());
    }

    #[tokio::test]
    async fn from_config_rejects_shared_roots() {
        let temp = tempdir().unwrap();
        let config = StorageConfig {
            temp_root: temp.path().to_path_buf(),
            artifact_root: temp.path().to_path_buf(),
        };

        match from_config(&config).await {
            Ok(_) => panic!("expected error"),
            Err(StorageError::Config(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
}
