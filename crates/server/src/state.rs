//! Application state shared across handlers.

use crate::auth::AuthChain;
use crate::coordinator::{CoordinatorSettings, UploadCoordinator};
use std::sync::Arc;
use tessera_core::config::AppConfig;
use tessera_metadata::MetadataStore;
use tessera_storage::ChunkStore;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Chunk storage backend.
    pub storage: Arc<dyn ChunkStore>,
    /// Metadata store.
    pub metadata: Arc<dyn MetadataStore>,
    /// Upload orchestration.
    pub coordinator: Arc<UploadCoordinator>,
    /// Authentication chain.
    pub auth: Arc<AuthChain>,
}

impl AppState {
    /// Create a new application state.
    ///
    /// Fails when the configuration is invalid.
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn ChunkStore>,
        metadata: Arc<dyn MetadataStore>,
    ) -> tessera_core::Result<Self> {
        config.validate()?;

        let coordinator = UploadCoordinator::new(
            CoordinatorSettings::from_config(&config),
            storage.clone(),
            metadata.clone(),
        );
        let auth = AuthChain::from_config(&config.auth, metadata.clone())?;

        Ok(Self {
            config: Arc::new(config),
            storage,
            metadata,
            coordinator: Arc::new(coordinator),
            auth: Arc::new(auth),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_metadata::SqliteStore;
    use tessera_storage::FilesystemChunkStore;
    use tempfile::tempdir;

    async fn stores(dir: &std::path::Path) -> (Arc<dyn ChunkStore>, Arc<dyn MetadataStore>) {
        let storage: Arc<dyn ChunkStore> = Arc::new(
            FilesystemChunkStore::new(dir.join("temp"), dir.join("static"))
                .await
                .unwrap(),
        );
        let metadata: Arc<dyn MetadataStore> =
            Arc::new(SqliteStore::new(dir.join("metadata.db"), None).await.unwrap());
        (storage, metadata)
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let temp = tempdir().unwrap();
        let (storage, metadata) = stores(temp.path()).await;
        let mut config = AppConfig::for_testing();
        config.server.chunk_size = 0;
        assert!(AppState::new(config, storage, metadata).is_err());
    }

    #[tokio::test]
    async fn settings_come_from_config() {
        let temp = tempdir().unwrap();
        let (storage, metadata) = stores(temp.path()).await;
        let mut config = AppConfig::for_testing();
        config.server.chunk_size = 1024;
        config.server.allowed_extensions = "PNG".to_string();
        let state = AppState::new(config, storage, metadata).unwrap();
        assert_eq!(state.coordinator.settings().chunk_size, 1024);
        assert_eq!(state.coordinator.settings().allowed_extensions, vec!["png"]);
    }
}
