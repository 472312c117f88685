//! Registry of finished artifacts.

use crate::error::MetadataResult;
use crate::models::ArtifactRow;
use async_trait::async_trait;
use uuid::Uuid;

/// Records artifacts produced by a successful merge.
#[async_trait]
pub trait ArtifactRegistry: Send + Sync {
    async fn register_artifact(&self, artifact: &ArtifactRow) -> MetadataResult<()>;

    async fn get_artifact(&self, artifact_id: Uuid) -> MetadataResult<Option<ArtifactRow>>;

    /// Artifacts of one owner, newest first.
    async fn list_artifacts_for_owner(&self, owner: &str) -> MetadataResult<Vec<ArtifactRow>>;

    async fn count_artifacts_for_owner(&self, owner: &str) -> MetadataResult<u64>;
}
