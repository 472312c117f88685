//! Principal records.

use crate::error::MetadataResult;
use crate::models::PrincipalRow;
use async_trait::async_trait;

/// Result of deleting a principal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrincipalDeleteStats {
    pub tokens_deleted: u64,
}

/// Repository for principal records.
///
/// Ownership links (sessions, artifacts, tokens) are plain columns with no
/// declarative cascades. Deletion checks them explicitly.
#[async_trait]
pub trait PrincipalRepo: Send + Sync {
    async fn create_principal(&self, principal: &PrincipalRow) -> MetadataResult<()>;

    async fn get_principal(&self, principal: &str) -> MetadataResult<Option<PrincipalRow>>;

    /// Delete a principal and its API tokens.
    ///
    /// Refuses with `Constraint` while the principal still owns artifacts or
    /// upload sessions. Fails with `NotFound` if the principal does not exist.
    async fn delete_principal(&self, principal: &str) -> MetadataResult<PrincipalDeleteStats>;
}
