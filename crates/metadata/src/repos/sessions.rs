//! Upload session registry.

use crate::error::{MetadataError, MetadataResult};
use crate::models::SessionRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// One row per upload session, independent of chunk bytes.
#[async_trait]
pub trait SessionRegistry: Send + Sync {
    /// Create a session. Fails with `AlreadyExists` if the id is taken.
    async fn create_session(&self, session: &SessionRow) -> MetadataResult<()>;

    /// Look up a session.
    async fn find_session(&self, session_id: Uuid) -> MetadataResult<Option<SessionRow>>;

    /// Look up a session, failing with `NotFound` if absent.
    async fn get_session(&self, session_id: Uuid) -> MetadataResult<SessionRow> {
        self.find_session(session_id)
            .await?
            .ok_or_else(|| MetadataError::NotFound(format!("upload session {session_id}")))
    }

    /// Persist the last observed chunk count.
    async fn update_received_count(
        &self,
        session_id: Uuid,
        received_count: u32,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Delete a session row. Returns whether a row was removed.
    async fn delete_session(&self, session_id: Uuid) -> MetadataResult<bool>;

    /// Count sessions owned by a principal.
    async fn count_sessions_for_owner(&self, owner: &str) -> MetadataResult<u64>;
}
