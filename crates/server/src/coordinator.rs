//! Upload orchestration.
//!
//! The coordinator validates requests, enforces ownership and drives the
//! session registry and the chunk store. The chunk store is always the source
//! of truth for progress: every call that reports progress recounts.

use crate::error::{ApiError, ApiResult};
use crate::locks::SessionLocks;
use crate::metrics;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Instant;
use tessera_core::artifact::{artifact_url, owner_dir, unique_artifact_name};
use tessera_core::config::AppConfig;
use tessera_core::upload::{
    ChunkUploadResponse, InitUploadRequest, InitUploadResponse, UploadStatusResponse,
    file_extension, min_chunks,
};
use tessera_core::{ArtifactDescriptor, DisplaySnippets, PrincipalId, SessionId, UploadSession};
use tessera_metadata::models::{ArtifactRow, SessionRow};
use tessera_metadata::{MetadataError, MetadataStore};
use tessera_storage::{ChunkStore, StorageError};
use time::OffsetDateTime;
use uuid::Uuid;

/// Longest accepted original filename or display name, in characters.
pub const MAX_NAME_LEN: usize = 255;

/// Limits and publishing settings fixed at construction.
#[derive(Clone, Debug)]
pub struct CoordinatorSettings {
    pub chunk_size: u64,
    pub max_file_size: u64,
    pub allowed_extensions: Vec<String>,
    pub base_url: String,
    pub path_prefix: String,
}

impl CoordinatorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            chunk_size: config.server.chunk_size,
            max_file_size: config.server.max_file_size,
            allowed_extensions: config.server.allowed_extensions(),
            base_url: config.publish.base_url.clone(),
            path_prefix: config.publish.path_prefix.clone(),
        }
    }

    fn is_extension_allowed(&self, extension: &str) -> bool {
        self.allowed_extensions.iter().any(|e| e == extension)
    }
}

/// Request-facing orchestration over the registry and the chunk store.
pub struct UploadCoordinator {
    settings: CoordinatorSettings,
    chunks: Arc<dyn ChunkStore>,
    metadata: Arc<dyn MetadataStore>,
    locks: SessionLocks,
}

impl UploadCoordinator {
    pub fn new(
        settings: CoordinatorSettings,
        chunks: Arc<dyn ChunkStore>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        Self {
            settings,
            chunks,
            metadata,
            locks: SessionLocks::new(),
        }
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    /// Open a new upload session.
    ///
    /// All validation happens before the session directory is created.
    #[tracing::instrument(skip(self, req), fields(owner = %owner, session_id))]
    pub async fn init_upload(
        &self,
        owner: &PrincipalId,
        req: InitUploadRequest,
    ) -> ApiResult<InitUploadResponse> {
        let filename = req.filename.trim().to_string();
        if filename.is_empty() {
            return Err(ApiError::Validation("filename must not be empty".to_string()));
        }
        if filename.chars().count() > MAX_NAME_LEN {
            return Err(ApiError::Validation(format!(
                "filename exceeds {MAX_NAME_LEN} characters"
            )));
        }

        let extension = file_extension(&filename).ok_or_else(|| {
            ApiError::Validation(format!("filename {filename:?} has no extension"))
        })?;
        if !self.settings.is_extension_allowed(&extension) {
            return Err(ApiError::Validation(format!(
                "extension {extension:?} is not allowed (allowed: {})",
                self.settings.allowed_extensions.join(", ")
            )));
        }

        if req.file_size > self.settings.max_file_size {
            return Err(ApiError::Validation(format!(
                "file size {} exceeds maximum {}",
                req.file_size, self.settings.max_file_size
            )));
        }

        self.validate_chunk_count(req.file_size, req.total_chunks)?;

        let display_name = match req.display_name.map(|n| n.trim().to_string()) {
            Some(name) if name.chars().count() > MAX_NAME_LEN => {
                return Err(ApiError::Validation(format!(
                    "display name exceeds {MAX_NAME_LEN} characters"
                )));
            }
            Some(name) if !name.is_empty() => Some(name),
            _ => None,
        };

        let session = UploadSession::new(
            owner.clone(),
            filename,
            display_name,
            extension,
            req.file_size,
            req.total_chunks,
        );
        tracing::Span::current().record("session_id", tracing::field::display(session.id));

        self.chunks.init_session(session.id).await?;
        if let Err(e) = self.metadata.create_session(&SessionRow::from(&session)).await {
            self.discard_session_dir(session.id).await;
            return Err(match e {
                MetadataError::AlreadyExists(what) => ApiError::Conflict(what),
                other => other.into(),
            });
        }

        metrics::UPLOAD_SESSIONS_CREATED.inc();
        tracing::info!(
            session_id = %session.id,
            owner = %owner,
            file_size = session.declared_size,
            total_chunks = session.total_chunks,
            "Upload session created"
        );

        Ok(InitUploadResponse {
            session_id: session.id.to_string(),
            chunk_size: self.settings.chunk_size,
            total_chunks: session.total_chunks,
        })
    }

    fn validate_chunk_count(&self, file_size: u64, total_chunks: u32) -> ApiResult<()> {
        if total_chunks == 0 {
            return Err(ApiError::Validation(
                "total_chunks must be at least 1".to_string(),
            ));
        }
        let total = u64::from(total_chunks);
        let needed = min_chunks(file_size, self.settings.chunk_size);
        if total < needed {
            return Err(ApiError::Validation(format!(
                "{file_size} bytes need at least {needed} chunks of at most {} bytes, got {total_chunks}",
                self.settings.chunk_size
            )));
        }
        if file_size == 0 && total_chunks != 1 {
            return Err(ApiError::Validation(
                "an empty file is uploaded as exactly one empty chunk".to_string(),
            ));
        }
        if file_size > 0 && total > file_size {
            return Err(ApiError::Validation(format!(
                "{total_chunks} chunks cannot carry {file_size} bytes without an empty chunk"
            )));
        }
        Ok(())
    }

    /// Store one chunk and report fresh progress.
    #[tracing::instrument(
        skip(self, data),
        fields(owner = %owner, session_id = %session_id, chunk_index = index, size = data.len())
    )]
    pub async fn upload_chunk(
        &self,
        owner: &PrincipalId,
        session_id: SessionId,
        index: u32,
        declared_total: Option<u32>,
        data: Bytes,
    ) -> ApiResult<ChunkUploadResponse> {
        let start = Instant::now();
        let session = self.load_owned(owner, session_id).await?;

        if let Some(total) = declared_total
            && total != session.total_chunks
        {
            return Err(ApiError::Validation(format!(
                "total_chunks {total} does not match the session's {}",
                session.total_chunks
            )));
        }
        if !session.contains_index(index) {
            return Err(ApiError::Validation(format!(
                "chunk_index {index} out of range, expected 0..={}",
                session.total_chunks.saturating_sub(1)
            )));
        }
        let len = data.len() as u64;
        if len > self.settings.chunk_size {
            return Err(ApiError::Validation(format!(
                "chunk of {len} bytes exceeds chunk size {}",
                self.settings.chunk_size
            )));
        }
        if len == 0 && session.declared_size > 0 {
            return Err(ApiError::Validation("chunk body is empty".to_string()));
        }

        let received = {
            let _guard = self.locks.shared(session_id).await;
            self.chunks.write_chunk(session_id, index, data).await?;
            let received = self.chunks.count_received(session_id, session.total_chunks).await?;
            self.metadata
                .update_received_count(*session_id.as_uuid(), received, OffsetDateTime::now_utc())
                .await?;
            received
        };

        metrics::CHUNKS_RECEIVED.inc();
        metrics::BYTES_RECEIVED.inc_by(len);
        metrics::CHUNK_UPLOAD_DURATION.observe(start.elapsed().as_secs_f64());
        tracing::debug!(
            session_id = %session_id,
            chunk_index = index,
            received,
            total_chunks = session.total_chunks,
            "Chunk stored"
        );

        Ok(ChunkUploadResponse {
            session_id: session_id.to_string(),
            chunk_index: index,
            uploaded_chunks: received,
            total_chunks: session.total_chunks,
            is_completed: received == session.total_chunks,
        })
    }

    /// Report progress from a fresh scan of the chunk store.
    #[tracing::instrument(skip(self), fields(owner = %owner, session_id = %session_id))]
    pub async fn upload_status(
        &self,
        owner: &PrincipalId,
        session_id: SessionId,
    ) -> ApiResult<UploadStatusResponse> {
        let session = self.load_owned(owner, session_id).await?;
        let received = self
            .chunks
            .count_received(session_id, session.total_chunks)
            .await?;

        Ok(UploadStatusResponse {
            session_id: session_id.to_string(),
            filename: session.original_filename.clone(),
            uploaded_chunks: received,
            total_chunks: session.total_chunks,
            missing_chunks: session.missing(received),
            state: session.state(received),
        })
    }

    /// Concatenate all chunks into a finished artifact, register it and
    /// destroy the session.
    #[tracing::instrument(skip(self), fields(owner = %owner, session_id = %session_id))]
    pub async fn merge_session(
        &self,
        owner: &PrincipalId,
        session_id: SessionId,
    ) -> ApiResult<ArtifactDescriptor> {
        let start = Instant::now();
        let session = self.load_owned(owner, session_id).await?;
        let _guard = self.locks.exclusive(session_id).await;

        if !self.chunks.session_exists(session_id).await? {
            metrics::record_merge_failure("expired");
            self.forget_row(session_id).await;
            return Err(ApiError::NotFound(format!(
                "upload session {session_id} has expired"
            )));
        }

        let received = self
            .chunks
            .count_received(session_id, session.total_chunks)
            .await?;
        if received < session.total_chunks {
            metrics::record_merge_failure("incomplete");
            return Err(ApiError::IncompleteUpload {
                missing: session.missing(received),
            });
        }

        let now = OffsetDateTime::now_utc();
        let file_name = unique_artifact_name(owner, &session.extension, now);
        let key = format!("{}/{file_name}", owner_dir(owner));

        let merged = match self
            .chunks
            .merge_in_order(session_id, session.total_chunks, &key)
            .await
        {
            Ok(merged) => merged,
            Err(StorageError::IncompleteUpload { missing }) => {
                metrics::record_merge_failure("incomplete");
                return Err(ApiError::IncompleteUpload { missing });
            }
            Err(e) => {
                metrics::record_merge_failure("storage");
                return Err(e.into());
            }
        };

        if merged.size != session.declared_size {
            metrics::record_merge_failure("size_mismatch");
            self.discard_artifact(&key).await;
            return Err(ApiError::Validation(format!(
                "merged size {} does not match declared size {}",
                merged.size, session.declared_size
            )));
        }

        let url = artifact_url(
            &self.settings.base_url,
            &self.settings.path_prefix,
            owner,
            &file_name,
        );
        let snippets = DisplaySnippets::build(session.display_label(), &url);
        let row = ArtifactRow {
            artifact_id: Uuid::new_v4(),
            owner: owner.to_string(),
            filename: session.original_filename.clone(),
            display_name: session.display_name.clone(),
            path: merged.key.clone(),
            url: url.clone(),
            markdown: snippets.markdown.clone(),
            html: snippets.html.clone(),
            size_bytes: i64::try_from(merged.size).unwrap_or(i64::MAX),
            created_at: now,
        };

        // Keep the session so the client can retry the merge.
        if let Err(e) = self.metadata.register_artifact(&row).await {
            metrics::record_merge_failure("register");
            self.discard_artifact(&key).await;
            return Err(e.into());
        }

        self.forget_row(session_id).await;
        self.discard_session_dir(session_id).await;

        metrics::MERGES_COMPLETED.inc();
        metrics::ARTIFACT_BYTES_WRITTEN.inc_by(merged.size);
        metrics::MERGE_DURATION.observe(start.elapsed().as_secs_f64());
        tracing::info!(
            session_id = %session_id,
            owner = %owner,
            artifact_id = %row.artifact_id,
            path = %merged.key,
            size = merged.size,
            "Upload merged"
        );

        Ok(ArtifactDescriptor {
            id: row.artifact_id,
            url,
            markdown_snippet: snippets.markdown,
            html_snippet: snippets.html,
        })
    }

    /// Abandon a session: drop the registry row and the chunk directory.
    #[tracing::instrument(skip(self), fields(owner = %owner, session_id = %session_id))]
    pub async fn abort_upload(&self, owner: &PrincipalId, session_id: SessionId) -> ApiResult<()> {
        self.load_owned(owner, session_id).await?;
        let _guard = self.locks.exclusive(session_id).await;

        self.metadata.delete_session(*session_id.as_uuid()).await?;
        self.discard_session_dir(session_id).await;

        metrics::UPLOAD_SESSIONS_ABORTED.inc();
        tracing::info!(session_id = %session_id, owner = %owner, "Upload session aborted");
        Ok(())
    }

    /// Load a session and check that `owner` may act on it.
    async fn load_owned(
        &self,
        owner: &PrincipalId,
        session_id: SessionId,
    ) -> ApiResult<UploadSession> {
        let row = self
            .metadata
            .find_session(*session_id.as_uuid())
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("upload session {session_id}")))?;
        let session = UploadSession::try_from(row)?;
        if session.owner != *owner {
            tracing::warn!(
                session_id = %session_id,
                principal = %owner,
                "Rejected access to another principal's session"
            );
            return Err(ApiError::Forbidden(
                "access to this upload session is denied".to_string(),
            ));
        }
        Ok(session)
    }

    async fn forget_row(&self, session_id: SessionId) {
        if let Err(e) = self.metadata.delete_session(*session_id.as_uuid()).await {
            tracing::error!(session_id = %session_id, error = %e, "Failed to delete session row");
        }
    }

    async fn discard_session_dir(&self, session_id: SessionId) {
        if let Err(e) = self.chunks.delete_session(session_id).await {
            tracing::warn!(
                session_id = %session_id,
                error = %e,
                "Failed to remove session directory"
            );
        }
    }

    async fn discard_artifact(&self, key: &str) {
        if let Err(e) = self.chunks.delete_artifact(key).await {
            tracing::error!(path = %key, error = %e, "Failed to remove rejected artifact");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_metadata::SqliteStore;
    use tessera_storage::FilesystemChunkStore;

    struct Harness {
        _dir: tempfile::TempDir,
        chunks: Arc<FilesystemChunkStore>,
        coordinator: UploadCoordinator,
    }

    async fn harness(chunk_size: u64) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let chunks = Arc::new(
            FilesystemChunkStore::new(dir.path().join("temp"), dir.path().join("static"))
                .await
                .unwrap(),
        );
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(dir.path().join("meta.db"), None)
                .await
                .unwrap(),
        );
        let mut config = AppConfig::for_testing();
        config.server.chunk_size = chunk_size;
        let coordinator = UploadCoordinator::new(
            CoordinatorSettings::from_config(&config),
            chunks.clone(),
            metadata,
        );
        Harness {
            _dir: dir,
            chunks,
            coordinator,
        }
    }

    fn alice() -> PrincipalId {
        PrincipalId::parse("alice").unwrap()
    }

    fn request(filename: &str, file_size: u64, total_chunks: u32) -> InitUploadRequest {
        InitUploadRequest {
            filename: filename.to_string(),
            file_size,
            total_chunks,
            display_name: None,
        }
    }

    #[tokio::test]
    async fn test_init_validation_happens_before_directory() {
        let h = harness(4).await;
        for req in [
            request("notes.txt", 8, 2),
            request("noext", 8, 2),
            request("cat.png", 8, 0),
            request("cat.png", 8, 1),
            request("cat.png", 2, 3),
            request("cat.png", 0, 2),
        ] {
            let err = h.coordinator.init_upload(&alice(), req).await.unwrap_err();
            assert!(matches!(err, ApiError::Validation(_)), "{err:?}");
        }
        let dirs = h.chunks.list_session_dirs().await.unwrap();
        assert!(dirs.is_empty());
    }

    #[tokio::test]
    async fn test_init_rejects_oversize() {
        let h = harness(4).await;
        let max = h.coordinator.settings().max_file_size;
        let err = h
            .coordinator
            .init_upload(&alice(), request("cat.png", max + 1, u32::MAX))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(m) if m.contains("exceeds maximum")));
    }

    #[tokio::test]
    async fn test_extension_check_is_case_insensitive() {
        let h = harness(4).await;
        let resp = h
            .coordinator
            .init_upload(&alice(), request("CAT.PNG", 8, 2))
            .await
            .unwrap();
        assert_eq!(resp.chunk_size, 4);
        assert_eq!(resp.total_chunks, 2);
    }

    #[tokio::test]
    async fn test_chunk_index_out_of_range_names_range() {
        let h = harness(4).await;
        let id = h
            .coordinator
            .init_upload(&alice(), request("cat.png", 8, 2))
            .await
            .unwrap()
            .session_id;
        let id = SessionId::parse(&id).unwrap();
        let err = h
            .coordinator
            .upload_chunk(&alice(), id, 2, None, Bytes::from_static(b"abcd"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(m) if m.contains("0..=1")));
    }

    #[tokio::test]
    async fn test_body_limits() {
        let h = harness(4).await;
        let id = h
            .coordinator
            .init_upload(&alice(), request("cat.png", 8, 2))
            .await
            .unwrap()
            .session_id;
        let id = SessionId::parse(&id).unwrap();

        let too_big = h
            .coordinator
            .upload_chunk(&alice(), id, 0, None, Bytes::from_static(b"abcde"))
            .await;
        assert!(matches!(too_big, Err(ApiError::Validation(_))));

        let empty = h
            .coordinator
            .upload_chunk(&alice(), id, 0, None, Bytes::new())
            .await;
        assert!(matches!(empty, Err(ApiError::Validation(_))));

        let wrong_total = h
            .coordinator
            .upload_chunk(&alice(), id, 0, Some(3), Bytes::from_static(b"abcd"))
            .await;
        assert!(matches!(wrong_total, Err(ApiError::Validation(_))));
    }

    #[tokio::test]
    async fn test_empty_file_is_one_empty_chunk() {
        let h = harness(4).await;
        let id = h
            .coordinator
            .init_upload(&alice(), request("blank.gif", 0, 1))
            .await
            .unwrap()
            .session_id;
        let id = SessionId::parse(&id).unwrap();
        let resp = h
            .coordinator
            .upload_chunk(&alice(), id, 0, Some(1), Bytes::new())
            .await
            .unwrap();
        assert!(resp.is_completed);

        let artifact = h.coordinator.merge_session(&alice(), id).await.unwrap();
        assert!(artifact.url.ends_with(".gif"));
    }

    #[tokio::test]
    async fn test_size_mismatch_removes_output() {
        let h = harness(4).await;
        let id = h
            .coordinator
            .init_upload(&alice(), request("cat.png", 8, 2))
            .await
            .unwrap()
            .session_id;
        let id = SessionId::parse(&id).unwrap();
        h.coordinator
            .upload_chunk(&alice(), id, 0, None, Bytes::from_static(b"abcd"))
            .await
            .unwrap();
        h.coordinator
            .upload_chunk(&alice(), id, 1, None, Bytes::from_static(b"ef"))
            .await
            .unwrap();

        let err = h.coordinator.merge_session(&alice(), id).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(m) if m.contains("declared size")));

        let owner_dir = h.chunks.artifact_root().join("alice/images");
        let leftovers = std::fs::read_dir(&owner_dir)
            .map(|d| d.count())
            .unwrap_or(0);
        assert_eq!(leftovers, 0);
        // The session survives so the client can fix the chunk and retry.
        assert!(h.chunks.session_exists(id).await.unwrap());
    }

    #[tokio::test]
    async fn test_merge_of_reaped_session_is_not_found() {
        let h = harness(4).await;
        let id = h
            .coordinator
            .init_upload(&alice(), request("cat.png", 4, 1))
            .await
            .unwrap()
            .session_id;
        let id = SessionId::parse(&id).unwrap();
        h.chunks.delete_session(id).await.unwrap();

        let err = h.coordinator.merge_session(&alice(), id).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
        // The row went with it.
        let again = h.coordinator.upload_status(&alice(), id).await.unwrap_err();
        assert!(matches!(again, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_display_name_feeds_snippets() {
        let h = harness(4).await;
        let mut req = request("cat.png", 3, 1);
        req.display_name = Some("  My <cat>  ".to_string());
        let id = h
            .coordinator
            .init_upload(&alice(), req)
            .await
            .unwrap()
            .session_id;
        let id = SessionId::parse(&id).unwrap();
        h.coordinator
            .upload_chunk(&alice(), id, 0, None, Bytes::from_static(b"abc"))
            .await
            .unwrap();
        let artifact = h.coordinator.merge_session(&alice(), id).await.unwrap();
        assert!(artifact.markdown_snippet.starts_with("![My &lt;cat&gt;]("));
        assert!(artifact.html_snippet.contains("alt=\"My &lt;cat&gt;\""));
        assert!(
            artifact
                .url
                .starts_with("http://localhost:8000/static/alice/images/alice_")
        );
    }
}
