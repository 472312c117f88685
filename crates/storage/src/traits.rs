//! Storage trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;
use std::time::SystemTime;
use tessera_core::SessionId;

/// A directory found directly below the temp root.
#[derive(Clone, Debug)]
pub struct SessionDirEntry {
    /// Directory name as found on disk.
    pub name: String,
    /// Parsed session id, when the name is one.
    pub session_id: Option<SessionId>,
    /// Creation time, or modification time where creation time is unavailable.
    pub created: SystemTime,
}

/// Result of a successful merge.
#[derive(Clone, Debug)]
pub struct MergedArtifact {
    /// Absolute path of the finished artifact.
    pub path: PathBuf,
    /// Artifact key relative to the artifact root.
    pub key: String,
    /// Bytes written.
    pub size: u64,
}

/// Storage for the chunks of in-progress upload sessions.
///
/// Existence of `chunk_<index>` is the only record of a received chunk. No
/// implementation may cache counts across calls.
#[async_trait]
pub trait ChunkStore: Send + Sync + 'static {
    /// Create the session directory.
    async fn init_session(&self, session_id: SessionId) -> StorageResult<()>;

    /// Check whether the session directory exists.
    async fn session_exists(&self, session_id: SessionId) -> StorageResult<bool>;

    /// Write (or replace) one chunk. Readers never observe a partial chunk.
    ///
    /// The index range is validated by the caller.
    async fn write_chunk(&self, session_id: SessionId, index: u32, data: Bytes)
    -> StorageResult<()>;

    /// Count present chunks in `[0, total_chunks)` by probing each index.
    async fn count_received(&self, session_id: SessionId, total_chunks: u32) -> StorageResult<u32>;

    /// Concatenate all chunks in ascending index order into `artifact_key`
    /// below the artifact root.
    ///
    /// Fails with `IncompleteUpload` when any chunk is missing. On failure no
    /// file is left at the destination.
    async fn merge_in_order(
        &self,
        session_id: SessionId,
        total_chunks: u32,
        artifact_key: &str,
    ) -> StorageResult<MergedArtifact>;

    /// Remove a finished artifact. Used to roll back a merge.
    async fn delete_artifact(&self, artifact_key: &str) -> StorageResult<()>;

    /// Recursively remove the session directory.
    async fn delete_session(&self, session_id: SessionId) -> StorageResult<()>;

    /// List directories directly below the temp root. Symlinks and plain files
    /// are skipped.
    async fn list_session_dirs(&self) -> StorageResult<Vec<SessionDirEntry>>;

    /// Recursively remove a directory directly below the temp root by name.
    async fn remove_session_dir(&self, name: &str) -> StorageResult<()>;

    /// Verify both roots are reachable directories.
    async fn health_check(&self) -> StorageResult<()>;

    /// Backend name, for logs.
    fn backend_name(&self) -> &'static str;
}
