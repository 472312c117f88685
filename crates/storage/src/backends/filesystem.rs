//! Local filesystem chunk store.
//!
//! Layout:
//! - `<temp_root>/<session_id>/chunk_<index>` for in-progress sessions
//! - `<artifact_root>/<artifact_key>` for merged artifacts
//!
//! Every file becomes visible under its final name through a rename from a
//! `.tmp.<uuid>` sibling, so a reader sees either nothing or complete content.

use crate::error::{StorageError, StorageResult};
use crate::traits::{ChunkStore, MergedArtifact, SessionDirEntry};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};
use tessera_core::{CHUNK_FILE_PREFIX, SessionId};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use uuid::Uuid;

/// Marker inserted into the name of in-flight files.
const TEMP_MARKER: &str = ".tmp.";

/// Filesystem-backed chunk store.
pub struct FilesystemChunkStore {
    temp_root: PathBuf,
    artifact_root: PathBuf,
}

impl FilesystemChunkStore {
    /// Create a store, creating both roots if needed.
    pub async fn new(
        temp_root: impl AsRef<Path>,
        artifact_root: impl AsRef<Path>,
    ) -> StorageResult<Self> {
        let temp_root = temp_root.as_ref().to_path_buf();
        let artifact_root = artifact_root.as_ref().to_path_buf();
        fs::create_dir_all(&temp_root).await?;
        fs::create_dir_all(&artifact_root).await?;
        Ok(Self {
            temp_root,
            artifact_root,
        })
    }

    pub fn temp_root(&self) -> &Path {
        &self.temp_root
    }

    pub fn artifact_root(&self) -> &Path {
        &self.artifact_root
    }

    /// Directory of a session. Session ids are UUIDs, so the join is safe.
    pub fn session_dir(&self, session_id: SessionId) -> PathBuf {
        self.temp_root.join(session_id.to_string())
    }

    fn chunk_path(dir: &Path, index: u32) -> PathBuf {
        dir.join(format!("{CHUNK_FILE_PREFIX}{index}"))
    }

    fn temp_sibling(path: &Path) -> PathBuf {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        path.with_file_name(format!("{name}{TEMP_MARKER}{}", Uuid::new_v4()))
    }

    async fn require_session_dir(&self, session_id: SessionId) -> StorageResult<PathBuf> {
        let dir = self.session_dir(session_id);
        match fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => Ok(dir),
            Ok(_) => Err(StorageError::NotFound(format!("session {session_id}"))),
            Err(e) => Err(StorageError::from_io(e, format!("session {session_id}"))),
        }
    }

    /// Count chunk files present in `[0, total_chunks)`.
    async fn count_in(dir: &Path, total_chunks: u32) -> StorageResult<u32> {
        let mut received = 0;
        for index in 0..total_chunks {
            match fs::metadata(Self::chunk_path(dir, index)).await {
                Ok(meta) if meta.is_file() => received += 1,
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::Io(e)),
            }
        }
        Ok(received)
    }

    async fn copy_chunks(dir: &Path, total_chunks: u32, out: &mut fs::File) -> StorageResult<u64> {
        let mut written = 0;
        for index in 0..total_chunks {
            let mut chunk = fs::File::open(Self::chunk_path(dir, index))
                .await
                .map_err(|e| StorageError::from_io(e, format!("chunk {index}")))?;
            written += tokio::io::copy(&mut chunk, out).await?;
        }
        out.flush().await?;
        out.sync_all().await?;
        Ok(written)
    }

    /// Remove an in-flight temp file, logging anything but `NotFound`.
    async fn discard_temp(path: &Path) {
        if let Err(e) = fs::remove_file(path).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove temp file");
        }
    }

    /// Resolve an artifact key below the artifact root.
    async fn artifact_path(&self, key: &str) -> StorageResult<PathBuf> {
        let root = self.artifact_root.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || Self::key_path_sync(&root, &key))
            .await
            .map_err(|e| {
                StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}")))
            })?
    }

    /// Key path validation with path traversal protection.
    ///
    /// Rejects keys that would escape `root`, including through symlinks at the
    /// target itself or at its nearest existing ancestor.
    fn key_path_sync(root: &Path, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty() || key.starts_with('/') || key.starts_with('\\') {
            return Err(StorageError::InvalidKey(format!("not a relative key: {key:?}")));
        }
        if !Path::new(key)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::InvalidKey(format!(
                "contains unsafe path component: {key}"
            )));
        }

        let path = root.join(key);
        let root_canonical = root.canonicalize().map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to canonicalize root: {e}"),
            ))
        })?;

        let mut probe = path.as_path();
        loop {
            match std::fs::symlink_metadata(probe) {
                Ok(meta) => {
                    let canonical = probe.canonicalize().map_err(|e| {
                        if meta.file_type().is_symlink() {
                            StorageError::InvalidKey(format!("dangling symlink in key: {key}"))
                        } else {
                            StorageError::Io(e)
                        }
                    })?;
                    if !canonical.starts_with(&root_canonical) {
                        return Err(StorageError::InvalidKey(format!(
                            "resolved path escapes storage root: {key}"
                        )));
                    }
                    return Ok(path);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::Io(e)),
            }
            match probe.parent() {
                Some(parent) => probe = parent,
                None => return Ok(path),
            }
        }
    }

    /// Accept only a single normal path component.
    fn validate_dir_name(name: &str) -> StorageResult<()> {
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(()),
            _ => Err(StorageError::InvalidKey(format!(
                "not a plain directory name: {name:?}"
            ))),
        }
    }
}

#[async_trait]
impl ChunkStore for FilesystemChunkStore {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn init_session(&self, session_id: SessionId) -> StorageResult<()> {
        fs::create_dir_all(&self.temp_root).await?;
        fs::create_dir(self.session_dir(session_id))
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    StorageError::AlreadyExists(format!("session {session_id}"))
                } else {
                    StorageError::Io(e)
                }
            })
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn session_exists(&self, session_id: SessionId) -> StorageResult<bool> {
        match self.require_session_dir(session_id).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self, data), fields(backend = "filesystem", size = data.len()))]
    async fn write_chunk(
        &self,
        session_id: SessionId,
        index: u32,
        data: Bytes,
    ) -> StorageResult<()> {
        let dir = self.require_session_dir(session_id).await?;
        let path = Self::chunk_path(&dir, index);
        let temp_path = Self::temp_sibling(&path);

        let written: StorageResult<()> = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp_path, &path).await?;
            Ok(())
        }
        .await;

        if let Err(e) = written {
            Self::discard_temp(&temp_path).await;
            // The directory may have been reaped while the write was in flight.
            return Err(match e {
                StorageError::Io(io) => StorageError::from_io(io, format!("session {session_id}")),
                other => other,
            });
        }
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn count_received(&self, session_id: SessionId, total_chunks: u32) -> StorageResult<u32> {
        match self.require_session_dir(session_id).await {
            Ok(dir) => Self::count_in(&dir, total_chunks).await,
            Err(StorageError::NotFound(_)) => Ok(0),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn merge_in_order(
        &self,
        session_id: SessionId,
        total_chunks: u32,
        artifact_key: &str,
    ) -> StorageResult<MergedArtifact> {
        let dir = self.require_session_dir(session_id).await?;
        let received = Self::count_in(&dir, total_chunks).await?;
        if received < total_chunks {
            return Err(StorageError::IncompleteUpload {
                missing: total_chunks - received,
            });
        }

        let dest = self.artifact_path(artifact_key).await?;
        if fs::try_exists(&dest).await? {
            return Err(StorageError::AlreadyExists(artifact_key.to_string()));
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = Self::temp_sibling(&dest);
        let merged: StorageResult<u64> = async {
            let mut out = fs::File::create(&temp_path).await?;
            let size = Self::copy_chunks(&dir, total_chunks, &mut out).await?;
            drop(out);
            fs::rename(&temp_path, &dest).await?;
            Ok(size)
        }
        .await;

        match merged {
            Ok(size) => {
                tracing::debug!(
                    session_id = %session_id,
                    artifact = %dest.display(),
                    size,
                    "Merged chunks"
                );
                Ok(MergedArtifact {
                    path: dest,
                    key: artifact_key.to_string(),
                    size,
                })
            }
            Err(e) => {
                Self::discard_temp(&temp_path).await;
                Err(e)
            }
        }
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete_artifact(&self, artifact_key: &str) -> StorageResult<()> {
        let path = self.artifact_path(artifact_key).await?;
        fs::remove_file(&path)
            .await
            .map_err(|e| StorageError::from_io(e, artifact_key))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete_session(&self, session_id: SessionId) -> StorageResult<()> {
        match fs::remove_dir_all(self.session_dir(session_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn list_session_dirs(&self) -> StorageResult<Vec<SessionDirEntry>> {
        let mut entries = match fs::read_dir(&self.temp_root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::Io(e)),
        };

        let mut dirs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            // file_type() does not follow symlinks.
            let file_type = match entry.file_type().await {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            if !file_type.is_dir() {
                continue;
            }

            let created = match entry.metadata().await {
                Ok(meta) => match meta.created().or_else(|_| meta.modified()) {
                    Ok(t) => t,
                    Err(e) => {
                        tracing::warn!(path = %entry.path().display(), error = %e, "No timestamp for directory");
                        continue;
                    }
                },
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e, "Skipping unreadable directory");
                    continue;
                }
            };

            let name = entry.file_name().to_string_lossy().into_owned();
            dirs.push(SessionDirEntry {
                session_id: SessionId::parse(&name).ok(),
                name,
                created,
            });
        }
        Ok(dirs)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn remove_session_dir(&self, name: &str) -> StorageResult<()> {
        Self::validate_dir_name(name)?;
        let path = self.temp_root.join(name);
        let meta = fs::symlink_metadata(&path)
            .await
            .map_err(|e| StorageError::from_io(e, name))?;
        if !meta.is_dir() {
            return Err(StorageError::InvalidKey(format!("not a directory: {name}")));
        }
        fs::remove_dir_all(&path)
            .await
            .map_err(|e| StorageError::from_io(e, name))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn health_check(&self) -> StorageResult<()> {
        for root in [&self.temp_root, &self.artifact_root] {
            let meta = fs::metadata(root).await.map_err(|e| {
                StorageError::Io(std::io::Error::new(
                    e.kind(),
                    format!("storage root {} not accessible: {e}", root.display()),
                ))
            })?;
            if !meta.is_dir() {
                return Err(StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotADirectory,
                    format!("storage root is not a directory: {}", root.display()),
                )));
            }
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }
}
