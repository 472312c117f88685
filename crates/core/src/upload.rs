//! Upload session types and lifecycle.

use crate::principal::PrincipalId;
use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

/// Unique identifier for an upload session.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a new random session ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::InvalidSessionId(format!("{s:?}: {e}")))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for SessionId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Progress state of a live session.
///
/// Merged and expired sessions no longer exist, so they have no variant here.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadState {
    /// No chunk received yet.
    Init,
    /// Some but not all chunks received.
    Receiving,
    /// Every chunk is present; the session can be merged.
    Complete,
}

impl UploadState {
    /// Derive the state from a received/total pair.
    pub fn from_progress(received: u32, total: u32) -> Self {
        if received >= total {
            Self::Complete
        } else if received == 0 {
            Self::Init
        } else {
            Self::Receiving
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

/// An upload session record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadSession {
    pub id: SessionId,
    pub owner: PrincipalId,
    /// Filename as the client sent it.
    pub original_filename: String,
    /// Optional label used in display snippets instead of the filename.
    pub display_name: Option<String>,
    /// Lower-cased extension, already checked against the allow-list.
    pub extension: String,
    pub declared_size: u64,
    pub total_chunks: u32,
    /// Last observed chunk count. Never authoritative: the chunk store is.
    pub received_count: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl UploadSession {
    /// Create a new session with a fresh identifier.
    pub fn new(
        owner: PrincipalId,
        original_filename: String,
        display_name: Option<String>,
        extension: String,
        declared_size: u64,
        total_chunks: u32,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: SessionId::new(),
            owner,
            original_filename,
            display_name,
            extension,
            declared_size,
            total_chunks,
            received_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Number of chunks still outstanding given a fresh count.
    pub fn missing(&self, received: u32) -> u32 {
        self.total_chunks.saturating_sub(received)
    }

    pub fn state(&self, received: u32) -> UploadState {
        UploadState::from_progress(received, self.total_chunks)
    }

    /// Label for alt text and link text.
    pub fn display_label(&self) -> &str {
        match self.display_name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => &self.original_filename,
        }
    }

    /// Whether `index` addresses a chunk of this session.
    pub fn contains_index(&self, index: u32) -> bool {
        index < self.total_chunks
    }
}

/// Extract the lower-cased extension from a filename.
///
/// Returns `None` when there is no dot or nothing follows the last dot.
pub fn file_extension(filename: &str) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Smallest chunk count able to carry `file_size` bytes in chunks of at most
/// `chunk_size` bytes. A zero-byte file still occupies one (empty) chunk.
pub fn min_chunks(file_size: u64, chunk_size: u64) -> u64 {
    if file_size == 0 || chunk_size == 0 {
        return 1;
    }
    file_size.div_ceil(chunk_size)
}

// =============================================================================
// Wire types
// =============================================================================

/// Request to open an upload session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InitUploadRequest {
    pub filename: String,
    pub file_size: u64,
    pub total_chunks: u32,
    #[serde(default, alias = "nicname")]
    pub display_name: Option<String>,
}

/// Response to opening a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitUploadResponse {
    pub session_id: String,
    /// Largest chunk body the server accepts.
    pub chunk_size: u64,
    pub total_chunks: u32,
}

/// Response to a chunk upload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkUploadResponse {
    pub session_id: String,
    pub chunk_index: u32,
    pub uploaded_chunks: u32,
    pub total_chunks: u32,
    pub is_completed: bool,
}

/// Progress report for a live session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadStatusResponse {
    pub session_id: String,
    pub filename: String,
    pub uploaded_chunks: u32,
    pub total_chunks: u32,
    pub missing_chunks: u32,
    pub state: UploadState,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(total: u32) -> UploadSession {
        UploadSession::new(
            PrincipalId::parse("alice").unwrap(),
            "cat.PNG".to_string(),
            None,
            "png".to_string(),
            1024,
            total,
        )
    }

    #[test]
    fn test_session_id_parse_roundtrip() {
        let id = SessionId::new();
        let parsed = SessionId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
        assert!(SessionId::parse("not-a-uuid").is_err());
        assert!(SessionId::parse("../../etc").is_err());
    }

    #[test]
    fn test_state_from_progress() {
        assert_eq!(UploadState::from_progress(0, 3), UploadState::Init);
        assert_eq!(UploadState::from_progress(2, 3), UploadState::Receiving);
        assert_eq!(UploadState::from_progress(3, 3), UploadState::Complete);
        assert!(UploadState::from_progress(1, 1).is_complete());
    }

    #[test]
    fn test_missing_saturates() {
        let s = session(3);
        assert_eq!(s.missing(1), 2);
        assert_eq!(s.missing(5), 0);
    }

    #[test]
    fn test_display_label_falls_back_to_filename() {
        let mut s = session(1);
        assert_eq!(s.display_label(), "cat.PNG");
        s.display_name = Some("   ".to_string());
        assert_eq!(s.display_label(), "cat.PNG");
        s.display_name = Some("My cat".to_string());
        assert_eq!(s.display_label(), "My cat");
    }

    #[test]
    fn test_file_extension() {
        assert_eq!(file_extension("photo.JPG").as_deref(), Some("jpg"));
        assert_eq!(file_extension("archive.tar.gz").as_deref(), Some("gz"));
        assert_eq!(file_extension("noext"), None);
        assert_eq!(file_extension("trailing."), None);
    }

    #[test]
    fn test_min_chunks() {
        assert_eq!(min_chunks(0, 10), 1);
        assert_eq!(min_chunks(10, 10), 1);
        assert_eq!(min_chunks(11, 10), 2);
        assert_eq!(min_chunks(2 * 1024 * 1024 + 1, 2 * 1024 * 1024), 2);
    }

    #[test]
    fn test_init_request_accepts_nicname_alias() {
        let json = r#"{"filename":"a.png","file_size":3,"total_chunks":1,"nicname":"A"}"#;
        let req: InitUploadRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.display_name.as_deref(), Some("A"));

        let json = r#"{"filename":"a.png","file_size":3,"total_chunks":1}"#;
        let req: InitUploadRequest = serde_json::from_str(json).unwrap();
        assert!(req.display_name.is_none());
    }

    #[test]
    fn test_state_serializes_lowercase() {
        let json = serde_json::to_string(&UploadState::Receiving).unwrap();
        assert_eq!(json, "\"receiving\"");
    }
}
