//! Database models mapping to the metadata schema.

use crate::error::{MetadataError, MetadataResult};
use sqlx::FromRow;
use tessera_core::{PrincipalId, SessionId, UploadSession};
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Upload sessions
// =============================================================================

/// Upload session record.
#[derive(Debug, Clone, FromRow)]
pub struct SessionRow {
    pub session_id: Uuid,
    pub owner: String,
    pub original_filename: String,
    pub display_name: Option<String>,
    pub extension: String,
    pub declared_size: i64,
    pub total_chunks: i64,
    /// Cached last observed count; the chunk store is authoritative.
    pub received_count: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl From<&UploadSession> for SessionRow {
    fn from(s: &UploadSession) -> Self {
        Self {
            session_id: *s.id.as_uuid(),
            owner: s.owner.to_string(),
            original_filename: s.original_filename.clone(),
            display_name: s.display_name.clone(),
            extension: s.extension.clone(),
            declared_size: i64::try_from(s.declared_size).unwrap_or(i64::MAX),
            total_chunks: i64::from(s.total_chunks),
            received_count: i64::from(s.received_count),
            created_at: s.created_at,
            updated_at: s.updated_at,
        }
    }
}

impl TryFrom<SessionRow> for UploadSession {
    type Error = MetadataError;

    fn try_from(row: SessionRow) -> MetadataResult<Self> {
        let corrupt = |field: &str| {
            MetadataError::Internal(format!(
                "session {} has invalid {field}",
                row.session_id
            ))
        };
        Ok(Self {
            id: SessionId::from(row.session_id),
            owner: PrincipalId::parse(&row.owner).map_err(|_| corrupt("owner"))?,
            declared_size: u64::try_from(row.declared_size).map_err(|_| corrupt("declared_size"))?,
            total_chunks: u32::try_from(row.total_chunks).map_err(|_| corrupt("total_chunks"))?,
            received_count: u32::try_from(row.received_count)
                .map_err(|_| corrupt("received_count"))?,
            original_filename: row.original_filename,
            display_name: row.display_name,
            extension: row.extension,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

// =============================================================================
// Artifacts
// =============================================================================

/// Finished artifact record.
#[derive(Debug, Clone, FromRow)]
pub struct ArtifactRow {
    pub artifact_id: Uuid,
    pub owner: String,
    pub filename: String,
    pub display_name: Option<String>,
    /// Key relative to the artifact root.
    pub path: String,
    pub url: String,
    pub markdown: String,
    pub html: String,
    pub size_bytes: i64,
    pub created_at: OffsetDateTime,
}

// =============================================================================
// Principals and API tokens
// =============================================================================

/// Principal record.
#[derive(Debug, Clone, FromRow)]
pub struct PrincipalRow {
    pub principal: String,
    pub display_name: Option<String>,
    pub created_at: OffsetDateTime,
}

/// API token record. Only the SHA-256 hash of the secret is stored.
#[derive(Debug, Clone, FromRow)]
pub struct TokenRow {
    pub token_id: Uuid,
    pub principal: String,
    pub token_hash: String,
    pub description: Option<String>,
    pub expires_at: Option<OffsetDateTime>,
    pub revoked_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub last_used_at: Option<OffsetDateTime>,
}

impl TokenRow {
    /// Whether the token may authenticate at `now`.
    pub fn is_usable_at(&self, now: OffsetDateTime) -> bool {
        self.revoked_at.is_none() && self.expires_at.is_none_or(|exp| exp > now)
    }
}
