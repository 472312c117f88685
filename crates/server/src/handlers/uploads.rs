//! Upload endpoints. Handlers parse and authenticate; the coordinator does
//! the rest.

use crate::auth::require_auth;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use serde::Deserialize;
use tessera_core::upload::{
    ChunkUploadResponse, InitUploadRequest, InitUploadResponse, UploadStatusResponse,
};
use tessera_core::{ArtifactDescriptor, SessionId};

/// Maximum size of the init request body.
const MAX_INIT_BODY_SIZE: usize = 64 * 1024;

/// Slack over `chunk_size` so an oversized body is reported with its size
/// rather than as a read failure.
const CHUNK_UPLOAD_BUFFER: usize = 1024;

/// Query parameters of a chunk upload.
#[derive(Debug, Default, Deserialize)]
pub struct ChunkQuery {
    /// When present, must equal the session's chunk count.
    pub total_chunks: Option<u32>,
}

fn parse_session_id(raw: &str) -> ApiResult<SessionId> {
    SessionId::parse(raw).map_err(|e| ApiError::Validation(e.to_string()))
}

/// POST /v1/uploads - open an upload session.
#[tracing::instrument(skip(state, req))]
pub async fn create_upload(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<(StatusCode, Json<InitUploadResponse>)> {
    let owner = require_auth(&req)?.principal.clone();

    let body: InitUploadRequest = {
        let bytes = axum::body::to_bytes(req.into_body(), MAX_INIT_BODY_SIZE)
            .await
            .map_err(|e| ApiError::Validation(format!("failed to read body: {e}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ApiError::Validation(format!("invalid JSON: {e}")))?
    };

    let response = state.coordinator.init_upload(&owner, body).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// PUT /v1/uploads/{session_id}/chunks/{chunk_index} - raw chunk bytes.
#[tracing::instrument(skip(state, query, req), fields(session_id = %session_id, chunk_index))]
pub async fn upload_chunk(
    State(state): State<AppState>,
    Path((session_id, chunk_index)): Path<(String, String)>,
    Query(query): Query<ChunkQuery>,
    req: Request,
) -> ApiResult<Json<ChunkUploadResponse>> {
    let owner = require_auth(&req)?.principal.clone();
    let session_id = parse_session_id(&session_id)?;
    let index: u32 = chunk_index
        .parse()
        .map_err(|_| ApiError::Validation(format!("invalid chunk index {chunk_index:?}")))?;
    tracing::Span::current().record("chunk_index", index);

    let limit = usize::try_from(state.coordinator.settings().chunk_size)
        .unwrap_or(usize::MAX)
        .saturating_add(CHUNK_UPLOAD_BUFFER);
    let data = axum::body::to_bytes(req.into_body(), limit)
        .await
        .map_err(|e| ApiError::Validation(format!("failed to read chunk: {e}")))?;

    let response = state
        .coordinator
        .upload_chunk(&owner, session_id, index, query.total_chunks, data)
        .await?;
    Ok(Json(response))
}

/// GET /v1/uploads/{session_id} - progress from a fresh scan.
#[tracing::instrument(skip(state, req), fields(session_id = %session_id))]
pub async fn get_upload(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    req: Request,
) -> ApiResult<Json<UploadStatusResponse>> {
    let owner = require_auth(&req)?.principal.clone();
    let session_id = parse_session_id(&session_id)?;
    let status = state.coordinator.upload_status(&owner, session_id).await?;
    Ok(Json(status))
}

/// POST /v1/uploads/{session_id}/merge - assemble the artifact.
#[tracing::instrument(skip(state, req), fields(session_id = %session_id))]
pub async fn merge_upload(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    req: Request,
) -> ApiResult<Json<ArtifactDescriptor>> {
    let owner = require_auth(&req)?.principal.clone();
    let session_id = parse_session_id(&session_id)?;
    let artifact = state.coordinator.merge_session(&owner, session_id).await?;
    Ok(Json(artifact))
}

/// DELETE /v1/uploads/{session_id} - abandon the session.
#[tracing::instrument(skip(state, req), fields(session_id = %session_id))]
pub async fn abort_upload(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    req: Request,
) -> ApiResult<StatusCode> {
    let owner = require_auth(&req)?.principal.clone();
    let session_id = parse_session_id(&session_id)?;
    state.coordinator.abort_upload(&owner, session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
