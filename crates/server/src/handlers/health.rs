//! Liveness and identity endpoints.

use crate::auth::require_auth;
use crate::error::ApiResult;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Request, State};
use serde::Serialize;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// GET /v1/health - unauthenticated, for load balancers and probes.
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    state.metadata.health_check().await?;
    state.storage.health_check().await?;

    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    }))
}

/// Identity of the caller.
#[derive(Debug, Serialize)]
pub struct WhoamiResponse {
    pub principal: String,
    pub authenticated_via: &'static str,
}

/// GET /v1/auth/whoami
pub async fn whoami(req: Request) -> ApiResult<Json<WhoamiResponse>> {
    let auth = require_auth(&req)?;
    Ok(Json(WhoamiResponse {
        principal: auth.principal.to_string(),
        authenticated_via: auth.via,
    }))
}
