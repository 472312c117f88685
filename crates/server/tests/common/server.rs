//! Server test utilities.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tessera_core::config::{AppConfig, MetadataConfig};
use tessera_metadata::models::{PrincipalRow, TokenRow};
use tessera_metadata::{MetadataStore, SqliteStore};
use tessera_server::auth::hash_token;
use tessera_server::{AppState, ExpiryReaper, create_router};
use tessera_storage::{ChunkStore, FilesystemChunkStore};
use time::OffsetDateTime;
use tower::ServiceExt;
use uuid::Uuid;

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    pub chunks: Arc<FilesystemChunkStore>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with temporary storage.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let temp_root = temp_dir.path().join("temp");
        let artifact_root = temp_dir.path().join("static");
        let db_path = temp_dir.path().join("metadata.db");

        let chunks = Arc::new(
            FilesystemChunkStore::new(&temp_root, &artifact_root)
                .await
                .expect("Failed to create chunk store"),
        );
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(&db_path, None)
                .await
                .expect("Failed to create metadata store"),
        );

        let mut config = AppConfig::for_testing();
        config.storage.temp_root = temp_root;
        config.storage.artifact_root = artifact_root;
        config.metadata = MetadataConfig::Sqlite {
            path: db_path,
            query_timeout_secs: None,
        };
        modifier(&mut config);

        let storage: Arc<dyn ChunkStore> = chunks.clone();
        let state = AppState::new(config, storage, metadata).expect("Failed to build state");
        let router = create_router(state.clone());

        Self {
            router,
            state,
            chunks,
            _temp_dir: temp_dir,
        }
    }

    /// Get access to the underlying metadata.
    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        self.state.metadata.clone()
    }

    pub fn temp_root(&self) -> &Path {
        self.chunks.temp_root()
    }

    pub fn artifact_root(&self) -> &Path {
        self.chunks.artifact_root()
    }

    /// Path of a finished artifact given its public URL.
    pub fn artifact_path_for_url(&self, url: &str) -> PathBuf {
        let marker = "/static/";
        let start = url.find(marker).expect("url has no static prefix") + marker.len();
        self.artifact_root().join(&url[start..])
    }

    /// Create a principal and an API token for it; returns the raw token.
    pub async fn create_principal_with_token(&self, principal: &str) -> String {
        let metadata = self.metadata();
        let now = OffsetDateTime::now_utc();
        if metadata.get_principal(principal).await.unwrap().is_none() {
            metadata
                .create_principal(&PrincipalRow {
                    principal: principal.to_string(),
                    display_name: None,
                    created_at: now,
                })
                .await
                .expect("Failed to create principal");
        }

        let raw_token = format!("test-token-{}", Uuid::new_v4());
        metadata
            .create_token(&TokenRow {
                token_id: Uuid::new_v4(),
                principal: principal.to_string(),
                token_hash: hash_token(&raw_token),
                description: Some("Test Token".to_string()),
                expires_at: None,
                revoked_at: None,
                created_at: now,
                last_used_at: None,
            })
            .await
            .expect("Failed to create token");
        raw_token
    }

    /// A reaper over this server's stores.
    pub fn reaper(&self) -> ExpiryReaper {
        ExpiryReaper::new(
            self.state.storage.clone(),
            self.state.metadata.clone(),
            &self.state.config.reaper,
        )
    }
}

/// Send a request and decode the JSON response body (Null when empty).
#[allow(dead_code)]
pub async fn send(router: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();

    let status = response.status();
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    let json: Value = if body_bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
    };

    (status, json)
}

/// Helper to make JSON requests.
#[allow(dead_code)]
pub async fn json_request(
    router: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    auth_token: Option<&str>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);

    if let Some(token) = auth_token {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }

    let body = match body {
        Some(v) => {
            builder = builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&v).unwrap())
        }
        None => Body::empty(),
    };

    send(router, builder.body(body).unwrap()).await
}

/// PUT raw chunk bytes.
#[allow(dead_code)]
pub async fn put_chunk(
    router: &axum::Router,
    session_id: &str,
    index: u32,
    data: bytes::Bytes,
    auth_token: &str,
) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("PUT")
        .uri(format!("/v1/uploads/{session_id}/chunks/{index}"))
        .header("Authorization", format!("Bearer {auth_token}"))
        .header("Content-Type", "application/octet-stream")
        .body(Body::from(data))
        .unwrap();
    send(router, request).await
}
