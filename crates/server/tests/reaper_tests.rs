//! Expiry reaper integration tests.

mod common;

use axum::http::StatusCode;
use common::*;
use serde_json::json;
use std::time::{Duration, SystemTime};
use tessera_core::SessionId;
use tessera_storage::ChunkStore;

const TTL_SECS: u64 = 600;

async fn open_session(server: &TestServer, token: &str) -> String {
    let (status, body) = json_request(
        &server.router,
        "POST",
        "/v1/uploads",
        Some(json!({"filename": "a.png", "file_size": 4, "total_chunks": 1})),
        Some(token),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "init failed: {body}");
    body["session_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_young_sessions_survive_sweep() {
    let server = TestServer::with_config(|c| c.reaper.session_ttl_secs = TTL_SECS).await;
    let token = server.create_principal_with_token("alice").await;
    let session_id = open_session(&server, &token).await;

    let report = server.reaper().sweep_at(SystemTime::now()).await.unwrap();

    assert_eq!(report.scanned, 1);
    assert_eq!(report.reaped, 0);
    assert!(server.temp_root().join(&session_id).exists());
}

#[tokio::test]
async fn test_session_exactly_at_ttl_survives() {
    let server = TestServer::with_config(|c| c.reaper.session_ttl_secs = TTL_SECS).await;
    let token = server.create_principal_with_token("alice").await;
    let session_id = open_session(&server, &token).await;

    let dirs = server.chunks.list_session_dirs().await.unwrap();
    assert_eq!(dirs.len(), 1);
    let created = dirs[0].created;

    let at_ttl = created + Duration::from_secs(TTL_SECS);
    let report = server.reaper().sweep_at(at_ttl).await.unwrap();
    assert_eq!(report.reaped, 0);
    assert!(server.temp_root().join(&session_id).exists());

    let report = server
        .reaper()
        .sweep_at(at_ttl + Duration::from_millis(1))
        .await
        .unwrap();
    assert_eq!(report.reaped, 1);
    assert!(!server.temp_root().join(&session_id).exists());
}

#[tokio::test]
async fn test_expired_session_is_reaped_and_merge_reports_not_found() {
    let server = TestServer::with_config(|c| c.reaper.session_ttl_secs = TTL_SECS).await;
    let token = server.create_principal_with_token("alice").await;
    let session_id = open_session(&server, &token).await;
    put_chunk(
        &server.router,
        &session_id,
        0,
        bytes::Bytes::from_static(b"abcd"),
        &token,
    )
    .await;

    let later = SystemTime::now() + Duration::from_secs(TTL_SECS + 1);
    let report = server.reaper().sweep_at(later).await.unwrap();

    assert_eq!(report.reaped, 1);
    assert_eq!(report.failed, 0);
    assert!(!server.temp_root().join(&session_id).exists());

    // The row outlives the directory until a merge notices.
    let id = SessionId::parse(&session_id).unwrap();
    assert!(
        server
            .metadata()
            .find_session(*id.as_uuid())
            .await
            .unwrap()
            .is_some()
    );

    let (status, _) = json_request(
        &server.router,
        "POST",
        &format!("/v1/uploads/{session_id}/merge"),
        None,
        Some(&token),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(
        server
            .metadata()
            .find_session(*id.as_uuid())
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_delete_orphan_rows_removes_registry_entry() {
    let server = TestServer::with_config(|c| {
        c.reaper.session_ttl_secs = TTL_SECS;
        c.reaper.delete_orphan_rows = true;
    })
    .await;
    let token = server.create_principal_with_token("alice").await;
    let session_id = open_session(&server, &token).await;

    let later = SystemTime::now() + Duration::from_secs(TTL_SECS + 1);
    let report = server.reaper().sweep_at(later).await.unwrap();
    assert_eq!(report.reaped, 1);

    let id = SessionId::parse(&session_id).unwrap();
    assert!(
        server
            .metadata()
            .find_session(*id.as_uuid())
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_stray_files_in_temp_root_are_ignored() {
    let server = TestServer::with_config(|c| c.reaper.session_ttl_secs = TTL_SECS).await;
    std::fs::write(server.temp_root().join("README"), b"not a session").unwrap();

    let later = SystemTime::now() + Duration::from_secs(TTL_SECS + 1);
    let report = server.reaper().sweep_at(later).await.unwrap();

    assert_eq!(report.scanned, 0);
    assert!(server.temp_root().join("README").exists());
}
