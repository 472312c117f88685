//! Metadata store trait and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{ArtifactRegistry, PrincipalRepo, SessionRegistry, TokenRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, Instant};

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore:
    SessionRegistry + ArtifactRegistry + TokenRepo + PrincipalRepo + Send + Sync
{
    /// Create tables and indexes.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    /// Queries slower than this are logged. SQLite cannot cancel them.
    slow_query: Duration,
}

impl SqliteStore {
    /// Open (or create) a database file and apply the schema.
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                MetadataError::Config(format!(
                    "failed to create database directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // One writer at a time; a single connection avoids lock contention.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self {
            pool,
            slow_query: Duration::from_secs(query_timeout_secs.unwrap_or(30)),
        };
        store.migrate().await?;
        tracing::debug!(path = %path.display(), "Opened SQLite metadata store");
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Run a query future, logging it when it exceeds the slow-query threshold.
    async fn timed<T, F>(&self, op: &'static str, fut: F) -> MetadataResult<T>
    where
        F: Future<Output = MetadataResult<T>>,
    {
        let started = Instant::now();
        let result = fut.await;
        let elapsed = started.elapsed();
        if elapsed > self.slow_query {
            tracing::warn!(
                op,
                elapsed_ms = elapsed.as_millis() as u64,
                "Slow metadata query"
            );
        }
        result
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// Implement all the repository traits for SqliteStore
mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use crate::repos::principals::PrincipalDeleteStats;
    use time::OffsetDateTime;
    use uuid::Uuid;

    fn count(n: i64) -> u64 {
        u64::try_from(n).unwrap_or(0)
    }

    #[async_trait]
    impl SessionRegistry for SqliteStore {
        async fn create_session(&self, session: &SessionRow) -> MetadataResult<()> {
            self.timed("create_session", async {
                sqlx::query(
                    r#"
                    INSERT INTO upload_sessions (
                        session_id, owner, original_filename, display_name, extension,
                        declared_size, total_chunks, received_count, created_at, updated_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(session.session_id)
                .bind(&session.owner)
                .bind(&session.original_filename)
                .bind(&session.display_name)
                .bind(&session.extension)
                .bind(session.declared_size)
                .bind(session.total_chunks)
                .bind(session.received_count)
                .bind(session.created_at)
                .bind(session.updated_at)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    MetadataError::on_conflict(e, format!("upload session {}", session.session_id))
                })?;
                Ok(())
            })
            .await
        }

        async fn find_session(&self, session_id: Uuid) -> MetadataResult<Option<SessionRow>> {
            self.timed("find_session", async {
                let row = sqlx::query_as::<_, SessionRow>(
                    "SELECT * FROM upload_sessions WHERE session_id = ?",
                )
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await?;
                Ok(row)
            })
            .await
        }

        async fn update_received_count(
            &self,
            session_id: Uuid,
            received_count: u32,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            self.timed("update_received_count", async {
                let result = sqlx::query(
                    "UPDATE upload_sessions SET received_count = ?, updated_at = ? WHERE session_id = ?",
                )
                .bind(i64::from(received_count))
                .bind(updated_at)
                .bind(session_id)
                .execute(&self.pool)
                .await?;
                if result.rows_affected() == 0 {
                    return Err(MetadataError::NotFound(format!(
                        "upload session {session_id}"
                    )));
                }
                Ok(())
            })
            .await
        }

        async fn delete_session(&self, session_id: Uuid) -> MetadataResult<bool> {
            self.timed("delete_session", async {
                let result = sqlx::query("DELETE FROM upload_sessions WHERE session_id = ?")
                    .bind(session_id)
                    .execute(&self.pool)
                    .await?;
                Ok(result.rows_affected() > 0)
            })
            .await
        }

        async fn count_sessions_for_owner(&self, owner: &str) -> MetadataResult<u64> {
            self.timed("count_sessions_for_owner", async {
                let n: i64 =
                    sqlx::query_scalar("SELECT COUNT(*) FROM upload_sessions WHERE owner = ?")
                        .bind(owner)
                        .fetch_one(&self.pool)
                        .await?;
                Ok(count(n))
            })
            .await
        }
    }

    #[async_trait]
    impl ArtifactRegistry for SqliteStore {
        async fn register_artifact(&self, artifact: &ArtifactRow) -> MetadataResult<()> {
            self.timed("register_artifact", async {
                sqlx::query(
                    r#"
                    INSERT INTO artifacts (
                        artifact_id, owner, filename, display_name, path, url,
                        markdown, html, size_bytes, created_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(artifact.artifact_id)
                .bind(&artifact.owner)
                .bind(&artifact.filename)
                .bind(&artifact.display_name)
                .bind(&artifact.path)
                .bind(&artifact.url)
                .bind(&artifact.markdown)
                .bind(&artifact.html)
                .bind(artifact.size_bytes)
                .bind(artifact.created_at)
                .execute(&self.pool)
                .await
                .map_err(|e| MetadataError::on_conflict(e, format!("artifact {}", artifact.path)))?;
                Ok(())
            })
            .await
        }

        async fn get_artifact(&self, artifact_id: Uuid) -> MetadataResult<Option<ArtifactRow>> {
            self.timed("get_artifact", async {
                let row = sqlx::query_as::<_, ArtifactRow>(
                    "SELECT * FROM artifacts WHERE artifact_id = ?",
                )
                .bind(artifact_id)
                .fetch_optional(&self.pool)
                .await?;
                Ok(row)
            })
            .await
        }

        async fn list_artifacts_for_owner(&self, owner: &str) -> MetadataResult<Vec<ArtifactRow>> {
            self.timed("list_artifacts_for_owner", async {
                let rows = sqlx::query_as::<_, ArtifactRow>(
                    "SELECT * FROM artifacts WHERE owner = ? ORDER BY created_at DESC",
                )
                .bind(owner)
                .fetch_all(&self.pool)
                .await?;
                Ok(rows)
            })
            .await
        }

        async fn count_artifacts_for_owner(&self, owner: &str) -> MetadataResult<u64> {
            self.timed("count_artifacts_for_owner", async {
                let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM artifacts WHERE owner = ?")
                    .bind(owner)
                    .fetch_one(&self.pool)
                    .await?;
                Ok(count(n))
            })
            .await
        }
    }

    #[async_trait]
    impl TokenRepo for SqliteStore {
        async fn create_token(&self, token: &TokenRow) -> MetadataResult<()> {
            self.timed("create_token", async {
                let mut tx = self.pool.begin().await?;

                let principal_exists: Option<String> =
                    sqlx::query_scalar("SELECT principal FROM principals WHERE principal = ?")
                        .bind(&token.principal)
                        .fetch_optional(&mut *tx)
                        .await?;
                if principal_exists.is_none() {
                    return Err(MetadataError::Constraint(format!(
                        "token references unknown principal {}",
                        token.principal
                    )));
                }

                sqlx::query(
                    r#"
                    INSERT INTO api_tokens (
                        token_id, principal, token_hash, description, expires_at,
                        revoked_at, created_at, last_used_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(token.token_id)
                .bind(&token.principal)
                .bind(&token.token_hash)
                .bind(&token.description)
                .bind(token.expires_at)
                .bind(token.revoked_at)
                .bind(token.created_at)
                .bind(token.last_used_at)
                .execute(&mut *tx)
                .await
                .map_err(|e| MetadataError::on_conflict(e, "token hash"))?;

                tx.commit().await?;
                Ok(())
            })
            .await
        }

        async fn get_token_by_hash(&self, token_hash: &str) -> MetadataResult<Option<TokenRow>> {
            self.timed("get_token_by_hash", async {
                let row =
                    sqlx::query_as::<_, TokenRow>("SELECT * FROM api_tokens WHERE token_hash = ?")
                        .bind(token_hash)
                        .fetch_optional(&self.pool)
                        .await?;
                Ok(row)
            })
            .await
        }

        async fn touch_token(&self, token_id: Uuid, used_at: OffsetDateTime) -> MetadataResult<()> {
            self.timed("touch_token", async {
                sqlx::query("UPDATE api_tokens SET last_used_at = ? WHERE token_id = ?")
                    .bind(used_at)
                    .bind(token_id)
                    .execute(&self.pool)
                    .await?;
                Ok(())
            })
            .await
        }

        async fn revoke_token(
            &self,
            token_id: Uuid,
            revoked_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            self.timed("revoke_token", async {
                sqlx::query("UPDATE api_tokens SET revoked_at = ? WHERE token_id = ?")
                    .bind(revoked_at)
                    .bind(token_id)
                    .execute(&self.pool)
                    .await?;
                Ok(())
            })
            .await
        }

        async fn list_tokens_for_principal(&self, principal: &str) -> MetadataResult<Vec<TokenRow>> {
            self.timed("list_tokens_for_principal", async {
                let rows = sqlx::query_as::<_, TokenRow>(
                    "SELECT * FROM api_tokens WHERE principal = ? ORDER BY created_at DESC",
                )
                .bind(principal)
                .fetch_all(&self.pool)
                .await?;
                Ok(rows)
            })
            .await
        }
    }

    #[async_trait]
    impl PrincipalRepo for SqliteStore {
        async fn create_principal(&self, principal: &PrincipalRow) -> MetadataResult<()> {
            self.timed("create_principal", async {
                sqlx::query(
                    "INSERT INTO principals (principal, display_name, created_at) VALUES (?, ?, ?)",
                )
                .bind(&principal.principal)
                .bind(&principal.display_name)
                .bind(principal.created_at)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    MetadataError::on_conflict(e, format!("principal {}", principal.principal))
                })?;
                Ok(())
            })
            .await
        }

        async fn get_principal(&self, principal: &str) -> MetadataResult<Option<PrincipalRow>> {
            self.timed("get_principal", async {
                let row = sqlx::query_as::<_, PrincipalRow>(
                    "SELECT * FROM principals WHERE principal = ?",
                )
                .bind(principal)
                .fetch_optional(&self.pool)
                .await?;
                Ok(row)
            })
            .await
        }

        async fn delete_principal(&self, principal: &str) -> MetadataResult<PrincipalDeleteStats> {
            self.timed("delete_principal", async {
                let mut tx = self.pool.begin().await?;

                let exists: Option<String> =
                    sqlx::query_scalar("SELECT principal FROM principals WHERE principal = ?")
                        .bind(principal)
                        .fetch_optional(&mut *tx)
                        .await?;
                if exists.is_none() {
                    return Err(MetadataError::NotFound(format!("principal {principal}")));
                }

                // Check dependents inside the transaction so nothing slips in between.
                let artifact_count: i64 =
                    sqlx::query_scalar("SELECT COUNT(*) FROM artifacts WHERE owner = ?")
                        .bind(principal)
                        .fetch_one(&mut *tx)
                        .await?;
                if artifact_count > 0 {
                    return Err(MetadataError::Constraint(format!(
                        "cannot delete principal with {artifact_count} artifact(s)"
                    )));
                }

                let session_count: i64 =
                    sqlx::query_scalar("SELECT COUNT(*) FROM upload_sessions WHERE owner = ?")
                        .bind(principal)
                        .fetch_one(&mut *tx)
                        .await?;
                if session_count > 0 {
                    return Err(MetadataError::Constraint(format!(
                        "cannot delete principal with {session_count} upload session(s)"
                    )));
                }

                let tokens = sqlx::query("DELETE FROM api_tokens WHERE principal = ?")
                    .bind(principal)
                    .execute(&mut *tx)
                    .await?;

                sqlx::query("DELETE FROM principals WHERE principal = ?")
                    .bind(principal)
                    .execute(&mut *tx)
                    .await?;

                tx.commit().await?;
                tracing::info!(
                    principal,
                    tokens_deleted = tokens.rows_affected(),
                    "Deleted principal"
                );
                Ok(PrincipalDeleteStats {
                    tokens_deleted: tokens.rows_affected(),
                })
            })
            .await
        }
    }
}

const SCHEMA_SQL: &str = r#"
-- Upload sessions: one row per in-progress upload
CREATE TABLE IF NOT EXISTS upload_sessions (
    session_id BLOB PRIMARY KEY,
    owner TEXT NOT NULL,
    original_filename TEXT NOT NULL,
    display_name TEXT,
    extension TEXT NOT NULL,
    declared_size INTEGER NOT NULL CHECK (declared_size >= 0),
    total_chunks INTEGER NOT NULL CHECK (total_chunks > 0),
    received_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_upload_sessions_owner ON upload_sessions(owner);

-- Finished artifacts
CREATE TABLE IF NOT EXISTS artifacts (
    artifact_id BLOB PRIMARY KEY,
    owner TEXT NOT NULL,
    filename TEXT NOT NULL,
    display_name TEXT,
    path TEXT NOT NULL UNIQUE,
    url TEXT NOT NULL,
    markdown TEXT NOT NULL,
    html TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_artifacts_owner ON artifacts(owner, created_at);

-- Principals
CREATE TABLE IF NOT EXISTS principals (
    principal TEXT PRIMARY KEY,
    display_name TEXT,
    created_at TEXT NOT NULL
);

-- API tokens (SHA-256 of the secret, hex)
CREATE TABLE IF NOT EXISTS api_tokens (
    token_id BLOB PRIMARY KEY,
    principal TEXT NOT NULL,
    token_hash TEXT NOT NULL UNIQUE,
    description TEXT,
    expires_at TEXT,
    revoked_at TEXT,
    created_at TEXT NOT NULL,
    last_used_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_api_tokens_principal ON api_tokens(principal);
"#;
