//! Startup provisioning of configured principals and their API tokens.

use anyhow::{Result, bail};
use tessera_core::PrincipalId;
use tessera_core::config::BootstrapPrincipal;
use tessera_metadata::MetadataStore;
use tessera_metadata::models::{PrincipalRow, TokenRow};
use time::OffsetDateTime;
use uuid::Uuid;

/// Ensure each configured principal exists and owns a usable token with the
/// configured hash.
pub async fn ensure_bootstrap_principals(
    metadata: &dyn MetadataStore,
    entries: &[BootstrapPrincipal],
) -> Result<()> {
    for entry in entries {
        ensure_one(metadata, entry).await?;
    }
    Ok(())
}

async fn ensure_one(metadata: &dyn MetadataStore, entry: &BootstrapPrincipal) -> Result<()> {
    let principal = PrincipalId::parse(&entry.principal)?;
    let hash = entry.normalized_hash();
    if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
        bail!("invalid token_hash for {principal}: expected 64 hex chars");
    }
    let now = OffsetDateTime::now_utc();

    if metadata.get_principal(principal.as_str()).await?.is_none() {
        metadata
            .create_principal(&PrincipalRow {
                principal: principal.to_string(),
                display_name: None,
                created_at: now,
            })
            .await?;
        tracing::info!(principal = %principal, "Bootstrap principal created");
    }

    if let Some(existing) = metadata.get_token_by_hash(&hash).await? {
        if existing.principal != principal.as_str() {
            bail!(
                "bootstrap token hash for {principal} already belongs to {}",
                existing.principal
            );
        }
        if !existing.is_usable_at(now) {
            bail!(
                "bootstrap token hash for {principal} matches a revoked or expired token (id={}); \
                 configure a new token",
                existing.token_id
            );
        }
        tracing::debug!(principal = %principal, "Bootstrap token already exists");
        return Ok(());
    }

    let token = TokenRow {
        token_id: Uuid::new_v4(),
        principal: principal.to_string(),
        token_hash: hash,
        description: entry.description.clone(),
        expires_at: None,
        revoked_at: None,
        created_at: now,
        last_used_at: None,
    };
    metadata.create_token(&token).await?;
    tracing::info!(principal = %principal, token_id = %token.token_id, "Bootstrap token created");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::hash_token;
    use tessera_metadata::SqliteStore;
    use tessera_metadata::repos::{PrincipalRepo, TokenRepo};

    fn entry(principal: &str, secret: &str) -> BootstrapPrincipal {
        BootstrapPrincipal {
            principal: principal.to_string(),
            token_hash: hash_token(secret),
            description: Some("ci".to_string()),
        }
    }

    #[tokio::test]
    async fn test_bootstrap_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("meta.db"), None).await.unwrap();
        let entries = vec![entry("alice", "s3cret")];

        ensure_bootstrap_principals(&store, &entries).await.unwrap();
        ensure_bootstrap_principals(&store, &entries).await.unwrap();

        assert!(store.get_principal("alice").await.unwrap().is_some());
        assert_eq!(store.list_tokens_for_principal("alice").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_revoked_bootstrap_token_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("meta.db"), None).await.unwrap();
        let entries = vec![entry("alice", "s3cret")];
        ensure_bootstrap_principals(&store, &entries).await.unwrap();

        let token = store
            .get_token_by_hash(&hash_token("s3cret"))
            .await
            .unwrap()
            .unwrap();
        store
            .revoke_token(token.token_id, OffsetDateTime::now_utc())
            .await
            .unwrap();
        assert!(ensure_bootstrap_principals(&store, &entries).await.is_err());
    }

    #[tokio::test]
    async fn test_hash_shared_between_principals_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("meta.db"), None).await.unwrap();
        let entries = vec![entry("alice", "same"), entry("bob", "same")];
        assert!(ensure_bootstrap_principals(&store, &entries).await.is_err());
    }
}
