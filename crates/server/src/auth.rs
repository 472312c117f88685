//! Authentication chain and middleware.
//!
//! Each authenticator inspects the request headers and returns a definite
//! outcome. The chain walks them in order: the first match wins, the first
//! malformed credential stops the walk.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, HeaderName};
use axum::middleware::Next;
use axum::response::Response;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tessera_core::PrincipalId;
use tessera_core::config::AuthConfig;
use tessera_metadata::MetadataStore;
use time::OffsetDateTime;
use tracing::Instrument;
use uuid::Uuid;

/// Maximum length for trace IDs.
const MAX_TRACE_ID_LEN: usize = 128;

/// Trace ID for request correlation.
#[derive(Clone, Debug)]
pub struct TraceId(pub String);

impl TraceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Accept a client-provided value, truncated and limited to printable ASCII.
    pub fn from_client(value: &str) -> Self {
        let sanitized: String = value
            .chars()
            .take(MAX_TRACE_ID_LEN)
            .filter(|c| c.is_ascii_graphic())
            .collect();

        if sanitized.is_empty() {
            Self::new()
        } else {
            Self(sanitized)
        }
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The principal a request acts as.
#[derive(Clone, Debug)]
pub struct AuthenticatedPrincipal {
    pub principal: PrincipalId,
    /// Which authenticator matched.
    pub via: &'static str,
}

/// Result of one authenticator's inspection.
#[derive(Debug)]
pub enum AuthOutcome {
    Matched(PrincipalId),
    NotApplicable,
    Malformed(String),
}

/// One link of the chain.
#[async_trait]
pub trait Authenticator: Send + Sync {
    fn name(&self) -> &'static str;

    /// Inspect headers. Store failures are errors, not outcomes.
    async fn authenticate(&self, headers: &HeaderMap) -> ApiResult<AuthOutcome>;
}

/// Hash a token secret for storage lookup (lowercase hex SHA-256).
pub fn hash_token(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

/// Bearer API tokens looked up by hash in the token table.
pub struct ApiTokenAuthenticator {
    metadata: Arc<dyn MetadataStore>,
}

impl ApiTokenAuthenticator {
    pub fn new(metadata: Arc<dyn MetadataStore>) -> Self {
        Self { metadata }
    }
}

/// Split `Authorization` into a bearer secret. The scheme is case-insensitive
/// (RFC 6750).
fn bearer_secret(value: &str) -> Option<&str> {
    let (scheme, secret) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let secret = secret.trim();
    (!secret.is_empty()).then_some(secret)
}

#[async_trait]
impl Authenticator for ApiTokenAuthenticator {
    fn name(&self) -> &'static str {
        "api_token"
    }

    async fn authenticate(&self, headers: &HeaderMap) -> ApiResult<AuthOutcome> {
        let Some(value) = headers.get(AUTHORIZATION) else {
            return Ok(AuthOutcome::NotApplicable);
        };
        let Some(secret) = value.to_str().ok().and_then(bearer_secret) else {
            return Ok(AuthOutcome::Malformed(
                "authorization header is not a bearer token".to_string(),
            ));
        };

        let Some(row) = self.metadata.get_token_by_hash(&hash_token(secret)).await? else {
            return Ok(AuthOutcome::Malformed("unknown token".to_string()));
        };
        let now = OffsetDateTime::now_utc();
        if !row.is_usable_at(now) {
            return Ok(AuthOutcome::Malformed("token expired or revoked".to_string()));
        }
        let principal = match PrincipalId::parse(&row.principal) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(token_id = %row.token_id, error = %e, "Token has invalid principal");
                return Ok(AuthOutcome::Malformed("token principal is invalid".to_string()));
            }
        };

        // Update last used time (fire and forget)
        let metadata = self.metadata.clone();
        let token_id = row.token_id;
        tokio::spawn(async move {
            if let Err(e) = metadata.touch_token(token_id, now).await {
                tracing::debug!(token_id = %token_id, error = %e, "Failed to touch token");
            }
        });

        Ok(AuthOutcome::Matched(principal))
    }
}

/// Principal id taken from a header set by an authenticating reverse proxy.
pub struct TrustedHeaderAuthenticator {
    header: HeaderName,
}

impl TrustedHeaderAuthenticator {
    pub fn new(header: &str) -> tessera_core::Result<Self> {
        let header = HeaderName::try_from(header.trim()).map_err(|e| {
            tessera_core::Error::Config(format!("invalid trusted principal header: {e}"))
        })?;
        Ok(Self { header })
    }
}

#[async_trait]
impl Authenticator for TrustedHeaderAuthenticator {
    fn name(&self) -> &'static str {
        "trusted_header"
    }

    async fn authenticate(&self, headers: &HeaderMap) -> ApiResult<AuthOutcome> {
        let Some(value) = headers.get(&self.header) else {
            return Ok(AuthOutcome::NotApplicable);
        };
        let outcome = match value.to_str().map(|v| PrincipalId::parse(v.trim())) {
            Ok(Ok(principal)) => AuthOutcome::Matched(principal),
            Ok(Err(e)) => AuthOutcome::Malformed(e.to_string()),
            Err(_) => AuthOutcome::Malformed("principal header is not ASCII".to_string()),
        };
        Ok(outcome)
    }
}

/// Ordered list of authenticators.
pub struct AuthChain {
    authenticators: Vec<Box<dyn Authenticator>>,
}

impl AuthChain {
    pub fn new(authenticators: Vec<Box<dyn Authenticator>>) -> Self {
        Self { authenticators }
    }

    /// Build the chain the configuration enables, API tokens first.
    pub fn from_config(
        config: &AuthConfig,
        metadata: Arc<dyn MetadataStore>,
    ) -> tessera_core::Result<Self> {
        let mut authenticators: Vec<Box<dyn Authenticator>> = Vec::new();
        if config.api_tokens {
            authenticators.push(Box::new(ApiTokenAuthenticator::new(metadata)));
        }
        if let Some(header) = &config.trusted_principal_header {
            authenticators.push(Box::new(TrustedHeaderAuthenticator::new(header)?));
        }
        Ok(Self::new(authenticators))
    }

    /// Walk the chain. `Ok(None)` means no authenticator applied.
    pub async fn authenticate(
        &self,
        headers: &HeaderMap,
    ) -> ApiResult<Option<AuthenticatedPrincipal>> {
        for authenticator in &self.authenticators {
            match authenticator.authenticate(headers).await? {
                AuthOutcome::Matched(principal) => {
                    return Ok(Some(AuthenticatedPrincipal {
                        principal,
                        via: authenticator.name(),
                    }));
                }
                AuthOutcome::NotApplicable => continue,
                AuthOutcome::Malformed(reason) => {
                    tracing::debug!(authenticator = authenticator.name(), %reason, "Rejected credentials");
                    return Err(ApiError::Unauthorized(reason));
                }
            }
        }
        Ok(None)
    }
}

fn extract_or_generate_trace_id(req: &Request) -> TraceId {
    req.headers()
        .get("x-trace-id")
        .and_then(|v| v.to_str().ok())
        .map(TraceId::from_client)
        .unwrap_or_default()
}

/// Run the auth chain and attach the principal (if any) to the request.
///
/// Requests with no credentials pass through; handlers that need a principal
/// call [`require_auth`].
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let trace_id = extract_or_generate_trace_id(&req);
    let span = tracing::info_span!("request", trace_id = %trace_id, principal = tracing::field::Empty);
    req.extensions_mut().insert(trace_id);

    if let Some(auth) = state.auth.authenticate(req.headers()).await? {
        span.record("principal", tracing::field::display(&auth.principal));
        req.extensions_mut().insert(auth);
    }

    Ok(next.run(req).instrument(span).await)
}

/// Require an authenticated principal.
pub fn require_auth(req: &Request) -> ApiResult<&AuthenticatedPrincipal> {
    req.extensions()
        .get::<AuthenticatedPrincipal>()
        .ok_or_else(|| ApiError::Unauthorized("authentication required".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    struct Fixed(&'static str, fn() -> AuthOutcome);

    #[async_trait]
    impl Authenticator for Fixed {
        fn name(&self) -> &'static str {
            self.0
        }

        async fn authenticate(&self, _headers: &HeaderMap) -> ApiResult<AuthOutcome> {
            Ok((self.1)())
        }
    }

    fn matched() -> AuthOutcome {
        AuthOutcome::Matched(PrincipalId::parse("alice").unwrap())
    }

    #[test]
    fn test_hash_token_is_lowercase_hex() {
        let hash = hash_token("secret");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(
            hash,
            "2bb80d537b1da3e38bd30361aa855686bde0eacd7162fef6a25fe97bf527a25b"
        );
    }

    #[test]
    fn test_bearer_secret_parsing() {
        assert_eq!(bearer_secret("Bearer abc"), Some("abc"));
        assert_eq!(bearer_secret("bEaReR abc"), Some("abc"));
        assert_eq!(bearer_secret("Basic abc"), None);
        assert_eq!(bearer_secret("Bearer "), None);
        assert_eq!(bearer_secret("Bearer"), None);
    }

    #[test]
    fn test_trace_id_sanitized() {
        let id = TraceId::from_client("abc\ndef");
        assert_eq!(id.0, "abcdef");
        let long = "x".repeat(500);
        assert_eq!(TraceId::from_client(&long).0.len(), MAX_TRACE_ID_LEN);
        assert!(!TraceId::from_client("\n").0.is_empty());
    }

    #[tokio::test]
    async fn test_first_match_wins() {
        let chain = AuthChain::new(vec![
            Box::new(Fixed("a", || AuthOutcome::NotApplicable)),
            Box::new(Fixed("b", matched)),
            Box::new(Fixed("c", || AuthOutcome::Malformed("late".into()))),
        ]);
        let auth = chain.authenticate(&HeaderMap::new()).await.unwrap().unwrap();
        assert_eq!(auth.via, "b");
        assert_eq!(auth.principal.as_str(), "alice");
    }

    #[tokio::test]
    async fn test_malformed_stops_chain() {
        let chain = AuthChain::new(vec![
            Box::new(Fixed("a", || AuthOutcome::Malformed("bad".into()))),
            Box::new(Fixed("b", matched)),
        ]);
        let err = chain.authenticate(&HeaderMap::new()).await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_all_not_applicable_is_none() {
        let chain = AuthChain::new(vec![Box::new(Fixed("a", || AuthOutcome::NotApplicable))]);
        assert!(chain.authenticate(&HeaderMap::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_trusted_header() {
        let auth = TrustedHeaderAuthenticator::new("X-Remote-User").unwrap();
        let mut headers = HeaderMap::new();
        assert!(matches!(
            auth.authenticate(&headers).await.unwrap(),
            AuthOutcome::NotApplicable
        ));

        headers.insert("x-remote-user", HeaderValue::from_static("bob"));
        assert!(matches!(
            auth.authenticate(&headers).await.unwrap(),
            AuthOutcome::Matched(p) if p.as_str() == "bob"
        ));

        headers.insert("x-remote-user", HeaderValue::from_static("../etc"));
        assert!(matches!(
            auth.authenticate(&headers).await.unwrap(),
            AuthOutcome::Malformed(_)
        ));
    }
}
