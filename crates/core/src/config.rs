//! Configuration types shared across crates.
//!
//! Every component receives the section it needs at construction time; nothing
//! reads configuration from ambient state.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8000").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Largest chunk body accepted, in bytes. Advertised to clients at init.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// Largest artifact accepted, in bytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Comma-separated, case-insensitive extension allow-list.
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: String,
    /// Enable the /metrics endpoint.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_chunk_size() -> u64 {
    crate::DEFAULT_CHUNK_SIZE
}

fn default_max_file_size() -> u64 {
    crate::DEFAULT_MAX_FILE_SIZE
}

fn default_allowed_extensions() -> String {
    "jpg,jpeg,png,gif,webp".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            chunk_size: default_chunk_size(),
            max_file_size: default_max_file_size(),
            allowed_extensions: default_allowed_extensions(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl ServerConfig {
    /// Parsed allow-list: trimmed, lower-cased, empty entries and leading dots
    /// dropped.
    pub fn allowed_extensions(&self) -> Vec<String> {
        self.allowed_extensions
            .split(',')
            .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect()
    }

    /// Whether an already lower-cased extension is allowed.
    pub fn is_extension_allowed(&self, extension: &str) -> bool {
        self.allowed_extensions().iter().any(|e| e == extension)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_size == 0 {
            return Err("server.chunk_size must be greater than 0".to_string());
        }
        if self.max_file_size == 0 {
            return Err("server.max_file_size must be greater than 0".to_string());
        }
        if self.allowed_extensions().is_empty() {
            return Err("server.allowed_extensions must list at least one extension".to_string());
        }
        Ok(())
    }
}

/// Filesystem roots.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root of in-progress sessions: `<temp_root>/<session_id>/chunk_<i>`.
    #[serde(default = "default_temp_root")]
    pub temp_root: PathBuf,
    /// Root of finished artifacts: `<artifact_root>/<owner>/images/<file>`.
    #[serde(default = "default_artifact_root")]
    pub artifact_root: PathBuf,
}

fn default_temp_root() -> PathBuf {
    PathBuf::from("./data/temp")
}

fn default_artifact_root() -> PathBuf {
    PathBuf::from("./data/static")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            temp_root: default_temp_root(),
            artifact_root: default_artifact_root(),
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.temp_root == self.artifact_root {
            return Err("storage.temp_root and storage.artifact_root must differ".to_string());
        }
        Ok(())
    }
}

/// How artifact URLs are built.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PublishConfig {
    /// Public origin, e.g. "https://img.example.com".
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Path segment under which the artifact root is served.
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_path_prefix() -> String {
    "static".to_string()
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            path_prefix: default_path_prefix(),
        }
    }
}

impl PublishConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(format!(
                "publish.base_url must start with http:// or https://, got {:?}",
                self.base_url
            ));
        }
        Ok(())
    }
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database.
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Advisory query timeout in seconds. Slow queries are logged, not
        /// cancelled.
        #[serde(default = "default_sqlite_query_timeout_secs")]
        query_timeout_secs: Option<u64>,
    },
}

fn default_sqlite_query_timeout_secs() -> Option<u64> {
    Some(30)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/metadata.db"),
            query_timeout_secs: default_sqlite_query_timeout_secs(),
        }
    }
}

/// Expiry reaper configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReaperConfig {
    #[serde(default = "default_reaper_enabled")]
    pub enabled: bool,
    /// Seconds between sweeps (default: 3 hours).
    #[serde(default = "default_reaper_interval_secs")]
    pub interval_secs: u64,
    /// Age in seconds after which a session directory is reaped (default: 24 hours).
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    /// Also delete the registry row of a reaped session.
    #[serde(default)]
    pub delete_orphan_rows: bool,
}

fn default_reaper_enabled() -> bool {
    true
}

fn default_reaper_interval_secs() -> u64 {
    3 * 60 * 60
}

fn default_session_ttl_secs() -> u64 {
    24 * 60 * 60
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            enabled: default_reaper_enabled(),
            interval_secs: default_reaper_interval_secs(),
            session_ttl_secs: default_session_ttl_secs(),
            delete_orphan_rows: false,
        }
    }
}

impl ReaperConfig {
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_secs)
    }

    pub fn session_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.session_ttl_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        // tokio::time::interval panics on a zero period.
        if self.interval_secs == 0 {
            return Err("reaper.interval_secs cannot be 0".to_string());
        }
        if self.session_ttl_secs == 0 {
            return Err("reaper.session_ttl_secs cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Authentication chain configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Accept `Authorization: Bearer` API tokens.
    #[serde(default = "default_api_tokens")]
    pub api_tokens: bool,
    /// Header carrying a principal id set by an authenticating reverse proxy.
    /// Only enable behind a proxy that strips this header from client requests.
    #[serde(default)]
    pub trusted_principal_header: Option<String>,
    /// Principals and API tokens ensured at startup.
    #[serde(default)]
    pub bootstrap: Vec<BootstrapPrincipal>,
}

/// A principal (and one API token for it) created at startup if missing.
///
/// Only the SHA-256 of the token is configured, never the secret.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BootstrapPrincipal {
    pub principal: String,
    /// Hex SHA-256 of the token secret, optionally prefixed with `sha256:`.
    pub token_hash: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl BootstrapPrincipal {
    /// Lower-cased hex digest without prefix.
    pub fn normalized_hash(&self) -> String {
        self.token_hash
            .strip_prefix("sha256:")
            .unwrap_or(&self.token_hash)
            .to_ascii_lowercase()
    }
}

fn default_api_tokens() -> bool {
    true
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_tokens: default_api_tokens(),
            trusted_principal_header: None,
            bootstrap: Vec::new(),
        }
    }
}

impl AuthConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !self.api_tokens && self.trusted_principal_header.is_none() {
            return Err("auth: at least one authenticator must be enabled".to_string());
        }
        if let Some(header) = &self.trusted_principal_header
            && header.trim().is_empty()
        {
            return Err("auth.trusted_principal_header cannot be empty".to_string());
        }
        for entry in &self.bootstrap {
            crate::PrincipalId::parse(&entry.principal)
                .map_err(|e| format!("auth.bootstrap: {e}"))?;
            let hash = entry.normalized_hash();
            if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(format!(
                    "auth.bootstrap: token_hash for {} must be 64 hex chars",
                    entry.principal
                ));
            }
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub publish: PublishConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub reaper: ReaperConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Roots point at relative paths; tests override
    /// them with temporary directories. The reaper is disabled so sweeps run
    /// only when a test drives them.
    pub fn for_testing() -> Self {
        Self {
            reaper: ReaperConfig {
                enabled: false,
                ..ReaperConfig::default()
            },
            ..Self::default()
        }
    }

    /// Validate every section, prefixing the failing section's message.
    pub fn validate(&self) -> crate::Result<()> {
        self.server
            .validate()
            .and_then(|_| self.storage.validate())
            .and_then(|_| self.publish.validate())
            .and_then(|_| self.reaper.validate())
            .and_then(|_| self.auth.validate())
            .map_err(crate::Error::Config)
    }
}
