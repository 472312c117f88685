//! Core domain types for tessera, a resumable chunked upload service.
//!
//! This crate defines the data model shared by every other crate:
//! - Session and principal identifiers
//! - Upload session records and progress states
//! - Wire request/response types
//! - Artifact naming, public URLs and display snippets
//! - Configuration

pub mod artifact;
pub mod config;
pub mod error;
pub mod principal;
pub mod upload;

pub use artifact::{ArtifactDescriptor, DisplaySnippets};
pub use config::AppConfig;
pub use error::{Error, Result};
pub use principal::PrincipalId;
pub use upload::{SessionId, UploadSession, UploadState};

/// Default chunk size: 2 MiB
pub const DEFAULT_CHUNK_SIZE: u64 = 2 * 1024 * 1024;

/// Default maximum artifact size: 10 MiB
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// File name prefix of a stored chunk: `chunk_<index>`.
pub const CHUNK_FILE_PREFIX: &str = "chunk_";
