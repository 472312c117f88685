//! HTTP server for tessera, a self-hosted image host built on resumable
//! chunked upload.
//!
//! This crate provides:
//! - The upload coordinator (init, chunk, status, merge, abort)
//! - The expiry reaper for abandoned sessions
//! - The authentication chain
//! - HTTP routes and Prometheus metrics

pub mod auth;
pub mod bootstrap;
pub mod coordinator;
pub mod error;
pub mod handlers;
pub mod locks;
pub mod metrics;
pub mod reaper;
pub mod routes;
pub mod state;

pub use auth::{AuthChain, AuthOutcome, Authenticator, TraceId};
pub use coordinator::{CoordinatorSettings, UploadCoordinator};
pub use error::ApiError;
pub use reaper::{ExpiryReaper, ReaperHandle, SweepReport};
pub use routes::create_router;
pub use state::AppState;
