//! Repository traits for metadata operations.

pub mod artifacts;
pub mod principals;
pub mod sessions;
pub mod tokens;

pub use artifacts::ArtifactRegistry;
pub use principals::{PrincipalDeleteStats, PrincipalRepo};
pub use sessions::SessionRegistry;
pub use tokens::TokenRepo;
