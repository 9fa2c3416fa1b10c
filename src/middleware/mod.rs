pub mod auth;

// Re-export middleware functions
pub use auth::{BearerToken, auth_middleware};
