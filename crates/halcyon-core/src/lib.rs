//! Foundation crate for the Halcyon account platform SDK.
//!
//! Carries the shared error vocabulary, the Auth API capability and its HTTP
//! implementation, the key-unlock crypto, and the session/device stores. The
//! authentication orchestration itself lives in `halcyon-auth`.

pub mod api;
pub mod crypto;
mod error;
pub mod session;

pub use error::{ApiError, MissingFieldError};

mod ids;
pub use ids::*;
