//! Shared types, config, and error definitions for the airfield briefing service.

pub mod config;
pub mod error;
pub mod types;

pub use config::AppConfig;
pub use error::{body_excerpt, Error};
pub use types::*;

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, Error>;
