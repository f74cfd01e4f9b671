//! Unified error type for the briefing service.

use thiserror::Error;

use crate::types::SourceId;

#[derive(Debug, Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    /// Network or parse failure on one upstream data source.
    #[error("{provider} fetch failed: {message}")]
    UpstreamFetch { provider: SourceId, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Characters of an upstream error body kept in error messages.
pub const BODY_EXCERPT_CHARS: usize = 500;

/// Leading part of an error response body, cut on a character boundary.
pub fn body_excerpt(body: &str) -> &str {
    match body.char_indices().nth(BODY_EXCERPT_CHARS) {
        Some((end, _)) => &body[..end],
        None => body,
    }
}

impl Error {
    pub fn upstream(provider: SourceId, message: impl Into<String>) -> Self {
        Error::UpstreamFetch {
            provider,
            message: message.into(),
        }
    }

    /// The upstream source this error is attributed to, if any.
    pub fn provider(&self) -> Option<SourceId> {
        match self {
            Error::UpstreamFetch { provider, .. } => Some(*provider),
            _ => None,
        }
    }
}
