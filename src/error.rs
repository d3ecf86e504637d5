//! Error taxonomy for the research graph.
//!
//! Library code returns [`Result`] with a typed [`Error`] so callers can tell
//! a missing paper (client-visible "not found") from an unreachable store
//! (fail fast) or a recoverable upstream hiccup (log, skip, continue). The
//! CLI wraps these in `anyhow` at the top level.

use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// The graph store could not be reached or did not answer a ping.
    #[error("graph store unavailable: {0}")]
    Connectivity(String),

    /// No node exists for the given label and identity key.
    #[error("{label} not found: {key}")]
    NotFound { label: String, key: String },

    /// LLM output could not be turned into structured data.
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// An external feed or API returned an error, timed out, or sent garbage.
    #[error("upstream source '{source_name}' failed: {message}")]
    Upstream { source_name: String, message: String },

    /// The generative provider failed while producing a stream.
    #[error("generation stream failed: {0}")]
    Stream(String),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn not_found(label: impl Into<String>, key: impl Into<String>) -> Self {
        Error::NotFound {
            label: label.into(),
            key: key.into(),
        }
    }

    pub fn upstream(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Upstream {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// True for errors that mean "nothing there" rather than "something broke".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message_names_label_and_key() {
        let err = Error::not_found("Paper", "2301.00001");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Paper not found: 2301.00001");
    }

    #[test]
    fn test_upstream_message() {
        let err = Error::upstream("arxiv", "HTTP 503");
        assert!(!err.is_not_found());
        assert_eq!(err.to_string(), "upstream source 'arxiv' failed: HTTP 503");
    }
}
