//! Error types for search cluster operations.

use serde_json::Value;
use thiserror::Error;

/// Search client error type.
#[derive(Error, Debug)]
pub enum SearchError {
    /// No configured host could be reached, or the transport could not be built.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Index creation or deletion was rejected.
    #[error("Index operation on {index} failed: {reason}")]
    IndexCreation {
        /// Index name.
        index: String,
        /// Engine or client supplied reason.
        reason: String,
    },

    /// The schema could not be turned into a mapping, or the engine rejected it.
    #[error("Mapping for {index} rejected: {reason}")]
    Mapping {
        /// Index name.
        index: String,
        /// Reason.
        reason: String,
    },

    /// Alias binding was rejected.
    #[error("Alias {alias} -> {index} failed: {reason}")]
    Alias {
        /// Alias name.
        alias: String,
        /// Target index.
        index: String,
        /// Reason.
        reason: String,
    },

    /// Requested document id is absent.
    #[error("Document not found: {index}/{id}")]
    NotFound {
        /// Index name.
        index: String,
        /// Document ID.
        id: String,
    },

    /// A read, write, or search call returned an error or malformed response.
    #[error("{endpoint} returned {status}: {reason}")]
    ServerResponse {
        /// Method and path of the request.
        endpoint: String,
        /// HTTP status code.
        status: u16,
        /// Engine supplied reason.
        reason: String,
        /// Raw error payload, when the engine sent one.
        payload: Option<Value>,
    },

    /// A document could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration values are unusable.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A request was rejected before being sent.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Settings could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] trawler_config::ConfigError),
}

impl SearchError {
    /// True for [`SearchError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, SearchError::NotFound { .. })
    }

    /// HTTP status carried by a server response error.
    pub fn status(&self) -> Option<u16> {
        match self {
            SearchError::ServerResponse { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result type alias for search operations.
pub type Result<T> = std::result::Result<T, SearchError>;
