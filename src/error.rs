//! Error types for the dashboard engine.

use thiserror::Error;

/// A query could not be parsed for rewriting. Always recovered by the caller.
#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("PromQL parse error: {0}")]
    Parse(String),
}

impl From<pest::error::Error<crate::infrastructure::promql::Rule>> for RewriteError {
    fn from(e: pest::error::Error<crate::infrastructure::promql::Rule>) -> Self {
        Self::Parse(e.to_string())
    }
}

/// A backend request for one query failed.
#[derive(Debug, Clone, Error)]
#[error("query {query_id} failed: {message}")]
pub struct FetchError {
    pub query_id: String,
    pub message: String,
}

impl FetchError {
    pub fn new(query_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            query_id: query_id.into(),
            message: message.into(),
        }
    }
}

/// An import payload was rejected. Nothing was applied.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("invalid JSON: {0}")]
    Json(String),

    #[error("invalid configuration file: missing or invalid '{field}' ({expected} expected)")]
    Missing {
        field: &'static str,
        expected: &'static str,
    },

    #[error("invalid field '{field}': {reason}")]
    Field { field: String, reason: String },
}

/// Snapshot storage could not be read or written.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Failure of a dashboard use case, as surfaced to the HTTP layer.
#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("panel {0} not found")]
    PanelNotFound(String),

    #[error("query {query_id} not found in panel {panel_id}")]
    QueryNotFound { panel_id: String, query_id: String },

    #[error("unknown template {0}")]
    UnknownTemplate(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("metrics backend error: {0}")]
    Backend(String),
}
