//! Error types for the remediation tooling
//!
//! Errors fall into two groups. Environment errors (missing tool, no
//! session, absent namespace or resource type) abort a run. Everything else
//! is recorded against the item being processed and the batch continues.

use thiserror::Error;

/// Unified error type for the library
#[derive(Error, Debug)]
pub enum RemediationError {
    // =========================================================================
    // Environment Errors
    // =========================================================================
    #[error("Required tool `{tool}` not found on PATH: {hint}")]
    MissingTool { tool: String, hint: String },

    #[error("Not authenticated to the cluster: {0}")]
    NotAuthenticated(String),

    #[error("Namespace not found: {0}")]
    NamespaceNotFound(String),

    #[error("Resource type not installed on the cluster: {0}")]
    ResourceTypeMissing(String),

    #[error("No route matching `{selector}` in namespace {namespace}")]
    RouteNotFound { namespace: String, selector: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    // =========================================================================
    // Service API Errors
    // =========================================================================
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Service API error ({status}): {body}")]
    ServiceApi { status: u16, body: String },

    #[error("Invalid service URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Malformed metric listing: {0}")]
    MalformedListing(String),

    // =========================================================================
    // Backup File Errors
    // =========================================================================
    #[error("Invalid backup file {path}: {reason}")]
    InvalidBackup { path: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RemediationError {
    /// Returns true if the error means the run cannot proceed at all
    pub fn is_environment(&self) -> bool {
        matches!(
            self,
            RemediationError::MissingTool { .. }
                | RemediationError::NotAuthenticated(_)
                | RemediationError::NamespaceNotFound(_)
                | RemediationError::ResourceTypeMissing(_)
                | RemediationError::RouteNotFound { .. }
                | RemediationError::Configuration(_)
        )
    }
}

/// Result alias used across the library
pub type Result<T> = std::result::Result<T, RemediationError>;

/// Returns true if a kube error is an API 404
pub(crate) fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 404)
}
