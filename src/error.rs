//! Core error taxonomy.
//!
//! One enum variant per kind in spec §7.1. [`crate::protocol::dispatcher`] is the
//! single place that converts a [`CoreError`] into a JSON-RPC wire error object
//! (the table in spec §4.8); no other component builds that object directly.

use std::fmt;

/// Result type used throughout the core.
pub type CoreResult<T> = Result<T, CoreError>;

/// The four scope-violation subtypes from spec §4.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeViolationKind {
    NotebookOutsideFolderScope,
    PageOutsideFolderScope,
    EntryOutsideNotebookScope,
    NotebookOutsideConfiguredNotebook,
}

impl fmt::Display for ScopeViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotebookOutsideFolderScope => "NotebookOutsideFolderScope",
            Self::PageOutsideFolderScope => "PageOutsideFolderScope",
            Self::EntryOutsideNotebookScope => "EntryOutsideNotebookScope",
            Self::NotebookOutsideConfiguredNotebook => "NotebookOutsideConfiguredNotebook",
        };
        f.write_str(s)
    }
}

/// Comprehensive core error taxonomy (spec §7.1).
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CoreError {
    /// Invalid combination or missing required configuration field.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Wrong credentials, second consecutive 401, or expired SSO token.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Fail-secure scope denial; carries a stable, machine-readable kind.
    #[error("scope violation: {kind}")]
    ScopeViolation {
        kind: ScopeViolationKind,
        detail: String,
    },

    /// A parse-valid URI referring to a nonexistent notebook/page/entry.
    #[error("not found: {0}")]
    NotFound(String),

    /// 429/5xx/network; eligible for retry by the caller that raised it.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Retries exhausted against a persistent 429.
    #[error("upstream rate limited: {0}")]
    UpstreamRateLimited(String),

    /// 4xx other than 401/403/404; never retried.
    #[error("upstream request error: {0}")]
    UpstreamPermanent(String),

    /// Malformed JSON-RPC envelope or unparseable params.
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// Unknown JSON-RPC method.
    #[error("method not found: {0}")]
    MethodNotFound(String),

    /// Invariant violation or programming error; never retried.
    #[error("internal error: {0}")]
    Internal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    pub fn scope_violation(kind: ScopeViolationKind, detail: impl Into<String>) -> Self {
        Self::ScopeViolation {
            kind,
            detail: detail.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}
