//! Error types for Dossier.
//!
//! Library crates use [`DossierError`] and the export taxonomy below via
//! `thiserror`. The CLI wraps these with `color-eyre` for rich diagnostics.
//!
//! Export failures are split into fatal categories ([`FetchError`],
//! [`StructuralError`], [`RenderError`], cancellation); content degradations
//! are not errors and travel as [`Warning`]s instead.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{NodeId, Warning};

/// Top-level error type for configuration, I/O and collaborator plumbing.
#[derive(Debug, thiserror::Error)]
pub enum DossierError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error outside of a project fetch.
    #[error("network error: {0}")]
    Network(String),

    /// Input parsing error (project id, URL, JSON).
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error.
    #[error("validation error: {message}")]
    Validation { message: String },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Export(#[from] ExportError),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DossierError>;

impl DossierError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// Fetch boundary
// ---------------------------------------------------------------------------

/// Failure reported by the fetch collaborator. Always fatal to an export.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("invalid project data: {0}")]
    Invalid(String),
}

/// Failure fetching one asset. Never fatal; degrades to a placeholder.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssetError {
    #[error("asset not found: {0}")]
    NotFound(String),

    #[error("asset fetch failed: {0}")]
    Failed(String),

    #[error("asset fetch timed out after {0:?}")]
    TimedOut(Duration),
}

// ---------------------------------------------------------------------------
// Structural failures
// ---------------------------------------------------------------------------

/// The project graph violates the tree contract.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StructuralError {
    #[error("root node '{id}' is missing from the project data")]
    MissingRoot { id: NodeId },

    #[error("node '{id}' is not a root: its parent '{parent}' is part of the project data")]
    NotRoot { id: NodeId, parent: NodeId },

    #[error("cycle detected: {}", join_path(.path))]
    Cycle { path: Vec<NodeId> },

    #[error("node '{id}' is reachable from more than one parent (again via '{parent}')")]
    SharedNode { id: NodeId, parent: NodeId },

    #[error("node '{parent}' lists child '{child}' which does not exist")]
    DanglingChild { parent: NodeId, child: NodeId },

    #[error("node '{id}' is listed by '{listed_by}' but declares parent '{declared}'")]
    InconsistentParent {
        id: NodeId,
        listed_by: NodeId,
        declared: NodeId,
    },

    #[error("node '{id}' at depth {depth} exceeds the maximum tree depth of {max}")]
    DepthExceeded { id: NodeId, depth: usize, max: usize },
}

fn join_path(path: &[NodeId]) -> String {
    path.iter()
        .map(NodeId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

// ---------------------------------------------------------------------------
// Render failures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    /// The output document could not be encoded.
    #[error("document encoding failed: {0}")]
    Encoding(String),

    #[error("rendering was cancelled")]
    Cancelled,
}

impl RenderError {
    pub fn encoding(msg: impl std::fmt::Display) -> Self {
        Self::Encoding(msg.to_string())
    }
}

// ---------------------------------------------------------------------------
// Export failures
// ---------------------------------------------------------------------------

/// Category of a fatal export failure, as presented to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    FetchFailure,
    StructuralFailure,
    RenderFailure,
    Cancelled,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::FetchFailure => "fetch failure",
            Self::StructuralFailure => "structural failure",
            Self::RenderFailure => "render failure",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExportFailure {
    #[error("fetch failure: {0}")]
    Fetch(#[from] FetchError),

    #[error("structural failure: {0}")]
    Structural(#[from] StructuralError),

    #[error("render failure: {0}")]
    Render(RenderError),

    #[error("export cancelled")]
    Cancelled,
}

impl From<RenderError> for ExportFailure {
    fn from(err: RenderError) -> Self {
        match err {
            RenderError::Cancelled => Self::Cancelled,
            other => Self::Render(other),
        }
    }
}

/// A fatal export failure plus the warnings collected before it happened.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{failure}")]
pub struct ExportError {
    pub failure: ExportFailure,
    pub warnings: Vec<Warning>,
}

impl ExportError {
    pub fn new(failure: impl Into<ExportFailure>, warnings: Vec<Warning>) -> Self {
        Self {
            failure: failure.into(),
            warnings,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self.failure {
            ExportFailure::Fetch(_) => ErrorCategory::FetchFailure,
            ExportFailure::Structural(_) => ErrorCategory::StructuralFailure,
            ExportFailure::Render(_) => ErrorCategory::RenderFailure,
            ExportFailure::Cancelled => ErrorCategory::Cancelled,
        }
    }
}
