//! Unified error type for the vidcast pipeline.
//!
//! All crates funnel their failures into [`Error`]. Operation-level failures
//! are wrapped in [`Error::Stage`] so a caller can report which step of a run
//! went wrong, and serving-path failures map to HTTP codes via
//! [`Error::http_status`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The step of an operation in which a failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Parameter validation and argument construction.
    Validate,
    /// Output directory preparation and overwrite checks.
    Prepare,
    /// The engine subprocess itself.
    Engine,
    /// Collecting and verifying the files the engine produced.
    Collect,
    /// Writing the final manifest.
    Publish,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Validate => "validate",
            Stage::Prepare => "prepare",
            Stage::Engine => "engine",
            Stage::Collect => "collect",
            Stage::Publish => "publish",
        };
        f.write_str(s)
    }
}

/// Unified error type covering all failure modes in vidcast.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The request was malformed; retrying with the same input will not help.
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// The engine exited unsuccessfully.
    #[error("Engine failed (exit code {}): {diagnostics}", fmt_exit_code(.exit_code))]
    EngineFailure {
        /// Process exit code, `None` when terminated by a signal.
        exit_code: Option<i32>,
        /// Captured diagnostic output.
        diagnostics: String,
    },

    /// The engine exceeded its wall-clock budget and was killed.
    #[error("Engine timed out after {timeout:?}")]
    EngineTimeout {
        /// The budget that was exceeded.
        timeout: Duration,
    },

    /// The run was cancelled and the engine was killed.
    #[error("Operation cancelled")]
    Cancelled,

    /// Another run is currently writing the same output path.
    #[error("Output busy: {} is being written by another run", .path.display())]
    OutputBusy {
        /// The contended output path.
        path: PathBuf,
    },

    /// The segment files produced by a transcode are not a contiguous set.
    #[error("Corrupt segment set: {0}")]
    CorruptSegmentSet(String),

    /// The requested path escapes the served root.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "file", "tool").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// Outputs already exist and the overwrite policy forbids touching them.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// An external tool could not be located or launched.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// Media probing failed.
    #[error("Probe error: {0}")]
    Probe(String),

    /// An error annotated with the operation stage it occurred in.
    #[error("{stage} stage failed: {source}")]
    Stage {
        /// Where the failure happened.
        stage: Stage,
        /// The underlying error.
        source: Box<Error>,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn fmt_exit_code(code: &Option<i32>) -> String {
    match code {
        Some(c) => c.to_string(),
        None => "none".into(),
    }
}

impl Error {
    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::InvalidParameters(_) => 400,
            Error::Forbidden(_) => 403,
            Error::NotFound { .. } => 404,
            Error::OutputBusy { .. } => 409,
            Error::Conflict(_) => 409,
            Error::Probe(_) => 422,
            Error::EngineFailure { .. } => 502,
            Error::Tool { .. } => 502,
            Error::EngineTimeout { .. } => 504,
            Error::Cancelled => 499,
            Error::CorruptSegmentSet(_) => 500,
            Error::Io { .. } => 500,
            Error::Internal(_) => 500,
            Error::Stage { source, .. } => source.http_status(),
        }
    }

    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidParameters(_) => "invalid_parameters",
            Error::EngineFailure { .. } => "engine_failure",
            Error::EngineTimeout { .. } => "engine_timeout",
            Error::Cancelled => "cancelled",
            Error::OutputBusy { .. } => "output_busy",
            Error::CorruptSegmentSet(_) => "corrupt_segment_set",
            Error::Forbidden(_) => "forbidden",
            Error::NotFound { .. } => "not_found",
            Error::Conflict(_) => "conflict",
            Error::Io { .. } => "io",
            Error::Tool { .. } => "tool",
            Error::Probe(_) => "probe",
            Error::Internal(_) => "internal",
            Error::Stage { source, .. } => source.code(),
        }
    }

    /// The innermost error, with all stage annotations stripped.
    pub fn root(&self) -> &Error {
        match self {
            Error::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// The outermost stage annotation, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Annotate this error with the stage it happened in.
    ///
    /// Already-annotated errors are returned unchanged so the innermost
    /// stage wins.
    pub fn at(self, stage: Stage) -> Self {
        match self {
            e @ Error::Stage { .. } => e,
            other => Error::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Convenience constructor for [`Error::InvalidParameters`].
    pub fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidParameters(message.into())
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::OutputBusy`].
    pub fn busy(path: impl AsRef<Path>) -> Self {
        Error::OutputBusy {
            path: path.as_ref().to_path_buf(),
        }
    }
}

/// Extension for tagging a `Result` with the stage it belongs to.
pub trait StageExt<T> {
    /// Annotate the error, if any, with `stage`.
    fn stage(self, stage: Stage) -> Result<T>;
}

impl<T, E: Into<Error>> StageExt<T> for std::result::Result<T, E> {
    fn stage(self, stage: Stage) -> Result<T> {
        self.map_err(|e| e.into().at(stage))
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
