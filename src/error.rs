//! Centralized error handling for brisket.
//!
//! Every fallible library operation returns [`Result`], whose error type is the
//! [`Error`] enum below. The variants follow the failure modes of the pipeline
//! and lifecycle subsystems so callers can match on them instead of parsing
//! strings:
//!
//! ```
//! use brisket::error::Error;
//!
//! fn render(err: &Error) -> String {
//!     match err {
//!         Error::Validation(problems) => format!("{} validation problem(s)", problems.len()),
//!         Error::Execution { step_index, .. } => format!("step {} failed", step_index + 1),
//!         Error::Aborted { .. } => "cancelled".to_owned(),
//!         Error::LockContention { .. } => "busy, retry later".to_owned(),
//!         other => other.to_string(),
//!     }
//! }
//! ```
//!
//! Validation problems are not thrown by the validator itself; they are only
//! wrapped into [`Error::Validation`] when an execution is refused because of
//! them.

use crate::pipeline::executor::ExecutionResult;
use crate::pipeline::gates::GateResult;
use crate::pipeline::validation::ValidationError;
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

/// Main error type for brisket operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed spec, unknown step tag or missing required field
    #[error("Invalid pipeline spec: {0}")]
    Deserialization(String),

    /// Execution refused because the spec does not fit the input schema
    #[error("Pipeline validation failed:\n{}", render_validation(.0))]
    Validation(Vec<ValidationError>),

    /// A step failed at runtime; nothing was written or registered
    #[error("Step {} ({op}) failed: {cause}", .step_index + 1)]
    Execution {
        step_index: usize,
        op: &'static str,
        cause: String,
        report: Box<ExecutionResult>,
    },

    /// Cooperative cancellation observed between steps
    #[error("Pipeline aborted after {steps_applied} step(s)")]
    Aborted { steps_applied: usize },

    /// Data did not pass the quality gates required for the Validated stage
    #[error("Quality gates failed:\n{}", render_gates(.0))]
    QualityGate(Vec<GateResult>),

    /// Missing parent, second root or any other break of the version tree
    #[error("Lineage error in dataset {dataset_id}: {message}")]
    Lineage { dataset_id: Uuid, message: String },

    /// Another execution holds the dataset lock
    #[error("Another pipeline execution is already running for dataset {dataset_id}")]
    LockContention { dataset_id: Uuid },

    #[error("Dataset not found: {0}")]
    DatasetNotFound(Uuid),

    #[error("Version {version_id} not found in dataset {dataset_id}")]
    VersionNotFound { dataset_id: Uuid, version_id: Uuid },

    /// Target stage not reachable from the parent version
    #[error("Invalid stage transition: {0}")]
    Stage(String),

    /// Spec library or template lookup failure
    #[error("Library error: {0}")]
    Library(String),

    #[error("Data processing error: {0}")]
    Data(#[from] polars::error::PolarsError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{context}: {source}")]
    IoContext {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Deserialization(_) => "DESERIALIZATION_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Execution { .. } => "EXECUTION_ERROR",
            Self::Aborted { .. } => "ABORTED",
            Self::QualityGate(_) => "QUALITY_GATE_FAILED",
            Self::Lineage { .. } => "LINEAGE_ERROR",
            Self::LockContention { .. } => "LOCK_CONTENTION",
            Self::DatasetNotFound(_) => "DATASET_NOT_FOUND",
            Self::VersionNotFound { .. } => "VERSION_NOT_FOUND",
            Self::Stage(_) => "STAGE_ERROR",
            Self::Library(_) => "LIBRARY_ERROR",
            Self::Data(_) => "DATA_ERROR",
            Self::Io(_) | Self::IoContext { .. } => "IO_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Whether the caller should retry or queue the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockContention { .. })
    }

    pub(crate) fn lineage(dataset_id: Uuid, message: impl Into<String>) -> Self {
        Self::Lineage {
            dataset_id,
            message: message.into(),
        }
    }

    pub(crate) fn io_at(action: &str, path: &Path, source: std::io::Error) -> Self {
        Self::IoContext {
            context: format!("Failed to {action} {}", path.display()),
            source,
        }
    }
}

fn render_validation(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_gates(results: &[GateResult]) -> String {
    results
        .iter()
        .filter(|r| !r.passed)
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Result type alias for brisket operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait to attach context to I/O results.
pub trait IoResultExt<T> {
    /// Add context to an error.
    fn context(self, msg: impl Into<String>) -> Result<T>;

    /// Add context using a closure (lazy evaluation).
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> IoResultExt<T> for std::result::Result<T, std::io::Error> {
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|source| Error::IoContext {
            context: msg.into(),
            source,
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|source| Error::IoContext {
            context: f(),
            source,
        })
    }
}
