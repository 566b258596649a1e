//! The error taxonomy shared across every stage of the pipeline.

use serde::Serialize;
use thiserror::Error;

/// The kind of failure a stage encountered, independent of which crate
/// raised it. Workers translate every error they see into one of these
/// before updating the Progress Store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// Network, 5xx, or rate-limit signal. Retried with bounded backoff.
    #[serde(rename = "transient_upstream")]
    TransientUpstream,
    /// Bad credentials or expired token. Retried once after refresh, then fatal for the run.
    #[serde(rename = "auth_failure")]
    AuthFailure,
    /// Malformed input or service response. Not retried for this recording.
    #[serde(rename = "validation")]
    Validation,
    /// The service reported terminal failure on a submitted job. Not retried.
    #[serde(rename = "service_job_failed")]
    ServiceJobFailed,
    /// Exceeded the configured maximum wait. Not retried for this attempt.
    #[serde(rename = "timeout")]
    Timeout,
    /// DB, filesystem, or file-store fault. Retried per step.
    #[serde(rename = "local_io")]
    LocalIO,
    /// The Deletion Auditor could not verify removal. Retried next run.
    #[serde(rename = "deletion_failed")]
    DeletionFailed,
    /// Cooperative shutdown. Not an error condition.
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl ErrorKind {
    /// Whether a worker should retry the current stage after this error.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::TransientUpstream | ErrorKind::LocalIO | ErrorKind::DeletionFailed
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::TransientUpstream => "transient_upstream",
            ErrorKind::AuthFailure => "auth_failure",
            ErrorKind::Validation => "validation",
            ErrorKind::ServiceJobFailed => "service_job_failed",
            ErrorKind::Timeout => "timeout",
            ErrorKind::LocalIO => "local_io",
            ErrorKind::DeletionFailed => "deletion_failed",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A pipeline-wide error carrying its taxonomy kind alongside a message.
/// Crate-local error enums implement `kind()` by matching on their own
/// variants and mostly return this wrapped inside their own `#[error]`.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct PipelineError {
    pub kind: ErrorKind,
    pub message: String,
}

impl PipelineError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}
