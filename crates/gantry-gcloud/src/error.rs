//! Error types for control-plane calls.

use thiserror::Error;

/// Errors surfaced by a [`crate::ControlPlane`] implementation.
///
/// The first two variants are the external tool's exit conventions mapped
/// onto types: `NotFound` is expected absence (a probe of something not
/// yet created), `AlreadyExists` is expected presence (a create that lost
/// a race or a re-run). Everything else is a hard failure.
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    #[error("{0} was not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("failed to invoke control-plane command: {0}")]
    Invocation(#[from] std::io::Error),

    #[error("`{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("unexpected control-plane response: {0}")]
    Malformed(String),
}

impl ControlPlaneError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ControlPlaneError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, ControlPlaneError::AlreadyExists(_))
    }
}

/// Map a failed command's stderr onto the error taxonomy.
///
/// gcloud is not consistent about how it reports missing or duplicate
/// resources (HTTP status words, gRPC status names, prose), so this
/// matches the signatures observed across the surfaces the orchestrator
/// touches.
pub(crate) fn classify_failure(subject: &str, command: String, stderr: String) -> ControlPlaneError {
    let lowered = stderr.to_lowercase();
    if stderr.contains("NOT_FOUND")
        || stderr.contains("notFound")
        || lowered.contains("was not found")
        || lowered.contains("does not exist")
        || lowered.contains("could not be found")
        || stderr.contains("HTTPError 404")
    {
        return ControlPlaneError::NotFound(subject.to_string());
    }
    if stderr.contains("ALREADY_EXISTS")
        || stderr.contains("alreadyExists")
        || lowered.contains("already exists")
        || lowered.contains("duplicate")
        || stderr.contains("HTTPError 409")
    {
        return ControlPlaneError::AlreadyExists(subject.to_string());
    }
    ControlPlaneError::CommandFailed { command, stderr }
}
