//! Error types for stage execution.

use gantry_core::ConfigError;
use gantry_gcloud::ControlPlaneError;
use thiserror::Error;

/// A hard failure inside a stage. Stages never continue past one of
/// these; the orchestrator halts the sequence and leaves earlier stages'
/// resources in place.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("probe of {resource} failed: {source}")]
    Probe {
        resource: String,
        source: ControlPlaneError,
    },

    #[error("creating {resource} failed: {source}")]
    Create {
        resource: String,
        source: ControlPlaneError,
    },

    #[error("deploying service '{service}' failed: {source}")]
    Deploy {
        service: String,
        source: ControlPlaneError,
    },

    #[error("control-plane call failed: {0}")]
    ControlPlane(#[from] ControlPlaneError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
