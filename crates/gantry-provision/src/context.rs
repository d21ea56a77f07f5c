//! Shared state threaded through the stage sequence.

use gantry_core::{DeploymentConfig, StageOutputs};
use gantry_gcloud::ControlPlane;
use uuid::Uuid;

/// Everything a stage gets to see: the immutable configuration, the
/// control plane, the accumulated cross-stage outputs, and the run mode.
pub struct StageContext<'a> {
    pub config: &'a DeploymentConfig,
    pub plane: &'a dyn ControlPlane,
    pub outputs: StageOutputs,
    pub dry_run: bool,
    pub run_id: Uuid,
}

impl<'a> StageContext<'a> {
    pub fn new(config: &'a DeploymentConfig, plane: &'a dyn ControlPlane, dry_run: bool) -> Self {
        Self {
            config,
            plane,
            outputs: StageOutputs::default(),
            dry_run,
            run_id: Uuid::new_v4(),
        }
    }

    /// Per-step status lines. These are the operator-facing output; the
    /// structured diagnostics go through `tracing`.
    pub fn step_ok(&self, message: impl AsRef<str>) {
        println!("  ✔ {}", message.as_ref());
    }

    pub fn step_warn(&self, message: impl AsRef<str>) {
        println!("  ⚠ {}", message.as_ref());
    }

    pub fn step_err(&self, message: impl AsRef<str>) {
        println!("  ✖ {}", message.as_ref());
    }
}
