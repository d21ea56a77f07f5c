//! Stage orchestration for Gantry deployments.
//!
//! The deployment is a directed sequence of idempotent stages:
//!
//! ```text
//! infrastructure → iam → applications → [routing] → hardening
//! ```
//!
//! Later stages consume identifiers produced by earlier ones through
//! [`StageContext`]'s outputs. Control flows strictly forward: a stage
//! failure halts the sequence with no rollback, and a re-run detects the
//! already-provisioned resources and skips their creation.

pub mod context;
pub mod ensure;
pub mod error;
pub mod reconcile;
pub mod stages;
pub mod teardown;

pub use context::StageContext;
pub use ensure::{Outcome, ensure};
pub use error::StageError;
pub use reconcile::{ReconcileSummary, reconcile};
pub use stages::{Stage, deployment_stages};
pub use teardown::{TeardownSummary, teardown};

/// Run stages in order, halting on the first failure.
///
/// Failure leaves earlier stages' resources in place; the caller decides
/// between a manual re-run and a teardown.
pub async fn run_sequence(
    cx: &mut StageContext<'_>,
    stages: &[Box<dyn Stage>],
) -> Result<(), StageError> {
    for stage in stages {
        println!("==> {}", stage.name());
        tracing::info!(stage = stage.name(), run_id = %cx.run_id, "stage starting");
        stage.run(cx).await?;
        tracing::info!(stage = stage.name(), "stage complete");
    }
    Ok(())
}
