//! Idempotent resource provisioning: probe, then create or short-circuit.

use gantry_core::ResourceSpec;

use crate::context::StageContext;
use crate::error::StageError;

/// What `ensure` did for one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created,
    AlreadyExists,
    /// Dry-run only: the resource is absent and a real run would create it.
    WouldCreate,
}

/// Make sure the resource described by `spec` exists.
///
/// An absent probe triggers creation; a present probe short-circuits.
/// Only a not-found probe counts as absence; any other probe failure
/// aborts the stage. Creation losing a check-then-create race is
/// tolerated and reported as `AlreadyExists`.
pub async fn ensure(cx: &StageContext<'_>, spec: &ResourceSpec) -> Result<Outcome, StageError> {
    let desc = spec.descriptor();

    let existing = cx
        .plane
        .describe(&desc)
        .await
        .map_err(|source| StageError::Probe {
            resource: desc.to_string(),
            source,
        })?;

    if existing.is_some() {
        tracing::debug!(resource = %desc, "already exists");
        cx.step_ok(format!("{} already exists", desc));
        return Ok(Outcome::AlreadyExists);
    }

    if cx.dry_run {
        cx.step_warn(format!("would create {}", desc));
        return Ok(Outcome::WouldCreate);
    }

    match cx.plane.create(spec).await {
        Ok(()) => {
            tracing::info!(resource = %desc, "created");
            cx.step_ok(format!("created {}", desc));
            Ok(Outcome::Created)
        }
        Err(e) if e.is_already_exists() => {
            // Lost a check-then-create race, or the probe surface lags the
            // create surface. Either way the resource is there.
            cx.step_ok(format!("{} already exists", desc));
            Ok(Outcome::AlreadyExists)
        }
        Err(source) => Err(StageError::Create {
            resource: desc.to_string(),
            source,
        }),
    }
}
