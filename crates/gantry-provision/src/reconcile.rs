//! Invoker-ACL reconciliation: current bindings → declared access policy.

use gantry_core::{Principal, RUN_INVOKER_ROLE};

use crate::context::StageContext;
use crate::error::StageError;

/// What one reconciliation pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub added: usize,
    pub removed: usize,
}

/// Bring a service's invoker ACL to the configured access policy.
///
/// The desired member set is derived (and the policy value validated)
/// before any binding is touched, so an invalid policy can never leave
/// the ACL half-rewritten. Broad members (`allUsers`,
/// `allAuthenticatedUsers`) are removed only when the policy does not ask
/// for them; `all-authenticated` is an ordinary desired member, not a
/// special case. Removing a binding that disappeared between the
/// enumeration and the removal is a no-op.
pub async fn reconcile(
    cx: &StageContext<'_>,
    service: &str,
) -> Result<ReconcileSummary, StageError> {
    let desired = cx.config.access.members()?;

    let bindings = match cx.plane.invoker_bindings(service, &cx.config.region).await {
        Ok(bindings) => bindings,
        // In dry-run the application stage deployed nothing, so the
        // service may legitimately not exist yet.
        Err(e) if e.is_not_found() && cx.dry_run => {
            cx.step_warn(format!(
                "{} not deployed yet, would reconcile its bindings after deploy",
                service
            ));
            return Ok(ReconcileSummary::default());
        }
        Err(e) => return Err(e.into()),
    };
    let current: Vec<Principal> = bindings
        .into_iter()
        .filter(|b| b.role == RUN_INVOKER_ROLE)
        .map(|b| b.principal)
        .collect();

    let removals: Vec<&Principal> = current
        .iter()
        .filter(|p| p.is_broad() && !desired.contains(p))
        .collect();
    let additions: Vec<&Principal> = desired
        .iter()
        .filter(|p| !current.contains(p))
        .collect();

    if cx.dry_run {
        for p in &removals {
            cx.step_warn(format!("would remove {} from {}", p, service));
        }
        for p in &additions {
            cx.step_warn(format!("would bind {} on {}", p, service));
        }
        return Ok(ReconcileSummary::default());
    }

    let mut summary = ReconcileSummary::default();

    for principal in removals {
        match cx
            .plane
            .remove_invoker_binding(service, &cx.config.region, principal)
            .await
        {
            Ok(()) => {
                cx.step_ok(format!("removed {} from {}", principal, service));
                summary.removed += 1;
            }
            Err(e) if e.is_not_found() => {
                tracing::debug!(service, member = %principal, "binding already gone");
            }
            Err(e) => return Err(e.into()),
        }
    }

    for principal in additions {
        cx.plane
            .add_invoker_binding(service, &cx.config.region, principal)
            .await?;
        cx.step_ok(format!("bound {} on {}", principal, service));
        summary.added += 1;
    }

    if summary.added == 0 && summary.removed == 0 {
        cx.step_ok(format!("{} access bindings already match policy", service));
    }

    Ok(summary)
}
