//! Teardown: delete everything the mutation stages create, in reverse
//! dependency order.
//!
//! Unlike the stages, teardown continues past individual failures:
//! half-torn-down projects are exactly where it gets re-run, so an absent
//! resource is a tolerated no-op and a hard failure on one resource must
//! not strand the rest. The Firestore database holds user data the
//! orchestrator never owns and is left in place.

use gantry_core::{ResourceDescriptor, ResourceKind};

use crate::context::StageContext;
use crate::error::StageError;

/// Summary of one teardown pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TeardownSummary {
    pub deleted: usize,
    pub absent: usize,
    pub failed: usize,
}

/// Reverse-order descriptor list for everything the stages create.
fn teardown_targets(config: &gantry_core::DeploymentConfig) -> Vec<ResourceDescriptor> {
    let region = &config.region;
    let mut targets = Vec::new();

    // Routing chain first: it references the services below it.
    targets.push(ResourceDescriptor::global(
        ResourceKind::ForwardingRule,
        format!("{}-https", config.ui_service),
    ));
    targets.push(ResourceDescriptor::global(
        ResourceKind::HttpsProxy,
        format!("{}-https-proxy", config.ui_service),
    ));
    targets.push(ResourceDescriptor::global(
        ResourceKind::UrlMap,
        format!("{}-url-map", config.ui_service),
    ));
    for service in [&config.api_service, &config.ui_service] {
        targets.push(ResourceDescriptor::global(
            ResourceKind::BackendService,
            format!("{}-backend", service),
        ));
        targets.push(ResourceDescriptor::regional(
            ResourceKind::Neg,
            format!("{}-neg", service),
            region.clone(),
        ));
    }

    for service in [&config.ui_service, &config.api_service] {
        targets.push(ResourceDescriptor::regional(
            ResourceKind::Service,
            service.clone(),
            region.clone(),
        ));
    }

    targets.push(ResourceDescriptor::global(
        ResourceKind::Certificate,
        config.certificate.clone(),
    ));
    targets.push(ResourceDescriptor::global(
        ResourceKind::StaticIp,
        config.static_ip.clone(),
    ));
    targets.push(ResourceDescriptor::regional(
        ResourceKind::Connector,
        config.connector.clone(),
        region.clone(),
    ));
    targets.push(ResourceDescriptor::regional(
        ResourceKind::Subnet,
        config.subnet.clone(),
        region.clone(),
    ));
    targets.push(ResourceDescriptor::global(
        ResourceKind::Network,
        config.network.clone(),
    ));

    targets.push(ResourceDescriptor::project(
        ResourceKind::CustomRole,
        config.custom_role.clone(),
    ));
    for service in [&config.api_service, &config.ui_service] {
        targets.push(ResourceDescriptor::project(
            ResourceKind::ServiceAccount,
            config.service_account_id(service),
        ));
    }

    targets
}

pub async fn teardown(cx: &StageContext<'_>) -> Result<TeardownSummary, StageError> {
    let mut summary = TeardownSummary::default();

    for desc in teardown_targets(cx.config) {
        if cx.dry_run {
            cx.step_warn(format!("would delete {}", desc));
            continue;
        }
        match cx.plane.delete(&desc).await {
            Ok(()) => {
                cx.step_ok(format!("deleted {}", desc));
                summary.deleted += 1;
            }
            Err(e) if e.is_not_found() => {
                cx.step_ok(format!("{} already absent", desc));
                summary.absent += 1;
            }
            Err(e) => {
                cx.step_err(format!("failed to delete {}: {}", desc, e));
                summary.failed += 1;
            }
        }
    }

    cx.step_warn("database left in place (holds user data)");
    Ok(summary)
}
