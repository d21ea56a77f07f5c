//! Hardening stage: replace the deploy-time open ACLs with the
//! configured access policy on both services.

use async_trait::async_trait;

use crate::context::StageContext;
use crate::error::StageError;
use crate::reconcile::reconcile;
use crate::stages::Stage;

pub struct HardeningStage;

#[async_trait]
impl Stage for HardeningStage {
    fn name(&self) -> &'static str {
        "hardening"
    }

    async fn run(&self, cx: &mut StageContext<'_>) -> Result<(), StageError> {
        let services = [cx.config.api_service.clone(), cx.config.ui_service.clone()];
        for service in services {
            let summary = reconcile(cx, &service).await?;
            tracing::info!(
                service,
                added = summary.added,
                removed = summary.removed,
                "access policy reconciled"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::{AccessControlKind, AccessPolicy, DeploymentConfig, Principal};
    use gantry_gcloud::FakeControlPlane;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn hardens_both_services() {
        let config = DeploymentConfig {
            project_id: "demo".into(),
            access: AccessPolicy::new(AccessControlKind::Group, "ops@example.com"),
            ..Default::default()
        };
        let plane = FakeControlPlane::new();
        for service in ["agent-api", "agent-ui"] {
            plane.seed_service(
                service,
                "us-central1",
                BTreeMap::new(),
                vec![gantry_core::PolicyBinding::invoker(Principal::AllUsers)],
            );
        }

        let mut cx = StageContext::new(&config, &plane, false);
        HardeningStage.run(&mut cx).await.unwrap();

        for service in ["agent-api", "agent-ui"] {
            let members: Vec<_> = plane
                .bindings_of(service)
                .into_iter()
                .map(|b| b.principal)
                .collect();
            assert_eq!(members, vec![Principal::Group("ops@example.com".into())]);
        }
    }
}
