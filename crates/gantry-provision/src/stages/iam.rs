//! IAM stage: the custom least-privilege role plus the grants the
//! runtime identities need.

use async_trait::async_trait;

use gantry_core::{Principal, ResourceSpec};

use crate::context::StageContext;
use crate::ensure::ensure;
use crate::error::StageError;
use crate::stages::Stage;

/// Permissions the API service needs to answer questions against the
/// project's data: run BigQuery jobs, read table data, talk to the
/// hosted reasoning engine, and keep conversation state in Firestore.
const CUSTOM_ROLE_PERMISSIONS: &[&str] = &[
    "bigquery.jobs.create",
    "bigquery.datasets.get",
    "bigquery.tables.get",
    "bigquery.tables.list",
    "bigquery.tables.getData",
    "datastore.databases.get",
    "datastore.entities.create",
    "datastore.entities.get",
    "datastore.entities.list",
    "datastore.entities.update",
    "aiplatform.endpoints.predict",
];

pub struct IamStage;

#[async_trait]
impl Stage for IamStage {
    fn name(&self) -> &'static str {
        "iam"
    }

    async fn run(&self, cx: &mut StageContext<'_>) -> Result<(), StageError> {
        let config = cx.config;

        ensure(
            cx,
            &ResourceSpec::CustomRole {
                id: config.custom_role.clone(),
                title: "Agent application access".to_string(),
                description: "Least-privilege data access for the deployed agent API".to_string(),
                permissions: CUSTOM_ROLE_PERMISSIONS
                    .iter()
                    .map(|p| p.to_string())
                    .collect(),
            },
        )
        .await?;

        let api_sa = Principal::ServiceAccount(
            config.service_account_email(&config.service_account_id(&config.api_service)),
        );
        let ui_sa = Principal::ServiceAccount(
            config.service_account_email(&config.service_account_id(&config.ui_service)),
        );

        if cx.dry_run {
            cx.step_warn(format!(
                "would grant {} and auxiliary roles to {}",
                config.custom_role_name(),
                api_sa
            ));
            return Ok(());
        }

        // Project-level grants. Re-granting an existing binding is a
        // no-op on the control plane, so this needs no probe.
        cx.plane
            .grant_project_role(&api_sa, &config.custom_role_name())
            .await?;
        cx.step_ok(format!("granted {} to {}", config.custom_role_name(), api_sa));

        cx.plane
            .grant_project_role(&api_sa, "roles/aiplatform.user")
            .await?;
        cx.step_ok(format!("granted roles/aiplatform.user to {}", api_sa));

        for sa in [&api_sa, &ui_sa] {
            cx.plane
                .grant_project_role(sa, "roles/logging.logWriter")
                .await?;
            cx.step_ok(format!("granted roles/logging.logWriter to {}", sa));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::{DeploymentConfig, ResourceDescriptor, ResourceKind};
    use gantry_gcloud::FakeControlPlane;

    fn config() -> DeploymentConfig {
        DeploymentConfig {
            project_id: "demo".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn creates_role_and_grants() {
        let config = config();
        let plane = FakeControlPlane::new();
        let mut cx = StageContext::new(&config, &plane, false);
        IamStage.run(&mut cx).await.unwrap();

        assert!(plane.has_resource(&ResourceDescriptor::project(
            ResourceKind::CustomRole,
            "agentAppAccess"
        )));

        let roles = plane.project_roles();
        let api_member = "serviceAccount:agent-api-sa@demo.iam.gserviceaccount.com".to_string();
        assert!(roles.contains(&(api_member.clone(), "projects/demo/roles/agentAppAccess".into())));
        assert!(roles.contains(&(api_member.clone(), "roles/aiplatform.user".into())));
        assert!(roles.contains(&(api_member, "roles/logging.logWriter".into())));
        assert!(roles.contains(&(
            "serviceAccount:agent-ui-sa@demo.iam.gserviceaccount.com".into(),
            "roles/logging.logWriter".into()
        )));
    }

    #[tokio::test]
    async fn rerun_is_stable() {
        let config = config();
        let plane = FakeControlPlane::new();

        let mut cx = StageContext::new(&config, &plane, false);
        IamStage.run(&mut cx).await.unwrap();
        let roles_after_first = plane.project_roles();

        let mut cx = StageContext::new(&config, &plane, false);
        IamStage.run(&mut cx).await.unwrap();
        assert_eq!(plane.project_roles(), roles_after_first);
    }
}
