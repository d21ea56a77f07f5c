//! Infrastructure stage: APIs, network plumbing, identities, database,
//! and the load-balancer prerequisites that need a domain.

use async_trait::async_trait;

use gantry_core::{REQUIRED_APIS, ResourceKind, ResourceSpec};

use crate::context::StageContext;
use crate::ensure::ensure;
use crate::error::StageError;
use crate::stages::Stage;

pub struct InfrastructureStage;

#[async_trait]
impl Stage for InfrastructureStage {
    fn name(&self) -> &'static str {
        "infrastructure"
    }

    async fn run(&self, cx: &mut StageContext<'_>) -> Result<(), StageError> {
        enable_required_apis(cx).await?;

        let config = cx.config;

        ensure(
            cx,
            &ResourceSpec::Network {
                name: config.network.clone(),
            },
        )
        .await?;

        ensure(
            cx,
            &ResourceSpec::Subnet {
                name: config.subnet.clone(),
                network: config.network.clone(),
                range: config.subnet_range.clone(),
                region: config.region.clone(),
            },
        )
        .await?;

        ensure(
            cx,
            &ResourceSpec::Connector {
                name: config.connector.clone(),
                network: config.network.clone(),
                range: config.connector_range.clone(),
                region: config.region.clone(),
            },
        )
        .await?;

        for service in [&config.api_service, &config.ui_service] {
            ensure(
                cx,
                &ResourceSpec::ServiceAccount {
                    id: config.service_account_id(service),
                    display_name: format!("Runtime identity for {}", service),
                },
            )
            .await?;
        }

        ensure(
            cx,
            &ResourceSpec::Database {
                name: config.database.clone(),
                location: config.region.clone(),
            },
        )
        .await?;

        // The static address and managed certificate only matter for the
        // load-balancer variant, and the certificate cannot exist without
        // a domain to be issued for.
        match &config.domain {
            Some(domain) => {
                ensure(
                    cx,
                    &ResourceSpec::StaticIp {
                        name: config.static_ip.clone(),
                    },
                )
                .await?;
                ensure(
                    cx,
                    &ResourceSpec::Certificate {
                        name: config.certificate.clone(),
                        domain: domain.clone(),
                    },
                )
                .await?;
            }
            None => {
                cx.step_warn("DOMAIN not set, skipping static address and certificate");
            }
        }

        Ok(())
    }
}

/// Enable every required API that the project does not already have.
/// Probing once and diffing keeps re-runs down to a single list call.
async fn enable_required_apis(cx: &StageContext<'_>) -> Result<(), StageError> {
    let enabled = cx.plane.enabled_apis().await?;
    for api in REQUIRED_APIS {
        if enabled.iter().any(|e| e == api) {
            cx.step_ok(format!("{}/{} already enabled", ResourceKind::Api, api));
            continue;
        }
        if cx.dry_run {
            cx.step_warn(format!("would enable {}", api));
            continue;
        }
        cx.plane.enable_api(api).await?;
        cx.step_ok(format!("enabled {}", api));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::{DeploymentConfig, ResourceDescriptor};
    use gantry_gcloud::{ControlPlane, FakeControlPlane};

    fn config() -> DeploymentConfig {
        DeploymentConfig {
            project_id: "demo".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn provisions_everything_and_is_idempotent() {
        let config = config();
        let plane = FakeControlPlane::new();

        let mut cx = StageContext::new(&config, &plane, false);
        InfrastructureStage.run(&mut cx).await.unwrap();

        for api in REQUIRED_APIS {
            assert!(plane.enabled_apis().await.unwrap().contains(&api.to_string()));
        }
        assert!(plane.has_resource(&ResourceDescriptor::global(
            ResourceKind::Network,
            "agent-vpc"
        )));
        assert!(plane.has_resource(&ResourceDescriptor::regional(
            ResourceKind::Connector,
            "agent-connector",
            "us-central1"
        )));
        assert!(plane.has_resource(&ResourceDescriptor::project(
            ResourceKind::ServiceAccount,
            "agent-api-sa"
        )));
        assert!(plane.has_resource(&ResourceDescriptor::project(
            ResourceKind::Database,
            "(default)"
        )));

        // Second run: everything short-circuits, nothing errors.
        let mut cx = StageContext::new(&config, &plane, false);
        InfrastructureStage.run(&mut cx).await.unwrap();
    }

    #[tokio::test]
    async fn without_domain_skips_lb_prerequisites() {
        let config = config();
        let plane = FakeControlPlane::new();
        let mut cx = StageContext::new(&config, &plane, false);
        InfrastructureStage.run(&mut cx).await.unwrap();

        assert!(!plane.has_resource(&ResourceDescriptor::global(
            ResourceKind::StaticIp,
            "agent-lb-ip"
        )));
        assert!(!plane.has_resource(&ResourceDescriptor::global(
            ResourceKind::Certificate,
            "agent-cert"
        )));
    }

    #[tokio::test]
    async fn with_domain_creates_ip_and_certificate() {
        let config = DeploymentConfig {
            domain: Some("agent.example.com".into()),
            ..config()
        };
        let plane = FakeControlPlane::new();
        let mut cx = StageContext::new(&config, &plane, false);
        InfrastructureStage.run(&mut cx).await.unwrap();

        assert!(plane.has_resource(&ResourceDescriptor::global(
            ResourceKind::StaticIp,
            "agent-lb-ip"
        )));
        assert!(plane.has_resource(&ResourceDescriptor::global(
            ResourceKind::Certificate,
            "agent-cert"
        )));
    }

    #[tokio::test]
    async fn dry_run_mutates_nothing() {
        let config = config();
        let plane = FakeControlPlane::new();
        let mut cx = StageContext::new(&config, &plane, true);
        InfrastructureStage.run(&mut cx).await.unwrap();
        assert_eq!(plane.mutation_count(), 0);
    }
}
