//! Routing stage (optional variant): the external load-balancer chain in
//! front of the services, with the perimeter-authentication layer on its
//! backends.
//!
//! Chain order is load-bearing: NEGs reference services, backend services
//! reference NEGs, the URL map references backends, the proxy references
//! the map and certificate, and the forwarding rule ties the proxy to the
//! static address.

use async_trait::async_trait;

use gantry_core::resource::PathRule;
use gantry_core::{ConfigError, ResourceDescriptor, ResourceKind, ResourceSpec};

use crate::context::StageContext;
use crate::ensure::ensure;
use crate::error::StageError;
use crate::stages::Stage;

pub struct RoutingStage;

fn neg_name(service: &str) -> String {
    format!("{}-neg", service)
}

fn backend_name(service: &str) -> String {
    format!("{}-backend", service)
}

#[async_trait]
impl Stage for RoutingStage {
    fn name(&self) -> &'static str {
        "routing"
    }

    async fn run(&self, cx: &mut StageContext<'_>) -> Result<(), StageError> {
        let config = cx.config;
        let domain = config
            .domain
            .clone()
            .ok_or(ConfigError::MissingDomain)?;

        // Idempotent overlap with the infrastructure stage: the routing
        // stage can run standalone against a project provisioned before
        // the domain was configured.
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

        for service in [&config.api_service, &config.ui_service] {
            ensure(
                cx,
                &ResourceSpec::Neg {
                    name: neg_name(service),
                    region: config.region.clone(),
                    service: service.clone(),
                },
            )
            .await?;
            ensure(
                cx,
                &ResourceSpec::BackendService {
                    name: backend_name(service),
                    neg: neg_name(service),
                    neg_region: config.region.clone(),
                },
            )
            .await?;

            if cx.dry_run {
                cx.step_warn(format!("would enable IAP on {}", backend_name(service)));
            } else {
                cx.plane.enable_iap(&backend_name(service)).await?;
                cx.step_ok(format!("IAP enabled on {}", backend_name(service)));
            }
        }

        let url_map = format!("{}-url-map", config.ui_service);
        ensure(
            cx,
            &ResourceSpec::UrlMap {
                name: url_map.clone(),
                default_service: backend_name(&config.ui_service),
                path_rules: vec![PathRule {
                    paths: "/api/*".to_string(),
                    service: backend_name(&config.api_service),
                }],
            },
        )
        .await?;

        let proxy = format!("{}-https-proxy", config.ui_service);
        ensure(
            cx,
            &ResourceSpec::HttpsProxy {
                name: proxy.clone(),
                url_map,
                certificate: config.certificate.clone(),
            },
        )
        .await?;

        ensure(
            cx,
            &ResourceSpec::ForwardingRule {
                name: format!("{}-https", config.ui_service),
                target_proxy: proxy,
                address: config.static_ip.clone(),
            },
        )
        .await?;

        // Surface the address the operator must point DNS at. The probe
        // is read-only; a fake or just-created address may not report one.
        let ip_desc = ResourceDescriptor::global(ResourceKind::StaticIp, config.static_ip.clone());
        if let Some(info) = cx.plane.describe(&ip_desc).await? {
            if let Some(address) = info.get("address").and_then(|a| a.as_str()) {
                cx.outputs.load_balancer_ip = Some(address.to_string());
                cx.step_ok(format!("create an A record: {} -> {}", domain, address));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::DeploymentConfig;
    use gantry_gcloud::FakeControlPlane;

    fn config() -> DeploymentConfig {
        DeploymentConfig {
            project_id: "demo".into(),
            domain: Some("agent.example.com".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn builds_the_full_chain() {
        let config = config();
        let plane = FakeControlPlane::new();
        let mut cx = StageContext::new(&config, &plane, false);
        RoutingStage.run(&mut cx).await.unwrap();

        for (kind, name) in [
            (ResourceKind::StaticIp, "agent-lb-ip"),
            (ResourceKind::Certificate, "agent-cert"),
            (ResourceKind::BackendService, "agent-api-backend"),
            (ResourceKind::BackendService, "agent-ui-backend"),
            (ResourceKind::UrlMap, "agent-ui-url-map"),
            (ResourceKind::HttpsProxy, "agent-ui-https-proxy"),
            (ResourceKind::ForwardingRule, "agent-ui-https"),
        ] {
            assert!(
                plane.has_resource(&ResourceDescriptor::global(kind, name)),
                "missing {kind}/{name}"
            );
        }
        assert!(plane.iap_enabled("agent-api-backend"));
        assert!(plane.iap_enabled("agent-ui-backend"));
    }

    #[tokio::test]
    async fn requires_a_domain() {
        let config = DeploymentConfig {
            domain: None,
            ..config()
        };
        let plane = FakeControlPlane::new();
        let mut cx = StageContext::new(&config, &plane, false);
        let err = RoutingStage.run(&mut cx).await.unwrap_err();
        assert!(matches!(
            err,
            StageError::Config(ConfigError::MissingDomain)
        ));
    }

    #[tokio::test]
    async fn rerun_is_idempotent() {
        let config = config();
        let plane = FakeControlPlane::new();

        let mut cx = StageContext::new(&config, &plane, false);
        RoutingStage.run(&mut cx).await.unwrap();
        let mut cx = StageContext::new(&config, &plane, false);
        RoutingStage.run(&mut cx).await.unwrap();
    }
}
