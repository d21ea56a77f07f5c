//! `gcloud` CLI implementation of the control-plane seam.
//!
//! Each trait method is a thin translation to an argv; stdout is decoded
//! as JSON where the caller needs structure (`--format=json`), and stderr
//! of a failed invocation is classified into the error taxonomy.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::process::Command;

use gantry_core::{
    DeployedService, PolicyBinding, Principal, ResourceDescriptor, ResourceKind, ResourceSpec,
    RUN_INVOKER_ROLE, ServiceSpec,
};

use crate::ControlPlane;
use crate::error::{ControlPlaneError, classify_failure};

/// Control plane backed by the `gcloud` CLI.
pub struct GcloudControlPlane {
    project: String,
    binary: String,
}

impl GcloudControlPlane {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            binary: "gcloud".to_string(),
        }
    }

    /// Override the executable path (used to point at a wrapper script).
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Run one gcloud invocation to completion, returning stdout.
    ///
    /// `--project` and `--quiet` are appended to every call: the
    /// orchestrator never relies on gcloud's ambient configuration and
    /// never answers its interactive prompts.
    async fn run(&self, subject: &str, args: &[String]) -> Result<String, ControlPlaneError> {
        let mut full: Vec<String> = args.to_vec();
        full.push("--project".to_string());
        full.push(self.project.clone());
        full.push("--quiet".to_string());

        let rendered = format!("{} {}", self.binary, full.join(" "));
        tracing::debug!(command = %rendered, "invoking control plane");

        let output = Command::new(&self.binary).args(&full).output().await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            Err(classify_failure(subject, rendered, stderr))
        }
    }

    async fn run_json(
        &self,
        subject: &str,
        args: &[String],
    ) -> Result<serde_json::Value, ControlPlaneError> {
        let mut full = args.to_vec();
        full.push("--format=json".to_string());
        let stdout = self.run(subject, &full).await?;
        serde_json::from_str(&stdout).map_err(|e| {
            ControlPlaneError::Malformed(format!("{subject}: non-JSON response: {e}"))
        })
    }

    fn service_account_email(&self, id: &str) -> String {
        format!("{}@{}.iam.gserviceaccount.com", id, self.project)
    }

    /// argv for an existence probe of `desc`.
    fn describe_args(&self, desc: &ResourceDescriptor) -> Vec<String> {
        let name = desc.name.clone();
        let region = match &desc.scope {
            gantry_core::Scope::Region(r) => Some(r.clone()),
            _ => None,
        };
        match desc.kind {
            ResourceKind::Api => argv(&["services", "list", "--enabled"]),
            ResourceKind::Network => argv(&["compute", "networks", "describe", &name]),
            ResourceKind::Subnet => {
                let mut a = argv(&["compute", "networks", "subnets", "describe", &name]);
                push_region(&mut a, region);
                a
            }
            ResourceKind::Connector => {
                let mut a = argv(&[
                    "compute",
                    "networks",
                    "vpc-access",
                    "connectors",
                    "describe",
                    &name,
                ]);
                push_region(&mut a, region);
                a
            }
            ResourceKind::ServiceAccount => argv(&[
                "iam",
                "service-accounts",
                "describe",
                &self.service_account_email(&name),
            ]),
            ResourceKind::StaticIp => {
                argv(&["compute", "addresses", "describe", &name, "--global"])
            }
            ResourceKind::Certificate => {
                argv(&["compute", "ssl-certificates", "describe", &name, "--global"])
            }
            ResourceKind::CustomRole => argv(&["iam", "roles", "describe", &name]),
            ResourceKind::Database => {
                argv(&["firestore", "databases", "describe", "--database", &name])
            }
            ResourceKind::Service => {
                let mut a = argv(&["run", "services", "describe", &name, "--platform", "managed"]);
                push_region(&mut a, region);
                a
            }
            ResourceKind::Neg => {
                let mut a = argv(&["compute", "network-endpoint-groups", "describe", &name]);
                push_region(&mut a, region);
                a
            }
            ResourceKind::BackendService => {
                argv(&["compute", "backend-services", "describe", &name, "--global"])
            }
            ResourceKind::UrlMap => argv(&["compute", "url-maps", "describe", &name]),
            ResourceKind::HttpsProxy => {
                argv(&["compute", "target-https-proxies", "describe", &name])
            }
            ResourceKind::ForwardingRule => {
                argv(&["compute", "forwarding-rules", "describe", &name, "--global"])
            }
        }
    }

    fn delete_args(&self, desc: &ResourceDescriptor) -> Vec<String> {
        let mut args = self.describe_args(desc);
        // Every describe argv above has the verb in the same position:
        // after the resource noun path. Swapping it keeps the two tables
        // from drifting apart.
        for a in args.iter_mut() {
            if a == "describe" {
                *a = "delete".to_string();
                break;
            }
        }
        args
    }
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn push_region(args: &mut Vec<String>, region: Option<String>) {
    if let Some(r) = region {
        args.push("--region".to_string());
        args.push(r);
    }
}

fn env_flag_value(env: &BTreeMap<String, String>) -> String {
    env.iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl ControlPlane for GcloudControlPlane {
    async fn describe(
        &self,
        desc: &ResourceDescriptor,
    ) -> Result<Option<serde_json::Value>, ControlPlaneError> {
        let subject = desc.to_string();

        // Enabled APIs have no describe verb; probe via the enabled list.
        if desc.kind == ResourceKind::Api {
            let enabled = self.enabled_apis().await?;
            return Ok(enabled
                .iter()
                .any(|s| s == &desc.name)
                .then(|| serde_json::json!({ "name": desc.name })));
        }

        match self.run_json(&subject, &self.describe_args(desc)).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create(&self, spec: &ResourceSpec) -> Result<(), ControlPlaneError> {
        let subject = spec.descriptor().to_string();
        match spec {
            ResourceSpec::Network { name } => {
                self.run(
                    &subject,
                    &argv(&["compute", "networks", "create", name, "--subnet-mode", "custom"]),
                )
                .await?;
            }
            ResourceSpec::Subnet {
                name,
                network,
                range,
                region,
            } => {
                self.run(
                    &subject,
                    &argv(&[
                        "compute", "networks", "subnets", "create", name, "--network", network,
                        "--range", range, "--region", region,
                    ]),
                )
                .await?;
            }
            ResourceSpec::Connector {
                name,
                network,
                range,
                region,
            } => {
                self.run(
                    &subject,
                    &argv(&[
                        "compute",
                        "networks",
                        "vpc-access",
                        "connectors",
                        "create",
                        name,
                        "--network",
                        network,
                        "--range",
                        range,
                        "--region",
                        region,
                    ]),
                )
                .await?;
            }
            ResourceSpec::ServiceAccount { id, display_name } => {
                self.run(
                    &subject,
                    &argv(&[
                        "iam",
                        "service-accounts",
                        "create",
                        id,
                        "--display-name",
                        display_name,
                    ]),
                )
                .await?;
            }
            ResourceSpec::StaticIp { name } => {
                self.run(
                    &subject,
                    &argv(&[
                        "compute",
                        "addresses",
                        "create",
                        name,
                        "--global",
                        "--ip-version",
                        "IPV4",
                    ]),
                )
                .await?;
            }
            ResourceSpec::Certificate { name, domain } => {
                self.run(
                    &subject,
                    &argv(&[
                        "compute",
                        "ssl-certificates",
                        "create",
                        name,
                        "--domains",
                        domain,
                        "--global",
                    ]),
                )
                .await?;
            }
            ResourceSpec::CustomRole {
                id,
                title,
                description,
                permissions,
            } => {
                let perms = permissions.join(",");
                self.run(
                    &subject,
                    &argv(&[
                        "iam",
                        "roles",
                        "create",
                        id,
                        "--title",
                        title,
                        "--description",
                        description,
                        "--permissions",
                        &perms,
                        "--stage",
                        "GA",
                    ]),
                )
                .await?;
            }
            ResourceSpec::Database { name, location } => {
                self.run(
                    &subject,
                    &argv(&[
                        "firestore",
                        "databases",
                        "create",
                        "--database",
                        name,
                        "--location",
                        location,
                        "--type",
                        "firestore-native",
                    ]),
                )
                .await?;
            }
            ResourceSpec::Neg {
                name,
                region,
                service,
            } => {
                self.run(
                    &subject,
                    &argv(&[
                        "compute",
                        "network-endpoint-groups",
                        "create",
                        name,
                        "--region",
                        region,
                        "--network-endpoint-type",
                        "serverless",
                        "--cloud-run-service",
                        service,
                    ]),
                )
                .await?;
            }
            ResourceSpec::BackendService {
                name,
                neg,
                neg_region,
            } => {
                self.run(
                    &subject,
                    &argv(&[
                        "compute",
                        "backend-services",
                        "create",
                        name,
                        "--global",
                        "--load-balancing-scheme",
                        "EXTERNAL_MANAGED",
                    ]),
                )
                .await?;
                self.run(
                    &subject,
                    &argv(&[
                        "compute",
                        "backend-services",
                        "add-backend",
                        name,
                        "--global",
                        "--network-endpoint-group",
                        neg,
                        "--network-endpoint-group-region",
                        neg_region,
                    ]),
                )
                .await?;
            }
            ResourceSpec::UrlMap {
                name,
                default_service,
                path_rules,
            } => {
                self.run(
                    &subject,
                    &argv(&[
                        "compute",
                        "url-maps",
                        "create",
                        name,
                        "--default-service",
                        default_service,
                    ]),
                )
                .await?;
                for (i, rule) in path_rules.iter().enumerate() {
                    let matcher = format!("pm-{}", i);
                    let rules = format!("{}={}", rule.paths, rule.service);
                    self.run(
                        &subject,
                        &argv(&[
                            "compute",
                            "url-maps",
                            "add-path-matcher",
                            name,
                            "--path-matcher-name",
                            &matcher,
                            "--default-service",
                            default_service,
                            "--path-rules",
                            &rules,
                        ]),
                    )
                    .await?;
                }
            }
            ResourceSpec::HttpsProxy {
                name,
                url_map,
                certificate,
            } => {
                self.run(
                    &subject,
                    &argv(&[
                        "compute",
                        "target-https-proxies",
                        "create",
                        name,
                        "--url-map",
                        url_map,
                        "--ssl-certificates",
                        certificate,
                    ]),
                )
                .await?;
            }
            ResourceSpec::ForwardingRule {
                name,
                target_proxy,
                address,
            } => {
                self.run(
                    &subject,
                    &argv(&[
                        "compute",
                        "forwarding-rules",
                        "create",
                        name,
                        "--global",
                        "--target-https-proxy",
                        target_proxy,
                        "--address",
                        address,
                        "--ports",
                        "443",
                    ]),
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn delete(&self, desc: &ResourceDescriptor) -> Result<(), ControlPlaneError> {
        let subject = desc.to_string();
        if desc.kind == ResourceKind::Api {
            // APIs are disabled, not deleted; teardown leaves them alone.
            return Ok(());
        }
        self.run(&subject, &self.delete_args(desc)).await?;
        Ok(())
    }

    async fn enabled_apis(&self) -> Result<Vec<String>, ControlPlaneError> {
        let value = self
            .run_json("enabled APIs", &argv(&["services", "list", "--enabled"]))
            .await?;
        let entries = value
            .as_array()
            .ok_or_else(|| ControlPlaneError::Malformed("services list: expected array".into()))?;
        let mut apis = Vec::new();
        for entry in entries {
            // Newer gcloud reports config.name; fall back to the trailing
            // segment of the resource name.
            let api = entry
                .get("config")
                .and_then(|c| c.get("name"))
                .and_then(|n| n.as_str())
                .map(str::to_string)
                .or_else(|| {
                    entry
                        .get("name")
                        .and_then(|n| n.as_str())
                        .and_then(|n| n.rsplit('/').next())
                        .map(str::to_string)
                });
            if let Some(api) = api {
                apis.push(api);
            }
        }
        Ok(apis)
    }

    async fn enable_api(&self, service: &str) -> Result<(), ControlPlaneError> {
        self.run(
            &format!("api/{}", service),
            &argv(&["services", "enable", service]),
        )
        .await?;
        Ok(())
    }

    async fn deploy_service(
        &self,
        spec: &ServiceSpec,
    ) -> Result<DeployedService, ControlPlaneError> {
        let subject = format!("service/{}", spec.name);
        let mut args = argv(&[
            "run", "deploy", &spec.name, "--image", &spec.image, "--region", &spec.region,
            "--platform", "managed",
        ]);
        if !spec.env.is_empty() {
            args.push("--set-env-vars".to_string());
            args.push(env_flag_value(&spec.env));
        }
        if let Some(sa) = &spec.service_account {
            args.push("--service-account".to_string());
            args.push(sa.clone());
        }
        if let Some(connector) = &spec.vpc_connector {
            args.push("--vpc-connector".to_string());
            args.push(connector.clone());
        }
        args.push(if spec.allow_unauthenticated {
            "--allow-unauthenticated".to_string()
        } else {
            "--no-allow-unauthenticated".to_string()
        });

        self.run(&subject, &args).await?;

        let url = self.service_url(&spec.name, &spec.region).await?;
        Ok(DeployedService {
            name: spec.name.clone(),
            url,
        })
    }

    async fn update_service_env(
        &self,
        service: &str,
        region: &str,
        env: &BTreeMap<String, String>,
    ) -> Result<(), ControlPlaneError> {
        let subject = format!("service/{}", service);
        let mut args = argv(&["run", "services", "update", service, "--region", region]);
        args.push("--update-env-vars".to_string());
        args.push(env_flag_value(env));
        self.run(&subject, &args).await?;
        Ok(())
    }

    async fn service_env(
        &self,
        service: &str,
        region: &str,
    ) -> Result<BTreeMap<String, String>, ControlPlaneError> {
        let subject = format!("service/{}", service);
        let desc = ResourceDescriptor::regional(ResourceKind::Service, service, region);
        let value = self
            .run_json(&subject, &self.describe_args(&desc))
            .await?;

        let mut env = BTreeMap::new();
        let vars = value
            .pointer("/spec/template/spec/containers/0/env")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        for var in vars {
            if let (Some(name), Some(val)) = (
                var.get("name").and_then(|v| v.as_str()),
                var.get("value").and_then(|v| v.as_str()),
            ) {
                env.insert(name.to_string(), val.to_string());
            }
        }
        Ok(env)
    }

    async fn service_url(&self, service: &str, region: &str) -> Result<String, ControlPlaneError> {
        let subject = format!("service/{}", service);
        let desc = ResourceDescriptor::regional(ResourceKind::Service, service, region);
        let value = self.run_json(&subject, &self.describe_args(&desc)).await?;
        value
            .pointer("/status/url")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                ControlPlaneError::Malformed(format!("{subject}: deploy reported no status.url"))
            })
    }

    async fn invoker_bindings(
        &self,
        service: &str,
        region: &str,
    ) -> Result<Vec<PolicyBinding>, ControlPlaneError> {
        let subject = format!("service/{}", service);
        let value = self
            .run_json(
                &subject,
                &argv(&[
                    "run",
                    "services",
                    "get-iam-policy",
                    service,
                    "--region",
                    region,
                ]),
            )
            .await?;

        let mut bindings = Vec::new();
        let entries = value
            .get("bindings")
            .and_then(|b| b.as_array())
            .cloned()
            .unwrap_or_default();
        for entry in entries {
            let role = entry
                .get("role")
                .and_then(|r| r.as_str())
                .unwrap_or_default()
                .to_string();
            let members = entry
                .get("members")
                .and_then(|m| m.as_array())
                .cloned()
                .unwrap_or_default();
            for member in members {
                let Some(member) = member.as_str() else {
                    continue;
                };
                match Principal::parse(member) {
                    Some(principal) => bindings.push(PolicyBinding {
                        principal,
                        role: role.clone(),
                    }),
                    None => {
                        tracing::warn!(member, role = %role, "skipping unrecognized policy member")
                    }
                }
            }
        }
        Ok(bindings)
    }

    async fn add_invoker_binding(
        &self,
        service: &str,
        region: &str,
        principal: &Principal,
    ) -> Result<(), ControlPlaneError> {
        let subject = format!("service/{}", service);
        let member = principal.member();
        self.run(
            &subject,
            &argv(&[
                "run",
                "services",
                "add-iam-policy-binding",
                service,
                "--region",
                region,
                "--member",
                &member,
                "--role",
                RUN_INVOKER_ROLE,
            ]),
        )
        .await?;
        Ok(())
    }

    async fn remove_invoker_binding(
        &self,
        service: &str,
        region: &str,
        principal: &Principal,
    ) -> Result<(), ControlPlaneError> {
        let subject = format!("service/{}", service);
        let member = principal.member();
        self.run(
            &subject,
            &argv(&[
                "run",
                "services",
                "remove-iam-policy-binding",
                service,
                "--region",
                region,
                "--member",
                &member,
                "--role",
                RUN_INVOKER_ROLE,
            ]),
        )
        .await?;
        Ok(())
    }

    async fn grant_project_role(
        &self,
        member: &Principal,
        role: &str,
    ) -> Result<(), ControlPlaneError> {
        let subject = format!("project binding {}", member);
        let member = member.member();
        self.run(
            &subject,
            &argv(&[
                "projects",
                "add-iam-policy-binding",
                &self.project,
                "--member",
                &member,
                "--role",
                role,
            ]),
        )
        .await?;
        Ok(())
    }

    async fn enable_iap(&self, backend_service: &str) -> Result<(), ControlPlaneError> {
        let subject = format!("backend-service/{}", backend_service);
        self.run(
            &subject,
            &argv(&[
                "compute",
                "backend-services",
                "update",
                backend_service,
                "--global",
                "--iap=enabled",
            ]),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::Scope;

    #[test]
    fn describe_args_cover_every_kind() {
        let plane = GcloudControlPlane::new("demo");
        let cases = vec![
            ResourceDescriptor::global(ResourceKind::Network, "vpc"),
            ResourceDescriptor::regional(ResourceKind::Subnet, "sn", "us-central1"),
            ResourceDescriptor::regional(ResourceKind::Connector, "cn", "us-central1"),
            ResourceDescriptor::project(ResourceKind::ServiceAccount, "sa"),
            ResourceDescriptor::global(ResourceKind::StaticIp, "ip"),
            ResourceDescriptor::global(ResourceKind::Certificate, "cert"),
            ResourceDescriptor::project(ResourceKind::CustomRole, "role"),
            ResourceDescriptor::project(ResourceKind::Database, "(default)"),
            ResourceDescriptor::regional(ResourceKind::Service, "svc", "us-central1"),
            ResourceDescriptor::regional(ResourceKind::Neg, "neg", "us-central1"),
            ResourceDescriptor::global(ResourceKind::BackendService, "be"),
            ResourceDescriptor::global(ResourceKind::UrlMap, "um"),
            ResourceDescriptor::global(ResourceKind::HttpsProxy, "px"),
            ResourceDescriptor::global(ResourceKind::ForwardingRule, "fr"),
        ];
        for desc in cases {
            let args = plane.describe_args(&desc);
            assert!(!args.is_empty(), "no argv for {desc}");
            if let Scope::Region(r) = &desc.scope {
                assert!(args.contains(r), "region missing for {desc}");
            }
        }
    }

    #[test]
    fn service_account_probe_uses_email_form() {
        let plane = GcloudControlPlane::new("demo");
        let desc = ResourceDescriptor::project(ResourceKind::ServiceAccount, "agent-api-sa");
        let args = plane.describe_args(&desc);
        assert!(args.contains(&"agent-api-sa@demo.iam.gserviceaccount.com".to_string()));
    }

    #[test]
    fn delete_args_swap_the_verb() {
        let plane = GcloudControlPlane::new("demo");
        let desc = ResourceDescriptor::global(ResourceKind::UrlMap, "um");
        let args = plane.delete_args(&desc);
        assert!(args.contains(&"delete".to_string()));
        assert!(!args.contains(&"describe".to_string()));
    }

    #[test]
    fn env_flag_is_comma_joined() {
        let mut env = BTreeMap::new();
        env.insert("A".to_string(), "1".to_string());
        env.insert("B".to_string(), "2".to_string());
        assert_eq!(env_flag_value(&env), "A=1,B=2");
    }
}
