//! Read-only deployment audit.
//!
//! Compares expected resource existence/configuration against the actual
//! control-plane state and aggregates mismatches into a report. Never
//! mutates anything; used as a post-deployment smoke test and as a CI
//! gate (the CLI exits non-zero when the report fails).

use chrono::{DateTime, Utc};
use serde::Serialize;

use gantry_core::{
    DeploymentConfig, REQUIRED_APIS, ResourceDescriptor, ResourceKind, RUN_INVOKER_ROLE,
};
use gantry_gcloud::{ControlPlane, ControlPlaneError};

/// Severity level for audit findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// May indicate a problem; does not fail the report.
    Warning,
    /// The deployment does not match its expected state.
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Warning => write!(f, "WARN"),
            Severity::Error => write!(f, "ERROR"),
        }
    }
}

/// A single audit finding.
#[derive(Debug, Clone, Serialize)]
pub struct CheckFinding {
    pub severity: Severity,
    /// Category of the check that produced this finding.
    pub category: String,
    /// The resource the finding is about.
    pub resource: String,
    pub message: String,
}

impl CheckFinding {
    fn error(
        category: impl Into<String>,
        resource: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity: Severity::Error,
            category: category.into(),
            resource: resource.into(),
            message: message.into(),
        }
    }

    fn warning(
        category: impl Into<String>,
        resource: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity: Severity::Warning,
            category: category.into(),
            resource: resource.into(),
            message: message.into(),
        }
    }
}

/// Result of one verification pass.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub project_id: String,
    pub generated_at: DateTime<Utc>,
    pub findings: Vec<CheckFinding>,
}

impl Report {
    /// The report passes only when nothing error-severity was found.
    pub fn passed(&self) -> bool {
        !self
            .findings
            .iter()
            .any(|f| f.severity == Severity::Error)
    }

    pub fn error_count(&self) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity == Severity::Error)
            .count()
    }

    pub fn warning_count(&self) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity == Severity::Warning)
            .count()
    }

    /// Print a human-readable summary, errors first.
    pub fn print_summary(&self) {
        let mut errors: Vec<_> = self
            .findings
            .iter()
            .filter(|f| f.severity == Severity::Error)
            .collect();
        let mut warnings: Vec<_> = self
            .findings
            .iter()
            .filter(|f| f.severity == Severity::Warning)
            .collect();
        errors.sort_by(|a, b| a.category.cmp(&b.category));
        warnings.sort_by(|a, b| a.category.cmp(&b.category));

        if !errors.is_empty() {
            println!("\nErrors ({}):", errors.len());
            for f in &errors {
                println!("  ✖ [{}] {}: {}", f.category, f.resource, f.message);
            }
        }
        if !warnings.is_empty() {
            println!("\nWarnings ({}):", warnings.len());
            for f in &warnings {
                println!("  ⚠ [{}] {}: {}", f.category, f.resource, f.message);
            }
        }

        println!();
        if self.passed() {
            println!("✔ Deployment verified: all expected resources present.");
            if !warnings.is_empty() {
                println!("  ({} warning(s))", warnings.len());
            }
        } else {
            println!(
                "✖ Verification failed: {} error(s), {} warning(s)",
                self.error_count(),
                self.warning_count()
            );
        }
    }
}

/// Read-only audit of a deployment against its configuration.
pub struct Verifier<'a> {
    config: &'a DeploymentConfig,
    plane: &'a dyn ControlPlane,
}

impl<'a> Verifier<'a> {
    pub fn new(config: &'a DeploymentConfig, plane: &'a dyn ControlPlane) -> Self {
        Self { config, plane }
    }

    /// Run every check. Probe failures other than not-found surface as
    /// hard errors: a verification pass that cannot observe the project
    /// must not report a clean bill of health.
    pub async fn run(&self) -> Result<Report, ControlPlaneError> {
        let mut findings = Vec::new();

        self.check_apis(&mut findings).await?;
        self.check_resources(&mut findings).await?;
        self.check_services(&mut findings).await?;
        self.check_bindings(&mut findings).await?;

        Ok(Report {
            project_id: self.config.project_id.clone(),
            generated_at: Utc::now(),
            findings,
        })
    }

    async fn check_apis(&self, findings: &mut Vec<CheckFinding>) -> Result<(), ControlPlaneError> {
        let enabled = self.plane.enabled_apis().await?;
        for api in REQUIRED_APIS {
            if !enabled.iter().any(|e| e == api) {
                findings.push(CheckFinding::error(
                    "apis",
                    format!("api/{}", api),
                    "required API is not enabled",
                ));
            }
        }
        Ok(())
    }

    /// Existence checks for everything the infrastructure and IAM stages
    /// own.
    async fn check_resources(
        &self,
        findings: &mut Vec<CheckFinding>,
    ) -> Result<(), ControlPlaneError> {
        let config = self.config;
        let region = config.region.clone();

        let mut expected = vec![
            ResourceDescriptor::global(ResourceKind::Network, config.network.clone()),
            ResourceDescriptor::regional(ResourceKind::Subnet, config.subnet.clone(), region.clone()),
            ResourceDescriptor::regional(
                ResourceKind::Connector,
                config.connector.clone(),
                region.clone(),
            ),
            ResourceDescriptor::project(ResourceKind::CustomRole, config.custom_role.clone()),
            ResourceDescriptor::project(ResourceKind::Database, config.database.clone()),
        ];
        for service in [&config.api_service, &config.ui_service] {
            expected.push(ResourceDescriptor::project(
                ResourceKind::ServiceAccount,
                config.service_account_id(service),
            ));
        }

        for desc in expected {
            if self.plane.describe(&desc).await?.is_none() {
                findings.push(CheckFinding::error(
                    "resources",
                    desc.to_string(),
                    "expected resource does not exist",
                ));
            }
        }

        // The load-balancer chain is only expected when a domain is
        // configured; its absence elsewhere is informational.
        if config.domain.is_some() {
            let chain = vec![
                ResourceDescriptor::global(ResourceKind::StaticIp, config.static_ip.clone()),
                ResourceDescriptor::global(ResourceKind::Certificate, config.certificate.clone()),
            ];
            for desc in chain {
                if self.plane.describe(&desc).await?.is_none() {
                    findings.push(CheckFinding::warning(
                        "routing",
                        desc.to_string(),
                        "domain is configured but this routing resource is absent",
                    ));
                }
            }
        }

        Ok(())
    }

    async fn check_services(
        &self,
        findings: &mut Vec<CheckFinding>,
    ) -> Result<(), ControlPlaneError> {
        let config = self.config;
        for service in [&config.api_service, &config.ui_service] {
            let desc = ResourceDescriptor::regional(
                ResourceKind::Service,
                service.clone(),
                config.region.clone(),
            );
            if self.plane.describe(&desc).await?.is_none() {
                findings.push(CheckFinding::error(
                    "services",
                    desc.to_string(),
                    "service is not deployed",
                ));
            }
        }
        Ok(())
    }

    /// Invoker ACLs must contain no broad members beyond what the policy
    /// asks for.
    async fn check_bindings(
        &self,
        findings: &mut Vec<CheckFinding>,
    ) -> Result<(), ControlPlaneError> {
        let config = self.config;
        let allowed = match config.access.members() {
            Ok(members) => members,
            Err(e) => {
                findings.push(CheckFinding::error(
                    "access-policy",
                    "configuration",
                    e.to_string(),
                ));
                return Ok(());
            }
        };

        for service in [&config.api_service, &config.ui_service] {
            let bindings = match self
                .plane
                .invoker_bindings(service, &config.region)
                .await
            {
                Ok(bindings) => bindings,
                // Missing service already reported by check_services.
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };

            for binding in bindings {
                if binding.role != RUN_INVOKER_ROLE {
                    continue;
                }
                if binding.principal.is_broad() && !allowed.contains(&binding.principal) {
                    findings.push(CheckFinding::error(
                        "access-policy",
                        format!("service/{}", service),
                        format!(
                            "broad member {} is bound but not allowed by the access policy",
                            binding.principal
                        ),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::{AccessControlKind, AccessPolicy, PolicyBinding, Principal, ResourceSpec};
    use gantry_gcloud::{ControlPlane, FakeControlPlane};
    use std::collections::BTreeMap;

    fn config() -> DeploymentConfig {
        DeploymentConfig {
            project_id: "demo".into(),
            access: AccessPolicy::new(AccessControlKind::Domain, "example.com"),
            ..Default::default()
        }
    }

    /// Provision a fake project that matches `config()` exactly.
    async fn healthy_plane() -> FakeControlPlane {
        let plane = FakeControlPlane::new();
        for api in REQUIRED_APIS {
            plane.enable_api(api).await.unwrap();
        }
        let c = config();
        let specs = vec![
            ResourceSpec::Network {
                name: c.network.clone(),
            },
            ResourceSpec::Subnet {
                name: c.subnet.clone(),
                network: c.network.clone(),
                range: c.subnet_range.clone(),
                region: c.region.clone(),
            },
            ResourceSpec::Connector {
                name: c.connector.clone(),
                network: c.network.clone(),
                range: c.connector_range.clone(),
                region: c.region.clone(),
            },
            ResourceSpec::ServiceAccount {
                id: "agent-api-sa".into(),
                display_name: String::new(),
            },
            ResourceSpec::ServiceAccount {
                id: "agent-ui-sa".into(),
                display_name: String::new(),
            },
            ResourceSpec::CustomRole {
                id: c.custom_role.clone(),
                title: String::new(),
                description: String::new(),
                permissions: Vec::new(),
            },
            ResourceSpec::Database {
                name: c.database.clone(),
                location: c.region.clone(),
            },
        ];
        for spec in specs {
            plane.create(&spec).await.unwrap();
        }
        for service in ["agent-api", "agent-ui"] {
            plane.seed_service(
                service,
                &c.region,
                BTreeMap::new(),
                vec![PolicyBinding::invoker(Principal::Domain(
                    "example.com".into(),
                ))],
            );
        }
        plane
    }

    #[tokio::test]
    async fn healthy_project_passes() {
        let config = config();
        let plane = healthy_plane().await;
        let report = Verifier::new(&config, &plane).run().await.unwrap();
        assert!(report.passed(), "unexpected findings: {:?}", report.findings);
    }

    #[tokio::test]
    async fn missing_api_enablement_fails_and_is_listed() {
        let config = config();
        // Healthy project except one API enablement.
        let plane = FakeControlPlane::new();
        for api in REQUIRED_APIS {
            if *api != "bigquery.googleapis.com" {
                plane.enable_api(api).await.unwrap();
            }
        }
        let report = Verifier::new(&config, &plane).run().await.unwrap();
        assert!(!report.passed());
        assert!(
            report
                .findings
                .iter()
                .any(|f| f.resource == "api/bigquery.googleapis.com" && f.severity == Severity::Error)
        );
    }

    #[tokio::test]
    async fn broad_binding_outside_policy_fails() {
        let config = config();
        let plane = healthy_plane().await;
        plane.seed_service(
            "agent-api",
            "us-central1",
            BTreeMap::new(),
            vec![PolicyBinding::invoker(Principal::AllAuthenticatedUsers)],
        );
        let report = Verifier::new(&config, &plane).run().await.unwrap();
        assert!(!report.passed());
        assert!(
            report
                .findings
                .iter()
                .any(|f| f.category == "access-policy" && f.resource == "service/agent-api")
        );
    }

    #[tokio::test]
    async fn broad_binding_matching_policy_passes() {
        let config = DeploymentConfig {
            access: AccessPolicy::new(AccessControlKind::AllAuthenticated, ""),
            ..config()
        };
        let plane = healthy_plane().await;
        for service in ["agent-api", "agent-ui"] {
            plane.seed_service(
                service,
                "us-central1",
                BTreeMap::new(),
                vec![PolicyBinding::invoker(Principal::AllAuthenticatedUsers)],
            );
        }
        let report = Verifier::new(&config, &plane).run().await.unwrap();
        assert!(report.passed(), "unexpected findings: {:?}", report.findings);
    }

    #[tokio::test]
    async fn missing_routing_chain_with_domain_is_warning_only() {
        let config = DeploymentConfig {
            domain: Some("agent.example.com".into()),
            ..config()
        };
        let plane = healthy_plane().await;
        let report = Verifier::new(&config, &plane).run().await.unwrap();
        assert!(report.passed());
        assert!(report.warning_count() >= 2);
    }

    #[tokio::test]
    async fn verification_is_read_only() {
        let config = config();
        let plane = healthy_plane().await;
        let before = plane.mutation_count();
        Verifier::new(&config, &plane).run().await.unwrap();
        assert_eq!(plane.mutation_count(), before);
    }

    #[tokio::test]
    async fn report_serializes_for_ci() {
        let config = config();
        let plane = FakeControlPlane::new();
        let report = Verifier::new(&config, &plane).run().await.unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["project_id"], "demo");
        assert!(json["findings"].as_array().unwrap().len() > 0);
    }
}
