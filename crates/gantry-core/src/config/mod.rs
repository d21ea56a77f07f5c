//! Deployment configuration.
//!
//! Configuration is assembled from three layers, later layers winning:
//!
//! 1. built-in defaults (everything except the project id has one),
//! 2. an optional `gantry.yaml` manifest in the working directory,
//! 3. process-environment / CLI overrides (`PROJECT_ID`, `REGION`,
//!    `DOMAIN`, `ACCESS_CONTROL_TYPE`, `ACCESS_CONTROL_VALUE`,
//!    `REASONING_ENGINE_ID`).
//!
//! The resulting [`DeploymentConfig`] is immutable for the rest of the
//! run; stages read from it and never write back.

pub mod access;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

pub use access::{AccessControlKind, AccessPolicy};

/// Errors raised while assembling or validating configuration.
///
/// All of these are fatal before any stage runs; none of them can occur
/// mid-sequence.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("PROJECT_ID is required and must not be empty")]
    MissingProjectId,

    #[error("unknown access-control kind '{0}' (expected domain, group, users or all-authenticated)")]
    UnknownAccessKind(String),

    #[error("invalid access-control value: {0}")]
    InvalidPolicyValue(String),

    #[error("DOMAIN is required for the load-balancer routing variant")]
    MissingDomain,

    #[error("failed to read manifest: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse manifest: {0}")]
    Manifest(#[from] serde_yaml::Error),
}

/// Immutable input for one orchestrator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// Target project. Required; everything else has a default.
    #[serde(default)]
    pub project_id: String,

    #[serde(default = "default_region")]
    pub region: String,

    /// Public domain for the load-balancer variant's certificate and
    /// forwarding rule. Optional for direct deployments.
    #[serde(default)]
    pub domain: Option<String>,

    /// Who may invoke the deployed services after hardening.
    #[serde(default)]
    pub access: AccessPolicy,

    /// Identifier of the externally deployed reasoning engine, threaded
    /// into the API service's environment when present.
    #[serde(default)]
    pub reasoning_engine_id: Option<String>,

    #[serde(default = "default_api_service")]
    pub api_service: String,

    #[serde(default = "default_ui_service")]
    pub ui_service: String,

    /// Container image overrides. When absent, images are derived from
    /// the project's registry path.
    #[serde(default)]
    pub api_image: Option<String>,
    #[serde(default)]
    pub ui_image: Option<String>,

    #[serde(default = "default_network")]
    pub network: String,
    #[serde(default = "default_subnet")]
    pub subnet: String,
    #[serde(default = "default_subnet_range")]
    pub subnet_range: String,
    #[serde(default = "default_connector")]
    pub connector: String,
    #[serde(default = "default_connector_range")]
    pub connector_range: String,
    #[serde(default = "default_static_ip")]
    pub static_ip: String,
    #[serde(default = "default_certificate")]
    pub certificate: String,
    #[serde(default = "default_custom_role")]
    pub custom_role: String,
    #[serde(default = "default_database")]
    pub database: String,
}

fn default_region() -> String {
    "us-central1".to_string()
}
fn default_api_service() -> String {
    "agent-api".to_string()
}
fn default_ui_service() -> String {
    "agent-ui".to_string()
}
fn default_network() -> String {
    "agent-vpc".to_string()
}
fn default_subnet() -> String {
    "agent-subnet".to_string()
}
fn default_subnet_range() -> String {
    "10.0.0.0/24".to_string()
}
fn default_connector() -> String {
    "agent-connector".to_string()
}
fn default_connector_range() -> String {
    "10.8.0.0/28".to_string()
}
fn default_static_ip() -> String {
    "agent-lb-ip".to_string()
}
fn default_certificate() -> String {
    "agent-cert".to_string()
}
fn default_custom_role() -> String {
    "agentAppAccess".to_string()
}
fn default_database() -> String {
    "(default)".to_string()
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            region: default_region(),
            domain: None,
            access: AccessPolicy::default(),
            reasoning_engine_id: None,
            api_service: default_api_service(),
            ui_service: default_ui_service(),
            api_image: None,
            ui_image: None,
            network: default_network(),
            subnet: default_subnet(),
            subnet_range: default_subnet_range(),
            connector: default_connector(),
            connector_range: default_connector_range(),
            static_ip: default_static_ip(),
            certificate: default_certificate(),
            custom_role: default_custom_role(),
            database: default_database(),
        }
    }
}

/// Overrides collected from the process environment / CLI flags.
/// `None` means "not supplied, keep the lower layer's value".
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub project_id: Option<String>,
    pub region: Option<String>,
    pub domain: Option<String>,
    pub access_kind: Option<String>,
    pub access_value: Option<String>,
    pub reasoning_engine_id: Option<String>,
}

impl DeploymentConfig {
    /// Assemble configuration from an optional manifest plus overrides,
    /// then validate.
    pub fn load(manifest: Option<&Path>, overrides: Overrides) -> Result<Self, ConfigError> {
        let mut config = match manifest {
            Some(path) if path.exists() => {
                let contents = fs::read_to_string(path)?;
                serde_yaml::from_str(&contents)?
            }
            _ => DeploymentConfig::default(),
        };
        config.apply(overrides)?;
        config.validate()?;
        Ok(config)
    }

    fn apply(&mut self, overrides: Overrides) -> Result<(), ConfigError> {
        if let Some(project) = overrides.project_id {
            self.project_id = project;
        }
        if let Some(region) = overrides.region {
            self.region = region;
        }
        if let Some(domain) = overrides.domain {
            self.domain = Some(domain);
        }
        if let Some(kind) = overrides.access_kind {
            self.access.kind = kind.parse()?;
        }
        if let Some(value) = overrides.access_value {
            self.access.value = value;
        }
        if let Some(engine) = overrides.reasoning_engine_id {
            self.reasoning_engine_id = Some(engine);
        }
        Ok(())
    }

    /// Reject configurations that would fail mid-sequence. The access
    /// policy's member derivation runs here so a bad value aborts before
    /// any stage mutates anything.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.project_id.trim().is_empty() {
            return Err(ConfigError::MissingProjectId);
        }
        self.access.members()?;
        Ok(())
    }

    /// Image for the API service: explicit override or the project's
    /// registry path.
    pub fn api_image(&self) -> String {
        self.api_image
            .clone()
            .unwrap_or_else(|| format!("gcr.io/{}/{}:latest", self.project_id, self.api_service))
    }

    pub fn ui_image(&self) -> String {
        self.ui_image
            .clone()
            .unwrap_or_else(|| format!("gcr.io/{}/{}:latest", self.project_id, self.ui_service))
    }

    /// Service-account id for a deployed service (`<service>-sa`).
    pub fn service_account_id(&self, service: &str) -> String {
        format!("{}-sa", service)
    }

    /// Full email form of a service-account id in this project.
    pub fn service_account_email(&self, id: &str) -> String {
        format!("{}@{}.iam.gserviceaccount.com", id, self.project_id)
    }

    /// Fully qualified name of the custom role in this project.
    pub fn custom_role_name(&self) -> String {
        format!("projects/{}/roles/{}", self.project_id, self.custom_role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_fail_validation_without_project() {
        let config = DeploymentConfig::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingProjectId)
        ));
    }

    #[test]
    fn overrides_win_over_manifest() {
        let mut manifest = NamedTempFile::new().unwrap();
        writeln!(
            manifest,
            "project_id: from-manifest\nregion: europe-west1\napi_service: custom-api"
        )
        .unwrap();

        let overrides = Overrides {
            project_id: Some("from-env".into()),
            ..Default::default()
        };
        let config = DeploymentConfig::load(Some(manifest.path()), overrides).unwrap();

        assert_eq!(config.project_id, "from-env");
        assert_eq!(config.region, "europe-west1");
        assert_eq!(config.api_service, "custom-api");
        // Untouched fields keep their defaults.
        assert_eq!(config.ui_service, "agent-ui");
    }

    #[test]
    fn unknown_access_kind_is_fatal() {
        let overrides = Overrides {
            project_id: Some("demo".into()),
            access_kind: Some("nonsense".into()),
            ..Default::default()
        };
        let err = DeploymentConfig::load(None, overrides).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownAccessKind(k) if k == "nonsense"));
    }

    #[test]
    fn empty_users_value_is_fatal() {
        let overrides = Overrides {
            project_id: Some("demo".into()),
            access_kind: Some("users".into()),
            access_value: Some("  ,  ".into()),
            ..Default::default()
        };
        assert!(matches!(
            DeploymentConfig::load(None, overrides),
            Err(ConfigError::InvalidPolicyValue(_))
        ));
    }

    #[test]
    fn derived_names() {
        let config = DeploymentConfig {
            project_id: "demo".into(),
            ..Default::default()
        };
        assert_eq!(config.api_image(), "gcr.io/demo/agent-api:latest");
        assert_eq!(config.service_account_id("agent-api"), "agent-api-sa");
        assert_eq!(
            config.service_account_email("agent-api-sa"),
            "agent-api-sa@demo.iam.gserviceaccount.com"
        );
        assert_eq!(config.custom_role_name(), "projects/demo/roles/agentAppAccess");
    }
}
