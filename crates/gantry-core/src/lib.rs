use std::collections::BTreeMap;
use std::fmt;

// Configuration types shared across all Gantry crates
pub mod config;
pub mod resource;

// Re-export commonly used types for convenience
pub use config::{AccessControlKind, AccessPolicy, ConfigError, DeploymentConfig, Overrides};
pub use resource::{ResourceDescriptor, ResourceKind, ResourceSpec, Scope};

/// IAM role granted to principals that may invoke a deployed service.
pub const RUN_INVOKER_ROLE: &str = "roles/run.invoker";

/// APIs that must be enabled on the target project before anything else
/// can be provisioned.
pub const REQUIRED_APIS: &[&str] = &[
    "run.googleapis.com",
    "compute.googleapis.com",
    "vpcaccess.googleapis.com",
    "iam.googleapis.com",
    "firestore.googleapis.com",
    "aiplatform.googleapis.com",
    "bigquery.googleapis.com",
    "cloudbuild.googleapis.com",
];

/// A Cloud Run service deployment request.
///
/// Environment variables carry all cross-references (peer URLs, the JWT
/// signing key, the reasoning-engine id); the orchestrator writes them at
/// deploy time and never reads them back except through
/// [`gantry-secret`]'s continuity probe.
#[derive(Debug, Clone)]
pub struct ServiceSpec {
    pub name: String,
    pub image: String,
    pub region: String,
    /// Service account email the revision runs as.
    pub service_account: Option<String>,
    /// VPC connector name for egress, if any.
    pub vpc_connector: Option<String>,
    pub env: BTreeMap<String, String>,
    /// Deploy with an open invoker ACL. The hardening stage narrows this
    /// to the configured access policy afterwards.
    pub allow_unauthenticated: bool,
}

/// A deployed service as reported back by the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployedService {
    pub name: String,
    pub url: String,
}

/// An IAM principal as it appears in a policy binding member string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Principal {
    AllUsers,
    AllAuthenticatedUsers,
    Domain(String),
    Group(String),
    User(String),
    ServiceAccount(String),
}

impl Principal {
    /// Render the control plane's `member` string form.
    pub fn member(&self) -> String {
        match self {
            Principal::AllUsers => "allUsers".to_string(),
            Principal::AllAuthenticatedUsers => "allAuthenticatedUsers".to_string(),
            Principal::Domain(d) => format!("domain:{}", d),
            Principal::Group(g) => format!("group:{}", g),
            Principal::User(u) => format!("user:{}", u),
            Principal::ServiceAccount(s) => format!("serviceAccount:{}", s),
        }
    }

    /// Parse a `member` string back into a principal. Unknown prefixes
    /// yield `None`.
    pub fn parse(member: &str) -> Option<Self> {
        match member {
            "allUsers" => return Some(Principal::AllUsers),
            "allAuthenticatedUsers" => return Some(Principal::AllAuthenticatedUsers),
            _ => {}
        }
        let (prefix, value) = member.split_once(':')?;
        if value.is_empty() {
            return None;
        }
        match prefix {
            "domain" => Some(Principal::Domain(value.to_string())),
            "group" => Some(Principal::Group(value.to_string())),
            "user" => Some(Principal::User(value.to_string())),
            "serviceAccount" => Some(Principal::ServiceAccount(value.to_string())),
            _ => None,
        }
    }

    /// Broad principals are the ones the hardening stage strips unless the
    /// access policy explicitly asks for them.
    pub fn is_broad(&self) -> bool {
        matches!(self, Principal::AllUsers | Principal::AllAuthenticatedUsers)
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.member())
    }
}

/// A (principal, role) pair on a service's access-control list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyBinding {
    pub principal: Principal,
    pub role: String,
}

impl PolicyBinding {
    pub fn invoker(principal: Principal) -> Self {
        Self {
            principal,
            role: RUN_INVOKER_ROLE.to_string(),
        }
    }
}

/// Values produced by one stage and consumed by a later one.
///
/// The application stage fills in the service URLs and the signing key;
/// the routing stage fills in the load-balancer address. Later stages and
/// the final summary read from here instead of re-querying the control
/// plane.
#[derive(Default, Clone)]
pub struct StageOutputs {
    pub api_url: Option<String>,
    pub ui_url: Option<String>,
    pub jwt_secret: Option<String>,
    pub reasoning_engine_id: Option<String>,
    pub load_balancer_ip: Option<String>,
}

impl fmt::Debug for StageOutputs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageOutputs")
            .field("api_url", &self.api_url)
            .field("ui_url", &self.ui_url)
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| "<redacted>"))
            .field("reasoning_engine_id", &self.reasoning_engine_id)
            .field("load_balancer_ip", &self.load_balancer_ip)
            .finish()
    }
}
