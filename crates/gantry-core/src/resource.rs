//! Cloud resource identities and typed creation parameters.
//!
//! A [`ResourceDescriptor`] is the (kind, name, scope) tuple used to probe
//! for existence; a [`ResourceSpec`] carries everything needed to create
//! the resource when the probe comes back empty. Every spec knows its own
//! descriptor so the provisioner can go from "want this" to "is it there"
//! without extra bookkeeping.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a resource lives in the control plane's namespace hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Scope {
    Global,
    Region(String),
    Project,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Api,
    Network,
    Subnet,
    Connector,
    ServiceAccount,
    StaticIp,
    Certificate,
    CustomRole,
    Database,
    Service,
    Neg,
    BackendService,
    UrlMap,
    HttpsProxy,
    ForwardingRule,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::Api => "api",
            ResourceKind::Network => "network",
            ResourceKind::Subnet => "subnet",
            ResourceKind::Connector => "connector",
            ResourceKind::ServiceAccount => "service-account",
            ResourceKind::StaticIp => "static-ip",
            ResourceKind::Certificate => "certificate",
            ResourceKind::CustomRole => "custom-role",
            ResourceKind::Database => "database",
            ResourceKind::Service => "service",
            ResourceKind::Neg => "neg",
            ResourceKind::BackendService => "backend-service",
            ResourceKind::UrlMap => "url-map",
            ResourceKind::HttpsProxy => "https-proxy",
            ResourceKind::ForwardingRule => "forwarding-rule",
        };
        write!(f, "{}", s)
    }
}

/// Identifying tuple for a cloud resource, used to probe existence.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub kind: ResourceKind,
    pub name: String,
    pub scope: Scope,
}

impl ResourceDescriptor {
    pub fn global(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            scope: Scope::Global,
        }
    }

    pub fn regional(kind: ResourceKind, name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            scope: Scope::Region(region.into()),
        }
    }

    pub fn project(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            scope: Scope::Project,
        }
    }
}

impl fmt::Display for ResourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Scope::Region(r) => write!(f, "{}/{} ({})", self.kind, self.name, r),
            _ => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

/// A path-based routing rule on a URL map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRule {
    /// Path pattern, e.g. `/api/*`.
    pub paths: String,
    /// Backend service that receives matching requests.
    pub service: String,
}

/// Typed creation parameters, one variant per resource kind the
/// orchestrator provisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceSpec {
    Network {
        name: String,
    },
    Subnet {
        name: String,
        network: String,
        range: String,
        region: String,
    },
    Connector {
        name: String,
        network: String,
        range: String,
        region: String,
    },
    ServiceAccount {
        id: String,
        display_name: String,
    },
    StaticIp {
        name: String,
    },
    Certificate {
        name: String,
        domain: String,
    },
    CustomRole {
        id: String,
        title: String,
        description: String,
        permissions: Vec<String>,
    },
    Database {
        name: String,
        location: String,
    },
    Neg {
        name: String,
        region: String,
        service: String,
    },
    BackendService {
        name: String,
        neg: String,
        neg_region: String,
    },
    UrlMap {
        name: String,
        default_service: String,
        path_rules: Vec<PathRule>,
    },
    HttpsProxy {
        name: String,
        url_map: String,
        certificate: String,
    },
    ForwardingRule {
        name: String,
        target_proxy: String,
        address: String,
    },
}

impl ResourceSpec {
    /// The descriptor the provisioner probes before creating this spec.
    pub fn descriptor(&self) -> ResourceDescriptor {
        match self {
            ResourceSpec::Network { name } => {
                ResourceDescriptor::global(ResourceKind::Network, name.clone())
            }
            ResourceSpec::Subnet { name, region, .. } => {
                ResourceDescriptor::regional(ResourceKind::Subnet, name.clone(), region.clone())
            }
            ResourceSpec::Connector { name, region, .. } => {
                ResourceDescriptor::regional(ResourceKind::Connector, name.clone(), region.clone())
            }
            ResourceSpec::ServiceAccount { id, .. } => {
                ResourceDescriptor::project(ResourceKind::ServiceAccount, id.clone())
            }
            ResourceSpec::StaticIp { name } => {
                ResourceDescriptor::global(ResourceKind::StaticIp, name.clone())
            }
            ResourceSpec::Certificate { name, .. } => {
                ResourceDescriptor::global(ResourceKind::Certificate, name.clone())
            }
            ResourceSpec::CustomRole { id, .. } => {
                ResourceDescriptor::project(ResourceKind::CustomRole, id.clone())
            }
            ResourceSpec::Database { name, .. } => {
                ResourceDescriptor::project(ResourceKind::Database, name.clone())
            }
            ResourceSpec::Neg { name, region, .. } => {
                ResourceDescriptor::regional(ResourceKind::Neg, name.clone(), region.clone())
            }
            ResourceSpec::BackendService { name, .. } => {
                ResourceDescriptor::global(ResourceKind::BackendService, name.clone())
            }
            ResourceSpec::UrlMap { name, .. } => {
                ResourceDescriptor::global(ResourceKind::UrlMap, name.clone())
            }
            ResourceSpec::HttpsProxy { name, .. } => {
                ResourceDescriptor::global(ResourceKind::HttpsProxy, name.clone())
            }
            ResourceSpec::ForwardingRule { name, .. } => {
                ResourceDescriptor::global(ResourceKind::ForwardingRule, name.clone())
            }
        }
    }
}
