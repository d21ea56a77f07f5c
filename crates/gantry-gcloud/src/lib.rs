//! Control-plane seam for the Gantry orchestrator.
//!
//! Everything that talks to Google Cloud goes through the [`ControlPlane`]
//! trait. Production uses [`GcloudControlPlane`], which shells out to the
//! `gcloud` CLI; tests use [`fake::FakeControlPlane`], an in-memory
//! resource graph with the same observable semantics (not-found probes,
//! duplicate creates, invoker ACLs).

use async_trait::async_trait;
use std::collections::BTreeMap;

use gantry_core::{DeployedService, PolicyBinding, Principal, ResourceDescriptor, ResourceSpec, ServiceSpec};

pub mod error;
pub mod fake;
mod gcloud;

pub use error::ControlPlaneError;
pub use fake::FakeControlPlane;
pub use gcloud::GcloudControlPlane;

/// Operations the orchestrator needs from the cloud control plane.
///
/// Existence probes return `Ok(None)` for expected absence; only hard
/// failures (permission, quota, transport) surface as errors. Mutating
/// calls map the external tool's "already exists" convention onto
/// [`ControlPlaneError::AlreadyExists`] so callers can tolerate re-runs.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Probe a resource. `Ok(Some(_))` carries the control plane's view of
    /// it; `Ok(None)` means the resource does not exist.
    async fn describe(
        &self,
        desc: &ResourceDescriptor,
    ) -> Result<Option<serde_json::Value>, ControlPlaneError>;

    async fn create(&self, spec: &ResourceSpec) -> Result<(), ControlPlaneError>;

    async fn delete(&self, desc: &ResourceDescriptor) -> Result<(), ControlPlaneError>;

    async fn enabled_apis(&self) -> Result<Vec<String>, ControlPlaneError>;

    async fn enable_api(&self, service: &str) -> Result<(), ControlPlaneError>;

    /// Deploy (or redeploy) a service and report its serving URL.
    async fn deploy_service(
        &self,
        spec: &ServiceSpec,
    ) -> Result<DeployedService, ControlPlaneError>;

    /// Patch environment variables on an already-deployed service.
    async fn update_service_env(
        &self,
        service: &str,
        region: &str,
        env: &BTreeMap<String, String>,
    ) -> Result<(), ControlPlaneError>;

    /// Read the deployed service's environment. `NotFound` when the
    /// service has never been deployed.
    async fn service_env(
        &self,
        service: &str,
        region: &str,
    ) -> Result<BTreeMap<String, String>, ControlPlaneError>;

    async fn service_url(&self, service: &str, region: &str) -> Result<String, ControlPlaneError>;

    /// Enumerate the service's current IAM bindings.
    async fn invoker_bindings(
        &self,
        service: &str,
        region: &str,
    ) -> Result<Vec<PolicyBinding>, ControlPlaneError>;

    async fn add_invoker_binding(
        &self,
        service: &str,
        region: &str,
        principal: &Principal,
    ) -> Result<(), ControlPlaneError>;

    /// Remove an invoker binding. `NotFound` when the binding is absent;
    /// callers that treat removal as idempotent tolerate that variant.
    async fn remove_invoker_binding(
        &self,
        service: &str,
        region: &str,
        principal: &Principal,
    ) -> Result<(), ControlPlaneError>;

    /// Grant a project-level role to a principal. Re-granting an existing
    /// binding is a no-op.
    async fn grant_project_role(
        &self,
        member: &Principal,
        role: &str,
    ) -> Result<(), ControlPlaneError>;

    /// Turn on the perimeter-authentication layer for a backend service.
    async fn enable_iap(&self, backend_service: &str) -> Result<(), ControlPlaneError>;
}
