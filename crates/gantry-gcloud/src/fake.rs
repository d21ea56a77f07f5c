//! In-memory control plane for tests.
//!
//! Mirrors the observable semantics of the real adapter: probes of absent
//! resources report absence, duplicate creates fail with `AlreadyExists`,
//! removing an absent binding fails with `NotFound`, and deploying with an
//! open ACL materializes an `allUsers` invoker binding the way Cloud Run
//! does. A mutation counter lets tests assert that an operation observed
//! state without changing it.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use gantry_core::{
    DeployedService, PolicyBinding, Principal, ResourceDescriptor, ResourceKind, ResourceSpec,
    RUN_INVOKER_ROLE, ServiceSpec,
};

use crate::ControlPlane;
use crate::error::ControlPlaneError;

#[derive(Debug, Clone)]
pub struct FakeService {
    pub spec: ServiceSpec,
    pub url: String,
}

#[derive(Default)]
struct State {
    apis: BTreeSet<String>,
    resources: BTreeMap<String, serde_json::Value>,
    services: BTreeMap<String, FakeService>,
    bindings: BTreeMap<String, Vec<PolicyBinding>>,
    project_roles: BTreeSet<(String, String)>,
    iap_enabled: BTreeSet<String>,
    poisoned: BTreeSet<String>,
    mutations: u64,
}

/// Shared-handle fake: clones observe the same resource graph.
#[derive(Clone, Default)]
pub struct FakeControlPlane {
    state: Arc<Mutex<State>>,
}

fn key(desc: &ResourceDescriptor) -> String {
    format!("{}:{}", desc.kind, desc.name)
}

impl FakeControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-mark a resource as existing.
    pub fn seed_resource(&self, desc: &ResourceDescriptor) {
        let mut state = self.state.lock().unwrap();
        state
            .resources
            .insert(key(desc), serde_json::json!({ "name": desc.name }));
    }

    /// Pre-deploy a service with the given environment and bindings, as if
    /// an earlier orchestrator run had created it.
    pub fn seed_service(
        &self,
        name: &str,
        region: &str,
        env: BTreeMap<String, String>,
        bindings: Vec<PolicyBinding>,
    ) {
        let mut state = self.state.lock().unwrap();
        let url = fake_url(name, region);
        state.services.insert(
            name.to_string(),
            FakeService {
                spec: ServiceSpec {
                    name: name.to_string(),
                    image: "seeded".to_string(),
                    region: region.to_string(),
                    service_account: None,
                    vpc_connector: None,
                    env,
                    allow_unauthenticated: false,
                },
                url,
            },
        );
        state.bindings.insert(name.to_string(), bindings);
    }

    /// Make the next and all further probes of `desc` fail hard, to test
    /// the propagate-on-unexpected-failure path.
    pub fn poison(&self, desc: &ResourceDescriptor) {
        self.state.lock().unwrap().poisoned.insert(key(desc));
    }

    pub fn has_resource(&self, desc: &ResourceDescriptor) -> bool {
        self.state.lock().unwrap().resources.contains_key(&key(desc))
    }

    pub fn service(&self, name: &str) -> Option<FakeService> {
        self.state.lock().unwrap().services.get(name).cloned()
    }

    pub fn bindings_of(&self, service: &str) -> Vec<PolicyBinding> {
        self.state
            .lock()
            .unwrap()
            .bindings
            .get(service)
            .cloned()
            .unwrap_or_default()
    }

    pub fn project_roles(&self) -> Vec<(String, String)> {
        self.state
            .lock()
            .unwrap()
            .project_roles
            .iter()
            .cloned()
            .collect()
    }

    pub fn iap_enabled(&self, backend: &str) -> bool {
        self.state.lock().unwrap().iap_enabled.contains(backend)
    }

    /// Number of mutating control-plane calls observed so far.
    pub fn mutation_count(&self) -> u64 {
        self.state.lock().unwrap().mutations
    }
}

fn fake_url(name: &str, region: &str) -> String {
    format!("https://{}-{}.a.run.app", name, region)
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn describe(
        &self,
        desc: &ResourceDescriptor,
    ) -> Result<Option<serde_json::Value>, ControlPlaneError> {
        let state = self.state.lock().unwrap();
        if state.poisoned.contains(&key(desc)) {
            return Err(ControlPlaneError::CommandFailed {
                command: format!("describe {}", desc),
                stderr: "ERROR: PERMISSION_DENIED (injected)".to_string(),
            });
        }
        match desc.kind {
            ResourceKind::Api => Ok(state
                .apis
                .contains(&desc.name)
                .then(|| serde_json::json!({ "name": desc.name }))),
            ResourceKind::Service => Ok(state
                .services
                .get(&desc.name)
                .map(|s| serde_json::json!({ "status": { "url": s.url } }))),
            _ => Ok(state.resources.get(&key(desc)).cloned()),
        }
    }

    async fn create(&self, spec: &ResourceSpec) -> Result<(), ControlPlaneError> {
        let desc = spec.descriptor();
        let mut state = self.state.lock().unwrap();
        state.mutations += 1;
        if state.resources.contains_key(&key(&desc)) {
            return Err(ControlPlaneError::AlreadyExists(desc.to_string()));
        }
        state
            .resources
            .insert(key(&desc), serde_json::json!({ "name": desc.name }));
        Ok(())
    }

    async fn delete(&self, desc: &ResourceDescriptor) -> Result<(), ControlPlaneError> {
        let mut state = self.state.lock().unwrap();
        state.mutations += 1;
        if desc.kind == ResourceKind::Service {
            if state.services.remove(&desc.name).is_none() {
                return Err(ControlPlaneError::NotFound(desc.to_string()));
            }
            state.bindings.remove(&desc.name);
            return Ok(());
        }
        if state.resources.remove(&key(desc)).is_none() {
            return Err(ControlPlaneError::NotFound(desc.to_string()));
        }
        Ok(())
    }

    async fn enabled_apis(&self) -> Result<Vec<String>, ControlPlaneError> {
        Ok(self.state.lock().unwrap().apis.iter().cloned().collect())
    }

    async fn enable_api(&self, service: &str) -> Result<(), ControlPlaneError> {
        let mut state = self.state.lock().unwrap();
        state.mutations += 1;
        state.apis.insert(service.to_string());
        Ok(())
    }

    async fn deploy_service(
        &self,
        spec: &ServiceSpec,
    ) -> Result<DeployedService, ControlPlaneError> {
        let mut state = self.state.lock().unwrap();
        state.mutations += 1;
        // Redeploys keep the stable URL.
        let url = state
            .services
            .get(&spec.name)
            .map(|s| s.url.clone())
            .unwrap_or_else(|| fake_url(&spec.name, &spec.region));
        state.services.insert(
            spec.name.clone(),
            FakeService {
                spec: spec.clone(),
                url: url.clone(),
            },
        );
        if spec.allow_unauthenticated {
            let bindings = state.bindings.entry(spec.name.clone()).or_default();
            let open = PolicyBinding::invoker(Principal::AllUsers);
            if !bindings.contains(&open) {
                bindings.push(open);
            }
        }
        Ok(DeployedService {
            name: spec.name.clone(),
            url,
        })
    }

    async fn update_service_env(
        &self,
        service: &str,
        _region: &str,
        env: &BTreeMap<String, String>,
    ) -> Result<(), ControlPlaneError> {
        let mut state = self.state.lock().unwrap();
        state.mutations += 1;
        let entry = state
            .services
            .get_mut(service)
            .ok_or_else(|| ControlPlaneError::NotFound(format!("service/{}", service)))?;
        entry.spec.env.extend(env.clone());
        Ok(())
    }

    async fn service_env(
        &self,
        service: &str,
        _region: &str,
    ) -> Result<BTreeMap<String, String>, ControlPlaneError> {
        let state = self.state.lock().unwrap();
        state
            .services
            .get(service)
            .map(|s| s.spec.env.clone())
            .ok_or_else(|| ControlPlaneError::NotFound(format!("service/{}", service)))
    }

    async fn service_url(&self, service: &str, _region: &str) -> Result<String, ControlPlaneError> {
        let state = self.state.lock().unwrap();
        state
            .services
            .get(service)
            .map(|s| s.url.clone())
            .ok_or_else(|| ControlPlaneError::NotFound(format!("service/{}", service)))
    }

    async fn invoker_bindings(
        &self,
        service: &str,
        _region: &str,
    ) -> Result<Vec<PolicyBinding>, ControlPlaneError> {
        let state = self.state.lock().unwrap();
        if !state.services.contains_key(service) {
            return Err(ControlPlaneError::NotFound(format!("service/{}", service)));
        }
        Ok(state.bindings.get(service).cloned().unwrap_or_default())
    }

    async fn add_invoker_binding(
        &self,
        service: &str,
        _region: &str,
        principal: &Principal,
    ) -> Result<(), ControlPlaneError> {
        let mut state = self.state.lock().unwrap();
        state.mutations += 1;
        if !state.services.contains_key(service) {
            return Err(ControlPlaneError::NotFound(format!("service/{}", service)));
        }
        let bindings = state.bindings.entry(service.to_string()).or_default();
        let binding = PolicyBinding {
            principal: principal.clone(),
            role: RUN_INVOKER_ROLE.to_string(),
        };
        if !bindings.contains(&binding) {
            bindings.push(binding);
        }
        Ok(())
    }

    async fn remove_invoker_binding(
        &self,
        service: &str,
        _region: &str,
        principal: &Principal,
    ) -> Result<(), ControlPlaneError> {
        let mut state = self.state.lock().unwrap();
        state.mutations += 1;
        let bindings = state
            .bindings
            .get_mut(service)
            .ok_or_else(|| ControlPlaneError::NotFound(format!("service/{}", service)))?;
        let before = bindings.len();
        bindings.retain(|b| !(b.principal == *principal && b.role == RUN_INVOKER_ROLE));
        if bindings.len() == before {
            return Err(ControlPlaneError::NotFound(format!(
                "binding {} on service/{}",
                principal, service
            )));
        }
        Ok(())
    }

    async fn grant_project_role(
        &self,
        member: &Principal,
        role: &str,
    ) -> Result<(), ControlPlaneError> {
        let mut state = self.state.lock().unwrap();
        state.mutations += 1;
        state.project_roles.insert((member.member(), role.to_string()));
        Ok(())
    }

    async fn enable_iap(&self, backend_service: &str) -> Result<(), ControlPlaneError> {
        let mut state = self.state.lock().unwrap();
        state.mutations += 1;
        let desc = ResourceDescriptor::global(ResourceKind::BackendService, backend_service);
        if !state.resources.contains_key(&key(&desc)) {
            return Err(ControlPlaneError::NotFound(desc.to_string()));
        }
        state.iap_enabled.insert(backend_service.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network() -> ResourceSpec {
        ResourceSpec::Network {
            name: "agent-vpc".into(),
        }
    }

    #[tokio::test]
    async fn create_then_describe_then_duplicate() {
        let plane = FakeControlPlane::new();
        let spec = network();
        let desc = spec.descriptor();

        assert!(plane.describe(&desc).await.unwrap().is_none());
        plane.create(&spec).await.unwrap();
        assert!(plane.describe(&desc).await.unwrap().is_some());

        let err = plane.create(&spec).await.unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn redeploy_keeps_url_stable() {
        let plane = FakeControlPlane::new();
        let spec = ServiceSpec {
            name: "agent-api".into(),
            image: "img:1".into(),
            region: "us-central1".into(),
            service_account: None,
            vpc_connector: None,
            env: BTreeMap::new(),
            allow_unauthenticated: true,
        };
        let first = plane.deploy_service(&spec).await.unwrap();
        let second = plane
            .deploy_service(&ServiceSpec {
                image: "img:2".into(),
                ..spec
            })
            .await
            .unwrap();
        assert_eq!(first.url, second.url);
    }

    #[tokio::test]
    async fn removing_absent_binding_reports_not_found() {
        let plane = FakeControlPlane::new();
        plane.seed_service("agent-api", "us-central1", BTreeMap::new(), Vec::new());
        let err = plane
            .remove_invoker_binding("agent-api", "us-central1", &Principal::AllUsers)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn poisoned_probe_fails_hard() {
        let plane = FakeControlPlane::new();
        let desc = network().descriptor();
        plane.poison(&desc);
        let err = plane.describe(&desc).await.unwrap_err();
        assert!(!err.is_not_found() && !err.is_already_exists());
    }
}
