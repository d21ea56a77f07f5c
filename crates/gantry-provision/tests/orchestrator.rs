//! End-to-end orchestrator runs against the in-memory control plane.
//!
//! Run with: cargo test --package gantry-provision --test orchestrator

use gantry_core::{
    AccessControlKind, AccessPolicy, DeploymentConfig, Principal, ResourceDescriptor, ResourceKind,
};
use gantry_gcloud::{ControlPlane, FakeControlPlane};
use gantry_provision::stages::apps::{API_URL_ENV, CORS_ENV};
use gantry_provision::{StageContext, deployment_stages, run_sequence, teardown};
use gantry_secret::JWT_SECRET_ENV;

fn demo_config() -> DeploymentConfig {
    DeploymentConfig {
        project_id: "demo".into(),
        domain: Some("agent.example.com".into()),
        access: AccessPolicy::new(AccessControlKind::Domain, "example.com"),
        ..Default::default()
    }
}

#[tokio::test]
async fn fresh_project_full_sequence() {
    let config = demo_config();
    let plane = FakeControlPlane::new();
    let stages = deployment_stages(false);

    let mut cx = StageContext::new(&config, &plane, false);
    run_sequence(&mut cx, &stages).await.unwrap();

    // Services up, cross-references resolved both ways.
    let api = plane.service("agent-api").unwrap();
    let ui = plane.service("agent-ui").unwrap();
    assert_eq!(api.spec.env.get(CORS_ENV), Some(&ui.url));
    assert_eq!(ui.spec.env.get(API_URL_ENV), Some(&api.url));

    // Hardened: no broad members, exactly the policy-derived binding.
    for service in ["agent-api", "agent-ui"] {
        let members: Vec<_> = plane
            .bindings_of(service)
            .into_iter()
            .map(|b| b.principal)
            .collect();
        assert_eq!(members, vec![Principal::Domain("example.com".into())]);
    }

    // Outputs threaded for the operator summary.
    assert_eq!(cx.outputs.api_url.as_deref(), Some(api.url.as_str()));
    assert_eq!(cx.outputs.ui_url.as_deref(), Some(ui.url.as_str()));
    assert!(cx.outputs.jwt_secret.is_some());
}

#[tokio::test]
async fn full_sequence_twice_is_idempotent() {
    let config = demo_config();
    let plane = FakeControlPlane::new();
    let stages = deployment_stages(true);

    let mut cx = StageContext::new(&config, &plane, false);
    run_sequence(&mut cx, &stages).await.unwrap();

    let secret_after_first = plane
        .service("agent-api")
        .unwrap()
        .spec
        .env
        .get(JWT_SECRET_ENV)
        .cloned()
        .unwrap();
    let bindings_after_first = plane.bindings_of("agent-api");

    let mut cx = StageContext::new(&config, &plane, false);
    run_sequence(&mut cx, &stages).await.unwrap();

    // The signing key survives the redeploy and the ACL is unchanged.
    let secret_after_second = plane
        .service("agent-api")
        .unwrap()
        .spec
        .env
        .get(JWT_SECRET_ENV)
        .cloned()
        .unwrap();
    assert_eq!(secret_after_first, secret_after_second);
    assert_eq!(plane.bindings_of("agent-api"), bindings_after_first);
}

#[tokio::test]
async fn routing_variant_builds_the_lb_chain() {
    let config = demo_config();
    let plane = FakeControlPlane::new();
    let stages = deployment_stages(true);

    let mut cx = StageContext::new(&config, &plane, false);
    run_sequence(&mut cx, &stages).await.unwrap();

    assert!(plane.has_resource(&ResourceDescriptor::global(
        ResourceKind::ForwardingRule,
        "agent-ui-https"
    )));
    assert!(plane.iap_enabled("agent-api-backend"));
    assert!(plane.iap_enabled("agent-ui-backend"));
}

#[tokio::test]
async fn failure_halts_and_leaves_prior_stages_in_place() {
    let config = demo_config();
    let plane = FakeControlPlane::new();
    // Poison a resource the IAM stage probes; infrastructure has already
    // run by then.
    plane.poison(&ResourceDescriptor::project(
        ResourceKind::CustomRole,
        "agentAppAccess",
    ));
    let stages = deployment_stages(false);

    let mut cx = StageContext::new(&config, &plane, false);
    run_sequence(&mut cx, &stages).await.unwrap_err();

    // Infrastructure resources persist; later stages never ran.
    assert!(plane.has_resource(&ResourceDescriptor::global(
        ResourceKind::Network,
        "agent-vpc"
    )));
    assert!(plane.service("agent-api").is_none());
}

#[tokio::test]
async fn dry_run_sequence_observes_only() {
    let config = demo_config();
    let plane = FakeControlPlane::new();
    let stages = deployment_stages(true);

    let mut cx = StageContext::new(&config, &plane, true);
    run_sequence(&mut cx, &stages).await.unwrap();
    assert_eq!(plane.mutation_count(), 0);
    assert!(plane.enabled_apis().await.unwrap().is_empty());
}

#[tokio::test]
async fn teardown_after_deploy_leaves_a_clean_project() {
    let config = demo_config();
    let plane = FakeControlPlane::new();
    let stages = deployment_stages(true);

    let mut cx = StageContext::new(&config, &plane, false);
    run_sequence(&mut cx, &stages).await.unwrap();

    let cx = StageContext::new(&config, &plane, false);
    let summary = teardown(&cx).await.unwrap();
    assert_eq!(summary.failed, 0);
    assert!(summary.deleted > 0);

    assert!(plane.service("agent-api").is_none());
    assert!(plane.service("agent-ui").is_none());
    assert!(!plane.has_resource(&ResourceDescriptor::global(
        ResourceKind::Network,
        "agent-vpc"
    )));

    // Teardown twice: everything already absent, still clean.
    let cx = StageContext::new(&config, &plane, false);
    let summary = teardown(&cx).await.unwrap();
    assert_eq!(summary.deleted, 0);
    assert_eq!(summary.failed, 0);
}
