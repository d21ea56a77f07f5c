//! Application stage: deploy the API and UI services and thread their
//! cross-references.
//!
//! The two services name each other (the API's CORS allowlist needs the
//! UI's URL and the UI needs the API's URL), so this is an explicit
//! two-phase deploy: phase 1 brings both up with placeholder
//! cross-references, phase 2 patches both with the resolved URLs. The JWT
//! signing key is resolved before anything is deployed so a redeploy can
//! never mint a new one.

use async_trait::async_trait;
use std::collections::BTreeMap;

use gantry_core::ServiceSpec;
use gantry_secret::{JWT_SECRET_ENV, JwtSecret};

use crate::context::StageContext;
use crate::error::StageError;
use crate::stages::Stage;

/// CORS allowlist consumed by the API service.
pub const CORS_ENV: &str = "ALLOWED_ORIGINS";
/// API address consumed by the UI service.
pub const API_URL_ENV: &str = "API_BASE_URL";
/// Reasoning-engine discovery fallback consumed by the API service.
pub const ENGINE_ENV: &str = "REASONING_ENGINE_ID";

/// Phase-1 value for both cross-reference variables, replaced in phase 2.
const PLACEHOLDER: &str = "pending";

pub struct ApplicationStage;

#[async_trait]
impl Stage for ApplicationStage {
    fn name(&self) -> &'static str {
        "applications"
    }

    async fn run(&self, cx: &mut StageContext<'_>) -> Result<(), StageError> {
        let config = cx.config;

        if cx.dry_run {
            cx.step_warn(format!(
                "would deploy {} and {} and patch their cross-references",
                config.api_service, config.ui_service
            ));
            return Ok(());
        }

        let secret = JwtSecret::resolve(cx.plane, &config.api_service, &config.region).await?;
        cx.step_ok(format!(
            "signing key {}",
            match secret.source() {
                gantry_secret::SecretSource::Reused => "reused from live deployment",
                gantry_secret::SecretSource::Generated => "generated (first deployment)",
            }
        ));

        // Phase 1: both services up, cross-references pending.
        let mut api_env = BTreeMap::new();
        api_env.insert("GOOGLE_CLOUD_PROJECT".to_string(), config.project_id.clone());
        api_env.insert("GOOGLE_CLOUD_REGION".to_string(), config.region.clone());
        api_env.insert(JWT_SECRET_ENV.to_string(), secret.expose().to_string());
        api_env.insert(CORS_ENV.to_string(), PLACEHOLDER.to_string());
        if let Some(engine) = &config.reasoning_engine_id {
            api_env.insert(ENGINE_ENV.to_string(), engine.clone());
        }

        let api = deploy(cx, &config.api_service, config.api_image(), api_env).await?;
        cx.step_ok(format!("deployed {} at {}", api.name, api.url));

        let mut ui_env = BTreeMap::new();
        ui_env.insert(API_URL_ENV.to_string(), PLACEHOLDER.to_string());

        let ui = deploy(cx, &config.ui_service, config.ui_image(), ui_env).await?;
        cx.step_ok(format!("deployed {} at {}", ui.name, ui.url));

        // Phase 2: patch the resolved URLs into both sides.
        let mut cors = BTreeMap::new();
        cors.insert(CORS_ENV.to_string(), ui.url.clone());
        cx.plane
            .update_service_env(&config.api_service, &config.region, &cors)
            .await?;
        cx.step_ok(format!("{}: {} = {}", config.api_service, CORS_ENV, ui.url));

        let mut api_ref = BTreeMap::new();
        api_ref.insert(API_URL_ENV.to_string(), api.url.clone());
        cx.plane
            .update_service_env(&config.ui_service, &config.region, &api_ref)
            .await?;
        cx.step_ok(format!("{}: {} = {}", config.ui_service, API_URL_ENV, api.url));

        cx.outputs.api_url = Some(api.url);
        cx.outputs.ui_url = Some(ui.url);
        cx.outputs.jwt_secret = Some(secret.expose().to_string());
        cx.outputs.reasoning_engine_id = config.reasoning_engine_id.clone();

        Ok(())
    }
}

async fn deploy(
    cx: &StageContext<'_>,
    service: &str,
    image: String,
    env: BTreeMap<String, String>,
) -> Result<gantry_core::DeployedService, StageError> {
    let config = cx.config;
    let spec = ServiceSpec {
        name: service.to_string(),
        image,
        region: config.region.clone(),
        service_account: Some(
            config.service_account_email(&config.service_account_id(service)),
        ),
        vpc_connector: Some(config.connector.clone()),
        env,
        // Deployed open; the hardening stage narrows the ACL to the
        // configured policy afterwards.
        allow_unauthenticated: true,
    };
    cx.plane
        .deploy_service(&spec)
        .await
        .map_err(|source| StageError::Deploy {
            service: service.to_string(),
            source,
        })
}
