//! The ordered deployment stages.

pub mod apps;
pub mod hardening;
pub mod infrastructure;
pub mod iam;
pub mod routing;

use async_trait::async_trait;

use crate::context::StageContext;
use crate::error::StageError;

pub use apps::ApplicationStage;
pub use hardening::HardeningStage;
pub use iam::IamStage;
pub use infrastructure::InfrastructureStage;
pub use routing::RoutingStage;

/// One ordered step of the deployment sequence, safe to re-run.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, cx: &mut StageContext<'_>) -> Result<(), StageError>;
}

/// The full mutation sequence for one deployment, in dependency order.
/// The routing stage is the optional load-balancer + IAP variant.
pub fn deployment_stages(with_routing: bool) -> Vec<Box<dyn Stage>> {
    let mut stages: Vec<Box<dyn Stage>> = vec![
        Box::new(InfrastructureStage),
        Box::new(IamStage),
        Box::new(ApplicationStage),
    ];
    if with_routing {
        stages.push(Box::new(RoutingStage));
    }
    stages.push(Box::new(HardeningStage));
    stages
}
