use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use gantry_core::{DeploymentConfig, Overrides};
use gantry_gcloud::GcloudControlPlane;
use gantry_provision::stages::{
    ApplicationStage, HardeningStage, IamStage, InfrastructureStage, RoutingStage, Stage,
};
use gantry_provision::{StageContext, deployment_stages, run_sequence, teardown};
use gantry_verify::Verifier;

#[derive(Parser, Debug)]
#[command(
    name = "gantry",
    version,
    about = "Idempotent deployment orchestrator for the agent stack on Google Cloud"
)]
struct Cli {
    /// Target project id.
    #[arg(long, env = "PROJECT_ID", global = true)]
    project: Option<String>,

    /// Deployment region (default: us-central1).
    #[arg(long, env = "REGION", global = true)]
    region: Option<String>,

    /// Public domain for the load-balancer variant.
    #[arg(long, env = "DOMAIN", global = true)]
    domain: Option<String>,

    /// Access policy kind: domain, group, users or all-authenticated.
    #[arg(long = "access-type", env = "ACCESS_CONTROL_TYPE", global = true)]
    access_type: Option<String>,

    /// Access policy value (domain name, group address, or a
    /// comma-separated user list).
    #[arg(long = "access-value", env = "ACCESS_CONTROL_VALUE", global = true)]
    access_value: Option<String>,

    /// Reasoning-engine identifier threaded into the API's environment.
    #[arg(long, env = "REASONING_ENGINE_ID", global = true)]
    reasoning_engine_id: Option<String>,

    /// Deployment manifest (optional; environment variables win).
    #[arg(long, default_value = "gantry.yaml", global = true)]
    config: PathBuf,

    /// Suppress interactive confirmation.
    #[arg(short = 'y', long = "yes", global = true)]
    yes: bool,

    /// Report planned actions without mutating anything.
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Provision APIs, network, identities, database and LB prerequisites.
    Infra,

    /// Create the custom role and grant runtime identities their roles.
    Iam,

    /// Deploy the API and UI services and thread their cross-references.
    Apps,

    /// Build the load-balancer chain and enable perimeter auth (IAP).
    Routing,

    /// Replace open access bindings with the configured policy.
    Harden,

    /// Run the full sequence: infra, iam, apps, [routing], harden.
    Deploy {
        /// Include the load-balancer + IAP routing stage.
        #[arg(long)]
        with_routing: bool,
    },

    /// Read-only audit of the deployment. Exits non-zero on failure.
    Verify {
        /// Emit the machine-readable report instead of the summary.
        #[arg(long)]
        json: bool,
    },

    /// Delete everything the stages created, in reverse order.
    Teardown,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let cli = Cli::parse();

    let overrides = Overrides {
        project_id: cli.project.clone(),
        region: cli.region.clone(),
        domain: cli.domain.clone(),
        access_kind: cli.access_type.clone(),
        access_value: cli.access_value.clone(),
        reasoning_engine_id: cli.reasoning_engine_id.clone(),
    };
    let config = DeploymentConfig::load(Some(&cli.config), overrides)?;
    tracing::info!(project = %config.project_id, region = %config.region, "configuration loaded");

    let plane = GcloudControlPlane::new(&config.project_id);

    let mut cx = StageContext::new(&config, &plane, cli.dry_run);

    match cli.cmd {
        Command::Infra => run_one(&mut cx, Box::new(InfrastructureStage)).await?,
        Command::Iam => run_one(&mut cx, Box::new(IamStage)).await?,
        Command::Apps => run_one(&mut cx, Box::new(ApplicationStage)).await?,
        Command::Routing => run_one(&mut cx, Box::new(RoutingStage)).await?,
        Command::Harden => run_one(&mut cx, Box::new(HardeningStage)).await?,

        Command::Deploy { with_routing } => {
            confirm(
                &format!(
                    "Deploy to project '{}' in {}?",
                    config.project_id, config.region
                ),
                cli.yes || cli.dry_run,
            )?;
            let stages = deployment_stages(with_routing);
            run_sequence(&mut cx, &stages).await?;
            print_deploy_summary(&cx);
        }

        Command::Verify { json } => {
            let report = Verifier::new(&config, &plane).run().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                report.print_summary();
            }
            if !report.passed() {
                std::process::exit(1);
            }
        }

        Command::Teardown => {
            confirm(
                &format!(
                    "Delete all deployed resources in project '{}'?",
                    config.project_id
                ),
                cli.yes || cli.dry_run,
            )?;
            let summary = teardown(&cx).await?;
            println!(
                "Teardown complete: {} deleted, {} already absent, {} failed",
                summary.deleted, summary.absent, summary.failed
            );
            if summary.failed > 0 {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

async fn run_one(
    cx: &mut StageContext<'_>,
    stage: Box<dyn Stage>,
) -> Result<(), gantry_provision::StageError> {
    run_sequence(cx, std::slice::from_ref(&stage)).await
}

fn print_deploy_summary(cx: &StageContext<'_>) {
    println!();
    println!("✔ Deployment complete.");
    if let Some(url) = &cx.outputs.api_url {
        println!("  API: {}", url);
    }
    if let Some(url) = &cx.outputs.ui_url {
        println!("  UI:  {}", url);
    }
    if let Some(ip) = &cx.outputs.load_balancer_ip {
        println!("  LB:  {}", ip);
    }
}

/// Interactive yes/no gate for destructive or expensive commands.
fn confirm(prompt: &str, assume_yes: bool) -> anyhow::Result<()> {
    if assume_yes {
        return Ok(());
    }
    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let answer = line.trim().to_lowercase();
    if answer == "y" || answer == "yes" {
        Ok(())
    } else {
        Err(anyhow::anyhow!("aborted by user"))
    }
}
