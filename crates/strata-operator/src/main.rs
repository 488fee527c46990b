//! Strata operator - declarative provisioning against a remote platform

use clap::{Parser, Subcommand};
use kube::{Api, Client, CustomResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use strata_common::crd::{ClusterWorkspace, ServiceBinding, ServiceInstance, Workspace};
use strata_operator::controller_runner::{build_service_controllers, build_workspace_controllers};

/// Strata - Kubernetes operator for remote workspace and service provisioning
#[derive(Parser, Debug)]
#[command(name = "strata", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    ///
    /// Watches Workspace, ClusterWorkspace, ServiceInstance, and
    /// ServiceBinding resources and reconciles them against the remote
    /// platform.
    Controller,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.crd {
        print_crds()?;
        return Ok(());
    }

    match cli.command {
        Some(Commands::Controller) | None => run_controller().await,
    }
}

/// Dump all CRD manifests as one multi-document YAML stream
fn print_crds() -> anyhow::Result<()> {
    let crds = [
        serde_yaml::to_string(&Workspace::crd())?,
        serde_yaml::to_string(&ClusterWorkspace::crd())?,
        serde_yaml::to_string(&ServiceInstance::crd())?,
        serde_yaml::to_string(&ServiceBinding::crd())?,
    ];
    for crd in crds {
        println!("---");
        print!("{crd}");
    }
    Ok(())
}

/// Ensure all Strata CRDs are installed
///
/// The operator installs its own CRDs on startup using server-side apply,
/// so the CRD versions always match the operator version.
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::api::{Patch, PatchParams};

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply("strata-operator").force();

    tracing::info!("Installing Workspace CRD...");
    crds.patch(
        "workspaces.strata.dev",
        &params,
        &Patch::Apply(&Workspace::crd()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install Workspace CRD: {}", e))?;

    tracing::info!("Installing ClusterWorkspace CRD...");
    crds.patch(
        "clusterworkspaces.strata.dev",
        &params,
        &Patch::Apply(&ClusterWorkspace::crd()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install ClusterWorkspace CRD: {}", e))?;

    tracing::info!("Installing ServiceInstance CRD...");
    crds.patch(
        "serviceinstances.strata.dev",
        &params,
        &Patch::Apply(&ServiceInstance::crd()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install ServiceInstance CRD: {}", e))?;

    tracing::info!("Installing ServiceBinding CRD...");
    crds.patch(
        "servicebindings.strata.dev",
        &params,
        &Patch::Apply(&ServiceBinding::crd()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install ServiceBinding CRD: {}", e))?;

    tracing::info!("All Strata CRDs installed/updated");
    Ok(())
}

async fn run_controller() -> anyhow::Result<()> {
    let client = Client::try_default().await?;

    ensure_crds_installed(&client).await?;

    tracing::info!("Starting controllers:");
    let mut controllers = build_workspace_controllers(client.clone());
    controllers.extend(build_service_controllers(client));

    futures::future::join_all(controllers).await;

    tracing::info!("All controllers terminated, shutting down");
    Ok(())
}
