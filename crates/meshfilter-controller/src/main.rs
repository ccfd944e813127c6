//! meshfilter controller binary

use std::sync::Arc;

use clap::Parser;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};

use meshfilter_common::crd::{Consumer, HttpFilterPolicy};
use meshfilter_common::telemetry::{init_telemetry, TelemetryConfig};
use meshfilter_controller::config::{Cli, LogFormat};
use meshfilter_controller::controller::Context;
use meshfilter_controller::runner::build_controllers;
use meshfilter_controller::store::KubeStore;
use meshfilter_controller::FIELD_MANAGER;
use meshfilter_translation::PluginRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let crds = [HttpFilterPolicy::crd(), Consumer::crd()]
            .iter()
            .map(serde_yaml::to_string)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{}", crds.join("---\n"));
        return Ok(());
    }

    init_telemetry(TelemetryConfig {
        service_name: "meshfilter-controller".to_string(),
        json: cli.log_format == LogFormat::Json,
        ..Default::default()
    })?;

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;
    ensure_crds_installed(&client).await?;

    let registry = PluginRegistry::with_builtin();
    tracing::info!(plugins = ?registry.names().collect::<Vec<_>>(), "plugin registry loaded");

    let ctx = Arc::new(Context::new(
        Arc::new(KubeStore::new(client.clone())),
        registry,
        cli.translation_config(),
        cli.requeue(),
    ));

    tracing::info!(
        root_namespace = %ctx.config.root_namespace,
        "Starting meshfilter controllers"
    );
    futures::future::join_all(build_controllers(client, ctx)).await;
    tracing::info!("Controllers stopped");
    Ok(())
}

/// Install the meshfilter CRDs so their schema matches this binary
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for crd in [HttpFilterPolicy::crd(), Consumer::crd()] {
        let name = crd.metadata.name.clone().unwrap_or_default();
        tracing::info!(crd = %name, "Installing CRD");
        crds.patch(&name, &params, &Patch::Apply(&crd))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to install CRD {}: {}", name, e))?;
    }
    Ok(())
}
