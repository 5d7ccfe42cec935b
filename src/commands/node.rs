use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use tracing::info;

use preinstall_diagnostics::checks::clock_skew::{PingClock, serve_ping};
use preinstall_diagnostics::checks::reachability::http_client;
use preinstall_diagnostics::checks::{InternalContext, NodeIdentity, run_internal};
use preinstall_diagnostics::client;
use preinstall_diagnostics::cluster::publish_node_results;
use preinstall_diagnostics::config::{
    DeploymentMode, NODE_NAME_ENV, POD_NAME_ENV, non_empty,
};
use preinstall_diagnostics::error::DiagnosticsError;
use preinstall_diagnostics::report::CheckLog;

use super::shutdown_signal;
use crate::cli::NodeArgs;

fn identity(args: &NodeArgs) -> Result<NodeIdentity, DiagnosticsError> {
    let node_name = non_empty(args.node_name.clone()).ok_or(DiagnosticsError::MissingEnv(NODE_NAME_ENV))?;
    let pod_name = non_empty(args.pod_name.clone()).ok_or(DiagnosticsError::MissingEnv(POD_NAME_ENV))?;
    Ok(NodeIdentity {
        node_name,
        pod_name,
        namespace: args.namespace.clone(),
    })
}

pub async fn run(args: NodeArgs) -> anyhow::Result<()> {
    let identity = identity(&args)?;
    info!(node = %identity.node_name, pod = %identity.pod_name, mode = %args.mode, "node_agent_starting");

    let (addr, server) = serve_ping(SocketAddr::from(([0, 0, 0, 0], args.port)), PingClock::system())
        .await
        .with_context(|| format!("Failed to bind ping server on :{}", args.port))?;
    info!(addr = %addr, "ping_server_ready");

    let client = client::shared()
        .await
        .context("Failed to load in-cluster credentials")?;

    let mut ctx = InternalContext::new(
        client.clone(),
        identity.clone(),
        args.mode,
        http_client().context("Failed to build HTTP client")?,
    );
    ctx.backend_fqdn = non_empty(args.backend_fqdn.clone());
    if let Some(registry) = non_empty(args.registry.clone()) {
        ctx.registry_url = registry;
    }
    if let Some(saas) = non_empty(args.saas_address.clone()) {
        ctx.saas_address = saas;
    }

    let mut log = CheckLog::stdout();
    let results = run_internal(&ctx, &mut log).await;

    match args.mode {
        DeploymentMode::Job => {
            publish_node_results(&client, &identity.namespace, &identity.node_name, &results)
                .await
                .context("Failed to publish node results")?;
            log.complete();
            log.flush()?;

            // Slower peers may still be pinging this pod.
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(args.linger_secs)) => {}
                _ = shutdown_signal() => {}
            }
        }
        DeploymentMode::DaemonSet => {
            log.complete();
            log.flush()?;
            shutdown_signal().await;
        }
    }

    server.abort();
    info!(node = %identity.node_name, "node_agent_stopped");
    Ok(())
}
