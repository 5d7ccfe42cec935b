use anyhow::Context;
use kube::Client;
use tracing::{info, warn};

use preinstall_diagnostics::checks::reachability::http_client;
use preinstall_diagnostics::checks::{ExternalContext, run_external};
use preinstall_diagnostics::cluster::{
    collect_node_results, create_resources, list_diagnostics_pods, list_node_names,
    pod_logs_until_complete, wait_daemonset_available, wait_jobs_finished,
};
use preinstall_diagnostics::config::{
    DeploymentMode, DiagnosticsConfig, JOBS_POLL_INTERVAL, JOBS_TIMEOUT, NAMESPACE,
};
use preinstall_diagnostics::poll::Poller;
use preinstall_diagnostics::report::{CheckLog, NodeResult, ResultsTable};
use preinstall_diagnostics::resources::ResourcePlan;

use super::{connect, shutdown_signal, teardown};
use crate::cli::RunArgs;

pub async fn run(args: RunArgs) -> anyhow::Result<()> {
    let config = args.deploy.into_config();
    let mut log = match &args.output {
        Some(path) => CheckLog::to_file(path)
            .with_context(|| format!("Failed to create output file {}", path.display()))?,
        None => CheckLog::stdout(),
    };

    println!("Running pre-install diagnostics ({} mode)...\n", config.mode);
    info!(mode = %config.mode, "diagnostics_starting");

    let client = connect().await?;

    let node_names = list_node_names(&client)
        .await
        .context("Failed to list cluster nodes")?;
    println!("  Cluster nodes ............... {}", node_names.len());

    let plan = ResourcePlan::new(&config, &node_names)
        .context("Failed to plan diagnostics resources")?;
    teardown(&client, &ResourcePlan::teardown(), "Previous deployment cleanup").await?;

    println!("\nRunning external cluster checks...\n");
    let ctx = ExternalContext {
        client: client.clone(),
        cluster_fqdn: config.cluster_fqdn.clone(),
        http: http_client().context("Failed to build HTTP client")?,
    };
    let external = run_external(&ctx, &mut log).await;

    print!("  Deploy diagnostics .......... ");
    if let Err(e) = create_resources(&client, &plan).await {
        println!("FAIL");
        teardown(&client, &plan, "Cleanup").await?;
        return Err(e).context("Failed to deploy diagnostics resources");
    }
    println!("OK ({} objects)", plan.creation_order().len());

    println!("\nRunning internal cluster checks...\n");
    let collected = tokio::select! {
        result = collect(&client, &config, &node_names, &mut log) => result,
        _ = shutdown_signal() => {
            warn!("run_interrupted");
            Err(anyhow::anyhow!("Interrupted while waiting for node results"))
        }
    };

    teardown(&client, &plan, "Cleanup").await?;
    let nodes = collected?;
    log.flush()?;

    let mut table = ResultsTable::new();
    external.into_iter().for_each(|r| table.add_check(r));
    nodes.into_iter().for_each(|n| table.add_node(n));

    println!();
    println!("{}", table.render());

    if !table.all_passed() {
        anyhow::bail!("Some diagnostics checks failed");
    }
    println!("\nAll diagnostics checks passed.");
    Ok(())
}

async fn collect(
    client: &Client,
    config: &DiagnosticsConfig,
    node_names: &[String],
    log: &mut CheckLog,
) -> anyhow::Result<Vec<NodeResult>> {
    match config.mode {
        DeploymentMode::Job => collect_from_jobs(client, node_names).await,
        DeploymentMode::DaemonSet => collect_from_daemonset(client, log).await,
    }
}

/// Wait for every Job to finish, then read the ConfigMaps the nodes published.
async fn collect_from_jobs(client: &Client, node_names: &[String]) -> anyhow::Result<Vec<NodeResult>> {
    print!("  Waiting for node jobs ....... ");
    let poller = Poller::with_timeout(JOBS_POLL_INTERVAL, JOBS_TIMEOUT);
    match wait_jobs_finished(client, &poller).await {
        Ok(()) => println!("OK"),
        Err(e) => {
            println!("TIMEOUT");
            warn!(error = %e, "jobs_not_finished");
        }
    }

    collect_node_results(client, node_names)
        .await
        .context("Failed to read node results")
}

/// Wait for the DaemonSet, then follow each pod's log to completion.
async fn collect_from_daemonset(client: &Client, log: &mut CheckLog) -> anyhow::Result<Vec<NodeResult>> {
    print!("  Waiting for daemonset ....... ");
    wait_daemonset_available(client, &Poller::default())
        .await
        .context("DaemonSet did not become available")?;
    println!("OK");

    let pods = list_diagnostics_pods(client, NAMESPACE)
        .await
        .context("Failed to list diagnostics pods")?;

    let mut nodes = Vec::with_capacity(pods.len());
    for pod in &pods {
        let pod_name = pod.metadata.name.clone().unwrap_or_default();
        let node_name = pod
            .spec
            .as_ref()
            .and_then(|s| s.node_name.clone())
            .unwrap_or_else(|| pod_name.clone());

        let pod_log = pod_logs_until_complete(client, &pod_name, &Poller::default())
            .await
            .with_context(|| format!("Failed to read log of pod {pod_name}"))?;

        log.write_line(&format!("===== node {node_name} ({pod_name}) ====="));
        for line in pod_log.lines() {
            log.write_line(line);
        }
        nodes.push(NodeResult::from_log(&node_name, &pod_log));
    }

    Ok(nodes)
}
