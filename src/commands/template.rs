use anyhow::Context;
use preinstall_diagnostics::client;
use preinstall_diagnostics::cluster::list_node_names;
use preinstall_diagnostics::config::{DeploymentMode, DiagnosticsConfig};
use preinstall_diagnostics::resources::ResourcePlan;

use crate::cli::TemplateArgs;

/// Print the manifests `run` would apply. Only Job mode needs node names;
/// they are read from the cluster unless given with `--node`.
pub async fn run(args: TemplateArgs) -> anyhow::Result<()> {
    let config = args.deploy.into_config();

    let nodes = if config.mode == DeploymentMode::Job && args.nodes.is_empty() {
        let client = client::shared()
            .await
            .context("Failed to connect to Kubernetes cluster (pass --node to render offline)")?;
        list_node_names(&client)
            .await
            .context("Failed to list cluster nodes")?
    } else {
        args.nodes
    };

    print!("{}", render(&config, &nodes)?);
    Ok(())
}

fn render(config: &DiagnosticsConfig, nodes: &[String]) -> anyhow::Result<String> {
    ResourcePlan::new(config, nodes)
        .context("Failed to plan diagnostics resources")?
        .render_yaml()
        .context("Failed to render resources as YAML")
}
