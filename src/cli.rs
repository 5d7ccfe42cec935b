use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use preinstall_diagnostics::config::{
    BACKEND_FQDN_ENV, DEFAULT_IMAGE, DEFAULT_LINGER, DeploymentMode, DiagnosticsConfig, MODE_ENV,
    NAMESPACE, NODE_NAME_ENV, PING_PORT, POD_NAME_ENV, POD_NAMESPACE_ENV, REGISTRY_ENV,
    SAAS_ADDRESS_ENV, non_empty,
};
use preinstall_diagnostics::logging::LogFormat;

#[derive(Parser)]
#[command(name = "preinstall-diagnostics")]
#[command(about = "Run:AI pre-installation diagnostics for Kubernetes clusters")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Format of diagnostic events written to stderr
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Deploy the diagnostics resources, run all checks and clean up
    Run(RunArgs),

    /// Delete everything a previous run may have left behind
    Clean,

    /// Print the resources `run` would deploy, without touching the cluster
    Template(TemplateArgs),

    /// In-cluster agent: run the node checks (started by the deployed pods)
    Node(NodeArgs),

    /// Display application version
    Version,
}

/// Settings shaping the deployed resources.
#[derive(Args, Debug, Clone)]
pub struct DeployArgs {
    /// Backend FQDN the nodes should resolve
    #[arg(long)]
    pub backend_fqdn: Option<String>,

    /// Cluster FQDN the TLS certificate must cover
    #[arg(long)]
    pub cluster_fqdn: Option<String>,

    /// Diagnostics image to run on the nodes
    #[arg(long, default_value = DEFAULT_IMAGE)]
    pub image: String,

    /// Image pull secret for the diagnostics image
    #[arg(long)]
    pub image_pull_secret: Option<String>,

    /// Container registry URL the nodes should reach
    #[arg(long)]
    pub registry: Option<String>,

    /// SaaS address the nodes should reach
    #[arg(long)]
    pub saas_address: Option<String>,

    /// Workload carrying the node checks
    #[arg(long, value_enum, default_value_t = DeploymentMode::Job)]
    pub mode: DeploymentMode,
}

impl DeployArgs {
    pub fn into_config(self) -> DiagnosticsConfig {
        DiagnosticsConfig {
            backend_fqdn: non_empty(self.backend_fqdn),
            cluster_fqdn: non_empty(self.cluster_fqdn),
            image: non_empty(Some(self.image)).unwrap_or_else(|| DEFAULT_IMAGE.to_string()),
            image_pull_secret: non_empty(self.image_pull_secret),
            registry: non_empty(self.registry),
            saas_address: non_empty(self.saas_address),
            mode: self.mode,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub deploy: DeployArgs,

    /// File to write the check log to (replaced if it exists)
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct TemplateArgs {
    #[command(flatten)]
    pub deploy: DeployArgs,

    /// Node to render a Job for (repeatable); defaults to the cluster's nodes
    #[arg(long = "node")]
    pub nodes: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct NodeArgs {
    #[arg(long, env = NODE_NAME_ENV)]
    pub node_name: Option<String>,

    #[arg(long, env = POD_NAME_ENV)]
    pub pod_name: Option<String>,

    #[arg(long, env = POD_NAMESPACE_ENV, default_value = NAMESPACE)]
    pub namespace: String,

    #[arg(long, env = BACKEND_FQDN_ENV)]
    pub backend_fqdn: Option<String>,

    #[arg(long, env = REGISTRY_ENV)]
    pub registry: Option<String>,

    #[arg(long, env = SAAS_ADDRESS_ENV)]
    pub saas_address: Option<String>,

    #[arg(long, env = MODE_ENV, value_enum, default_value_t = DeploymentMode::Job)]
    pub mode: DeploymentMode,

    /// Port of the clock-skew ping server
    #[arg(long, default_value_t = PING_PORT)]
    pub port: u16,

    /// Seconds a Job pod keeps answering pings after publishing its results
    #[arg(long, default_value_t = DEFAULT_LINGER.as_secs())]
    pub linger_secs: u64,
}
