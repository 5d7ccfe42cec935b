use std::fmt;
use std::time::Duration;

use clap::ValueEnum;

/* ============================= NAMES ============================= */

/// Name shared by every object the tool deploys, and the label key they carry.
pub const RESOURCE_NAME: &str = "runai-preinstall-diagnostics";
pub const NAMESPACE: &str = RESOURCE_NAME;

pub const DEFAULT_IMAGE: &str = "gcr.io/run-ai-lab/preinstall-diagnostics:latest";

/* ============================= ENDPOINTS ============================= */

pub const DEFAULT_REGISTRY_URL: &str = "https://gcr.io/run-ai-prod";
pub const DEFAULT_SAAS_ADDRESS: &str = "https://app.run.ai";
pub const HELM_REPOSITORY_URL: &str = "https://run-ai-charts.storage.googleapis.com";
pub const DOCKER_HUB_URL: &str = "https://hub.docker.com";
pub const QUAY_URL: &str = "https://quay.io";
pub const SAAS_PROMETHEUS_URL: &str = "https://prometheus-us-central1.grafana.net";
pub const AUTH_PROVIDER_URL: &str = "https://runai-prod.auth0.com";

pub const PING_PORT: u16 = 8080;
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/* ============================= TIMING ============================= */

pub const POLL_ATTEMPTS: u32 = 100;
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

pub const JOBS_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const JOBS_TIMEOUT: Duration = Duration::from_secs(5 * 60);

pub const NAMESPACE_DELETION_INTERVAL: Duration = Duration::from_secs(1);
pub const NAMESPACE_DELETION_ATTEMPTS: u32 = 300;

pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(60);

/// How long a finished Job pod keeps answering pings so slower peers can
/// complete their own connectivity round.
pub const DEFAULT_LINGER: Duration = Duration::from_secs(30);

/* ============================= ENV VARS ============================= */

pub const NODE_NAME_ENV: &str = "NODE_NAME";
pub const POD_NAME_ENV: &str = "POD_NAME";
pub const POD_NAMESPACE_ENV: &str = "POD_NAMESPACE";
pub const BACKEND_FQDN_ENV: &str = "BACKEND_FQDN";
pub const REGISTRY_ENV: &str = "REGISTRY";
pub const SAAS_ADDRESS_ENV: &str = "RUNAI_SAAS";
pub const MODE_ENV: &str = "DIAGNOSTICS_MODE";

/* ============================= MODE ============================= */

/// Which workload carries the in-cluster checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum DeploymentMode {
    /// One Job per node; results are published to ConfigMaps.
    #[default]
    Job,
    /// One DaemonSet; results are read back from pod logs.
    #[value(name = "daemonset")]
    DaemonSet,
}

impl DeploymentMode {
    pub fn as_str(self) -> &'static str {
        match self {
            DeploymentMode::Job => "job",
            DeploymentMode::DaemonSet => "daemonset",
        }
    }
}

impl fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/* ============================= RUN CONFIG ============================= */

/// Operator-supplied settings that shape the deployed resources and the
/// external checks.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticsConfig {
    pub backend_fqdn: Option<String>,
    pub cluster_fqdn: Option<String>,
    pub image: String,
    pub image_pull_secret: Option<String>,
    pub registry: Option<String>,
    pub saas_address: Option<String>,
    pub mode: DeploymentMode,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            backend_fqdn: None,
            cluster_fqdn: None,
            image: DEFAULT_IMAGE.to_string(),
            image_pull_secret: None,
            registry: None,
            saas_address: None,
            mode: DeploymentMode::default(),
        }
    }
}

/// Treat empty strings coming from flags or env vars as "not provided".
pub fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
