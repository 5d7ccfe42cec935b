pub mod certificates;
pub mod clock_skew;
pub mod external;
pub mod internal;
pub mod reachability;

use std::fmt;
use std::path::PathBuf;

use kube::Client;
use tracing::{info, warn};

use crate::config::{DEFAULT_REGISTRY_URL, DEFAULT_SAAS_ADDRESS, DeploymentMode};
use crate::error::Result;
use crate::report::CheckLog;

pub use crate::report::CheckResult;

/* ============================= CONTEXTS ============================= */

/// What the operator-side checks need.
pub struct ExternalContext {
    pub client: Client,
    pub cluster_fqdn: Option<String>,
    pub http: reqwest::Client,
}

/// Which pod on which node the agent runs as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    pub node_name: String,
    pub pod_name: String,
    pub namespace: String,
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.node_name, self.pod_name)
    }
}

/// What the in-cluster checks need.
pub struct InternalContext {
    pub client: Client,
    pub identity: NodeIdentity,
    pub backend_fqdn: Option<String>,
    pub registry_url: String,
    pub saas_address: String,
    pub mode: DeploymentMode,
    pub http: reqwest::Client,
    pub resolv_conf: PathBuf,
}

impl InternalContext {
    pub fn new(
        client: Client,
        identity: NodeIdentity,
        mode: DeploymentMode,
        http: reqwest::Client,
    ) -> Self {
        Self {
            client,
            identity,
            backend_fqdn: None,
            registry_url: DEFAULT_REGISTRY_URL.to_string(),
            saas_address: DEFAULT_SAAS_ADDRESS.to_string(),
            mode,
            http,
            resolv_conf: PathBuf::from("/etc/resolv.conf"),
        }
    }
}

/* ============================= REGISTRY ============================= */

/// Checks run from the operator's machine, in report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalCheck {
    ClusterVersion,
    Certificates,
    HelmRepository,
    IngressController,
    Prometheus,
    GpuNodes,
    StorageClasses,
    PodList,
}

impl ExternalCheck {
    pub const ALL: [ExternalCheck; 8] = [
        ExternalCheck::ClusterVersion,
        ExternalCheck::Certificates,
        ExternalCheck::HelmRepository,
        ExternalCheck::IngressController,
        ExternalCheck::Prometheus,
        ExternalCheck::GpuNodes,
        ExternalCheck::StorageClasses,
        ExternalCheck::PodList,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ExternalCheck::ClusterVersion => "Cluster Version",
            ExternalCheck::Certificates => "TLS Certificates",
            ExternalCheck::HelmRepository => "Helm Repository",
            ExternalCheck::IngressController => "Ingress Controller",
            ExternalCheck::Prometheus => "Prometheus",
            ExternalCheck::GpuNodes => "GPU Nodes",
            ExternalCheck::StorageClasses => "Storage Classes",
            ExternalCheck::PodList => "Pod List",
        }
    }

    pub async fn execute(self, ctx: &ExternalContext, log: &mut CheckLog) -> Result<String> {
        match self {
            ExternalCheck::ClusterVersion => external::cluster_version(&ctx.client, log).await,
            ExternalCheck::Certificates => {
                external::tls_certificates(&ctx.client, ctx.cluster_fqdn.as_deref(), log).await
            }
            ExternalCheck::HelmRepository => external::helm_repository(&ctx.http, log).await,
            ExternalCheck::IngressController => external::ingress_controller(&ctx.client, log).await,
            ExternalCheck::Prometheus => external::prometheus(&ctx.client, log).await,
            ExternalCheck::GpuNodes => external::gpu_nodes(&ctx.client, log).await,
            ExternalCheck::StorageClasses => external::storage_classes(&ctx.client, log).await,
            ExternalCheck::PodList => external::pod_list(&ctx.client, log).await,
        }
    }
}

/// Checks run inside the cluster on every node, in report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InternalCheck {
    SaasBackend,
    Registry,
    BackendFqdnResolve,
    ResolvConf,
    HelmRepository,
    DockerHub,
    QuayIo,
    SaasPrometheus,
    AuthProvider,
    OsInfo,
    NodeConnectivity,
}

impl InternalCheck {
    pub const ALL: [InternalCheck; 11] = [
        InternalCheck::SaasBackend,
        InternalCheck::Registry,
        InternalCheck::BackendFqdnResolve,
        InternalCheck::ResolvConf,
        InternalCheck::HelmRepository,
        InternalCheck::DockerHub,
        InternalCheck::QuayIo,
        InternalCheck::SaasPrometheus,
        InternalCheck::AuthProvider,
        InternalCheck::OsInfo,
        InternalCheck::NodeConnectivity,
    ];

    pub fn name(self) -> &'static str {
        match self {
            InternalCheck::SaasBackend => "SaaS Backend",
            InternalCheck::Registry => "Container Registry",
            InternalCheck::BackendFqdnResolve => "Backend FQDN Resolve",
            InternalCheck::ResolvConf => "DNS resolv.conf",
            InternalCheck::HelmRepository => "Helm Repository",
            InternalCheck::DockerHub => "Docker Hub",
            InternalCheck::QuayIo => "Quay.io",
            InternalCheck::SaasPrometheus => "SaaS Prometheus",
            InternalCheck::AuthProvider => "Auth Provider",
            InternalCheck::OsInfo => "OS Info",
            InternalCheck::NodeConnectivity => "Node Connectivity",
        }
    }

    pub async fn execute(self, ctx: &InternalContext, log: &mut CheckLog) -> Result<String> {
        use crate::config::{
            AUTH_PROVIDER_URL, DOCKER_HUB_URL, HELM_REPOSITORY_URL, QUAY_URL, SAAS_PROMETHEUS_URL,
        };
        use reachability::check_url_available;

        match self {
            InternalCheck::SaasBackend => check_url_available(&ctx.http, &ctx.saas_address, log).await,
            InternalCheck::Registry => check_url_available(&ctx.http, &ctx.registry_url, log).await,
            InternalCheck::BackendFqdnResolve => internal::resolve_backend_fqdn(ctx, log).await,
            InternalCheck::ResolvConf => internal::resolv_conf(&ctx.resolv_conf, log).await,
            InternalCheck::HelmRepository => {
                check_url_available(&ctx.http, HELM_REPOSITORY_URL, log).await
            }
            InternalCheck::DockerHub => check_url_available(&ctx.http, DOCKER_HUB_URL, log).await,
            InternalCheck::QuayIo => check_url_available(&ctx.http, QUAY_URL, log).await,
            InternalCheck::SaasPrometheus => {
                check_url_available(&ctx.http, SAAS_PROMETHEUS_URL, log).await
            }
            InternalCheck::AuthProvider => check_url_available(&ctx.http, AUTH_PROVIDER_URL, log).await,
            InternalCheck::OsInfo => internal::os_info(log).await,
            InternalCheck::NodeConnectivity => internal::node_connectivity(ctx, log).await,
        }
    }
}

/* ============================= RUNNER ============================= */

/// Turn a check outcome into a result and write the verdict to the log.
pub fn conclude(name: &str, outcome: Result<String>, log: &mut CheckLog) -> CheckResult {
    let result = match outcome {
        Ok(message) => {
            info!(check = name, "check_passed");
            CheckResult::pass(name, message)
        }
        Err(err) => {
            warn!(check = name, error = %err, "check_failed");
            CheckResult::fail(name, err.to_string())
        }
    };
    log.outcome(&result);
    result
}

/// Run every external check in order. A failing check never stops the list.
pub async fn run_external(ctx: &ExternalContext, log: &mut CheckLog) -> Vec<CheckResult> {
    let mut results = Vec::with_capacity(ExternalCheck::ALL.len());
    for check in ExternalCheck::ALL {
        log.title(check.name());
        let outcome = check.execute(ctx, log).await;
        results.push(conclude(check.name(), outcome, log));
    }
    results
}

/// Run every internal check in order. A failing check never stops the list.
pub async fn run_internal(ctx: &InternalContext, log: &mut CheckLog) -> Vec<CheckResult> {
    let mut results = Vec::with_capacity(InternalCheck::ALL.len());
    for check in InternalCheck::ALL {
        log.title(check.name());
        let outcome = check.execute(ctx, log).await;
        results.push(conclude(check.name(), outcome, log));
    }
    results
}
