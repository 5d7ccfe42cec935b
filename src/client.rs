use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::error::Result;

static CLIENT: OnceCell<Client> = OnceCell::const_new();

/// Process-wide Kubernetes client, built on first use.
///
/// A readable kubeconfig (`KUBECONFIG` or `~/.kube/config`) wins; otherwise
/// the pod's service-account credentials are used.
pub async fn shared() -> Result<Client> {
    CLIENT.get_or_try_init(connect).await.cloned()
}

async fn connect() -> Result<Client> {
    let config = match Kubeconfig::read() {
        Ok(kubeconfig) => {
            let config =
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?;
            info!(cluster_url = %config.cluster_url, "client_from_kubeconfig");
            config
        }
        Err(err) => {
            debug!(error = %err, "kubeconfig_unavailable");
            let config = Config::incluster()?;
            info!(cluster_url = %config.cluster_url, "client_from_service_account");
            config
        }
    };

    Ok(Client::try_from(config)?)
}

/// Untyped access to a resource the typed API does not model.
pub fn dynamic_api(
    client: Client,
    group: &str,
    version: &str,
    kind: &str,
    plural: &str,
    namespace: Option<&str>,
) -> Api<DynamicObject> {
    let gvk = GroupVersionKind::gvk(group, version, kind);
    let resource = ApiResource::from_gvk_with_plural(&gvk, plural);
    match namespace {
        Some(ns) => Api::namespaced_with(client, ns, &resource),
        None => Api::all_with(client, &resource),
    }
}
