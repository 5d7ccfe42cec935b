use chrono::Utc;
use k8s_openapi::api::core::v1::{Node, Pod, Secret};
use k8s_openapi::api::networking::v1::IngressClass;
use k8s_openapi::api::storage::v1::StorageClass;
use kube::api::{DynamicObject, GroupVersionKind, ListParams};
use kube::{Api, Client};
use serde_json::Value;

use crate::checks::certificates::{
    TLS_CERT_KEY, TLS_SECRET_NAME, TLS_SECRET_NAMESPACE, validate_certificates,
};
use crate::checks::reachability::check_url_available;
use crate::client::dynamic_api;
use crate::config::HELM_REPOSITORY_URL;
use crate::error::{DiagnosticsError, Result};
use crate::report::CheckLog;

pub const MIN_KUBERNETES_VERSION: (u64, u64, u64) = (1, 20, 0);

const POD_PAGE_SIZE: u32 = 500;
const DEFAULT_CLASS_ANNOTATION: &str = "storageclass.kubernetes.io/is-default-class";

/// Labels published by NVIDIA GPU feature discovery. A node must carry all
/// of them to count as a GPU node.
pub const NVIDIA_GPU_LABELS: [&str; 14] = [
    "nvidia.com/cuda.driver.major",
    "nvidia.com/cuda.driver.minor",
    "nvidia.com/cuda.driver.rev",
    "nvidia.com/cuda.runtime.major",
    "nvidia.com/cuda.runtime.minor",
    "nvidia.com/gfd.timestamp",
    "nvidia.com/gpu.compute.major",
    "nvidia.com/gpu.compute.minor",
    "nvidia.com/gpu.count",
    "nvidia.com/gpu.family",
    "nvidia.com/gpu.machine",
    "nvidia.com/gpu.memory",
    "nvidia.com/gpu.product",
    "nvidia.com/mig.strategy",
];

/* ============================= CLUSTER VERSION ============================= */

fn leading_number(part: &str) -> Option<u64> {
    let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// Parse `v1.27.3-gke.100`, `1.20+` and similar into `(major, minor, patch)`.
pub fn parse_version(raw: &str) -> Option<(u64, u64, u64)> {
    let core = raw.trim().trim_start_matches('v').split(['-', '+']).next()?;
    let mut parts = core.split('.');
    let major = leading_number(parts.next()?)?;
    let minor = match parts.next() {
        Some(part) => leading_number(part)?,
        None => 0,
    };
    let patch = match parts.next() {
        Some(part) => leading_number(part)?,
        None => 0,
    };
    Some((major, minor, patch))
}

/// OpenShift's version as recorded in the `ClusterVersion` history.
pub fn openshift_history_version(data: &Value) -> Option<String> {
    data.pointer("/status/history/0/version")
        .and_then(Value::as_str)
        .map(str::to_string)
}

async fn openshift_version(client: &Client) -> Result<Option<String>> {
    let api = dynamic_api(
        client.clone(),
        "config.openshift.io",
        "v1",
        "ClusterVersion",
        "clusterversions",
        None,
    );
    match api.get("version").await {
        Ok(obj) => Ok(Some(
            openshift_history_version(&obj.data).unwrap_or_else(|| "unknown".to_string()),
        )),
        Err(kube::Error::Api(err)) if err.code == 404 => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub async fn cluster_version(client: &Client, log: &mut CheckLog) -> Result<String> {
    let info = client.apiserver_version().await?;
    log.log(&format!("Kubernetes version: {}", info.git_version));

    let version = parse_version(&info.git_version).ok_or_else(|| {
        DiagnosticsError::check(format!("could not parse cluster version {}", info.git_version))
    })?;
    if version < MIN_KUBERNETES_VERSION {
        let (major, minor, patch) = MIN_KUBERNETES_VERSION;
        return Err(DiagnosticsError::check(format!(
            "Kubernetes cluster version {} is lower than {major}.{minor}.{patch}",
            info.git_version
        )));
    }

    match openshift_version(client).await? {
        Some(ocp) => {
            log.log(&format!("OpenShift version: {ocp}"));
            Ok(format!("OpenShift cluster version: {ocp}"))
        }
        None => Ok(info.git_version),
    }
}

/* ============================= CERTIFICATES ============================= */

pub async fn tls_certificates(
    client: &Client,
    cluster_fqdn: Option<&str>,
    log: &mut CheckLog,
) -> Result<String> {
    let fqdn = cluster_fqdn.filter(|f| !f.is_empty()).ok_or_else(|| {
        DiagnosticsError::check("no cluster FQDN specified, provide it using --cluster-fqdn")
    })?;

    let secrets: Api<Secret> = Api::namespaced(client.clone(), TLS_SECRET_NAMESPACE);
    let secret = secrets.get(TLS_SECRET_NAME).await?;
    log.log(&format!("read secret {TLS_SECRET_NAMESPACE}/{TLS_SECRET_NAME}"));

    let pem = secret
        .data
        .as_ref()
        .and_then(|d| d.get(TLS_CERT_KEY))
        .map(|bytes| bytes.0.as_slice())
        .ok_or_else(|| {
            DiagnosticsError::check(format!(
                "secret {TLS_SECRET_NAMESPACE}/{TLS_SECRET_NAME} has no {TLS_CERT_KEY} entry"
            ))
        })?;

    validate_certificates(pem, fqdn, Utc::now())
}

/* ============================= REACHABILITY ============================= */

pub async fn helm_repository(http: &reqwest::Client, log: &mut CheckLog) -> Result<String> {
    check_url_available(http, HELM_REPOSITORY_URL, log).await
}

/* ============================= CLUSTER COMPONENTS ============================= */

pub async fn ingress_controller(client: &Client, log: &mut CheckLog) -> Result<String> {
    let classes: Api<IngressClass> = Api::all(client.clone());
    let names: Vec<String> = classes
        .list(&ListParams::default())
        .await?
        .items
        .into_iter()
        .filter_map(|ic| ic.metadata.name)
        .collect();

    if names.is_empty() {
        return Err(DiagnosticsError::check(
            "an ingress controller is not installed in the cluster",
        ));
    }

    for name in &names {
        log.log(&format!("IngressClass: {name}"));
    }
    Ok(format!("ingress classes: {}", names.join(", ")))
}

fn object_ref(obj: &DynamicObject) -> String {
    format!(
        "{}/{}",
        obj.metadata.namespace.as_deref().unwrap_or_default(),
        obj.metadata.name.as_deref().unwrap_or_default()
    )
}

/// The Prometheus operator is installed when its `Prometheus` kind is served.
pub async fn prometheus(client: &Client, log: &mut CheckLog) -> Result<String> {
    let gvk = GroupVersionKind::gvk("monitoring.coreos.com", "v1", "Prometheus");
    let (resource, _caps) = match kube::discovery::pinned_kind(client, &gvk).await {
        Ok(found) => found,
        Err(kube::Error::Discovery(_)) => {
            return Err(DiagnosticsError::check("prometheus is not installed in the cluster"));
        }
        Err(kube::Error::Api(err)) if err.code == 404 => {
            return Err(DiagnosticsError::check("prometheus is not installed in the cluster"));
        }
        Err(e) => return Err(e.into()),
    };

    let api: Api<DynamicObject> = Api::all_with(client.clone(), &resource);
    let instances = api.list(&ListParams::default()).await?.items;
    for instance in &instances {
        log.log(&format!("Prometheus: {}", object_ref(instance)));
    }

    Ok(format!(
        "prometheus operator installed, {} instance(s) found",
        instances.len()
    ))
}

/// Existence selector requiring every GPU feature discovery label.
pub fn gpu_label_selector() -> String {
    NVIDIA_GPU_LABELS.join(",")
}

fn node_label<'a>(node: &'a Node, key: &str) -> &'a str {
    node.metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(key))
        .map(String::as_str)
        .unwrap_or("?")
}

pub async fn gpu_nodes(client: &Client, log: &mut CheckLog) -> Result<String> {
    let nodes: Api<Node> = Api::all(client.clone());
    let gpu_nodes = nodes
        .list(&ListParams::default().labels(&gpu_label_selector()))
        .await?
        .items;

    if gpu_nodes.is_empty() {
        return Err(DiagnosticsError::check("no GPU nodes were found in the cluster"));
    }

    let mut names = Vec::with_capacity(gpu_nodes.len());
    for node in &gpu_nodes {
        let name = node.metadata.name.clone().unwrap_or_default();
        log.log(&format!(
            "Node name: {name}, GPU: {} x{}",
            node_label(node, "nvidia.com/gpu.product"),
            node_label(node, "nvidia.com/gpu.count")
        ));
        names.push(name);
    }
    Ok(names.join(", "))
}

/// Class name, marked when it is the cluster default.
pub fn describe_storage_class(sc: &StorageClass) -> String {
    let name = sc.metadata.name.clone().unwrap_or_default();
    let is_default = sc
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(DEFAULT_CLASS_ANNOTATION))
        .is_some_and(|v| v == "true");
    if is_default {
        format!("{name} (default)")
    } else {
        name
    }
}

pub async fn storage_classes(client: &Client, log: &mut CheckLog) -> Result<String> {
    let classes: Api<StorageClass> = Api::all(client.clone());
    let items = classes.list(&ListParams::default()).await?.items;

    if items.is_empty() {
        return Err(DiagnosticsError::check(
            "no storage classes defined in the cluster",
        ));
    }

    let described: Vec<String> = items.iter().map(describe_storage_class).collect();
    for sc in &described {
        log.log(&format!("StorageClass: {sc}"));
    }
    Ok(described.join(", "))
}

/// `namespace/name/phase` for one pod.
pub fn describe_pod(pod: &Pod) -> String {
    format!(
        "{}/{}/{}",
        pod.metadata.namespace.as_deref().unwrap_or_default(),
        pod.metadata.name.as_deref().unwrap_or_default(),
        pod.status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .unwrap_or("Unknown")
    )
}

pub async fn pod_list(client: &Client, log: &mut CheckLog) -> Result<String> {
    let pods: Api<Pod> = Api::all(client.clone());
    let mut params = ListParams::default().limit(POD_PAGE_SIZE);
    let mut count = 0usize;

    loop {
        let page = pods.list(&params).await?;
        for pod in &page.items {
            log.log(&describe_pod(pod));
        }
        count += page.items.len();

        match page.metadata.continue_.filter(|token| !token.is_empty()) {
            Some(token) => params = params.continue_token(&token),
            None => break,
        }
    }

    Ok(format!("{count} pods found"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::PodStatus;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    // ── version parsing ──

    #[test]
    fn test_parse_plain_and_prefixed_versions() {
        assert_eq!(parse_version("v1.27.3"), Some((1, 27, 3)));
        assert_eq!(parse_version("1.20.0"), Some((1, 20, 0)));
    }

    #[test]
    fn test_parse_ignores_build_suffixes() {
        assert_eq!(parse_version("v1.26.5-gke.1200"), Some((1, 26, 5)));
        assert_eq!(parse_version("v1.25.16+k3s1"), Some((1, 25, 16)));
        assert_eq!(parse_version("v1.21+"), Some((1, 21, 0)));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_version(""), None);
        assert_eq!(parse_version("vX.Y"), None);
    }

    #[test]
    fn test_minimum_version_comparison() {
        assert!(parse_version("v1.19.16").unwrap() < MIN_KUBERNETES_VERSION);
        assert!(parse_version("v1.20.0").unwrap() >= MIN_KUBERNETES_VERSION);
        assert!(parse_version("v2.0.0").unwrap() >= MIN_KUBERNETES_VERSION);
    }

    #[test]
    fn test_openshift_history_version() {
        let data = serde_json::json!({
            "status": { "history": [ { "version": "4.12.3" }, { "version": "4.11.0" } ] }
        });
        assert_eq!(openshift_history_version(&data).as_deref(), Some("4.12.3"));
        assert_eq!(openshift_history_version(&serde_json::json!({})), None);
    }

    // ── GPU nodes ──

    #[test]
    fn test_gpu_selector_requires_every_label() {
        let selector = gpu_label_selector();
        assert_eq!(selector.split(',').count(), NVIDIA_GPU_LABELS.len());
        assert!(!selector.contains('='), "existence selector has no values");
        assert!(selector.contains("nvidia.com/mig.strategy"));
    }

    // ── storage classes & pods ──

    fn storage_class(name: &str, default: Option<&str>) -> StorageClass {
        StorageClass {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                annotations: default.map(|v| {
                    BTreeMap::from([(DEFAULT_CLASS_ANNOTATION.to_string(), v.to_string())])
                }),
                ..Default::default()
            },
            provisioner: "kubernetes.io/no-provisioner".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_storage_class_is_marked() {
        assert_eq!(describe_storage_class(&storage_class("standard", Some("true"))), "standard (default)");
        assert_eq!(describe_storage_class(&storage_class("fast", Some("false"))), "fast");
        assert_eq!(describe_storage_class(&storage_class("slow", None)), "slow");
    }

    #[test]
    fn test_describe_pod() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("coredns-1".to_string()),
                namespace: Some("kube-system".to_string()),
                ..Default::default()
            },
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(describe_pod(&pod), "kube-system/coredns-1/Running");
        assert_eq!(describe_pod(&Pod::default()), "//Unknown");
    }
}
