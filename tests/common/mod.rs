use std::collections::BTreeMap;

use chrono::Utc;
use k8s_openapi::api::batch::v1::{Job, JobStatus};
use k8s_openapi::api::core::v1::{
    ConfigMap, Node, NodeAddress, NodeStatus, Pod, PodSpec, PodStatus,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use preinstall_diagnostics::config::{NAMESPACE, RESOURCE_NAME};
use preinstall_diagnostics::report::CheckResult;
use preinstall_diagnostics::resources::node_results_config_map;

#[allow(dead_code)]
pub fn make_node(name: &str, internal_ip: &str, labels: &[(&str, &str)]) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(
                labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..Default::default()
        },
        status: Some(NodeStatus {
            addresses: Some(vec![NodeAddress {
                address: internal_ip.to_string(),
                type_: "InternalIP".to_string(),
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// A diagnostics pod scheduled on `node`, with an IP once it is running.
#[allow(dead_code)]
pub fn make_diagnostics_pod(name: &str, node: &str, pod_ip: Option<&str>) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            labels: Some(BTreeMap::from([(RESOURCE_NAME.to_string(), node.to_string())])),
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_name: Some(node.to_string()),
            ..Default::default()
        }),
        status: Some(PodStatus {
            phase: Some(if pod_ip.is_some() { "Running" } else { "Pending" }.to_string()),
            pod_ip: pod_ip.map(str::to_string),
            ..Default::default()
        }),
    }
}

#[allow(dead_code)]
pub fn make_job(ready: Option<i32>, completed: bool) -> Job {
    Job {
        status: Some(JobStatus {
            ready,
            completion_time: completed.then(|| Time(Utc::now())),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// The ConfigMap a node agent would publish for `results`.
#[allow(dead_code)]
pub fn make_results_config_map(node: &str, results: &[CheckResult]) -> ConfigMap {
    let payload = serde_json::to_string(results).expect("results serialize");
    node_results_config_map(node, payload)
}
