use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Node, Pod};
use kube::api::{DeleteParams, ListParams, LogParams, PostParams};
use kube::{Api, Client};
use tracing::{info, warn};

use crate::config::{NAMESPACE, RESOURCE_NAME};
use crate::error::Result;
use crate::poll::{PollStatus, Poller};
use crate::report::{CheckResult, NodeResult, is_complete};
use crate::resources::{RESULTS_KEY, ResourcePlan, node_results_config_map, results_config_map_name};

/* ============================= QUERIES ============================= */

pub async fn list_nodes(client: &Client) -> Result<Vec<Node>> {
    let nodes: Api<Node> = Api::all(client.clone());
    Ok(nodes.list(&ListParams::default()).await?.items)
}

pub async fn list_node_names(client: &Client) -> Result<Vec<String>> {
    Ok(list_nodes(client)
        .await?
        .into_iter()
        .filter_map(|node| node.metadata.name)
        .collect())
}

/// Pods carrying the diagnostics label, whatever its value.
pub async fn list_diagnostics_pods(client: &Client, namespace: &str) -> Result<Vec<Pod>> {
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let params = ListParams::default().labels(RESOURCE_NAME);
    Ok(pods.list(&params).await?.items)
}

/* ============================= READINESS ============================= */

/// Available once every scheduled pod is available, and at least one is.
pub fn daemonset_status(ds: &DaemonSet) -> PollStatus<()> {
    let Some(status) = ds.status.as_ref() else {
        return PollStatus::Pending("daemonset has no status yet".to_string());
    };

    let desired = status.desired_number_scheduled;
    let available = status.number_available.unwrap_or(0);
    if desired != 0 && available == desired {
        PollStatus::Ready(())
    } else {
        PollStatus::Pending(format!("{available}/{desired} pods available"))
    }
}

pub async fn wait_daemonset_available(client: &Client, poller: &Poller) -> Result<()> {
    let daemonsets: Api<DaemonSet> = Api::namespaced(client.clone(), NAMESPACE);

    poller
        .until("daemonset to be available", |_| {
            let daemonsets = daemonsets.clone();
            async move {
                match daemonsets.get(RESOURCE_NAME).await {
                    Ok(ds) => Ok(daemonset_status(&ds)),
                    Err(err) => Ok(PollStatus::Pending(err.to_string())),
                }
            }
        })
        .await?;

    info!(name = RESOURCE_NAME, "daemonset_available");
    Ok(())
}

pub fn ready_job_pods(jobs: &[Job]) -> i64 {
    jobs.iter()
        .filter_map(|job| job.status.as_ref().and_then(|s| s.ready))
        .map(i64::from)
        .sum()
}

/// Wait until one job pod per node reports ready.
pub async fn wait_job_pods_ready(
    client: &Client,
    namespace: &str,
    node_count: usize,
    poller: &Poller,
) -> Result<()> {
    let jobs: Api<Job> = Api::namespaced(client.clone(), namespace);
    let expected = node_count as i64;

    poller
        .until("job pods to be ready", |_| {
            let jobs = jobs.clone();
            async move {
                let list = jobs.list(&ListParams::default().labels(RESOURCE_NAME)).await?;
                let ready = ready_job_pods(&list.items);
                if ready == expected {
                    Ok(PollStatus::Ready(()))
                } else {
                    Ok(PollStatus::Pending(format!("{ready}/{expected} job pods ready")))
                }
            }
        })
        .await
}

/// A job is finished once it completed or was marked failed.
pub fn job_finished(job: &Job) -> bool {
    let Some(status) = job.status.as_ref() else {
        return false;
    };
    if status.completion_time.is_some() {
        return true;
    }
    status
        .conditions
        .iter()
        .flatten()
        .any(|c| c.type_ == "Failed" && c.status == "True")
}

pub async fn wait_jobs_finished(client: &Client, poller: &Poller) -> Result<()> {
    let jobs: Api<Job> = Api::namespaced(client.clone(), NAMESPACE);

    poller
        .until("jobs to finish", |_| {
            let jobs = jobs.clone();
            async move {
                let list = jobs.list(&ListParams::default().labels(RESOURCE_NAME)).await?;
                let finished = list.items.iter().filter(|job| job_finished(job)).count();
                if finished == list.items.len() {
                    Ok(PollStatus::Ready(()))
                } else {
                    Ok(PollStatus::Pending(format!(
                        "{finished}/{} jobs finished",
                        list.items.len()
                    )))
                }
            }
        })
        .await?;

    info!("jobs_finished");
    Ok(())
}

/// Fetch a pod's log until it reaches the completion tag.
pub async fn pod_logs_until_complete(
    client: &Client,
    pod_name: &str,
    poller: &Poller,
) -> Result<String> {
    let pods: Api<Pod> = Api::namespaced(client.clone(), NAMESPACE);
    let what = format!("pod {pod_name} to complete");

    poller
        .until(&what, |_| {
            let pods = pods.clone();
            async move {
                match pods.logs(pod_name, &LogParams::default()).await {
                    Ok(log) if is_complete(&log) => Ok(PollStatus::Ready(log)),
                    Ok(_) => Ok(PollStatus::Pending("checks still running".to_string())),
                    Err(err) => Ok(PollStatus::Pending(err.to_string())),
                }
            }
        })
        .await
}

/* ============================= NODE RESULTS ============================= */

/// Replace the node's results ConfigMap with `results`.
pub async fn publish_node_results(
    client: &Client,
    namespace: &str,
    node_name: &str,
    results: &[CheckResult],
) -> Result<()> {
    let config_maps: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    let name = results_config_map_name(node_name);

    match config_maps.delete(&name, &DeleteParams::default()).await {
        Ok(_) => {}
        Err(kube::Error::Api(err)) if err.code == 404 => {}
        Err(e) => return Err(e.into()),
    }

    let payload = serde_json::to_string(results)?;
    let mut cm = node_results_config_map(node_name, payload);
    cm.metadata.namespace = Some(namespace.to_string());
    config_maps.create(&PostParams::default(), &cm).await?;

    info!(node = node_name, checks = results.len(), "node_results_published");
    Ok(())
}

/// Turn a node's ConfigMap (or its absence) into a table row. A node that
/// published nothing readable is reported as failed.
pub fn node_result_from_config_map(node_name: &str, cm: Option<&ConfigMap>) -> NodeResult {
    let failed = |message: String| NodeResult {
        name: node_name.to_string(),
        results: vec![CheckResult::fail("Node Results", message)],
    };

    let Some(cm) = cm else {
        return failed(format!("no results were published by node {node_name}"));
    };

    let Some(payload) = cm.data.as_ref().and_then(|d| d.get(RESULTS_KEY)) else {
        return failed(format!("results ConfigMap of node {node_name} has no '{RESULTS_KEY}' key"));
    };

    match serde_json::from_str::<Vec<CheckResult>>(payload) {
        Ok(results) => NodeResult {
            name: node_name.to_string(),
            results,
        },
        Err(err) => failed(format!("could not parse results of node {node_name}: {err}")),
    }
}

pub async fn collect_node_results(client: &Client, node_names: &[String]) -> Result<Vec<NodeResult>> {
    let config_maps: Api<ConfigMap> = Api::namespaced(client.clone(), NAMESPACE);
    let mut collected = Vec::with_capacity(node_names.len());

    for node in node_names {
        let cm = config_maps.get_opt(&results_config_map_name(node)).await?;
        if cm.is_none() {
            warn!(node = %node, "node_results_missing");
        }
        collected.push(node_result_from_config_map(node, cm.as_ref()));
    }

    Ok(collected)
}

/* ============================= LIFECYCLE ============================= */

pub async fn create_resources(client: &Client, plan: &ResourcePlan) -> Result<()> {
    plan.create_all(client).await
}

/// Delete the plan's objects, then wait for the namespace to be gone.
pub async fn delete_resources(client: &Client, plan: &ResourcePlan, poller: &Poller) -> Result<()> {
    plan.delete_all(client).await?;
    wait_namespace_deleted(client, poller).await
}

pub async fn wait_namespace_deleted(client: &Client, poller: &Poller) -> Result<()> {
    let namespaces: Api<Namespace> = Api::all(client.clone());

    poller
        .until("namespace to be deleted", |_| {
            let namespaces = namespaces.clone();
            async move {
                match namespaces.get_opt(NAMESPACE).await? {
                    None => Ok(PollStatus::Ready(())),
                    Some(_) => Ok(PollStatus::Pending("namespace still terminating".to_string())),
                }
            }
        })
        .await?;

    info!(namespace = NAMESPACE, "namespace_deleted");
    Ok(())
}
