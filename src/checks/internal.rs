use std::collections::BTreeSet;
use std::net::IpAddr;
use std::path::Path;

use k8s_openapi::api::core::v1::Node;
use tokio::process::Command;

use crate::checks::InternalContext;
use crate::checks::clock_skew::{KubePeers, wait_peers_in_sync};
use crate::cluster::{list_node_names, list_nodes, wait_daemonset_available, wait_job_pods_ready};
use crate::config::{DeploymentMode, MAX_CLOCK_SKEW};
use crate::error::{DiagnosticsError, Result};
use crate::poll::Poller;
use crate::report::CheckLog;

/* ============================= DNS ============================= */

/// Resolved addresses that belong to a cluster node, as `(ip, node)` pairs.
pub fn ips_on_nodes(ips: &[IpAddr], nodes: &[Node]) -> Vec<(IpAddr, String)> {
    let mut matches = Vec::new();
    for ip in ips {
        for node in nodes {
            let addresses = node
                .status
                .as_ref()
                .and_then(|s| s.addresses.as_ref())
                .into_iter()
                .flatten();
            let on_node = addresses
                .filter_map(|a| a.address.parse::<IpAddr>().ok())
                .any(|addr| addr == *ip);
            if on_node {
                matches.push((*ip, node.metadata.name.clone().unwrap_or_default()));
            }
        }
    }
    matches
}

async fn lookup_ips(host: &str) -> Result<Vec<IpAddr>> {
    let resolved: BTreeSet<IpAddr> = tokio::net::lookup_host((host, 0))
        .await?
        .map(|addr| addr.ip())
        .collect();
    Ok(resolved.into_iter().collect())
}

/// Resolve the backend FQDN and point out addresses that are node IPs.
/// Without a configured FQDN there is nothing to resolve and the check is
/// reported as skipped.
pub async fn resolve_backend_fqdn(ctx: &InternalContext, log: &mut CheckLog) -> Result<String> {
    let Some(fqdn) = ctx.backend_fqdn.as_deref().filter(|f| !f.is_empty()) else {
        log.log("backend FQDN was not provided using --backend-fqdn, skipping");
        return Ok("skipped: no backend FQDN provided".to_string());
    };

    let ips = lookup_ips(fqdn).await?;
    if ips.is_empty() {
        return Err(DiagnosticsError::check(format!(
            "no addresses resolved for {fqdn}"
        )));
    }

    log.log(&format!("resolved IP addresses for {fqdn}"));
    for ip in &ips {
        log.log(&ip.to_string());
    }

    let nodes = list_nodes(&ctx.client).await?;
    for (ip, node) in ips_on_nodes(&ips, &nodes) {
        log.log(&format!("{fqdn} resolves to {ip}, the address of node {node}"));
    }

    let listed: Vec<String> = ips.iter().map(IpAddr::to_string).collect();
    Ok(format!("{fqdn} resolves to {}", listed.join(", ")))
}

pub async fn resolv_conf(path: &Path, log: &mut CheckLog) -> Result<String> {
    let content = tokio::fs::read_to_string(path).await?;
    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        log.log(line);
    }
    Ok(content.trim().to_string())
}

/* ============================= OS ============================= */

/// One `uname -a` field per line.
pub fn format_os_info(uname: &str) -> String {
    uname.split_whitespace().collect::<Vec<_>>().join("\n")
}

pub async fn os_info(log: &mut CheckLog) -> Result<String> {
    let output = Command::new("uname").arg("-a").output().await?;
    if !output.status.success() {
        return Err(DiagnosticsError::check(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    let uname = String::from_utf8_lossy(&output.stdout);
    log.log(&format!("OS info: {}", uname.trim()));
    Ok(format_os_info(&uname))
}

/* ============================= CONNECTIVITY ============================= */

/// Wait for every diagnostics pod to run, then exchange pings with all of
/// them until their clocks are within the tolerated skew.
pub async fn node_connectivity(ctx: &InternalContext, log: &mut CheckLog) -> Result<String> {
    let poller = Poller::default();

    match ctx.mode {
        DeploymentMode::Job => {
            let node_count = list_node_names(&ctx.client).await?.len();
            log.log(&format!("waiting for {node_count} job pods to be ready..."));
            wait_job_pods_ready(&ctx.client, &ctx.identity.namespace, node_count, &poller).await?;
        }
        DeploymentMode::DaemonSet => {
            log.log("waiting for the daemonset to be available...");
            wait_daemonset_available(&ctx.client, &poller).await?;
        }
    }

    let peers = KubePeers::new(ctx.client.clone(), ctx.identity.namespace.clone());
    let count = wait_peers_in_sync(
        &ctx.http,
        &peers,
        &ctx.identity.to_string(),
        &poller,
        MAX_CLOCK_SKEW,
        log,
    )
    .await?;

    Ok(format!(
        "{count} diagnostics pods reachable with clocks within {}s",
        MAX_CLOCK_SKEW.as_secs()
    ))
}
