use std::collections::HashSet;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, TimeDelta, Utc};
use futures::future::join_all;
use k8s_openapi::api::core::v1::Pod;
use kube::Client;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cluster::list_diagnostics_pods;
use crate::config::PING_PORT;
use crate::error::{DiagnosticsError, Result};
use crate::poll::Poller;
use crate::report::CheckLog;

/* ============================= PING SERVER ============================= */

/// Source of the time a node reports to its peers.
#[derive(Debug, Clone, Copy, Default)]
pub struct PingClock {
    offset: TimeDelta,
}

impl PingClock {
    pub fn system() -> Self {
        Self::default()
    }

    /// A clock running `offset` ahead of (or behind) the system clock.
    pub fn skewed(offset: TimeDelta) -> Self {
        Self { offset }
    }

    pub fn now(&self) -> DateTime<Utc> {
        Utc::now() + self.offset
    }
}

pub fn ping_router(clock: PingClock) -> Router {
    Router::new()
        .route("/ping", get(ping_handler))
        .route("/healthz", get(|| async { (StatusCode::OK, "OK") }))
        .with_state(clock)
}

async fn ping_handler(State(clock): State<PingClock>) -> Json<DateTime<Utc>> {
    Json(clock.now())
}

/// Bind the ping server and serve it in the background.
pub async fn serve_ping(addr: SocketAddr, clock: PingClock) -> Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    info!(addr = %local, "ping_server_started");

    let handle = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, ping_router(clock)).await {
            warn!(error = %err, "ping_server_stopped");
        }
    });

    Ok((local, handle))
}

/// Absolute difference between two instants.
pub fn clock_difference(a: DateTime<Utc>, b: DateTime<Utc>) -> Duration {
    Duration::from_millis((a - b).num_milliseconds().unsigned_abs())
}

/* ============================= PEERS ============================= */

/// Another diagnostics pod to exchange pings with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub node_name: String,
    pub pod_name: String,
    /// Base URL of the peer's ping server; `None` until the pod has an IP.
    pub endpoint: Option<String>,
}

impl Peer {
    pub fn from_pod(pod: &Pod) -> Self {
        let node_name = pod
            .spec
            .as_ref()
            .and_then(|s| s.node_name.clone())
            .unwrap_or_default();
        let endpoint = pod
            .status
            .as_ref()
            .and_then(|s| s.pod_ip.as_deref())
            .filter(|ip| !ip.is_empty())
            .map(|ip| peer_endpoint(ip, PING_PORT));

        Self {
            node_name,
            pod_name: pod.metadata.name.clone().unwrap_or_default(),
            endpoint,
        }
    }

    fn label(&self) -> String {
        format!("{}/{}", self.node_name, self.pod_name)
    }
}

pub fn peer_endpoint(ip: &str, port: u16) -> String {
    if ip.contains(':') {
        format!("http://[{ip}]:{port}")
    } else {
        format!("http://{ip}:{port}")
    }
}

/// Where the current peer list comes from. Consulted again every round so
/// pods that start late are picked up.
pub trait PeerSource {
    fn peers(&self) -> impl Future<Output = Result<Vec<Peer>>> + Send;
}

impl PeerSource for Vec<Peer> {
    async fn peers(&self) -> Result<Vec<Peer>> {
        Ok(self.clone())
    }
}

/// The diagnostics pods in the namespace, as seen by the API server.
pub struct KubePeers {
    client: Client,
    namespace: String,
}

impl KubePeers {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }
}

impl PeerSource for KubePeers {
    async fn peers(&self) -> Result<Vec<Peer>> {
        let pods = list_diagnostics_pods(&self.client, &self.namespace).await?;
        Ok(pods.iter().map(Peer::from_pod).collect())
    }
}

/* ============================= PING ROUNDS ============================= */

#[derive(Debug, Clone, PartialEq)]
pub enum PingOutcome {
    InSync(Duration),
    OutOfSync(Duration),
    Unreachable(String),
}

/// Ping one peer. Transport problems are retryable outcomes; a payload
/// that is not a timestamp is an error.
pub async fn ping_peer(http: &reqwest::Client, peer: &Peer, max_skew: Duration) -> Result<PingOutcome> {
    let Some(endpoint) = peer.endpoint.as_deref() else {
        return Ok(PingOutcome::Unreachable("pod has no IP address yet".to_string()));
    };

    let response = match http.get(format!("{endpoint}/ping")).send().await {
        Ok(response) => response,
        Err(err) => return Ok(PingOutcome::Unreachable(err.to_string())),
    };

    let status = response.status();
    if !status.is_success() {
        return Ok(PingOutcome::Unreachable(format!(
            "http ping failed, got status code {}",
            status.as_u16()
        )));
    }

    let body = response.text().await.map_err(|e| {
        DiagnosticsError::check(format!(
            "could not read ping response body from {}: {e}",
            peer.label()
        ))
    })?;
    let peer_time: DateTime<Utc> = serde_json::from_str(&body).map_err(|e| {
        DiagnosticsError::check(format!("could not parse time of {}: {e}", peer.label()))
    })?;

    let diff = clock_difference(Utc::now(), peer_time);
    if diff > max_skew {
        Ok(PingOutcome::OutOfSync(diff))
    } else {
        Ok(PingOutcome::InSync(diff))
    }
}

/// Ping every peer each round until all of them answered with a clock
/// within `max_skew`. Peers already in sync are not pinged again.
/// Returns the number of peers in the final list.
pub async fn wait_peers_in_sync<S: PeerSource>(
    http: &reqwest::Client,
    source: &S,
    local: &str,
    poller: &Poller,
    max_skew: Duration,
    log: &mut CheckLog,
) -> Result<usize> {
    let mut synced: HashSet<String> = HashSet::new();
    let mut last_pending = Vec::new();

    for round in 1..=poller.attempts {
        let peers = source.peers().await?;
        let pending: Vec<&Peer> = peers
            .iter()
            .filter(|p| !synced.contains(&p.pod_name))
            .collect();

        for peer in &pending {
            log.log(&format!("[{local}] -> [{}]: pinging", peer.label()));
        }

        let outcomes = join_all(pending.iter().map(|p| ping_peer(http, p, max_skew))).await;

        for (peer, outcome) in pending.iter().zip(outcomes) {
            match outcome? {
                PingOutcome::InSync(diff) => {
                    log.log(&format!(
                        "[{local}] -> [{}]: node clocks are in sync ({}ms apart)",
                        peer.label(),
                        diff.as_millis()
                    ));
                    synced.insert(peer.pod_name.clone());
                }
                PingOutcome::OutOfSync(diff) => {
                    log.error(&format!(
                        "[{local}] -> [{}]: node clocks are out of sync by {}s",
                        peer.label(),
                        diff.as_secs()
                    ));
                }
                PingOutcome::Unreachable(reason) => {
                    log.error(&format!(
                        "[{local}] -> [{}]: could not ping due to {reason}, retrying in {}s",
                        peer.label(),
                        poller.interval.as_secs()
                    ));
                }
            }
        }

        last_pending = peers
            .iter()
            .filter(|p| !synced.contains(&p.pod_name))
            .map(Peer::label)
            .collect();

        if !peers.is_empty() && last_pending.is_empty() {
            info!(peers = peers.len(), round, "peers_in_sync");
            return Ok(peers.len());
        }

        debug!(round, pending = last_pending.len(), "ping_round_incomplete");
        if round < poller.attempts {
            poller.pause().await;
        }
    }

    if last_pending.is_empty() {
        return Err(DiagnosticsError::check("no diagnostics pods were found to ping"));
    }
    Err(DiagnosticsError::check(format!(
        "failed to ping all pods, not in sync: {}",
        last_pending.join(", ")
    )))
}
