pub mod clean;
pub mod node;
pub mod run;
pub mod template;
pub mod version;

use anyhow::Context;
use kube::Client;
use preinstall_diagnostics::client;
use preinstall_diagnostics::cluster::delete_resources;
use preinstall_diagnostics::config::{NAMESPACE_DELETION_ATTEMPTS, NAMESPACE_DELETION_INTERVAL};
use preinstall_diagnostics::poll::Poller;
use preinstall_diagnostics::resources::ResourcePlan;

/// Connect to the cluster, reporting the outcome on the progress line.
pub(crate) async fn connect() -> anyhow::Result<Client> {
    print!("  Cluster connection .......... ");
    let client = match client::shared().await {
        Ok(c) => c,
        Err(e) => {
            println!("FAIL");
            anyhow::bail!("Cannot load cluster credentials: {e}");
        }
    };

    match client.apiserver_version().await {
        Ok(v) => println!("OK (v{}.{})", v.major, v.minor),
        Err(e) => {
            println!("FAIL");
            anyhow::bail!("Cannot reach cluster: {e}. Is the cluster running?");
        }
    }

    Ok(client)
}

pub(crate) fn teardown_poller() -> Poller {
    Poller::new(NAMESPACE_DELETION_ATTEMPTS, NAMESPACE_DELETION_INTERVAL)
}

/// Delete `plan` and wait for the namespace to be gone.
pub(crate) async fn teardown(client: &Client, plan: &ResourcePlan, label: &str) -> anyhow::Result<()> {
    print!("  {label:.<30} ");
    match delete_resources(client, plan, &teardown_poller()).await {
        Ok(()) => {
            println!("OK");
            Ok(())
        }
        Err(e) => {
            println!("FAIL");
            Err(e).context("Failed to delete diagnostics resources")
        }
    }
}

/// Resolves on Ctrl+C, or on SIGTERM where the platform has it.
pub(crate) async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
