use std::io;

#[derive(Debug, thiserror::Error)]
pub enum DiagnosticsError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Failed to load kubeconfig: {0}")]
    Kubeconfig(#[from] kube::config::KubeconfigError),

    #[error("Failed to load in-cluster config: {0}")]
    InCluster(#[from] kube::config::InClusterError),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("timed out waiting for {what} after {attempts} attempts")]
    Timeout { what: String, attempts: u32 },

    #[error("env var {0} is not defined")]
    MissingEnv(&'static str),

    #[error("nodes {first} and {second} would share the {kind} name {name}")]
    NameCollision {
        kind: &'static str,
        name: String,
        first: String,
        second: String,
    },

    #[error("{0}")]
    Check(String),
}

impl DiagnosticsError {
    pub fn check(message: impl Into<String>) -> Self {
        DiagnosticsError::Check(message.into())
    }
}

pub type Result<T, E = DiagnosticsError> = std::result::Result<T, E>;
