use std::collections::BTreeMap;
use std::fmt::Debug;

use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetSpec};
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, Container, ContainerPort, EnvVar, EnvVarSource, LocalObjectReference, Namespace,
    ObjectFieldSelector, PodSpec, PodTemplateSpec, ServiceAccount, Toleration,
};
use k8s_openapi::api::rbac::v1::{
    ClusterRole, ClusterRoleBinding, PolicyRule, Role, RoleBinding, RoleRef, Subject,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::api::{DeleteParams, PostParams};
use kube::{Api, Client, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::config::{
    BACKEND_FQDN_ENV, DeploymentMode, DiagnosticsConfig, MODE_ENV, NAMESPACE, NODE_NAME_ENV,
    PING_PORT, POD_NAME_ENV, POD_NAMESPACE_ENV, REGISTRY_ENV, RESOURCE_NAME, SAAS_ADDRESS_ENV,
};
use crate::error::{DiagnosticsError, Result};

const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

/// Key under which a node publishes its JSON results in its ConfigMap.
pub const RESULTS_KEY: &str = "results";

/* ============================= HELPERS ============================= */

fn labels(value: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(RESOURCE_NAME.to_string(), value.to_string())])
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn rule(api_group: &str, resources: &[&str], verbs: &[&str]) -> PolicyRule {
    PolicyRule {
        api_groups: Some(vec![api_group.to_string()]),
        resources: Some(strings(resources)),
        verbs: strings(verbs),
        ..Default::default()
    }
}

fn field_ref_env(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: field_path.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn value_env(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

const MAX_LABEL_LEN: usize = 63;
const HASH_LEN: usize = 8;

/// First 8 hex digits of the SHA-256 of `value`. Stable across builds, so
/// the CLI and the node agent derive the same names.
fn short_hash(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    hex::encode(&digest[..HASH_LEN / 2])
}

/// Cut `base` so that `-<hash of original>` still fits in 63 characters.
fn with_hash_suffix(base: &str, original: &str) -> String {
    let keep = MAX_LABEL_LEN - HASH_LEN - 1;
    let head: String = base.chars().take(keep).collect();
    let head = head.trim_end_matches(|c: char| !c.is_ascii_alphanumeric());
    if head.is_empty() {
        return short_hash(original);
    }
    format!("{head}-{}", short_hash(original))
}

fn is_dns_label(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_LABEL_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.starts_with('-')
        && !name.ends_with('-')
}

fn is_label_value(value: &str) -> bool {
    value.len() <= MAX_LABEL_LEN
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && value.chars().next().is_none_or(|c| c.is_ascii_alphanumeric())
        && value.chars().last().is_none_or(|c| c.is_ascii_alphanumeric())
}

/// Object names derived from node names must stay valid DNS labels. A name
/// that had to be shortened or rewritten gets a hash of the node name
/// appended, so distinct nodes never share an object.
pub fn dns_label_name(prefix: &str, suffix: &str) -> String {
    let raw = format!("{prefix}-{suffix}");
    if is_dns_label(&raw) {
        return raw;
    }
    let sanitized: String = raw
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect();
    with_hash_suffix(&sanitized, suffix)
}

/// Label value identifying a node's pod and ConfigMap.
pub fn node_label_value(node_name: &str) -> String {
    if is_label_value(node_name) {
        return node_name.to_string();
    }
    let sanitized: String = node_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '-' })
        .collect();
    let sanitized = sanitized.trim_start_matches(|c: char| !c.is_ascii_alphanumeric());
    with_hash_suffix(sanitized, node_name)
}

pub fn job_name(node_name: &str) -> String {
    dns_label_name(RESOURCE_NAME, node_name)
}

pub fn results_config_map_name(node_name: &str) -> String {
    dns_label_name(RESOURCE_NAME, node_name)
}

/* ============================= NAMESPACE & RBAC ============================= */

pub fn namespace() -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(NAMESPACE.to_string()),
            labels: Some(labels("")),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn service_account() -> ServiceAccount {
    ServiceAccount {
        metadata: ObjectMeta {
            name: Some(RESOURCE_NAME.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            labels: Some(labels("")),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Cluster-wide read access needed by the in-cluster checks.
pub fn cluster_role() -> ClusterRole {
    ClusterRole {
        metadata: ObjectMeta {
            name: Some(RESOURCE_NAME.to_string()),
            labels: Some(labels("")),
            ..Default::default()
        },
        rules: Some(vec![
            rule("", &["pods", "nodes"], &["get", "list"]),
            rule("apps", &["daemonsets", "deployments"], &["get", "list"]),
            rule("batch", &["jobs"], &["get", "list"]),
            rule("config.openshift.io", &["clusterversions"], &["get"]),
            rule("monitoring.coreos.com", &["prometheuses"], &["list"]),
            rule("storage.k8s.io", &["storageclasses"], &["list"]),
        ]),
        ..Default::default()
    }
}

pub fn cluster_role_binding() -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(RESOURCE_NAME.to_string()),
            labels: Some(labels("")),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: RBAC_API_GROUP.to_string(),
            kind: "ClusterRole".to_string(),
            name: RESOURCE_NAME.to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: RESOURCE_NAME.to_string(),
            namespace: Some(NAMESPACE.to_string()),
            ..Default::default()
        }]),
    }
}

/// Namespaced access to the ConfigMaps nodes publish their results to.
pub fn role() -> Role {
    Role {
        metadata: ObjectMeta {
            name: Some(RESOURCE_NAME.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            labels: Some(labels("")),
            ..Default::default()
        },
        rules: Some(vec![rule(
            "",
            &["configmaps"],
            &["get", "list", "create", "delete"],
        )]),
    }
}

pub fn role_binding() -> RoleBinding {
    RoleBinding {
        metadata: ObjectMeta {
            name: Some(RESOURCE_NAME.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            labels: Some(labels("")),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: RBAC_API_GROUP.to_string(),
            kind: "Role".to_string(),
            name: RESOURCE_NAME.to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: RESOURCE_NAME.to_string(),
            namespace: Some(NAMESPACE.to_string()),
            ..Default::default()
        }]),
    }
}

/* ============================= WORKLOADS ============================= */

/// Env vars injected into every node pod. Optional settings are only added
/// when the operator provided them so the agent falls back to its defaults.
pub fn node_env(config: &DiagnosticsConfig) -> Vec<EnvVar> {
    let mut env = vec![
        field_ref_env(NODE_NAME_ENV, "spec.nodeName"),
        field_ref_env(POD_NAME_ENV, "metadata.name"),
        field_ref_env(POD_NAMESPACE_ENV, "metadata.namespace"),
        value_env(MODE_ENV, config.mode.as_str()),
    ];

    let optional = [
        (BACKEND_FQDN_ENV, &config.backend_fqdn),
        (REGISTRY_ENV, &config.registry),
        (SAAS_ADDRESS_ENV, &config.saas_address),
    ];
    for (name, value) in optional {
        if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
            env.push(value_env(name, value));
        }
    }

    env
}

fn node_container(config: &DiagnosticsConfig) -> Container {
    Container {
        name: RESOURCE_NAME.to_string(),
        image: Some(config.image.clone()),
        image_pull_policy: Some("Always".to_string()),
        args: Some(strings(&["node", "--mode", config.mode.as_str()])),
        ports: Some(vec![ContainerPort {
            name: Some("ping".to_string()),
            container_port: i32::from(PING_PORT),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        env: Some(node_env(config)),
        ..Default::default()
    }
}

fn control_plane_tolerations() -> Vec<Toleration> {
    ["node-role.kubernetes.io/master", "node-role.kubernetes.io/control-plane"]
        .iter()
        .map(|key| Toleration {
            key: Some(key.to_string()),
            operator: Some("Exists".to_string()),
            effect: Some("NoSchedule".to_string()),
            ..Default::default()
        })
        .collect()
}

fn node_pod_spec(config: &DiagnosticsConfig) -> PodSpec {
    PodSpec {
        service_account_name: Some(RESOURCE_NAME.to_string()),
        tolerations: Some(control_plane_tolerations()),
        containers: vec![node_container(config)],
        image_pull_secrets: config
            .image_pull_secret
            .as_ref()
            .filter(|s| !s.is_empty())
            .map(|name| {
                vec![LocalObjectReference {
                    name: Some(name.clone()),
                }]
            }),
        ..Default::default()
    }
}

pub fn daemonset(config: &DiagnosticsConfig) -> DaemonSet {
    DaemonSet {
        metadata: ObjectMeta {
            name: Some(RESOURCE_NAME.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            labels: Some(labels("")),
            ..Default::default()
        },
        spec: Some(DaemonSetSpec {
            min_ready_seconds: Some(10),
            selector: LabelSelector {
                match_labels: Some(labels("")),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels("")),
                    ..Default::default()
                }),
                spec: Some(node_pod_spec(config)),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// A Job pinned to `node_name` that runs the node checks once.
pub fn job_for_node(node_name: &str, config: &DiagnosticsConfig) -> Job {
    let mut pod_spec = node_pod_spec(config);
    pod_spec.node_name = Some(node_name.to_string());
    pod_spec.restart_policy = Some("Never".to_string());

    Job {
        metadata: ObjectMeta {
            name: Some(job_name(node_name)),
            namespace: Some(NAMESPACE.to_string()),
            labels: Some(labels("")),
            ..Default::default()
        },
        spec: Some(JobSpec {
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels(&node_label_value(node_name))),
                    ..Default::default()
                }),
                spec: Some(pod_spec),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// ConfigMap in which a node publishes its serialized check results.
pub fn node_results_config_map(node_name: &str, results_json: String) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(results_config_map_name(node_name)),
            namespace: Some(NAMESPACE.to_string()),
            labels: Some(labels(&node_label_value(node_name))),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(RESULTS_KEY.to_string(), results_json)])),
        ..Default::default()
    }
}

/* ============================= RESOURCE SET ============================= */

/// One object the tool deploys.
#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum DiagnosticsResource {
    Namespace(Namespace),
    ClusterRole(ClusterRole),
    ClusterRoleBinding(ClusterRoleBinding),
    Role(Role),
    RoleBinding(RoleBinding),
    ServiceAccount(ServiceAccount),
    DaemonSet(DaemonSet),
    Job(Job),
}

impl DiagnosticsResource {
    pub fn kind(&self) -> &'static str {
        match self {
            DiagnosticsResource::Namespace(_) => "Namespace",
            DiagnosticsResource::ClusterRole(_) => "ClusterRole",
            DiagnosticsResource::ClusterRoleBinding(_) => "ClusterRoleBinding",
            DiagnosticsResource::Role(_) => "Role",
            DiagnosticsResource::RoleBinding(_) => "RoleBinding",
            DiagnosticsResource::ServiceAccount(_) => "ServiceAccount",
            DiagnosticsResource::DaemonSet(_) => "DaemonSet",
            DiagnosticsResource::Job(_) => "Job",
        }
    }

    pub fn name(&self) -> String {
        let meta = match self {
            DiagnosticsResource::Namespace(o) => o.meta(),
            DiagnosticsResource::ClusterRole(o) => o.meta(),
            DiagnosticsResource::ClusterRoleBinding(o) => o.meta(),
            DiagnosticsResource::Role(o) => o.meta(),
            DiagnosticsResource::RoleBinding(o) => o.meta(),
            DiagnosticsResource::ServiceAccount(o) => o.meta(),
            DiagnosticsResource::DaemonSet(o) => o.meta(),
            DiagnosticsResource::Job(o) => o.meta(),
        };
        meta.name.clone().unwrap_or_default()
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Create the object, treating "already exists" as success.
    pub async fn create(&self, client: &Client) -> Result<()> {
        let c = client.clone();
        match self {
            DiagnosticsResource::Namespace(o) => create_if_absent(Api::all(c), o).await?,
            DiagnosticsResource::ClusterRole(o) => create_if_absent(Api::all(c), o).await?,
            DiagnosticsResource::ClusterRoleBinding(o) => create_if_absent(Api::all(c), o).await?,
            DiagnosticsResource::Role(o) => {
                create_if_absent(Api::namespaced(c, &namespace_of(o)), o).await?
            }
            DiagnosticsResource::RoleBinding(o) => {
                create_if_absent(Api::namespaced(c, &namespace_of(o)), o).await?
            }
            DiagnosticsResource::ServiceAccount(o) => {
                create_if_absent(Api::namespaced(c, &namespace_of(o)), o).await?
            }
            DiagnosticsResource::DaemonSet(o) => {
                create_if_absent(Api::namespaced(c, &namespace_of(o)), o).await?
            }
            DiagnosticsResource::Job(o) => {
                create_if_absent(Api::namespaced(c, &namespace_of(o)), o).await?
            }
        }
        debug!(kind = self.kind(), name = %self.name(), "resource_created");
        Ok(())
    }

    /// Delete the object in the background, treating "not found" as success.
    pub async fn delete(&self, client: &Client) -> Result<()> {
        let c = client.clone();
        let name = self.name();
        match self {
            DiagnosticsResource::Namespace(_) => delete_if_present::<Namespace>(Api::all(c), &name).await?,
            DiagnosticsResource::ClusterRole(_) => {
                delete_if_present::<ClusterRole>(Api::all(c), &name).await?
            }
            DiagnosticsResource::ClusterRoleBinding(_) => {
                delete_if_present::<ClusterRoleBinding>(Api::all(c), &name).await?
            }
            DiagnosticsResource::Role(o) => {
                delete_if_present::<Role>(Api::namespaced(c, &namespace_of(o)), &name).await?
            }
            DiagnosticsResource::RoleBinding(o) => {
                delete_if_present::<RoleBinding>(Api::namespaced(c, &namespace_of(o)), &name)
                    .await?
            }
            DiagnosticsResource::ServiceAccount(o) => {
                delete_if_present::<ServiceAccount>(Api::namespaced(c, &namespace_of(o)), &name)
                    .await?
            }
            DiagnosticsResource::DaemonSet(o) => {
                delete_if_present::<DaemonSet>(Api::namespaced(c, &namespace_of(o)), &name).await?
            }
            DiagnosticsResource::Job(o) => {
                delete_if_present::<Job>(Api::namespaced(c, &namespace_of(o)), &name).await?
            }
        }
        debug!(kind = self.kind(), name = %name, "resource_deleted");
        Ok(())
    }
}

fn namespace_of<K: Resource>(obj: &K) -> String {
    obj.meta()
        .namespace
        .clone()
        .unwrap_or_else(|| NAMESPACE.to_string())
}

async fn create_if_absent<K>(api: Api<K>, obj: &K) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    match api.create(&PostParams::default(), obj).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(err)) if err.code == 409 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn delete_if_present<K>(api: Api<K>, name: &str) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    match api.delete(name, &DeleteParams::background()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(err)) if err.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/* ============================= PLAN ============================= */

/// Ordered set of objects for one diagnostics run.
#[derive(Clone, Debug)]
pub struct ResourcePlan {
    creation: Vec<DiagnosticsResource>,
}

impl ResourcePlan {
    /// Namespace and RBAC first, then the workload(s) for `config.mode`.
    /// `node_names` is only consulted in Job mode. Fails if two nodes would
    /// end up with the same Job.
    pub fn new(config: &DiagnosticsConfig, node_names: &[String]) -> Result<Self> {
        let mut creation = base_resources();

        match config.mode {
            DeploymentMode::DaemonSet => {
                creation.push(DiagnosticsResource::DaemonSet(daemonset(config)));
            }
            DeploymentMode::Job => {
                let mut seen = BTreeMap::new();
                for node in node_names {
                    let job = job_for_node(node, config);
                    let name = job.metadata.name.clone().unwrap_or_default();
                    if let Some(other) = seen.insert(name.clone(), node) {
                        return Err(DiagnosticsError::NameCollision {
                            kind: "Job",
                            name,
                            first: other.clone(),
                            second: node.clone(),
                        });
                    }
                    creation.push(DiagnosticsResource::Job(job));
                }
            }
        }

        Ok(Self { creation })
    }

    /// Everything a previous run may have left behind. Jobs are namespaced
    /// and go away with the namespace.
    pub fn teardown() -> Self {
        let config = DiagnosticsConfig {
            mode: DeploymentMode::DaemonSet,
            ..Default::default()
        };
        let mut creation = base_resources();
        creation.push(DiagnosticsResource::DaemonSet(daemonset(&config)));
        Self { creation }
    }

    pub fn creation_order(&self) -> &[DiagnosticsResource] {
        &self.creation
    }

    /// Exact reverse of the creation order, ending with the namespace.
    pub fn deletion_order(&self) -> impl Iterator<Item = &DiagnosticsResource> {
        self.creation.iter().rev()
    }

    pub fn render_yaml(&self) -> Result<String> {
        render_yaml(&self.creation)
    }

    pub async fn create_all(&self, client: &Client) -> Result<()> {
        for resource in self.creation_order() {
            resource.create(client).await?;
        }
        info!(count = self.creation.len(), "resources_created");
        Ok(())
    }

    pub async fn delete_all(&self, client: &Client) -> Result<()> {
        for resource in self.deletion_order() {
            resource.delete(client).await?;
        }
        info!(count = self.creation.len(), "resources_deleted");
        Ok(())
    }
}

fn base_resources() -> Vec<DiagnosticsResource> {
    vec![
        DiagnosticsResource::Namespace(namespace()),
        DiagnosticsResource::ClusterRole(cluster_role()),
        DiagnosticsResource::ClusterRoleBinding(cluster_role_binding()),
        DiagnosticsResource::Role(role()),
        DiagnosticsResource::RoleBinding(role_binding()),
        DiagnosticsResource::ServiceAccount(service_account()),
    ]
}

/// Multi-document YAML suitable for `kubectl apply -f -`.
pub fn render_yaml(resources: &[DiagnosticsResource]) -> Result<String> {
    let parts = resources
        .iter()
        .map(DiagnosticsResource::to_yaml)
        .collect::<Result<Vec<_>>>()?;
    Ok(parts.join("---\n"))
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;

    fn to_value<T: Serialize>(obj: &T) -> serde_yaml::Value {
        let yaml = serde_yaml::to_string(obj).expect("serializable");
        serde_yaml::from_str(&yaml).expect("valid YAML")
    }

    fn env_names(env: &[EnvVar]) -> Vec<&str> {
        env.iter().map(|e| e.name.as_str()).collect()
    }

    // ── Namespace & RBAC ──

    #[test]
    fn test_namespace_fields() {
        let doc = to_value(&namespace());
        assert_eq!(doc["kind"], "Namespace");
        assert_eq!(doc["apiVersion"], "v1");
        assert_eq!(doc["metadata"]["name"], "runai-preinstall-diagnostics");
        assert_eq!(doc["metadata"]["labels"]["runai-preinstall-diagnostics"], "");
    }

    #[test]
    fn test_cluster_role_rules() {
        let doc = to_value(&cluster_role());
        assert_eq!(doc["kind"], "ClusterRole");
        let rules = doc["rules"].as_sequence().expect("rules should be a sequence");
        assert_eq!(rules.len(), 6, "ClusterRole should have 6 rules");
        assert_eq!(rules[2]["apiGroups"][0], "batch");
        assert_eq!(rules[2]["resources"][0], "jobs");
    }

    #[test]
    fn test_role_grants_config_map_access() {
        let doc = to_value(&role());
        assert_eq!(doc["kind"], "Role");
        assert_eq!(doc["metadata"]["namespace"], "runai-preinstall-diagnostics");
        assert_eq!(doc["rules"][0]["resources"][0], "configmaps");
        let verbs = doc["rules"][0]["verbs"].as_sequence().unwrap();
        assert!(verbs.iter().any(|v| v == "create"));
        assert!(verbs.iter().any(|v| v == "delete"));
    }

    #[test]
    fn test_bindings_reference_service_account() {
        let crb = to_value(&cluster_role_binding());
        assert_eq!(crb["roleRef"]["kind"], "ClusterRole");
        assert_eq!(crb["subjects"][0]["kind"], "ServiceAccount");
        assert_eq!(crb["subjects"][0]["namespace"], "runai-preinstall-diagnostics");

        let rb = to_value(&role_binding());
        assert_eq!(rb["roleRef"]["kind"], "Role");
        assert_eq!(rb["roleRef"]["name"], "runai-preinstall-diagnostics");
        assert_eq!(rb["subjects"][0]["name"], "runai-preinstall-diagnostics");
    }

    // ── Workloads ──

    #[test]
    fn test_daemonset_fields() {
        let config = DiagnosticsConfig {
            mode: DeploymentMode::DaemonSet,
            ..Default::default()
        };
        let doc = to_value(&daemonset(&config));

        assert_eq!(doc["kind"], "DaemonSet");
        assert_eq!(doc["spec"]["minReadySeconds"], 10);
        assert_eq!(
            doc["spec"]["selector"]["matchLabels"]["runai-preinstall-diagnostics"],
            ""
        );
        let container = &doc["spec"]["template"]["spec"]["containers"][0];
        assert_eq!(container["image"], crate::config::DEFAULT_IMAGE);
        assert_eq!(container["ports"][0]["containerPort"], 8080);
        assert_eq!(container["args"][2], "daemonset");
    }

    #[test]
    fn test_job_is_pinned_to_node() {
        let job = job_for_node("worker-1", &DiagnosticsConfig::default());
        let doc = to_value(&job);

        assert_eq!(doc["kind"], "Job");
        assert_eq!(doc["metadata"]["name"], "runai-preinstall-diagnostics-worker-1");
        let pod = &doc["spec"]["template"]["spec"];
        assert_eq!(pod["nodeName"], "worker-1");
        assert_eq!(pod["restartPolicy"], "Never");
        assert_eq!(pod["serviceAccountName"], "runai-preinstall-diagnostics");
        assert_eq!(
            doc["spec"]["template"]["metadata"]["labels"]["runai-preinstall-diagnostics"],
            "worker-1"
        );
        assert_eq!(pod["containers"][0]["args"][2], "job");
    }

    #[test]
    fn test_node_env_always_has_downward_api_vars() {
        let env = node_env(&DiagnosticsConfig::default());
        assert_eq!(
            env_names(&env),
            vec!["NODE_NAME", "POD_NAME", "POD_NAMESPACE", "DIAGNOSTICS_MODE"]
        );
        let node = &env[0];
        assert_eq!(
            node.value_from.as_ref().unwrap().field_ref.as_ref().unwrap().field_path,
            "spec.nodeName"
        );
    }

    #[test]
    fn test_node_env_injects_optional_settings() {
        let config = DiagnosticsConfig {
            backend_fqdn: Some("runai.example.com".to_string()),
            registry: Some("https://registry.example.com".to_string()),
            saas_address: Some(String::new()),
            ..Default::default()
        };
        let env = node_env(&config);
        let names = env_names(&env);
        assert!(names.contains(&"BACKEND_FQDN"));
        assert!(names.contains(&"REGISTRY"));
        assert!(!names.contains(&"RUNAI_SAAS"), "empty values are not injected");

        let backend = env.iter().find(|e| e.name == "BACKEND_FQDN").unwrap();
        assert_eq!(backend.value.as_deref(), Some("runai.example.com"));
    }

    #[test]
    fn test_image_override_and_pull_secret() {
        let config = DiagnosticsConfig {
            image: "registry.local/diag:1.0".to_string(),
            image_pull_secret: Some("regcred".to_string()),
            ..Default::default()
        };
        let doc = to_value(&job_for_node("n1", &config));
        let pod = &doc["spec"]["template"]["spec"];
        assert_eq!(pod["containers"][0]["image"], "registry.local/diag:1.0");
        assert_eq!(pod["imagePullSecrets"][0]["name"], "regcred");

        let without = to_value(&job_for_node("n1", &DiagnosticsConfig::default()));
        assert!(without["spec"]["template"]["spec"]["imagePullSecrets"].is_null());
    }

    #[test]
    fn test_tolerations_cover_control_plane() {
        let doc = to_value(&daemonset(&DiagnosticsConfig::default()));
        let tolerations = doc["spec"]["template"]["spec"]["tolerations"]
            .as_sequence()
            .unwrap();
        assert_eq!(tolerations.len(), 2);
        assert!(tolerations.iter().all(|t| t["operator"] == "Exists"));
    }

    #[test]
    fn test_dns_label_name_keeps_valid_names() {
        assert_eq!(dns_label_name("diag", "worker-1"), "diag-worker-1");
        assert_eq!(job_name("gpu-7"), "runai-preinstall-diagnostics-gpu-7");
    }

    #[test]
    fn test_dns_label_name_sanitizes_node_names() {
        let name = dns_label_name("diag", "Node_1.Example");
        assert!(name.starts_with("diag-node-1-example-"), "got {name}");
        assert!(is_dns_label(&name));
        assert_ne!(name, dns_label_name("diag", "node-1-example"));

        let long = "n".repeat(80);
        let name = job_name(&long);
        assert_eq!(name.len(), 63);
        assert!(is_dns_label(&name));
    }

    #[test]
    fn test_long_node_names_sharing_a_prefix_stay_distinct() {
        let prefix = "gke-prod-cluster-gpu-pool-a100-8c2d1f3e";
        let a = format!("{prefix}-abcd");
        let b = format!("{prefix}-wxyz");

        assert_ne!(job_name(&a), job_name(&b));
        assert_ne!(results_config_map_name(&a), results_config_map_name(&b));
        assert!(job_name(&a).len() <= 63);
        assert_eq!(job_name(&a), job_name(&a), "names are deterministic");
    }

    #[test]
    fn test_node_label_value_is_bounded() {
        assert_eq!(node_label_value("worker-1"), "worker-1");
        assert_eq!(node_label_value("ip-10-0-0-1.ec2.internal"), "ip-10-0-0-1.ec2.internal");

        let long = "n".repeat(70);
        let value = node_label_value(&long);
        assert!(value.len() <= 63);
        assert!(is_label_value(&value));
        assert_ne!(value, node_label_value(&"n".repeat(71)));
    }

    #[test]
    fn test_job_labels_fit_for_long_node_names() {
        let long = "n".repeat(70);
        let doc = to_value(&job_for_node(&long, &DiagnosticsConfig::default()));
        let label = doc["spec"]["template"]["metadata"]["labels"]["runai-preinstall-diagnostics"]
            .as_str()
            .unwrap();
        assert!(label.len() <= 63);
        assert_eq!(doc["spec"]["template"]["spec"]["nodeName"], long.as_str());

        let cm = node_results_config_map(&long, "[]".to_string());
        assert_eq!(cm.metadata.labels.unwrap()[RESOURCE_NAME], label);
    }

    #[test]
    fn test_results_config_map_payload() {
        let cm = node_results_config_map("worker-2", "[]".to_string());
        assert_eq!(
            cm.metadata.name.as_deref(),
            Some("runai-preinstall-diagnostics-worker-2")
        );
        assert_eq!(cm.data.unwrap()[RESULTS_KEY], "[]");
    }

    // ── Plan ordering ──

    #[test]
    fn test_job_plan_creation_order() {
        let nodes = vec!["a".to_string(), "b".to_string()];
        let plan = ResourcePlan::new(&DiagnosticsConfig::default(), &nodes).unwrap();
        let kinds: Vec<&str> = plan.creation_order().iter().map(|r| r.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                "Namespace",
                "ClusterRole",
                "ClusterRoleBinding",
                "Role",
                "RoleBinding",
                "ServiceAccount",
                "Job",
                "Job"
            ]
        );
    }

    #[test]
    fn test_job_plan_rejects_duplicate_job_names() {
        let nodes = vec!["worker-1".to_string(), "worker-1".to_string()];
        let err = ResourcePlan::new(&DiagnosticsConfig::default(), &nodes).unwrap_err();
        assert!(matches!(
            err,
            DiagnosticsError::NameCollision { kind: "Job", ref name, .. }
                if name == "runai-preinstall-diagnostics-worker-1"
        ));
    }

    #[test]
    fn test_deletion_order_is_reverse_of_creation() {
        let plan = ResourcePlan::new(&DiagnosticsConfig::default(), &["a".to_string()]).unwrap();
        let created: Vec<String> = plan.creation_order().iter().map(|r| r.kind().to_string()).collect();
        let mut deleted: Vec<String> = plan.deletion_order().map(|r| r.kind().to_string()).collect();
        deleted.reverse();
        assert_eq!(created, deleted);
        assert_eq!(plan.deletion_order().last().unwrap().kind(), "Namespace");
    }

    #[test]
    fn test_daemonset_plan_ignores_node_names() {
        let config = DiagnosticsConfig {
            mode: DeploymentMode::DaemonSet,
            ..Default::default()
        };
        let plan = ResourcePlan::new(&config, &["a".to_string(), "b".to_string()]).unwrap();
        let workloads: Vec<&str> = plan
            .creation_order()
            .iter()
            .map(|r| r.kind())
            .filter(|k| *k == "DaemonSet" || *k == "Job")
            .collect();
        assert_eq!(workloads, vec!["DaemonSet"]);
    }

    #[test]
    fn test_teardown_plan_includes_daemonset() {
        let plan = ResourcePlan::teardown();
        assert!(plan.creation_order().iter().any(|r| r.kind() == "DaemonSet"));
        assert_eq!(plan.creation_order().len(), 7);
    }

    #[test]
    fn test_render_yaml_documents_parse() {
        let plan = ResourcePlan::new(&DiagnosticsConfig::default(), &["a".to_string()]).unwrap();
        let output = plan.render_yaml().unwrap();
        let docs: Vec<&str> = output.split("---\n").collect();
        assert_eq!(docs.len(), 7);
        for doc in docs {
            let value: serde_yaml::Value = serde_yaml::from_str(doc).expect("document should parse");
            assert!(value["kind"].is_string());
        }
    }
}
