//! Tablet pod access and pod helpers

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{Api, ListParams, PostParams},
    Client, ResourceExt,
};

use crate::crd::{CELL_LABEL, TABLET_UID_LABEL};
use crate::error::Result;
use crate::topo::TabletAlias;

/// List and update tablet pods
#[async_trait]
pub trait PodStore: Send + Sync {
    /// List pods in `namespace` carrying every label in `labels`
    async fn list(&self, namespace: &str, labels: &BTreeMap<String, String>) -> Result<Vec<Pod>>;

    /// Write back a modified pod
    async fn update(&self, pod: &Pod) -> Result<Pod>;
}

/// [`PodStore`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubePodStore {
    client: Client,
}

impl KubePodStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PodStore for KubePodStore {
    async fn list(&self, namespace: &str, labels: &BTreeMap<String, String>) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(&label_selector(labels));
        Ok(api.list(&params).await?.items)
    }

    async fn update(&self, pod: &Pod) -> Result<Pod> {
        let namespace = pod.namespace().unwrap_or_else(|| "default".to_string());
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &namespace);
        Ok(api
            .replace(&pod.name_any(), &PostParams::default(), pod)
            .await?)
    }
}

/// Render an equality-based label selector (`a=1,b=2`)
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Tablet alias of a tablet pod, from its cell and uid labels
pub fn tablet_alias_from_pod(pod: &Pod) -> Option<TabletAlias> {
    let labels = pod.metadata.labels.as_ref()?;
    let cell = labels.get(CELL_LABEL)?;
    let uid = labels.get(TABLET_UID_LABEL)?.parse().ok()?;
    Some(TabletAlias::new(cell.clone(), uid))
}

/// Whether the pod's `Ready` condition is `True`
pub fn is_pod_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conditions| conditions.iter().find(|c| c.type_ == "Ready"))
        .map(|c| c.status == "True")
        .unwrap_or(false)
}

/// Image of the named container, if the pod has it
pub fn container_image<'a>(pod: &'a Pod, container_name: &str) -> Option<&'a str> {
    pod.spec
        .as_ref()?
        .containers
        .iter()
        .find(|c| c.name == container_name)
        .and_then(|c| c.image.as_deref())
}
