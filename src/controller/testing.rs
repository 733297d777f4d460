//! In-memory collaborators and fixtures for controller tests

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    Container, ObjectReference, Pod, PodCondition, PodSpec, PodStatus,
};
use kube::api::ObjectMeta;
use kube::ResourceExt;

use crate::crd::{
    CELL_LABEL, CLUSTER_LABEL, COMPONENT_LABEL, EXTERNAL_MASTER_TABLET_POOL_NAME, KEYSPACE_LABEL,
    MYSQLD_CONTAINER_NAME, SHARD_LABEL, TABLET_TYPE_LABEL, TABLET_UID_LABEL,
    VTTABLET_COMPONENT_NAME,
};
use crate::error::{Error, Result};
use crate::topo::{
    PlannedReparentRequest, ReplicationStatus, ShardRecord, Tablet, TabletAlias, TabletManager,
    TabletType, TopologyStore,
};

use super::events::{EventRecorder, EventType};
use super::pods::PodStore;
use super::recorder::{DrainMetrics, ReparentOutcome, ShardMetricLabels};

pub const CELL: &str = "zone1";
pub const NAMESPACE: &str = "default";

pub fn alias(uid: u32) -> String {
    TabletAlias::new(CELL, uid).to_string()
}

pub fn tablet(uid: u32, tablet_type: TabletType) -> Tablet {
    Tablet {
        alias: TabletAlias::new(CELL, uid),
        tablet_type,
        keyspace: "commerce".to_string(),
        shard: "-80".to_string(),
        hostname: format!("tablet-{}", uid),
    }
}

/// GTID position containing transactions `1..=n` of a single server
pub fn gtid_position(n: u64) -> String {
    format!("MySQL56/3e11fa47-71ca-11e1-9e33-c80aa9429562:1-{}", n)
}

pub fn ready_pod(uid: u32) -> Pod {
    PodBuilder::new(uid).ready().build()
}

/// Builds tablet pods labelled the way the shard's pods are
pub struct PodBuilder {
    pod: Pod,
}

impl PodBuilder {
    pub fn new(uid: u32) -> Self {
        let labels = BTreeMap::from([
            (COMPONENT_LABEL.to_string(), VTTABLET_COMPONENT_NAME.to_string()),
            (CLUSTER_LABEL.to_string(), "main".to_string()),
            (KEYSPACE_LABEL.to_string(), "commerce".to_string()),
            (SHARD_LABEL.to_string(), "x-80".to_string()),
            (CELL_LABEL.to_string(), CELL.to_string()),
            (TABLET_UID_LABEL.to_string(), uid.to_string()),
            (TABLET_TYPE_LABEL.to_string(), "replica".to_string()),
        ]);
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some(format!("main-commerce-x-80-{}-{}", CELL, uid)),
                namespace: Some(NAMESPACE.to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: MYSQLD_CONTAINER_NAME.to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            status: Some(PodStatus::default()),
        };
        Self { pod }
    }

    pub fn ready(mut self) -> Self {
        if let Some(status) = self.pod.status.as_mut() {
            status.conditions = Some(vec![PodCondition {
                type_: "Ready".to_string(),
                status: "True".to_string(),
                ..Default::default()
            }]);
        }
        self
    }

    pub fn annotation(mut self, key: &str) -> Self {
        self.pod
            .annotations_mut()
            .insert(key.to_string(), "2024-01-01T00:00:00Z".to_string());
        self
    }

    pub fn external_master_pool(mut self) -> Self {
        self.pod.labels_mut().insert(
            TABLET_TYPE_LABEL.to_string(),
            EXTERNAL_MASTER_TABLET_POOL_NAME.to_string(),
        );
        self
    }

    pub fn mysqld_image(mut self, image: &str) -> Self {
        if let Some(spec) = self.pod.spec.as_mut() {
            for container in &mut spec.containers {
                if container.name == MYSQLD_CONTAINER_NAME {
                    container.image = Some(image.to_string());
                }
            }
        }
        self
    }

    pub fn build(self) -> Pod {
        self.pod
    }
}

fn conflict(name: &str) -> Error {
    Error::KubeError(kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("the object {} has been modified", name),
        reason: "Conflict".to_string(),
        code: 409,
    }))
}

/// Pods held in memory. Updates replace the stored pod by name.
#[derive(Default)]
pub struct FakePodStore {
    pods: Mutex<Vec<Pod>>,
    fail_list: bool,
    fail_update: Option<String>,
    updates: Mutex<Vec<String>>,
}

impl FakePodStore {
    pub fn new(pods: Vec<Pod>) -> Self {
        Self {
            pods: Mutex::new(pods),
            ..Default::default()
        }
    }

    pub fn failing_list(mut self) -> Self {
        self.fail_list = true;
        self
    }

    /// Make updates of the named pod fail
    pub fn failing_update(mut self, name: &str) -> Self {
        self.fail_update = Some(name.to_string());
        self
    }

    pub fn pod(&self, uid: u32) -> Pod {
        let name = PodBuilder::new(uid).build().name_any();
        self.pods
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.name_any() == name)
            .cloned()
            .unwrap()
    }

    /// Mutate a stored pod, the way the drainer would between passes
    pub fn edit(&self, uid: u32, f: impl FnOnce(&mut Pod)) {
        let name = PodBuilder::new(uid).build().name_any();
        let mut pods = self.pods.lock().unwrap();
        let pod = pods.iter_mut().find(|p| p.name_any() == name).unwrap();
        f(pod);
    }

    /// Names of pods written so far, in order
    pub fn updates(&self) -> Vec<String> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl PodStore for FakePodStore {
    async fn list(&self, _namespace: &str, labels: &BTreeMap<String, String>) -> Result<Vec<Pod>> {
        if self.fail_list {
            return Err(conflict("pods"));
        }
        Ok(self
            .pods
            .lock()
            .unwrap()
            .iter()
            .filter(|pod| {
                let pod_labels = pod.labels();
                labels.iter().all(|(k, v)| pod_labels.get(k) == Some(v))
            })
            .cloned()
            .collect())
    }

    async fn update(&self, pod: &Pod) -> Result<Pod> {
        let name = pod.name_any();
        if self.fail_update.as_deref() == Some(name.as_str()) {
            return Err(conflict(&name));
        }
        let mut pods = self.pods.lock().unwrap();
        if let Some(stored) = pods.iter_mut().find(|p| p.name_any() == name) {
            *stored = pod.clone();
        }
        self.updates.lock().unwrap().push(name);
        Ok(pod.clone())
    }
}

/// Topology held in memory
pub struct FakeTopology {
    shard: Mutex<ShardRecord>,
    tablets: Mutex<BTreeMap<String, Tablet>>,
    fail: bool,
}

impl FakeTopology {
    pub fn new(primary: Option<u32>, tablets: Vec<Tablet>) -> Self {
        Self {
            shard: Mutex::new(ShardRecord {
                keyspace: "commerce".to_string(),
                name: "-80".to_string(),
                primary_alias: primary.map(|uid| TabletAlias::new(CELL, uid)),
            }),
            tablets: Mutex::new(
                tablets
                    .into_iter()
                    .map(|t| (t.alias_string(), t))
                    .collect(),
            ),
            fail: false,
        }
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Move the primary role, as a completed reparent would
    pub fn set_primary(&self, uid: u32) {
        let mut shard = self.shard.lock().unwrap();
        let mut tablets = self.tablets.lock().unwrap();
        if let Some(old) = shard.primary_alias.replace(TabletAlias::new(CELL, uid)) {
            if let Some(t) = tablets.get_mut(&old.to_string()) {
                t.tablet_type = TabletType::Replica;
            }
        }
        if let Some(t) = tablets.get_mut(&alias(uid)) {
            t.tablet_type = TabletType::Primary;
        }
    }
}

#[async_trait]
impl TopologyStore for FakeTopology {
    async fn get_shard(&self, _keyspace: &str, _shard: &str) -> Result<ShardRecord> {
        if self.fail {
            return Err(Error::TopologyError("node doesn't exist".to_string()));
        }
        Ok(self.shard.lock().unwrap().clone())
    }

    async fn get_tablet_map(
        &self,
        _keyspace: &str,
        _shard: &str,
        cells: &[String],
    ) -> Result<BTreeMap<String, Tablet>> {
        if self.fail {
            return Err(Error::TopologyError("node doesn't exist".to_string()));
        }
        Ok(self
            .tablets
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, t)| cells.contains(&t.alias.cell))
            .map(|(k, t)| (k.clone(), t.clone()))
            .collect())
    }
}

/// Scripted tablet manager recording every command it receives
#[derive(Default)]
pub struct FakeTabletManager {
    positions: BTreeMap<u32, (String, Duration)>,
    fail_fetches: bool,
    fail_reparent: bool,
    fetches: Mutex<Vec<(String, String)>>,
    reparents: Mutex<Vec<PlannedReparentRequest>>,
    external_reparents: Mutex<Vec<TabletAlias>>,
    type_changes: Mutex<Vec<(TabletAlias, TabletType)>>,
}

impl FakeTabletManager {
    /// Answer replication status for `uid` with `position` after `delay`
    pub fn with_position(mut self, uid: u32, position: String, delay: Duration) -> Self {
        self.positions.insert(uid, (position, delay));
        self
    }

    pub fn failing_fetches(mut self) -> Self {
        self.fail_fetches = true;
        self
    }

    pub fn failing_reparent(mut self) -> Self {
        self.fail_reparent = true;
        self
    }

    pub fn fetches(&self) -> Vec<(String, String)> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn reparents(&self) -> Vec<PlannedReparentRequest> {
        self.reparents.lock().unwrap().clone()
    }

    pub fn external_reparents(&self) -> Vec<TabletAlias> {
        self.external_reparents.lock().unwrap().clone()
    }

    pub fn type_changes(&self) -> Vec<(TabletAlias, TabletType)> {
        self.type_changes.lock().unwrap().clone()
    }
}

#[async_trait]
impl TabletManager for FakeTabletManager {
    async fn replication_status(&self, tablet: &Tablet) -> Result<ReplicationStatus> {
        let Some((position, delay)) = self.positions.get(&tablet.alias.uid) else {
            return Err(Error::RpcError(format!(
                "tablet {} is unreachable",
                tablet.alias
            )));
        };
        tokio::time::sleep(*delay).await;
        Ok(ReplicationStatus {
            position: position.clone(),
        })
    }

    async fn execute_fetch_as_dba(&self, tablet: &Tablet, query: &str) -> Result<()> {
        if self.fail_fetches {
            return Err(Error::RpcError("mysqld is not running".to_string()));
        }
        self.fetches
            .lock()
            .unwrap()
            .push((tablet.alias_string(), query.to_string()));
        Ok(())
    }

    async fn planned_reparent_shard(&self, request: &PlannedReparentRequest) -> Result<()> {
        self.reparents.lock().unwrap().push(request.clone());
        if self.fail_reparent {
            return Err(Error::RpcError(
                "primary-elect tablet is lagging".to_string(),
            ));
        }
        Ok(())
    }

    async fn tablet_externally_reparented(&self, new_primary: &TabletAlias) -> Result<()> {
        self.external_reparents
            .lock()
            .unwrap()
            .push(new_primary.clone());
        if self.fail_reparent {
            return Err(Error::RpcError("topology is locked".to_string()));
        }
        Ok(())
    }

    async fn change_tablet_type(&self, alias: &TabletAlias, tablet_type: TabletType) -> Result<()> {
        self.type_changes
            .lock()
            .unwrap()
            .push((alias.clone(), tablet_type));
        Ok(())
    }
}

/// An event as published
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedEvent {
    pub kind: Option<String>,
    pub name: Option<String>,
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
}

#[derive(Default)]
pub struct CapturingEvents {
    events: Mutex<Vec<RecordedEvent>>,
}

impl CapturingEvents {
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.reason).collect()
    }
}

#[async_trait]
impl EventRecorder for CapturingEvents {
    async fn publish(
        &self,
        object: &ObjectReference,
        event_type: EventType,
        reason: &str,
        message: &str,
    ) {
        self.events.lock().unwrap().push(RecordedEvent {
            kind: object.kind.clone(),
            name: object.name.clone(),
            event_type,
            reason: reason.to_string(),
            message: message.to_string(),
        });
    }
}

#[derive(Default)]
pub struct CapturingMetrics {
    samples: Mutex<Vec<(ShardMetricLabels, ReparentOutcome)>>,
}

impl CapturingMetrics {
    pub fn samples(&self) -> Vec<(ShardMetricLabels, ReparentOutcome)> {
        self.samples.lock().unwrap().clone()
    }
}

impl DrainMetrics for CapturingMetrics {
    fn record_planned_reparent(&self, labels: &ShardMetricLabels, outcome: ReparentOutcome) {
        self.samples.lock().unwrap().push((labels.clone(), outcome));
    }
}
