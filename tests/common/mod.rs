//! Common test utilities for integration tests.
//!
//! [`FakeBackend`] stands in for the storage cluster, the orchestrator and
//! the config store at once. Started mons join the monmap in quorum, removed
//! ones leave it, and every call is recorded in order.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use mon_operator::backend::{ConfigStore, DaemonLifecycle, DeleteOutcome, Placement, QuorumClient};
use mon_operator::error::{Error, Result};
use mon_operator::mon::{Backends, MonCluster, MonSettings, MonTarget};
use mon_operator::types::{
    ClusterMembership, MonConfig, MonInfo, MonMap, MonMapEntry, NodeAssignment, NodeInfo,
    PersistedMonState, QuorumStatus,
};

pub const CLUSTER_NAME: &str = "rook-ceph";
pub const MON_PORT: u16 = 6789;
pub const MON_OUT_TIMEOUT: Duration = Duration::from_secs(600);

/// A recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    QuorumStatus,
    RemoveFromQuorum(String),
    Assign(String),
    CreateEndpoint(String),
    DeleteEndpoint(String),
    CreateDeployment(String),
    DeleteDeployment(String),
    Start(String),
    SaveMembership,
    WriteConnectionConfig,
}

#[derive(Default)]
struct FakeState {
    /// Monmap in rank order: (name, in quorum)
    monmap: Vec<(String, bool)>,
    deployments: BTreeSet<String>,
    services: BTreeSet<String>,
    calls: Vec<Call>,
    saved: Vec<PersistedMonState>,
    connection_configs: Vec<ClusterMembership>,
    /// Every mon config passed to a start, in order
    started: Vec<MonConfig>,
    fail_status: bool,
    fail_start: bool,
    /// Mons whose next start fails even when `fail_start` is off
    fail_start_of: BTreeSet<String>,
    fail_quorum_removal: bool,
}

/// In-memory storage cluster and orchestrator.
#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<FakeState>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Monmap with the given mons, all in quorum, each with a deployment and service.
    pub fn with_mons(names: &[&str]) -> Arc<Self> {
        let fake = Self::new();
        {
            let mut state = fake.state.lock().unwrap();
            for name in names {
                state.monmap.push((name.to_string(), true));
                state.deployments.insert(resource(name));
                state.services.insert(resource(name));
            }
        }
        fake
    }

    pub fn set_in_quorum(&self, name: &str, in_quorum: bool) {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.monmap.iter_mut().find(|(n, _)| n == name) {
            entry.1 = in_quorum;
        }
    }

    /// Drop a mon from the monmap without going through removal.
    pub fn forget_mon(&self, name: &str) {
        self.state.lock().unwrap().monmap.retain(|(n, _)| n != name);
    }

    /// Add a mon the operator never recorded.
    pub fn add_unknown_mon(&self, name: &str) {
        self.state.lock().unwrap().monmap.push((name.to_string(), true));
    }

    pub fn fail_status(&self, fail: bool) {
        self.state.lock().unwrap().fail_status = fail;
    }

    pub fn fail_start(&self, fail: bool) {
        self.state.lock().unwrap().fail_start = fail;
    }

    /// Fail the next start of the mon `name` only.
    pub fn fail_start_of(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_start_of
            .insert(name.to_string());
    }

    pub fn fail_quorum_removal(&self, fail: bool) {
        self.state.lock().unwrap().fail_quorum_removal = fail;
    }

    pub fn monmap(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .monmap
            .iter()
            .map(|(n, _)| n.clone())
            .collect()
    }

    pub fn has_deployment(&self, name: &str) -> bool {
        self.state.lock().unwrap().deployments.contains(&resource(name))
    }

    pub fn has_service(&self, name: &str) -> bool {
        self.state.lock().unwrap().services.contains(&resource(name))
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.state.lock().unwrap().calls.iter().filter(|c| matches(*c)).count()
    }

    /// The config the mon `name` was last started with.
    pub fn started_config(&self, name: &str) -> Option<MonConfig> {
        self.state
            .lock()
            .unwrap()
            .started
            .iter()
            .rev()
            .find(|mon| mon.daemon_name == name)
            .cloned()
    }

    pub fn save_count(&self) -> usize {
        self.state.lock().unwrap().saved.len()
    }

    pub fn last_saved(&self) -> Option<PersistedMonState> {
        self.state.lock().unwrap().saved.last().cloned()
    }

    pub fn last_connection_config(&self) -> Option<ClusterMembership> {
        self.state.lock().unwrap().connection_configs.last().cloned()
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }
}

fn resource(name: &str) -> String {
    mon_operator::types::resource_name(name)
}

/// Index for a letter name: `a` is 0, `aa` is 26.
pub fn name_to_index(name: &str) -> Option<u32> {
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_lowercase()) {
        return None;
    }
    let n = name
        .bytes()
        .fold(0u64, |n, b| n * 26 + (b - b'a') as u64 + 1);
    u32::try_from(n - 1).ok()
}

fn ip_for(name: &str) -> String {
    format!("10.96.0.{}", name_to_index(name).unwrap_or(0) + 10)
}

#[async_trait]
impl QuorumClient for FakeBackend {
    async fn quorum_status(&self, _cluster_name: &str) -> Result<QuorumStatus> {
        self.record(Call::QuorumStatus);
        let state = self.state.lock().unwrap();
        if state.fail_status {
            return Err(Error::QuorumStatus("connection refused".to_string()));
        }

        let mons = state
            .monmap
            .iter()
            .enumerate()
            .map(|(rank, (name, _))| MonMapEntry {
                name: name.clone(),
                rank: rank as i32,
                endpoint: format!("{}:{}/0", ip_for(name), MON_PORT),
            })
            .collect();
        let quorum = state
            .monmap
            .iter()
            .enumerate()
            .filter(|(_, (_, in_quorum))| *in_quorum)
            .map(|(rank, _)| rank as i32)
            .collect();

        Ok(QuorumStatus {
            quorum,
            mon_map: MonMap { mons },
        })
    }

    async fn remove_from_quorum(&self, _cluster_name: &str, daemon_name: &str) -> Result<()> {
        self.record(Call::RemoveFromQuorum(daemon_name.to_string()));
        let mut state = self.state.lock().unwrap();
        if state.fail_quorum_removal {
            return Err(Error::Command {
                command: format!("mon remove {}", daemon_name),
                reason: "timed out".to_string(),
            });
        }
        state.monmap.retain(|(n, _)| n != daemon_name);
        Ok(())
    }
}

#[async_trait]
impl DaemonLifecycle for FakeBackend {
    async fn create_or_update_deployment(&self, mon: &MonConfig) -> Result<()> {
        self.record(Call::CreateDeployment(mon.daemon_name.clone()));
        self.state
            .lock()
            .unwrap()
            .deployments
            .insert(mon.resource_name.clone());
        Ok(())
    }

    async fn delete_deployment(&self, resource_name: &str) -> Result<DeleteOutcome> {
        self.record(Call::DeleteDeployment(resource_name.to_string()));
        let removed = self.state.lock().unwrap().deployments.remove(resource_name);
        Ok(if removed {
            DeleteOutcome::Deleted
        } else {
            DeleteOutcome::NotFound
        })
    }

    async fn create_or_update_endpoint(&self, mon: &MonConfig) -> Result<String> {
        self.record(Call::CreateEndpoint(mon.daemon_name.clone()));
        self.state
            .lock()
            .unwrap()
            .services
            .insert(mon.resource_name.clone());
        Ok(ip_for(&mon.daemon_name))
    }

    async fn delete_endpoint(&self, resource_name: &str) -> Result<DeleteOutcome> {
        self.record(Call::DeleteEndpoint(resource_name.to_string()));
        let removed = self.state.lock().unwrap().services.remove(resource_name);
        Ok(if removed {
            DeleteOutcome::Deleted
        } else {
            DeleteOutcome::NotFound
        })
    }

    async fn start_and_confirm(&self, mon: &MonConfig) -> Result<()> {
        self.record(Call::Start(mon.daemon_name.clone()));
        let mut state = self.state.lock().unwrap();
        state.deployments.insert(mon.resource_name.clone());
        state.started.push(mon.clone());
        if state.fail_start || state.fail_start_of.remove(&mon.daemon_name) {
            return Err(Error::Timeout(format!("mon {} to start", mon.daemon_name)));
        }
        if !state.monmap.iter().any(|(n, _)| n == &mon.daemon_name) {
            state.monmap.push((mon.daemon_name.clone(), true));
        }
        Ok(())
    }
}

#[async_trait]
impl ConfigStore for FakeBackend {
    async fn load(&self) -> Result<Option<PersistedMonState>> {
        Ok(self.last_saved())
    }

    async fn save_membership(&self, state: &PersistedMonState) -> Result<()> {
        self.record(Call::SaveMembership);
        self.state.lock().unwrap().saved.push(state.clone());
        Ok(())
    }

    async fn write_connection_config(
        &self,
        _cluster_name: &str,
        membership: &ClusterMembership,
    ) -> Result<()> {
        self.record(Call::WriteConnectionConfig);
        self.state
            .lock()
            .unwrap()
            .connection_configs
            .push(membership.clone());
        Ok(())
    }
}

#[async_trait]
impl Placement for FakeBackend {
    async fn assign(&self, mon: &MonConfig, _current: &NodeAssignment) -> Result<NodeInfo> {
        self.record(Call::Assign(mon.daemon_name.clone()));
        let node = format!("node-{}", mon.daemon_name);
        Ok(NodeInfo {
            name: node.clone(),
            hostname: node,
            address: format!("192.168.0.{}", mon.id + 10),
        })
    }
}

// =============================================================================
// Cluster fixtures
// =============================================================================

pub fn settings() -> MonSettings {
    MonSettings {
        cluster_name: CLUSTER_NAME.to_string(),
        mon_port: MON_PORT,
        mon_out_timeout: MON_OUT_TIMEOUT,
        health_interval: Duration::from_secs(45),
    }
}

pub fn backends(fake: &Arc<FakeBackend>) -> Backends {
    Backends {
        quorum: fake.clone(),
        lifecycle: fake.clone(),
        store: fake.clone(),
        placement: fake.clone(),
    }
}

/// Persisted state recording `names` as members.
pub fn persisted(names: &[&str]) -> PersistedMonState {
    let membership: BTreeMap<String, MonInfo> = names
        .iter()
        .map(|name| (name.to_string(), MonInfo::new(*name, &ip_for(name), MON_PORT)))
        .collect();
    let max_mon_id = names.iter().filter_map(|n| name_to_index(n)).max();

    PersistedMonState {
        membership,
        max_mon_id,
        node_mapping: NodeAssignment::new(),
    }
}

/// A cluster whose membership holds `members`, targeting `desired` mons.
pub fn cluster(
    fake: &Arc<FakeBackend>,
    members: &[&str],
    desired: u32,
) -> (Arc<MonCluster>, watch::Sender<MonTarget>) {
    cluster_with_target(fake, members, MonTarget::new(desired))
}

pub fn cluster_with_target(
    fake: &Arc<FakeBackend>,
    members: &[&str],
    target: MonTarget,
) -> (Arc<MonCluster>, watch::Sender<MonTarget>) {
    let (tx, rx) = watch::channel(target);
    let cluster = MonCluster::new(settings(), backends(fake), rx, persisted(members));
    (Arc::new(cluster), tx)
}
