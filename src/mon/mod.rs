//! Mon quorum management.
//!
//! [`MonCluster`] owns the authoritative mon state (membership, timeout
//! tracker, id counter, node assignment) behind a single orchestration lock.
//! Every operation that mutates that state takes an [`OrchestrationGuard`],
//! so holding the lock is part of the signature rather than a convention.
//!
//! ```text
//!  HealthChecker ──tick──▶ check_health ──▶ remove_mon
//!                                     ├──▶ failover_mon ──▶ remove_mon
//!                                     └──▶ start_mons
//! ```

mod failover;
mod health;
mod removal;

pub use health::{HealthChecker, HealthReport, Remediation, RemediationKind};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::backend::{ConfigStore, DaemonLifecycle, Placement, QuorumClient};
use crate::config::OperatorConfig;
use crate::error::{Error, Result};
use crate::types::{ClusterMembership, NodeAssignment, PersistedMonState};

// ============================================================================
// Settings and collaborators
// ============================================================================

/// Static settings for one mon cluster.
#[derive(Debug, Clone)]
pub struct MonSettings {
    /// Storage cluster name passed to the quorum client.
    pub cluster_name: String,
    pub mon_port: u16,
    /// Time out of quorum before a mon becomes failover-eligible.
    pub mon_out_timeout: Duration,
    /// Interval between health checks.
    pub health_interval: Duration,
}

impl From<&OperatorConfig> for MonSettings {
    fn from(config: &OperatorConfig) -> Self {
        Self {
            cluster_name: config.cluster.name.clone(),
            mon_port: config.cluster.mon_port,
            mon_out_timeout: config.health.mon_out_timeout,
            health_interval: config.health.interval,
        }
    }
}

/// Mon count used until the cluster resource has been observed.
pub const DEFAULT_MON_COUNT: u32 = 3;

/// What the cluster resource asks of its mons.
///
/// Published by the controller and read once at the start of each check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonTarget {
    /// Desired mon count.
    pub count: u32,
    /// Run new mons on the host network, reachable at the node address.
    pub host_network: bool,
    /// Allow placing a new mon on a node that already hosts one.
    pub allow_multiple_per_node: bool,
    /// Mon image; `None` keeps the operator default.
    pub image: Option<String>,
}

impl MonTarget {
    pub fn new(count: u32) -> Self {
        Self {
            count,
            host_network: false,
            allow_multiple_per_node: false,
            image: None,
        }
    }
}

impl From<&OperatorConfig> for MonTarget {
    fn from(config: &OperatorConfig) -> Self {
        Self {
            host_network: config.cluster.host_network,
            ..Self::new(DEFAULT_MON_COUNT)
        }
    }
}

/// The external operations the reconciler depends on.
#[derive(Clone)]
pub struct Backends {
    pub quorum: Arc<dyn QuorumClient>,
    pub lifecycle: Arc<dyn DaemonLifecycle>,
    pub store: Arc<dyn ConfigStore>,
    pub placement: Arc<dyn Placement>,
}

// ============================================================================
// Timeout tracker
// ============================================================================

/// First time each mon was seen out of quorum. Never persisted.
#[derive(Debug, Clone, Default)]
pub struct TimeoutTracker {
    first_seen: BTreeMap<String, Instant>,
}

impl TimeoutTracker {
    /// Record that `name` is out of quorum and return how long it has been.
    pub fn observe_out(&mut self, name: &str, now: Instant) -> Duration {
        let since = *self.first_seen.entry(name.to_string()).or_insert(now);
        now.saturating_duration_since(since)
    }

    /// Forget `name`; returns whether an entry existed.
    pub fn clear(&mut self, name: &str) -> bool {
        self.first_seen.remove(name).is_some()
    }

    /// Tracked mons with their age at `now`.
    pub fn ages(&self, now: Instant) -> impl Iterator<Item = (&str, Duration)> + '_ {
        self.first_seen
            .iter()
            .map(move |(name, since)| (name.as_str(), now.saturating_duration_since(*since)))
    }

    pub fn len(&self) -> usize {
        self.first_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.first_seen.is_empty()
    }
}

// ============================================================================
// Id counter
// ============================================================================

/// Highest mon id confirmed started. Ids are never reused.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonIdCounter {
    max: Option<u32>,
}

impl MonIdCounter {
    pub fn new(max: Option<u32>) -> Self {
        Self { max }
    }

    /// The id the next mon would get; does not reserve it.
    pub fn next(&self) -> u32 {
        self.max.map_or(0, |max| max + 1)
    }

    /// Record that the mon with `id` started.
    pub fn commit(&mut self, id: u32) {
        self.max = Some(self.max.map_or(id, |max| max.max(id)));
    }

    pub fn max(&self) -> Option<u32> {
        self.max
    }
}

// ============================================================================
// Lock and state
// ============================================================================

/// Mutable mon state; only reachable through an [`OrchestrationGuard`].
#[derive(Debug, Default)]
pub(crate) struct MonState {
    pub(crate) membership: ClusterMembership,
    pub(crate) timeouts: TimeoutTracker,
    pub(crate) ids: MonIdCounter,
    pub(crate) node_mapping: NodeAssignment,
    /// Outcome of the last health check that got a status report.
    pub(crate) last_report: Option<HealthReport>,
}

impl MonState {
    fn from_persisted(persisted: PersistedMonState) -> Self {
        Self {
            membership: persisted.membership,
            timeouts: TimeoutTracker::default(),
            ids: MonIdCounter::new(persisted.max_mon_id),
            node_mapping: persisted.node_mapping,
            last_report: None,
        }
    }

    fn persisted(&self) -> PersistedMonState {
        PersistedMonState {
            membership: self.membership.clone(),
            max_mon_id: self.ids.max(),
            node_mapping: self.node_mapping.clone(),
        }
    }
}

/// Process-wide lock serializing every mutating cluster operation.
#[derive(Clone)]
pub struct OrchestrationLock {
    state: Arc<Mutex<MonState>>,
}

impl OrchestrationLock {
    fn new(state: MonState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Wait for exclusive access to the cluster.
    pub async fn acquire(&self) -> OrchestrationGuard {
        OrchestrationGuard {
            state: self.state.clone().lock_owned().await,
        }
    }

    /// Try to take the lock without waiting.
    pub fn try_acquire(&self) -> Option<OrchestrationGuard> {
        self.state
            .clone()
            .try_lock_owned()
            .ok()
            .map(|state| OrchestrationGuard { state })
    }
}

/// Proof that the orchestration lock is held. Released on drop.
pub struct OrchestrationGuard {
    state: OwnedMutexGuard<MonState>,
}

impl OrchestrationGuard {
    pub(crate) fn state(&self) -> &MonState {
        &self.state
    }

    pub(crate) fn state_mut(&mut self) -> &mut MonState {
        &mut self.state
    }
}

/// Read-only copy of the mon state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonSnapshot {
    pub membership: ClusterMembership,
    pub node_mapping: NodeAssignment,
    pub max_mon_id: Option<u32>,
    /// Mons currently tracked as out of quorum, with their age.
    pub out_of_quorum: BTreeMap<String, Duration>,
    /// What the last successful health check saw; `None` before the first.
    pub last_report: Option<HealthReport>,
}

// ============================================================================
// Mon cluster
// ============================================================================

/// A replicated mon quorum under management.
pub struct MonCluster {
    settings: MonSettings,
    backends: Backends,
    lock: OrchestrationLock,
    target: watch::Receiver<MonTarget>,
}

impl MonCluster {
    /// Create a cluster starting from the given state.
    pub fn new(
        settings: MonSettings,
        backends: Backends,
        target: watch::Receiver<MonTarget>,
        initial: PersistedMonState,
    ) -> Self {
        Self {
            settings,
            backends,
            lock: OrchestrationLock::new(MonState::from_persisted(initial)),
            target,
        }
    }

    /// Create a cluster from the state saved in the config store.
    pub async fn restore(
        settings: MonSettings,
        backends: Backends,
        target: watch::Receiver<MonTarget>,
    ) -> Result<Self> {
        let persisted = backends.store.load().await?.unwrap_or_default();
        info!(
            cluster = %settings.cluster_name,
            mons = persisted.membership.len(),
            max_mon_id = ?persisted.max_mon_id,
            "Restored mon state"
        );
        Ok(Self::new(settings, backends, target, persisted))
    }

    pub fn settings(&self) -> &MonSettings {
        &self.settings
    }

    /// The lock other reconciliations must hold before mutating the cluster.
    pub fn orchestration_lock(&self) -> OrchestrationLock {
        self.lock.clone()
    }

    /// Current target published by the controller.
    pub fn target(&self) -> MonTarget {
        self.target.borrow().clone()
    }

    /// Copy of the mon state, taken under the lock.
    pub async fn snapshot(&self) -> MonSnapshot {
        let guard = self.lock.acquire().await;
        let state = guard.state();
        let now = Instant::now();
        MonSnapshot {
            membership: state.membership.clone(),
            node_mapping: state.node_mapping.clone(),
            max_mon_id: state.ids.max(),
            out_of_quorum: state
                .timeouts
                .ages(now)
                .map(|(name, age)| (name.to_string(), age))
                .collect(),
            last_report: state.last_report.clone(),
        }
    }

    /// Save the mon state, then rewrite the connection config from it.
    pub(crate) async fn persist(&self, guard: &OrchestrationGuard) -> Result<()> {
        let state = guard.state().persisted();

        self.backends
            .store
            .save_membership(&state)
            .await
            .map_err(|e| Error::Persistence(format!("failed to save mon config: {}", e)))?;

        self.backends
            .store
            .write_connection_config(&self.settings.cluster_name, &state.membership)
            .await
            .map_err(|e| Error::Persistence(format!("failed to write connection config: {}", e)))?;

        debug!(mons = state.membership.len(), "Persisted mon state");
        Ok(())
    }
}
