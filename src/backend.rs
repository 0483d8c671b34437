//! Collaborators the mon reconciler drives.
//!
//! The reconciler owns the decisions; everything that touches the storage
//! cluster, the orchestration API or durable storage goes through one of
//! these traits. [`crate::ceph`] and [`crate::k8s`] provide the production
//! implementations.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{
    ClusterMembership, MonConfig, NodeAssignment, NodeInfo, PersistedMonState, QuorumStatus,
};

/// Result of deleting a resource that may already be gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

/// Queries and mutates the storage cluster's own view of its mons.
#[async_trait]
pub trait QuorumClient: Send + Sync {
    /// Current monmap and quorum ranks.
    async fn quorum_status(&self, cluster_name: &str) -> Result<QuorumStatus>;

    /// Remove a mon from the monmap. Removing an absent mon succeeds.
    async fn remove_from_quorum(&self, cluster_name: &str, daemon_name: &str) -> Result<()>;
}

/// Creates and deletes the resources backing a single mon.
#[async_trait]
pub trait DaemonLifecycle: Send + Sync {
    async fn create_or_update_deployment(&self, mon: &MonConfig) -> Result<()>;

    async fn delete_deployment(&self, resource_name: &str) -> Result<DeleteOutcome>;

    /// Provision the mon's network endpoint and return its address.
    async fn create_or_update_endpoint(&self, mon: &MonConfig) -> Result<String>;

    async fn delete_endpoint(&self, resource_name: &str) -> Result<DeleteOutcome>;

    /// Start the mon and block until it is observably running.
    async fn start_and_confirm(&self, mon: &MonConfig) -> Result<()>;
}

/// Durable storage for mon state and the client connection config.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Previously saved state, if any.
    async fn load(&self) -> Result<Option<PersistedMonState>>;

    async fn save_membership(&self, state: &PersistedMonState) -> Result<()>;

    /// Rewrite the config clients use to reach the mons.
    async fn write_connection_config(
        &self,
        cluster_name: &str,
        membership: &ClusterMembership,
    ) -> Result<()>;
}

/// Picks the node that hosts a new mon.
#[async_trait]
pub trait Placement: Send + Sync {
    async fn assign(&self, mon: &MonConfig, current: &NodeAssignment) -> Result<NodeInfo>;
}
