//! Mon removal.

use tracing::{debug, info, warn};

use super::{MonCluster, OrchestrationGuard};
use crate::backend::DeleteOutcome;
use crate::error::{Error, Result};
use crate::types::resource_name;

impl MonCluster {
    /// Tear down the mon `daemon_name` and erase it from the cluster state.
    ///
    /// Idempotent: resources that are already gone count as removed. Only
    /// the quorum removal and the final persistence are fatal.
    pub async fn remove_mon(
        &self,
        guard: &mut OrchestrationGuard,
        daemon_name: &str,
    ) -> Result<()> {
        info!(mon = %daemon_name, "Ensuring removal of unhealthy monitor");
        let resource = resource_name(daemon_name);

        match self.backends.lifecycle.delete_deployment(&resource).await {
            Ok(DeleteOutcome::Deleted) => debug!(deployment = %resource, "Removed mon deployment"),
            Ok(DeleteOutcome::NotFound) => {
                info!(deployment = %resource, "Dead mon deployment was already gone")
            }
            Err(e) => {
                warn!(deployment = %resource, error = %e, "Failed to remove dead mon deployment")
            }
        }

        self.backends
            .quorum
            .remove_from_quorum(&self.settings.cluster_name, daemon_name)
            .await
            .map_err(|e| Error::QuorumRemoval {
                name: daemon_name.to_string(),
                reason: e.to_string(),
            })?;
        info!(mon = %daemon_name, "Removed monitor from quorum");

        let state = guard.state_mut();
        state.membership.remove(daemon_name);
        state.node_mapping.remove(daemon_name);
        state.timeouts.clear(daemon_name);

        match self.backends.lifecycle.delete_endpoint(&resource).await {
            Ok(DeleteOutcome::Deleted) => debug!(service = %resource, "Removed mon service"),
            Ok(DeleteOutcome::NotFound) => {
                info!(service = %resource, "Dead mon service was already gone")
            }
            Err(e) => warn!(service = %resource, error = %e, "Failed to remove dead mon service"),
        }

        // No new client may connect to the removed mon
        self.persist(guard).await
    }
}
