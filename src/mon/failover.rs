//! Provisioning new mons: failover and scale-up.

use tracing::info;

use super::{MonCluster, MonTarget, OrchestrationGuard};
use crate::error::{Error, Result};
use crate::types::{index_to_name, MonConfig, MonInfo};

impl MonCluster {
    /// Replace the mon `name` with a freshly provisioned one.
    ///
    /// Returns the daemon name of the replacement once it is running and the
    /// old mon is fully removed. The replacement is pushed onto `started` as
    /// soon as it is confirmed, so a later failure still reports it. A
    /// failure leaves any partially provisioned resources for the next check.
    pub(crate) async fn failover_mon(
        &self,
        guard: &mut OrchestrationGuard,
        target: &MonTarget,
        name: &str,
        started: &mut Vec<String>,
    ) -> Result<String> {
        info!(mon = %name, "Failing over monitor");

        let mon = self.provision_and_persist(guard, target, started).await?;
        self.remove_mon(guard, name).await?;

        info!(failed = %name, replacement = %mon.daemon_name, "Mon failover complete");
        Ok(mon.daemon_name)
    }

    /// Start new mons until the membership holds the target count.
    ///
    /// Each confirmed mon is pushed onto `started` and saved before the next
    /// one is provisioned.
    pub(crate) async fn start_mons(
        &self,
        guard: &mut OrchestrationGuard,
        target: &MonTarget,
        started: &mut Vec<String>,
    ) -> Result<()> {
        while guard.state().membership.len() < target.count as usize {
            self.provision_and_persist(guard, target, started).await?;
        }

        if !started.is_empty() {
            info!(added = ?started, total = target.count, "Started new mons");
        }
        Ok(())
    }

    /// Provision one mon and save the state as soon as it is confirmed running.
    async fn provision_and_persist(
        &self,
        guard: &mut OrchestrationGuard,
        target: &MonTarget,
        started: &mut Vec<String>,
    ) -> Result<MonConfig> {
        let mon = self.provision_mon(guard, target).await?;
        started.push(mon.daemon_name.clone());
        // A running mon must never be missing from the saved state
        self.persist(guard).await?;
        Ok(mon)
    }

    /// Place, expose, record and start one mon with the next id.
    async fn provision_mon(
        &self,
        guard: &mut OrchestrationGuard,
        target: &MonTarget,
    ) -> Result<MonConfig> {
        let mut id = guard.state().ids.next();
        // A mon whose start was never confirmed stays a member until it is failed over
        while guard.state().membership.contains_key(&index_to_name(id)) {
            id += 1;
        }
        let mut mon = MonConfig::new(id, self.settings.mon_port);
        mon.host_network = target.host_network;
        mon.allow_multiple_per_node = target.allow_multiple_per_node;
        mon.image = target.image.clone();
        info!(mon = %mon.daemon_name, id, "Starting new mon");

        let node = self
            .backends
            .placement
            .assign(&mon, &guard.state().node_mapping)
            .await
            .map_err(|e| Error::Placement {
                name: mon.daemon_name.clone(),
                reason: e.to_string(),
            })?;
        guard
            .state_mut()
            .node_mapping
            .insert(mon.daemon_name.clone(), node.clone());
        mon.node = Some(node);

        let public_ip = if mon.host_network {
            guard
                .state()
                .node_mapping
                .get(&mon.daemon_name)
                .map(|node| node.address.clone())
                .ok_or_else(|| Error::NotAssigned(mon.daemon_name.clone()))?
        } else {
            self.backends
                .lifecycle
                .create_or_update_endpoint(&mon)
                .await
                .map_err(|e| Error::Lifecycle(format!("failed to create mon service: {}", e)))?
        };
        mon.public_ip = Some(public_ip.clone());

        guard.state_mut().membership.insert(
            mon.daemon_name.clone(),
            MonInfo::new(mon.daemon_name.clone(), &public_ip, mon.port),
        );

        self.backends
            .lifecycle
            .start_and_confirm(&mon)
            .await
            .map_err(|e| Error::StartFailed {
                name: mon.daemon_name.clone(),
                reason: e.to_string(),
            })?;

        // Only burn the id once the mon is confirmed running
        guard.state_mut().ids.commit(id);
        Ok(mon)
    }
}
