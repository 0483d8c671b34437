//! Kubernetes controller for the CephCluster resource
//!
//! The controller does not remediate anything itself. It publishes the
//! mon target (count, networking, placement, image) to the health checker
//! and reports what the last health check saw back on the resource status.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::controller::{Action, Controller as KubeController};
use kube::runtime::watcher::Config;
use kube::{Client, ResourceExt};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::crd::{CephCluster, CephClusterStatus, ClusterPhase};
use crate::error::{Error, Result};
use crate::k8s::FIELD_MANAGER;
use crate::mon::{MonCluster, MonSnapshot, MonTarget};
use crate::shutdown::ShutdownCoordinator;

/// Requeue interval for status refreshes
const REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Controller state
pub struct ControllerState {
    /// Kubernetes client
    pub client: Client,
    /// Mon cluster whose status is reported
    pub cluster: Arc<MonCluster>,
    /// Mon target consumed by health checks
    pub target: watch::Sender<MonTarget>,
}

/// Watches one CephCluster resource
pub struct Controller {
    client: Client,
    namespace: String,
    name: String,
    state: Arc<ControllerState>,
}

impl Controller {
    /// Create a new controller
    pub fn new(
        client: Client,
        namespace: impl Into<String>,
        name: impl Into<String>,
        cluster: Arc<MonCluster>,
        target: watch::Sender<MonTarget>,
    ) -> Self {
        let state = ControllerState {
            client: client.clone(),
            cluster,
            target,
        };

        Self {
            client,
            namespace: namespace.into(),
            name: name.into(),
            state: Arc::new(state),
        }
    }

    /// Run the controller until shutdown
    pub async fn run(&self, shutdown: ShutdownCoordinator) -> Result<()> {
        info!(namespace = %self.namespace, name = %self.name, "Starting CephCluster controller");

        let clusters: Api<CephCluster> = Api::namespaced(self.client.clone(), &self.namespace);

        // Verify CRD is installed
        let lp = ListParams::default().limit(1);
        if let Err(e) = clusters.list(&lp).await {
            error!("Failed to list CephClusters. Is the CRD installed? Error: {}", e);
            return Err(Error::Kube(e));
        }

        let watch_config = Config::default().fields(&format!("metadata.name={}", self.name));
        let state = Arc::clone(&self.state);

        let controller = KubeController::new(clusters, watch_config)
            .run(reconcile, error_policy, state)
            .for_each(|result| async move {
                match result {
                    Ok((obj, action)) => {
                        debug!(name = %obj.name, ?action, "Reconciliation successful");
                    }
                    Err(e) => {
                        warn!(error = %e, "Reconciliation error");
                    }
                }
            });

        tokio::select! {
            _ = controller => {}
            _ = shutdown.wait_for_shutdown() => {}
        }

        info!("Controller stopped");
        Ok(())
    }
}

/// Reconcile a CephCluster resource
async fn reconcile(cluster: Arc<CephCluster>, ctx: Arc<ControllerState>) -> Result<Action> {
    let name = cluster.name_any();
    let namespace = cluster.namespace().unwrap_or_default();

    let target = cluster.mon_target();
    if target.count == 0 {
        return Err(Error::InvalidConfig {
            field: "spec.mon.count".to_string(),
            reason: "must be at least 1".to_string(),
        });
    }

    let desired = target.count;
    if publish_target(&ctx.target, target) {
        info!(name = %name, desired, "Mon target changed");
    }

    let snapshot = ctx.cluster.snapshot().await;
    let status = build_status(desired, &snapshot);
    update_status(&ctx.client, &namespace, &name, status).await?;

    Ok(Action::requeue(REFRESH_INTERVAL))
}

/// Error policy for reconciliation failures
fn error_policy(_cluster: Arc<CephCluster>, error: &Error, _ctx: Arc<ControllerState>) -> Action {
    warn!(error = %error, "Reconciliation error, will retry");
    Action::requeue(REFRESH_INTERVAL)
}

/// Publish a new mon target; returns whether it changed.
pub(crate) fn publish_target(tx: &watch::Sender<MonTarget>, target: MonTarget) -> bool {
    tx.send_if_modified(|current| {
        if *current == target {
            return false;
        }
        *current = target;
        true
    })
}

/// Summarize the last health check for the resource status.
pub(crate) fn build_status(desired: u32, snapshot: &MonSnapshot) -> CephClusterStatus {
    let mons: Vec<String> = snapshot.membership.keys().cloned().collect();
    let out_of_quorum: Vec<String> = snapshot.out_of_quorum.keys().cloned().collect();
    let last_updated = Some(chrono::Utc::now().to_rfc3339());

    let Some(report) = &snapshot.last_report else {
        return CephClusterStatus {
            phase: ClusterPhase::Pending,
            desired_mons: desired,
            mons,
            out_of_quorum,
            last_updated,
            message: Some("waiting for the first health check".to_string()),
            ..Default::default()
        };
    };

    let message = if !report.missing.is_empty() {
        Some(format!("mons missing from monmap: {}", report.missing.join(", ")))
    } else if report.in_quorum < report.mon_count {
        Some(format!(
            "{} of {} mons in quorum",
            report.in_quorum, report.mon_count
        ))
    } else if report.mon_count != desired as usize {
        Some(format!("{} of {} mons", report.mon_count, desired))
    } else {
        None
    };
    let phase = match message {
        None => ClusterPhase::Healthy,
        Some(_) => ClusterPhase::Degraded,
    };

    CephClusterStatus {
        phase,
        desired_mons: desired,
        mons,
        mon_count: report.mon_count as u32,
        in_quorum: report.in_quorum as u32,
        out_of_quorum,
        missing: report.missing.clone(),
        last_updated,
        message,
    }
}

/// Update the status of a CephCluster
async fn update_status(
    client: &Client,
    namespace: &str,
    name: &str,
    status: CephClusterStatus,
) -> Result<()> {
    let api: Api<CephCluster> = Api::namespaced(client.clone(), namespace);

    let patch = serde_json::json!({
        "status": status
    });

    let pp = PatchParams::apply(FIELD_MANAGER);
    api.patch_status(name, &pp, &Patch::Merge(&patch)).await?;

    debug!(name = %name, "Status updated");
    Ok(())
}
