//! Mon quorum health checking.
//!
//! Each check takes the orchestration lock, compares the storage cluster's
//! monmap with the authoritative membership and performs at most one
//! remediation: remove a stale mon, fail over an unhealthy one, scale up,
//! or scale down.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use super::{MonCluster, MonTarget, OrchestrationGuard};
use crate::error::Result;
use crate::metrics;
use crate::shutdown::ShutdownCoordinator;

/// Kind of remediation a health check can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemediationKind {
    Remove,
    Failover,
    ScaleUp,
    ScaleDown,
}

impl RemediationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemediationKind::Remove => "remove",
            RemediationKind::Failover => "failover",
            RemediationKind::ScaleUp => "scale_up",
            RemediationKind::ScaleDown => "scale_down",
        }
    }
}

impl fmt::Display for RemediationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single action a health check took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Remediation {
    /// Nothing needed doing, or every unhealthy mon is still within its timeout.
    None,
    /// A mon was removed without replacement.
    Removed { name: String },
    /// An unhealthy mon was replaced.
    FailedOver { failed: String, replacement: String },
    /// New mons were started to reach the desired count.
    ScaledUp { added: Vec<String> },
    /// An extra healthy mon was removed.
    ScaledDown { removed: String },
    /// Scale-down was needed but would shrink a quorum of two.
    ScaleDownRefused,
    /// The chosen remediation failed; it is retried on the next check.
    Failed {
        kind: RemediationKind,
        target: Option<String>,
        /// Mons confirmed started before the failure. They are saved and stay members.
        started: Vec<String>,
        error: String,
    },
}

impl Remediation {
    /// Whether the check attempted to change the cluster.
    pub fn is_action(&self) -> bool {
        !matches!(self, Remediation::None | Remediation::ScaleDownRefused)
    }

    fn kind(&self) -> Option<RemediationKind> {
        match self {
            Remediation::Removed { .. } => Some(RemediationKind::Remove),
            Remediation::FailedOver { .. } => Some(RemediationKind::Failover),
            Remediation::ScaledUp { .. } => Some(RemediationKind::ScaleUp),
            Remediation::ScaledDown { .. } => Some(RemediationKind::ScaleDown),
            Remediation::Failed { kind, .. } => Some(*kind),
            Remediation::None | Remediation::ScaleDownRefused => None,
        }
    }

    fn from_result<T>(
        kind: RemediationKind,
        target: Option<&str>,
        started: Vec<String>,
        result: Result<T>,
        on_success: impl FnOnce(T, Vec<String>) -> Remediation,
    ) -> Remediation {
        match result {
            Ok(value) => on_success(value, started),
            Err(e) => {
                error!(
                    kind = %kind,
                    mon = ?target,
                    started = ?started,
                    error = %e,
                    "Mon remediation failed"
                );
                Remediation::Failed {
                    kind,
                    target: target.map(str::to_string),
                    started,
                    error: e.to_string(),
                }
            }
        }
    }
}

/// What one health check observed and did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    /// Desired mon count snapshot used for the whole check.
    pub desired_count: usize,
    /// Mons in the monmap.
    pub mon_count: usize,
    /// Mons in quorum.
    pub in_quorum: usize,
    /// Members the monmap does not list at all.
    pub missing: Vec<String>,
    /// Mons out of quorum and still within their timeout.
    pub waiting: Vec<String>,
    pub remediation: Remediation,
}

impl MonCluster {
    /// Run one health check under the orchestration lock.
    ///
    /// Only a failed status query is returned as an error; remediation
    /// failures are logged and reported in [`HealthReport::remediation`].
    pub async fn check_health(&self) -> Result<HealthReport> {
        let mut guard = self.lock.acquire().await;
        self.check_health_locked(&mut guard).await
    }

    /// Run one health check with the lock already held.
    pub async fn check_health_locked(
        &self,
        guard: &mut OrchestrationGuard,
    ) -> Result<HealthReport> {
        let cluster_name = &self.settings.cluster_name;
        debug!(cluster = %cluster_name, "Checking health for mons in cluster");

        // One snapshot for the whole check, even if the resource changes meanwhile
        let target = self.target();
        let desired = target.count as usize;
        debug!(desired, "Targeting mon count");

        let status = self.backends.quorum.quorum_status(cluster_name).await?;
        debug!(status = %status, "Mon status");

        let mon_count = status.mon_count();
        let mut not_found: BTreeSet<String> = guard.state().membership.keys().cloned().collect();
        let mut report = HealthReport {
            desired_count: desired,
            mon_count,
            in_quorum: status.in_quorum_count(),
            missing: not_found
                .iter()
                .filter(|name| !status.mon_map.mons.iter().any(|mon| &mon.name == *name))
                .cloned()
                .collect(),
            waiting: Vec::new(),
            remediation: Remediation::None,
        };
        metrics::set_quorum_gauges(cluster_name, desired, mon_count, report.in_quorum);

        let mut all_in_quorum = true;
        let now = Instant::now();

        for mon in &status.mon_map.mons {
            let in_quorum = status.in_quorum(mon);

            if !not_found.remove(&mon.name) {
                if in_quorum && mon_count > desired {
                    warn!(mon = %mon.name, "Mon not in source of truth but in quorum, removing");
                    let result = self.remove_mon(guard, &mon.name).await;
                    report.remediation = Remediation::from_result(
                        RemediationKind::Remove,
                        Some(&mon.name),
                        Vec::new(),
                        result,
                        |_, _| Remediation::Removed {
                            name: mon.name.clone(),
                        },
                    );
                    return Ok(self.finish(guard, report));
                }
                warn!(
                    mon = %mon.name,
                    desired,
                    current = mon_count,
                    "Mon not in source of truth, not enough mons to remove it now"
                );
            }

            if in_quorum {
                debug!(mon = %mon.name, "Mon found in quorum");
                if guard.state_mut().timeouts.clear(&mon.name) {
                    info!(
                        mon = %mon.name,
                        "Mon is back in quorum, removed from mon out timeout list"
                    );
                }
                continue;
            }

            all_in_quorum = false;
            let out_for = guard.state_mut().timeouts.observe_out(&mon.name, now);
            if out_for <= self.settings.mon_out_timeout {
                warn!(
                    mon = %mon.name,
                    out_for_secs = out_for.as_secs(),
                    timeout_secs = self.settings.mon_out_timeout.as_secs(),
                    "Mon not found in quorum, waiting for timeout before failover"
                );
                report.waiting.push(mon.name.clone());
                continue;
            }

            warn!(
                mon = %mon.name,
                "Mon not found in quorum and timeout exceeded, mon will be failed over"
            );
            report.remediation = self.fail_mon(guard, &target, mon_count, &mon.name).await;
            return Ok(self.finish(guard, report));
        }

        // Declared mons the storage cluster doesn't know about at all
        if let Some(name) = not_found.into_iter().next() {
            warn!(mon = %name, "Mon not found in mon map, failing over");
            let membership_count = guard.state().membership.len();
            report.remediation = self.fail_mon(guard, &target, membership_count, &name).await;
            return Ok(self.finish(guard, report));
        }

        if mon_count < desired {
            info!(
                current = mon_count,
                desired, "Adding mons to reach the desired count"
            );
            let mut started = Vec::new();
            let result = self.start_mons(guard, &target, &mut started).await;
            report.remediation = Remediation::from_result(
                RemediationKind::ScaleUp,
                None,
                started,
                result,
                |_, added| Remediation::ScaledUp { added },
            );
            return Ok(self.finish(guard, report));
        }

        if all_in_quorum && mon_count > desired {
            if desired < 2 && mon_count == 2 {
                warn!("Cannot reduce mon quorum size from 2 to 1");
                report.remediation = Remediation::ScaleDownRefused;
            } else if let Some(extra) = status.mon_map.mons.first() {
                info!(
                    current = mon_count,
                    desired,
                    mon = %extra.name,
                    "Removing an extra mon"
                );
                let result = self.remove_mon(guard, &extra.name).await;
                report.remediation = Remediation::from_result(
                    RemediationKind::ScaleDown,
                    Some(&extra.name),
                    Vec::new(),
                    result,
                    |_, _| Remediation::ScaledDown {
                        removed: extra.name.clone(),
                    },
                );
            }
        }

        Ok(self.finish(guard, report))
    }

    /// Remove the mon if there are more than desired, otherwise replace it.
    async fn fail_mon(
        &self,
        guard: &mut OrchestrationGuard,
        target: &MonTarget,
        mon_count: usize,
        name: &str,
    ) -> Remediation {
        if mon_count > target.count as usize {
            // An extra mon exists, no replacement needed
            let result = self.remove_mon(guard, name).await;
            Remediation::from_result(
                RemediationKind::Remove,
                Some(name),
                Vec::new(),
                result,
                |_, _| Remediation::Removed {
                    name: name.to_string(),
                },
            )
        } else {
            let mut started = Vec::new();
            let result = self.failover_mon(guard, target, name, &mut started).await;
            Remediation::from_result(
                RemediationKind::Failover,
                Some(name),
                started,
                result,
                |replacement, _| Remediation::FailedOver {
                    failed: name.to_string(),
                    replacement,
                },
            )
        }
    }

    /// Record metrics and keep the report for status reporting.
    fn finish(&self, guard: &mut OrchestrationGuard, report: HealthReport) -> HealthReport {
        if let Some(kind) = report.remediation.kind() {
            let ok = !matches!(report.remediation, Remediation::Failed { .. });
            metrics::record_remediation(&self.settings.cluster_name, kind.as_str(), ok);
        }
        guard.state_mut().last_report = Some(report.clone());
        report
    }
}

/// Drives [`MonCluster::check_health`] on a fixed interval.
pub struct HealthChecker {
    cluster: Arc<MonCluster>,
}

impl HealthChecker {
    pub fn new(cluster: Arc<MonCluster>) -> Self {
        Self { cluster }
    }

    /// Run a single health check.
    pub async fn check(&self) -> Result<HealthReport> {
        let result = self.cluster.check_health().await;
        metrics::record_health_check(&self.cluster.settings.cluster_name, result.is_ok());
        result
    }

    /// Check mon health every interval until shutdown is signalled.
    ///
    /// Errors are logged and never end the loop. A check that has started
    /// always runs to completion; shutdown is only observed between checks.
    pub async fn run(&self, shutdown: ShutdownCoordinator) {
        let interval = self.cluster.settings.health_interval;
        info!(
            cluster = %self.cluster.settings.cluster_name,
            interval_secs = interval.as_secs(),
            "Starting mon health checks"
        );

        loop {
            tokio::select! {
                _ = shutdown.wait_for_shutdown() => {
                    info!(
                        cluster = %self.cluster.settings.cluster_name,
                        "Stopping monitoring of mons"
                    );
                    return;
                }
                _ = sleep(interval) => {}
            }

            debug!("Checking health of mons");
            match self.check().await {
                Ok(report) if report.remediation.is_action() => {
                    info!(remediation = ?report.remediation, "Mon health check took action");
                }
                Ok(_) => {}
                Err(e) => {
                    info!(error = %e, "Failed to check mon health");
                }
            }
        }
    }
}
