//! Rolling update integration tests
//!
//! Roll a simulated daemon set while the verify callback consults the mon
//! quorum, the way a caller gates an update on cluster health.

#[allow(dead_code)]
mod common;

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use common::{cluster, FakeBackend};
use mon_operator::error::{Error, Result};
use mon_operator::mon::MonCluster;
use mon_operator::rolling::{
    Intent, RollingUpdater, RolloutPhase, RolloutSnapshot, RolloutStatus, RolloutTarget,
    UpdateStrategy,
};

#[derive(Debug, Clone, PartialEq)]
struct DaemonSet {
    name: String,
    image: String,
}

struct Live {
    spec: DaemonSet,
    status: RolloutStatus,
    /// Reads left before an applied update shows as rolled out
    pending_reads: u32,
    updates: u32,
}

/// A daemon set whose rollout completes a few reads after each update.
struct SimulatedDaemonSet {
    strategy: UpdateStrategy,
    reads_to_roll_out: u32,
    live: Mutex<Live>,
}

impl SimulatedDaemonSet {
    fn new(strategy: UpdateStrategy, reads_to_roll_out: u32) -> Self {
        Self {
            strategy,
            reads_to_roll_out,
            live: Mutex::new(Live {
                spec: DaemonSet {
                    name: "rook-ceph-nfs-a".to_string(),
                    image: "ceph/ceph:v13".to_string(),
                },
                status: RolloutStatus {
                    observed_generation: Some(1),
                    updated_replicas: 2,
                    ready_replicas: 2,
                },
                pending_reads: 0,
                updates: 0,
            }),
        }
    }

    fn image(&self) -> String {
        self.live.lock().unwrap().spec.image.clone()
    }

    fn updates(&self) -> u32 {
        self.live.lock().unwrap().updates
    }
}

#[async_trait]
impl RolloutTarget for SimulatedDaemonSet {
    type Resource = DaemonSet;

    fn name_of(resource: &DaemonSet) -> String {
        resource.name.clone()
    }

    async fn get(&self, name: &str) -> Result<RolloutSnapshot<DaemonSet>> {
        let mut live = self.live.lock().unwrap();
        if live.spec.name != name {
            return Err(Error::NotFound(name.to_string()));
        }

        if live.pending_reads > 0 {
            live.pending_reads -= 1;
            if live.pending_reads == 0 {
                live.status.observed_generation = live.status.observed_generation.map(|g| g + 1);
                live.status.updated_replicas = 2;
                live.status.ready_replicas = 2;
            }
        }

        Ok(RolloutSnapshot {
            resource: live.spec.clone(),
            status: live.status,
            strategy: self.strategy.clone(),
        })
    }

    async fn update(&self, resource: &DaemonSet) -> Result<()> {
        let mut live = self.live.lock().unwrap();
        live.spec = resource.clone();
        live.status.updated_replicas = 0;
        live.status.ready_replicas = 1;
        live.pending_reads = self.reads_to_roll_out;
        live.updates += 1;
        Ok(())
    }
}

fn new_image() -> DaemonSet {
    DaemonSet {
        name: "rook-ceph-nfs-a".to_string(),
        image: "ceph/ceph:v14".to_string(),
    }
}

type VerifyFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Verify callback that allows stopping only while every mon is in quorum.
fn quorum_gate(
    cluster: Arc<MonCluster>,
    seen: Arc<Mutex<Vec<Intent>>>,
) -> impl Fn(Intent) -> VerifyFuture {
    move |intent| {
        let cluster = cluster.clone();
        let seen = seen.clone();
        let verdict: VerifyFuture = Box::pin(async move {
            seen.lock().unwrap().push(intent);
            let report = cluster.check_health().await?;
            if report.in_quorum < report.mon_count {
                return Err(Error::Verification(format!(
                    "cannot {}: {} of {} mons in quorum",
                    intent, report.in_quorum, report.mon_count
                )));
            }
            Ok(())
        });
        verdict
    }
}

#[tokio::test(start_paused = true)]
async fn test_rollout_gated_on_healthy_quorum() {
    let fake = FakeBackend::with_mons(&["a", "b", "c"]);
    let (cluster, _desired) = cluster(&fake, &["a", "b", "c"], 3);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let updater = RollingUpdater::with_policies(
        SimulatedDaemonSet::new(UpdateStrategy::RollingUpdate, 3),
        mon_operator::resilience::RetryPolicy::with_retries(5, Duration::from_secs(60)),
        mon_operator::resilience::RetryPolicy::fixed(30, Duration::from_secs(2)),
    );
    let start = Instant::now();

    let applied = updater
        .update_and_wait(new_image(), quorum_gate(cluster, seen.clone()))
        .await
        .unwrap();

    assert_eq!(applied, new_image());
    assert_eq!(updater.target().image(), "ceph/ceph:v14");
    assert_eq!(*seen.lock().unwrap(), vec![Intent::PreStop, Intent::PostUpdate]);
    // Two unfinished reads, each followed by one poll delay
    assert_eq!(start.elapsed(), Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn test_rollout_refused_while_mon_out_of_quorum() {
    let fake = FakeBackend::with_mons(&["a", "b", "c"]);
    fake.set_in_quorum("b", false);
    let (cluster, _desired) = cluster(&fake, &["a", "b", "c"], 3);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let updater = RollingUpdater::new(
        SimulatedDaemonSet::new(UpdateStrategy::RollingUpdate, 1),
        &Default::default(),
    );
    let start = Instant::now();

    let err = updater
        .update_and_wait(new_image(), quorum_gate(cluster.clone(), seen.clone()))
        .await
        .unwrap_err();

    match err {
        Error::Rollout { resource, phase, reason } => {
            assert_eq!(resource, "rook-ceph-nfs-a");
            assert_eq!(phase, RolloutPhase::VerifyingPreStop);
            assert!(reason.contains("2 of 3 mons in quorum"), "{}", reason);
        }
        other => panic!("unexpected error: {}", other),
    }

    // One initial attempt and five retries, a minute apart
    assert_eq!(seen.lock().unwrap().len(), 6);
    assert_eq!(start.elapsed(), Duration::from_secs(300));
    assert_eq!(updater.target().updates(), 0);
    // Five minutes out is still inside the mon timeout
    assert!(cluster.snapshot().await.membership.contains_key("b"));
}

#[tokio::test]
async fn test_on_delete_daemon_set_is_never_touched() {
    let fake = FakeBackend::with_mons(&["a", "b", "c"]);
    let (cluster, _desired) = cluster(&fake, &["a", "b", "c"], 3);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let updater = RollingUpdater::new(
        SimulatedDaemonSet::new(UpdateStrategy::OnDelete, 1),
        &Default::default(),
    );

    let err = updater
        .update_and_wait(new_image(), quorum_gate(cluster, seen.clone()))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Rollout {
            phase: RolloutPhase::Precondition,
            ..
        }
    ));
    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(updater.target().updates(), 0);
    assert!(fake.calls().is_empty());
}
