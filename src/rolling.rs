//! Safe rolling updates for replicated daemon sets.
//!
//! [`RollingUpdater::update_and_wait`] walks one update request through
//!
//! ```text
//! Fetching → Verifying(pre) → Applying → Polling → Verifying(post) → Done
//! ```
//!
//! failing with an [`Error::Rollout`] naming the phase if any step fails.
//! What "safe to stop" and "safe to continue" mean is left to the caller's
//! verify callback, which receives an explicit [`Intent`].

use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::RolloutConfig;
use crate::error::{Error, Result};
use crate::metrics;
use crate::resilience::{poll_until, retry, Exhausted, RetryPolicy};

/// Why the verify callback is being asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Can the daemons be stopped for the update?
    PreStop,
    /// The new spec is rolling out; is it safe to continue?
    PostUpdate,
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Intent::PreStop => f.write_str("stop"),
            Intent::PostUpdate => f.write_str("continue"),
        }
    }
}

/// Update strategy declared on a daemon set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateStrategy {
    RollingUpdate,
    OnDelete,
    Other(String),
}

impl UpdateStrategy {
    /// Parse a strategy type; an absent type is the orchestrator default, rolling.
    pub fn from_type(strategy_type: Option<&str>) -> Self {
        match strategy_type {
            None | Some("RollingUpdate") => UpdateStrategy::RollingUpdate,
            Some("OnDelete") => UpdateStrategy::OnDelete,
            Some(other) => UpdateStrategy::Other(other.to_string()),
        }
    }
}

impl fmt::Display for UpdateStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateStrategy::RollingUpdate => f.write_str("RollingUpdate"),
            UpdateStrategy::OnDelete => f.write_str("OnDelete"),
            UpdateStrategy::Other(other) => f.write_str(other),
        }
    }
}

/// Rollout progress reported by the orchestrator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RolloutStatus {
    pub observed_generation: Option<i64>,
    pub updated_replicas: i32,
    pub ready_replicas: i32,
}

impl RolloutStatus {
    /// Whether this status shows the update from `before` has rolled out.
    pub fn completed_since(&self, before: &RolloutStatus) -> bool {
        self.observed_generation != before.observed_generation
            && self.updated_replicas > 0
            && self.ready_replicas > 0
    }
}

/// A live daemon set as read from the orchestrator.
#[derive(Debug, Clone)]
pub struct RolloutSnapshot<R> {
    pub resource: R,
    pub status: RolloutStatus,
    pub strategy: UpdateStrategy,
}

/// Phase of a rolling update, used to tag failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloutPhase {
    Fetching,
    Precondition,
    VerifyingPreStop,
    Applying,
    Polling,
    VerifyingPostUpdate,
}

impl fmt::Display for RolloutPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self {
            RolloutPhase::Fetching => "fetching the live resource",
            RolloutPhase::Precondition => "checking the update strategy",
            RolloutPhase::VerifyingPreStop => "verifying it can be stopped",
            RolloutPhase::Applying => "applying the update",
            RolloutPhase::Polling => "polling for completion",
            RolloutPhase::VerifyingPostUpdate => "verifying it can continue",
        };
        f.write_str(phase)
    }
}

/// A replicated daemon set that can be read and replaced.
#[async_trait]
pub trait RolloutTarget: Send + Sync {
    type Resource: Clone + Send + Sync;

    /// Name identifying the resource.
    fn name_of(resource: &Self::Resource) -> String;

    async fn get(&self, name: &str) -> Result<RolloutSnapshot<Self::Resource>>;

    async fn update(&self, resource: &Self::Resource) -> Result<()>;
}

/// Coordinates verified rolling updates against a [`RolloutTarget`].
pub struct RollingUpdater<T> {
    target: T,
    verify_policy: RetryPolicy,
    poll_policy: RetryPolicy,
}

impl<T: RolloutTarget> RollingUpdater<T> {
    pub fn new(target: T, config: &RolloutConfig) -> Self {
        Self::with_policies(target, config.verify, config.poll)
    }

    pub fn with_policies(target: T, verify_policy: RetryPolicy, poll_policy: RetryPolicy) -> Self {
        Self {
            target,
            verify_policy,
            poll_policy,
        }
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    /// Apply `resource` and wait until it has rolled out.
    ///
    /// The live resource must use the rolling update strategy. `verify` is
    /// called with [`Intent::PreStop`] (retried per the verify policy)
    /// before the update and once with [`Intent::PostUpdate`] after the
    /// rollout is observed. Returns the applied resource.
    pub async fn update_and_wait<F, Fut>(
        &self,
        resource: T::Resource,
        verify: F,
    ) -> Result<T::Resource>
    where
        F: Fn(Intent) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let name = T::name_of(&resource);
        let result = self.run_phases(&name, resource, verify).await;
        metrics::record_rollout(&name, result.is_ok());
        result
    }

    async fn run_phases<F, Fut>(
        &self,
        name: &str,
        resource: T::Resource,
        verify: F,
    ) -> Result<T::Resource>
    where
        F: Fn(Intent) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let fail = |phase: RolloutPhase, reason: String| Error::Rollout {
            resource: name.to_string(),
            phase,
            reason,
        };

        let original = self
            .target
            .get(name)
            .await
            .map_err(|e| fail(RolloutPhase::Fetching, e.to_string()))?;

        if original.strategy != UpdateStrategy::RollingUpdate {
            return Err(fail(
                RolloutPhase::Precondition,
                format!(
                    "can only update with rolling updates, found strategy {}",
                    original.strategy
                ),
            ));
        }

        retry(self.verify_policy, |_| verify(Intent::PreStop))
            .await
            .map_err(|e| fail(RolloutPhase::VerifyingPreStop, exhausted_reason(e)))?;

        info!(resource = %name, "Updating daemon set");
        self.target
            .update(&resource)
            .await
            .map_err(|e| fail(RolloutPhase::Applying, e.to_string()))?;

        poll_until(self.poll_policy, |attempt| {
            let before = original.status;
            async move {
                let latest = self.target.get(name).await?;
                if latest.status.completed_since(&before) {
                    return Ok(Some(()));
                }
                debug!(resource = %name, attempt, status = ?latest.status, "Waiting for rollout");
                Ok::<_, Error>(None)
            }
        })
        .await
        .map_err(|e| fail(RolloutPhase::Polling, exhausted_reason(e)))?;

        info!(resource = %name, "Finished waiting for updated daemon set");

        verify(Intent::PostUpdate)
            .await
            .map_err(|e| fail(RolloutPhase::VerifyingPostUpdate, e.to_string()))?;

        Ok(resource)
    }
}

fn exhausted_reason(exhausted: Exhausted<Error>) -> String {
    match exhausted {
        Exhausted::Failed { attempts, last } => {
            format!("failed after {} attempt(s): {}", attempts, last)
        }
        Exhausted::GaveUp { attempts } => {
            format!("gave up waiting after {} attempt(s)", attempts)
        }
    }
}
