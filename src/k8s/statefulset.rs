//! StatefulSets as rolling update targets.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use kube::api::{Api, PostParams};
use kube::{Client, ResourceExt};

use crate::error::{Error, Result};
use crate::rolling::{RolloutSnapshot, RolloutStatus, RolloutTarget, UpdateStrategy};

/// StatefulSets in one namespace.
#[derive(Clone)]
pub struct KubeStatefulSets {
    api: Api<StatefulSet>,
}

impl KubeStatefulSets {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }
}

pub(crate) fn snapshot(statefulset: StatefulSet) -> RolloutSnapshot<StatefulSet> {
    let status = statefulset
        .status
        .as_ref()
        .map(|s| RolloutStatus {
            observed_generation: s.observed_generation,
            updated_replicas: s.updated_replicas.unwrap_or(0),
            ready_replicas: s.ready_replicas.unwrap_or(0),
        })
        .unwrap_or_default();

    let strategy = UpdateStrategy::from_type(
        statefulset
            .spec
            .as_ref()
            .and_then(|s| s.update_strategy.as_ref())
            .and_then(|u| u.type_.as_deref()),
    );

    RolloutSnapshot {
        resource: statefulset,
        status,
        strategy,
    }
}

#[async_trait]
impl RolloutTarget for KubeStatefulSets {
    type Resource = StatefulSet;

    fn name_of(resource: &StatefulSet) -> String {
        resource.name_any()
    }

    async fn get(&self, name: &str) -> Result<RolloutSnapshot<StatefulSet>> {
        let statefulset = self
            .api
            .get_opt(name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("statefulset {}", name)))?;
        Ok(snapshot(statefulset))
    }

    async fn update(&self, resource: &StatefulSet) -> Result<()> {
        self.api
            .replace(&resource.name_any(), &PostParams::default(), resource)
            .await?;
        Ok(())
    }
}
