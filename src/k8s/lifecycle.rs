//! Deployments and Services backing individual mons.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, HostPathVolumeSource, ObjectFieldSelector,
    PodSpec, PodTemplateSpec, Service, ServicePort, ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::api::{Api, DeleteParams, Patch, PropagationPolicy};
use kube::Client;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use super::{apply_params, mon_labels};
use crate::backend::{DaemonLifecycle, DeleteOutcome};
use crate::error::{Error, Result};
use crate::resilience::{poll_until, Exhausted, RetryPolicy};
use crate::types::MonConfig;

const MON_DATA_DIR: &str = "/var/lib/ceph/mon";
const CONFIG_DIR: &str = "/etc/ceph";

/// Manages mon Deployments and Services in one namespace.
#[derive(Clone)]
pub struct KubeDaemonLifecycle {
    client: Client,
    namespace: String,
    cluster_name: String,
    /// Image for mons that do not override it.
    default_image: String,
    data_dir_host_path: String,
    start_policy: RetryPolicy,
    delete_policy: RetryPolicy,
}

impl KubeDaemonLifecycle {
    pub fn new(
        client: Client,
        namespace: impl Into<String>,
        cluster_name: impl Into<String>,
        default_image: impl Into<String>,
        start_policy: RetryPolicy,
    ) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            cluster_name: cluster_name.into(),
            default_image: default_image.into(),
            data_dir_host_path: "/var/lib/rook".to_string(),
            start_policy,
            delete_policy: RetryPolicy::fixed(30, Duration::from_secs(1)),
        }
    }

    fn deployments(&self) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn services(&self) -> Api<Service> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    /// Foreground deletion that returns once the object is gone.
    async fn delete_and_wait<K>(&self, api: &Api<K>, name: &str) -> Result<DeleteOutcome>
    where
        K: kube::Resource + Clone + DeserializeOwned + std::fmt::Debug,
    {
        let params = DeleteParams {
            grace_period_seconds: Some(0),
            propagation_policy: Some(PropagationPolicy::Foreground),
            ..Default::default()
        };

        match api.delete(name, &params).await {
            Ok(_) => {}
            Err(e) => {
                let e = Error::from(e);
                if e.is_not_found() {
                    return Ok(DeleteOutcome::NotFound);
                }
                return Err(e);
            }
        }

        poll_until(self.delete_policy, |_| async move {
            let remaining = api.get_opt(name).await?;
            Ok::<_, Error>(remaining.is_none().then_some(()))
        })
        .await
        .map_err(|e| match e {
            Exhausted::Failed { last, .. } => last,
            Exhausted::GaveUp { .. } => Error::Timeout(format!("deletion of {}", name)),
        })?;

        Ok(DeleteOutcome::Deleted)
    }

    fn build_deployment(&self, mon: &MonConfig) -> Deployment {
        let labels = mon_labels(&self.namespace, &mon.daemon_name);
        let public_addr = mon
            .public_ip
            .as_ref()
            .map(|ip| format!("{}:{}", ip, mon.port))
            .unwrap_or_default();

        let node_selector = mon.node.as_ref().map(|node| {
            let mut selector = BTreeMap::new();
            selector.insert("kubernetes.io/hostname".to_string(), node.hostname.clone());
            selector
        });

        Deployment {
            metadata: ObjectMeta {
                name: Some(mon.resource_name.clone()),
                namespace: Some(self.namespace.clone()),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(1),
                selector: LabelSelector {
                    match_labels: Some(labels.clone()),
                    ..Default::default()
                },
                strategy: Some(DeploymentStrategy {
                    type_: Some("Recreate".to_string()),
                    ..Default::default()
                }),
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        name: Some(mon.resource_name.clone()),
                        labels: Some(labels),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        host_network: Some(mon.host_network),
                        dns_policy: mon
                            .host_network
                            .then(|| "ClusterFirstWithHostNet".to_string()),
                        node_selector,
                        restart_policy: Some("Always".to_string()),
                        containers: vec![Container {
                            name: "mon".to_string(),
                            image: Some(
                                mon.image
                                    .clone()
                                    .unwrap_or_else(|| self.default_image.clone()),
                            ),
                            command: Some(vec!["ceph-mon".to_string()]),
                            args: Some(vec![
                                "--foreground".to_string(),
                                format!("--cluster={}", self.cluster_name),
                                format!("--id={}", mon.daemon_name),
                                format!("--public-addr={}", public_addr),
                                format!(
                                    "--mon-data={}/{}-{}",
                                    MON_DATA_DIR, self.cluster_name, mon.daemon_name
                                ),
                            ]),
                            ports: Some(vec![ContainerPort {
                                container_port: mon.port as i32,
                                name: Some("client".to_string()),
                                protocol: Some("TCP".to_string()),
                                ..Default::default()
                            }]),
                            env: Some(vec![EnvVar {
                                name: "POD_NAMESPACE".to_string(),
                                value_from: Some(EnvVarSource {
                                    field_ref: Some(ObjectFieldSelector {
                                        field_path: "metadata.namespace".to_string(),
                                        ..Default::default()
                                    }),
                                    ..Default::default()
                                }),
                                ..Default::default()
                            }]),
                            volume_mounts: Some(vec![
                                VolumeMount {
                                    name: "mon-data".to_string(),
                                    mount_path: MON_DATA_DIR.to_string(),
                                    ..Default::default()
                                },
                                VolumeMount {
                                    name: "ceph-config".to_string(),
                                    mount_path: CONFIG_DIR.to_string(),
                                    read_only: Some(true),
                                    ..Default::default()
                                },
                            ]),
                            ..Default::default()
                        }],
                        volumes: Some(vec![
                            Volume {
                                name: "mon-data".to_string(),
                                host_path: Some(HostPathVolumeSource {
                                    path: format!(
                                        "{}/mon-{}",
                                        self.data_dir_host_path, mon.daemon_name
                                    ),
                                    ..Default::default()
                                }),
                                ..Default::default()
                            },
                            Volume {
                                name: "ceph-config".to_string(),
                                host_path: Some(HostPathVolumeSource {
                                    path: self.data_dir_host_path.clone(),
                                    ..Default::default()
                                }),
                                ..Default::default()
                            },
                        ]),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn build_service(&self, mon: &MonConfig) -> Service {
        let labels = mon_labels(&self.namespace, &mon.daemon_name);

        Service {
            metadata: ObjectMeta {
                name: Some(mon.resource_name.clone()),
                namespace: Some(self.namespace.clone()),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                selector: Some(labels),
                ports: Some(vec![ServicePort {
                    name: Some("client".to_string()),
                    port: mon.port as i32,
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

#[async_trait]
impl DaemonLifecycle for KubeDaemonLifecycle {
    async fn create_or_update_deployment(&self, mon: &MonConfig) -> Result<()> {
        let deployment = self.build_deployment(mon);
        self.deployments()
            .patch(&mon.resource_name, &apply_params(), &Patch::Apply(&deployment))
            .await?;
        debug!(name = %mon.resource_name, "Mon deployment applied");
        Ok(())
    }

    async fn delete_deployment(&self, resource_name: &str) -> Result<DeleteOutcome> {
        self.delete_and_wait(&self.deployments(), resource_name).await
    }

    async fn create_or_update_endpoint(&self, mon: &MonConfig) -> Result<String> {
        let service = self.build_service(mon);
        let applied = self
            .services()
            .patch(&mon.resource_name, &apply_params(), &Patch::Apply(&service))
            .await?;

        let cluster_ip = applied
            .spec
            .and_then(|spec| spec.cluster_ip)
            .filter(|ip| !ip.is_empty() && ip != "None")
            .ok_or_else(|| {
                Error::Lifecycle(format!("service {} has no cluster IP", mon.resource_name))
            })?;

        info!(name = %mon.resource_name, ip = %cluster_ip, "Mon service ready");
        Ok(cluster_ip)
    }

    async fn delete_endpoint(&self, resource_name: &str) -> Result<DeleteOutcome> {
        self.delete_and_wait(&self.services(), resource_name).await
    }

    async fn start_and_confirm(&self, mon: &MonConfig) -> Result<()> {
        self.create_or_update_deployment(mon).await?;

        let api = self.deployments();
        let name = mon.resource_name.as_str();
        poll_until(self.start_policy, |attempt| {
            let api = api.clone();
            async move {
                let deployment = match api.get(name).await {
                    Ok(deployment) => deployment,
                    Err(e) => {
                        let e = Error::from(e);
                        if !e.is_retryable() {
                            return Err(e);
                        }
                        debug!(
                            name = %name,
                            attempt,
                            error = %e,
                            "Transient error reading mon deployment"
                        );
                        return Ok(None);
                    }
                };
                let ready = deployment
                    .status
                    .as_ref()
                    .and_then(|s| s.ready_replicas)
                    .unwrap_or(0);
                debug!(name = %name, attempt, ready, "Waiting for mon to start");
                Ok::<_, Error>((ready > 0).then_some(()))
            }
        })
        .await
        .map_err(|e| match e {
            Exhausted::Failed { last, .. } => last,
            Exhausted::GaveUp { attempts } => Error::Timeout(format!(
                "mon {} to start after {} checks",
                mon.daemon_name, attempts
            )),
        })?;

        info!(mon = %mon.daemon_name, "Mon started");
        Ok(())
    }
}
