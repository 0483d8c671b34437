//! Mon state in a ConfigMap and the client connection config on disk.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, Patch};
use kube::Client;
use tracing::{debug, info};

use super::{apply_params, common_labels};
use crate::backend::ConfigStore;
use crate::config::CephConfig;
use crate::error::{Error, Result};
use crate::types::{ClusterMembership, MonInfo, NodeAssignment, PersistedMonState};

/// ConfigMap holding the mon endpoints.
pub const MON_ENDPOINTS_CONFIGMAP: &str = "rook-ceph-mon-endpoints";

const DATA_KEY: &str = "data";
const MAX_MON_ID_KEY: &str = "maxMonId";
const MAPPING_KEY: &str = "mapping";

/// Persists mon state in a ConfigMap in the cluster namespace.
#[derive(Clone)]
pub struct KubeConfigStore {
    client: Client,
    namespace: String,
    ceph: CephConfig,
}

impl KubeConfigStore {
    pub fn new(client: Client, namespace: impl Into<String>, ceph: CephConfig) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            ceph,
        }
    }

    fn api(&self) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// `a=10.0.0.1:6789,b=10.0.0.2:6789`
fn encode_membership(membership: &ClusterMembership) -> String {
    membership
        .values()
        .map(|mon| format!("{}={}", mon.name, mon.endpoint))
        .collect::<Vec<_>>()
        .join(",")
}

fn decode_membership(raw: &str) -> Result<ClusterMembership> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| -> Result<(String, MonInfo)> {
            let (name, endpoint) = entry
                .split_once('=')
                .ok_or_else(|| Error::Persistence(format!("malformed mon entry '{}'", entry)))?;
            Ok((
                name.to_string(),
                MonInfo {
                    name: name.to_string(),
                    endpoint: endpoint.to_string(),
                },
            ))
        })
        .collect()
}

pub(crate) fn encode_state(state: &PersistedMonState) -> Result<BTreeMap<String, String>> {
    let mut data = BTreeMap::new();
    data.insert(DATA_KEY.to_string(), encode_membership(&state.membership));
    data.insert(
        MAX_MON_ID_KEY.to_string(),
        state
            .max_mon_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-1".to_string()),
    );
    data.insert(
        MAPPING_KEY.to_string(),
        serde_json::to_string(&state.node_mapping)?,
    );
    Ok(data)
}

pub(crate) fn decode_state(data: &BTreeMap<String, String>) -> Result<PersistedMonState> {
    let membership = match data.get(DATA_KEY) {
        Some(raw) => decode_membership(raw)?,
        None => ClusterMembership::new(),
    };

    let max_mon_id = match data.get(MAX_MON_ID_KEY).map(|s| s.trim()) {
        None | Some("") | Some("-1") => None,
        Some(raw) => Some(
            raw.parse::<u32>().map_err(|e| {
                Error::Persistence(format!("invalid {} '{}': {}", MAX_MON_ID_KEY, raw, e))
            })?,
        ),
    };

    let node_mapping = match data.get(MAPPING_KEY) {
        Some(raw) if !raw.trim().is_empty() => serde_json::from_str::<NodeAssignment>(raw)?,
        _ => NodeAssignment::new(),
    };

    Ok(PersistedMonState {
        membership,
        max_mon_id,
        node_mapping,
    })
}

/// Render the ini-style config clients use to reach the mons.
pub fn render_connection_config(membership: &ClusterMembership) -> String {
    let members: Vec<&str> = membership.values().map(|m| m.name.as_str()).collect();
    let hosts: Vec<&str> = membership.values().map(|m| m.endpoint.as_str()).collect();

    format!(
        "[global]\nmon_initial_members = {}\nmon_host = {}\n",
        members.join(" "),
        hosts.join(",")
    )
}

async fn write_atomically(path: PathBuf, contents: String) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    let tmp = path.with_extension("config.tmp");
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, &path).await
}

// ============================================================================
// Store
// ============================================================================

#[async_trait]
impl ConfigStore for KubeConfigStore {
    async fn load(&self) -> Result<Option<PersistedMonState>> {
        let Some(config_map) = self.api().get_opt(MON_ENDPOINTS_CONFIGMAP).await? else {
            debug!(namespace = %self.namespace, "No saved mon state");
            return Ok(None);
        };

        let state = decode_state(&config_map.data.unwrap_or_default())?;
        info!(
            namespace = %self.namespace,
            mons = state.membership.len(),
            max_mon_id = ?state.max_mon_id,
            "Loaded saved mon state"
        );
        Ok(Some(state))
    }

    async fn save_membership(&self, state: &PersistedMonState) -> Result<()> {
        let config_map = ConfigMap {
            metadata: ObjectMeta {
                name: Some(MON_ENDPOINTS_CONFIGMAP.to_string()),
                namespace: Some(self.namespace.clone()),
                labels: Some(common_labels(&self.namespace)),
                ..Default::default()
            },
            data: Some(encode_state(state)?),
            ..Default::default()
        };

        self.api()
            .patch(MON_ENDPOINTS_CONFIGMAP, &apply_params(), &Patch::Apply(&config_map))
            .await
            .map_err(|e| Error::Persistence(format!("saving {}: {}", MON_ENDPOINTS_CONFIGMAP, e)))?;

        debug!(mons = state.membership.len(), "Saved mon state");
        Ok(())
    }

    async fn write_connection_config(
        &self,
        cluster_name: &str,
        membership: &ClusterMembership,
    ) -> Result<()> {
        let path = self.ceph.conf_path(cluster_name);
        write_atomically(path.clone(), render_connection_config(membership))
            .await
            .map_err(|e| Error::Persistence(format!("writing {}: {}", path.display(), e)))?;

        debug!(path = %path.display(), "Wrote connection config");
        Ok(())
    }
}
