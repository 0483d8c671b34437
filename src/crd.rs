//! Custom Resource Definition for the storage cluster

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::mon::{MonTarget, DEFAULT_MON_COUNT};

// ============================================================================
// CephCluster CRD
// ============================================================================

/// CephCluster declares the desired shape of a storage cluster's mons
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "ceph.rook.io",
    version = "v1",
    kind = "CephCluster",
    plural = "cephclusters",
    shortname = "ceph",
    status = "CephClusterStatus",
    namespaced,
    printcolumn = r#"{"name":"Mons","type":"integer","jsonPath":".spec.mon.count"}"#,
    printcolumn = r#"{"name":"InQuorum","type":"integer","jsonPath":".status.inQuorum"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CephClusterSpec {
    /// Mon settings
    #[serde(default)]
    pub mon: MonSpec,

    /// Network settings
    #[serde(default)]
    pub network: NetworkSpec,

    /// Ceph image to run
    #[serde(default)]
    pub ceph_version: Option<CephVersionSpec>,
}

/// Mon settings
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MonSpec {
    /// Desired number of mons
    #[serde(default = "default_mon_count")]
    pub count: u32,

    /// Allow more than one mon on a node
    #[serde(default)]
    pub allow_multiple_per_node: bool,
}

fn default_mon_count() -> u32 {
    DEFAULT_MON_COUNT
}

impl Default for MonSpec {
    fn default() -> Self {
        Self {
            count: default_mon_count(),
            allow_multiple_per_node: false,
        }
    }
}

/// Network settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    /// Run daemons on the host network
    #[serde(default)]
    pub host_network: bool,
}

/// Ceph image
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CephVersionSpec {
    pub image: String,
}

// ============================================================================
// Status
// ============================================================================

/// Status of a CephCluster
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CephClusterStatus {
    /// Current phase
    pub phase: ClusterPhase,

    /// Desired mon count last seen by the operator
    #[serde(default)]
    pub desired_mons: u32,

    /// Mons in the authoritative membership
    #[serde(default)]
    pub mons: Vec<String>,

    /// Mons in the monmap at the last health check
    #[serde(default)]
    pub mon_count: u32,

    /// Mons in quorum at the last health check
    #[serde(default)]
    pub in_quorum: u32,

    /// Mons currently out of quorum
    #[serde(default)]
    pub out_of_quorum: Vec<String>,

    /// Members missing from the monmap at the last health check
    #[serde(default)]
    pub missing: Vec<String>,

    /// Last update time
    #[serde(default)]
    pub last_updated: Option<String>,

    /// Human readable message
    #[serde(default)]
    pub message: Option<String>,
}

/// Cluster phase
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ClusterPhase {
    #[default]
    Pending,
    Healthy,
    /// Some mons are out of quorum, missing, or the count is off
    Degraded,
}

impl CephCluster {
    /// What the resource asks of the mon quorum.
    pub fn mon_target(&self) -> MonTarget {
        MonTarget {
            count: self.spec.mon.count,
            host_network: self.spec.network.host_network,
            allow_multiple_per_node: self.spec.mon.allow_multiple_per_node,
            image: self
                .spec
                .ceph_version
                .as_ref()
                .map(|version| version.image.clone())
                .filter(|image| !image.is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn test_spec_defaults() {
        let spec: CephClusterSpec = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(spec.mon.count, 3);
        assert!(!spec.network.host_network);
        assert!(spec.ceph_version.is_none());

        let spec: CephClusterSpec = serde_json::from_value(serde_json::json!({
            "mon": { "count": 5 },
            "network": { "hostNetwork": true }
        }))
        .unwrap();
        assert_eq!(spec.mon.count, 5);
        assert!(spec.network.host_network);
    }

    #[test]
    fn test_mon_target_from_resource() {
        let spec: CephClusterSpec = serde_json::from_value(serde_json::json!({
            "mon": { "count": 5, "allowMultiplePerNode": true },
            "network": { "hostNetwork": true },
            "cephVersion": { "image": "ceph/ceph:v14" }
        }))
        .unwrap();
        let target = CephCluster::new("east", spec).mon_target();

        assert_eq!(target.count, 5);
        assert!(target.host_network);
        assert!(target.allow_multiple_per_node);
        assert_eq!(target.image.as_deref(), Some("ceph/ceph:v14"));

        let target = CephCluster::new("east", CephClusterSpec::default()).mon_target();
        assert_eq!(target, MonTarget::new(3));
    }

    #[test]
    fn test_crd_generation() {
        let crd = CephCluster::crd();
        assert_eq!(crd.spec.group, "ceph.rook.io");
        assert_eq!(crd.spec.names.kind, "CephCluster");
    }
}
