//! Core types shared by the mon reconciler and its collaborators.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Application label and resource name prefix for mon daemons.
pub const MON_APP_NAME: &str = "rook-ceph-mon";

/// Authoritative membership: daemon name to mon info.
pub type ClusterMembership = BTreeMap<String, MonInfo>;

/// Node assignment: daemon name to the node hosting it.
pub type NodeAssignment = BTreeMap<String, NodeInfo>;

/// A mon recorded in the authoritative membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonInfo {
    /// Daemon name (`a`, `b`, ...).
    pub name: String,
    /// Reachable `ip:port` endpoint.
    pub endpoint: String,
}

impl MonInfo {
    pub fn new(name: impl Into<String>, ip: &str, port: u16) -> Self {
        Self {
            name: name.into(),
            endpoint: format!("{}:{}", ip, port),
        }
    }
}

/// A node that can host a mon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Kubernetes node name.
    pub name: String,
    /// Hostname label, used to pin the mon pod.
    pub hostname: String,
    /// Address used when mons run on the host network.
    pub address: String,
}

/// Everything needed to provision one mon daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonConfig {
    /// Numeric identity; never reused.
    pub id: u32,
    /// Daemon name derived from the id.
    pub daemon_name: String,
    /// Name of the deployment and service backing the daemon.
    pub resource_name: String,
    /// Listening port.
    pub port: u16,
    /// Public address, resolved after placement.
    pub public_ip: Option<String>,
    /// Node the daemon is pinned to, resolved by placement.
    pub node: Option<NodeInfo>,
    /// Run on the host network and advertise the node address.
    pub host_network: bool,
    /// Whether placement may put this mon next to another one.
    pub allow_multiple_per_node: bool,
    /// Image override; the lifecycle default applies when unset.
    pub image: Option<String>,
}

impl MonConfig {
    /// Build the config for a new mon with the given id.
    pub fn new(id: u32, port: u16) -> Self {
        let daemon_name = index_to_name(id);
        Self {
            id,
            resource_name: resource_name(&daemon_name),
            daemon_name,
            port,
            public_ip: None,
            node: None,
            host_network: false,
            allow_multiple_per_node: false,
            image: None,
        }
    }
}

/// Deployment/service name for a daemon.
pub fn resource_name(daemon_name: &str) -> String {
    format!("{}-{}", MON_APP_NAME, daemon_name)
}

/// Letter name for an index: 0 is `a`, 25 is `z`, 26 is `aa`.
pub fn index_to_name(index: u32) -> String {
    let mut name = Vec::new();
    let mut n = index as u64 + 1;
    while n > 0 {
        n -= 1;
        name.push(b'a' + (n % 26) as u8);
        n /= 26;
    }
    name.reverse();
    String::from_utf8(name).unwrap_or_default()
}

// ============================================================================
// Quorum status
// ============================================================================

/// A member of the monmap as reported by the storage cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonMapEntry {
    pub name: String,
    pub rank: i32,
    #[serde(rename = "addr", default)]
    pub endpoint: String,
}

/// The monmap section of a status report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonMap {
    #[serde(default)]
    pub mons: Vec<MonMapEntry>,
}

/// Quorum status as reported by the storage cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumStatus {
    /// Ranks of the mons currently in quorum.
    #[serde(default)]
    pub quorum: Vec<i32>,
    #[serde(rename = "monmap", default)]
    pub mon_map: MonMap,
}

impl QuorumStatus {
    /// Whether the monmap entry is in quorum.
    pub fn in_quorum(&self, mon: &MonMapEntry) -> bool {
        self.quorum.contains(&mon.rank)
    }

    /// Number of mons in the monmap.
    pub fn mon_count(&self) -> usize {
        self.mon_map.mons.len()
    }

    /// Number of monmap entries in quorum.
    pub fn in_quorum_count(&self) -> usize {
        self.mon_map.mons.iter().filter(|m| self.in_quorum(m)).count()
    }
}

impl fmt::Display for QuorumStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mons: Vec<String> = self
            .mon_map
            .mons
            .iter()
            .map(|m| {
                let state = if self.in_quorum(m) { "in" } else { "out" };
                format!("{}({})", m.name, state)
            })
            .collect();
        write!(f, "quorum={:?} mons=[{}]", self.quorum, mons.join(", "))
    }
}

// ============================================================================
// Persisted state
// ============================================================================

/// Mon state written to the config store after every membership change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedMonState {
    pub membership: ClusterMembership,
    /// Highest mon id confirmed started; `None` before the first mon.
    pub max_mon_id: Option<u32>,
    pub node_mapping: NodeAssignment,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_to_name() {
        assert_eq!(index_to_name(0), "a");
        assert_eq!(index_to_name(1), "b");
        assert_eq!(index_to_name(25), "z");
        assert_eq!(index_to_name(26), "aa");
        assert_eq!(index_to_name(27), "ab");
        assert_eq!(index_to_name(701), "zz");
        assert_eq!(index_to_name(702), "aaa");
    }

    #[test]
    fn test_mon_config_names() {
        let mon = MonConfig::new(2, 6789);
        assert_eq!(mon.daemon_name, "c");
        assert_eq!(mon.resource_name, "rook-ceph-mon-c");
        assert!(mon.public_ip.is_none());
        assert!(!mon.host_network);
        assert!(mon.image.is_none());
    }

    #[test]
    fn test_quorum_status_parsing() {
        let json = r#"{
            "name": "a",
            "rank": 0,
            "quorum": [0, 2],
            "monmap": {
                "epoch": 3,
                "mons": [
                    {"name": "a", "rank": 0, "addr": "10.0.0.1:6789/0"},
                    {"name": "b", "rank": 1, "addr": "10.0.0.2:6789/0"},
                    {"name": "c", "rank": 2, "addr": "10.0.0.3:6789/0"}
                ]
            }
        }"#;

        let status: QuorumStatus = serde_json::from_str(json).unwrap();
        assert_eq!(status.mon_count(), 3);
        assert_eq!(status.in_quorum_count(), 2);
        assert!(!status.in_quorum(&status.mon_map.mons[1]));
        assert_eq!(status.mon_map.mons[2].endpoint, "10.0.0.3:6789/0");
        assert_eq!(
            status.to_string(),
            "quorum=[0, 2] mons=[a(in), b(out), c(in)]"
        );
    }

    #[test]
    fn test_mon_info_endpoint() {
        let info = MonInfo::new("a", "10.0.0.1", 6789);
        assert_eq!(info.endpoint, "10.0.0.1:6789");
    }
}
