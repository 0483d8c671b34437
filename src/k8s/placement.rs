//! Node selection for new mons.

use std::collections::BTreeSet;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, ListParams};
use kube::Client;
use tracing::debug;

use crate::backend::Placement;
use crate::error::{Error, Result};
use crate::types::{MonConfig, NodeAssignment, NodeInfo};

/// Spreads mons across ready, schedulable nodes.
///
/// A node that already hosts a mon is only reused once every eligible node
/// hosts one, and only for mons allowed to share a node.
#[derive(Clone)]
pub struct KubePlacement {
    client: Client,
}

impl KubePlacement {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn is_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false)
}

fn is_schedulable(node: &Node) -> bool {
    !node
        .spec
        .as_ref()
        .and_then(|s| s.unschedulable)
        .unwrap_or(false)
}

fn node_info(node: &Node) -> Option<NodeInfo> {
    let name = node.metadata.name.clone()?;
    let hostname = node
        .metadata
        .labels
        .as_ref()
        .and_then(|l| l.get("kubernetes.io/hostname").cloned())
        .unwrap_or_else(|| name.clone());

    let addresses = node.status.as_ref().and_then(|s| s.addresses.as_ref())?;
    let address = addresses
        .iter()
        .find(|a| a.type_ == "InternalIP")
        .or_else(|| addresses.first())
        .map(|a| a.address.clone())?;

    Some(NodeInfo {
        name,
        hostname,
        address,
    })
}

/// Pick a node from `nodes`, preferring one not already in `current`.
///
/// Falls back to an occupied node only when `allow_shared` is set.
pub(crate) fn choose_node(
    nodes: &[Node],
    current: &NodeAssignment,
    allow_shared: bool,
) -> Option<NodeInfo> {
    let occupied: BTreeSet<&str> = current.values().map(|n| n.name.as_str()).collect();
    let mut eligible = nodes
        .iter()
        .filter(|n| is_ready(n) && is_schedulable(n))
        .filter_map(node_info)
        .peekable();

    let first = eligible.peek().cloned().filter(|_| allow_shared);
    eligible
        .find(|n| !occupied.contains(n.name.as_str()))
        .or(first)
}

#[async_trait]
impl Placement for KubePlacement {
    async fn assign(&self, mon: &MonConfig, current: &NodeAssignment) -> Result<NodeInfo> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes.list(&ListParams::default()).await?;

        let node = choose_node(&list.items, current, mon.allow_multiple_per_node).ok_or_else(|| {
            Error::Placement {
                name: mon.daemon_name.clone(),
                reason: format!(
                    "none of {} nodes is ready, schedulable and free of mons",
                    list.items.len()
                ),
            }
        })?;

        debug!(mon = %mon.daemon_name, node = %node.name, "Assigned mon to node");
        Ok(node)
    }
}
