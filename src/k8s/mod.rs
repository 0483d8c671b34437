//! Kubernetes-backed implementations of the reconciler's collaborators.
//!
//! - [`KubeDaemonLifecycle`]: one Deployment and one Service per mon
//! - [`KubePlacement`]: picks a ready, schedulable node
//! - [`KubeConfigStore`]: mon state in a ConfigMap, connection config on disk
//! - [`KubeStatefulSets`]: StatefulSets as rolling update targets

mod lifecycle;
mod placement;
mod statefulset;
mod store;

pub use lifecycle::KubeDaemonLifecycle;
pub use placement::KubePlacement;
pub use statefulset::KubeStatefulSets;
pub use store::{render_connection_config, KubeConfigStore, MON_ENDPOINTS_CONFIGMAP};

use std::collections::BTreeMap;

use kube::api::PatchParams;

use crate::types::MON_APP_NAME;

/// Field manager used for server-side apply.
pub const FIELD_MANAGER: &str = "mon-operator";

pub(crate) fn apply_params() -> PatchParams {
    PatchParams::apply(FIELD_MANAGER).force()
}

pub(crate) fn common_labels(namespace: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app".to_string(), MON_APP_NAME.to_string());
    labels.insert("mon_cluster".to_string(), namespace.to_string());
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        FIELD_MANAGER.to_string(),
    );
    labels
}

pub(crate) fn mon_labels(namespace: &str, daemon_name: &str) -> BTreeMap<String, String> {
    let mut labels = common_labels(namespace);
    labels.insert("mon".to_string(), daemon_name.to_string());
    labels
}
