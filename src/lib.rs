//! Mon operator - keeps a storage cluster's monitor quorum healthy.
//!
//! The operator periodically compares the cluster's own view of its mons
//! (the monmap and quorum ranks) with the desired count declared on the
//! `CephCluster` resource, and takes at most one remediation per check:
//! removing a stale mon, failing over a mon that stayed out of quorum too
//! long, or scaling the quorum up or down.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Controller: CephCluster watch → mon target, status         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  HealthChecker: check_health every interval                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │  MonCluster: membership | timeouts | ids  (one lock)        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Backends: ceph CLI | Deployments/Services | ConfigMap      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`rolling::RollingUpdater`] separately coordinates verified rolling
//! updates of replicated daemon sets.

pub mod backend;
pub mod ceph;
pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod k8s;
pub mod metrics;
pub mod mon;
pub mod resilience;
pub mod rolling;
pub mod shutdown;
pub mod types;

// Re-exports
pub use error::{Error, Result};
pub use mon::{HealthChecker, HealthReport, MonCluster, MonTarget, Remediation};
pub use rolling::{Intent, RollingUpdater};
