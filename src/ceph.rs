//! Quorum client backed by the `ceph` command line tool.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::backend::QuorumClient;
use crate::config::CephConfig;
use crate::error::{Error, Result};
use crate::types::QuorumStatus;

/// Runs ceph commands against a cluster's generated connection config.
#[derive(Debug, Clone)]
pub struct CephCli {
    binary: PathBuf,
    config: CephConfig,
    timeout: Duration,
}

impl CephCli {
    pub fn new(config: &CephConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            config: config.clone(),
            timeout: config.command_timeout,
        }
    }

    fn args(&self, cluster_name: &str, command: &[&str]) -> Vec<String> {
        let mut args: Vec<String> = command.iter().map(|s| s.to_string()).collect();
        args.push(format!("--cluster={}", cluster_name));
        args.push(format!(
            "--conf={}",
            self.config.conf_path(cluster_name).display()
        ));
        args.push("--format".to_string());
        args.push("json".to_string());
        args
    }

    /// Run a ceph command and return its stdout.
    pub async fn run(&self, cluster_name: &str, command: &[&str]) -> Result<String> {
        let printable = command.join(" ");
        let args = self.args(cluster_name, command);
        debug!(command = %printable, "Running ceph command");

        let output = tokio::time::timeout(
            self.timeout,
            Command::new(&self.binary)
                .args(&args)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| Error::Command {
            command: printable.clone(),
            reason: format!("timed out after {}s", self.timeout.as_secs()),
        })?
        .map_err(|e| Error::Command {
            command: printable.clone(),
            reason: e.to_string(),
        })?;

        if !output.status.success() {
            return Err(Error::Command {
                command: printable,
                reason: format!(
                    "{}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Parse `mon_status` output.
pub fn parse_quorum_status(raw: &str) -> Result<QuorumStatus> {
    serde_json::from_str(raw)
        .map_err(|e| Error::QuorumStatus(format!("unparseable mon status: {}", e)))
}

#[async_trait]
impl QuorumClient for CephCli {
    async fn quorum_status(&self, cluster_name: &str) -> Result<QuorumStatus> {
        let raw = self
            .run(cluster_name, &["mon_status"])
            .await
            .map_err(|e| Error::QuorumStatus(e.to_string()))?;
        parse_quorum_status(&raw)
    }

    async fn remove_from_quorum(&self, cluster_name: &str, daemon_name: &str) -> Result<()> {
        debug!(mon = %daemon_name, "Removing monitor");
        // `mon remove` succeeds for a mon that is already gone
        self.run(cluster_name, &["mon", "remove", daemon_name]).await?;
        info!(mon = %daemon_name, "Removed monitor");
        Ok(())
    }
}
