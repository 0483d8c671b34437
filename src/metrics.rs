//! Prometheus metrics for the mon operator

use prometheus::{
    register_counter_vec, register_gauge_vec, CounterVec, GaugeVec, TextEncoder,
};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{info, warn};

lazy_static::lazy_static! {
    /// Total health checks
    pub static ref HEALTH_CHECKS: CounterVec = register_counter_vec!(
        "mon_operator_health_checks_total",
        "Total number of mon health checks",
        &["cluster", "result"]
    ).unwrap();

    /// Remediations taken by health checks
    pub static ref REMEDIATIONS: CounterVec = register_counter_vec!(
        "mon_operator_remediations_total",
        "Total number of mon remediations",
        &["cluster", "kind", "result"]
    ).unwrap();

    /// Mon counts observed by the last health check
    pub static ref MONS: GaugeVec = register_gauge_vec!(
        "mon_operator_mons",
        "Mon counts observed by the last health check",
        &["cluster", "state"]
    ).unwrap();

    /// Rolling updates
    pub static ref ROLLOUTS: CounterVec = register_counter_vec!(
        "mon_operator_rollouts_total",
        "Total number of rolling updates",
        &["resource", "result"]
    ).unwrap();
}

/// Run the metrics server
pub async fn run_metrics_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(port = %port, "Metrics server started");

    loop {
        match listener.accept().await {
            Ok((mut socket, _)) => {
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;

                    let metrics = render();
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\n\r\n{}",
                        metrics.len(),
                        metrics
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                });
            }
            Err(e) => warn!(error = %e, "Failed to accept metrics connection"),
        }
    }
}

/// Encode all registered metrics in the text exposition format
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap_or_default()
}

fn result_label(ok: bool) -> &'static str {
    if ok {
        "success"
    } else {
        "failure"
    }
}

/// Record a health check
pub fn record_health_check(cluster: &str, ok: bool) {
    HEALTH_CHECKS.with_label_values(&[cluster, result_label(ok)]).inc();
}

/// Record a remediation
pub fn record_remediation(cluster: &str, kind: &str, ok: bool) {
    REMEDIATIONS
        .with_label_values(&[cluster, kind, result_label(ok)])
        .inc();
}

/// Update the mon gauges
pub fn set_quorum_gauges(cluster: &str, desired: usize, in_map: usize, in_quorum: usize) {
    MONS.with_label_values(&[cluster, "desired"]).set(desired as f64);
    MONS.with_label_values(&[cluster, "in_map"]).set(in_map as f64);
    MONS.with_label_values(&[cluster, "in_quorum"]).set(in_quorum as f64);
}

/// Record a rolling update
pub fn record_rollout(resource: &str, ok: bool) {
    ROLLOUTS.with_label_values(&[resource, result_label(ok)]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gauges_are_rendered() {
        set_quorum_gauges("metrics-test", 3, 3, 2);
        record_remediation("metrics-test", "failover", true);

        let text = render();
        assert!(text.contains("mon_operator_mons"));
        assert!(text.contains("cluster=\"metrics-test\""));
        assert!(text.contains("mon_operator_remediations_total"));
        assert_eq!(
            MONS.with_label_values(&["metrics-test", "in_quorum"]).get(),
            2.0
        );
    }
}
