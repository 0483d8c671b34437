//! Mon operator
//!
//! Watches a CephCluster resource and keeps its mon quorum healthy.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use kube::Client;
use tokio::sync::watch;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use mon_operator::ceph::CephCli;
use mon_operator::config::OperatorConfig;
use mon_operator::controller::Controller;
use mon_operator::k8s::{KubeConfigStore, KubeDaemonLifecycle, KubePlacement};
use mon_operator::metrics;
use mon_operator::mon::{Backends, HealthChecker, MonCluster, MonSettings, MonTarget};
use mon_operator::shutdown::{ShutdownCoordinator, SignalHandler};

#[derive(Parser, Debug)]
#[command(name = "mon-operator")]
#[command(about = "Keeps a storage cluster's mon quorum healthy")]
struct Args {
    /// Config file (JSON); defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Namespace of the cluster
    #[arg(short, long)]
    namespace: Option<String>,

    /// Name of the CephCluster resource and storage cluster
    #[arg(long)]
    cluster_name: Option<String>,

    /// Run mons on the host network until the resource says otherwise
    #[arg(long)]
    host_network: Option<bool>,

    /// Metrics server port
    #[arg(short, long)]
    metrics_port: Option<u16>,

    /// Health check port
    #[arg(short = 'H', long)]
    health_port: Option<u16>,

    /// Log level
    #[arg(short, long)]
    log_level: Option<String>,
}

impl Args {
    /// Command line flags override the config file.
    fn apply(&self, config: &mut OperatorConfig) {
        if let Some(namespace) = &self.namespace {
            config.cluster.namespace = namespace.clone();
        }
        if let Some(name) = &self.cluster_name {
            config.cluster.name = name.clone();
        }
        if let Some(host_network) = self.host_network {
            config.cluster.host_network = host_network;
        }
        if let Some(port) = self.metrics_port {
            config.observability.metrics_port = port;
        }
        if let Some(port) = self.health_port {
            config.observability.health_port = port;
        }
        if let Some(level) = &self.log_level {
            config.observability.log_level = level.clone();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => OperatorConfig::from_file(path)?,
        None => OperatorConfig::default(),
    };
    args.apply(&mut config);
    config.validate()?;

    // Initialize logging
    let level = match config.observability.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!(
        namespace = %config.cluster.namespace,
        cluster = %config.cluster.name,
        "Starting mon operator"
    );

    let client = Client::try_default().await?;
    let namespace = config.cluster.namespace.clone();

    let backends = Backends {
        quorum: Arc::new(CephCli::new(&config.ceph)),
        lifecycle: Arc::new(KubeDaemonLifecycle::new(
            client.clone(),
            namespace.clone(),
            config.cluster.name.clone(),
            config.cluster.mon_image.clone(),
            config.cluster.start_policy,
        )),
        store: Arc::new(KubeConfigStore::new(
            client.clone(),
            namespace.clone(),
            config.ceph.clone(),
        )),
        placement: Arc::new(KubePlacement::new(client.clone())),
    };

    // Until the resource is observed, health checks use the configured defaults
    let (target_tx, target_rx) = watch::channel(MonTarget::from(&config));
    let cluster =
        Arc::new(MonCluster::restore(MonSettings::from(&config), backends, target_rx).await?);

    let shutdown = ShutdownCoordinator::new();

    // Start metrics server
    let metrics_handle =
        tokio::spawn(metrics::run_metrics_server(config.observability.metrics_port));

    // Start health server
    let health_handle = tokio::spawn(run_health_server(config.observability.health_port));

    let controller = Controller::new(
        client,
        namespace,
        config.cluster.name.clone(),
        Arc::clone(&cluster),
        target_tx,
    );
    let controller_handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = controller.run(shutdown).await {
                error!(error = %e, "Cluster controller error");
            }
        })
    };

    let checker = HealthChecker::new(cluster);
    let checker_handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { checker.run(shutdown).await })
    };

    let signal_handle = tokio::spawn(SignalHandler::new(shutdown.clone()).run());

    info!("Mon operator started");

    tokio::select! {
        _ = controller_handle => info!("Cluster controller stopped"),
        _ = metrics_handle => info!("Metrics server stopped"),
        _ = health_handle => info!("Health server stopped"),
        _ = signal_handle => info!("Shutdown signal received"),
    }

    // Let an in-flight health check finish before exiting
    shutdown.shutdown();
    if let Err(e) = checker_handle.await {
        warn!(error = %e, "Health checker task failed");
    }

    info!("Mon operator stopped");
    Ok(())
}

async fn run_health_server(port: u16) -> std::io::Result<()> {
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(port = %port, "Health server started");

    loop {
        if let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;

                let response = "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\nOK";
                let _ = socket.write_all(response.as_bytes()).await;
            });
        }
    }
}
