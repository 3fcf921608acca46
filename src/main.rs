//! dxcluster-mqtt CLI - Republish a DX cluster feed to MQTT.

use anyhow::{Context, Result};
use clap::Parser;
use dxcluster_mqtt::{
    client::ClusterClient, config::Config, metrics::start_metrics_server, publisher::Publisher,
    transport::MqttTransport, worker::Worker,
};
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// dxcluster-mqtt - Bridge DX cluster spots and WCY reports to MQTT
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short = 'f', long, env = "DXCLUSTER_CONFIG")]
    config: Option<PathBuf>,

    /// Callsign to use for cluster login
    #[arg(short, long, env = "DXCLUSTER_CALLSIGN")]
    callsign: Option<String>,

    /// DX cluster hostname
    #[arg(long, env = "DXCLUSTER_HOST")]
    host: Option<String>,

    /// DX cluster port
    #[arg(long, env = "DXCLUSTER_PORT")]
    port: Option<u16>,

    /// MQTT broker hostname
    #[arg(long, env = "MQTT_HOST")]
    mqtt_host: Option<String>,

    /// MQTT broker port
    #[arg(long, env = "MQTT_PORT")]
    mqtt_port: Option<u16>,

    /// MQTT username
    #[arg(long, env = "MQTT_USERNAME")]
    mqtt_username: Option<String>,

    /// MQTT password
    #[arg(long, env = "MQTT_PASSWORD", hide_env_values = true)]
    mqtt_password: Option<String>,

    /// Enable the Prometheus metrics endpoint
    #[arg(long)]
    metrics: bool,

    /// Port for the Prometheus metrics endpoint
    #[arg(long)]
    metrics_port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Maximum runtime in seconds (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    max_runtime: u64,
}

impl Args {
    /// Apply command-line overrides on top of the file configuration.
    fn apply(self, config: &mut Config) {
        if let Some(callsign) = self.callsign {
            config.cluster.callsign = callsign;
        }
        if let Some(host) = self.host {
            config.cluster.host = host;
        }
        if let Some(port) = self.port {
            config.cluster.port = port;
        }
        if let Some(host) = self.mqtt_host {
            config.mqtt.host = host;
        }
        if let Some(port) = self.mqtt_port {
            config.mqtt.port = port;
        }
        if let Some(username) = self.mqtt_username {
            config.mqtt.username = Some(username);
        }
        if let Some(password) = self.mqtt_password {
            config.mqtt.password = Some(password);
        }
        if self.metrics {
            config.metrics.enabled = true;
        }
        if let Some(port) = self.metrics_port {
            config.metrics.port = port;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let max_runtime = args.max_runtime;
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    info!("dxcluster-mqtt starting...");
    info!("Callsign: {}", config.cluster.callsign);
    info!("Cluster: {}:{}", config.cluster.host, config.cluster.port);
    info!("Broker: {}:{}", config.mqtt.host, config.mqtt.port);

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Handle Ctrl+C and SIGTERM
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown signal received");
        let _ = signal_tx.send(true);
    });

    // Optional max runtime
    if max_runtime > 0 {
        let runtime_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(max_runtime)).await;
            info!("Max runtime reached");
            let _ = runtime_tx.send(true);
        });
    }

    let publisher = Publisher::new(MqttTransport::new(config.mqtt_transport()), config.topics());
    let client = ClusterClient::new(config.cluster_client());
    let worker = Worker::new(client, publisher, config.worker());

    if config.metrics.enabled {
        let state = worker.state();
        let port = config.metrics.port;
        tokio::spawn(async move {
            if let Err(e) = start_metrics_server(port, state).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    worker
        .run(shutdown_rx)
        .await
        .context("Failed to start MQTT transport")?;

    Ok(())
}

/// Wait for Ctrl+C, or SIGTERM on unix.
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
