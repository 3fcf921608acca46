//! Connection supervisor.
//!
//! The [`Worker`] keeps the cluster connection alive, classifies every line it
//! receives and hands the resulting records to the [`Publisher`]. Alongside
//! the reconnect loop it runs a heartbeat timer and a task that watches the
//! broker connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, sleep};
use tracing::{debug, error, info, trace, warn};

use crate::client::{ClientError, ClusterClient, ClusterEvent, wait_for_shutdown};
use crate::heartbeat::Heartbeat;
use crate::parser::parse_spot;
use crate::publisher::Publisher;
use crate::spot::Spot;
use crate::state::{ConnectionState, LineStats};
use crate::transport::{Transport, TransportError, TransportEvent};
use crate::wcy::parse_weather;
use crate::weather::WeatherReport;

/// Timing for the supervisor.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Fixed pause between a disconnect and the next connection attempt.
    pub reconnect_delay: Duration,

    /// Period of the running heartbeat.
    pub heartbeat_interval: Duration,

    /// Time given to the stopped heartbeat to reach the transport.
    pub stop_flush_delay: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(60),
            stop_flush_delay: Duration::from_millis(500),
        }
    }
}

/// A record recognized on the cluster feed.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Spot(Spot),
    Weather(WeatherReport),
}

/// Classify a line: spot grammar first, then weather, otherwise nothing.
pub fn classify_line(line: &str) -> Option<Record> {
    if let Ok(spot) = parse_spot(line) {
        return Some(Record::Spot(spot));
    }
    parse_weather(line).ok().map(Record::Weather)
}

/// How a streaming session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Disconnected,
    Shutdown,
}

/// Publishes running heartbeats for the background tasks.
struct Beacon<T: Transport> {
    publisher: Arc<Publisher<T>>,
    state: ConnectionState,
    stopping: Arc<AtomicBool>,
}

impl<T: Transport> Beacon<T> {
    async fn publish(&self) {
        let heartbeat = Heartbeat::running(&self.state.snapshot());
        if let Err(e) = self.publisher.publish_heartbeat(&heartbeat).await {
            warn!("Failed to publish heartbeat: {}", e);
        }
    }

    /// Heartbeat for a connection change, skipped once shutdown has begun.
    async fn state_changed(&self) {
        if self.stopping.load(Ordering::SeqCst) {
            debug!("Shutting down, skipping state-change heartbeat");
            return;
        }
        self.publish().await;
    }
}

/// Keeps the cluster connection alive and feeds lines to the publisher.
pub struct Worker<T: Transport> {
    client: ClusterClient,
    publisher: Arc<Publisher<T>>,
    lines: Arc<LineStats>,
    stopping: Arc<AtomicBool>,
    config: WorkerConfig,
}

impl<T: Transport> Worker<T> {
    pub fn new(client: ClusterClient, publisher: Publisher<T>, config: WorkerConfig) -> Self {
        Self {
            client,
            publisher: Arc::new(publisher),
            lines: Arc::new(LineStats::new()),
            stopping: Arc::new(AtomicBool::new(false)),
            config,
        }
    }

    /// Shared view of the connection flags and counters.
    pub fn state(&self) -> ConnectionState {
        ConnectionState {
            cluster: self.client.connection_flag(),
            bus: self.publisher.connection_flag(),
            counters: self.publisher.counters(),
            lines: Arc::clone(&self.lines),
        }
    }

    fn beacon(&self) -> Beacon<T> {
        Beacon {
            publisher: Arc::clone(&self.publisher),
            state: self.state(),
            stopping: Arc::clone(&self.stopping),
        }
    }

    /// Run until `shutdown` turns true, then stop everything in order.
    ///
    /// Only a failure to start the transport is returned; connection and
    /// publish problems are logged and retried.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), TransportError> {
        let bus_events = self.publisher.start().await?;

        let tasks = [
            spawn_heartbeat_timer(self.beacon(), self.config.heartbeat_interval),
            spawn_bus_monitor(self.beacon(), bus_events),
        ];

        self.supervise(&mut shutdown).await;
        self.shutdown(tasks).await;

        Ok(())
    }

    /// Connect, stream, and reconnect after a fixed delay until shutdown.
    async fn supervise(&mut self, shutdown: &mut watch::Receiver<bool>) {
        let beacon = self.beacon();
        let mut attempt: u64 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            attempt += 1;
            match self.client.connect(shutdown).await {
                Ok(events) => {
                    if self.stream(events, shutdown, &beacon).await == SessionEnd::Shutdown {
                        break;
                    }
                }
                Err(ClientError::Cancelled) => break,
                Err(e) => error!("Connection attempt {} failed: {}", attempt, e),
            }

            info!(
                "Reconnecting in {}s...",
                self.config.reconnect_delay.as_secs_f32()
            );
            tokio::select! {
                _ = wait_for_shutdown(shutdown) => break,
                _ = sleep(self.config.reconnect_delay) => {}
            }
        }
    }

    /// Consume one connection's events until it ends or shutdown is requested.
    async fn stream(
        &self,
        mut events: mpsc::Receiver<ClusterEvent>,
        shutdown: &mut watch::Receiver<bool>,
        beacon: &Beacon<T>,
    ) -> SessionEnd {
        loop {
            tokio::select! {
                biased;

                _ = wait_for_shutdown(shutdown) => return SessionEnd::Shutdown,

                event = events.recv() => match event {
                    Some(ClusterEvent::Connected) => {
                        info!("Streaming from DX cluster");
                        beacon.state_changed().await;
                    }
                    Some(ClusterEvent::Line(line)) => self.handle_line(&line).await,
                    Some(ClusterEvent::Error(e)) => error!("Cluster read error: {}", e),
                    Some(ClusterEvent::Disconnected(reason)) => {
                        warn!("Disconnected from DX cluster: {}", reason);
                        beacon.state_changed().await;
                        return SessionEnd::Disconnected;
                    }
                    None => {
                        warn!("Cluster event channel closed");
                        beacon.state_changed().await;
                        return SessionEnd::Disconnected;
                    }
                },
            }
        }
    }

    /// Classify one line and publish whatever it turns out to be.
    async fn handle_line(&self, line: &str) {
        self.lines.record_line();

        match classify_line(line) {
            Some(Record::Spot(spot)) => {
                let band = spot.band();
                self.lines.record_band(band);
                info!("{} [{}]", spot, band.unwrap_or("-"));
                if let Err(e) = self.publisher.publish_spot(&spot).await {
                    warn!("Failed to publish spot: {}", e);
                }
            }
            Some(Record::Weather(report)) => {
                info!(
                    "WCY from {}: K={:?} A={:?} SFI={:?}",
                    report.source, report.k_index, report.a_index, report.sfi
                );
                if let Err(e) = self.publisher.publish_weather(&report).await {
                    warn!("Failed to publish weather report: {}", e);
                }
            }
            None => {
                self.lines.record_ignored();
                trace!("Ignored line: {}", line);
            }
        }
    }

    /// Stop background tasks, leave the cluster, announce the stop, and close
    /// the transport, in that order.
    async fn shutdown(&mut self, tasks: [JoinHandle<()>; 2]) {
        info!("Shutting down...");
        self.stopping.store(true, Ordering::SeqCst);

        for task in tasks {
            task.abort();
            let _ = task.await;
        }

        self.client.disconnect().await;

        if let Err(e) = self.publisher.publish_heartbeat(&Heartbeat::stopped()).await {
            warn!("Failed to publish stopped heartbeat: {}", e);
        }
        sleep(self.config.stop_flush_delay).await;

        self.publisher.stop().await;
        info!("Shutdown complete");
    }
}

fn spawn_heartbeat_timer<T: Transport>(beacon: Beacon<T>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if beacon.stopping.load(Ordering::SeqCst) {
                break;
            }
            beacon.publish().await;
        }
    })
}

/// Heartbeat when the broker connection comes up. A lost broker connection
/// gets no heartbeat since it could not be delivered.
fn spawn_bus_monitor<T: Transport>(
    beacon: Beacon<T>,
    mut events: mpsc::Receiver<TransportEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Connected => beacon.state_changed().await,
                TransportEvent::Disconnected => debug!("Broker connection lost"),
            }
        }
    })
}
