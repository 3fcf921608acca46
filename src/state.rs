//! Connection flags and counters shared between tasks.
//!
//! Every value here has exactly one writer: the cluster client owns its link
//! flag, the MQTT transport owns the bus flag, the publisher owns the publish
//! counters and the worker owns the line statistics. Everyone else reads
//! snapshots.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// A connected/disconnected flag that can be cloned into other tasks.
#[derive(Debug, Clone, Default)]
pub struct LinkFlag(Arc<AtomicBool>);

impl LinkFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, connected: bool) {
        self.0.store(connected, Ordering::SeqCst);
    }

    /// Set the flag, returning the previous value.
    pub fn swap(&self, connected: bool) -> bool {
        self.0.swap(connected, Ordering::SeqCst)
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Records published per record type.
#[derive(Debug, Default)]
pub struct PublishCounters {
    spots: AtomicU64,
    weather: AtomicU64,
}

impl PublishCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_spot(&self) {
        self.spots.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_weather(&self) {
        self.weather.fetch_add(1, Ordering::Relaxed);
    }

    pub fn spots(&self) -> u64 {
        self.spots.load(Ordering::Relaxed)
    }

    pub fn weather(&self) -> u64 {
        self.weather.load(Ordering::Relaxed)
    }
}

/// What the worker has seen on the cluster feed.
#[derive(Debug)]
pub struct LineStats {
    /// Lines dispatched by the cluster client.
    lines_received: AtomicU64,

    /// Lines that matched neither grammar.
    lines_ignored: AtomicU64,

    /// Spots per amateur band.
    spots_by_band: RwLock<HashMap<&'static str, u64>>,

    /// When the worker started.
    start_time: Instant,
}

impl LineStats {
    pub fn new() -> Self {
        Self {
            lines_received: AtomicU64::new(0),
            lines_ignored: AtomicU64::new(0),
            spots_by_band: RwLock::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    pub fn record_line(&self) {
        self.lines_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ignored(&self) {
        self.lines_ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_band(&self, band: Option<&'static str>) {
        if let Some(band) = band
            && let Ok(mut map) = self.spots_by_band.write()
        {
            *map.entry(band).or_insert(0) += 1;
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

impl Default for LineStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view over every shared flag and counter.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    pub cluster: LinkFlag,
    pub bus: LinkFlag,
    pub counters: Arc<PublishCounters>,
    pub lines: Arc<LineStats>,
}

impl ConnectionState {
    /// Copy out the current values.
    pub fn snapshot(&self) -> StateSnapshot {
        let spots_by_band = self
            .lines
            .spots_by_band
            .read()
            .map(|m| m.iter().map(|(k, v)| (k.to_string(), *v)).collect())
            .unwrap_or_default();

        StateSnapshot {
            cluster_connected: self.cluster.get(),
            mqtt_connected: self.bus.get(),
            spots_published: self.counters.spots(),
            weather_published: self.counters.weather(),
            lines_received: self.lines.lines_received.load(Ordering::Relaxed),
            lines_ignored: self.lines.lines_ignored.load(Ordering::Relaxed),
            spots_by_band,
            elapsed_secs: self.lines.elapsed().as_secs_f64(),
        }
    }
}

/// Point-in-time copy of [`ConnectionState`].
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub cluster_connected: bool,
    pub mqtt_connected: bool,
    pub spots_published: u64,
    pub weather_published: u64,
    pub lines_received: u64,
    pub lines_ignored: u64,
    pub spots_by_band: HashMap<String, u64>,
    pub elapsed_secs: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_state() -> ConnectionState {
        ConnectionState {
            cluster: LinkFlag::new(),
            bus: LinkFlag::new(),
            counters: Arc::new(PublishCounters::new()),
            lines: Arc::new(LineStats::new()),
        }
    }

    #[test]
    fn test_link_flag_is_shared_between_clones() {
        let flag = LinkFlag::new();
        let clone = flag.clone();

        assert!(!clone.get());
        flag.set(true);
        assert!(clone.get());
        assert!(clone.swap(false));
        assert!(!flag.get());
    }

    #[test]
    fn test_snapshot_reflects_counters() {
        let state = make_state();

        state.cluster.set(true);
        state.counters.record_spot();
        state.counters.record_spot();
        state.counters.record_weather();
        state.lines.record_line();
        state.lines.record_line();
        state.lines.record_ignored();
        state.lines.record_band(Some("20m"));
        state.lines.record_band(Some("20m"));
        state.lines.record_band(None);

        let snapshot = state.snapshot();

        assert!(snapshot.cluster_connected);
        assert!(!snapshot.mqtt_connected);
        assert_eq!(snapshot.spots_published, 2);
        assert_eq!(snapshot.weather_published, 1);
        assert_eq!(snapshot.lines_received, 2);
        assert_eq!(snapshot.lines_ignored, 1);
        assert_eq!(snapshot.spots_by_band.get("20m"), Some(&2));
        assert_eq!(snapshot.spots_by_band.len(), 1);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let state = make_state();
        let before = state.snapshot();
        state.counters.record_spot();
        assert_eq!(before.spots_published, 0);
        assert_eq!(state.snapshot().spots_published, 1);
    }
}
