//! Liveness records published to the heartbeat topic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::StateSnapshot;

/// Lifecycle status carried by a heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeartbeatStatus {
    Running,
    Stopped,
}

/// A heartbeat, built once, published, then dropped.
///
/// Running heartbeats carry the connection flags and counters; the final
/// stopped heartbeat carries only the timestamp and status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    pub timestamp: DateTime<Utc>,
    pub status: HeartbeatStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_connected: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mqtt_connected: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spots_published: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weather_published: Option<u64>,
}

impl Heartbeat {
    pub fn running(snapshot: &StateSnapshot) -> Self {
        Self {
            timestamp: Utc::now(),
            status: HeartbeatStatus::Running,
            cluster_connected: Some(snapshot.cluster_connected),
            mqtt_connected: Some(snapshot.mqtt_connected),
            spots_published: Some(snapshot.spots_published),
            weather_published: Some(snapshot.weather_published),
        }
    }

    pub fn stopped() -> Self {
        Self {
            timestamp: Utc::now(),
            status: HeartbeatStatus::Stopped,
            cluster_connected: None,
            mqtt_connected: None,
            spots_published: None,
            weather_published: None,
        }
    }
}
