//! Configuration file support for dxcluster-mqtt.
//!
//! Loads settings from `~/.config/dxcluster-mqtt/config.toml` on Linux
//! (or platform-appropriate location on other OSes).

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::client::{ClusterClientConfig, DEFAULT_HOST, DEFAULT_PORT};
use crate::publisher::Topics;
use crate::transport::MqttTransportConfig;
use crate::worker::WorkerConfig;

/// Upstream DX cluster settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClusterSection {
    /// Cluster node hostname.
    pub host: String,

    /// Cluster node telnet port.
    pub port: u16,

    /// Callsign sent at the login prompt.
    pub callsign: String,

    /// Seconds between a disconnect and the next attempt.
    pub reconnect_delay: u64,

    /// Connection timeout in seconds.
    pub connect_timeout: u64,

    /// Seconds to wait for a login prompt.
    pub login_timeout: u64,

    /// Seconds without data before the connection counts as dead (0 = never).
    pub read_timeout: u64,
}

impl Default for ClusterSection {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            callsign: "N0CALL".to_string(),
            reconnect_delay: 5,
            connect_timeout: 30,
            login_timeout: 10,
            read_timeout: 0,
        }
    }
}

/// MQTT broker and topic settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttSection {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
    pub spot_topic: String,
    pub weather_topic: String,
    pub heartbeat_topic: String,

    /// Seconds between running heartbeats.
    pub heartbeat_interval: u64,

    /// Publish weather reports with the retain flag.
    pub retain_weather: bool,

    /// Seconds between broker reconnect attempts.
    pub reconnect_delay: u64,
}

impl Default for MqttSection {
    fn default() -> Self {
        let topics = Topics::default();
        Self {
            host: "mqtt.lan".to_string(),
            port: 1883,
            client_id: "dxcluster-mqtt".to_string(),
            username: None,
            password: None,
            use_tls: false,
            spot_topic: topics.spot,
            weather_topic: topics.weather,
            heartbeat_topic: topics.heartbeat,
            heartbeat_interval: 60,
            retain_weather: topics.retain_weather,
            reconnect_delay: 5,
        }
    }
}

/// Prometheus endpoint settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsSection {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9090,
        }
    }
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cluster: ClusterSection,
    pub mqtt: MqttSection,
    pub metrics: MetricsSection,
}

impl Config {
    /// Load configuration from the default config file location.
    ///
    /// Returns default config if the file doesn't exist.
    /// Returns an error if the file exists but is malformed.
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Config::default()),
        }
    }

    /// Load configuration from an explicit path, which must exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Invalid TOML in config file: {}", path.display()))
    }

    /// Returns the path to the config file.
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("dxcluster-mqtt/config.toml"))
    }

    /// Validate all configuration settings.
    pub fn validate(&self) -> Result<()> {
        let callsign = self.cluster.callsign.trim();
        if callsign.is_empty() {
            bail!("cluster.callsign must not be empty");
        }
        if !callsign
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '/' || c == '-')
        {
            bail!("cluster.callsign contains invalid characters: {:?}", callsign);
        }

        if self.cluster.host.trim().is_empty() {
            bail!("cluster.host must not be empty");
        }
        if self.cluster.port == 0 {
            bail!("cluster.port must not be 0");
        }
        if self.mqtt.host.trim().is_empty() {
            bail!("mqtt.host must not be empty");
        }
        if self.mqtt.port == 0 {
            bail!("mqtt.port must not be 0");
        }
        if self.metrics.enabled && self.metrics.port == 0 {
            bail!("metrics.port must not be 0");
        }

        for (name, topic) in [
            ("mqtt.spot_topic", &self.mqtt.spot_topic),
            ("mqtt.weather_topic", &self.mqtt.weather_topic),
            ("mqtt.heartbeat_topic", &self.mqtt.heartbeat_topic),
        ] {
            validate_topic(topic).with_context(|| format!("Invalid {}", name))?;
        }

        if self.mqtt.heartbeat_interval == 0 {
            bail!("mqtt.heartbeat_interval must be greater than 0");
        }
        if self.mqtt.password.is_some() && self.mqtt.username.is_none() {
            bail!("mqtt.password is set without mqtt.username");
        }

        Ok(())
    }

    /// Settings for the cluster client.
    pub fn cluster_client(&self) -> ClusterClientConfig {
        ClusterClientConfig {
            host: self.cluster.host.clone(),
            port: self.cluster.port,
            callsign: self.cluster.callsign.trim().to_ascii_uppercase(),
            connect_timeout: Duration::from_secs(self.cluster.connect_timeout),
            login_timeout: Duration::from_secs(self.cluster.login_timeout),
            read_timeout: (self.cluster.read_timeout > 0)
                .then(|| Duration::from_secs(self.cluster.read_timeout)),
        }
    }

    /// Settings for the MQTT transport.
    pub fn mqtt_transport(&self) -> MqttTransportConfig {
        MqttTransportConfig {
            host: self.mqtt.host.clone(),
            port: self.mqtt.port,
            client_id: self.mqtt.client_id.clone(),
            username: self.mqtt.username.clone(),
            password: self.mqtt.password.clone(),
            use_tls: self.mqtt.use_tls,
            reconnect_delay: Duration::from_secs(self.mqtt.reconnect_delay),
            ..Default::default()
        }
    }

    pub fn topics(&self) -> Topics {
        Topics {
            spot: self.mqtt.spot_topic.clone(),
            weather: self.mqtt.weather_topic.clone(),
            heartbeat: self.mqtt.heartbeat_topic.clone(),
            retain_weather: self.mqtt.retain_weather,
        }
    }

    pub fn worker(&self) -> WorkerConfig {
        WorkerConfig {
            reconnect_delay: Duration::from_secs(self.cluster.reconnect_delay),
            heartbeat_interval: Duration::from_secs(self.mqtt.heartbeat_interval),
            ..Default::default()
        }
    }
}

/// A publish topic: non-empty, no wildcards, no NUL.
fn validate_topic(topic: &str) -> Result<()> {
    if topic.is_empty() {
        bail!("topic must not be empty");
    }
    if topic.contains(['+', '#', '\0']) {
        bail!("topic {:?} must not contain wildcards", topic);
    }
    Ok(())
}
