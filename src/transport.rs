//! Message-bus transport.
//!
//! The worker only needs to enqueue payloads and hear about connection
//! changes; [`Transport`] is that seam. [`MqttTransport`] implements it on
//! `rumqttc`, whose event loop reconnects to the broker on its own.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ClientError, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::state::LinkFlag;

pub use rumqttc::QoS;

/// Capacity of the outgoing request queue between client and event loop.
const REQUEST_QUEUE_CAPACITY: usize = 256;

const EVENT_CHANNEL_CAPACITY: usize = 32;

/// How long `stop` waits for the event loop to send the DISCONNECT.
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Errors from the transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport not started")]
    NotStarted,

    #[error("Transport already started")]
    AlreadyStarted,

    #[error("Failed to enqueue publish: {0}")]
    Enqueue(#[from] ClientError),
}

/// Connection changes reported by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
}

/// A publish/subscribe transport the worker can publish through.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Begin connecting. Connection changes arrive on the returned channel.
    async fn start(&self) -> Result<mpsc::Receiver<TransportEvent>, TransportError>;

    /// Disconnect and release the connection.
    async fn stop(&self);

    /// Queue a message for delivery without waiting for the broker.
    async fn enqueue_publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;

    /// A handle on the connected flag for other tasks to read.
    fn connection_flag(&self) -> LinkFlag;
}

/// Broker connection settings.
#[derive(Debug, Clone)]
pub struct MqttTransportConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
    pub keep_alive: Duration,
    pub reconnect_delay: Duration,
}

impl Default for MqttTransportConfig {
    fn default() -> Self {
        Self {
            host: "mqtt.lan".to_string(),
            port: 1883,
            client_id: "dxcluster-mqtt".to_string(),
            username: None,
            password: None,
            use_tls: false,
            keep_alive: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

impl MqttTransportConfig {
    fn mqtt_options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);

        if let Some(username) = &self.username {
            options.set_credentials(username, self.password.as_deref().unwrap_or_default());
        }
        if self.use_tls {
            options.set_transport(rumqttc::Transport::tls_with_default_config());
        }

        options
    }
}

/// MQTT transport backed by `rumqttc`.
pub struct MqttTransport {
    config: MqttTransportConfig,
    connected: LinkFlag,
    client: Mutex<Option<AsyncClient>>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl MqttTransport {
    pub fn new(config: MqttTransportConfig) -> Self {
        Self {
            config,
            connected: LinkFlag::new(),
            client: Mutex::new(None),
            event_loop: Mutex::new(None),
        }
    }

    fn client(&self) -> Option<AsyncClient> {
        self.client.lock().ok().and_then(|guard| guard.clone())
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn start(&self) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        if self.client().is_some() {
            return Err(TransportError::AlreadyStarted);
        }

        info!(
            "Starting MQTT client, connecting to {}:{}",
            self.config.host, self.config.port
        );

        let (client, event_loop) =
            AsyncClient::new(self.config.mqtt_options(), REQUEST_QUEUE_CAPACITY);
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let handle = tokio::spawn(run_event_loop(
            event_loop,
            tx,
            self.connected.clone(),
            self.config.reconnect_delay,
        ));

        if let Ok(mut guard) = self.client.lock() {
            *guard = Some(client);
        }
        if let Ok(mut guard) = self.event_loop.lock() {
            *guard = Some(handle);
        }

        Ok(rx)
    }

    async fn stop(&self) {
        info!("Stopping MQTT client");

        let client = self.client.lock().ok().and_then(|mut guard| guard.take());
        let handle = self.event_loop.lock().ok().and_then(|mut guard| guard.take());

        if let Some(client) = client
            && let Err(e) = client.try_disconnect()
        {
            debug!("Failed to queue MQTT disconnect: {}", e);
        }

        if let Some(mut handle) = handle
            && timeout(STOP_TIMEOUT, &mut handle).await.is_err()
        {
            debug!("MQTT event loop did not finish in time, aborting");
            handle.abort();
        }

        self.connected.set(false);
    }

    async fn enqueue_publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), TransportError> {
        let client = self.client().ok_or(TransportError::NotStarted)?;
        client.try_publish(topic, qos, retain, payload)?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.get()
    }

    fn connection_flag(&self) -> LinkFlag {
        self.connected.clone()
    }
}

/// Drive the MQTT event loop, tracking connection state.
///
/// `rumqttc` reconnects on the next poll after an error, so the loop only has
/// to pace its retries. It ends once our own DISCONNECT has gone out.
async fn run_event_loop(
    mut event_loop: EventLoop,
    tx: mpsc::Sender<TransportEvent>,
    connected: LinkFlag,
    reconnect_delay: Duration,
) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    info!("Connected to MQTT broker");
                    connected.set(true);
                    let _ = tx.try_send(TransportEvent::Connected);
                } else {
                    error!("MQTT broker refused connection: {:?}", ack.code);
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("MQTT disconnect sent");
                connected.set(false);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                if connected.swap(false) {
                    warn!("Disconnected from MQTT broker: {}", e);
                    let _ = tx.try_send(TransportEvent::Disconnected);
                } else {
                    error!("Failed to connect to MQTT broker: {}", e);
                }
                tokio::time::sleep(reconnect_delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MqttTransportConfig::default();
        assert_eq!(config.host, "mqtt.lan");
        assert_eq!(config.port, 1883);
        assert!(!config.use_tls);
    }

    #[test]
    fn test_mqtt_options() {
        let config = MqttTransportConfig {
            username: Some("user".to_string()),
            password: Some("secret".to_string()),
            ..Default::default()
        };
        let options = config.mqtt_options();

        assert_eq!(options.client_id(), "dxcluster-mqtt");
        assert_eq!(options.broker_address(), ("mqtt.lan".to_string(), 1883));
        assert!(options.clean_session());
        assert_eq!(options.keep_alive(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_publish_before_start_fails() {
        let transport = MqttTransport::new(MqttTransportConfig::default());
        let result = transport
            .enqueue_publish("topic", b"{}".to_vec(), QoS::AtLeastOnce, false)
            .await;

        assert!(matches!(result, Err(TransportError::NotStarted)));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_stop_without_start_is_harmless() {
        let transport = MqttTransport::new(MqttTransportConfig::default());
        transport.stop().await;
        assert!(!transport.is_connected());
    }
}
