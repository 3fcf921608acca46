//! Encodes records and publishes them through a [`Transport`].
//!
//! Payloads are compact JSON, one record per message. Spots and weather are
//! sent at-least-once; heartbeats are also retained so a new subscriber sees
//! the current status straight away.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use crate::heartbeat::Heartbeat;
use crate::spot::Spot;
use crate::state::{LinkFlag, PublishCounters};
use crate::transport::{QoS, Transport, TransportError, TransportEvent};
use crate::weather::WeatherReport;

/// Errors from publishing a record.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Topics and retain policy for published records.
#[derive(Debug, Clone)]
pub struct Topics {
    pub spot: String,
    pub weather: String,
    pub heartbeat: String,

    /// Retain weather reports as well as heartbeats.
    pub retain_weather: bool,
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            spot: "dxcluster/spots".to_string(),
            weather: "dxcluster/weather".to_string(),
            heartbeat: "dxcluster/heartbeat".to_string(),
            retain_weather: false,
        }
    }
}

/// The publish path: the only writer of the publish counters.
pub struct Publisher<T: Transport> {
    transport: T,
    topics: Topics,
    counters: Arc<PublishCounters>,
}

impl<T: Transport> Publisher<T> {
    pub fn new(transport: T, topics: Topics) -> Self {
        Self {
            transport,
            topics,
            counters: Arc::new(PublishCounters::new()),
        }
    }

    pub fn counters(&self) -> Arc<PublishCounters> {
        Arc::clone(&self.counters)
    }

    pub fn connection_flag(&self) -> LinkFlag {
        self.transport.connection_flag()
    }

    pub async fn start(&self) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        self.transport.start().await
    }

    pub async fn stop(&self) {
        self.transport.stop().await;
    }

    async fn publish<R: Serialize>(
        &self,
        topic: &str,
        record: &R,
        retain: bool,
    ) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(record)?;
        self.transport
            .enqueue_publish(topic, payload, QoS::AtLeastOnce, retain)
            .await?;
        Ok(())
    }

    pub async fn publish_spot(&self, spot: &Spot) -> Result<(), PublishError> {
        self.publish(&self.topics.spot, spot, false).await?;
        self.counters.record_spot();
        debug!(
            "Enqueued spot to {}: {} -> {}",
            self.topics.spot, spot.spotter, spot.dx_callsign
        );
        Ok(())
    }

    pub async fn publish_weather(&self, report: &WeatherReport) -> Result<(), PublishError> {
        self.publish(&self.topics.weather, report, self.topics.retain_weather)
            .await?;
        self.counters.record_weather();
        debug!(
            "Enqueued weather to {}: SFI={:?} K={:?}",
            self.topics.weather, report.sfi, report.k_index
        );
        Ok(())
    }

    pub async fn publish_heartbeat(&self, heartbeat: &Heartbeat) -> Result<(), PublishError> {
        self.publish(&self.topics.heartbeat, heartbeat, true).await?;
        debug!("Enqueued heartbeat to {}", self.topics.heartbeat);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::heartbeat::HeartbeatStatus;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// One message handed to the mock transport.
    #[derive(Debug, Clone)]
    pub(crate) struct Published {
        pub topic: String,
        pub payload: serde_json::Value,
        pub qos: QoS,
        pub retain: bool,
        /// Whether `stop` had already been called.
        pub after_stop: bool,
    }

    /// In-memory transport that records every publish.
    #[derive(Clone, Default)]
    pub(crate) struct MockTransport {
        pub published: Arc<Mutex<Vec<Published>>>,
        pub stopped: Arc<AtomicBool>,
        pub fail_publishes: Arc<AtomicBool>,
        pub connected: LinkFlag,
        pub events: Arc<Mutex<Option<mpsc::Sender<TransportEvent>>>>,
    }

    impl MockTransport {
        pub fn published(&self) -> Vec<Published> {
            self.published.lock().unwrap().clone()
        }

        pub fn on_topic(&self, topic: &str) -> Vec<Published> {
            self.published()
                .into_iter()
                .filter(|p| p.topic == topic)
                .collect()
        }

        /// Simulate the broker connection coming up.
        pub async fn connect(&self) {
            self.connected.set(true);
            let tx = self.events.lock().unwrap().clone();
            if let Some(tx) = tx {
                tx.send(TransportEvent::Connected).await.unwrap();
            }
        }

        /// Simulate losing the broker connection.
        pub async fn disconnect(&self) {
            self.connected.set(false);
            let tx = self.events.lock().unwrap().clone();
            if let Some(tx) = tx {
                tx.send(TransportEvent::Disconnected).await.unwrap();
            }
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn start(&self) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
            let (tx, rx) = mpsc::channel(8);
            *self.events.lock().unwrap() = Some(tx);
            Ok(rx)
        }

        async fn stop(&self) {
            self.stopped.store(true, Ordering::SeqCst);
            self.connected.set(false);
        }

        async fn enqueue_publish(
            &self,
            topic: &str,
            payload: Vec<u8>,
            qos: QoS,
            retain: bool,
        ) -> Result<(), TransportError> {
            if self.fail_publishes.load(Ordering::SeqCst) {
                return Err(TransportError::NotStarted);
            }
            self.published.lock().unwrap().push(Published {
                topic: topic.to_string(),
                payload: serde_json::from_slice(&payload).unwrap(),
                qos,
                retain,
                after_stop: self.stopped.load(Ordering::SeqCst),
            });
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.get()
        }

        fn connection_flag(&self) -> LinkFlag {
            self.connected.clone()
        }
    }

    fn make_publisher() -> (Publisher<MockTransport>, MockTransport) {
        let transport = MockTransport::default();
        (Publisher::new(transport.clone(), Topics::default()), transport)
    }

    #[tokio::test]
    async fn test_spot_publish_policy() {
        let (publisher, transport) = make_publisher();
        let spot = crate::parser::parse_spot(
            "DX de OH0M:      21044.0  K5OHY        WWFF KFF-2989                  1830Z",
        )
        .unwrap();

        publisher.publish_spot(&spot).await.unwrap();

        let published = transport.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "dxcluster/spots");
        assert_eq!(published[0].qos, QoS::AtLeastOnce);
        assert!(!published[0].retain);
        assert_eq!(published[0].payload["dxCallsign"], "K5OHY");
        assert_eq!(published[0].payload["frequencyKhz"], serde_json::json!(21044.0));
        assert_eq!(publisher.counters().spots(), 1);
    }

    #[tokio::test]
    async fn test_weather_publish_policy() {
        let (publisher, transport) = make_publisher();
        let report = crate::wcy::parse_weather("WCY de DK0WCY-2 <12> : K=3 SFI=150").unwrap();

        publisher.publish_weather(&report).await.unwrap();

        let published = transport.on_topic("dxcluster/weather");
        assert_eq!(published.len(), 1);
        assert!(!published[0].retain);
        assert_eq!(published[0].payload["kIndex"], 3);
        assert!(published[0].payload.get("aIndex").is_none());
        assert_eq!(publisher.counters().weather(), 1);
        assert_eq!(publisher.counters().spots(), 0);
    }

    #[tokio::test]
    async fn test_weather_can_be_retained() {
        let transport = MockTransport::default();
        let topics = Topics {
            retain_weather: true,
            ..Topics::default()
        };
        let publisher = Publisher::new(transport.clone(), topics);
        let report = crate::wcy::parse_weather("WCY de DK0WCY-2 <12> : K=3").unwrap();

        publisher.publish_weather(&report).await.unwrap();
        assert!(transport.published()[0].retain);
    }

    #[tokio::test]
    async fn test_heartbeat_is_retained() {
        let (publisher, transport) = make_publisher();

        publisher.publish_heartbeat(&Heartbeat::stopped()).await.unwrap();

        let published = transport.on_topic("dxcluster/heartbeat");
        assert_eq!(published.len(), 1);
        assert!(published[0].retain);
        let decoded: Heartbeat = serde_json::from_value(published[0].payload.clone()).unwrap();
        assert_eq!(decoded.status, HeartbeatStatus::Stopped);
        assert!(decoded.timestamp <= Utc::now());
    }

    #[tokio::test]
    async fn test_failed_publish_does_not_count() {
        let (publisher, transport) = make_publisher();
        transport.fail_publishes.store(true, Ordering::SeqCst);
        let spot = crate::parser::parse_spot("DX de K4VTE: 21142.3 VE6KIX 1829Z").unwrap();

        assert!(publisher.publish_spot(&spot).await.is_err());
        assert_eq!(publisher.counters().spots(), 0);
    }
}
