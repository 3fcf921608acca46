//! dxcluster-mqtt - Bridge a DX cluster telnet feed to an MQTT broker.
//!
//! This crate provides:
//! - nom-based parsers for `DX de` spot lines and `WCY de` space-weather lines
//! - An async telnet client that logs in and frames the feed into lines
//! - A supervisor that reconnects, publishes records and emits heartbeats
//! - An MQTT transport built on `rumqttc`
//!
//! # Example
//!
//! ```rust
//! use dxcluster_mqtt::worker::{Record, classify_line};
//!
//! let line = "DX de K4VTE:     21142.3  VE6KIX                                      1829Z";
//! match classify_line(line) {
//!     Some(Record::Spot(spot)) => assert_eq!(spot.band(), Some("15m")),
//!     other => panic!("unexpected: {other:?}"),
//! }
//!
//! assert!(classify_line("login: ").is_none());
//! ```

pub mod client;
pub mod config;
pub mod heartbeat;
pub mod metrics;
pub mod parser;
pub mod publisher;
pub mod spot;
pub mod state;
pub mod transport;
pub mod wcy;
pub mod weather;
pub mod worker;

pub use client::{ClusterClient, ClusterClientConfig, ClusterEvent};
pub use config::Config;
pub use heartbeat::{Heartbeat, HeartbeatStatus};
pub use parser::{ParseError, looks_like_spot, parse_spot};
pub use publisher::{PublishError, Publisher, Topics};
pub use spot::Spot;
pub use state::{ConnectionState, StateSnapshot};
pub use transport::{MqttTransport, MqttTransportConfig, Transport, TransportEvent};
pub use wcy::{looks_like_weather, parse_weather};
pub use weather::WeatherReport;
pub use worker::{Record, Worker, WorkerConfig, classify_line};
