//! FleetBridge - MQTT to SQS telemetry bridge
//!
//! Subscribes to a fixed set of sensor topics on an MQTT broker, wraps each
//! JSON payload in a `{type, data}` envelope, and forwards it to an
//! SQS-compatible queue. Messages that fail to parse or send are logged and
//! dropped; the bridge never retries and never stops for a bad message.

pub mod bridge;
pub mod codec;
pub mod config;
pub mod envelope;
pub mod protocol;
pub mod queue;
pub mod subscriber;

pub use bridge::{Bridge, BridgeError, ForwardOutcome};
pub use config::Config;
pub use envelope::Envelope;
pub use protocol::QoS;
pub use queue::{QueueError, QueueSink, SqsClient};
pub use subscriber::{InboundMessage, Subscriber, SubscriberError, SubscriberStatus};
