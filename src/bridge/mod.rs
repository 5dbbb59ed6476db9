//! Bridge Component
//!
//! Owns the broker subscriber and the queue sink, and forwards each
//! delivered message as a `{type, data}` envelope. Lifecycle is explicit:
//! construct, connect, run, shutdown. Per-message failures are logged and
//! contained to that message; only startup errors and a lost broker
//! connection end the bridge.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::envelope::Envelope;
use crate::queue::{QueueError, QueueSink, SqsClient};
use crate::subscriber::{InboundMessage, Subscriber, SubscriberError};


/// Error type for bridge startup and fatal conditions
#[derive(Debug)]
pub enum BridgeError {
    /// Broker connection or subscription failed
    Subscriber(SubscriberError),
    /// Queue client could not be constructed
    Queue(QueueError),
    /// The broker connection ended while the bridge was running
    DeliveryEnded,
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::Subscriber(e) => write!(f, "broker error: {}", e),
            BridgeError::Queue(e) => write!(f, "queue error: {}", e),
            BridgeError::DeliveryEnded => write!(f, "broker connection ended"),
        }
    }
}

impl std::error::Error for BridgeError {}

impl From<SubscriberError> for BridgeError {
    fn from(e: SubscriberError) -> Self {
        BridgeError::Subscriber(e)
    }
}

impl From<QueueError> for BridgeError {
    fn from(e: QueueError) -> Self {
        BridgeError::Queue(e)
    }
}

/// What happened to one inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// Sent to the queue; carries the service-assigned message id
    Forwarded(String),
    /// Payload was not valid JSON; dropped
    DroppedMalformed,
    /// Payload exceeded the configured size limit; dropped
    DroppedOversized,
    /// Queue send failed; message dropped without retry
    SendFailed,
}

/// The bridge: one subscriber, one queue sink, one forwarding loop
pub struct Bridge {
    config: Config,
    sink: Arc<dyn QueueSink>,
    subscriber: Option<Subscriber>,
    inbound_rx: Option<mpsc::Receiver<InboundMessage>>,
}

impl Bridge {
    /// Build a bridge with an SQS queue client
    pub fn new(config: Config) -> Result<Self, BridgeError> {
        let sink = Arc::new(SqsClient::new(&config.queue)?);
        Ok(Self::with_sink(config, sink))
    }

    /// Build a bridge with an explicit queue sink
    pub fn with_sink(config: Config, sink: Arc<dyn QueueSink>) -> Self {
        Self {
            config,
            sink,
            subscriber: None,
            inbound_rx: None,
        }
    }

    /// Connect to the broker and subscribe to the configured topics.
    /// A failure here is fatal to startup and propagates to the caller.
    pub async fn connect(&mut self) -> Result<(), BridgeError> {
        let capacity = self.config.limits.channel_capacity.max(1);
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);

        // Packets past the payload limit (plus topic and framing headroom)
        // are detected at the decoder and drained from the stream without
        // being buffered whole.
        let max_packet_size = match self.config.limits.max_payload_size {
            0 => crate::codec::MAX_REMAINING_LENGTH,
            n => n + 1024,
        };

        let subscriber =
            Subscriber::connect(self.config.broker.clone(), max_packet_size, inbound_tx).await?;

        self.subscriber = Some(subscriber);
        self.inbound_rx = Some(inbound_rx);
        Ok(())
    }

    /// Forward messages until `shutdown` resolves or the broker connection
    /// ends. On shutdown the subscriber disconnects cleanly; there is no
    /// draining guarantee for messages still in flight.
    pub async fn run<F>(mut self, shutdown: F) -> Result<(), BridgeError>
    where
        F: Future<Output = ()>,
    {
        let mut inbound_rx = self
            .inbound_rx
            .take()
            .ok_or(BridgeError::DeliveryEnded)?;
        let subscriber = self.subscriber.take().ok_or(BridgeError::DeliveryEnded)?;

        tokio::pin!(shutdown);

        let result = loop {
            tokio::select! {
                message = inbound_rx.recv() => {
                    match message {
                        Some(message) => {
                            self.process(message).await;
                        }
                        None => break Err(BridgeError::DeliveryEnded),
                    }
                }
                _ = &mut shutdown => {
                    info!("Shutdown requested, disconnecting");
                    break Ok(());
                }
            }
        };

        subscriber.stop().await;
        result
    }

    /// Handle one inbound message: parse, wrap, send once, log the result
    async fn process(&self, message: InboundMessage) -> ForwardOutcome {
        let limit = self.config.limits.max_payload_size;
        if limit > 0 && message.payload.len() > limit {
            warn!(
                "Dropping oversized payload on {} ({} bytes, limit {})",
                message.topic,
                message.payload.len(),
                limit
            );
            return ForwardOutcome::DroppedOversized;
        }

        // UTF-8 validation and JSON parse in one step
        let data: Value = match serde_json::from_slice(&message.payload) {
            Ok(value) => value,
            Err(e) => {
                warn!("Dropping malformed payload on {}: {}", message.topic, e);
                return ForwardOutcome::DroppedMalformed;
            }
        };

        let envelope = Envelope::new(&message.topic, data);
        let body = envelope.to_body();

        // Exactly one send attempt per parsed message; a failure drops the
        // message and the loop moves on
        match self.sink.send(&body).await {
            Ok(message_id) => {
                info!(
                    "Forwarded {} message to queue (id {})",
                    envelope.kind, message_id
                );
                ForwardOutcome::Forwarded(message_id)
            }
            Err(e) => {
                error!("Queue send failed for {} message: {}", envelope.kind, e);
                ForwardOutcome::SendFailed
            }
        }
    }
}
