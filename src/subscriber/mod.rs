//! MQTT Subscriber
//!
//! The broker-facing half of the bridge: connects, subscribes to the
//! configured topics, and delivers inbound publishes to a channel.

use std::fmt;

mod client;

pub use client::{InboundMessage, Subscriber};

use crate::protocol::{DecodeError, EncodeError};

/// Error type for subscriber operations
#[derive(Debug)]
pub enum SubscriberError {
    /// Connection to the broker failed or was lost
    ConnectionLost(String),
    /// The broker rejected the connection or a subscription
    Rejected(String),
    /// Operation timed out
    Timeout,
    /// Wire decode error
    Decode(DecodeError),
    /// Wire encode error
    Encode(EncodeError),
    /// The broker sent a packet the client did not expect
    UnexpectedPacket(&'static str),
}

impl fmt::Display for SubscriberError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriberError::ConnectionLost(msg) => write!(f, "connection lost: {}", msg),
            SubscriberError::Rejected(msg) => write!(f, "rejected: {}", msg),
            SubscriberError::Timeout => write!(f, "operation timed out"),
            SubscriberError::Decode(e) => write!(f, "decode error: {}", e),
            SubscriberError::Encode(e) => write!(f, "encode error: {}", e),
            SubscriberError::UnexpectedPacket(what) => {
                write!(f, "unexpected packet: {}", what)
            }
        }
    }
}

impl std::error::Error for SubscriberError {}

impl From<DecodeError> for SubscriberError {
    fn from(e: DecodeError) -> Self {
        SubscriberError::Decode(e)
    }
}

impl From<EncodeError> for SubscriberError {
    fn from(e: EncodeError) -> Self {
        SubscriberError::Encode(e)
    }
}

impl From<std::io::Error> for SubscriberError {
    fn from(e: std::io::Error) -> Self {
        SubscriberError::ConnectionLost(e.to_string())
    }
}

/// Status of the broker connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberStatus {
    /// Connected and delivering messages
    Connected,
    /// Cleanly disconnected after shutdown
    Disconnected,
    /// Connection ended with an error
    Failed,
}
