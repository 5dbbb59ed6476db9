//! Queue Service Client
//!
//! Abstraction over the managed message queue the bridge forwards into,
//! with an SQS query-protocol implementation.

use std::fmt;

use async_trait::async_trait;

mod sqs;

pub use sqs::SqsClient;

/// Error type for queue send operations
#[derive(Debug)]
pub enum QueueError {
    /// Failed to reach the queue endpoint
    Connect(String),
    /// The send request timed out
    Timeout,
    /// The service answered with an error
    Service {
        /// HTTP status code
        status: u16,
        /// Error detail extracted from the response
        detail: String,
    },
    /// The service answered 200 but the response was not understood
    MalformedResponse(String),
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::Connect(msg) => write!(f, "queue unreachable: {}", msg),
            QueueError::Timeout => write!(f, "queue send timed out"),
            QueueError::Service { status, detail } => {
                write!(f, "queue service error (HTTP {}): {}", status, detail)
            }
            QueueError::MalformedResponse(msg) => {
                write!(f, "malformed queue response: {}", msg)
            }
        }
    }
}

impl std::error::Error for QueueError {}

impl From<reqwest::Error> for QueueError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            QueueError::Timeout
        } else {
            QueueError::Connect(e.to_string())
        }
    }
}

/// A destination the bridge can hand message bodies to.
///
/// The seam between the forwarding loop and the queue service; tests
/// substitute an in-memory sink.
#[async_trait]
pub trait QueueSink: Send + Sync {
    /// Send one message body, returning the service-assigned message id
    async fn send(&self, body: &str) -> Result<String, QueueError>;
}
