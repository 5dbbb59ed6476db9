//! SQS Query-Protocol Client
//!
//! Sends messages with `Action=SendMessage` form POSTs, either to the queue
//! URL itself or to a configured endpoint override (local emulators).
//! Request signing is not implemented; the emulator accepts the placeholder
//! credentials carried in the request.

use async_trait::async_trait;
use tracing::debug;

use crate::config::QueueConfig;

use super::{QueueError, QueueSink};

/// SQS API version spoken by the query protocol
const API_VERSION: &str = "2012-11-05";

/// Queue client speaking the SQS query protocol over HTTP
pub struct SqsClient {
    http: reqwest::Client,
    /// Queue URL carried in every request
    queue_url: String,
    /// URL requests are POSTed to (endpoint override or the queue URL)
    target: String,
    region: String,
    access_key: String,
}

impl SqsClient {
    /// Build a client from queue configuration
    pub fn new(config: &QueueConfig) -> Result<Self, QueueError> {
        let http = reqwest::Client::builder()
            .timeout(config.send_timeout)
            .build()
            .map_err(|e| QueueError::Connect(e.to_string()))?;

        let target = config
            .endpoint
            .clone()
            .unwrap_or_else(|| config.url.clone());

        Ok(Self {
            http,
            queue_url: config.url.clone(),
            target,
            region: config.region.clone(),
            access_key: config.access_key.clone(),
        })
    }

    /// The URL requests are sent to
    pub fn target(&self) -> &str {
        &self.target
    }
}

#[async_trait]
impl QueueSink for SqsClient {
    async fn send(&self, body: &str) -> Result<String, QueueError> {
        let params = [
            ("Action", "SendMessage"),
            ("Version", API_VERSION),
            ("QueueUrl", self.queue_url.as_str()),
            ("MessageBody", body),
            ("AWSAccessKeyId", self.access_key.as_str()),
        ];

        let response = self
            .http
            .post(&self.target)
            .header("x-amz-region", &self.region)
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let detail = extract_tag(&text, "Message")
                .or_else(|| extract_tag(&text, "Code"))
                .unwrap_or(&text)
                .to_string();
            return Err(QueueError::Service {
                status: status.as_u16(),
                detail,
            });
        }

        let message_id = extract_tag(&text, "MessageId")
            .ok_or_else(|| QueueError::MalformedResponse("missing MessageId".to_string()))?;

        debug!("Queue accepted message {}", message_id);
        Ok(message_id.to_string())
    }
}

/// Extract the text content of the first `<tag>...</tag>` element
fn extract_tag<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    Some(&xml[start..end])
}
