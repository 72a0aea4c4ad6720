//! Client for an external HTTP delay-queue provider.
//!
//! Each message is published to `{base_url}/publish` with the callback URL
//! that should receive it.  The provider holds it for the requested delay,
//! then POSTs the envelope to the callback, retrying on non-2xx answers.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{JobQueue, QueueEnvelope, QueueError};

pub const DELAY_HEADER: &str = "x-queue-delay";
pub const RETRIES_HEADER: &str = "x-queue-retries";
pub const CALLBACK_HEADER: &str = "x-queue-callback";

#[derive(Debug, Clone)]
pub struct HttpQueueConfig {
    pub base_url: String,
    pub token: String,
    /// Public URL of `POST /api/v1/queue/automation`.
    pub callback_url: String,
    /// Delivery attempts the provider makes before giving up.
    pub retries: u32,
    pub request_timeout: Duration,
}

pub struct HttpDelayQueue {
    client: reqwest::Client,
    config: HttpQueueConfig,
}

impl HttpDelayQueue {
    pub fn new(config: HttpQueueConfig) -> Result<Self, QueueError> {
        let client = reqwest::Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self { client, config })
    }

    fn publish_url(&self) -> String {
        format!("{}/publish", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl JobQueue for HttpDelayQueue {
    async fn enqueue(&self, job_type: &str, payload: &Value, delay_seconds: u64) -> Result<(), QueueError> {
        let envelope = QueueEnvelope { job_type: job_type.to_owned(), data: payload.clone() };

        let response = self
            .client
            .post(self.publish_url())
            .bearer_auth(&self.config.token)
            .header(CALLBACK_HEADER, &self.config.callback_url)
            .header(DELAY_HEADER, format!("{delay_seconds}s"))
            .header(RETRIES_HEADER, self.config.retries.to_string())
            .json(&envelope)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), job_type, "delay queue rejected message");
            return Err(QueueError::Rejected { status: status.as_u16(), body });
        }

        debug!(job_type, delay_seconds, "message published to delay queue");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn queue(base_url: String) -> HttpDelayQueue {
        HttpDelayQueue::new(HttpQueueConfig {
            base_url,
            token: "tok".into(),
            callback_url: "https://crm.example.com/api/v1/queue/automation".into(),
            retries: 3,
            request_timeout: Duration::from_secs(2),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn publishes_envelope_with_delay_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/publish"))
            .and(header("authorization", "Bearer tok"))
            .and(header(DELAY_HEADER, "300s"))
            .and(header(RETRIES_HEADER, "3"))
            .and(header(CALLBACK_HEADER, "https://crm.example.com/api/v1/queue/automation"))
            .and(body_json(json!({ "type": "automation_step", "data": { "runId": "r" } })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        queue(server.uri())
            .enqueue("automation_step", &json!({ "runId": "r" }), 300)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn provider_errors_surface() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let err = queue(server.uri()).enqueue("automation_step", &json!({}), 1).await.unwrap_err();
        assert!(matches!(err, QueueError::Rejected { status: 429, ref body } if body == "slow down"));
    }
}
