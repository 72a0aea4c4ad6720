//! `webhook`: outbound HTTP call with templated URL, headers and body.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::debug;

use super::{external_failure, str_field};
use crate::traits::{ExecutableNode, ExecutionContext, NodeOutcome};
use crate::variables::{render, render_value};
use crate::value::to_text;
use crate::NodeError;

pub struct WebhookNode {
    client: reqwest::Client,
    timeout: Duration,
}

impl WebhookNode {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

fn parse_method(raw: &str) -> Result<Method, NodeError> {
    match raw.to_ascii_uppercase().as_str() {
        "GET" => Ok(Method::GET),
        "POST" => Ok(Method::POST),
        "PUT" => Ok(Method::PUT),
        "PATCH" => Ok(Method::PATCH),
        "DELETE" => Ok(Method::DELETE),
        other => Err(NodeError::InvalidConfig(format!("unsupported webhook method '{other}'"))),
    }
}

#[async_trait]
impl ExecutableNode for WebhookNode {
    async fn execute(&self, config: &Value, ctx: &ExecutionContext) -> Result<NodeOutcome, NodeError> {
        let url = str_field(config, &["url"])
            .map(|u| render(u, &ctx.data))
            .ok_or_else(|| NodeError::InvalidConfig("webhook requires `url`".into()))?;
        let method = parse_method(str_field(config, &["method"]).unwrap_or("POST"))?;

        let mut request = self.client.request(method.clone(), &url).timeout(self.timeout);

        if let Some(headers) = config.get("headers").and_then(Value::as_object) {
            for (name, value) in headers {
                request = request.header(name.as_str(), render(&to_text(value), &ctx.data));
            }
        }

        if let Some(key) = str_field(config, &["credentialKey", "credential_key"]) {
            match ctx.secrets.get(key) {
                Some(secret) => request = request.bearer_auth(secret),
                None => {
                    return external_failure(
                        config,
                        "webhook",
                        format!("credential '{key}' is not configured"),
                        json!({ "delivered": false }),
                    );
                }
            }
        }

        if method != Method::GET {
            let body = match config.get("body") {
                Some(Value::Null) | None => ctx.data.clone(),
                Some(template) => render_value(template, &ctx.data),
            };
            request = request.json(&body);
        }

        debug!(run_id = %ctx.run_id, node_id = %ctx.node_id, %url, "sending webhook");

        match request.send().await {
            Ok(response) if response.status().is_success() => Ok(NodeOutcome::proceed(json!({
                "delivered": true,
                "statusCode": response.status().as_u16(),
            }))),
            Ok(response) => {
                let status = response.status().as_u16();
                external_failure(
                    config,
                    "webhook",
                    format!("endpoint responded with HTTP {status}"),
                    json!({ "delivered": false, "statusCode": status }),
                )
            }
            Err(e) => {
                let reason = if e.is_timeout() {
                    format!("timed out after {:?}", self.timeout)
                } else {
                    e.to_string()
                };
                external_failure(config, "webhook", reason, json!({ "delivered": false }))
            }
        }
    }
}
