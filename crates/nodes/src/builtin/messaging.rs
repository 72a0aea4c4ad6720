//! `send_whatsapp`, `send_email` and `send_sms`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{bounded, external_failure, str_field};
use crate::services::{Channel, ChannelSender, OutboundMessage};
use crate::traits::{ExecutableNode, ExecutionContext, NodeOutcome};
use crate::value::{lookup_path, to_text};
use crate::variables::render;
use crate::NodeError;

/// One executor type serves all three channels; the channel decides the
/// context field used when `config.to` is absent.
pub struct SendMessageNode {
    channel: Channel,
    sender: Arc<dyn ChannelSender>,
    timeout: Duration,
}

impl SendMessageNode {
    pub fn new(channel: Channel, sender: Arc<dyn ChannelSender>, timeout: Duration) -> Self {
        Self { channel, sender, timeout }
    }

    fn recipient(&self, config: &Value, ctx: &ExecutionContext) -> Option<String> {
        if let Some(to) = str_field(config, &["to"]) {
            return Some(render(to, &ctx.data)).filter(|s| !s.trim().is_empty());
        }
        let key = match self.channel {
            Channel::Email => "email",
            Channel::Whatsapp | Channel::Sms => "phone",
        };
        lookup_path(&ctx.data, key)
            .map(to_text)
            .filter(|s| !s.trim().is_empty())
    }
}

#[async_trait]
impl ExecutableNode for SendMessageNode {
    async fn execute(&self, config: &Value, ctx: &ExecutionContext) -> Result<NodeOutcome, NodeError> {
        let body = str_field(config, &["message", "body", "text"])
            .map(|m| render(m, &ctx.data))
            .ok_or_else(|| NodeError::InvalidConfig(format!("send_{} requires `message`", self.channel)))?;
        let node_type = format!("send_{}", self.channel);

        let Some(to) = self.recipient(config, ctx) else {
            return external_failure(
                config,
                &node_type,
                format!("contact has no {} recipient", self.channel),
                json!({ "delivered": false, "messageId": null }),
            );
        };

        let message = OutboundMessage {
            organization_id: ctx.organization_id,
            channel: self.channel,
            to,
            subject: str_field(config, &["subject"]).map(|s| render(s, &ctx.data)),
            body,
        };

        match bounded(self.timeout, self.sender.send(&message)).await {
            Ok(receipt) => Ok(NodeOutcome::proceed(json!({
                "delivered": true,
                "messageId": receipt.message_id,
            }))),
            Err(e) => external_failure(config, &node_type, e, json!({ "delivered": false, "messageId": null })),
        }
    }
}
