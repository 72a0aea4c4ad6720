use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{bounded, external_failure, str_field};
use crate::services::CrmServices;
use crate::traits::{ExecutableNode, ExecutionContext, NodeOutcome};
use crate::variables::render;
use crate::NodeError;

const DEFAULT_TITLE: &str = "Automation notification";

/// `notify_team`: stores an internal notification for the organization.
pub struct NotifyTeamNode {
    crm: Arc<dyn CrmServices>,
    timeout: Duration,
}

impl NotifyTeamNode {
    pub fn new(crm: Arc<dyn CrmServices>, timeout: Duration) -> Self {
        Self { crm, timeout }
    }
}

#[async_trait]
impl ExecutableNode for NotifyTeamNode {
    async fn execute(&self, config: &Value, ctx: &ExecutionContext) -> Result<NodeOutcome, NodeError> {
        let message = str_field(config, &["message"])
            .map(|m| render(m, &ctx.data))
            .ok_or_else(|| NodeError::InvalidConfig("notify_team requires `message`".into()))?;
        let title = render(str_field(config, &["title"]).unwrap_or(DEFAULT_TITLE), &ctx.data);

        let created = bounded(
            self.timeout,
            self.crm.create_notification(ctx.organization_id, &title, &message),
        )
        .await;

        match created {
            Ok(id) => Ok(NodeOutcome::proceed(json!({ "notificationId": id }))),
            Err(e) => external_failure(config, "notify_team", e, json!({ "notificationId": null })),
        }
    }
}
