//! Deal nodes: `create_deal` and `move_deal`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use super::{bounded, external_failure, field, str_field};
use crate::services::{CrmServices, NewDeal};
use crate::traits::{ExecutableNode, ExecutionContext, NodeOutcome};
use crate::value::{lookup_path, to_number, to_text};
use crate::variables::render;
use crate::NodeError;

/// Parse an optional UUID config field after rendering it.
fn uuid_field(config: &Value, keys: &[&str], ctx: &ExecutionContext) -> Result<Option<Uuid>, NodeError> {
    let Some(raw) = str_field(config, keys) else {
        return Ok(None);
    };
    let rendered = render(raw, &ctx.data);
    Uuid::parse_str(rendered.trim())
        .map(Some)
        .map_err(|_| NodeError::InvalidConfig(format!("`{}` is not a valid id: '{rendered}'", keys[0])))
}

pub struct CreateDealNode {
    crm: Arc<dyn CrmServices>,
    timeout: Duration,
}

impl CreateDealNode {
    pub fn new(crm: Arc<dyn CrmServices>, timeout: Duration) -> Self {
        Self { crm, timeout }
    }
}

#[async_trait]
impl ExecutableNode for CreateDealNode {
    async fn execute(&self, config: &Value, ctx: &ExecutionContext) -> Result<NodeOutcome, NodeError> {
        let title = str_field(config, &["title", "name"])
            .map(|t| render(t, &ctx.data))
            .unwrap_or_else(|| "New deal".to_owned());

        let value = match field(config, &["value", "amount"]) {
            Some(Value::String(s)) => to_number(&Value::String(render(s, &ctx.data))),
            Some(other) => to_number(other),
            None => None,
        };

        let deal = NewDeal {
            title,
            contact_id: ctx.contact_id(),
            pipeline_id: uuid_field(config, &["pipelineId", "pipeline_id"], ctx)?,
            stage_id: uuid_field(config, &["stageId", "stage_id"], ctx)?,
            value,
        };

        match bounded(self.timeout, self.crm.create_deal(ctx.organization_id, deal)).await {
            Ok(id) => Ok(NodeOutcome::proceed(json!({ "dealId": id, "dealCreated": true }))),
            Err(e) => external_failure(config, "create_deal", e, json!({ "dealId": null, "dealCreated": false })),
        }
    }
}

/// Moves the deal named by `config.dealId`, or the run's `dealId` /
/// `deal_id`, to `config.stageId`.
pub struct MoveDealNode {
    crm: Arc<dyn CrmServices>,
    timeout: Duration,
}

impl MoveDealNode {
    pub fn new(crm: Arc<dyn CrmServices>, timeout: Duration) -> Self {
        Self { crm, timeout }
    }
}

#[async_trait]
impl ExecutableNode for MoveDealNode {
    async fn execute(&self, config: &Value, ctx: &ExecutionContext) -> Result<NodeOutcome, NodeError> {
        let stage_id = uuid_field(config, &["stageId", "stage_id"], ctx)?
            .ok_or_else(|| NodeError::InvalidConfig("move_deal requires `stageId`".into()))?;

        let deal_id = match uuid_field(config, &["dealId", "deal_id"], ctx)? {
            Some(id) => id,
            None => ["dealId", "deal_id", "trigger.data.deal_id", "trigger.data.dealId"]
                .iter()
                .filter_map(|path| lookup_path(&ctx.data, path))
                .find_map(|v| Uuid::parse_str(&to_text(v)).ok())
                .ok_or_else(|| NodeError::MissingContext("dealId".into()))?,
        };

        match bounded(self.timeout, self.crm.move_deal(ctx.organization_id, deal_id, stage_id)).await {
            Ok(()) => Ok(NodeOutcome::proceed(json!({
                "dealId": deal_id,
                "stageId": stage_id,
                "dealMoved": true,
            }))),
            Err(e) => external_failure(
                config,
                "move_deal",
                e,
                json!({ "dealId": deal_id, "stageId": stage_id, "dealMoved": false }),
            ),
        }
    }
}
