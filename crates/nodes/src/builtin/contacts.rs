//! Contact tagging: `add_tag` and `remove_tag`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use super::{bounded, external_failure, str_field};
use crate::services::CrmServices;
use crate::traits::{ExecutableNode, ExecutionContext, NodeOutcome};
use crate::variables::render;
use crate::NodeError;

fn tag_and_contact(config: &Value, ctx: &ExecutionContext) -> Result<(String, Uuid), NodeError> {
    let tag = str_field(config, &["tag", "tagName", "tag_name"])
        .map(|t| render(t, &ctx.data).trim().to_owned())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| NodeError::InvalidConfig("tag node requires `tag`".into()))?;
    let contact_id = ctx
        .contact_id()
        .ok_or_else(|| NodeError::MissingContext("contact_id".into()))?;
    Ok((tag, contact_id))
}

pub struct AddTagNode {
    crm: Arc<dyn CrmServices>,
    timeout: Duration,
}

impl AddTagNode {
    pub fn new(crm: Arc<dyn CrmServices>, timeout: Duration) -> Self {
        Self { crm, timeout }
    }
}

#[async_trait]
impl ExecutableNode for AddTagNode {
    async fn execute(&self, config: &Value, ctx: &ExecutionContext) -> Result<NodeOutcome, NodeError> {
        let (tag, contact_id) = tag_and_contact(config, ctx)?;

        match bounded(self.timeout, self.crm.add_tag(ctx.organization_id, contact_id, &tag)).await {
            Ok(added) => Ok(NodeOutcome::proceed(json!({ "tagAdded": added, "tag": tag }))),
            Err(e) => external_failure(config, "add_tag", e, json!({ "tagAdded": false, "tag": tag })),
        }
    }
}

pub struct RemoveTagNode {
    crm: Arc<dyn CrmServices>,
    timeout: Duration,
}

impl RemoveTagNode {
    pub fn new(crm: Arc<dyn CrmServices>, timeout: Duration) -> Self {
        Self { crm, timeout }
    }
}

#[async_trait]
impl ExecutableNode for RemoveTagNode {
    async fn execute(&self, config: &Value, ctx: &ExecutionContext) -> Result<NodeOutcome, NodeError> {
        let (tag, contact_id) = tag_and_contact(config, ctx)?;

        match bounded(self.timeout, self.crm.remove_tag(ctx.organization_id, contact_id, &tag)).await {
            Ok(removed) => Ok(NodeOutcome::proceed(json!({ "tagRemoved": removed, "tag": tag }))),
            Err(e) => external_failure(config, "remove_tag", e, json!({ "tagRemoved": false, "tag": tag })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::test_support::{ctx, CONTACT};
    use crate::mock::MockCrm;

    fn contact() -> Uuid {
        Uuid::parse_str(CONTACT).unwrap()
    }

    #[tokio::test]
    async fn add_tag_is_idempotent() {
        let crm = Arc::new(MockCrm::default());
        let node = AddTagNode::new(crm.clone(), Duration::from_secs(1));
        let run = ctx(json!({ "contact_id": CONTACT }));

        let first = node.execute(&json!({ "tag": "vip" }), &run).await.unwrap();
        let second = node.execute(&json!({ "tag": "vip" }), &run).await.unwrap();

        assert_eq!(first.output["tagAdded"], json!(true));
        assert_eq!(second.output["tagAdded"], json!(false));
        assert_eq!(crm.tags(Uuid::nil(), contact()), vec!["vip".to_string()]);
    }

    #[tokio::test]
    async fn tag_is_rendered_from_context() {
        let crm = Arc::new(MockCrm::default());
        let node = AddTagNode::new(crm.clone(), Duration::from_secs(1));
        let run = ctx(json!({ "contact_id": CONTACT, "plan": "Gold" }));

        node.execute(&json!({ "tagName": "plan-{{plan|lower}}" }), &run).await.unwrap();
        assert_eq!(crm.tags(Uuid::nil(), contact()), vec!["plan-gold".to_string()]);
    }

    #[tokio::test]
    async fn remove_tag_reports_whether_it_was_present() {
        let crm = Arc::new(MockCrm::default());
        crm.seed_tag(Uuid::nil(), contact(), "lead");
        let node = RemoveTagNode::new(crm.clone(), Duration::from_secs(1));
        let run = ctx(json!({ "contact_id": CONTACT }));

        let first = node.execute(&json!({ "tag": "lead" }), &run).await.unwrap();
        let second = node.execute(&json!({ "tag": "lead" }), &run).await.unwrap();
        assert_eq!(first.output["tagRemoved"], json!(true));
        assert_eq!(second.output["tagRemoved"], json!(false));
        assert!(crm.tags(Uuid::nil(), contact()).is_empty());
    }

    #[tokio::test]
    async fn missing_contact_fails_the_node() {
        let node = AddTagNode::new(Arc::new(MockCrm::default()), Duration::from_secs(1));
        let err = node.execute(&json!({ "tag": "vip" }), &ctx(json!({}))).await.unwrap_err();
        assert_eq!(err, NodeError::MissingContext("contact_id".into()));
    }

    #[tokio::test]
    async fn crm_outage_is_recoverable() {
        let crm = Arc::new(MockCrm::default());
        crm.set_unavailable(true);
        let node = AddTagNode::new(crm, Duration::from_secs(1));
        let out = node
            .execute(&json!({ "tag": "vip" }), &ctx(json!({ "contact_id": CONTACT })))
            .await
            .unwrap();
        assert_eq!(out.output["tagAdded"], json!(false));
        assert!(out.output.contains_key("error"));
    }
}
