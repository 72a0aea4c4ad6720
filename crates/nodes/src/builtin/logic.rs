//! Logic nodes: `trigger`, `condition`, `ab_split` and `delay`.

use std::sync::Arc;

use async_trait::async_trait;
use queue::{calculate_delay_seconds, DelayUnit};
use serde_json::{json, Value};

use super::{field, str_field};
use crate::services::RandomSource;
use crate::traits::{ExecutableNode, ExecutionContext, NodeOutcome};
use crate::value::{is_empty, lookup_path, to_number, to_text};
use crate::NodeError;

/// Entry point of every automation; passes straight through.
#[derive(Debug, Default)]
pub struct TriggerNode;

#[async_trait]
impl ExecutableNode for TriggerNode {
    async fn execute(&self, _config: &Value, _ctx: &ExecutionContext) -> Result<NodeOutcome, NodeError> {
        Ok(NodeOutcome::proceed(Value::Null))
    }
}

// ---------------------------------------------------------------------------
// condition
// ---------------------------------------------------------------------------

/// Compares a context value with `config.value` and branches on
/// `"true"` / `"false"`.
#[derive(Debug, Default)]
pub struct ConditionNode;

#[async_trait]
impl ExecutableNode for ConditionNode {
    async fn execute(&self, config: &Value, ctx: &ExecutionContext) -> Result<NodeOutcome, NodeError> {
        let path = str_field(config, &["field"])
            .ok_or_else(|| NodeError::InvalidConfig("condition requires `field`".into()))?;
        let path = path.trim_start_matches("{{").trim_end_matches("}}").trim();
        let operator = str_field(config, &["operator"]).unwrap_or("equals");
        let expected = config.get("value").unwrap_or(&Value::Null);

        let result = evaluate(operator, lookup_path(&ctx.data, path), expected);
        let label = if result { "true" } else { "false" };
        Ok(NodeOutcome::branch(label, json!({ "conditionResult": result })))
    }
}

/// Evaluate `operator` against the resolved value.  Unrecognized operators
/// and non-numeric operands of numeric operators are `false`.
pub fn evaluate(operator: &str, actual: Option<&Value>, expected: &Value) -> bool {
    let actual_text = || actual.map(to_text).unwrap_or_default();
    let numbers = || Some((to_number(actual?)?, to_number(expected)?));

    match operator {
        "equals" => actual_text() == to_text(expected),
        "not_equals" => actual_text() != to_text(expected),
        "contains" => actual_text().contains(&to_text(expected)),
        "greater_than" => numbers().is_some_and(|(a, b)| a > b),
        "less_than" => numbers().is_some_and(|(a, b)| a < b),
        "is_empty" => is_empty(actual),
        "is_not_empty" => !is_empty(actual),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// ab_split
// ---------------------------------------------------------------------------

/// Random A/B branch.  The draw is repeated on every visit.
pub struct AbSplitNode {
    random: Arc<dyn RandomSource>,
}

impl AbSplitNode {
    pub fn new(random: Arc<dyn RandomSource>) -> Self {
        Self { random }
    }
}

#[async_trait]
impl ExecutableNode for AbSplitNode {
    async fn execute(&self, config: &Value, _ctx: &ExecutionContext) -> Result<NodeOutcome, NodeError> {
        let split = field(config, &["splitPercentage", "split_percentage"])
            .and_then(to_number)
            .unwrap_or(50.0)
            .clamp(0.0, 100.0);

        let variant = if self.random.percent() < split { "A" } else { "B" };
        Ok(NodeOutcome::branch(variant, json!({ "variant": variant })))
    }
}

// ---------------------------------------------------------------------------
// delay
// ---------------------------------------------------------------------------

/// Suspends the run for `value` `unit`s.  Non-positive amounts continue
/// immediately.
#[derive(Debug, Default)]
pub struct DelayNode;

#[async_trait]
impl ExecutableNode for DelayNode {
    async fn execute(&self, config: &Value, _ctx: &ExecutionContext) -> Result<NodeOutcome, NodeError> {
        let amount = field(config, &["value", "amount"])
            .ok_or_else(|| NodeError::InvalidConfig("delay requires `value`".into()))?;
        let amount = to_number(amount)
            .ok_or_else(|| NodeError::InvalidConfig(format!("delay value {amount} is not a number")))?;

        let unit: DelayUnit = str_field(config, &["unit"])
            .unwrap_or("minutes")
            .parse()
            .map_err(|e: queue::QueueError| NodeError::InvalidConfig(e.to_string()))?;

        Ok(NodeOutcome::suspend(calculate_delay_seconds(amount, unit)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::test_support::ctx;
    use crate::mock::FixedRandom;
    use crate::traits::Next;

    #[test]
    fn operators() {
        assert!(evaluate("equals", Some(&json!("vip")), &json!("vip")));
        assert!(evaluate("equals", Some(&json!(10)), &json!("10")));
        assert!(evaluate("not_equals", None, &json!("x")));
        assert!(evaluate("contains", Some(&json!(["lead", "vip"])), &json!("vip")));
        assert!(evaluate("greater_than", Some(&json!("150")), &json!(100)));
        assert!(!evaluate("greater_than", Some(&json!("abc")), &json!(100)));
        assert!(evaluate("less_than", Some(&json!(1)), &json!(2)));
        assert!(evaluate("is_empty", Some(&json!("")), &Value::Null));
        assert!(evaluate("is_not_empty", Some(&json!("x")), &Value::Null));
        assert!(!evaluate("matches_regex", Some(&json!("x")), &json!("x")));
    }

    #[tokio::test]
    async fn condition_branches_on_context_value() {
        let node = ConditionNode;
        let config = json!({ "field": "trigger.data.tags", "operator": "contains", "value": "vip" });

        let hit = node.execute(&config, &ctx(json!({ "trigger": { "data": { "tags": ["vip"] } } }))).await.unwrap();
        assert_eq!(hit.next, Next::Branch("true".into()));
        assert_eq!(hit.output["conditionResult"], json!(true));

        let miss = node.execute(&config, &ctx(json!({}))).await.unwrap();
        assert_eq!(miss.next, Next::Branch("false".into()));
    }

    #[tokio::test]
    async fn condition_without_field_is_config_error() {
        let err = ConditionNode.execute(&json!({ "operator": "equals" }), &ctx(json!({}))).await.unwrap_err();
        assert!(matches!(err, NodeError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn split_uses_percentage_threshold() {
        let config = json!({ "splitPercentage": 30 });
        let low = AbSplitNode::new(Arc::new(FixedRandom(29.9)));
        let high = AbSplitNode::new(Arc::new(FixedRandom(30.0)));

        let a = low.execute(&config, &ctx(json!({}))).await.unwrap();
        assert_eq!(a.next, Next::Branch("A".into()));
        assert_eq!(a.output["variant"], json!("A"));

        let b = high.execute(&config, &ctx(json!({}))).await.unwrap();
        assert_eq!(b.next, Next::Branch("B".into()));
    }

    #[tokio::test]
    async fn split_defaults_to_fifty() {
        let node = AbSplitNode::new(Arc::new(FixedRandom(49.0)));
        let out = node.execute(&json!({}), &ctx(json!({}))).await.unwrap();
        assert_eq!(out.next, Next::Branch("A".into()));
    }

    #[tokio::test]
    async fn delay_suspends_for_computed_seconds() {
        let out = DelayNode.execute(&json!({ "value": 2, "unit": "hours" }), &ctx(json!({}))).await.unwrap();
        assert_eq!(out.next, Next::Suspend { delay_seconds: 7200 });
        assert!(out.output.is_empty());

        let zero = DelayNode.execute(&json!({ "amount": -5, "unit": "days" }), &ctx(json!({}))).await.unwrap();
        assert_eq!(zero.next, Next::Suspend { delay_seconds: 0 });
    }

    #[tokio::test]
    async fn delay_rejects_unknown_unit() {
        let err = DelayNode.execute(&json!({ "value": 1, "unit": "fortnights" }), &ctx(json!({}))).await.unwrap_err();
        assert!(matches!(err, NodeError::InvalidConfig(_)));
    }
}
