//! Trigger filters and run-context seeding.
//!
//! `trigger_config` is a flat object of optional filters.  Keys are
//! camelCase with snake_case aliases; blank values disable a filter.  A
//! filter only applies to the trigger types it makes sense for, so a stray
//! `tagName` on a `contact_created` automation is ignored.

use serde_json::{json, Map, Value};
use thiserror::Error;
use uuid::Uuid;

use nodes::value::{lookup_path, to_number, to_text};

use crate::models::{AutomationEvent, TriggerType};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TriggerConfigError {
    #[error("trigger_config must be an object")]
    NotAnObject,

    #[error("trigger filter `{key}` must be {expected}")]
    InvalidFilter { key: &'static str, expected: &'static str },
}

struct Filters<'a>(Option<&'a Map<String, Value>>);

impl<'a> Filters<'a> {
    fn raw(&self, keys: &[&'static str]) -> Option<(&'static str, &'a Value)> {
        let map = self.0?;
        keys.iter()
            .find_map(|k| map.get(*k).filter(|v| !v.is_null()).map(|v| (*k, v)))
    }

    fn flag(&self, keys: &[&'static str]) -> Result<bool, TriggerConfigError> {
        match self.raw(keys) {
            None => Ok(false),
            Some((_, Value::Bool(b))) => Ok(*b),
            Some((key, _)) => Err(TriggerConfigError::InvalidFilter { key, expected: "a boolean" }),
        }
    }

    fn text(&self, keys: &[&'static str]) -> Result<Option<String>, TriggerConfigError> {
        match self.raw(keys) {
            None => Ok(None),
            Some((_, Value::String(s))) if s.trim().is_empty() => Ok(None),
            Some((_, v @ (Value::String(_) | Value::Number(_)))) => Ok(Some(to_text(v).trim().to_owned())),
            Some((key, _)) => Err(TriggerConfigError::InvalidFilter { key, expected: "a string" }),
        }
    }

    fn number(&self, keys: &[&'static str]) -> Result<Option<f64>, TriggerConfigError> {
        match self.raw(keys) {
            None => Ok(None),
            Some((_, Value::String(s))) if s.trim().is_empty() => Ok(None),
            Some((key, v)) => to_number(v)
                .map(Some)
                .ok_or(TriggerConfigError::InvalidFilter { key, expected: "a number" }),
        }
    }
}

/// First non-blank string among `paths` in the event data.
fn data_text(event: &AutomationEvent, paths: &[&str]) -> Option<String> {
    paths
        .iter()
        .filter_map(|p| lookup_path(&event.data, p))
        .map(to_text)
        .find(|s| !s.trim().is_empty())
}

/// Does `event` pass the automation's trigger filters?
///
/// # Errors
/// [`TriggerConfigError`] when the config is not an object or a filter has
/// the wrong type; callers skip the automation and log a warning.
pub fn matches_trigger(
    trigger_type: TriggerType,
    config: &Value,
    event: &AutomationEvent,
) -> Result<bool, TriggerConfigError> {
    if trigger_type != event.event_type {
        return Ok(false);
    }
    let filters = match config {
        Value::Null => Filters(None),
        Value::Object(map) => Filters(Some(map)),
        _ => return Err(TriggerConfigError::NotAnObject),
    };

    if filters.flag(&["onlyWithEmail", "only_with_email"])? && event.email().is_none() {
        return Ok(false);
    }
    if filters.flag(&["onlyWithPhone", "only_with_phone"])? && event.phone().is_none() {
        return Ok(false);
    }

    if let Some(source) = filters.text(&["source"])? {
        if !source.eq_ignore_ascii_case(event.source.trim()) {
            return Ok(false);
        }
    }

    use TriggerType::*;
    let matched = match trigger_type {
        TagAdded | TagRemoved => match filters.text(&["tagName", "tag_name", "tag"])? {
            Some(tag) => data_text(event, &["tag", "tagName", "tag_name"]).is_some_and(|t| t.eq_ignore_ascii_case(&tag)),
            None => true,
        },
        CartAbandoned | OrderCompleted => match filters.number(&["minCartValue", "min_cart_value"])? {
            Some(min) => ["total", "value", "cartValue", "cart_value"]
                .iter()
                .find_map(|p| lookup_path(&event.data, p).and_then(to_number))
                .is_some_and(|total| total >= min),
            None => true,
        },
        DealCreated | DealStageChanged => {
            let pipeline = filters.text(&["pipelineId", "pipeline_id"])?;
            let stage = filters.text(&["stageId", "stage_id"])?;
            pipeline.map_or(true, |p| data_text(event, &["pipelineId", "pipeline_id"]).as_deref() == Some(p.as_str()))
                && stage.map_or(true, |s| data_text(event, &["stageId", "stage_id"]).as_deref() == Some(s.as_str()))
        }
        MessageReceived => match filters.text(&["keyword"])? {
            Some(keyword) => data_text(event, &["message", "text", "body"])
                .is_some_and(|m| m.to_lowercase().contains(&keyword.to_lowercase())),
            None => true,
        },
        FormSubmitted => match filters.text(&["formId", "form_id"])? {
            Some(form) => data_text(event, &["formId", "form_id"]).as_deref() == Some(form.as_str()),
            None => true,
        },
        WebhookReceived => match filters.text(&["webhookId", "webhook_id"])? {
            Some(hook) => data_text(event, &["webhookId", "webhook_id"]).as_deref() == Some(hook.as_str()),
            None => true,
        },
        DateEvent => match filters.text(&["dateField", "date_field"])? {
            Some(field) => data_text(event, &["field", "dateField", "date_field"]).as_deref() == Some(field.as_str()),
            None => true,
        },
        ContactCreated | ContactUpdated | Manual => true,
    };

    Ok(matched)
}

/// Initial run context for `event`.
///
/// Top-level keys of `data` are copied alongside the reserved keys when
/// they do not collide with them.
pub fn seed_context(event: &AutomationEvent, automation_id: Uuid, run_id: Uuid) -> Value {
    let mut context = json!({
        "organization_id": event.organization_id,
        "contact_id": event.contact_id,
        "email": event.email(),
        "phone": event.phone(),
        "trigger": {
            "type": event.event_type,
            "source": event.source,
            "data": event.data,
        },
        "automation_id": automation_id,
        "run_id": run_id,
    });

    if let (Some(ctx), Some(data)) = (context.as_object_mut(), event.data.as_object()) {
        for (key, value) in data {
            ctx.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
    context
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(trigger: TriggerType, data: Value) -> AutomationEvent {
        AutomationEvent::new(Uuid::nil(), trigger, data)
    }

    #[test]
    fn type_mismatch_never_matches() {
        let e = event(TriggerType::ContactCreated, json!({}));
        assert!(!matches_trigger(TriggerType::TagAdded, &json!({}), &e).unwrap());
    }

    #[test]
    fn empty_or_null_config_matches() {
        let e = event(TriggerType::ContactCreated, json!({}));
        assert!(matches_trigger(TriggerType::ContactCreated, &Value::Null, &e).unwrap());
        assert!(matches_trigger(TriggerType::ContactCreated, &json!({}), &e).unwrap());
    }

    #[test]
    fn contact_filters() {
        let config = json!({ "onlyWithEmail": true });
        let with = event(TriggerType::ContactCreated, json!({ "email": "a@b.co" }));
        let mut without = event(TriggerType::ContactCreated, json!({}));
        assert!(matches_trigger(TriggerType::ContactCreated, &config, &with).unwrap());
        assert!(!matches_trigger(TriggerType::ContactCreated, &config, &without).unwrap());

        without.phone = Some("+1555".into());
        assert!(matches_trigger(TriggerType::ContactCreated, &json!({ "only_with_phone": true }), &without).unwrap());
    }

    #[test]
    fn tag_filter_is_case_insensitive() {
        let e = event(TriggerType::TagAdded, json!({ "tag": "VIP" }));
        assert!(matches_trigger(TriggerType::TagAdded, &json!({ "tagName": "vip" }), &e).unwrap());
        assert!(!matches_trigger(TriggerType::TagAdded, &json!({ "tagName": "lead" }), &e).unwrap());
        assert!(matches_trigger(TriggerType::TagAdded, &json!({ "tagName": "" }), &e).unwrap());
    }

    #[test]
    fn cart_value_threshold() {
        let e = event(TriggerType::CartAbandoned, json!({ "total": "120.50" }));
        assert!(matches_trigger(TriggerType::CartAbandoned, &json!({ "minCartValue": 100 }), &e).unwrap());
        assert!(!matches_trigger(TriggerType::CartAbandoned, &json!({ "minCartValue": 200 }), &e).unwrap());
        let missing = event(TriggerType::OrderCompleted, json!({}));
        assert!(!matches_trigger(TriggerType::OrderCompleted, &json!({ "min_cart_value": 1 }), &missing).unwrap());
    }

    #[test]
    fn deal_message_form_webhook_and_date_filters() {
        let deal = event(TriggerType::DealStageChanged, json!({ "pipelineId": "p1", "stageId": "won" }));
        assert!(matches_trigger(TriggerType::DealStageChanged, &json!({ "pipelineId": "p1", "stageId": "won" }), &deal).unwrap());
        assert!(!matches_trigger(TriggerType::DealStageChanged, &json!({ "stageId": "lost" }), &deal).unwrap());

        let msg = event(TriggerType::MessageReceived, json!({ "message": "I want a PRICE quote" }));
        assert!(matches_trigger(TriggerType::MessageReceived, &json!({ "keyword": "price" }), &msg).unwrap());
        assert!(!matches_trigger(TriggerType::MessageReceived, &json!({ "keyword": "refund" }), &msg).unwrap());

        let form = event(TriggerType::FormSubmitted, json!({ "form_id": "f-9" }));
        assert!(matches_trigger(TriggerType::FormSubmitted, &json!({ "formId": "f-9" }), &form).unwrap());

        let hook = event(TriggerType::WebhookReceived, json!({ "webhookId": "h1" }));
        assert!(!matches_trigger(TriggerType::WebhookReceived, &json!({ "webhookId": "h2" }), &hook).unwrap());

        let date = event(TriggerType::DateEvent, json!({ "field": "birthday" }));
        assert!(matches_trigger(TriggerType::DateEvent, &json!({ "dateField": "birthday" }), &date).unwrap());
    }

    #[test]
    fn source_filter() {
        let mut e = event(TriggerType::ContactCreated, json!({}));
        e.source = "Import".into();
        assert!(matches_trigger(TriggerType::ContactCreated, &json!({ "source": "import" }), &e).unwrap());
        assert!(!matches_trigger(TriggerType::ContactCreated, &json!({ "source": "form" }), &e).unwrap());
    }

    #[test]
    fn malformed_config_is_an_error() {
        let e = event(TriggerType::TagAdded, json!({ "tag": "vip" }));
        assert_eq!(
            matches_trigger(TriggerType::TagAdded, &json!(["vip"]), &e),
            Err(TriggerConfigError::NotAnObject)
        );
        assert!(matches!(
            matches_trigger(TriggerType::TagAdded, &json!({ "onlyWithEmail": "yes" }), &e),
            Err(TriggerConfigError::InvalidFilter { key: "onlyWithEmail", .. })
        ));
        assert!(matches!(
            matches_trigger(TriggerType::TagAdded, &json!({ "tagName": { "x": 1 } }), &e),
            Err(TriggerConfigError::InvalidFilter { .. })
        ));
    }

    #[test]
    fn context_seed_copies_non_colliding_data_keys() {
        let contact = Uuid::new_v4();
        let e = event(TriggerType::ContactCreated, json!({ "email": "a@b.co", "first_name": "Ada", "run_id": "spoof" }))
            .with_contact(contact);
        let run_id = Uuid::new_v4();
        let ctx = seed_context(&e, Uuid::nil(), run_id);

        assert_eq!(ctx["contact_id"], json!(contact));
        assert_eq!(ctx["email"], "a@b.co");
        assert_eq!(ctx["first_name"], "Ada");
        assert_eq!(ctx["run_id"], json!(run_id));
        assert_eq!(ctx["trigger"]["type"], "contact_created");
        assert_eq!(ctx["trigger"]["data"]["run_id"], "spoof");
    }
}
