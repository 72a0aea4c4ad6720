//! In-memory [`AutomationStore`].
//!
//! Holds everything behind one `tokio::sync::Mutex`, so every conditional
//! transition is atomic just like the single-statement SQL updates.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{AutomationStore, StoreError, StoredCredential};
use crate::models::{
    Automation, AutomationEvent, AutomationRun, AutomationStatus, EventLogEntry, NewAutomation, RunStatus, RunStep,
    TriggerType,
};

#[derive(Default)]
struct State {
    automations: HashMap<Uuid, Automation>,
    runs: HashMap<Uuid, AutomationRun>,
    steps: Vec<RunStep>,
    events: Vec<EventLogEntry>,
    credentials: HashMap<(Uuid, String), String>,
    failing_automations: HashSet<Uuid>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an automation as-is (id and status included).
    pub async fn insert_automation(&self, automation: Automation) {
        self.state.lock().await.automations.insert(automation.id, automation);
    }

    /// Number of runs created so far.
    pub async fn run_count(&self) -> usize {
        self.state.lock().await.runs.len()
    }

    /// Make `create_run` fail for runs of `automation_id`.
    pub async fn fail_run_creation_for(&self, automation_id: Uuid) {
        self.state.lock().await.failing_automations.insert(automation_id);
    }

    /// Overwrite a run, e.g. to age it past a debounce window.
    pub async fn put_run(&self, run: AutomationRun) {
        self.state.lock().await.runs.insert(run.id, run);
    }
}

fn limited<T>(mut items: Vec<T>, limit: i64) -> Vec<T> {
    items.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
    items
}

#[async_trait]
impl AutomationStore for MemoryStore {
    async fn create_automation(&self, organization_id: Uuid, new: NewAutomation) -> Result<Automation, StoreError> {
        let now = Utc::now();
        let automation = Automation {
            id: Uuid::new_v4(),
            organization_id,
            name: new.name,
            status: new.status,
            trigger_type: new.trigger_type,
            trigger_config: new.trigger_config,
            nodes: new.nodes,
            edges: new.edges,
            created_at: now,
            updated_at: now,
        };
        self.state.lock().await.automations.insert(automation.id, automation.clone());
        Ok(automation)
    }

    async fn get_automation(&self, id: Uuid) -> Result<Automation, StoreError> {
        self.state.lock().await.automations.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn get_automation_for_org(&self, organization_id: Uuid, id: Uuid) -> Result<Automation, StoreError> {
        self.state
            .lock()
            .await
            .automations
            .get(&id)
            .filter(|a| a.organization_id == organization_id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn list_automations(&self, organization_id: Uuid) -> Result<Vec<Automation>, StoreError> {
        let state = self.state.lock().await;
        let mut list: Vec<Automation> =
            state.automations.values().filter(|a| a.organization_id == organization_id).cloned().collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    async fn list_active_by_trigger(
        &self,
        organization_id: Uuid,
        trigger_type: TriggerType,
    ) -> Result<Vec<Automation>, StoreError> {
        let state = self.state.lock().await;
        let mut list: Vec<Automation> = state
            .automations
            .values()
            .filter(|a| {
                a.organization_id == organization_id
                    && a.trigger_type == trigger_type
                    && a.status == AutomationStatus::Active
            })
            .cloned()
            .collect();
        list.sort_by_key(|a| a.created_at);
        Ok(list)
    }

    async fn update_automation_status(
        &self,
        organization_id: Uuid,
        id: Uuid,
        status: AutomationStatus,
    ) -> Result<Automation, StoreError> {
        let mut state = self.state.lock().await;
        let automation = state
            .automations
            .get_mut(&id)
            .filter(|a| a.organization_id == organization_id)
            .ok_or(StoreError::NotFound)?;
        automation.status = status;
        automation.updated_at = Utc::now();
        Ok(automation.clone())
    }

    async fn delete_automation(&self, organization_id: Uuid, id: Uuid) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        match state.automations.get(&id) {
            Some(a) if a.organization_id == organization_id => {}
            _ => return Err(StoreError::NotFound),
        }
        state.automations.remove(&id);
        state.runs.retain(|_, r| r.automation_id != id);
        let State { runs, steps, .. } = &mut *state;
        steps.retain(|s| runs.contains_key(&s.run_id));
        Ok(())
    }

    async fn create_run(&self, run: &AutomationRun) -> Result<AutomationRun, StoreError> {
        let mut state = self.state.lock().await;
        if !state.automations.contains_key(&run.automation_id) {
            return Err(StoreError::NotFound);
        }
        if state.failing_automations.contains(&run.automation_id) {
            return Err(StoreError::Unavailable(format!("run creation disabled for {}", run.automation_id)));
        }
        let mut stored = run.clone();
        stored.status = RunStatus::Pending;
        state.runs.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get_run(&self, id: Uuid) -> Result<AutomationRun, StoreError> {
        self.state.lock().await.runs.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn get_run_for_org(&self, organization_id: Uuid, id: Uuid) -> Result<AutomationRun, StoreError> {
        self.state
            .lock()
            .await
            .runs
            .get(&id)
            .filter(|r| r.organization_id == organization_id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn list_runs(
        &self,
        organization_id: Uuid,
        automation_id: Uuid,
        limit: i64,
    ) -> Result<Vec<AutomationRun>, StoreError> {
        let state = self.state.lock().await;
        let mut runs: Vec<AutomationRun> = state
            .runs
            .values()
            .filter(|r| r.organization_id == organization_id && r.automation_id == automation_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(limited(runs, limit))
    }

    async fn list_pending_runs(&self, created_before: DateTime<Utc>, limit: i64) -> Result<Vec<AutomationRun>, StoreError> {
        let state = self.state.lock().await;
        let mut runs: Vec<AutomationRun> = state
            .runs
            .values()
            .filter(|r| r.status == RunStatus::Pending && r.created_at < created_before)
            .cloned()
            .collect();
        runs.sort_by_key(|r| r.created_at);
        Ok(limited(runs, limit))
    }

    async fn list_due_waiting_runs(&self, due_before: DateTime<Utc>, limit: i64) -> Result<Vec<AutomationRun>, StoreError> {
        let state = self.state.lock().await;
        let mut runs: Vec<AutomationRun> = state
            .runs
            .values()
            .filter(|r| r.status == RunStatus::Waiting && r.resume_at.is_some_and(|at| at < due_before))
            .cloned()
            .collect();
        runs.sort_by_key(|r| r.resume_at);
        Ok(limited(runs, limit))
    }

    async fn claim_run(&self, id: Uuid, from: &[RunStatus], node_id: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let Some(run) = state.runs.get_mut(&id) else { return Ok(false) };
        let positioned = run.current_node_id.as_deref().map_or(true, |current| current == node_id);
        if !from.contains(&run.status) || !positioned {
            return Ok(false);
        }
        run.status = RunStatus::Running;
        run.current_node_id = Some(node_id.to_owned());
        run.resume_at = None;
        run.updated_at = Utc::now();
        Ok(true)
    }

    async fn save_progress(&self, id: Uuid, node_id: &str, context: &Value) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        match state.runs.get_mut(&id) {
            Some(run) if run.status == RunStatus::Running => {
                run.current_node_id = Some(node_id.to_owned());
                run.context = context.clone();
                run.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn suspend_run(
        &self,
        id: Uuid,
        next_node_id: &str,
        context: &Value,
        resume_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        match state.runs.get_mut(&id) {
            Some(run) if run.status == RunStatus::Running => {
                run.status = RunStatus::Waiting;
                run.current_node_id = Some(next_node_id.to_owned());
                run.context = context.clone();
                run.resume_at = Some(resume_at);
                run.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn finish_run(
        &self,
        id: Uuid,
        status: RunStatus,
        context: &Value,
        last_error: Option<&str>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        match state.runs.get_mut(&id) {
            Some(run) if run.status == RunStatus::Running => {
                let now = Utc::now();
                run.status = status;
                run.context = context.clone();
                run.last_error = last_error.map(str::to_owned);
                run.completed_at = Some(now);
                run.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn fail_run(&self, id: Uuid, from: &[RunStatus], last_error: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        match state.runs.get_mut(&id) {
            Some(run) if from.contains(&run.status) => {
                let now = Utc::now();
                run.status = RunStatus::Failed;
                run.last_error = Some(last_error.to_owned());
                run.completed_at = Some(now);
                run.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cancel_run(&self, organization_id: Uuid, id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        match state.runs.get_mut(&id) {
            Some(run) if run.organization_id == organization_id && !run.status.is_terminal() => {
                let now = Utc::now();
                run.status = RunStatus::Cancelled;
                run.resume_at = None;
                run.completed_at = Some(now);
                run.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_step(&self, step: &RunStep) -> Result<(), StoreError> {
        self.state.lock().await.steps.push(step.clone());
        Ok(())
    }

    async fn list_steps(&self, run_id: Uuid) -> Result<Vec<RunStep>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.steps.iter().filter(|s| s.run_id == run_id).cloned().collect())
    }

    async fn record_event(
        &self,
        event: &AutomationEvent,
        dedupe_key: Option<&str>,
    ) -> Result<Option<EventLogEntry>, StoreError> {
        let mut state = self.state.lock().await;
        let event_type = event.event_type.as_str();

        if let Some(key) = dedupe_key {
            let duplicate = state.events.iter().any(|e| {
                !e.processed
                    && e.organization_id == event.organization_id
                    && e.event_type == event_type
                    && e.dedupe_key.as_deref() == Some(key)
            });
            if duplicate {
                return Ok(None);
            }
        }

        let entry = EventLogEntry {
            id: Uuid::new_v4(),
            organization_id: event.organization_id,
            event_type: event_type.to_owned(),
            contact_id: event.contact_id,
            payload: event.log_payload(),
            source: event.source.clone(),
            dedupe_key: dedupe_key.map(str::to_owned),
            processed: false,
            processed_at: None,
            error: None,
            created_at: Utc::now(),
        };
        state.events.push(entry.clone());
        Ok(Some(entry))
    }

    async fn claim_unprocessed_events(&self, limit: i64) -> Result<Vec<EventLogEntry>, StoreError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let take = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        let claimed = state
            .events
            .iter_mut()
            .filter(|e| !e.processed)
            .take(take)
            .map(|entry| {
                entry.processed = true;
                entry.processed_at = Some(now);
                entry.clone()
            })
            .collect();
        Ok(claimed)
    }

    async fn record_event_error(&self, id: Uuid, error: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.events.iter_mut().find(|e| e.id == id) {
            entry.error = Some(error.to_owned());
        }
        Ok(())
    }

    async fn list_credentials(&self, organization_id: Uuid) -> Result<Vec<StoredCredential>, StoreError> {
        let state = self.state.lock().await;
        let mut creds: Vec<StoredCredential> = state
            .credentials
            .iter()
            .filter(|((org, _), _)| *org == organization_id)
            .map(|((_, key), value)| StoredCredential { key: key.clone(), encrypted_value: value.clone() })
            .collect();
        creds.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(creds)
    }

    async fn upsert_credential(&self, organization_id: Uuid, key: &str, encrypted_value: &str) -> Result<(), StoreError> {
        self.state
            .lock()
            .await
            .credentials
            .insert((organization_id, key.to_owned()), encrypted_value.to_owned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Node, TriggerType};
    use serde_json::json;

    async fn store_with_run() -> (MemoryStore, AutomationRun) {
        let store = MemoryStore::new();
        let automation = Automation::new(
            Uuid::new_v4(),
            "a",
            TriggerType::Manual,
            vec![Node::new("t", "trigger", json!({}))],
            vec![],
        );
        store.insert_automation(automation.clone()).await;
        let run = AutomationRun::pending(Uuid::new_v4(), &automation, "t", json!({}));
        let run = store.create_run(&run).await.unwrap();
        (store, run)
    }

    #[tokio::test]
    async fn claim_is_won_once() {
        let (store, run) = store_with_run().await;
        let from = [RunStatus::Pending, RunStatus::Waiting];
        assert!(store.claim_run(run.id, &from, "t").await.unwrap());
        assert!(!store.claim_run(run.id, &from, "t").await.unwrap());
        assert_eq!(store.get_run(run.id).await.unwrap().status, RunStatus::Running);
    }

    #[tokio::test]
    async fn claim_requires_matching_position() {
        let (store, run) = store_with_run().await;
        assert!(!store.claim_run(run.id, &[RunStatus::Pending], "elsewhere").await.unwrap());
    }

    #[tokio::test]
    async fn cancelled_runs_reject_every_transition() {
        let (store, run) = store_with_run().await;
        assert!(store.cancel_run(run.organization_id, run.id).await.unwrap());
        assert!(!store.cancel_run(run.organization_id, run.id).await.unwrap());
        assert!(!store.claim_run(run.id, &[RunStatus::Pending], "t").await.unwrap());
        assert!(!store.finish_run(run.id, RunStatus::Completed, &json!({}), None).await.unwrap());
        assert!(!store.save_progress(run.id, "t", &json!({ "x": 1 })).await.unwrap());
        assert_eq!(store.get_run(run.id).await.unwrap().status, RunStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancel_is_tenant_scoped() {
        let (store, run) = store_with_run().await;
        assert!(!store.cancel_run(Uuid::new_v4(), run.id).await.unwrap());
    }

    #[tokio::test]
    async fn event_dedupe_only_against_unprocessed() {
        let store = MemoryStore::new();
        let event = AutomationEvent::new(Uuid::new_v4(), TriggerType::TagAdded, json!({ "tag": "vip" }));

        let first = store.record_event(&event, Some("k1")).await.unwrap().unwrap();
        assert!(store.record_event(&event, Some("k1")).await.unwrap().is_none());
        assert!(store.record_event(&event, None).await.unwrap().is_some());

        let claimed = store.claim_unprocessed_events(10).await.unwrap();
        assert_eq!(claimed.len(), 2);
        assert_eq!(claimed[0].id, first.id);
        assert!(store.claim_unprocessed_events(10).await.unwrap().is_empty());
        assert!(store.record_event(&event, Some("k1")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn deleting_an_automation_removes_its_runs() {
        let (store, run) = store_with_run().await;
        store.delete_automation(run.organization_id, run.automation_id).await.unwrap();
        assert!(matches!(store.get_run(run.id).await, Err(StoreError::NotFound)));
        assert!(matches!(
            store.delete_automation(run.organization_id, run.automation_id).await,
            Err(StoreError::NotFound)
        ));
    }
}
