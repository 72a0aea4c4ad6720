//! End-to-end engine tests.
//!
//! Everything runs in-process: `MemoryStore` for persistence, `MemoryQueue`
//! for delayed deliveries (delivered by hand), `MockCrm` for side effects
//! and mock or seeded random sources for A/B splits.  No Postgres needed.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use nodes::builtin::TriggerNode;
use nodes::mock::{FixedRandom, MockCrm, MockNode, SeededRandom};
use nodes::{BuiltinDeps, CredentialStore, NodeRegistry, RandomSource};
use queue::{MemoryQueue, AUTOMATION_STEP};

use crate::bus::{DispatchMode, EventBus};
use crate::executor::{ExecutorConfig, SkipReason, StepOutcome, WorkflowExecutor};
use crate::graph::validate_graph;
use crate::models::{Automation, AutomationEvent, AutomationRun, Edge, Node, RunStatus, StepStatus, TriggerType};
use crate::processor::{EventProcessor, ProcessorConfig};
use crate::store::{AutomationStore, MemoryStore};
use crate::worker::dispatch_job;

const ORG: Uuid = Uuid::from_u128(0x0a11_0000_0000_0000_0000_0000_0000_0001);
const CONTACT: Uuid = Uuid::from_u128(0x0c0c_0000_0000_0000_0000_0000_0000_0002);

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    store: Arc<MemoryStore>,
    queue: Arc<MemoryQueue>,
    crm: Arc<MockCrm>,
    executor: Arc<WorkflowExecutor>,
    bus: Arc<EventBus>,
}

impl Harness {
    fn build(
        registry: NodeRegistry,
        crm: Arc<MockCrm>,
        mode: DispatchMode,
        config: ExecutorConfig,
        credentials: Option<CredentialStore>,
    ) -> Self {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let mut executor = WorkflowExecutor::new(store.clone(), Arc::new(registry), queue.clone(), config);
        if let Some(credentials) = credentials {
            executor = executor.with_credentials(credentials);
        }
        let executor = Arc::new(executor);
        let bus = Arc::new(EventBus::new(executor.clone(), mode));
        Self { store, queue, crm, executor, bus }
    }

    /// Built-in node types over a fresh `MockCrm`.
    fn builtin(random: Arc<dyn RandomSource>) -> Self {
        let crm = Arc::new(MockCrm::default());
        let registry = NodeRegistry::builtin(&BuiltinDeps::new(crm.clone()).with_random(random));
        Self::build(registry, crm, DispatchMode::Inline, ExecutorConfig::default(), None)
    }

    /// `trigger` plus the given mock nodes.
    fn mocks(mocks: &[(&str, Arc<MockNode>)], config: ExecutorConfig) -> Self {
        let mut registry = NodeRegistry::new();
        registry.register("trigger", Arc::new(TriggerNode));
        for (node_type, node) in mocks {
            registry.register(*node_type, node.clone());
        }
        Self::build(registry, Arc::new(MockCrm::default()), DispatchMode::Inline, config, None)
    }

    async fn install(&self, trigger: TriggerType, nodes: Vec<Node>, edges: Vec<Edge>) -> Automation {
        let automation = Automation::new(ORG, "test automation", trigger, nodes, edges);
        validate_graph(&automation, self.executor.registry()).expect("valid graph");
        self.store.insert_automation(automation.clone()).await;
        automation
    }

    async fn emit(&self, event: AutomationEvent) -> Vec<Uuid> {
        self.bus.emit(&event).await.expect("emit").run_ids
    }

    async fn run(&self, id: Uuid) -> AutomationRun {
        self.store.get_run(id).await.expect("run exists")
    }

    /// Deliver every queued message once, in order.
    async fn deliver_all(&self) -> Vec<StepOutcome> {
        let mut outcomes = Vec::new();
        for job in self.queue.take() {
            outcomes.push(dispatch_job(&self.executor, &job.job_type, job.payload).await.expect("dispatch"));
        }
        outcomes
    }

    async fn single_run(&self, event: AutomationEvent) -> AutomationRun {
        let ids = self.emit(event).await;
        assert_eq!(ids.len(), 1, "expected exactly one run");
        self.run(ids[0]).await
    }
}

fn contact_event(trigger: TriggerType, data: Value) -> AutomationEvent {
    AutomationEvent::new(ORG, trigger, data).with_contact(CONTACT)
}

fn trigger() -> Node {
    Node::new("t", "trigger", json!({}))
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

fn vip_welcome_graph() -> (Vec<Node>, Vec<Edge>) {
    (
        vec![
            trigger(),
            Node::new("is_vip", "condition", json!({ "field": "tags", "operator": "contains", "value": "vip" })),
            Node::new("welcome", "add_tag", json!({ "tag": "welcomed" })),
            Node::new("noop", "notify_team", json!({ "message": "new non-vip contact {{email}}" })),
        ],
        vec![
            Edge::new("t", "is_vip"),
            Edge::branch("is_vip", "true", "welcome"),
            Edge::branch("is_vip", "false", "noop"),
        ],
    )
}

#[tokio::test]
async fn non_vip_contact_is_not_welcomed() {
    let h = Harness::builtin(Arc::new(FixedRandom(0.0)));
    let (nodes, edges) = vip_welcome_graph();
    h.install(TriggerType::ContactCreated, nodes, edges).await;

    let run = h
        .single_run(contact_event(TriggerType::ContactCreated, json!({ "email": "bo@example.com", "tags": ["lead"] })))
        .await;

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.context["conditionResult"], json!(false));
    assert!(h.crm.tags(ORG, CONTACT).is_empty());
    assert_eq!(h.crm.notifications()[0].2, "new non-vip contact bo@example.com");
    assert!(run.completed_at.is_some());
}

#[tokio::test]
async fn vip_contact_is_welcomed() {
    let h = Harness::builtin(Arc::new(FixedRandom(0.0)));
    let (nodes, edges) = vip_welcome_graph();
    h.install(TriggerType::ContactCreated, nodes, edges).await;

    let run = h
        .single_run(contact_event(TriggerType::ContactCreated, json!({ "tags": ["vip", "lead"] })))
        .await;

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.context["tagAdded"], json!(true));
    assert_eq!(h.crm.tags(ORG, CONTACT), vec!["welcomed".to_string()]);
    assert!(h.crm.notifications().is_empty());
}

#[tokio::test]
async fn delay_parks_the_run_until_resume() {
    let h = Harness::builtin(Arc::new(FixedRandom(0.0)));
    h.install(
        TriggerType::TagAdded,
        vec![
            trigger(),
            Node::new("first", "add_tag", json!({ "tag": "nurture-1" })),
            Node::new("wait", "delay", json!({ "value": 1, "unit": "hours" })),
            Node::new("second", "add_tag", json!({ "tag": "nurture-2" })),
        ],
        vec![Edge::new("t", "first"), Edge::new("first", "wait"), Edge::new("wait", "second")],
    )
    .await;

    let run = h.single_run(contact_event(TriggerType::TagAdded, json!({ "tag": "lead" }))).await;

    assert_eq!(run.status, RunStatus::Waiting);
    assert_eq!(run.current_node_id.as_deref(), Some("second"));
    let resume_at = run.resume_at.expect("resume time set");
    assert!(resume_at > Utc::now() + ChronoDuration::minutes(59));
    assert_eq!(h.crm.tags(ORG, CONTACT), vec!["nurture-1".to_string()]);

    let jobs = h.queue.jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].job_type, AUTOMATION_STEP);
    assert_eq!(jobs[0].delay_seconds, 3_600);
    assert_eq!(jobs[0].payload["nodeId"], "second");

    let outcomes = h.deliver_all().await;
    assert!(matches!(outcomes[..], [StepOutcome::Completed { steps: 1 }]));

    let run = h.run(run.id).await;
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(h.crm.tags(ORG, CONTACT), vec!["nurture-1".to_string(), "nurture-2".to_string()]);

    let steps = h.store.list_steps(run.id).await.unwrap();
    let executed: Vec<&str> = steps.iter().map(|s| s.node_id.as_str()).collect();
    assert_eq!(executed, ["t", "first", "wait", "second"]);
    assert!(steps.iter().all(|s| s.status == StepStatus::Succeeded));
}

#[tokio::test]
async fn ab_split_lands_near_configured_percentage() {
    let h = Harness::builtin(Arc::new(SeededRandom::new(7)));
    h.install(
        TriggerType::Manual,
        vec![
            trigger(),
            Node::new("split", "ab_split", json!({ "splitPercentage": 30 })),
            Node::new("a", "notify_team", json!({ "message": "A" })),
            Node::new("b", "notify_team", json!({ "message": "B" })),
        ],
        vec![Edge::new("t", "split"), Edge::branch("split", "A", "a"), Edge::branch("split", "B", "b")],
    )
    .await;

    const DRAWS: usize = 10_000;
    let event = AutomationEvent::new(ORG, TriggerType::Manual, json!({}));
    let mut variant_a = 0usize;
    for _ in 0..DRAWS {
        let run = h.single_run(event.clone()).await;
        assert_eq!(run.status, RunStatus::Completed);
        if run.context["variant"] == "A" {
            variant_a += 1;
        }
    }

    let share = variant_a as f64 / DRAWS as f64;
    assert!((0.27..=0.33).contains(&share), "variant A share was {share}");
}

#[tokio::test]
async fn unreachable_webhook_completes_with_delivered_false() {
    let h = Harness::builtin(Arc::new(FixedRandom(0.0)));
    h.install(
        TriggerType::FormSubmitted,
        vec![trigger(), Node::new("hook", "webhook", json!({ "url": "http://127.0.0.1:9/unreachable" }))],
        vec![Edge::new("t", "hook")],
    )
    .await;

    let run = h.single_run(contact_event(TriggerType::FormSubmitted, json!({ "formId": "f1" }))).await;

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.context["delivered"], json!(false));
    assert!(run.context.get("error").is_some());
    assert!(run.last_error.is_none());
}

#[tokio::test]
async fn concurrent_duplicate_resume_notifies_once() {
    let h = Harness::builtin(Arc::new(FixedRandom(0.0)));
    h.install(
        TriggerType::DealCreated,
        vec![
            trigger(),
            Node::new("wait", "delay", json!({ "value": 5, "unit": "minutes" })),
            Node::new("notify", "notify_team", json!({ "title": "Follow up", "message": "deal {{trigger.data.title}}" })),
        ],
        vec![Edge::new("t", "wait"), Edge::new("wait", "notify")],
    )
    .await;

    let run = h.single_run(contact_event(TriggerType::DealCreated, json!({ "title": "Acme" }))).await;
    assert_eq!(run.status, RunStatus::Waiting);

    let job = h.queue.take().pop().expect("resume message");
    let (first, second) = tokio::join!(
        dispatch_job(&h.executor, &job.job_type, job.payload.clone()),
        dispatch_job(&h.executor, &job.job_type, job.payload.clone()),
    );
    let outcomes = [first.unwrap(), second.unwrap()];

    assert_eq!(outcomes.iter().filter(|o| matches!(o, StepOutcome::Completed { .. })).count(), 1);
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| matches!(o, StepOutcome::Skipped { reason: SkipReason::NotClaimed }))
            .count(),
        1
    );
    assert_eq!(h.crm.notifications().len(), 1);
    assert_eq!(h.crm.notifications()[0].2, "deal Acme");
    assert_eq!(h.run(run.id).await.status, RunStatus::Completed);
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[tokio::test]
async fn tagging_twice_leaves_one_tag() {
    let h = Harness::builtin(Arc::new(FixedRandom(0.0)));
    h.install(
        TriggerType::ContactUpdated,
        vec![
            trigger(),
            Node::new("tag1", "add_tag", json!({ "tag": "vip" })),
            Node::new("tag2", "add_tag", json!({ "tagName": "vip" })),
        ],
        vec![Edge::new("t", "tag1"), Edge::new("tag1", "tag2")],
    )
    .await;

    let run = h.single_run(contact_event(TriggerType::ContactUpdated, json!({}))).await;

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.context["tagAdded"], json!(false));
    assert_eq!(h.crm.tags(ORG, CONTACT), vec!["vip".to_string()]);
}

#[tokio::test]
async fn condition_follows_exactly_one_branch() {
    let yes = Arc::new(MockNode::returning("yes", json!({})));
    let no = Arc::new(MockNode::returning("no", json!({})));
    let mut registry = NodeRegistry::builtin(&BuiltinDeps::new(Arc::new(MockCrm::default())));
    registry.register("yes", yes.clone()).register("no", no.clone());
    let h = Harness::build(registry, Arc::new(MockCrm::default()), DispatchMode::Inline, ExecutorConfig::default(), None);

    h.install(
        TriggerType::Manual,
        vec![
            trigger(),
            Node::new("c", "condition", json!({ "field": "score", "operator": "greater_than", "value": 50 })),
            Node::new("y", "yes", json!({})),
            Node::new("n", "no", json!({})),
        ],
        vec![Edge::new("t", "c"), Edge::branch("c", "true", "y"), Edge::branch("c", "false", "n")],
    )
    .await;

    for (score, expect_yes) in [(80, true), (10, false), (50, false)] {
        let before = (yes.call_count(), no.call_count());
        h.single_run(AutomationEvent::new(ORG, TriggerType::Manual, json!({ "score": score }))).await;
        let after = (yes.call_count(), no.call_count());
        let took_yes = after.0 - before.0;
        let took_no = after.1 - before.1;
        assert_eq!(took_yes + took_no, 1, "score {score}");
        assert_eq!(took_yes == 1, expect_yes, "score {score}");
    }
}

#[tokio::test]
async fn context_keys_are_never_dropped() {
    let first = Arc::new(MockNode::returning("first", json!({ "a": 1, "shared": "first" })));
    let second = Arc::new(MockNode::returning("second", json!({ "b": 2, "shared": "second" })));
    let last = Arc::new(MockNode::returning("last", json!({})));
    let h = Harness::mocks(
        &[("first", first.clone()), ("second", second.clone()), ("last", last.clone())],
        ExecutorConfig::default(),
    );
    h.install(
        TriggerType::Manual,
        vec![trigger(), Node::new("1", "first", json!({})), Node::new("2", "second", json!({})), Node::new("3", "last", json!({}))],
        vec![Edge::new("t", "1"), Edge::new("1", "2"), Edge::new("2", "3")],
    )
    .await;

    let run = h.single_run(AutomationEvent::new(ORG, TriggerType::Manual, json!({ "seed": true }))).await;

    let seen = [
        first.calls.lock().unwrap()[0].clone(),
        second.calls.lock().unwrap()[0].clone(),
        last.calls.lock().unwrap()[0].clone(),
        run.context.clone(),
    ];
    for pair in seen.windows(2) {
        let before: HashSet<&String> = pair[0].as_object().unwrap().keys().collect();
        let after: HashSet<&String> = pair[1].as_object().unwrap().keys().collect();
        assert!(before.is_subset(&after), "keys dropped: {:?}", before.difference(&after).collect::<Vec<_>>());
    }
    assert_eq!(run.context["shared"], "second");
    assert_eq!(run.context["seed"], json!(true));
}

#[tokio::test]
async fn redelivery_after_completion_is_a_noop() {
    let h = Harness::builtin(Arc::new(FixedRandom(0.0)));
    h.install(
        TriggerType::TagAdded,
        vec![
            trigger(),
            Node::new("wait", "delay", json!({ "value": 1, "unit": "days" })),
            Node::new("notify", "notify_team", json!({ "message": "done" })),
        ],
        vec![Edge::new("t", "wait"), Edge::new("wait", "notify")],
    )
    .await;
    let run = h.single_run(contact_event(TriggerType::TagAdded, json!({}))).await;

    let job = h.queue.take().pop().unwrap();
    let first = dispatch_job(&h.executor, &job.job_type, job.payload.clone()).await.unwrap();
    let again = dispatch_job(&h.executor, &job.job_type, job.payload).await.unwrap();

    assert!(matches!(first, StepOutcome::Completed { .. }));
    assert_eq!(again, StepOutcome::Skipped { reason: SkipReason::NotClaimed });
    assert_eq!(h.crm.notifications().len(), 1);
    assert_eq!(h.store.list_steps(run.id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn cancelled_waiting_run_never_resumes() {
    let h = Harness::builtin(Arc::new(FixedRandom(0.0)));
    h.install(
        TriggerType::TagAdded,
        vec![
            trigger(),
            Node::new("wait", "delay", json!({ "value": 10, "unit": "minutes" })),
            Node::new("notify", "notify_team", json!({ "message": "too late" })),
        ],
        vec![Edge::new("t", "wait"), Edge::new("wait", "notify")],
    )
    .await;
    let run = h.single_run(contact_event(TriggerType::TagAdded, json!({}))).await;
    assert!(h.executor.cancel_run(ORG, run.id).await.unwrap());
    assert!(!h.executor.cancel_run(ORG, run.id).await.unwrap());

    let job = h.queue.take().pop().unwrap();
    for _ in 0..3 {
        let outcome = dispatch_job(&h.executor, &job.job_type, job.payload.clone()).await.unwrap();
        assert_eq!(outcome, StepOutcome::Skipped { reason: SkipReason::RunCancelled });
    }

    let processor = EventProcessor::new(h.bus.clone(), ProcessorConfig::default());
    let report = processor.process_due_waits(100).await.unwrap();
    assert_eq!(report.processed, 0);

    assert_eq!(h.run(run.id).await.status, RunStatus::Cancelled);
    assert!(h.crm.notifications().is_empty());
}

#[tokio::test]
async fn cancellation_between_steps_stops_the_walk() {
    // The first node cancels its own run; the walk must stop before the next.
    struct CancelOnRun(Arc<MemoryStore>);

    #[async_trait::async_trait]
    impl nodes::ExecutableNode for CancelOnRun {
        async fn execute(
            &self,
            _config: &Value,
            ctx: &nodes::ExecutionContext,
        ) -> Result<nodes::NodeOutcome, nodes::NodeError> {
            self.0.cancel_run(ctx.organization_id, ctx.run_id).await.unwrap();
            Ok(nodes::NodeOutcome::proceed(json!({ "cancelled": true })))
        }
    }

    let after = Arc::new(MockNode::returning("after", json!({})));
    let store = Arc::new(MemoryStore::new());
    let mut registry = NodeRegistry::new();
    registry
        .register("trigger", Arc::new(TriggerNode))
        .register("cancel", Arc::new(CancelOnRun(store.clone())))
        .register("after", after.clone());
    let executor = Arc::new(WorkflowExecutor::new(
        store.clone(),
        Arc::new(registry),
        Arc::new(MemoryQueue::new()),
        ExecutorConfig::default(),
    ));

    let automation = Automation::new(
        ORG,
        "self-cancel",
        TriggerType::Manual,
        vec![trigger(), Node::new("c", "cancel", json!({})), Node::new("a", "after", json!({}))],
        vec![Edge::new("t", "c"), Edge::new("c", "a")],
    );
    store.insert_automation(automation.clone()).await;
    let run = store
        .create_run(&AutomationRun::pending(Uuid::new_v4(), &automation, "t", json!({})))
        .await
        .unwrap();

    let outcome = executor.start_run(run.id).await.unwrap();

    assert_eq!(outcome, StepOutcome::Cancelled);
    assert_eq!(after.call_count(), 0);
    assert_eq!(store.get_run(run.id).await.unwrap().status, RunStatus::Cancelled);
}

// ---------------------------------------------------------------------------
// Failure handling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn node_config_error_fails_the_run() {
    let broken = Arc::new(MockNode::failing_config("broken", "missing `url`"));
    let h = Harness::mocks(&[("broken", broken)], ExecutorConfig::default());
    h.install(
        TriggerType::Manual,
        vec![trigger(), Node::new("b", "broken", json!({}))],
        vec![Edge::new("t", "b")],
    )
    .await;

    let run = h.single_run(AutomationEvent::new(ORG, TriggerType::Manual, json!({}))).await;

    assert_eq!(run.status, RunStatus::Failed);
    let error = run.last_error.unwrap();
    assert!(error.contains("node 'b'"), "{error}");
    assert!(error.contains("missing `url`"), "{error}");

    let steps = h.store.list_steps(run.id).await.unwrap();
    assert_eq!(steps.last().unwrap().status, StepStatus::Failed);
}

#[tokio::test]
async fn fail_run_on_error_turns_action_failure_fatal() {
    let h = Harness::builtin(Arc::new(FixedRandom(0.0)));
    h.crm.set_unavailable(true);
    h.install(
        TriggerType::Manual,
        vec![trigger(), Node::new("n", "notify_team", json!({ "message": "hi", "failRunOnError": true }))],
        vec![Edge::new("t", "n")],
    )
    .await;

    let run = h.single_run(AutomationEvent::new(ORG, TriggerType::Manual, json!({}))).await;

    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.last_error.unwrap().contains("notify_team"));
}

#[tokio::test]
async fn unregistered_node_type_fails_at_runtime() {
    let h = Harness::mocks(&[], ExecutorConfig::default());
    let automation = Automation::new(
        ORG,
        "legacy",
        TriggerType::Manual,
        vec![trigger(), Node::new("f", "send_fax", json!({}))],
        vec![Edge::new("t", "f")],
    );
    assert!(validate_graph(&automation, h.executor.registry()).is_err());
    h.store.insert_automation(automation).await;

    let run = h.single_run(AutomationEvent::new(ORG, TriggerType::Manual, json!({}))).await;

    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.last_error.unwrap().contains("unknown node type 'send_fax'"));
}

#[tokio::test]
async fn step_limit_breaks_delay_free_loops() {
    let ping = Arc::new(MockNode::returning("ping", json!({})));
    let pong = Arc::new(MockNode::returning("pong", json!({})));
    let h = Harness::mocks(&[("ping", ping.clone()), ("pong", pong.clone())], ExecutorConfig { max_steps: 10 });
    h.install(
        TriggerType::Manual,
        vec![trigger(), Node::new("a", "ping", json!({})), Node::new("b", "pong", json!({}))],
        vec![Edge::new("t", "a"), Edge::new("a", "b"), Edge::new("b", "a")],
    )
    .await;

    let run = h.single_run(AutomationEvent::new(ORG, TriggerType::Manual, json!({}))).await;

    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.last_error.unwrap().contains("step limit of 10"));
    assert_eq!(ping.call_count() + pong.call_count(), 9);
}

#[tokio::test]
async fn missing_automation_fails_the_run() {
    let h = Harness::mocks(&[], ExecutorConfig::default());
    let ghost = Automation::new(ORG, "ghost", TriggerType::Manual, vec![trigger()], vec![]);
    let run = AutomationRun::pending(Uuid::new_v4(), &ghost, "t", json!({}));
    h.store.put_run(run.clone()).await;

    let outcome = h.executor.start_run(run.id).await.unwrap();

    assert!(matches!(outcome, StepOutcome::Failed { .. }));
    let stored = h.run(run.id).await;
    assert_eq!(stored.status, RunStatus::Failed);
    assert!(stored.last_error.unwrap().contains("not found"));
}

#[tokio::test]
async fn unknown_run_is_an_error() {
    let h = Harness::mocks(&[], ExecutorConfig::default());
    let missing = Uuid::new_v4();
    let err = h.executor.execute_step(missing, "t", None).await.unwrap_err();
    assert!(matches!(err, crate::EngineError::RunNotFound(id) if id == missing));
}

#[tokio::test]
async fn unsupported_job_type_is_rejected() {
    let h = Harness::mocks(&[], ExecutorConfig::default());
    let err = dispatch_job(&h.executor, "send_newsletter", json!({})).await.unwrap_err();
    assert!(matches!(err, crate::EngineError::UnsupportedJob(_)));
    let err = dispatch_job(&h.executor, AUTOMATION_STEP, json!({ "nodeId": 3 })).await.unwrap_err();
    assert!(matches!(err, crate::EngineError::InvalidPayload(_)));
}

// ---------------------------------------------------------------------------
// Bus and sweeps
// ---------------------------------------------------------------------------

#[tokio::test]
async fn malformed_trigger_config_is_skipped() {
    let h = Harness::mocks(&[], ExecutorConfig::default());
    let mut broken = h.install(TriggerType::Manual, vec![trigger()], vec![]).await;
    broken.trigger_config = json!(["not", "an", "object"]);
    h.store.insert_automation(broken).await;
    let healthy = h.install(TriggerType::Manual, vec![trigger()], vec![]).await;

    let report = h.bus.emit(&AutomationEvent::new(ORG, TriggerType::Manual, json!({}))).await.unwrap();

    assert_eq!(report.run_ids.len(), 1);
    assert_eq!(h.run(report.run_ids[0]).await.automation_id, healthy.id);
}

#[tokio::test]
async fn inactive_and_foreign_automations_do_not_fire() {
    let h = Harness::mocks(&[], ExecutorConfig::default());
    let paused = h.install(TriggerType::Manual, vec![trigger()], vec![]).await;
    h.store
        .update_automation_status(ORG, paused.id, crate::models::AutomationStatus::Paused)
        .await
        .unwrap();

    let other_org = AutomationEvent::new(Uuid::new_v4(), TriggerType::Manual, json!({}));
    assert!(h.emit(other_org).await.is_empty());
    assert!(h.emit(AutomationEvent::new(ORG, TriggerType::Manual, json!({}))).await.is_empty());
}

#[tokio::test]
async fn run_context_is_seeded_from_the_event() {
    let spy = Arc::new(MockNode::returning("spy", json!({})));
    let h = Harness::mocks(&[("spy", spy.clone())], ExecutorConfig::default());
    let automation = h
        .install(TriggerType::ContactCreated, vec![trigger(), Node::new("s", "spy", json!({}))], vec![Edge::new("t", "s")])
        .await;

    let run = h
        .single_run(contact_event(TriggerType::ContactCreated, json!({ "email": "ada@example.com", "plan": "gold" })))
        .await;

    let seen = spy.calls.lock().unwrap()[0].clone();
    assert_eq!(seen["contact_id"], json!(CONTACT));
    assert_eq!(seen["email"], "ada@example.com");
    assert_eq!(seen["plan"], "gold");
    assert_eq!(seen["automation_id"], json!(automation.id));
    assert_eq!(seen["run_id"], json!(run.id));
    assert_eq!(seen["trigger"]["type"], "contact_created");
}

#[tokio::test]
async fn message_context_fills_a_blank_run_context() {
    let spy = Arc::new(MockNode::returning("spy", json!({})));
    let h = Harness::mocks(&[("spy", spy.clone())], ExecutorConfig::default());
    let automation = h.install(TriggerType::Manual, vec![trigger(), Node::new("s", "spy", json!({}))], vec![Edge::new("t", "s")]).await;
    let run = h
        .store
        .create_run(&AutomationRun::pending(Uuid::new_v4(), &automation, "s", json!({})))
        .await
        .unwrap();

    let outcome = h.executor.execute_step(run.id, "s", Some(json!({ "email": "from@queue.io" }))).await.unwrap();

    assert!(matches!(outcome, StepOutcome::Completed { steps: 1 }));
    assert_eq!(spy.calls.lock().unwrap()[0]["email"], "from@queue.io");
}

#[tokio::test]
async fn failed_enqueue_is_recovered_by_due_wait_sweep() {
    let h = Harness::builtin(Arc::new(FixedRandom(0.0)));
    h.install(
        TriggerType::TagAdded,
        vec![
            trigger(),
            Node::new("wait", "delay", json!({ "value": 1, "unit": "minutes" })),
            Node::new("tag", "add_tag", json!({ "tag": "resumed" })),
        ],
        vec![Edge::new("t", "wait"), Edge::new("wait", "tag")],
    )
    .await;
    h.queue.set_failing(true);

    let run = h.single_run(contact_event(TriggerType::TagAdded, json!({}))).await;
    assert_eq!(run.status, RunStatus::Waiting);
    assert!(h.queue.jobs().is_empty());

    let processor = EventProcessor::new(h.bus.clone(), ProcessorConfig::default());
    assert_eq!(processor.process_due_waits(10).await.unwrap().processed, 0);

    let mut overdue = h.run(run.id).await;
    overdue.resume_at = Some(Utc::now() - ChronoDuration::minutes(5));
    h.store.put_run(overdue).await;

    let report = processor.process_due_waits(10).await.unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(h.run(run.id).await.status, RunStatus::Completed);
    assert_eq!(h.crm.tags(ORG, CONTACT), vec!["resumed".to_string()]);
}

#[tokio::test]
async fn queued_dispatch_and_pending_sweep() {
    let crm = Arc::new(MockCrm::default());
    let registry = NodeRegistry::builtin(&BuiltinDeps::new(crm.clone()));
    let h = Harness::build(registry, crm, DispatchMode::Queued, ExecutorConfig::default(), None);
    h.install(
        TriggerType::ContactCreated,
        vec![trigger(), Node::new("tag", "add_tag", json!({ "tag": "queued" }))],
        vec![Edge::new("t", "tag")],
    )
    .await;

    let ids = h.emit(contact_event(TriggerType::ContactCreated, json!({}))).await;
    let run = h.run(ids[0]).await;
    assert_eq!(run.status, RunStatus::Pending);
    let jobs = h.queue.take();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].delay_seconds, 0);
    assert_eq!(jobs[0].payload["nodeId"], "t");

    // The message is lost; the sweep starts the run once it is past debounce.
    let processor = EventProcessor::new(h.bus.clone(), ProcessorConfig::default());
    assert_eq!(processor.process_pending_runs(10).await.unwrap().processed, 0);

    let mut aged = run.clone();
    aged.created_at = Utc::now() - ChronoDuration::minutes(1);
    h.store.put_run(aged).await;

    let report = processor.process_pending_runs(10).await.unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(h.run(run.id).await.status, RunStatus::Completed);
    assert_eq!(h.crm.tags(ORG, CONTACT), vec!["queued".to_string()]);
}

#[tokio::test]
async fn event_log_sweep_dispatches_each_entry_once() {
    let h = Harness::builtin(Arc::new(FixedRandom(0.0)));
    h.install(
        TriggerType::OrderCompleted,
        vec![trigger(), Node::new("tag", "add_tag", json!({ "tag": "customer" }))],
        vec![Edge::new("t", "tag")],
    )
    .await;

    let event = contact_event(TriggerType::OrderCompleted, json!({ "total": 42 }));
    assert!(h.bus.record_event(&event, Some("order-1")).await.unwrap().is_some());
    assert!(h.bus.record_event(&event, Some("order-1")).await.unwrap().is_none());
    let bad = crate::models::AutomationEvent::new(ORG, TriggerType::Manual, json!({}));
    h.bus.record_event(&bad, None).await.unwrap();

    let processor = EventProcessor::new(h.bus.clone(), ProcessorConfig::default());
    let report = processor.process_pending_events(50).await.unwrap();
    assert_eq!(report.processed, 2);
    assert_eq!(report.failed, 0);
    assert_eq!(h.crm.tags(ORG, CONTACT), vec!["customer".to_string()]);

    let again = processor.process_pending_events(50).await.unwrap();
    assert_eq!(again.processed, 0);
    assert!(h.store.claim_unprocessed_events(50).await.unwrap().is_empty());
}

#[tokio::test]
async fn overlapping_event_sweeps_start_one_run_per_entry() {
    // Suspends mid-dispatch so the two sweeps interleave.
    struct Yielding;

    #[async_trait::async_trait]
    impl nodes::ExecutableNode for Yielding {
        async fn execute(
            &self,
            _config: &Value,
            _ctx: &nodes::ExecutionContext,
        ) -> Result<nodes::NodeOutcome, nodes::NodeError> {
            tokio::task::yield_now().await;
            Ok(nodes::NodeOutcome::proceed(json!({ "yielded": true })))
        }
    }

    let mut registry = NodeRegistry::new();
    registry.register("trigger", Arc::new(TriggerNode)).register("yield", Arc::new(Yielding));
    let h = Harness::build(registry, Arc::new(MockCrm::default()), DispatchMode::Inline, ExecutorConfig::default(), None);
    h.install(
        TriggerType::CartAbandoned,
        vec![trigger(), Node::new("s", "yield", json!({}))],
        vec![Edge::new("t", "s")],
    )
    .await;
    let event = contact_event(TriggerType::CartAbandoned, json!({ "total": 80 }));
    assert!(h.bus.record_event(&event, Some("cart-1")).await.unwrap().is_some());

    let processor = EventProcessor::new(h.bus.clone(), ProcessorConfig::default());
    let (a, b) = tokio::join!(processor.process_pending_events(50), processor.process_pending_events(50));

    assert_eq!(a.unwrap().processed + b.unwrap().processed, 1);
    assert_eq!(h.store.run_count().await, 1);
}

#[tokio::test]
async fn failed_run_creation_does_not_block_other_automations() {
    let h = Harness::builtin(Arc::new(FixedRandom(0.0)));
    let broken = h
        .install(
            TriggerType::TagAdded,
            vec![trigger(), Node::new("tag", "add_tag", json!({ "tag": "broken" }))],
            vec![Edge::new("t", "tag")],
        )
        .await;
    let healthy = h
        .install(
            TriggerType::TagAdded,
            vec![trigger(), Node::new("tag", "add_tag", json!({ "tag": "healthy" }))],
            vec![Edge::new("t", "tag")],
        )
        .await;
    h.store.fail_run_creation_for(broken.id).await;

    let event = contact_event(TriggerType::TagAdded, json!({ "tag": "vip" }));
    let report = h.bus.emit(&event).await.unwrap();

    assert_eq!(report.matched, 2);
    assert_eq!(report.run_ids.len(), 1);
    assert_eq!(h.run(report.run_ids[0]).await.automation_id, healthy.id);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].contains(&broken.id.to_string()));
    assert_eq!(h.crm.tags(ORG, CONTACT), vec!["healthy".to_string()]);

    // Through the Event Log the entry is consumed and the failure surfaces.
    h.bus.record_event(&event, None).await.unwrap();
    let processor = EventProcessor::new(h.bus.clone(), ProcessorConfig::default());
    let sweep = processor.process_pending_events(50).await.unwrap();
    assert_eq!(sweep.failed, 1);
    assert!(sweep.errors[0].contains(&broken.id.to_string()));
    assert_eq!(h.store.run_count().await, 2);
}

#[tokio::test]
async fn publish_is_fire_and_forget() {
    let h = Harness::builtin(Arc::new(FixedRandom(0.0)));
    h.install(
        TriggerType::TagAdded,
        vec![trigger(), Node::new("tag", "add_tag", json!({ "tag": "async" }))],
        vec![Edge::new("t", "tag")],
    )
    .await;

    h.bus.publish(contact_event(TriggerType::TagAdded, json!({}))).await.unwrap();

    assert_eq!(h.store.run_count().await, 1);
    assert_eq!(h.crm.tags(ORG, CONTACT), vec!["async".to_string()]);
}

#[tokio::test]
async fn manual_trigger_ignores_filters() {
    let h = Harness::mocks(&[], ExecutorConfig::default());
    let mut automation = h.install(TriggerType::TagAdded, vec![trigger()], vec![]).await;
    automation.trigger_config = json!({ "tagName": "never" });
    h.store.insert_automation(automation.clone()).await;

    let event = AutomationEvent::new(ORG, TriggerType::TagAdded, json!({ "tag": "other" }));
    assert!(h.emit(event.clone()).await.is_empty());

    let run_id = h.bus.trigger_automation(ORG, automation.id, &event).await.unwrap();
    assert_eq!(h.run(run_id).await.status, RunStatus::Completed);

    let err = h.bus.trigger_automation(Uuid::new_v4(), automation.id, &event).await.unwrap_err();
    assert!(matches!(err, crate::EngineError::AutomationNotFound(_)));
}

#[tokio::test]
async fn webhook_receives_decrypted_credential() {
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/crm"))
        .and(header("authorization", "Bearer sk_live_123"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let cipher = CredentialStore::new("0123456789abcdef0123456789abcdef").unwrap();
    let crm = Arc::new(MockCrm::default());
    let registry = NodeRegistry::builtin(&BuiltinDeps::new(crm.clone()));
    let h = Harness::build(registry, crm, DispatchMode::Inline, ExecutorConfig::default(), Some(cipher.clone()));
    h.store.upsert_credential(ORG, "crm_token", &cipher.encrypt("sk_live_123").unwrap()).await.unwrap();

    h.install(
        TriggerType::WebhookReceived,
        vec![
            trigger(),
            Node::new(
                "hook",
                "webhook",
                json!({ "url": format!("{}/hooks/crm", server.uri()), "credentialKey": "crm_token" }),
            ),
        ],
        vec![Edge::new("t", "hook")],
    )
    .await;

    let run = h.single_run(AutomationEvent::new(ORG, TriggerType::WebhookReceived, json!({}))).await;

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.context["delivered"], json!(true));
    assert_eq!(run.context["statusCode"], json!(204));
}
