use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use action_flow::{
    ExecutionContext, ExecutionStatus, PlaybookEngine, PlaybookError, PlaybookEvent,
    StepExecutor, StepResult,
};
use action_gate::{
    GateError, GuidanceRequest, JudgeRequest, JudgeVerdict, PerceptualJudge, StepVerifier,
    VerifierConfig, MANUAL_CONFIRMATION_MESSAGE,
};
use action_primitives::{FixtureElement, FixturePage};
use async_trait::async_trait;
use parking_lot::Mutex;
use replaybook_core_types::{
    ActionType, ErrorAction, ErrorHandler, OnError, Playbook, PlaybookMetadata, Precondition,
    PreconditionAction, Step, StepVerify, VariableDefinition, VariableType, WaitFor,
};
use serde_json::{json, Value};
use tokio::sync::{broadcast, Notify};

#[derive(Debug, Clone)]
struct Call {
    step_id: String,
    value: Option<String>,
    item: Option<Value>,
    index: Option<Value>,
}

/// Records every call; fails or blocks selected steps.
#[derive(Default)]
struct ScriptedExecutor {
    calls: Mutex<Vec<Call>>,
    failures: Mutex<HashMap<String, usize>>,
    data: HashMap<String, Value>,
    block_on: Option<(String, Arc<Notify>, Arc<Notify>)>,
}

impl ScriptedExecutor {
    fn failing(step_id: &str, times: usize) -> Self {
        let executor = Self::default();
        executor.failures.lock().insert(step_id.to_string(), times);
        executor
    }

    fn ids(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.step_id.clone()).collect()
    }
}

#[async_trait]
impl StepExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        step: &Step,
        context: &ExecutionContext,
    ) -> Result<StepResult, PlaybookError> {
        self.calls.lock().push(Call {
            step_id: step.id.clone(),
            value: step.value.clone(),
            item: context.variable("_item").cloned(),
            index: context.variable("_index").cloned(),
        });

        if let Some((id, entered, release)) = &self.block_on {
            if id == &step.id {
                entered.notify_one();
                release.notified().await;
            }
        }

        {
            let mut failures = self.failures.lock();
            if let Some(remaining) = failures.get_mut(&step.id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(PlaybookError::step_failed(&step.id, "element not found"));
                }
            }
        }

        let mut result = if step.waits_for_user() {
            StepResult::waiting()
        } else {
            StepResult::ok()
        };
        if let Some(data) = self.data.get(&step.id) {
            result = result.with_data(data.clone());
        }
        Ok(result)
    }
}

fn playbook(steps: Vec<Step>) -> Playbook {
    Playbook::new(PlaybookMetadata::new("flow", "Flow test", "1.0.0"), steps)
}

fn wait(id: &str) -> Step {
    Step::new(id, ActionType::Wait)
}

fn engine_with(executor: Arc<ScriptedExecutor>) -> PlaybookEngine {
    PlaybookEngine::new().with_executor(executor)
}

fn drain(rx: &mut broadcast::Receiver<PlaybookEvent>) -> Vec<PlaybookEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn kinds(events: &[PlaybookEvent]) -> Vec<&'static str> {
    events.iter().map(PlaybookEvent::kind).collect()
}

#[tokio::test]
async fn runs_every_step_to_completion() {
    let executor = Arc::new(ScriptedExecutor::default());
    let engine = engine_with(executor.clone());
    let mut rx = engine.subscribe();

    engine
        .load(playbook((0..4).map(|i| wait(&format!("s{i}"))).collect()))
        .unwrap();
    engine.start().await.unwrap();

    let context = engine.context();
    assert_eq!(context.status, ExecutionStatus::Completed);
    assert_eq!(context.current_step_index, 4);
    assert!(context.completed_at.is_some());
    assert_eq!(executor.ids(), vec!["s0", "s1", "s2", "s3"]);

    let events = drain(&mut rx);
    assert_eq!(
        kinds(&events),
        vec![
            "loaded",
            "started",
            "step_started",
            "step_completed",
            "step_started",
            "step_completed",
            "step_started",
            "step_completed",
            "step_started",
            "step_completed",
            "completed",
        ]
    );
}

#[tokio::test]
async fn user_wait_suspends_until_confirmed() {
    let executor = Arc::new(ScriptedExecutor::default());
    let engine = engine_with(executor.clone());
    let mut rx = engine.subscribe();
    engine
        .load(playbook(vec![
            wait("a"),
            Step::new("login", ActionType::Guide)
                .with_message("Sign in")
                .with_wait_for(WaitFor::User),
            wait("c"),
        ]))
        .unwrap();

    engine.start().await.unwrap();
    assert_eq!(engine.status(), ExecutionStatus::WaitingUser);
    assert_eq!(engine.context().current_step_index, 1);
    let events = drain(&mut rx);
    assert!(events.contains(&PlaybookEvent::WaitingUser {
        step_index: 1,
        message: Some("Sign in".into()),
    }));

    assert!(!engine.pause());
    engine.resume().await.unwrap();
    assert_eq!(engine.status(), ExecutionStatus::WaitingUser);
    assert_eq!(executor.ids(), vec!["a", "login"]);

    engine.user_action(None).await.unwrap();
    assert_eq!(engine.status(), ExecutionStatus::Completed);
    assert_eq!(executor.ids(), vec!["a", "login", "c"]);
}

#[tokio::test]
async fn second_start_is_rejected_while_a_step_is_in_flight() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let executor = Arc::new(ScriptedExecutor {
        block_on: Some(("b".into(), entered.clone(), release.clone())),
        ..Default::default()
    });
    let engine = Arc::new(engine_with(executor.clone()));
    engine
        .load(playbook(vec![wait("a"), wait("b"), wait("c")]))
        .unwrap();

    let runner = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.start().await })
    };
    entered.notified().await;

    assert!(engine.is_running());
    assert!(matches!(
        engine.start().await,
        Err(PlaybookError::AlreadyRunning)
    ));

    // paused mid-step: resuming must not spawn a second loop
    assert!(engine.pause());
    assert!(matches!(
        engine.resume().await,
        Err(PlaybookError::AlreadyRunning)
    ));

    release.notify_one();
    runner.await.unwrap().unwrap();
    assert_eq!(engine.status(), ExecutionStatus::Paused);
    assert_eq!(engine.context().current_step_index, 2);

    engine.resume().await.unwrap();
    assert_eq!(engine.status(), ExecutionStatus::Completed);
    assert_eq!(engine.context().current_step_index, 3);
    assert_eq!(executor.ids(), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn stop_resets_from_any_state() {
    let engine = engine_with(Arc::new(ScriptedExecutor::default()));
    engine
        .load(playbook(vec![
            wait("a"),
            Step::new("b", ActionType::Guide).with_wait_for(WaitFor::User),
        ]))
        .unwrap();
    engine.start().await.unwrap();
    assert_eq!(engine.status(), ExecutionStatus::WaitingUser);

    engine.stop();
    assert_eq!(engine.status(), ExecutionStatus::Idle);
    assert_eq!(engine.context().current_step_index, 0);

    engine.stop();
    assert_eq!(engine.status(), ExecutionStatus::Idle);
}

#[tokio::test]
async fn stop_discards_the_in_flight_step() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let executor = Arc::new(ScriptedExecutor {
        block_on: Some(("a".into(), entered.clone(), release.clone())),
        ..Default::default()
    });
    let engine = Arc::new(engine_with(executor.clone()));
    engine.load(playbook(vec![wait("a"), wait("b")])).unwrap();
    let mut rx = engine.subscribe();

    let runner = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.start().await })
    };
    entered.notified().await;
    engine.stop();
    release.notify_one();
    runner.await.unwrap().unwrap();

    assert_eq!(engine.status(), ExecutionStatus::Idle);
    assert_eq!(engine.context().current_step_index, 0);
    assert_eq!(executor.ids(), vec!["a"]);
    let events = drain(&mut rx);
    assert!(!kinds(&events).contains(&"step_completed"));
    assert!(!engine.is_running());
}

#[tokio::test]
async fn loop_over_non_array_fails_without_running_body() {
    let executor = Arc::new(ScriptedExecutor::default());
    let engine = engine_with(executor.clone());
    engine
        .load(
            playbook(vec![Step::new("each", ActionType::Loop)
                .with_variable("rows")
                .with_steps(vec![wait("inner")])])
            .with_variable("rows", VariableDefinition::new(VariableType::String, "Rows")),
        )
        .unwrap();
    engine.set_variables(json!({"rows": "not a list"}).as_object().cloned().unwrap());

    engine.start().await.unwrap();

    let context = engine.context();
    assert_eq!(context.status, ExecutionStatus::Error);
    assert_eq!(context.current_step_index, 0);
    assert_eq!(
        context.last_error().map(|e| e.message.as_str()),
        Some("Variable rows is not an array")
    );
    assert!(executor.ids().is_empty());
}

#[tokio::test]
async fn loop_exposes_item_and_index_then_cleans_up() {
    let executor = Arc::new(ScriptedExecutor::default());
    let engine = engine_with(executor.clone());
    engine
        .load(playbook(vec![Step::new("each", ActionType::Loop)
            .with_variable("names")
            .with_steps(vec![Step::new("greet", ActionType::Wait).with_value("hi {{_item}}")])]))
        .unwrap();
    engine.set_variables(json!({"names": ["a", "b", "c"]}).as_object().cloned().unwrap());

    engine.start().await.unwrap();
    assert_eq!(engine.status(), ExecutionStatus::Completed);

    let calls = executor.calls.lock().clone();
    assert_eq!(calls.len(), 3);
    for (i, (call, name)) in calls.iter().zip(["a", "b", "c"]).enumerate() {
        assert_eq!(call.index, Some(json!(i)));
        assert_eq!(call.item, Some(json!(name)));
        assert_eq!(call.value.as_deref(), Some(format!("hi {name}").as_str()));
    }
    let variables = engine.context().variables;
    assert!(!variables.contains_key("_item"));
    assert!(!variables.contains_key("_index"));
}

#[tokio::test]
async fn condition_runs_only_the_matching_branch() {
    let branching = || {
        playbook(vec![
            Step::new("check", ActionType::Condition)
                .with_condition("{{count}} > 2 && '{{mode}}' == 'live'")
                .with_then(vec![wait("then-a"), wait("then-b")])
                .with_else(vec![wait("else-a")]),
            Step::new("only-then", ActionType::Condition)
                .with_condition("{{count}} > 100")
                .with_then(vec![wait("never")]),
            wait("after"),
        ])
    };

    let executor = Arc::new(ScriptedExecutor::default());
    let engine = engine_with(executor.clone());
    engine.load(branching()).unwrap();
    engine.set_variables(json!({"count": 3, "mode": "live"}).as_object().cloned().unwrap());
    engine.start().await.unwrap();
    assert_eq!(engine.status(), ExecutionStatus::Completed);
    assert_eq!(executor.ids(), vec!["then-a", "then-b", "after"]);

    let executor = Arc::new(ScriptedExecutor::default());
    let engine = engine_with(executor.clone());
    engine.load(branching()).unwrap();
    engine.set_variables(json!({"count": 1, "mode": "live"}).as_object().cloned().unwrap());
    engine.start().await.unwrap();
    assert_eq!(executor.ids(), vec!["else-a", "after"]);
}

#[tokio::test]
async fn unsafe_condition_takes_the_else_branch() {
    let executor = Arc::new(ScriptedExecutor::default());
    let engine = engine_with(executor.clone());
    engine
        .load(playbook(vec![Step::new("check", ActionType::Condition)
            .with_condition("process.env.HOME")
            .with_then(vec![wait("then")])
            .with_else(vec![wait("else")])]))
        .unwrap();
    engine.start().await.unwrap();
    assert_eq!(executor.ids(), vec!["else"]);
}

#[tokio::test]
async fn on_error_skip_records_and_continues() {
    let executor = Arc::new(ScriptedExecutor::failing("b", usize::MAX));
    let engine = engine_with(executor.clone());
    engine
        .load(playbook(vec![
            wait("a"),
            wait("b").with_on_error(OnError::Skip),
            wait("c"),
        ]))
        .unwrap();
    engine.start().await.unwrap();

    let context = engine.context();
    assert_eq!(context.status, ExecutionStatus::Completed);
    assert_eq!(context.errors.len(), 1);
    assert_eq!(context.errors[0].step_id, "b");
    assert_eq!(executor.ids(), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn on_error_retry_runs_exactly_once_more() {
    let executor = Arc::new(ScriptedExecutor::failing("b", 1));
    let engine = engine_with(executor.clone());
    engine
        .load(playbook(vec![wait("a"), wait("b").with_on_error(OnError::Retry)]))
        .unwrap();
    engine.start().await.unwrap();
    assert_eq!(engine.status(), ExecutionStatus::Completed);
    assert_eq!(executor.ids(), vec!["a", "b", "b"]);
    assert_eq!(engine.context().errors.len(), 1);

    let executor = Arc::new(ScriptedExecutor::failing("b", 5));
    let engine = engine_with(executor.clone());
    engine
        .load(playbook(vec![wait("b").with_on_error(OnError::Retry), wait("c")]))
        .unwrap();
    engine.start().await.unwrap();
    assert_eq!(engine.status(), ExecutionStatus::Error);
    assert_eq!(executor.ids(), vec!["b", "b"]);
    assert_eq!(engine.context().errors.len(), 2);
}

#[tokio::test]
async fn unhandled_error_aborts_without_advancing() {
    let executor = Arc::new(ScriptedExecutor::failing("b", 1));
    let engine = engine_with(executor.clone());
    let mut rx = engine.subscribe();
    engine
        .load(playbook(vec![wait("a"), wait("b"), wait("c")]))
        .unwrap();
    engine.start().await.unwrap();

    let context = engine.context();
    assert_eq!(context.status, ExecutionStatus::Error);
    assert_eq!(context.current_step_index, 1);
    assert_eq!(executor.ids(), vec!["a", "b"]);

    let events = drain(&mut rx);
    match events.last() {
        Some(PlaybookEvent::Error { error }) => {
            assert_eq!(error.step_id, "b");
            assert!(error.message.contains("element not found"));
        }
        other => panic!("expected error event, got {:?}", other),
    }
}

#[tokio::test]
async fn guide_handler_hands_control_to_the_user() {
    let executor = Arc::new(ScriptedExecutor::failing("pay", 1));
    let engine = engine_with(executor.clone());
    let mut rx = engine.subscribe();
    let mut pb = playbook(vec![wait("pay"), wait("done")]);
    pb.error_handlers.push(ErrorHandler {
        pattern: "not found".into(),
        action: ErrorAction::Guide,
        message: Some("Open the payment tab by hand".into()),
    });
    engine.load(pb).unwrap();

    engine.start().await.unwrap();
    assert_eq!(engine.status(), ExecutionStatus::WaitingUser);
    assert!(drain(&mut rx).contains(&PlaybookEvent::WaitingUser {
        step_index: 0,
        message: Some("Open the payment tab by hand".into()),
    }));

    engine.user_action(None).await.unwrap();
    assert_eq!(engine.status(), ExecutionStatus::Completed);
    assert_eq!(executor.ids(), vec!["pay", "done"]);
}

#[tokio::test]
async fn verification_failure_keeps_waiting_with_guidance() {
    let page = Arc::new(FixturePage::new(
        "https://portal.test/login",
        vec![FixtureElement::new("form").with_id("login")],
    ));
    let engine = engine_with(Arc::new(ScriptedExecutor::default())).with_page(page.clone());
    let mut rx = engine.subscribe();
    engine
        .load(playbook(vec![Step::new("login", ActionType::Guide)
            .with_message("Sign in")
            .with_wait_for(WaitFor::User)
            .with_verify(StepVerify {
                success_selector: Some("#dashboard".into()),
                ..Default::default()
            })]))
        .unwrap();
    engine.start().await.unwrap();
    drain(&mut rx);

    engine.user_action(None).await.unwrap();
    assert_eq!(engine.status(), ExecutionStatus::WaitingUser);
    let events = drain(&mut rx);
    assert_eq!(kinds(&events), vec!["verifying", "verify_failed", "waiting_user"]);
    assert_eq!(
        events.last(),
        Some(&PlaybookEvent::WaitingUser {
            step_index: 0,
            message: Some(MANUAL_CONFIRMATION_MESSAGE.into()),
        })
    );

    page.insert(FixtureElement::new("main").with_id("dashboard"));
    engine.user_action(None).await.unwrap();
    assert_eq!(engine.status(), ExecutionStatus::Completed);
    let events = drain(&mut rx);
    assert_eq!(
        kinds(&events),
        vec!["verifying", "verify_success", "completed"]
    );
}

/// Judge that errors, or parks until released and then rejects.
struct StubJudge {
    gate: Option<(Arc<Notify>, Arc<Notify>)>,
}

#[async_trait]
impl PerceptualJudge for StubJudge {
    async fn judge(&self, _request: &JudgeRequest<'_>) -> Result<JudgeVerdict, GateError> {
        match &self.gate {
            Some((entered, release)) => {
                entered.notify_one();
                release.notified().await;
                Ok(JudgeVerdict::fail("still on the login form"))
            }
            None => Err(GateError::Judge("vision service unavailable".into())),
        }
    }

    async fn guidance(&self, _request: &GuidanceRequest<'_>) -> Result<String, GateError> {
        Ok("Press the sign in button".into())
    }
}

fn judged_engine(judge: StubJudge) -> PlaybookEngine {
    let verifier = StepVerifier::new(VerifierConfig {
        structural_timeout: Duration::from_millis(10),
        ..Default::default()
    })
    .with_judge(Arc::new(judge));
    let page = Arc::new(FixturePage::new(
        "https://portal.test/login",
        vec![FixtureElement::new("form").with_id("login")],
    ));
    let engine = engine_with(Arc::new(ScriptedExecutor::default()))
        .with_verifier(Arc::new(verifier))
        .with_page(page);
    engine
        .load(playbook(vec![
            Step::new("login", ActionType::Guide)
                .with_message("Sign in")
                .with_wait_for(WaitFor::User)
                .with_verify(StepVerify {
                    success_selector: Some("#dashboard".into()),
                    ..Default::default()
                }),
            wait("after"),
        ]))
        .unwrap();
    engine
}

#[tokio::test]
async fn verifier_error_does_not_block_the_run() {
    let engine = judged_engine(StubJudge { gate: None });
    let mut rx = engine.subscribe();
    engine.start().await.unwrap();
    assert_eq!(engine.status(), ExecutionStatus::WaitingUser);
    drain(&mut rx);

    engine.user_action(None).await.unwrap();
    assert_eq!(engine.status(), ExecutionStatus::Completed);
    let events = drain(&mut rx);
    assert_eq!(
        kinds(&events),
        vec!["verifying", "step_started", "step_completed", "completed"]
    );
}

#[tokio::test]
async fn skip_during_verification_advances_the_run() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let engine = Arc::new(judged_engine(StubJudge {
        gate: Some((entered.clone(), release.clone())),
    }));
    let mut rx = engine.subscribe();
    engine.start().await.unwrap();
    drain(&mut rx);

    let confirm = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.user_action(None).await })
    };
    entered.notified().await;
    assert_eq!(engine.status(), ExecutionStatus::Verifying);

    engine.skip_verification().await.unwrap();
    release.notify_one();
    confirm.await.unwrap().unwrap();

    assert_eq!(engine.status(), ExecutionStatus::Completed);
    assert_eq!(engine.context().current_step_index, 2);
    let events = drain(&mut rx);
    assert!(!kinds(&events).contains(&"verify_failed"));
    assert_eq!(kinds(&events).last(), Some(&"completed"));
}

#[tokio::test]
async fn start_applies_defaults_and_rejects_missing_variables() {
    let pb = || {
        playbook(vec![wait("a")])
            .with_variable(
                "name",
                VariableDefinition::new(VariableType::String, "Name").required(),
            )
            .with_variable(
                "region",
                VariableDefinition::new(VariableType::String, "Region")
                    .required()
                    .with_default(json!("eu")),
            )
    };

    let engine = engine_with(Arc::new(ScriptedExecutor::default()));
    engine.load(pb()).unwrap();
    match engine.start().await {
        Err(PlaybookError::MissingVariables(names)) => assert_eq!(names, vec!["name"]),
        other => panic!("expected missing variables, got {:?}", other),
    }
    assert_eq!(engine.status(), ExecutionStatus::Idle);
    assert!(!engine.is_running());

    engine.set_variables(json!({"name": "Kim"}).as_object().cloned().unwrap());
    engine.start().await.unwrap();
    assert_eq!(engine.context().variable("region"), Some(&json!("eu")));
    assert_eq!(engine.status(), ExecutionStatus::Completed);
}

#[tokio::test]
async fn blocking_precondition_rejects_start() {
    let executor = Arc::new(ScriptedExecutor::default());
    let engine = engine_with(executor.clone());
    let mut pb = playbook(vec![wait("a")]);
    pb.preconditions = vec![
        Precondition {
            check: "{{logged_in}} == true".into(),
            message: "Log in first".into(),
            action: PreconditionAction::Block,
        },
        Precondition {
            check: "{{cart_size}} > 0".into(),
            message: "Cart is empty".into(),
            action: PreconditionAction::Warn,
        },
    ];
    engine.load(pb).unwrap();
    engine.set_variables(json!({"logged_in": false}).as_object().cloned().unwrap());

    match engine.start().await {
        Err(PlaybookError::PreconditionFailed(message)) => assert_eq!(message, "Log in first"),
        other => panic!("expected precondition failure, got {:?}", other),
    }
    assert!(executor.ids().is_empty());

    engine.set_variables(json!({"logged_in": true}).as_object().cloned().unwrap());
    engine.start().await.unwrap();
    assert_eq!(engine.status(), ExecutionStatus::Completed);
}

#[tokio::test]
async fn extract_stores_data_for_later_steps() {
    let executor = Arc::new(ScriptedExecutor {
        data: HashMap::from([("read".to_string(), json!("A-1001"))]),
        ..Default::default()
    });
    let engine = engine_with(executor.clone());
    engine
        .load(playbook(vec![
            Step::new("read", ActionType::Extract)
                .with_selector("#order")
                .with_variable("order_id"),
            wait("use").with_value("order {{order_id}}"),
        ]))
        .unwrap();
    engine.start().await.unwrap();

    assert_eq!(engine.context().variable("order_id"), Some(&json!("A-1001")));
    let calls = executor.calls.lock().clone();
    assert_eq!(calls[1].value.as_deref(), Some("order A-1001"));
}
