//! End-to-end coordinator behaviour against a scripted model backend

use std::sync::Arc;

use switchboard_core::context::ConversationStore;
use switchboard_core::providers::ChatMessage;
use switchboard_core::testing::MockBackend;
use switchboard_core::{
    AgentDescriptor, Classification, Condition, ConversationContext, Coordinator,
    CoordinatorConfig, DelegationContext, DelegationManager, DelegationPolicy, Message, PolicyRule,
    Response, SwitchboardError, ToolRegistry, Workflow, WorkflowStatus, WorkflowStep,
};

fn is_classification(msgs: &[ChatMessage]) -> bool {
    msgs.first()
        .is_some_and(|m| m.content.contains("message classifier"))
}

fn is_synthesis(msgs: &[ChatMessage]) -> bool {
    msgs.first().is_some_and(|m| m.content.contains("synthesise"))
}

/// Classifies everything as simple/general, synthesises with a fixed reply,
/// and echoes the last line of anything else
fn scripted_backend() -> Arc<MockBackend> {
    Arc::new(MockBackend::new().with_responder(|msgs| {
        if is_classification(msgs) {
            return Some(r#"{"type": "general", "complexity": "simple"}"#.to_string());
        }
        if is_synthesis(msgs) {
            return Some("final answer".to_string());
        }
        let last = msgs.last()?.content.clone();
        let task = last
            .lines()
            .find(|l| l.starts_with("step:"))
            .unwrap_or("reply")
            .to_string();
        Some(task)
    }))
}

fn math_agent() -> AgentDescriptor {
    AgentDescriptor::new("calc", "Calculator")
        .with_role("math specialist")
        .with_tools(["math.calculate"])
}

fn dev_agent() -> AgentDescriptor {
    AgentDescriptor::new("dev", "Developer").with_role("developer")
}

fn pick(id: &'static str) -> impl Fn(&[AgentDescriptor], &ConversationContext) -> Option<String> {
    move |_, _| Some(id.to_string())
}

#[tokio::test]
async fn test_handle_message_delegates_to_math_agent() {
    let backend = scripted_backend();
    let mut coordinator = Coordinator::new(backend.clone(), CoordinatorConfig::default());
    coordinator.add_agent(dev_agent());
    coordinator.add_agent(math_agent());

    let response = coordinator
        .handle_message(Message::user("conv-1", "calculate 2+2"))
        .await
        .unwrap();

    assert!(response.content.contains("[Delegated to Calculator: matched rule 'Mathematical']"));
    assert_eq!(response.metadata["delegated_to"], "calc");
    assert_eq!(response.metadata["delegation"]["rule_id"], "mathematical");

    let summary = coordinator.context_summary("conv-1").await.unwrap();
    assert_eq!(summary.message_count, 1);
    assert_eq!(summary.delegation_count, 1);
    assert_eq!(summary.shared_knowledge["last_delegation"]["agent_id"], "calc");

    let stats = coordinator.get_delegation_stats().await;
    assert_eq!(stats.total, 1);
    assert_eq!(stats.successful, 1);
    assert_eq!(stats.by_target["calc"], 1);
    assert!((stats.success_rate - 1.0).abs() < f64::EPSILON);

    let views = coordinator.delegation_history("conv-1").await;
    assert_eq!(views.len(), 1);
    assert_eq!(serde_json::to_value(&views[0]).unwrap()["status"], "completed");
}

#[tokio::test]
async fn test_failed_delegation_is_recorded_and_returned() {
    let mut coordinator = Coordinator::new(scripted_backend(), CoordinatorConfig::default());
    // Matches the math rule but is not allowed the calculator
    coordinator.add_agent(AgentDescriptor::new("calc", "Calculator").with_role("math"));

    let err = coordinator
        .handle_message(Message::user("conv-1", "calculate 2+2"))
        .await
        .unwrap_err();
    assert!(matches!(err, SwitchboardError::PermissionDenied { .. }));

    let stats = coordinator.get_delegation_stats().await;
    assert_eq!(stats.total, 1);
    assert_eq!(stats.failed, 1);
    let views = coordinator.delegation_history("conv-1").await;
    assert_eq!(serde_json::to_value(&views[0]).unwrap()["status"], "failed");
    assert_eq!(
        coordinator.context_summary("conv-1").await.unwrap().message_count,
        0
    );
}

#[tokio::test]
async fn test_no_matching_rule_answers_locally() {
    let backend = scripted_backend();
    let mut coordinator = Coordinator::new(backend, CoordinatorConfig::default());
    coordinator.add_agent(math_agent());

    let response = coordinator
        .handle_message(Message::user("conv-2", "good morning"))
        .await
        .unwrap();
    assert_eq!(response.content, "reply");
    assert_eq!(response.metadata["agent_id"], "coordinator");
    assert_eq!(coordinator.get_delegation_stats().await.total, 0);
}

#[tokio::test]
async fn test_equal_priority_rules_select_first_declared() {
    let mut policy = DelegationPolicy::empty();
    policy
        .add_rule(PolicyRule::new("first", "First", 8, pick("dev")).with_condition(Condition::keywords(["deploy"])))
        .unwrap();
    policy
        .add_rule(PolicyRule::new("second", "Second", 8, pick("calc")).with_condition(Condition::keywords(["deploy"])))
        .unwrap();

    let agents = vec![dev_agent(), math_agent()];
    let context = ConversationContext::new("conv");
    for _ in 0..5 {
        let decision = policy.evaluate(
            &Message::user("conv", "deploy the service"),
            &Classification::default(),
            &agents,
            &context,
        );
        assert_eq!(decision.rule_id.as_deref(), Some("first"));
        assert_eq!(decision.target_agent_id.as_deref(), Some("dev"));
    }
}

#[tokio::test]
async fn test_zero_agents_never_delegate() {
    let policy = DelegationPolicy::new();
    let context = ConversationContext::new("conv");
    for content in ["calculate 2+2", "debug this code", "write a poem", "help"] {
        let decision = policy.evaluate(
            &Message::user("conv", content),
            &Classification::default(),
            &[],
            &context,
        );
        assert!(!decision.should_delegate, "delegated '{}'", content);
    }
}

#[tokio::test]
async fn test_math_rule_beats_technical_on_shared_keyword() {
    let mut policy = DelegationPolicy::empty();
    policy
        .add_rule(PolicyRule::new("technical", "Technical", 8, pick("dev")).with_condition(Condition::keywords(["calculate"])))
        .unwrap();
    policy
        .add_rule(PolicyRule::new("math", "Math", 9, pick("calc")).with_condition(Condition::keywords(["calculate", "2+2"])))
        .unwrap();

    let decision = policy.evaluate(
        &Message::user("conv", "calculate 2+2"),
        &Classification::default(),
        &[dev_agent(), math_agent()],
        &ConversationContext::new("conv"),
    );
    assert!(decision.should_delegate);
    assert_eq!(decision.rule_id.as_deref(), Some("math"));
    assert_eq!(decision.target_agent_id.as_deref(), Some("calc"));
    assert_eq!(decision.matched_rule_ids, vec!["technical", "math"]);
}

#[tokio::test]
async fn test_confidence_is_clamped() {
    let mut policy = DelegationPolicy::empty();
    policy
        .add_rule(PolicyRule::new("top", "Top", 10, pick("dev")).with_condition(Condition::keywords(["ship"])))
        .unwrap();
    let message = Message::user("conv", "ship it");
    let agents = [dev_agent()];
    let context = ConversationContext::new("conv");

    let single = policy.evaluate(&message, &Classification::default(), &agents, &context);
    assert!((single.confidence - 1.0).abs() < 1e-9);

    policy
        .add_rule(PolicyRule::new("weak", "Weak", 2, pick("dev")).with_condition(Condition::keywords(["ship"])))
        .unwrap();
    let double = policy.evaluate(&message, &Classification::default(), &agents, &context);
    assert_eq!(double.matched_rule_ids.len(), 2);
    assert!((double.confidence - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_context_export_import_round_trip() {
    let mut context = ConversationContext::new("conv-7");
    context.add_participant("user");
    context.set_topic("migration");
    context.add_goal("move to postgres");
    context.add_constraint("zero downtime");
    context.set_shared_knowledge("db", serde_json::json!({"from": "mysql", "to": "postgres"}));
    context.set_metadata("priority", serde_json::json!(1));
    context
        .add_message(Message::user("conv-7", "plan it"), Response::new("plan"), "planner")
        .unwrap();

    let json = serde_json::to_string(&context.export()).unwrap();
    let restored = ConversationContext::import(serde_json::from_str(&json).unwrap());
    assert_eq!(restored.get_context_summary(), context.get_context_summary());
}

#[tokio::test]
async fn test_summary_counts_match_calls() {
    let mut context = ConversationContext::new("conv");
    for i in 0..3 {
        context
            .add_message(Message::user("conv", format!("m{}", i)), Response::new("r"), "a")
            .unwrap();
    }
    // Rejected: wrong conversation
    assert!(context
        .add_message(Message::user("elsewhere", "x"), Response::new("r"), "a")
        .is_err());

    let store = ConversationStore::new();
    store.import(context.export()).await;
    let summary = store.read("conv", |c| c.get_context_summary()).await.unwrap();
    assert_eq!(summary.message_count, 3);
    assert_eq!(summary.delegation_count, 0);
}

fn step(id: &str, agent: &str, deps: &[&str]) -> WorkflowStep {
    WorkflowStep::new(id, agent, format!("step:{}", id)).depends_on(deps.iter().copied())
}

#[tokio::test]
async fn test_workflow_in_dependency_order_completes() {
    let mut coordinator = Coordinator::new(scripted_backend(), CoordinatorConfig::default());
    coordinator.add_agent(dev_agent());
    coordinator
        .add_workflow(
            Workflow::new("pipeline", "Pipeline")
                .with_step(step("s1", "dev", &[]))
                .with_step(step("s2", "dev", &["s1"])),
        )
        .unwrap();

    let execution = coordinator
        .execute_workflow("pipeline", "start", "conv-wf")
        .await
        .unwrap();
    assert_eq!(execution.status, WorkflowStatus::Completed);
    assert_eq!(execution.results.len(), 2);
    assert_eq!(execution.results["s1"], "step:s1");
    assert_eq!(execution.results["s2"], "step:s2");
    assert!(execution.errors.is_empty());
    assert_eq!(execution.output.as_ref().unwrap().content, "final answer");
    assert!(execution.completed_at.is_some());
    assert!(coordinator.get_active_workflows().await.is_empty());
    assert_eq!(coordinator.get_delegation_stats().await.total, 2);
}

#[tokio::test]
async fn test_workflow_out_of_order_fails_on_dependency() {
    let mut coordinator = Coordinator::new(scripted_backend(), CoordinatorConfig::default());
    coordinator.add_agent(dev_agent());
    coordinator
        .add_workflow(
            Workflow::new("reversed", "Reversed")
                .with_step(step("s2", "dev", &["s1"]))
                .with_step(step("s1", "dev", &[])),
        )
        .unwrap();

    let execution = coordinator
        .execute_workflow("reversed", "start", "conv-wf")
        .await
        .unwrap();
    assert_eq!(execution.status, WorkflowStatus::Failed);
    assert!(execution.results.is_empty());
    assert!(execution.errors["s2"].contains("s1"));
    assert_eq!(execution.current_step.as_deref(), Some("s2"));
    assert!(execution.output.is_none());
}

#[tokio::test]
async fn test_workflow_partial_results_survive_failure() {
    let mut coordinator = Coordinator::new(scripted_backend(), CoordinatorConfig::default());
    coordinator.add_agent(dev_agent());
    coordinator
        .add_workflow(
            Workflow::new("partial", "Partial")
                .with_step(step("s1", "dev", &[]))
                .with_step(step("s3", "dev", &["s2"])),
        )
        .unwrap();

    let execution = coordinator.execute_workflow("partial", "go", "c").await.unwrap();
    assert_eq!(execution.status, WorkflowStatus::Failed);
    assert_eq!(execution.results.len(), 1);
    assert!(execution.errors.contains_key("s3"));
}

#[tokio::test]
async fn test_workflow_exit_condition_and_templates() {
    let backend = Arc::new(MockBackend::new().with_responder(|msgs| {
        if is_synthesis(msgs) {
            return Some("summary".to_string());
        }
        let last = &msgs.last()?.content;
        if last.contains("draft") {
            Some("DRAFT READY".to_string())
        } else if last.contains("review DRAFT READY for topic X") {
            Some("Looks good. APPROVED".to_string())
        } else {
            Some("unexpected".to_string())
        }
    }));
    let mut coordinator = Coordinator::new(backend, CoordinatorConfig::default());
    coordinator.add_agent(dev_agent());
    coordinator
        .add_workflow(
            Workflow::new("review", "Review")
                .with_step(WorkflowStep::new("write", "dev", "draft"))
                .with_step(
                    WorkflowStep::new("check", "dev", "")
                        .with_input("review {{steps.write}} for {{input}}")
                        .depends_on(["write"]),
                )
                .with_step(WorkflowStep::new("never", "dev", "polish").depends_on(["check"]))
                .with_exit_condition("approved"),
        )
        .unwrap();

    let execution = coordinator
        .execute_workflow("review", "topic X", "c")
        .await
        .unwrap();
    assert_eq!(execution.status, WorkflowStatus::Completed);
    assert_eq!(execution.results.len(), 2);
    assert_eq!(execution.results["check"], "Looks good. APPROVED");
    assert_eq!(execution.metadata["exit_condition"], "approved");
    assert_eq!(execution.output.unwrap().content, "summary");
}

#[tokio::test]
async fn test_workflow_entry_point_skips_earlier_steps() {
    let mut coordinator = Coordinator::new(scripted_backend(), CoordinatorConfig::default());
    coordinator.add_agent(dev_agent());
    coordinator
        .add_workflow(
            Workflow::new("resume", "Resume")
                .with_step(step("s1", "dev", &[]))
                .with_step(step("s2", "dev", &[]))
                .with_entry_point("s2"),
        )
        .unwrap();
    let execution = coordinator.execute_workflow("resume", "go", "c").await.unwrap();
    assert_eq!(execution.status, WorkflowStatus::Completed);
    assert_eq!(execution.results.keys().collect::<Vec<_>>(), vec!["s2"]);
}

#[tokio::test]
async fn test_workflow_step_required_tools_checked() {
    let mut coordinator = Coordinator::new(scripted_backend(), CoordinatorConfig::default());
    coordinator.add_agent(dev_agent());
    coordinator
        .add_workflow(
            Workflow::new("tools", "Tools")
                .with_step(step("s1", "dev", &[]).with_required_tools(["math.calculate"])),
        )
        .unwrap();
    let execution = coordinator.execute_workflow("tools", "go", "c").await.unwrap();
    assert_eq!(execution.status, WorkflowStatus::Failed);
    assert!(execution.errors["s1"].contains("math.calculate"));

    let stats = coordinator.get_delegation_stats().await;
    assert_eq!(stats.total, 1);
    assert_eq!(stats.failed, 1);
    let history = coordinator.delegation_history("c").await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].to_agent_id, "dev");
}

#[tokio::test]
async fn test_workflow_upstream_output_not_permission_checked() {
    let backend = Arc::new(MockBackend::new().with_responder(|msgs| {
        if is_synthesis(msgs) {
            return Some("final answer".to_string());
        }
        Some("Details are on the website and in the attached file".to_string())
    }));
    let mut coordinator = Coordinator::new(backend, CoordinatorConfig::default());
    coordinator.add_agent(dev_agent());
    coordinator
        .add_workflow(
            Workflow::new("relay", "Relay")
                .with_step(step("s1", "dev", &[]))
                .with_step(step("s2", "dev", &["s1"])),
        )
        .unwrap();

    let execution = coordinator.execute_workflow("relay", "go", "c").await.unwrap();
    assert_eq!(execution.status, WorkflowStatus::Completed, "{:?}", execution.errors);
    assert_eq!(execution.results.len(), 2);
}

#[tokio::test]
async fn test_workflow_synthesis_failure_fails_execution() {
    let backend = Arc::new(
        MockBackend::new()
            .with_responder(|msgs| (!is_synthesis(msgs)).then(|| "step done".to_string()))
            .with_failure("synthesis backend down"),
    );
    let mut coordinator = Coordinator::new(backend, CoordinatorConfig::default());
    coordinator.add_agent(dev_agent());
    coordinator
        .add_workflow(Workflow::new("one", "One").with_step(step("s1", "dev", &[])))
        .unwrap();
    let execution = coordinator.execute_workflow("one", "go", "c").await.unwrap();
    assert_eq!(execution.status, WorkflowStatus::Failed);
    assert_eq!(execution.results.len(), 1);
    assert!(execution.errors.contains_key("synthesis"));
}

#[tokio::test]
async fn test_permission_denied_before_any_model_call() {
    let backend = Arc::new(MockBackend::new());
    let store = Arc::new(ConversationStore::new());
    let manager = DelegationManager::new(Arc::new(ToolRegistry::with_builtins(vec![])), store.clone());
    let agent = switchboard_core::Agent::new(
        AgentDescriptor::new("offline", "Offline Agent"),
        backend.clone(),
        "model",
    );
    let message = Message::user("conv-net", "fetch this url");

    let err = manager
        .delegate(&agent, &message, &DelegationContext::new("coordinator", message.clone()))
        .await
        .unwrap_err();

    assert!(matches!(err, SwitchboardError::PermissionDenied { .. }));
    assert_eq!(backend.calls(), 0);
    let history = store
        .read("conv-net", |c| c.get_delegation_history())
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert!(!history[0].success);
}
