// Copyright (c) 2026 Cadre Contributors
// SPDX-License-Identifier: AGPL-3.0

//! End-to-end flow: scheduler dispatch through the orchestrator and bus
//! into a running agent backed by a mock model.

use std::sync::Arc;
use std::time::Duration;

use cadre_core::application::agent::Agent;
use cadre_core::application::orchestrator::Orchestrator;
use cadre_core::application::scheduler::{AutoScheduler, TaskDispatcher};
use cadre_core::domain::config::AgentConfig;
use cadre_core::domain::llm::LLMError;
use cadre_core::domain::message::Message;
use cadre_core::domain::task::{Task, TaskPriority, TaskStatus};
use cadre_core::infrastructure::bus::MailboxBus;
use cadre_core::infrastructure::llm::mock::MockProvider;
use cadre_core::infrastructure::skills::SkillLibrary;

struct Harness {
    bus: Arc<MailboxBus>,
    orchestrator: Arc<Orchestrator>,
    scheduler: Arc<AutoScheduler>,
    agents: Vec<Arc<Agent>>,
}

fn agent_config(name: &str, hierarchy: i32, max_tasks: usize) -> AgentConfig {
    AgentConfig {
        name: name.to_string(),
        desc: format!("{name} of the company"),
        model: "mock".to_string(),
        temperature: None,
        hierarchy,
        skill_dir: None,
        task_gen_interval: None,
        max_tasks: Some(max_tasks),
    }
}

fn build(names: &[(&str, Arc<MockProvider>)]) -> Harness {
    let bus = MailboxBus::new();
    let orchestrator = Arc::new(Orchestrator::new(Arc::clone(&bus)));
    let scheduler = Arc::new(AutoScheduler::new(
        Arc::clone(&orchestrator) as Arc<dyn TaskDispatcher>,
        bus.global_state(),
        None,
    ));

    let mut agents = Vec::new();
    for (idx, (name, mock)) in names.iter().enumerate() {
        let config = agent_config(name, idx as i32 + 1, 2);
        let llm: Arc<dyn cadre_core::domain::llm::LLMProvider> = Arc::clone(mock) as Arc<dyn cadre_core::domain::llm::LLMProvider>;
        let agent = Agent::from_config(&config, llm, Arc::clone(&bus), SkillLibrary::empty());
        bus.register_mailbox(agent.name(), agent.mailbox()).unwrap();
        orchestrator.register_agent(Arc::clone(&agent));
        scheduler.add_agent(agent.name(), agent.max_tasks(), agent.hierarchy());

        let complete_target = Arc::clone(&scheduler);
        agent.set_completion_hook(Arc::new(move |task_id: &str, agent_name: &str, success: bool| {
            complete_target.on_task_complete(task_id, agent_name, success);
        }));

        Arc::clone(&agent).start().unwrap();
        agents.push(agent);
    }

    Harness {
        bus,
        orchestrator,
        scheduler,
        agents,
    }
}

async fn wait_for_status(harness: &Harness, task_id: &str, status: TaskStatus) -> bool {
    for _ in 0..200 {
        if harness
            .bus
            .global_state()
            .get_task(task_id)
            .is_some_and(|t| t.status == status)
        {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn dispatched_task_completes_and_releases_capacity() {
    let mock = Arc::new(MockProvider::new());
    let harness = build(&[("rd", Arc::clone(&mock))]);

    let task = Task::new("fix flaky test", "stabilize CI", "", "user", TaskPriority::High);
    let task_id = task.id.clone();
    let version_before = harness.bus.global_state().version();

    harness.scheduler.add_task(task, TaskPriority::High);
    harness.scheduler.dispatch_tasks().await;

    assert!(wait_for_status(&harness, &task_id, TaskStatus::Completed).await);

    // Capacity released after the completion hook ran.
    for _ in 0..200 {
        if harness.scheduler.agent_load("rd").unwrap().current_load == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(harness.scheduler.agent_load("rd").unwrap().current_load, 0);

    // The queue no longer holds the completed task.
    assert_eq!(harness.scheduler.queue_len(), 0);

    // The agent saw exactly one message and archived it once.
    let agent = &harness.agents[0];
    assert_eq!(agent.mailbox().stats().archive_size, 1);
    assert_eq!(agent.execution_stats().success_count, 1);

    // Every mutation along the way bumped the version.
    assert!(harness.bus.global_state().version() > version_before);

    for agent in &harness.agents {
        agent.stop().await;
    }
}

#[tokio::test]
async fn llm_failure_marks_task_failed_but_agent_survives() {
    let mock = Arc::new(MockProvider::new());
    mock.push_error(LLMError::Provider("model offline".to_string()));
    let harness = build(&[("rd", Arc::clone(&mock))]);

    let task = Task::new("doomed", "will fail", "", "user", TaskPriority::Medium);
    let task_id = task.id.clone();
    harness.scheduler.add_task(task, TaskPriority::Medium);
    harness.scheduler.dispatch_tasks().await;

    assert!(wait_for_status(&harness, &task_id, TaskStatus::Failed).await);

    // The agent keeps running and can take another task.
    let agent = &harness.agents[0];
    assert!(agent.is_running());

    let retry = Task::new("recovery", "should work", "", "user", TaskPriority::Medium);
    let retry_id = retry.id.clone();
    harness.scheduler.add_task(retry, TaskPriority::Medium);
    harness.scheduler.dispatch_tasks().await;
    assert!(wait_for_status(&harness, &retry_id, TaskStatus::Completed).await);

    for agent in &harness.agents {
        agent.stop().await;
    }
}

#[tokio::test]
async fn direct_messages_bypass_the_scheduler() {
    let mock = Arc::new(MockProvider::new());
    let harness = build(&[("ceo", Arc::clone(&mock)), ("cto", Arc::new(MockProvider::new()))]);

    harness
        .orchestrator
        .send_message_to("ceo", "cto", serde_json::json!("sync on the roadmap"))
        .await
        .unwrap();

    // The message reaches the cto's archive without touching the queue.
    for _ in 0..200 {
        if harness.agents[1].mailbox().stats().archive_size == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(harness.agents[1].mailbox().stats().archive_size, 1);
    assert_eq!(harness.scheduler.queue_len(), 0);
    assert_eq!(harness.bus.global_state().messages_for("cto").len(), 1);

    for agent in &harness.agents {
        agent.stop().await;
    }
}

/// Panics on every generation, to exercise the per-message panic boundary.
struct PanickingProvider;

#[async_trait::async_trait]
impl cadre_core::domain::llm::LLMProvider for PanickingProvider {
    async fn generate(
        &self,
        _prompt: &str,
        _options: &cadre_core::domain::llm::GenerationOptions,
    ) -> Result<cadre_core::domain::llm::GenerationResponse, LLMError> {
        panic!("handler blew up");
    }

    async fn health_check(&self) -> Result<(), LLMError> {
        Ok(())
    }
}

#[tokio::test]
async fn panicking_handler_does_not_kill_the_message_loop() {
    let bus = MailboxBus::new();
    let config = agent_config("ops", 4, 2);
    let agent = Agent::from_config(
        &config,
        Arc::new(PanickingProvider),
        Arc::clone(&bus),
        SkillLibrary::empty(),
    );
    bus.register_mailbox("ops", agent.mailbox()).unwrap();
    Arc::clone(&agent).start().unwrap();

    // A system message routes straight into the LLM path, which panics.
    bus.send(Message::new(
        "user",
        "ops",
        cadre_core::domain::message::MessageBody::System {
            content: serde_json::json!("hello"),
        },
    ))
    .await
    .unwrap();

    // The loop survives: the message is archived and a failed history
    // entry records the panic.
    for _ in 0..200 {
        if agent.mailbox().stats().archive_size == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(agent.mailbox().stats().archive_size, 1);
    assert!(agent.is_running());
    let history = agent.execution_history();
    assert!(history
        .iter()
        .any(|r| r.error_message.as_deref() == Some("panic in message handler")));

    // And it still accepts further traffic.
    bus.send(Message::notification("user", "ops", "ping", "still there?", "low"))
        .await
        .unwrap();
    for _ in 0..200 {
        if agent.mailbox().stats().archive_size == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(agent.mailbox().stats().archive_size, 2);

    agent.stop().await;
}

#[tokio::test]
async fn task_query_request_gets_a_response() {
    let mock = Arc::new(MockProvider::new());
    let harness = build(&[("rd", Arc::clone(&mock))]);

    // A requester that is not an agent still needs a mailbox to receive the
    // response.
    let requester = Arc::new(cadre_core::infrastructure::mailbox::Mailbox::new("console"));
    harness
        .bus
        .register_mailbox("console", Arc::clone(&requester))
        .unwrap();

    let query = Message::request("console", "rd", "task_query", serde_json::json!({}));
    let query_id = query.id.clone();
    harness.bus.send(query).await.unwrap();

    let response = tokio::time::timeout(Duration::from_secs(5), requester.pop_inbox())
        .await
        .expect("no response within deadline")
        .expect("mailbox closed");

    match response.body {
        cadre_core::domain::message::MessageBody::Response(body) => {
            assert_eq!(body.request_id, query_id);
            assert!(body.success);
            assert!(body.content["tasks"].is_array());
        }
        other => panic!("expected response body, got {other:?}"),
    }

    for agent in &harness.agents {
        agent.stop().await;
    }
}
