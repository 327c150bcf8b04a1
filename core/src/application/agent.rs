// Copyright (c) 2026 Cadre Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Agent runtime.
//!
//! Each agent runs two loops: the message loop drains its mailbox and
//! processes one message at a time (serialized per agent, so at most one
//! LLM call is in flight per identity), and the task-generation loop
//! periodically asks the model for new work and submits it to the
//! scheduler. A panic in a handler is caught at the per-message boundary
//! and recorded as a failed execution; the loop keeps going.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::agent::{
    AgentState, ExecutionRecord, ExecutionStats, ExecutionStatus, DEFAULT_MAX_TASKS, HISTORY_CAP,
};
use crate::domain::config::AgentConfig;
use crate::domain::llm::{GenerationOptions, LLMError, LLMProvider};
use crate::domain::message::{Message, MessageBody, RequestBody};
use crate::domain::task::{Task, TaskPriority, TaskStatus};
use crate::infrastructure::bus::{BusError, MailboxBus};
use crate::infrastructure::mailbox::Mailbox;
use crate::infrastructure::persistence::SqliteStore;
use crate::infrastructure::skills::SkillLibrary;
use crate::infrastructure::state::GlobalState;

/// Default self-task-generation cadence.
pub const DEFAULT_TASK_GEN_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// The generation loop waits this long after start before its first run,
/// letting the rest of the system finish initialization.
const STARTUP_GRACE: Duration = Duration::from_secs(10);

/// Budget for one self-generation LLM call.
const GENERATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Bound on the per-agent log of seen messages.
const MESSAGE_LOG_CAP: usize = 1000;

/// Submits a self-generated task to the scheduler.
pub type TaskSubmitter = Arc<dyn Fn(Task, TaskPriority) + Send + Sync>;

/// Notifies the scheduler that a task finished, releasing capacity.
pub type CompletionHook = Arc<dyn Fn(&str, &str, bool) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("agent '{0}' is already running")]
    AlreadyRunning(String),

    #[error("agent '{0}' is not running")]
    NotRunning(String),

    #[error(transparent)]
    Generation(#[from] LLMError),

    #[error(transparent)]
    Bus(#[from] BusError),
}

struct AgentInner {
    current_tasks: Vec<Task>,
    completed_tasks: Vec<Task>,
    messages: Vec<Message>,
    performance_metrics: HashMap<String, f64>,
    last_active: DateTime<Utc>,
    history: VecDeque<ExecutionRecord>,
}

#[derive(Default)]
struct Hooks {
    submitter: Option<TaskSubmitter>,
    on_complete: Option<CompletionHook>,
}

#[derive(Default)]
struct Lifecycle {
    running: bool,
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

pub struct Agent {
    name: String,
    description: String,
    hierarchy: i32,
    max_tasks: usize,
    task_gen_interval: Duration,
    mailbox: Arc<Mailbox>,
    bus: Arc<MailboxBus>,
    global_state: Arc<GlobalState>,
    llm: Arc<dyn LLMProvider>,
    skills: SkillLibrary,
    store: Mutex<Option<Arc<SqliteStore>>>,
    inner: Mutex<AgentInner>,
    hooks: RwLock<Hooks>,
    // Guards only the run state, so "am I running?" checks never contend
    // with task bookkeeping.
    lifecycle: Mutex<Lifecycle>,
}

impl Agent {
    pub fn from_config(
        config: &AgentConfig,
        llm: Arc<dyn LLMProvider>,
        bus: Arc<MailboxBus>,
        skills: SkillLibrary,
    ) -> Arc<Self> {
        let global_state = bus.global_state();
        Arc::new(Self {
            name: config.name.clone(),
            description: config.desc.clone(),
            hierarchy: config.hierarchy,
            max_tasks: config.max_tasks.unwrap_or(DEFAULT_MAX_TASKS).max(1),
            task_gen_interval: config
                .task_gen_interval
                .filter(|d| !d.is_zero())
                .unwrap_or(DEFAULT_TASK_GEN_INTERVAL),
            mailbox: Arc::new(Mailbox::new(&config.name)),
            bus,
            global_state,
            llm,
            skills,
            store: Mutex::new(None),
            inner: Mutex::new(AgentInner {
                current_tasks: Vec::new(),
                completed_tasks: Vec::new(),
                messages: Vec::new(),
                performance_metrics: HashMap::new(),
                last_active: Utc::now(),
                history: VecDeque::new(),
            }),
            hooks: RwLock::new(Hooks::default()),
            lifecycle: Mutex::new(Lifecycle::default()),
        })
    }

    pub fn set_store(&self, store: Arc<SqliteStore>) {
        *self.store.lock() = Some(store);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn global_state(&self) -> Arc<GlobalState> {
        Arc::clone(&self.global_state)
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn hierarchy(&self) -> i32 {
        self.hierarchy
    }

    pub fn max_tasks(&self) -> usize {
        self.max_tasks
    }

    pub fn mailbox(&self) -> Arc<Mailbox> {
        Arc::clone(&self.mailbox)
    }

    pub fn workload(&self) -> usize {
        self.inner.lock().current_tasks.len()
    }

    pub fn set_task_submitter(&self, submitter: TaskSubmitter) {
        self.hooks.write().submitter = Some(submitter);
    }

    pub fn set_completion_hook(&self, hook: CompletionHook) {
        self.hooks.write().on_complete = Some(hook);
    }

    // ---- lifecycle ----

    /// Spawns the message loop and the task-generation loop. Refuses a
    /// second start while running.
    pub fn start(self: Arc<Self>) -> Result<(), AgentError> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.running {
            return Err(AgentError::AlreadyRunning(self.name.clone()));
        }
        lifecycle.running = true;
        lifecycle.token = CancellationToken::new();

        if self.global_state.get_agent_state(&self.name).is_none() {
            self.global_state.create_agent_state(&self.name, self.max_tasks);
        }

        let agent = Arc::clone(&self);
        let token = lifecycle.token.clone();
        lifecycle.handles.push(tokio::spawn(async move {
            agent.message_loop(token).await;
        }));

        let agent = Arc::clone(&self);
        let token = lifecycle.token.clone();
        lifecycle.handles.push(tokio::spawn(async move {
            agent.task_generation_loop(token).await;
        }));

        info!(agent = %self.name, "agent started");
        Ok(())
    }

    /// Stops both loops and joins them. An in-flight task completes before
    /// the message loop exits; no new work is admitted. Idempotent.
    pub async fn stop(&self) {
        let handles = {
            let mut lifecycle = self.lifecycle.lock();
            if !lifecycle.running {
                return;
            }
            lifecycle.running = false;
            lifecycle.token.cancel();
            std::mem::take(&mut lifecycle.handles)
        };
        for handle in handles {
            let _ = handle.await;
        }
        info!(agent = %self.name, "agent stopped");
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.lock().running
    }

    // ---- message loop ----

    async fn message_loop(self: Arc<Self>, token: CancellationToken) {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                received = self.mailbox.pop_inbox() => {
                    let Some(message) = received else { break };
                    self.handle_incoming(message).await;
                }
            }
        }
    }

    /// Records, processes, and archives one message. The handler runs
    /// behind a panic boundary so a misbehaving path cannot kill the loop.
    async fn handle_incoming(&self, message: Message) {
        {
            let mut inner = self.inner.lock();
            inner.messages.push(message.clone());
            if inner.messages.len() > MESSAGE_LOG_CAP {
                inner.messages.remove(0);
            }
            inner.last_active = Utc::now();
        }

        let outcome = std::panic::AssertUnwindSafe(self.dispatch_message(&message))
            .catch_unwind()
            .await;
        if outcome.is_err() {
            error!(agent = %self.name, message_id = %message.id, "message handler panicked");
            let mut record =
                ExecutionRecord::started("", &message.id, "handle_message", HashMap::new());
            record.status = ExecutionStatus::Failed;
            record.error_message = Some("panic in message handler".to_string());
            self.push_history(record);
        }

        self.mailbox.archive_message(message);
    }

    async fn dispatch_message(&self, message: &Message) {
        match &message.body {
            MessageBody::TaskCreate(body) => {
                let task = Task::from_create_body(body);
                if let Err(e) = self.process_task(task).await {
                    warn!(agent = %self.name, task_id = %body.task_id, error = %e, "task processing failed");
                }
            }
            _ => {
                if let Err(e) = self.process_message(message).await {
                    warn!(agent = %self.name, message_id = %message.id, error = %e, "message processing failed");
                }
            }
        }
    }

    // ---- task lifecycle ----

    /// Runs one task end to end: bookkeeping, history record, LLM
    /// execution, state transition, completion callback.
    pub async fn process_task(&self, task: Task) -> Result<(), AgentError> {
        if !self.is_running() {
            return Err(AgentError::NotRunning(self.name.clone()));
        }

        info!(agent = %self.name, task_id = %task.id, title = %task.title, "processing task");

        {
            let mut inner = self.inner.lock();
            inner.current_tasks.push(task.clone());
            inner.last_active = Utc::now();
        }
        self.global_state.update_task(&task.id, |t| {
            t.status = TaskStatus::Assigned;
            t.assigned_to = self.name.clone();
        });
        self.sync_agent_state();

        let mut record = ExecutionRecord::started(
            &task.id,
            "",
            "process_task",
            HashMap::from([
                ("title".to_string(), serde_json::json!(task.title)),
                ("description".to_string(), serde_json::json!(task.description)),
            ]),
        );
        record.dependencies = task.dependencies.clone();
        self.push_history(record.clone());

        self.global_state
            .update_task(&task.id, |t| t.status = TaskStatus::Processing);

        let started = Instant::now();
        let result = self.execute_task(&task).await;
        record.duration = started.elapsed();

        let success = result.is_ok();
        match &result {
            Ok(()) => {
                record.status = ExecutionStatus::Success;
                record.output.insert(
                    "duration_ms".to_string(),
                    serde_json::json!(record.duration.as_millis() as u64),
                );
                {
                    let mut inner = self.inner.lock();
                    if let Some(pos) = inner.current_tasks.iter().position(|t| t.id == task.id) {
                        let mut done = inner.current_tasks.remove(pos);
                        done.status = TaskStatus::Completed;
                        inner.completed_tasks.push(done);
                    }
                    inner.last_active = Utc::now();
                }
                self.global_state
                    .update_task(&task.id, |t| t.status = TaskStatus::Completed);
            }
            Err(e) => {
                // The failed task stays in the current list; only the global
                // status records the terminal failure.
                record.status = ExecutionStatus::Failed;
                record.error_message = Some(e.to_string());
                self.global_state
                    .update_task(&task.id, |t| t.status = TaskStatus::Failed);
            }
        }
        self.sync_agent_state();
        self.update_history(record.clone());
        self.persist_record(record);

        let hook = self.hooks.read().on_complete.clone();
        if let Some(hook) = hook {
            hook(&task.id, &self.name, success);
        }

        result
    }

    async fn execute_task(&self, task: &Task) -> Result<(), AgentError> {
        let mut prompt = String::new();
        if let Some(context) = self.skills.context() {
            prompt.push_str(&context);
            prompt.push('\n');
        }
        prompt.push_str(&format!(
            "Task: {}\nDescription: {}\nPlease complete this task.",
            task.title, task.description
        ));

        let response = self.llm.generate(&prompt, &GenerationOptions::default()).await?;
        info!(
            agent = %self.name,
            task_id = %task.id,
            output = %response.text,
            "task execution output"
        );
        Ok(())
    }

    // ---- non-task messages ----

    pub async fn process_message(&self, message: &Message) -> Result<(), AgentError> {
        if !self.is_running() {
            return Err(AgentError::NotRunning(self.name.clone()));
        }

        match &message.body {
            MessageBody::Request(body) => self.handle_request(message, body).await,
            MessageBody::Notification(body) => {
                info!(
                    agent = %self.name,
                    title = %body.title,
                    content = %body.content,
                    "received notification"
                );
                Ok(())
            }
            MessageBody::Response(body) => {
                info!(
                    agent = %self.name,
                    request_id = %body.request_id,
                    success = body.success,
                    "received response"
                );
                Ok(())
            }
            MessageBody::TaskUpdate(body) => {
                debug!(agent = %self.name, task_id = %body.task_id, field = %body.field, "task update received");
                Ok(())
            }
            MessageBody::TaskComplete(body) => {
                debug!(agent = %self.name, task_id = %body.task_id, success = body.success, "task completion notice");
                Ok(())
            }
            MessageBody::TaskAssign(body) => {
                debug!(agent = %self.name, task_id = %body.task_id, new_assignee = %body.new_assignee, "task reassignment notice");
                Ok(())
            }
            MessageBody::System { content } => self.chat_turn(content).await,
            MessageBody::TaskCreate(_) => Ok(()),
        }
    }

    async fn handle_request(&self, message: &Message, body: &RequestBody) -> Result<(), AgentError> {
        match body.request_type.as_str() {
            "task_query" => {
                let tasks: Vec<serde_json::Value> = {
                    let inner = self.inner.lock();
                    inner
                        .current_tasks
                        .iter()
                        .map(|t| {
                            serde_json::json!({
                                "task_id": t.id,
                                "title": t.title,
                                "status": t.status.to_string(),
                                "priority": t.priority.to_string(),
                            })
                        })
                        .collect()
                };
                let response = Message::response(
                    &self.name,
                    &message.sender,
                    &message.id,
                    true,
                    serde_json::json!({ "tasks": tasks }),
                    None,
                );
                self.bus.send(response).await?;
                Ok(())
            }
            "message" => self.chat_turn(&body.content).await,
            other => {
                debug!(agent = %self.name, request_type = other, "unhandled request type");
                Ok(())
            }
        }
    }

    /// Passes free-form content to the model as a user turn.
    async fn chat_turn(&self, content: &serde_json::Value) -> Result<(), AgentError> {
        let text = match content {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let mut prompt = String::new();
        if let Some(context) = self.skills.context() {
            prompt.push_str(&context);
            prompt.push('\n');
        }
        prompt.push_str(&text);

        let response = self.llm.generate(&prompt, &GenerationOptions::default()).await?;
        info!(agent = %self.name, output = %response.text, "agent response");
        Ok(())
    }

    // ---- self task generation ----

    async fn task_generation_loop(self: Arc<Self>, token: CancellationToken) {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(STARTUP_GRACE) => {}
        }

        let mut tick = tokio::time::interval(self.task_gen_interval);
        // The interval's first tick completes immediately; consume it so the
        // first generation happens one full interval after the grace period.
        tick.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tick.tick() => {
                    let submitter = self.hooks.read().submitter.clone();
                    let Some(submitter) = submitter else { continue };

                    let outcome = tokio::time::timeout(GENERATION_TIMEOUT, self.generate_tasks())
                        .await
                        .unwrap_or_else(|_| {
                            Err(LLMError::Timeout(GENERATION_TIMEOUT.as_secs()).into())
                        });
                    match outcome {
                        Err(e) => {
                            warn!(agent = %self.name, error = %e, "task generation failed");
                        }
                        Ok(tasks) => {
                            for task in tasks {
                                let priority = task.priority;
                                info!(agent = %self.name, task_id = %task.id, title = %task.title, "self-generated task submitted");
                                submitter(task, priority);
                            }
                        }
                    }
                }
            }
        }
    }

    /// Asks the model for 1-3 tasks consistent with this agent's role.
    /// Unparseable output yields an empty list, not an error.
    pub async fn generate_tasks(&self) -> Result<Vec<Task>, AgentError> {
        let prompt = format!(
            "You are {name}. Role description: {desc}\n\n\
             Based on your role, propose 1 to 3 concrete, executable work tasks \
             you should carry out now.\n\n\
             Return strictly a JSON array in the following format, with no other text:\n\
             [{{\"title\": \"task title\", \"description\": \"task description\", \"priority\": \"medium\"}}]\n\n\
             Valid priority values: critical, high, medium, low",
            name = self.name,
            desc = self.description,
        );

        let response = self.llm.generate(&prompt, &GenerationOptions::default()).await?;
        if response.text.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.parse_generated(&response.text))
    }

    fn parse_generated(&self, content: &str) -> Vec<Task> {
        #[derive(serde::Deserialize)]
        struct GeneratedTask {
            title: String,
            #[serde(default)]
            description: String,
            #[serde(default)]
            priority: String,
        }

        let json = extract_json(content);
        let parsed: Vec<GeneratedTask> = match serde_json::from_str(json) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(agent = %self.name, error = %e, content, "failed to parse generated tasks");
                return Vec::new();
            }
        };

        parsed
            .into_iter()
            .filter(|g| !g.title.trim().is_empty())
            .map(|g| {
                Task::new(
                    g.title,
                    g.description,
                    &self.name,
                    &self.name,
                    TaskPriority::parse_or_default(&g.priority),
                )
                .with_metadata("source", serde_json::json!("llm_generated"))
                .with_metadata("generated_by", serde_json::json!(self.name))
            })
            .collect()
    }

    // ---- execution history ----

    fn push_history(&self, record: ExecutionRecord) {
        let mut inner = self.inner.lock();
        while inner.history.len() >= HISTORY_CAP {
            inner.history.pop_front();
        }
        inner.history.push_back(record);
    }

    fn update_history(&self, record: ExecutionRecord) {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner
            .history
            .iter_mut()
            .find(|r| r.execution_id == record.execution_id)
        {
            *existing = record;
        } else {
            inner.history.push_back(record);
        }
    }

    fn persist_record(&self, record: ExecutionRecord) {
        if let Some(store) = self.store.lock().clone() {
            let name = self.name.clone();
            tokio::spawn(async move {
                if let Err(e) = store.save_execution(&name, &record).await {
                    warn!(agent = %name, error = %e, "failed to persist execution record");
                }
            });
        }
    }

    pub fn execution_history(&self) -> Vec<ExecutionRecord> {
        self.inner.lock().history.iter().cloned().collect()
    }

    pub fn history_for_task(&self, task_id: &str) -> Vec<ExecutionRecord> {
        self.inner
            .lock()
            .history
            .iter()
            .filter(|r| r.task_id == task_id)
            .cloned()
            .collect()
    }

    pub fn history_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<ExecutionRecord> {
        self.inner
            .lock()
            .history
            .iter()
            .filter(|r| r.timestamp >= start && r.timestamp <= end)
            .cloned()
            .collect()
    }

    pub fn recent_executions(&self, count: usize) -> Vec<ExecutionRecord> {
        let inner = self.inner.lock();
        let skip = inner.history.len().saturating_sub(count);
        inner.history.iter().skip(skip).cloned().collect()
    }

    pub fn execution_stats(&self) -> ExecutionStats {
        let inner = self.inner.lock();
        ExecutionStats::from_records(inner.history.iter())
    }

    // ---- snapshots ----

    /// Point-in-time copy of this agent's bookkeeping.
    pub fn state_snapshot(&self) -> AgentState {
        let inner = self.inner.lock();
        AgentState {
            name: self.name.clone(),
            current_tasks: inner.current_tasks.clone(),
            completed_tasks: inner.completed_tasks.clone(),
            messages: inner.messages.clone(),
            performance_metrics: inner.performance_metrics.clone(),
            workload: inner.current_tasks.len(),
            last_active: inner.last_active,
            execution_history: inner.history.iter().cloned().collect(),
            max_tasks: self.max_tasks,
        }
    }

    /// Mirrors workload and liveness into the shared global state.
    fn sync_agent_state(&self) {
        let (workload, last_active) = {
            let inner = self.inner.lock();
            (inner.current_tasks.len(), inner.last_active)
        };
        self.global_state.update_agent_state(&self.name, |state| {
            state.workload = workload;
            state.last_active = last_active;
            state.max_tasks = self.max_tasks;
        });
    }
}

/// Extracts a JSON array from model output: fenced blocks first, then the
/// outermost bracket pair.
fn extract_json(content: &str) -> &str {
    if let Some(start) = content.find("```json") {
        let rest = &content[start + 7..];
        if let Some(end) = rest.find("```") {
            return rest[..end].trim();
        }
    }
    if let Some(start) = content.find("```") {
        let mut rest = &content[start + 3..];
        if let Some(newline) = rest.find('\n') {
            rest = &rest[newline + 1..];
        }
        if let Some(end) = rest.find("```") {
            return rest[..end].trim();
        }
    }
    if let (Some(start), Some(end)) = (content.find('['), content.rfind(']')) {
        if end > start {
            return &content[start..=end];
        }
    }
    content
}
