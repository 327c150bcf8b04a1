// Copyright (c) 2026 Cadre Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Priority-based auto-scheduler.
//!
//! Owns the priority queue and the per-agent load table. The dispatch loop
//! wakes on a fixed tick (or an explicit nudge when a task is enqueued),
//! pulls ready tasks in priority order, and hands them to the least-loaded
//! eligible agent through the dispatcher. Dispatch never blocks on an
//! agent: it only touches load counters and issues a bounded message send.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::queue::PriorityQueue;
use crate::domain::task::{Task, TaskPriority, TaskStatus};
use crate::infrastructure::persistence::SqliteStore;
use crate::infrastructure::state::GlobalState;

/// Default dispatch poll interval.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(5);

/// Dispatch sink; implemented by the orchestrator.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    async fn run_task(&self, task: Task) -> anyhow::Result<()>;
}

/// Scheduler's view of one agent's capacity.
#[derive(Debug, Clone)]
pub struct AgentLoad {
    pub name: String,
    pub max_tasks: usize,
    pub current_load: usize,
    /// Higher rank number = more junior, front-line role; preferred on load
    /// ties.
    pub hierarchy: i32,
}

#[derive(Default)]
struct Lifecycle {
    running: bool,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

pub struct AutoScheduler {
    queue: PriorityQueue,
    loads: RwLock<HashMap<String, AgentLoad>>,
    dispatcher: Arc<dyn TaskDispatcher>,
    global_state: Arc<GlobalState>,
    store: Option<Arc<SqliteStore>>,
    tick_interval: Duration,
    nudge: Notify,
    lifecycle: Mutex<Lifecycle>,
}

impl AutoScheduler {
    pub fn new(
        dispatcher: Arc<dyn TaskDispatcher>,
        global_state: Arc<GlobalState>,
        tick_interval: Option<Duration>,
    ) -> Self {
        Self {
            queue: PriorityQueue::new(),
            loads: RwLock::new(HashMap::new()),
            dispatcher,
            global_state,
            store: None,
            tick_interval: tick_interval
                .filter(|d| !d.is_zero())
                .unwrap_or(DEFAULT_TICK_INTERVAL),
            nudge: Notify::new(),
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    pub fn with_store(mut self, store: Arc<SqliteStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Launches the dispatch loop.
    pub fn start(self: Arc<Self>) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.running {
            return;
        }
        lifecycle.running = true;
        lifecycle.token = CancellationToken::new();

        let scheduler = Arc::clone(&self);
        let token = lifecycle.token.clone();
        lifecycle.handle = Some(tokio::spawn(async move {
            scheduler.run_loop(token).await;
        }));
        info!(tick_interval = ?self.tick_interval, "auto scheduler started");
    }

    /// Stops the dispatch loop and joins it. Idempotent.
    pub async fn stop(&self) {
        let handle = {
            let mut lifecycle = self.lifecycle.lock();
            if !lifecycle.running {
                return;
            }
            lifecycle.running = false;
            lifecycle.token.cancel();
            lifecycle.handle.take()
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        info!("auto scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.lock().running
    }

    async fn run_loop(&self, token: CancellationToken) {
        let mut tick = tokio::time::interval(self.tick_interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tick.tick() => self.dispatch_tasks().await,
                _ = self.nudge.notified() => self.dispatch_tasks().await,
            }
        }
    }

    /// Registers a task under the scheduler at the given priority and in the
    /// global state, then nudges the dispatch loop.
    pub fn add_task(&self, mut task: Task, priority: TaskPriority) {
        task.priority = priority;
        self.global_state.add_task(task.clone());
        if let Some(store) = &self.store {
            let store = Arc::clone(store);
            let snapshot = task.clone();
            tokio::spawn(async move {
                if let Err(e) = store.save_task(&snapshot).await {
                    warn!(task_id = %snapshot.id, error = %e, "failed to persist task");
                }
            });
        }
        debug!(task_id = %task.id, title = %task.title, %priority, "task queued");
        self.queue.enqueue(task);
        self.nudge.notify_one();
    }

    /// Registers an agent's capacity with the load table.
    pub fn add_agent(&self, name: &str, max_tasks: usize, hierarchy: i32) {
        self.loads.write().insert(
            name.to_string(),
            AgentLoad {
                name: name.to_string(),
                max_tasks: max_tasks.max(1),
                current_load: 0,
                hierarchy,
            },
        );
    }

    /// Completion callback fired by agents; releases one unit of the
    /// agent's capacity, clamped at zero.
    pub fn on_task_complete(&self, task_id: &str, agent_name: &str, success: bool) {
        {
            let mut loads = self.loads.write();
            if let Some(load) = loads.get_mut(agent_name) {
                load.current_load = load.current_load.saturating_sub(1);
            }
        }
        info!(
            task_id,
            agent = agent_name,
            status = if success { "completed" } else { "failed" },
            "task finished"
        );
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn queue_len_by_priority(&self, priority: TaskPriority) -> usize {
        self.queue.len_by_priority(priority)
    }

    pub fn agent_load(&self, name: &str) -> Option<AgentLoad> {
        self.loads.read().get(name).cloned()
    }

    /// One dispatch pass: repeat until no ready task can be placed.
    ///
    /// When the selected task has no eligible agent it is requeued at the
    /// tail of its lane and the pass ends, so a pinned blocked task cannot
    /// busy-loop the dispatcher or starve other lanes of their slot order.
    pub async fn dispatch_tasks(&self) {
        let mut failed_this_pass = std::collections::HashSet::new();
        loop {
            let Some(mut task) = self.next_ready() else {
                break;
            };

            // A task that already failed to dispatch this pass gets no second
            // attempt until the next pass.
            if failed_this_pass.contains(&task.id) {
                self.requeue_task(task);
                break;
            }

            let Some(agent_name) = self.pick_agent(&task) else {
                self.requeue_task(task);
                break;
            };

            task.assigned_to = agent_name.clone();
            task.status = TaskStatus::Assigned;
            self.global_state.update_task(&task.id, |t| {
                t.assigned_to = agent_name.clone();
                t.status = TaskStatus::Assigned;
            });

            if let Err(e) = self.dispatcher.run_task(task.clone()).await {
                error!(task_id = %task.id, agent = %agent_name, error = %e, "failed to dispatch task");
                failed_this_pass.insert(task.id.clone());
                self.requeue_task(task);
                continue;
            }

            {
                let mut loads = self.loads.write();
                if let Some(load) = loads.get_mut(&agent_name) {
                    load.current_load += 1;
                }
            }

            info!(task_id = %task.id, title = %task.title, agent = %agent_name, "task dispatched");
        }
    }

    /// Highest-priority task whose dependencies are all completed. Blocked
    /// tasks keep their lane positions.
    fn next_ready(&self) -> Option<Task> {
        self.queue.dequeue_if(|task| self.dependencies_met(task))
    }

    /// A dependency is met only by an existing task in `completed` status;
    /// a missing task counts as unmet.
    fn dependencies_met(&self, task: &Task) -> bool {
        task.dependencies.iter().all(|dep| {
            self.global_state
                .get_task(dep)
                .is_some_and(|t| t.status == TaskStatus::Completed)
        })
    }

    /// Picks the executing agent for `task`.
    ///
    /// A named assignee is honored: the task waits for that agent's
    /// capacity rather than being reassigned. Otherwise the agent with the
    /// lowest load ratio wins, ties broken by the highest hierarchy rank.
    fn pick_agent(&self, task: &Task) -> Option<String> {
        let loads = self.loads.read();

        if !task.assigned_to.is_empty() {
            return loads
                .get(&task.assigned_to)
                .filter(|load| load.current_load < load.max_tasks)
                .map(|load| load.name.clone());
        }

        let mut best: Option<(&AgentLoad, f64)> = None;
        for load in loads.values() {
            if load.current_load >= load.max_tasks {
                continue;
            }
            let ratio = load.current_load as f64 / load.max_tasks as f64;
            let better = match &best {
                None => true,
                Some((current, current_ratio)) => {
                    ratio < *current_ratio
                        || (ratio == *current_ratio && load.hierarchy > current.hierarchy)
                }
            };
            if better {
                best = Some((load, ratio));
            }
        }
        best.map(|(load, _)| load.name.clone())
    }

    /// Returns a task to the tail of its priority lane.
    fn requeue_task(&self, mut task: Task) {
        task.status = TaskStatus::Pending;
        self.queue.enqueue(task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullDispatcher;

    #[async_trait]
    impl TaskDispatcher for NullDispatcher {
        async fn run_task(&self, _task: Task) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct FailingDispatcher;

    #[async_trait]
    impl TaskDispatcher for FailingDispatcher {
        async fn run_task(&self, _task: Task) -> anyhow::Result<()> {
            anyhow::bail!("receiver unreachable")
        }
    }

    fn scheduler(dispatcher: Arc<dyn TaskDispatcher>) -> Arc<AutoScheduler> {
        Arc::new(AutoScheduler::new(
            dispatcher,
            Arc::new(GlobalState::new()),
            None,
        ))
    }

    fn task(title: &str, priority: TaskPriority) -> Task {
        Task::new(title, "", "", "test", priority)
    }

    #[tokio::test]
    async fn load_never_exceeds_cap() {
        let s = scheduler(Arc::new(NullDispatcher));
        s.add_agent("solo", 2, 3);
        for n in 0..5 {
            s.add_task(task(&format!("t{n}"), TaskPriority::Medium), TaskPriority::Medium);
        }
        s.dispatch_tasks().await;

        let load = s.agent_load("solo").unwrap();
        assert_eq!(load.current_load, 2);
        assert_eq!(s.queue_len(), 3);
    }

    #[tokio::test]
    async fn completion_releases_capacity_and_clamps_at_zero() {
        let s = scheduler(Arc::new(NullDispatcher));
        s.add_agent("solo", 1, 3);
        s.add_task(task("t", TaskPriority::High), TaskPriority::High);
        s.dispatch_tasks().await;
        assert_eq!(s.agent_load("solo").unwrap().current_load, 1);

        s.on_task_complete("t", "solo", true);
        assert_eq!(s.agent_load("solo").unwrap().current_load, 0);
        s.on_task_complete("t", "solo", false);
        assert_eq!(s.agent_load("solo").unwrap().current_load, 0);
    }

    #[tokio::test]
    async fn dispatch_error_requeues() {
        let s = scheduler(Arc::new(FailingDispatcher));
        s.add_agent("solo", 3, 3);
        s.add_task(task("t", TaskPriority::Medium), TaskPriority::Medium);
        s.dispatch_tasks().await;

        // The task went back to its lane and no capacity was consumed.
        assert_eq!(s.queue_len_by_priority(TaskPriority::Medium), 1);
        assert_eq!(s.agent_load("solo").unwrap().current_load, 0);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let s = scheduler(Arc::new(NullDispatcher));
        Arc::clone(&s).start();
        assert!(s.is_running());
        s.stop().await;
        s.stop().await;
        assert!(!s.is_running());
    }
}
