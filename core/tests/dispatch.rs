// Copyright (c) 2026 Cadre Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Scheduler dispatch behaviour: load balancing, priority order,
//! dependency gating, and pinned-assignee saturation.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use cadre_core::application::scheduler::{AutoScheduler, TaskDispatcher};
use cadre_core::domain::task::{Task, TaskPriority, TaskStatus};
use cadre_core::infrastructure::state::GlobalState;

/// Records dispatched tasks in order instead of delivering them.
struct RecordingDispatcher {
    dispatched: Mutex<Vec<Task>>,
}

impl RecordingDispatcher {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            dispatched: Mutex::new(Vec::new()),
        })
    }

    fn titles(&self) -> Vec<String> {
        self.dispatched.lock().iter().map(|t| t.title.clone()).collect()
    }

    fn assignees(&self) -> Vec<String> {
        self.dispatched
            .lock()
            .iter()
            .map(|t| t.assigned_to.clone())
            .collect()
    }
}

#[async_trait]
impl TaskDispatcher for RecordingDispatcher {
    async fn run_task(&self, task: Task) -> anyhow::Result<()> {
        self.dispatched.lock().push(task);
        Ok(())
    }
}

fn build(dispatcher: Arc<RecordingDispatcher>) -> (Arc<AutoScheduler>, Arc<GlobalState>) {
    let state = Arc::new(GlobalState::new());
    let scheduler = Arc::new(AutoScheduler::new(dispatcher, Arc::clone(&state), None));
    (scheduler, state)
}

fn task(title: &str, assigned_to: &str, priority: TaskPriority) -> Task {
    Task::new(title, "", assigned_to, "test", priority)
}

// S1: three unassigned medium tasks over two equal agents land within one
// task of each other and empty the queue.
#[tokio::test]
async fn pure_dispatch_balances_load() {
    let dispatcher = RecordingDispatcher::new();
    let (scheduler, _) = build(Arc::clone(&dispatcher));
    scheduler.add_agent("a", 2, 3);
    scheduler.add_agent("b", 2, 3);

    for n in 0..3 {
        scheduler.add_task(
            task(&format!("t{n}"), "", TaskPriority::Medium),
            TaskPriority::Medium,
        );
    }
    scheduler.dispatch_tasks().await;

    assert_eq!(scheduler.queue_len(), 0);
    let load_a = scheduler.agent_load("a").unwrap().current_load;
    let load_b = scheduler.agent_load("b").unwrap().current_load;
    assert_eq!(load_a + load_b, 3);
    assert!(load_a.abs_diff(load_b) <= 1, "loads {load_a}/{load_b} diverge");
    assert_eq!(dispatcher.assignees().len(), 3);
}

// S2: a critical task enqueued behind two low tasks is dispatched first;
// the low tasks follow in FIFO order.
#[tokio::test]
async fn critical_preempts_queued_low_priority() {
    let dispatcher = RecordingDispatcher::new();
    let (scheduler, _) = build(Arc::clone(&dispatcher));
    scheduler.add_agent("a", 3, 3);
    scheduler.add_agent("b", 3, 3);

    scheduler.add_task(task("l1", "", TaskPriority::Low), TaskPriority::Low);
    scheduler.add_task(task("l2", "", TaskPriority::Low), TaskPriority::Low);
    scheduler.add_task(task("c1", "", TaskPriority::Critical), TaskPriority::Critical);
    scheduler.dispatch_tasks().await;

    assert_eq!(dispatcher.titles(), vec!["c1", "l1", "l2"]);
}

// S3: a task whose dependency is not yet completed stays queued; it
// dispatches on the pass after the dependency completes.
#[tokio::test]
async fn dependency_gates_dispatch() {
    let dispatcher = RecordingDispatcher::new();
    let (scheduler, state) = build(Arc::clone(&dispatcher));
    scheduler.add_agent("solo", 2, 3);

    let t1 = task("t1", "", TaskPriority::High);
    let t1_id = t1.id.clone();
    let t2 = task("t2", "", TaskPriority::High).with_dependencies(vec![t1_id.clone()]);

    scheduler.add_task(t1, TaskPriority::High);
    scheduler.add_task(t2, TaskPriority::High);
    scheduler.dispatch_tasks().await;

    assert_eq!(dispatcher.titles(), vec!["t1"]);
    assert_eq!(scheduler.queue_len(), 1);

    // Dependency completes; the next pass releases t2.
    state.update_task(&t1_id, |t| t.status = TaskStatus::Completed);
    scheduler.on_task_complete(&t1_id, "solo", true);
    scheduler.dispatch_tasks().await;

    assert_eq!(dispatcher.titles(), vec!["t1", "t2"]);
    assert_eq!(scheduler.queue_len(), 0);
}

// A dependency on a task id that does not resolve counts as unmet.
#[tokio::test]
async fn missing_dependency_is_conservatively_unmet() {
    let dispatcher = RecordingDispatcher::new();
    let (scheduler, _) = build(Arc::clone(&dispatcher));
    scheduler.add_agent("solo", 2, 3);

    let blocked = task("blocked", "", TaskPriority::High).with_dependencies(vec!["ghost".into()]);
    scheduler.add_task(blocked, TaskPriority::High);
    scheduler.dispatch_tasks().await;

    assert!(dispatcher.titles().is_empty());
    assert_eq!(scheduler.queue_len(), 1);
}

// S5: a task pinned to a saturated agent blocks in place rather than being
// reassigned; a lower-priority unassigned task behind it is not jumped
// ahead within the same pass. Capacity release unblocks them in order.
#[tokio::test]
async fn pinned_task_waits_for_its_agent() {
    let dispatcher = RecordingDispatcher::new();
    let (scheduler, state) = build(Arc::clone(&dispatcher));
    scheduler.add_agent("ceo", 1, 1);

    // Saturate the ceo.
    let warmup = task("warmup", "ceo", TaskPriority::Medium);
    let warmup_id = warmup.id.clone();
    scheduler.add_task(warmup, TaskPriority::Medium);
    scheduler.dispatch_tasks().await;
    assert_eq!(scheduler.agent_load("ceo").unwrap().current_load, 1);

    scheduler.add_task(task("t", "ceo", TaskPriority::Critical), TaskPriority::Critical);
    scheduler.add_task(task("u", "", TaskPriority::Low), TaskPriority::Low);
    scheduler.dispatch_tasks().await;

    // Neither dispatched: t blocks on its named assignee, u is lower
    // priority and the pass ended.
    assert_eq!(dispatcher.titles(), vec!["warmup"]);
    assert_eq!(scheduler.queue_len(), 2);

    // Ceo finishes the warmup task; t goes out on the next pass.
    state.update_task(&warmup_id, |t| t.status = TaskStatus::Completed);
    scheduler.on_task_complete(&warmup_id, "ceo", true);
    scheduler.dispatch_tasks().await;
    assert_eq!(dispatcher.titles(), vec!["warmup", "t"]);

    // And u after t releases the slot.
    scheduler.on_task_complete("t", "ceo", true);
    scheduler.dispatch_tasks().await;
    assert_eq!(dispatcher.titles(), vec!["warmup", "t", "u"]);
    assert_eq!(scheduler.queue_len(), 0);
}

// Ties on load ratio break toward the higher hierarchy rank (the more
// junior, front-line agent).
#[tokio::test]
async fn load_ties_prefer_junior_agents() {
    let dispatcher = RecordingDispatcher::new();
    let (scheduler, _) = build(Arc::clone(&dispatcher));
    scheduler.add_agent("chairman", 2, 0);
    scheduler.add_agent("rd", 2, 5);

    scheduler.add_task(task("t", "", TaskPriority::Medium), TaskPriority::Medium);
    scheduler.dispatch_tasks().await;

    assert_eq!(dispatcher.assignees(), vec!["rd"]);
}
