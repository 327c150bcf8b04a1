// Copyright (c) 2026 Cadre Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Timer engine firing rules and task tagging.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use cadre_core::application::scheduler::{AutoScheduler, TaskDispatcher};
use cadre_core::application::timer::TimerEngine;
use cadre_core::domain::config::{TimerConfig, TimerJobConfig, TimerTaskConfig};
use cadre_core::domain::task::{Task, TaskPriority};
use cadre_core::infrastructure::state::GlobalState;

struct NullDispatcher;

#[async_trait]
impl TaskDispatcher for NullDispatcher {
    async fn run_task(&self, _task: Task) -> anyhow::Result<()> {
        Ok(())
    }
}

fn engine(interval: Duration) -> (Arc<TimerEngine>, Arc<AutoScheduler>, Arc<GlobalState>) {
    let state = Arc::new(GlobalState::new());
    let scheduler = Arc::new(AutoScheduler::new(
        Arc::new(NullDispatcher),
        Arc::clone(&state),
        None,
    ));
    let config = TimerConfig {
        enabled: true,
        jobs: vec![TimerJobConfig {
            name: "health-sweep".to_string(),
            interval,
            target_agent: "cto".to_string(),
            task: TimerTaskConfig {
                title: "System health sweep".to_string(),
                description: "Check system health".to_string(),
                priority: Some("medium".to_string()),
            },
        }],
    };
    let engine = Arc::new(TimerEngine::new(Arc::clone(&scheduler), Some(&config)));
    (engine, scheduler, state)
}

// S6: a 10-second job checked at three qualifying 30-second ticks injects
// exactly three tasks, each tagged source=timer and bound for the target
// agent.
#[tokio::test]
async fn qualifying_ticks_each_inject_one_task() {
    let (engine, scheduler, state) = engine(Duration::from_secs(10));

    let t0 = Utc::now();
    engine.check_and_fire(t0);
    engine.check_and_fire(t0 + chrono::Duration::seconds(30));
    engine.check_and_fire(t0 + chrono::Duration::seconds(60));

    assert_eq!(scheduler.queue_len(), 3);
    assert_eq!(scheduler.queue_len_by_priority(TaskPriority::Medium), 3);

    let tasks = state.all_tasks();
    assert_eq!(tasks.len(), 3);
    for task in &tasks {
        assert_eq!(task.metadata["source"], serde_json::json!("timer"));
        assert_eq!(task.metadata["timer_job"], serde_json::json!("health-sweep"));
        assert_eq!(task.assigned_to, "cto");
        assert_eq!(task.assigned_by, "timer_engine");
    }
}

// A tick before the interval has elapsed does not fire.
#[tokio::test]
async fn early_tick_does_not_refire() {
    let (engine, scheduler, _) = engine(Duration::from_secs(60));

    let t0 = Utc::now();
    engine.check_and_fire(t0);
    assert_eq!(scheduler.queue_len(), 1);

    engine.check_and_fire(t0 + chrono::Duration::seconds(30));
    assert_eq!(scheduler.queue_len(), 1);

    engine.check_and_fire(t0 + chrono::Duration::seconds(60));
    assert_eq!(scheduler.queue_len(), 2);
}

// Disabled configs register no jobs.
#[tokio::test]
async fn disabled_timer_config_registers_nothing() {
    let state = Arc::new(GlobalState::new());
    let scheduler = Arc::new(AutoScheduler::new(
        Arc::new(NullDispatcher),
        Arc::clone(&state),
        None,
    ));
    let config = TimerConfig {
        enabled: false,
        jobs: vec![],
    };
    let engine = TimerEngine::new(scheduler, Some(&config));
    assert!(engine.jobs().is_empty());
}
