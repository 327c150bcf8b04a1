// Copyright (c) 2026 Cadre Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Cron-like timer engine injecting recurring tasks.
//!
//! Jobs are checked on a fixed 30-second tick, so sub-minute intervals are
//! not honored; that resolution is adequate for business-process cadence
//! and keeps the firing rule trivial: fire when never run or when the
//! configured interval has elapsed.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::application::scheduler::AutoScheduler;
use crate::domain::config::TimerConfig;
use crate::domain::task::{Task, TaskPriority, TaskStatus};

/// Fixed tick resolution of the engine.
pub const TIMER_TICK: Duration = Duration::from_secs(30);

/// Runtime form of one configured job template.
#[derive(Debug, Clone)]
pub struct TimerJob {
    pub name: String,
    pub interval: Duration,
    pub target_agent: String,
    pub title: String,
    pub description: String,
    pub priority: TaskPriority,
    pub last_run: Option<DateTime<Utc>>,
    pub enabled: bool,
}

#[derive(Default)]
struct Lifecycle {
    running: bool,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

pub struct TimerEngine {
    jobs: Mutex<Vec<TimerJob>>,
    scheduler: Arc<AutoScheduler>,
    lifecycle: Mutex<Lifecycle>,
}

impl TimerEngine {
    pub fn new(scheduler: Arc<AutoScheduler>, config: Option<&TimerConfig>) -> Self {
        let mut jobs = Vec::new();
        if let Some(config) = config.filter(|c| c.enabled) {
            for job in &config.jobs {
                jobs.push(TimerJob {
                    name: job.name.clone(),
                    interval: job.interval,
                    target_agent: job.target_agent.clone(),
                    title: job.task.title.clone(),
                    description: job.task.description.clone(),
                    priority: job
                        .task
                        .priority
                        .as_deref()
                        .map(TaskPriority::parse_or_default)
                        .unwrap_or_default(),
                    last_run: None,
                    enabled: true,
                });
                info!(job = %job.name, interval = ?job.interval, target = %job.target_agent, "timer job registered");
            }
        }
        Self {
            jobs: Mutex::new(jobs),
            scheduler,
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    pub fn start(self: Arc<Self>) {
        if self.jobs.lock().is_empty() {
            info!("timer engine: no jobs configured, skipping start");
            return;
        }
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.running {
            return;
        }
        lifecycle.running = true;
        lifecycle.token = CancellationToken::new();

        let engine = Arc::clone(&self);
        let token = lifecycle.token.clone();
        lifecycle.handle = Some(tokio::spawn(async move {
            engine.run_loop(token).await;
        }));
        info!(job_count = self.jobs.lock().len(), "timer engine started");
    }

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
        info!("timer engine stopped");
    }

    async fn run_loop(&self, token: CancellationToken) {
        let mut tick = tokio::time::interval(TIMER_TICK);
        // Skip the interval's immediate first tick so jobs first fire one
        // resolution step after startup, not during initialization.
        tick.tick().await;
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tick.tick() => self.check_and_fire(Utc::now()),
            }
        }
    }

    /// Fires every enabled job that has never run or whose interval has
    /// elapsed as of `now`. Public so tests can drive the clock explicitly.
    pub fn check_and_fire(&self, now: DateTime<Utc>) {
        let mut jobs = self.jobs.lock();
        for job in jobs.iter_mut() {
            if !job.enabled {
                continue;
            }
            let due = match job.last_run {
                None => true,
                Some(last) => {
                    let elapsed = now.signed_duration_since(last);
                    elapsed >= chrono::Duration::from_std(job.interval).unwrap_or_else(|_| chrono::Duration::MAX)
                }
            };
            if due {
                self.fire_job(job, now);
                job.last_run = Some(now);
            }
        }
    }

    fn fire_job(&self, job: &TimerJob, now: DateTime<Utc>) {
        let mut task = Task::new(
            &job.title,
            &job.description,
            &job.target_agent,
            "timer_engine",
            job.priority,
        );
        task.status = TaskStatus::Pending;
        task.metadata
            .insert("source".to_string(), serde_json::json!("timer"));
        task.metadata
            .insert("timer_job".to_string(), serde_json::json!(job.name));
        task.metadata
            .insert("fired_at".to_string(), serde_json::json!(now.to_rfc3339()));

        if job.target_agent.is_empty() {
            warn!(job = %job.name, "timer job has no target agent, scheduler will pick one");
        }
        info!(job = %job.name, task_id = %task.id, target = %job.target_agent, "timer job fired");
        self.scheduler.add_task(task, job.priority);
    }

    /// Adds a job at runtime.
    pub fn add_job(&self, job: TimerJob) {
        self.jobs.lock().push(job);
    }

    pub fn jobs(&self) -> Vec<TimerJob> {
        self.jobs.lock().clone()
    }
}
