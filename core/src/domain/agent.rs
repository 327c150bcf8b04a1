//! Per-agent state snapshots and execution history records.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::message::Message;
use crate::domain::task::Task;

/// Default concurrent-task cap for an agent.
pub const DEFAULT_MAX_TASKS: usize = 3;

/// Execution history is ring-bounded at this many records per agent.
pub const HISTORY_CAP: usize = 10_000;

/// Outcome of a single processed task or message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Processing,
    Success,
    Failed,
    Timeout,
}

/// One entry in an agent's execution history ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub message_id: String,
    pub action: String,
    #[serde(default)]
    pub input: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub output: HashMap<String, serde_json::Value>,
    pub status: ExecutionStatus,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl ExecutionRecord {
    pub fn started(
        task_id: impl Into<String>,
        message_id: impl Into<String>,
        action: impl Into<String>,
        input: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            execution_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            task_id: task_id.into(),
            message_id: message_id.into(),
            action: action.into(),
            input,
            output: HashMap::new(),
            status: ExecutionStatus::Processing,
            duration: Duration::ZERO,
            error_message: None,
            dependencies: Vec::new(),
        }
    }
}

/// Aggregate execution statistics for one agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub total_executions: usize,
    pub success_count: usize,
    pub failed_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_execution_at: Option<DateTime<Utc>>,
}

impl ExecutionStats {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a ExecutionRecord>) -> Self {
        let mut stats = Self::default();
        let mut total_duration = Duration::ZERO;
        for record in records {
            stats.total_executions += 1;
            match record.status {
                ExecutionStatus::Success => stats.success_count += 1,
                ExecutionStatus::Failed | ExecutionStatus::Timeout => stats.failed_count += 1,
                ExecutionStatus::Processing => {}
            }
            total_duration += record.duration;
            if stats
                .last_execution_at
                .map_or(true, |last| record.timestamp > last)
            {
                stats.last_execution_at = Some(record.timestamp);
            }
        }
        if stats.total_executions > 0 {
            stats.avg_duration_ms =
                Some((total_duration.as_millis() as u64) / stats.total_executions as u64);
        }
        stats
    }
}

/// Snapshot of a single agent's bookkeeping, as held in the global state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub name: String,
    #[serde(default)]
    pub current_tasks: Vec<Task>,
    #[serde(default)]
    pub completed_tasks: Vec<Task>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub performance_metrics: HashMap<String, f64>,
    pub workload: usize,
    pub last_active: DateTime<Utc>,
    #[serde(default)]
    pub execution_history: Vec<ExecutionRecord>,
    pub max_tasks: usize,
}

impl AgentState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            current_tasks: Vec::new(),
            completed_tasks: Vec::new(),
            messages: Vec::new(),
            performance_metrics: HashMap::new(),
            workload: 0,
            last_active: Utc::now(),
            execution_history: Vec::new(),
            max_tasks: DEFAULT_MAX_TASKS,
        }
    }

    pub fn with_max_tasks(mut self, max_tasks: usize) -> Self {
        self.max_tasks = max_tasks;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_aggregate_outcomes() {
        let mut success = ExecutionRecord::started("t1", "", "process_task", HashMap::new());
        success.status = ExecutionStatus::Success;
        success.duration = Duration::from_millis(100);

        let mut failed = ExecutionRecord::started("t2", "", "process_task", HashMap::new());
        failed.status = ExecutionStatus::Failed;
        failed.duration = Duration::from_millis(300);

        let stats = ExecutionStats::from_records([&success, &failed]);
        assert_eq!(stats.total_executions, 2);
        assert_eq!(stats.success_count, 1);
        assert_eq!(stats.failed_count, 1);
        assert_eq!(stats.avg_duration_ms, Some(200));
        assert!(stats.last_execution_at.is_some());
    }

    #[test]
    fn stats_of_empty_history() {
        let stats = ExecutionStats::from_records(std::iter::empty());
        assert_eq!(stats.total_executions, 0);
        assert_eq!(stats.avg_duration_ms, None);
    }
}
