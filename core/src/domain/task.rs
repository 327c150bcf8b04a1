// Copyright (c) 2026 Cadre Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Task model shared by the scheduler, the agents, and the global state.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a task.
///
/// Transitions flow pending → assigned → processing → {completed | failed};
/// cancelled is terminal. Completed, failed, and cancelled are sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Assigned,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Priority level; the scheduler maintains one FIFO lane per level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Critical,
    High,
    Medium,
    Low,
}

impl TaskPriority {
    /// Lanes in strict dispatch order.
    pub const ORDERED: [TaskPriority; 4] = [
        TaskPriority::Critical,
        TaskPriority::High,
        TaskPriority::Medium,
        TaskPriority::Low,
    ];

    /// Case-insensitive parse; anything unrecognized normalizes to `Medium`.
    pub fn parse_or_default(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Self::Critical,
            "high" => Self::High,
            "low" => Self::Low,
            _ => Self::Medium,
        }
    }
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Medium
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        };
        f.write_str(s)
    }
}

/// A unit of work routed through the scheduler to an agent.
///
/// `assigned_to` empty means the scheduler picks the least-loaded agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub assigned_to: String,
    #[serde(default)]
    pub assigned_by: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub deliverables: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Task {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        assigned_to: impl Into<String>,
        assigned_by: impl Into<String>,
        priority: TaskPriority,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Self::generate_id(),
            title: title.into(),
            description: description.into(),
            assigned_to: assigned_to.into(),
            assigned_by: assigned_by.into(),
            status: TaskStatus::Pending,
            priority,
            dependencies: Vec::new(),
            deliverables: Vec::new(),
            deadline: None,
            created_at: now,
            updated_at: now,
            metadata: HashMap::new(),
        }
    }

    /// Time-ordered unique id: a UTC timestamp prefix keeps ids sortable by
    /// creation time, the uuid suffix keeps them unique within a second.
    pub fn generate_id() -> String {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let suffix = Uuid::new_v4().simple().to_string();
        format!("task_{}_{}", stamp, &suffix[..8])
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_deliverables(mut self, deliverables: Vec<String>) -> Self {
        self.deliverables = deliverables;
        self
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    pub fn has_dependencies(&self) -> bool {
        !self.dependencies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_parses_case_insensitively() {
        assert_eq!(TaskPriority::parse_or_default("Critical"), TaskPriority::Critical);
        assert_eq!(TaskPriority::parse_or_default("HIGH"), TaskPriority::High);
        assert_eq!(TaskPriority::parse_or_default("low"), TaskPriority::Low);
        assert_eq!(TaskPriority::parse_or_default("bogus"), TaskPriority::Medium);
        assert_eq!(TaskPriority::parse_or_default(""), TaskPriority::Medium);
    }

    #[test]
    fn generated_ids_are_unique_and_time_prefixed() {
        let a = Task::generate_id();
        let b = Task::generate_id();
        assert_ne!(a, b);
        assert!(a.starts_with("task_"));
    }

    #[test]
    fn status_transitions_touch_updated_at() {
        let mut task = Task::new("t", "d", "", "scheduler", TaskPriority::Medium);
        let before = task.updated_at;
        task.set_status(TaskStatus::Assigned);
        assert_eq!(task.status, TaskStatus::Assigned);
        assert!(task.updated_at >= before);
    }

    #[test]
    fn terminal_states() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
    }
}
