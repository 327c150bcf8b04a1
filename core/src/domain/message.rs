// Copyright (c) 2026 Cadre Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Typed inter-agent messages.
//!
//! The wire form is `{id, sender, receiver, type, body}` where the `body`
//! schema is dictated by `type`; `MessageBody` carries that discrimination
//! as an adjacently tagged union. Messages are immutable once sent.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::task::{Task, TaskStatus};

/// Body of a `task_create` message; mirrors the dispatchable fields of a
/// [`Task`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCreateBody {
    pub task_id: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub assigned_to: String,
    #[serde(default)]
    pub assigned_by: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub deliverables: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskUpdateBody {
    pub task_id: String,
    pub field: String,
    pub old_value: serde_json::Value,
    pub new_value: serde_json::Value,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCompleteBody {
    pub task_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAssignBody {
    pub task_id: String,
    pub new_assignee: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestBody {
    /// Request sub-type, e.g. `task_query` or the catch-all `message`.
    #[serde(rename = "type")]
    pub request_type: String,
    pub content: serde_json::Value,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseBody {
    pub request_id: String,
    pub success: bool,
    #[serde(default)]
    pub content: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationBody {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub priority: String,
}

/// Discriminated message payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum MessageBody {
    TaskCreate(TaskCreateBody),
    TaskUpdate(TaskUpdateBody),
    TaskComplete(TaskCompleteBody),
    TaskAssign(TaskAssignBody),
    Request(RequestBody),
    Response(ResponseBody),
    Notification(NotificationBody),
    System { content: serde_json::Value },
}

impl MessageBody {
    /// Wire name of the variant, matching the serialized `type` field.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::TaskCreate(_) => "task_create",
            Self::TaskUpdate(_) => "task_update",
            Self::TaskComplete(_) => "task_complete",
            Self::TaskAssign(_) => "task_assign",
            Self::Request(_) => "request",
            Self::Response(_) => "response",
            Self::Notification(_) => "notification",
            Self::System { .. } => "system",
        }
    }
}

/// Envelope routed by the mailbox bus; owned by the receiver's mailbox while
/// queued and archived after processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub sender: String,
    pub receiver: String,
    #[serde(flatten)]
    pub body: MessageBody,
}

impl Message {
    pub fn new(sender: impl Into<String>, receiver: impl Into<String>, body: MessageBody) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender: sender.into(),
            receiver: receiver.into(),
            body,
        }
    }

    /// Builds the `task_create` message the orchestrator dispatches to the
    /// task's assignee.
    pub fn task_create(task: &Task) -> Self {
        Self::new(
            "scheduler",
            task.assigned_to.clone(),
            MessageBody::TaskCreate(TaskCreateBody {
                task_id: task.id.clone(),
                title: task.title.clone(),
                description: task.description.clone(),
                assigned_to: task.assigned_to.clone(),
                assigned_by: task.assigned_by.clone(),
                dependencies: task.dependencies.clone(),
                deliverables: task.deliverables.clone(),
                deadline: task.deadline.map(format_deadline),
                metadata: task.metadata.clone(),
            }),
        )
    }

    pub fn request(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        request_type: impl Into<String>,
        content: serde_json::Value,
    ) -> Self {
        Self::new(
            sender,
            receiver,
            MessageBody::Request(RequestBody {
                request_type: request_type.into(),
                content,
                metadata: HashMap::new(),
            }),
        )
    }

    pub fn response(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        request_id: impl Into<String>,
        success: bool,
        content: serde_json::Value,
        error_message: Option<String>,
    ) -> Self {
        Self::new(
            sender,
            receiver,
            MessageBody::Response(ResponseBody {
                request_id: request_id.into(),
                success,
                content,
                error_message,
            }),
        )
    }

    pub fn notification(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
        priority: impl Into<String>,
    ) -> Self {
        Self::new(
            sender,
            receiver,
            MessageBody::Notification(NotificationBody {
                title: title.into(),
                content: content.into(),
                priority: priority.into(),
            }),
        )
    }
}

impl Task {
    /// Reconstructs a task from a `task_create` body on the receiving side.
    ///
    /// The task arrives already assigned, so it enters the agent in the
    /// `assigned` state; priority is not part of the wire body.
    pub fn from_create_body(body: &TaskCreateBody) -> Self {
        let now = Utc::now();
        Self {
            id: body.task_id.clone(),
            title: body.title.clone(),
            description: body.description.clone(),
            assigned_to: body.assigned_to.clone(),
            assigned_by: body.assigned_by.clone(),
            status: TaskStatus::Assigned,
            priority: Default::default(),
            dependencies: body.dependencies.clone(),
            deliverables: body.deliverables.clone(),
            deadline: body
                .deadline
                .as_deref()
                .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
                .map(|d| d.with_timezone(&Utc)),
            created_at: now,
            updated_at: now,
            metadata: body.metadata.clone(),
        }
    }
}

fn format_deadline(deadline: DateTime<Utc>) -> String {
    deadline.to_rfc3339_opts(SecondsFormat::Secs, true)
}
