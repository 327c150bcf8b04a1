// Copyright (c) 2026 Cadre Contributors
// SPDX-License-Identifier: AGPL-3.0

//! HTTP control surface.
//!
//! Read-only introspection of the queue, agents, tasks, and message log,
//! plus message injection and a shutdown trigger. The operator-facing
//! surface degrades with the system: failures show up here as queue growth
//! and failed task statuses, not as crashes.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::application::orchestrator::Orchestrator;
use crate::application::scheduler::AutoScheduler;
use crate::domain::message::Message;
use crate::domain::task::TaskPriority;
use crate::infrastructure::bus::MailboxBus;

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<AutoScheduler>,
    pub orchestrator: Arc<Orchestrator>,
    pub bus: Arc<MailboxBus>,
    /// Cancelled by `/api/shutdown`; the binary watches it to begin the
    /// graceful stop sequence.
    pub shutdown: CancellationToken,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/api/send", post(send))
        .route("/api/status", get(status))
        .route("/api/agents", get(agents))
        .route("/api/tasks", get(tasks))
        .route("/api/messages", get(messages))
        .route("/api/shutdown", post(shutdown))
        .with_state(Arc::new(state))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().timestamp(),
    }))
}

async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.orchestrator.agent_count() == 0 || !state.scheduler.is_running() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "system not initialized" })),
        );
    }
    (
        StatusCode::OK,
        Json(json!({
            "status": "ready",
            "timestamp": chrono::Utc::now().timestamp(),
        })),
    )
}

#[derive(Deserialize)]
struct SendRequest {
    sender: String,
    receiver: String,
    message: String,
}

async fn send(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SendRequest>,
) -> impl IntoResponse {
    if req.sender.is_empty() || req.receiver.is_empty() || req.message.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "sender, receiver, and message are required" })),
        );
    }

    let message = Message::request(&req.sender, &req.receiver, "message", json!(req.message));
    match state.bus.send(message).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": format!("Message sent from {} to {}", req.sender, req.receiver),
            })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

async fn status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let mut priorities = serde_json::Map::new();
    for priority in TaskPriority::ORDERED {
        priorities.insert(
            priority.to_string(),
            json!(state.scheduler.queue_len_by_priority(priority)),
        );
    }

    let agents: Vec<serde_json::Value> = state
        .orchestrator
        .all_agents()
        .iter()
        .map(|agent| {
            json!({
                "name": agent.name(),
                "workload": agent.workload(),
                "running": agent.is_running(),
            })
        })
        .collect();

    Json(json!({
        "scheduler_queue": state.scheduler.queue_len(),
        "priorities": priorities,
        "agents": agents,
    }))
}

async fn agents(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let agents: Vec<serde_json::Value> = state
        .orchestrator
        .all_agents()
        .iter()
        .map(|agent| {
            json!({
                "name": agent.name(),
                "desc": agent.description(),
                "running": agent.is_running(),
                "workload": agent.workload(),
            })
        })
        .collect();

    Json(json!({
        "total": agents.len(),
        "agents": agents,
    }))
}

async fn tasks(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let tasks: Vec<serde_json::Value> = state
        .bus
        .global_state()
        .all_tasks()
        .iter()
        .map(|task| {
            json!({
                "id": task.id,
                "title": task.title,
                "priority": task.priority.to_string(),
                "status": task.status.to_string(),
                "assigned_to": task.assigned_to,
                "created_at": task.created_at.to_rfc3339(),
                "dependencies": task.dependencies,
            })
        })
        .collect();

    Json(json!({ "tasks": tasks }))
}

async fn messages(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let messages = state.bus.global_state().messages();
    Json(json!({ "messages": messages }))
}

async fn shutdown(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    state.shutdown.cancel();
    Json(json!({
        "status": "shutting_down",
        "message": "System is shutting down...",
    }))
}
