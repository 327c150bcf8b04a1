// Copyright (c) 2026 Cadre Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Process-wide shared state.
//!
//! One reader-writer lock serializes every mutation; closure mutators run
//! while the write lock is held and must not block. Each mutation bumps an
//! opaque version counter so observers can snapshot optimistically.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::domain::agent::AgentState;
use crate::domain::message::Message;
use crate::domain::task::Task;

#[derive(Default)]
struct StateInner {
    agents: HashMap<String, AgentState>,
    tasks: HashMap<String, Task>,
    messages: Vec<Message>,
    kpis: HashMap<String, f64>,
    announcements: Vec<String>,
    shared: HashMap<String, serde_json::Value>,
    version: u64,
}

/// Concurrent-safe registry of tasks, messages, and per-agent state.
#[derive(Default)]
pub struct GlobalState {
    inner: RwLock<StateInner>,
}

impl GlobalState {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- tasks ----

    pub fn add_task(&self, task: Task) {
        let mut inner = self.inner.write();
        inner.tasks.insert(task.id.clone(), task);
        inner.version += 1;
    }

    pub fn get_task(&self, id: &str) -> Option<Task> {
        self.inner.read().tasks.get(id).cloned()
    }

    pub fn all_tasks(&self) -> Vec<Task> {
        self.inner.read().tasks.values().cloned().collect()
    }

    /// Applies `mutate` to the task under the write lock. An absent id is a
    /// silent no-op: dispatch may race a deletion.
    pub fn update_task(&self, id: &str, mutate: impl FnOnce(&mut Task)) {
        let mut inner = self.inner.write();
        if let Some(task) = inner.tasks.get_mut(id) {
            mutate(task);
            task.updated_at = chrono::Utc::now();
            inner.version += 1;
        }
    }

    pub fn delete_task(&self, id: &str) {
        let mut inner = self.inner.write();
        inner.tasks.remove(id);
        inner.version += 1;
    }

    // ---- agent states ----

    pub fn create_agent_state(&self, name: &str, max_tasks: usize) -> AgentState {
        let state = AgentState::new(name).with_max_tasks(max_tasks);
        let mut inner = self.inner.write();
        inner.agents.insert(name.to_string(), state.clone());
        inner.version += 1;
        state
    }

    pub fn set_agent_state(&self, state: AgentState) {
        let mut inner = self.inner.write();
        inner.agents.insert(state.name.clone(), state);
        inner.version += 1;
    }

    pub fn get_agent_state(&self, name: &str) -> Option<AgentState> {
        self.inner.read().agents.get(name).cloned()
    }

    pub fn all_agent_states(&self) -> Vec<AgentState> {
        self.inner.read().agents.values().cloned().collect()
    }

    pub fn update_agent_state(&self, name: &str, mutate: impl FnOnce(&mut AgentState)) {
        let mut inner = self.inner.write();
        if let Some(state) = inner.agents.get_mut(name) {
            mutate(state);
            inner.version += 1;
        }
    }

    pub fn delete_agent_state(&self, name: &str) {
        let mut inner = self.inner.write();
        inner.agents.remove(name);
        inner.version += 1;
    }

    // ---- message log ----

    pub fn add_message(&self, message: Message) {
        let mut inner = self.inner.write();
        inner.messages.push(message);
        inner.version += 1;
    }

    pub fn messages(&self) -> Vec<Message> {
        self.inner.read().messages.clone()
    }

    pub fn messages_for(&self, receiver: &str) -> Vec<Message> {
        self.inner
            .read()
            .messages
            .iter()
            .filter(|m| m.receiver == receiver)
            .cloned()
            .collect()
    }

    // ---- domain buckets ----

    pub fn set_kpi(&self, key: &str, value: f64) {
        let mut inner = self.inner.write();
        inner.kpis.insert(key.to_string(), value);
        inner.version += 1;
    }

    pub fn get_kpi(&self, key: &str) -> Option<f64> {
        self.inner.read().kpis.get(key).copied()
    }

    pub fn kpis(&self) -> HashMap<String, f64> {
        self.inner.read().kpis.clone()
    }

    pub fn add_announcement(&self, text: impl Into<String>) {
        let mut inner = self.inner.write();
        inner.announcements.push(text.into());
        inner.version += 1;
    }

    pub fn announcements(&self) -> Vec<String> {
        self.inner.read().announcements.clone()
    }

    pub fn set_shared(&self, key: &str, value: serde_json::Value) {
        let mut inner = self.inner.write();
        inner.shared.insert(key.to_string(), value);
        inner.version += 1;
    }

    pub fn get_shared(&self, key: &str) -> Option<serde_json::Value> {
        self.inner.read().shared.get(key).cloned()
    }

    pub fn shared_all(&self) -> HashMap<String, serde_json::Value> {
        self.inner.read().shared.clone()
    }

    /// Current mutation counter, for optimistic snapshotting.
    pub fn version(&self) -> u64 {
        self.inner.read().version
    }
}
