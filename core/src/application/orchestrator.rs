// Copyright (c) 2026 Cadre Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Agent directory and dispatch sink.
//!
//! The orchestrator hides message construction from the scheduler: running
//! a task is one call that builds the task_create message and routes it to
//! the assignee's mailbox.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::application::agent::Agent;
use crate::application::scheduler::TaskDispatcher;
use crate::domain::message::Message;
use crate::domain::task::Task;
use crate::infrastructure::bus::MailboxBus;

pub struct Orchestrator {
    agents: RwLock<HashMap<String, Arc<Agent>>>,
    bus: Arc<MailboxBus>,
}

impl Orchestrator {
    pub fn new(bus: Arc<MailboxBus>) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            bus,
        }
    }

    pub fn register_agent(&self, agent: Arc<Agent>) {
        self.agents.write().insert(agent.name().to_string(), agent);
    }

    pub fn get_agent(&self, name: &str) -> Option<Arc<Agent>> {
        self.agents.read().get(name).cloned()
    }

    pub fn all_agents(&self) -> Vec<Arc<Agent>> {
        self.agents.read().values().cloned().collect()
    }

    pub fn agent_count(&self) -> usize {
        self.agents.read().len()
    }

    pub async fn send_message(&self, message: Message) -> anyhow::Result<()> {
        self.bus.send(message).await?;
        Ok(())
    }

    pub async fn send_message_to(
        &self,
        sender: &str,
        receiver: &str,
        content: serde_json::Value,
    ) -> anyhow::Result<()> {
        self.bus.send_to(sender, receiver, content).await?;
        Ok(())
    }

    pub fn bus(&self) -> Arc<MailboxBus> {
        Arc::clone(&self.bus)
    }
}

#[async_trait]
impl TaskDispatcher for Orchestrator {
    /// Wraps the task in a task_create message and routes it to the
    /// assignee's mailbox. Fails when the assignee is not registered.
    async fn run_task(&self, task: Task) -> anyhow::Result<()> {
        if self.get_agent(&task.assigned_to).is_none() {
            anyhow::bail!("agent '{}' not found", task.assigned_to);
        }
        self.bus.send(Message::task_create(&task)).await?;
        Ok(())
    }
}
