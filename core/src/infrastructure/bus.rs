// Copyright (c) 2026 Cadre Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Name-keyed directory of mailboxes.
//!
//! The bus routes a message to its receiver's inbox and records every
//! routed message in the global message log. Registration is one mailbox
//! per name for the lifetime of the process.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::debug;

use crate::domain::message::Message;
use crate::infrastructure::mailbox::{Mailbox, MailboxError};
use crate::infrastructure::state::GlobalState;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("mailbox for '{0}' already registered")]
    AlreadyRegistered(String),

    #[error("no mailbox registered for receiver '{0}'")]
    ReceiverNotFound(String),

    #[error("mailbox '{0}' is not attached to a bus")]
    NotAttached(String),

    #[error(transparent)]
    Mailbox(#[from] MailboxError),
}

/// Routes messages between agents and holds the shared global state.
pub struct MailboxBus {
    mailboxes: RwLock<HashMap<String, Arc<Mailbox>>>,
    global_state: Arc<GlobalState>,
    self_weak: Weak<MailboxBus>,
}

impl MailboxBus {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            mailboxes: RwLock::new(HashMap::new()),
            global_state: Arc::new(GlobalState::new()),
            self_weak: weak.clone(),
        })
    }

    pub fn register_mailbox(&self, name: &str, mailbox: Arc<Mailbox>) -> Result<(), BusError> {
        let mut mailboxes = self.mailboxes.write();
        if mailboxes.contains_key(name) {
            return Err(BusError::AlreadyRegistered(name.to_string()));
        }
        mailbox.attach_bus(self.self_weak.clone());
        mailboxes.insert(name.to_string(), mailbox);
        debug!(name, "mailbox registered");
        Ok(())
    }

    pub fn get_mailbox(&self, name: &str) -> Result<Arc<Mailbox>, BusError> {
        self.mailboxes
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| BusError::ReceiverNotFound(name.to_string()))
    }

    /// Routes `message` to its receiver's inbox. The message lands in the
    /// global log before delivery, so the log also witnesses sends that the
    /// inbox later drops as full.
    pub async fn send(&self, message: Message) -> Result<(), BusError> {
        let mailbox = self.get_mailbox(&message.receiver)?;
        self.global_state.add_message(message.clone());
        mailbox.push_inbox(message).await?;
        Ok(())
    }

    /// Wraps `content` in a request message and sends it.
    pub async fn send_to(
        &self,
        sender: &str,
        receiver: &str,
        content: serde_json::Value,
    ) -> Result<(), BusError> {
        self.send(Message::request(sender, receiver, "message", content))
            .await
    }

    pub fn global_state(&self) -> Arc<GlobalState> {
        Arc::clone(&self.global_state)
    }

    pub fn registered_names(&self) -> Vec<String> {
        self.mailboxes.read().keys().cloned().collect()
    }
}
