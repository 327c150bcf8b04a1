// Copyright (c) 2026 Cadre Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Bounded single-receiver inbox with an archive ring.
//!
//! The bounded channel gives natural backpressure; the push timeout turns
//! unbounded contention into an observable loss event instead of a
//! deadlock. One consumer (the owning agent) means the inbox itself needs
//! no per-item synchronization.

use std::collections::VecDeque;
use std::sync::{OnceLock, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;

use crate::domain::message::Message;
use crate::infrastructure::bus::{BusError, MailboxBus};

/// Default inbox channel capacity.
pub const DEFAULT_INBOX_CAPACITY: usize = 1000;

/// Archive keeps the most recent processed messages up to this bound.
pub const ARCHIVE_CAP: usize = 1000;

/// A push blocks at most this long before the message is dropped.
pub const PUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("mailbox '{receiver}' is full, message {message_id} dropped")]
    Full { receiver: String, message_id: String },

    #[error("mailbox '{receiver}' is closed")]
    Closed { receiver: String },
}

/// Point-in-time mailbox counters.
#[derive(Debug, Clone, Serialize)]
pub struct MailboxStats {
    pub receiver: String,
    pub inbox_depth: usize,
    pub archive_size: usize,
    pub capacity: usize,
}

/// One agent's mailbox: a bounded inbox channel plus the archive of
/// processed messages.
pub struct Mailbox {
    receiver: String,
    capacity: usize,
    tx: mpsc::Sender<Message>,
    rx: tokio::sync::Mutex<mpsc::Receiver<Message>>,
    archive: Mutex<VecDeque<Message>>,
    // Back-reference to the owning bus, set at registration; weak because
    // the bus owns the mailboxes.
    bus: OnceLock<Weak<MailboxBus>>,
}

impl Mailbox {
    pub fn new(receiver: impl Into<String>) -> Self {
        Self::with_capacity(receiver, DEFAULT_INBOX_CAPACITY)
    }

    pub fn with_capacity(receiver: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            receiver: receiver.into(),
            capacity,
            tx,
            rx: tokio::sync::Mutex::new(rx),
            archive: Mutex::new(VecDeque::new()),
            bus: OnceLock::new(),
        }
    }

    pub(crate) fn attach_bus(&self, bus: Weak<MailboxBus>) {
        let _ = self.bus.set(bus);
    }

    pub fn receiver_name(&self) -> &str {
        &self.receiver
    }

    /// Enqueues a message, waiting up to [`PUSH_TIMEOUT`] for a slot. On
    /// timeout the message is dropped and the caller gets
    /// [`MailboxError::Full`].
    pub async fn push_inbox(&self, message: Message) -> Result<(), MailboxError> {
        match self.tx.send_timeout(message, PUSH_TIMEOUT).await {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendTimeoutError::Timeout(dropped)) => {
                warn!(
                    receiver = %self.receiver,
                    message_id = %dropped.id,
                    sender = %dropped.sender,
                    "mailbox full, message dropped"
                );
                Err(MailboxError::Full {
                    receiver: self.receiver.clone(),
                    message_id: dropped.id,
                })
            }
            Err(mpsc::error::SendTimeoutError::Closed(_)) => Err(MailboxError::Closed {
                receiver: self.receiver.clone(),
            }),
        }
    }

    /// Waits for the next message. `None` means the channel closed and the
    /// drain is complete.
    pub async fn pop_inbox(&self) -> Option<Message> {
        self.rx.lock().await.recv().await
    }

    /// Sends an outgoing message through the owning bus.
    pub async fn push_outbox(&self, message: Message) -> Result<(), BusError> {
        let bus = self
            .bus
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| BusError::NotAttached(self.receiver.clone()))?;
        bus.send(message).await
    }

    /// Appends to the archive, trimming the oldest past [`ARCHIVE_CAP`].
    pub fn archive_message(&self, message: Message) {
        let mut archive = self.archive.lock();
        archive.push_back(message);
        while archive.len() > ARCHIVE_CAP {
            archive.pop_front();
        }
    }

    pub fn archived(&self) -> Vec<Message> {
        self.archive.lock().iter().cloned().collect()
    }

    pub fn stats(&self) -> MailboxStats {
        MailboxStats {
            receiver: self.receiver.clone(),
            inbox_depth: self.capacity - self.tx.capacity(),
            archive_size: self.archive.lock().len(),
            capacity: self.capacity,
        }
    }
}
