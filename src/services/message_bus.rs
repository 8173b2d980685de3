//! Per-agent mailboxes with broadcast fan-out.
//!
//! The bus is the directory of live mailboxes: constructed when the
//! orchestrator starts and torn down by [`MessageBus::shutdown`]. Delivery is
//! best-effort. A failed send is reported as `false`, never as an error.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::models::{Message, MessageBusConfig, MessagePayload, Recipient, COORDINATOR_ID};

/// Outcome of a blocking receive.
#[derive(Debug, Clone, PartialEq)]
pub enum Received {
    Message(Message),
    /// Nothing arrived within the timeout
    TimedOut,
    /// The caller's cancellation token fired
    Cancelled,
    /// The mailbox is gone (unregistered, or the bus shut down)
    Disconnected,
}

impl Received {
    pub fn into_message(self) -> Option<Message> {
        match self {
            Self::Message(message) => Some(message),
            _ => None,
        }
    }
}

/// Counters exposed by [`MessageBus::stats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MessageBusStats {
    pub registered: usize,
    pub connected: usize,
    pub queued: usize,
    pub delivered: u64,
    pub failed: u64,
    pub broadcasts: u64,
}

struct Mailbox {
    sender: mpsc::Sender<Message>,
    receiver: Mutex<mpsc::Receiver<Message>>,
    connected: AtomicBool,
    closed: CancellationToken,
}

impl Mailbox {
    fn queued(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }
}

/// Directory of agent mailboxes.
pub struct MessageBus {
    mailboxes: RwLock<HashMap<Uuid, Arc<Mailbox>>>,
    config: MessageBusConfig,
    shutdown: CancellationToken,
    delivered: AtomicU64,
    failed: AtomicU64,
    broadcasts: AtomicU64,
}

impl MessageBus {
    pub fn new(config: MessageBusConfig) -> Self {
        Self {
            mailboxes: RwLock::new(HashMap::new()),
            config,
            shutdown: CancellationToken::new(),
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            broadcasts: AtomicU64::new(0),
        }
    }

    /// Create a connected mailbox. Returns false if one already exists or the
    /// bus is shut down.
    pub async fn register_agent(&self, agent_id: Uuid) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }
        let mut mailboxes = self.mailboxes.write().await;
        if mailboxes.contains_key(&agent_id) {
            return false;
        }
        let (sender, receiver) = mpsc::channel(self.config.mailbox_capacity.max(1));
        mailboxes.insert(
            agent_id,
            Arc::new(Mailbox {
                sender,
                receiver: Mutex::new(receiver),
                connected: AtomicBool::new(true),
                closed: self.shutdown.child_token(),
            }),
        );
        tracing::debug!(agent_id = %agent_id, "Mailbox registered");
        true
    }

    /// Destroy a mailbox, dropping queued messages and waking blocked receivers.
    pub async fn unregister_agent(&self, agent_id: Uuid) -> bool {
        let removed = self.mailboxes.write().await.remove(&agent_id);
        match removed {
            Some(mailbox) => {
                mailbox.closed.cancel();
                tracing::debug!(agent_id = %agent_id, dropped = mailbox.queued(), "Mailbox unregistered");
                true
            }
            None => false,
        }
    }

    /// Flip the connection flag. Returns false for an unknown mailbox.
    pub async fn set_connected(&self, agent_id: Uuid, connected: bool) -> bool {
        match self.mailbox(agent_id).await {
            Some(mailbox) => {
                mailbox.connected.store(connected, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub async fn is_connected(&self, agent_id: Uuid) -> bool {
        self.mailbox(agent_id)
            .await
            .is_some_and(|m| m.connected.load(Ordering::SeqCst))
    }

    pub async fn is_registered(&self, agent_id: Uuid) -> bool {
        self.mailboxes.read().await.contains_key(&agent_id)
    }

    /// Connected agent mailboxes, excluding the coordinator's.
    pub async fn online_agents(&self) -> Vec<Uuid> {
        let mailboxes = self.mailboxes.read().await;
        let mut online: Vec<Uuid> = mailboxes
            .iter()
            .filter(|(id, m)| **id != COORDINATOR_ID && m.connected.load(Ordering::SeqCst))
            .map(|(id, _)| *id)
            .collect();
        online.sort();
        online
    }

    /// Deliver to the message's recipient.
    ///
    /// Returns false when the recipient is unknown, disconnected, or its
    /// mailbox is full. A `Broadcast` recipient fans out and returns whether
    /// at least one delivery succeeded.
    pub async fn send(&self, message: Message) -> bool {
        match message.to {
            Recipient::Agent(agent_id) => {
                let delivered = match self.mailbox(agent_id).await {
                    Some(mailbox) => self.deliver(agent_id, &mailbox, message),
                    None => {
                        tracing::debug!(agent_id = %agent_id, "Send to unknown mailbox");
                        false
                    }
                };
                if !delivered {
                    self.failed.fetch_add(1, Ordering::Relaxed);
                }
                delivered
            }
            Recipient::Broadcast => self.broadcast(message.from, message.payload).await > 0,
        }
    }

    /// Best-effort fan-out to every connected agent except the sender and the
    /// coordinator. Returns the number of successful deliveries.
    pub async fn broadcast(&self, from: Uuid, payload: MessagePayload) -> usize {
        let targets: Vec<(Uuid, Arc<Mailbox>)> = {
            let mailboxes = self.mailboxes.read().await;
            mailboxes
                .iter()
                .filter(|(id, _)| **id != from && **id != COORDINATOR_ID)
                .map(|(id, m)| (*id, Arc::clone(m)))
                .collect()
        };

        self.broadcasts.fetch_add(1, Ordering::Relaxed);
        let mut delivered = 0;
        for (agent_id, mailbox) in targets {
            let message = Message::new(from, Recipient::Broadcast, payload.clone());
            if self.deliver(agent_id, &mailbox, message) {
                delivered += 1;
            } else {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
        tracing::debug!(from = %from, kind = %payload.message_type(), delivered, "Broadcast sent");
        delivered
    }

    /// Wait for the next message using the configured timeout.
    pub async fn receive(&self, agent_id: Uuid) -> Received {
        let timeout = Duration::from_millis(self.config.receive_timeout_ms);
        self.receive_with(agent_id, timeout, &CancellationToken::new()).await
    }

    /// Wait for the next message until it arrives, `cancel` fires, the
    /// mailbox closes, or `timeout` elapses.
    pub async fn receive_with(&self, agent_id: Uuid, timeout: Duration, cancel: &CancellationToken) -> Received {
        let Some(mailbox) = self.mailbox(agent_id).await else {
            return Received::Disconnected;
        };

        let next = async {
            let mut receiver = mailbox.receiver.lock().await;
            receiver.recv().await
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => Received::Cancelled,
            () = mailbox.closed.cancelled() => Received::Disconnected,
            message = next => message.map_or(Received::Disconnected, Received::Message),
            () = tokio::time::sleep(timeout) => Received::TimedOut,
        }
    }

    /// Take the next message if one is already queued.
    pub async fn receive_non_blocking(&self, agent_id: Uuid) -> Option<Message> {
        let mailbox = self.mailbox(agent_id).await?;
        let mut receiver = mailbox.receiver.try_lock().ok()?;
        receiver.try_recv().ok()
    }

    pub async fn queue_size(&self, agent_id: Uuid) -> usize {
        self.mailbox(agent_id).await.map_or(0, |m| m.queued())
    }

    /// Drop every queued message. Returns how many were dropped.
    pub async fn clear_queue(&self, agent_id: Uuid) -> usize {
        let Some(mailbox) = self.mailbox(agent_id).await else {
            return 0;
        };
        let mut receiver = mailbox.receiver.lock().await;
        let mut dropped = 0;
        while receiver.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }

    pub async fn stats(&self) -> MessageBusStats {
        let mailboxes = self.mailboxes.read().await;
        MessageBusStats {
            registered: mailboxes.len(),
            connected: mailboxes
                .values()
                .filter(|m| m.connected.load(Ordering::SeqCst))
                .count(),
            queued: mailboxes.values().map(|m| m.queued()).sum(),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
        }
    }

    /// Close every mailbox. Later sends fail and registrations are refused.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let drained = std::mem::take(&mut *self.mailboxes.write().await);
        tracing::info!(mailboxes = drained.len(), "Message bus shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    async fn mailbox(&self, agent_id: Uuid) -> Option<Arc<Mailbox>> {
        self.mailboxes.read().await.get(&agent_id).cloned()
    }

    fn deliver(&self, agent_id: Uuid, mailbox: &Mailbox, message: Message) -> bool {
        if !mailbox.connected.load(Ordering::SeqCst) || mailbox.closed.is_cancelled() {
            tracing::debug!(agent_id = %agent_id, "Recipient disconnected");
            return false;
        }
        let kind = message.message_type();
        match mailbox.sender.try_send(message) {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) => {
                tracing::warn!(agent_id = %agent_id, kind = %kind, "Mailbox full, message dropped");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}
