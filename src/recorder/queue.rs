//! Bounded hand-off between the record server and whoever consumes
//! recorded commands.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

use crate::parser::Command;

pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueueError {
    #[error("record queue is full ({0} commands)")]
    Full(usize),

    #[error("record queue is closed")]
    Closed,
}

/// Producer side. Cheap to clone; one per connection handler.
#[derive(Debug, Clone)]
pub struct QueueSender {
    tx: mpsc::Sender<Command>,
    capacity: usize,
}

impl QueueSender {
    /// Enqueue without waiting
    pub fn offer(&self, command: Command) -> Result<(), QueueError> {
        self.tx.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::Full(self.capacity),
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })
    }
}

/// Many producers, one consumer
#[derive(Debug, Clone)]
pub struct CommandQueue {
    sender: QueueSender,
    rx: Arc<Mutex<mpsc::Receiver<Command>>>,
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl CommandQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            sender: QueueSender { tx, capacity },
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    pub fn sender(&self) -> QueueSender {
        self.sender.clone()
    }

    pub fn offer(&self, command: Command) -> Result<(), QueueError> {
        self.sender.offer(command)
    }

    /// Wait up to `timeout` for the next command
    pub async fn poll(&self, timeout: Duration) -> Option<Command> {
        let mut rx = self.rx.lock().await;
        tokio::time::timeout(timeout, rx.recv()).await.ok().flatten()
    }

    /// Drop everything queued so far. Returns how many were dropped.
    ///
    /// Never waits: while a consumer is inside [`poll`](Self::poll) the
    /// receiver is busy and this is a no-op returning 0.
    pub fn clear(&self) -> usize {
        let Ok(mut rx) = self.rx.try_lock() else {
            // Consumer is mid-poll
            return 0;
        };
        let mut dropped = 0;
        while rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.sender.capacity - self.sender.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
