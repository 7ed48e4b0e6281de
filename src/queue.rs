use std::collections::VecDeque;

use tokio::sync::{Mutex, Notify};

use crate::routes::SubmitMessage;

/// Returned when admission control rejects a submission; carries the message
/// back so the caller can answer the waiting client.
pub struct QueueFull(pub SubmitMessage);

/// Bounded FIFO between the submission route and the grading workers.
///
/// The bound is the admission control for the whole pipeline: once the queue
/// is full, new submissions are turned away at the door instead of piling up
/// behind the sandboxes.
pub struct SubmitQueue {
    queue: Mutex<VecDeque<SubmitMessage>>,
    notify: Notify,
    capacity: usize,
}

impl SubmitQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Admits a submission unless the queue is at capacity.
    pub async fn try_push(&self, message: SubmitMessage) -> Result<(), QueueFull> {
        let mut queue = self.queue.lock().await;
        if queue.len() >= self.capacity {
            return Err(QueueFull(message));
        }
        queue.push_back(message);
        drop(queue);
        self.notify.notify_one();
        Ok(())
    }

    pub async fn pop(&self) -> SubmitMessage {
        loop {
            if let Some(message) = self.queue.lock().await.pop_front() {
                return message;
            }
            self.notify.notified().await;
        }
    }
}
