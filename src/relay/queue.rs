//! Outbound buffer for notifications produced before a peer connects

use std::collections::VecDeque;
use tokio::sync::Mutex;

use super::error::Result;
use super::event::NotificationEvent;

/// Destination for a queue drain
#[async_trait::async_trait]
pub trait EventSink: Send {
    async fn send_event(&mut self, event: &NotificationEvent) -> Result<()>;
}

/// FIFO of notifications waiting for a connected session
#[derive(Debug, Default)]
pub struct PendingQueue {
    events: Mutex<VecDeque<NotificationEvent>>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event at the tail
    pub async fn enqueue(&self, event: NotificationEvent) {
        let mut events = self.events.lock().await;
        events.push_back(event);
        tracing::debug!(queued = events.len(), "Notification queued until a peer connects");
    }

    pub async fn len(&self) -> usize {
        self.events.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.lock().await.is_empty()
    }

    /// Keys of the queued events in send order
    pub async fn keys(&self) -> Vec<String> {
        self.events
            .lock()
            .await
            .iter()
            .map(|event| event.key.clone())
            .collect()
    }

    /// Send every queued event in FIFO order, then clear the queue.
    ///
    /// The queue lock is held for the whole drain so no producer can slip an
    /// event in between. On the first failed send the remaining events are
    /// dropped together with the failed one and the error is returned.
    pub async fn drain_to<S: EventSink + ?Sized>(&self, sink: &mut S) -> Result<usize> {
        let mut events = self.events.lock().await;
        let mut sent = 0;
        while let Some(event) = events.pop_front() {
            if let Err(e) = sink.send_event(&event).await {
                let dropped = events.len() + 1;
                events.clear();
                tracing::warn!(
                    sent,
                    dropped,
                    key = %event.key,
                    "Queue drain interrupted, dropping remaining notifications: {}",
                    e
                );
                return Err(e);
            }
            sent += 1;
        }
        Ok(sent)
    }
}
