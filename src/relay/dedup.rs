//! Content-aware suppression of repeated notifications
//!
//! The last transmitted body is tracked per key; an update with a new body
//! (e.g. a message counter) is sent again.

use std::collections::HashMap;
use std::sync::Mutex;

use super::event::NotificationEvent;

#[derive(Debug, Default)]
pub struct DedupTracker {
    sent: Mutex<HashMap<String, String>>,
}

impl DedupTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.sent.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Check and record in one step.
    ///
    /// Returns false when the same key was already sent with the same body.
    pub fn should_send(&self, event: &NotificationEvent) -> bool {
        let mut sent = self.entries();
        match sent.get(&event.key) {
            Some(body) if *body == event.body => false,
            _ => {
                sent.insert(event.key.clone(), event.body.clone());
                true
            }
        }
    }

    /// Forget a key once the notification has been withdrawn
    pub fn on_removed(&self, key: &str) -> bool {
        self.entries().remove(key).is_some()
    }

    /// Undo a record whose transmission failed, unless a newer body replaced it
    pub fn rollback(&self, key: &str, body: &str) {
        let mut sent = self.entries();
        if sent.get(key).map(String::as_str) == Some(body) {
            sent.remove(key);
        }
    }

    pub fn tracked(&self) -> usize {
        self.entries().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_repost_is_suppressed() {
        let tracker = DedupTracker::new();
        let event = NotificationEvent::new("WhatsApp", "Hello", "n1");
        assert!(tracker.should_send(&event));
        assert!(!tracker.should_send(&event.clone()));
    }

    #[test]
    fn test_changed_body_is_sent() {
        let tracker = DedupTracker::new();
        assert!(tracker.should_send(&NotificationEvent::new("Mail", "1 new message", "m")));
        assert!(tracker.should_send(&NotificationEvent::new("Mail", "2 new messages", "m")));
        assert!(!tracker.should_send(&NotificationEvent::new("Mail", "2 new messages", "m")));
    }

    #[test]
    fn test_removal_allows_same_content_again() {
        let tracker = DedupTracker::new();
        let event = NotificationEvent::new("Signal", "Hi", "s1");
        assert!(tracker.should_send(&event));
        assert!(tracker.on_removed("s1"));
        assert!(tracker.should_send(&event));
        assert!(!tracker.on_removed("unknown"));
    }

    #[test]
    fn test_rollback_only_clears_matching_body() {
        let tracker = DedupTracker::new();
        assert!(tracker.should_send(&NotificationEvent::new("a", "first", "k")));
        assert!(tracker.should_send(&NotificationEvent::new("a", "second", "k")));

        tracker.rollback("k", "first");
        assert_eq!(tracker.tracked(), 1);

        tracker.rollback("k", "second");
        assert_eq!(tracker.tracked(), 0);
    }
}
