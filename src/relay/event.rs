//! Notification and reply models exchanged with the peer

use serde::{Deserialize, Serialize};

/// A notification observed on the device, ready to be relayed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    /// Application label (falls back to the package name)
    pub app_name: String,
    /// Conversation or contact the notification came from
    pub sender: Option<String>,
    /// Visible body text
    pub body: String,
    /// Raw icon image bytes (PNG)
    pub icon: Option<Vec<u8>>,
    /// Platform notification key, stable for the lifetime of one notification
    pub key: String,
}

impl NotificationEvent {
    /// Create an event without sender or icon
    pub fn new(
        app_name: impl Into<String>,
        body: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            sender: None,
            body: body.into(),
            icon: None,
            key: key.into(),
        }
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    /// Attach an icon; an empty buffer is treated as no icon
    pub fn with_icon(mut self, icon: Vec<u8>) -> Self {
        self.icon = if icon.is_empty() { None } else { Some(icon) };
        self
    }
}

/// Reply typed on the desktop for a given notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyMessage {
    /// Key of the notification being answered
    pub key: String,
    /// Text to submit into the inline-reply action
    pub reply: String,
}

impl ReplyMessage {
    pub fn new(key: impl Into<String>, reply: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            reply: reply.into(),
        }
    }
}
