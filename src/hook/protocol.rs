//! Protocol definitions for hook messages

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Notification lifecycle events reported by the platform hook
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HookMessage {
    /// A notification was posted or updated
    Posted {
        /// Platform notification key
        key: String,
        /// Package of the notifying app
        package: String,
        /// Human readable app name (falls back to the package)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        app_label: Option<String>,
        /// Conversation title or sender
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender: Option<String>,
        /// Notification text
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        /// PNG file with the app icon
        #[serde(default, skip_serializing_if = "Option::is_none")]
        icon_path: Option<PathBuf>,
        /// Token of the notification's reply action, if it has one
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_handle: Option<String>,
    },
    /// A notification was withdrawn
    Removed {
        key: String,
    },
}

impl HookMessage {
    pub fn key(&self) -> &str {
        match self {
            HookMessage::Posted { key, .. } => key,
            HookMessage::Removed { key } => key,
        }
    }
}
