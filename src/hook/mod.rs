//! Notification hook ingress
//!
//! The platform hook (a notification listener helper, a D-Bus monitor, or the
//! `notify` subcommand) reports posted and removed notifications over a Unix
//! domain socket. Messages are applied to the [`RelayManager`] in arrival order.

pub mod client;
pub mod protocol;
pub mod server;
pub mod sink;

pub use client::send_hook_message;
pub use protocol::HookMessage;
pub use server::run_listener;
pub use sink::{sink_from_config, CommandSink, LogSink};

use std::path::Path;
use tokio::sync::mpsc;

use crate::app::config::RelayConfig;
use crate::relay::{NotificationEvent, RelayManager, ReplyHandle, SendOutcome};

/// Turn a `posted` message into an event, filling in the fallbacks
pub async fn build_event(
    key: String,
    package: &str,
    app_label: Option<String>,
    sender: Option<String>,
    content: Option<String>,
    icon_path: Option<&Path>,
    config: &RelayConfig,
) -> NotificationEvent {
    let app_name = app_label
        .filter(|label| !label.is_empty())
        .unwrap_or_else(|| package.to_string());
    let body = content
        .filter(|text| !text.is_empty())
        .unwrap_or_else(|| config.default_content.clone());

    let mut event = NotificationEvent::new(app_name, body, key);
    if let Some(sender) = sender.filter(|s| !s.is_empty()) {
        event = event.with_sender(sender);
    }
    if let Some(path) = icon_path {
        match tokio::fs::read(path).await {
            Ok(icon) => event = event.with_icon(icon),
            Err(e) => {
                tracing::warn!(key = %event.key, "Icon unavailable at {}: {}", path.display(), e)
            }
        }
    }
    event
}

/// Apply one hook message to the manager
pub async fn dispatch(manager: &RelayManager, message: HookMessage, config: &RelayConfig) {
    match message {
        HookMessage::Posted {
            key,
            package,
            app_label,
            sender,
            content,
            icon_path,
            reply_handle,
        } => {
            let handle = reply_handle
                .filter(|_| config.accepts_replies_from(&package))
                .map(ReplyHandle::new);
            let event = build_event(
                key,
                &package,
                app_label,
                sender,
                content,
                icon_path.as_deref(),
                config,
            )
            .await;

            let key = event.key.clone();
            match manager.on_notification_posted(event, handle).await {
                SendOutcome::Failed(e) => tracing::warn!(%key, %package, "Relay failed: {}", e),
                outcome => tracing::debug!(%key, %package, ?outcome, "Notification relayed"),
            }
        }
        HookMessage::Removed { key } => manager.on_notification_removed(&key).await,
    }
}

/// Drain hook messages into the manager until the channel closes
pub async fn dispatch_loop(
    manager: std::sync::Arc<RelayManager>,
    mut rx: mpsc::Receiver<HookMessage>,
    config: RelayConfig,
) {
    while let Some(message) = rx.recv().await {
        dispatch(&manager, message, &config).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::reply::tests::RecordingSink;
    use crate::relay::StaticGate;
    use crate::transport::memory::memory_transport;
    use crate::transport::ServiceRecord;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn manager(config: &RelayConfig) -> Arc<RelayManager> {
        let (binder, _peer) = memory_transport();
        RelayManager::new(
            config,
            ServiceRecord::default(),
            binder,
            Arc::new(StaticGate::new(true)),
            Arc::new(RecordingSink::default()),
        )
    }

    fn posted(key: &str, package: &str, reply_handle: Option<&str>) -> HookMessage {
        HookMessage::Posted {
            key: key.to_string(),
            package: package.to_string(),
            app_label: None,
            sender: None,
            content: Some("Hello".to_string()),
            icon_path: None,
            reply_handle: reply_handle.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_build_event_fallbacks() {
        let config = RelayConfig::default();
        let event = build_event(
            "n1".to_string(),
            "org.telegram",
            Some(String::new()),
            None,
            None,
            None,
            &config,
        )
        .await;

        assert_eq!(event.app_name, "org.telegram");
        assert_eq!(event.body, "No content");
        assert!(event.sender.is_none());
    }

    #[tokio::test]
    async fn test_build_event_reads_icon_and_skips_missing_one() {
        let dir = tempdir().unwrap();
        let icon_path = dir.path().join("icon.png");
        std::fs::write(&icon_path, [0x89, b'P', b'N', b'G']).unwrap();
        let config = RelayConfig::default();

        let event = build_event(
            "n1".to_string(),
            "com.whatsapp",
            Some("WhatsApp".to_string()),
            Some("Alice".to_string()),
            Some("Hi".to_string()),
            Some(&icon_path),
            &config,
        )
        .await;
        assert_eq!(event.app_name, "WhatsApp");
        assert_eq!(event.sender.as_deref(), Some("Alice"));
        assert_eq!(event.icon.as_deref(), Some(&[0x89, b'P', b'N', b'G'][..]));

        let missing = dir.path().join("missing.png");
        let event = build_event(
            "n2".to_string(),
            "com.whatsapp",
            None,
            None,
            Some("Hi".to_string()),
            Some(&missing),
            &config,
        )
        .await;
        assert!(event.icon.is_none());
    }

    #[tokio::test]
    async fn test_reply_handles_respect_allow_list() {
        let config = RelayConfig {
            reply_apps: vec!["com.whatsapp".to_string()],
            ..RelayConfig::default()
        };
        let manager = manager(&config);

        dispatch(&manager, posted("wa", "com.whatsapp", Some("a1")), &config).await;
        dispatch(&manager, posted("tg", "org.telegram", Some("a2")), &config).await;

        assert!(manager.router().has_handle("wa"));
        assert!(!manager.router().has_handle("tg"));
        assert_eq!(manager.session().queue().keys().await, vec!["wa", "tg"]);
    }

    #[tokio::test]
    async fn test_removed_message_clears_handle_and_dedup() {
        let config = RelayConfig::default();
        let manager = manager(&config);

        dispatch(&manager, posted("n1", "com.whatsapp", Some("a1")), &config).await;
        dispatch(&manager, posted("n1", "com.whatsapp", Some("a1")), &config).await;
        assert_eq!(manager.session().queue().len().await, 1);

        dispatch(
            &manager,
            HookMessage::Removed {
                key: "n1".to_string(),
            },
            &config,
        )
        .await;
        assert!(!manager.router().has_handle("n1"));

        dispatch(&manager, posted("n1", "com.whatsapp", None), &config).await;
        assert_eq!(manager.session().queue().len().await, 2);
    }
}
