//! Routing of desktop replies back to notification reply actions

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::error::RelayError;
use super::event::ReplyMessage;

/// Opaque capability for submitting text into one notification's reply field
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReplyHandle(String);

impl ReplyHandle {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ReplyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// When a registered handle is forgotten
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HandlePolicy {
    /// Kept until the notification is withdrawn
    #[default]
    OnRemoval,
    /// Consumed by the first reply routed to it
    OnFirstUse,
}

/// Platform primitive that invokes a reply action
#[async_trait::async_trait]
pub trait ReplySink: Send + Sync {
    async fn submit(&self, handle: &ReplyHandle, text: &str) -> anyhow::Result<()>;
}

/// Fallback lookup supplied by the notification source
pub trait HandleResolver: Send + Sync {
    fn resolve_handle(&self, key: &str) -> Option<ReplyHandle>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Delivered,
    NoHandle,
    SinkFailed,
}

pub struct ReplyRouter {
    handles: Mutex<HashMap<String, ReplyHandle>>,
    resolver: Option<Arc<dyn HandleResolver>>,
    sink: Arc<dyn ReplySink>,
    policy: HandlePolicy,
}

impl ReplyRouter {
    pub fn new(sink: Arc<dyn ReplySink>, policy: HandlePolicy) -> Self {
        Self {
            handles: Mutex::new(HashMap::new()),
            resolver: None,
            sink,
            policy,
        }
    }

    /// Consult `resolver` for keys that were never registered here
    pub fn with_resolver(mut self, resolver: Arc<dyn HandleResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn policy(&self) -> HandlePolicy {
        self.policy
    }

    fn handles(&self) -> std::sync::MutexGuard<'_, HashMap<String, ReplyHandle>> {
        self.handles.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Bind a reply action to a notification key, replacing any previous one
    pub fn register_handle(&self, key: impl Into<String>, handle: ReplyHandle) {
        let key = key.into();
        tracing::debug!(%key, "Reply action registered");
        self.handles().insert(key, handle);
    }

    pub fn unregister_handle(&self, key: &str) -> Option<ReplyHandle> {
        let removed = self.handles().remove(key);
        if removed.is_some() {
            tracing::debug!(%key, "Reply action removed");
        }
        removed
    }

    pub fn has_handle(&self, key: &str) -> bool {
        self.handles().contains_key(key)
    }

    fn take_handle(&self, key: &str) -> Option<ReplyHandle> {
        let local = {
            let mut handles = self.handles();
            match self.policy {
                HandlePolicy::OnFirstUse => handles.remove(key),
                HandlePolicy::OnRemoval => handles.get(key).cloned(),
            }
        };
        local.or_else(|| {
            self.resolver
                .as_ref()
                .and_then(|resolver| resolver.resolve_handle(key))
        })
    }

    /// Deliver a reply to its notification's action.
    ///
    /// Missing handles and sink failures are logged and reported in the outcome;
    /// they never propagate to the session.
    pub async fn route_reply(&self, reply: &ReplyMessage) -> RouteOutcome {
        let Some(handle) = self.take_handle(&reply.key) else {
            tracing::info!(key = %reply.key, "No reply action found, dropping reply");
            return RouteOutcome::NoHandle;
        };

        match self.sink.submit(&handle, &reply.reply).await {
            Ok(()) => {
                tracing::info!(key = %reply.key, "Reply delivered");
                RouteOutcome::Delivered
            }
            Err(e) => {
                let err = RelayError::ActionResolution {
                    key: reply.key.clone(),
                    reason: format!("{:#}", e),
                };
                tracing::warn!("{}", err);
                RouteOutcome::SinkFailed
            }
        }
    }
}
