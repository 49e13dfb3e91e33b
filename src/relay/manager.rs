//! Process-wide entry point shared by every notification producer
//!
//! One `RelayManager` is built at startup and handed out as an `Arc` to the
//! notification hook, the CLI triggers and the supervisor, so they all reach the
//! same session instead of racing to open their own sockets.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

use super::codec::NotificationCodec;
use super::dedup::DedupTracker;
use super::error::{RelayError, Result};
use super::event::NotificationEvent;
use super::queue::PendingQueue;
use super::reply::{ReplyHandle, ReplyRouter, ReplySink};
use super::session::{ActivateOutcome, SendOutcome, SessionState, TransportSession};
use crate::app::config::RelayConfig;
use crate::transport::{ChannelBinder, ServiceRecord};

/// Permission/availability check consulted before every activation
#[async_trait::async_trait]
pub trait PermissionGate: Send + Sync {
    async fn is_granted(&self) -> bool;
}

/// Gate with a fixed answer that can be flipped at runtime
#[derive(Debug)]
pub struct StaticGate {
    granted: AtomicBool,
}

impl StaticGate {
    pub fn new(granted: bool) -> Self {
        Self {
            granted: AtomicBool::new(granted),
        }
    }

    pub fn set(&self, granted: bool) {
        self.granted.store(granted, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl PermissionGate for StaticGate {
    async fn is_granted(&self) -> bool {
        self.granted.load(Ordering::SeqCst)
    }
}

pub struct RelayManager {
    session: Arc<TransportSession>,
    dedup: DedupTracker,
    router: Arc<ReplyRouter>,
    gate: Arc<dyn PermissionGate>,
    /// Makes the dedup check and the submit one step
    ingress: Mutex<()>,
}

impl RelayManager {
    pub fn new(
        config: &RelayConfig,
        service: ServiceRecord,
        binder: Arc<dyn ChannelBinder>,
        gate: Arc<dyn PermissionGate>,
        sink: Arc<dyn ReplySink>,
    ) -> Arc<Self> {
        let router = Arc::new(ReplyRouter::new(sink, config.handle_policy));
        Self::with_router(config, service, binder, gate, router)
    }

    /// Build around a caller-supplied router (e.g. one with a `HandleResolver`)
    pub fn with_router(
        config: &RelayConfig,
        service: ServiceRecord,
        binder: Arc<dyn ChannelBinder>,
        gate: Arc<dyn PermissionGate>,
        router: Arc<ReplyRouter>,
    ) -> Arc<Self> {
        let codec = NotificationCodec::new(config.framing, config.max_frame_len);
        let session = Arc::new(TransportSession::new(
            binder,
            service,
            codec,
            config.read_buffer_size,
            Arc::new(PendingQueue::new()),
            router.clone(),
        ));
        Arc::new(Self {
            session,
            dedup: DedupTracker::new(),
            router,
            gate,
            ingress: Mutex::new(()),
        })
    }

    pub fn session(&self) -> &Arc<TransportSession> {
        &self.session
    }

    pub fn router(&self) -> &Arc<ReplyRouter> {
        &self.router
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.session.subscribe()
    }

    /// Activate the session once the gate allows it.
    ///
    /// `PermissionDenied` leaves everything untouched; retry after the gate
    /// changes.
    pub async fn activate(&self) -> Result<ActivateOutcome> {
        if !self.gate.is_granted().await {
            return Err(RelayError::PermissionDenied);
        }
        Ok(self.session.activate())
    }

    /// A notification was posted (or updated) on the device
    pub async fn on_notification_posted(
        &self,
        event: NotificationEvent,
        reply_handle: Option<ReplyHandle>,
    ) -> SendOutcome {
        if let Some(handle) = reply_handle {
            self.router.register_handle(event.key.clone(), handle);
        }

        let _ingress = self.ingress.lock().await;
        if !self.dedup.should_send(&event) {
            tracing::debug!(key = %event.key, "Unchanged notification suppressed");
            return SendOutcome::Suppressed;
        }

        let key = event.key.clone();
        let body = event.body.clone();
        let outcome = self.session.submit(event).await;
        if let SendOutcome::Failed(ref e) = outcome {
            tracing::warn!(
                %key,
                session_closed = e.closes_session(),
                "Notification not delivered: {}",
                e
            );
            self.dedup.rollback(&key, &body);
        }
        outcome
    }

    /// A notification was withdrawn on the device
    pub async fn on_notification_removed(&self, key: &str) {
        let _ingress = self.ingress.lock().await;
        self.dedup.on_removed(key);
        self.router.unregister_handle(key);
        tracing::debug!(%key, "Notification removed");
    }

    /// Best-effort teardown at shutdown
    pub async fn shutdown(&self) {
        self.session.close().await;
    }

    /// Keep the session listening: re-activate after it closes or while the
    /// gate refuses, waiting `retry_delay` between attempts.
    pub async fn supervise(self: Arc<Self>, retry_delay: Duration, shutdown: CancellationToken) {
        let mut states = self.subscribe();
        loop {
            match self.activate().await {
                Ok(ActivateOutcome::Started) => tracing::debug!("Supervisor activated session"),
                Ok(ActivateOutcome::AlreadyActive(_)) => {}
                Err(e) => tracing::info!("Activation deferred: {}", e),
            }

            if self.state().is_active() {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    closed = states.wait_for(|s| *s == SessionState::Closed) => {
                        if closed.is_err() {
                            break;
                        }
                    }
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(retry_delay) => {}
            }
        }
        tracing::debug!("Supervisor stopped");
    }
}
