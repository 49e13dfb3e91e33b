//! Lifecycle of the single channel to the desktop peer
//!
//! ```text
//! Unbound --activate--> Listening --peer accepts--> Connected --I/O error | close--> Closed
//!                          ^                                                        |
//!                          +------------------------activate------------------------+
//! ```
//!
//! The device listens and the desktop connects. Nothing here reconnects on its
//! own; whoever owns the session decides when to call [`TransportSession::activate`]
//! again after it reaches `Closed`.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;

use super::codec::{DecodeOutcome, FrameDecoder, NotificationCodec};
use super::error::{RelayError, Result};
use super::event::NotificationEvent;
use super::queue::{EventSink, PendingQueue};
use super::reply::ReplyRouter;
use crate::transport::{BoxedChannel, ChannelBinder, ServiceRecord};

/// Default size of a single channel read
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unbound,
    Listening,
    Connected,
    Closed,
}

impl SessionState {
    /// Listening or connected
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Listening | SessionState::Connected)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Unbound => "unbound",
            SessionState::Listening => "listening",
            SessionState::Connected => "connected",
            SessionState::Closed => "closed",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivateOutcome {
    /// A listener is being opened
    Started,
    /// Nothing done, the session was already in this state
    AlreadyActive(SessionState),
}

/// What happened to a notification handed to the relay
#[derive(Debug)]
pub enum SendOutcome {
    /// Written to the connected peer
    Sent,
    /// No peer yet; kept in the pending queue
    Queued,
    /// Same key and body as the last transmission
    Suppressed,
    Failed(RelayError),
}

impl SendOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, SendOutcome::Failed(_))
    }
}

struct Control {
    state: SessionState,
    /// Bumped on every activation so stale tasks cannot close a newer session
    generation: u64,
    cancel: Option<CancellationToken>,
}

struct Outbound {
    writer: Option<WriteHalf<BoxedChannel>>,
    generation: u64,
    cancel: CancellationToken,
    codec: NotificationCodec,
}

impl Outbound {
    async fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(RelayError::NotConnected)?;
        tokio::select! {
            _ = self.cancel.cancelled() => Err(RelayError::Transport(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "session closed during write",
            ))),
            written = async {
                writer.write_all(frame).await?;
                writer.flush().await
            } => Ok(written?),
        }
    }
}

#[async_trait::async_trait]
impl EventSink for Outbound {
    async fn send_event(&mut self, event: &NotificationEvent) -> Result<()> {
        let frame = self.codec.encode_frame(event)?;
        self.write_frame(&frame).await
    }
}

/// Owns the one channel to the peer and everything that touches it
pub struct TransportSession {
    binder: Arc<dyn ChannelBinder>,
    service: ServiceRecord,
    codec: NotificationCodec,
    read_buffer_size: usize,
    queue: Arc<PendingQueue>,
    router: Arc<ReplyRouter>,
    control: Mutex<Control>,
    /// Serializes every write; queue drains hold it too
    outbound: AsyncMutex<Outbound>,
    state_tx: watch::Sender<SessionState>,
}

impl TransportSession {
    pub fn new(
        binder: Arc<dyn ChannelBinder>,
        service: ServiceRecord,
        codec: NotificationCodec,
        read_buffer_size: usize,
        queue: Arc<PendingQueue>,
        router: Arc<ReplyRouter>,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Unbound);
        Self {
            binder,
            service,
            codec: codec.clone(),
            read_buffer_size: read_buffer_size.max(1),
            queue,
            router,
            control: Mutex::new(Control {
                state: SessionState::Unbound,
                generation: 0,
                cancel: None,
            }),
            outbound: AsyncMutex::new(Outbound {
                writer: None,
                generation: 0,
                cancel: CancellationToken::new(),
                codec,
            }),
            state_tx,
        }
    }

    fn control(&self) -> MutexGuard<'_, Control> {
        self.control
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, control: &mut Control, state: SessionState) {
        control.state = state;
        self.state_tx.send_replace(state);
    }

    pub fn state(&self) -> SessionState {
        self.control().state
    }

    /// Observe state transitions
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn service(&self) -> &ServiceRecord {
        &self.service
    }

    pub fn queue(&self) -> &Arc<PendingQueue> {
        &self.queue
    }

    /// Start listening for the peer unless a session is already owned.
    ///
    /// Returns immediately; binding, accepting and the receive loop run on a
    /// spawned task. Must be called from within a Tokio runtime.
    pub fn activate(self: &Arc<Self>) -> ActivateOutcome {
        let (generation, cancel) = {
            let mut control = self.control();
            if control.state.is_active() {
                return ActivateOutcome::AlreadyActive(control.state);
            }
            control.generation += 1;
            let cancel = CancellationToken::new();
            control.cancel = Some(cancel.clone());
            self.set_state(&mut control, SessionState::Listening);
            (control.generation, cancel)
        };

        tracing::debug!(generation, binder = %self.binder.describe(), "Session activating");
        let session = Arc::clone(self);
        tokio::spawn(async move { session.run(generation, cancel).await });
        ActivateOutcome::Started
    }

    async fn run(self: Arc<Self>, generation: u64, cancel: CancellationToken) {
        let bound = tokio::select! {
            _ = cancel.cancelled() => return,
            bound = self.binder.bind(&self.service) => bound,
        };
        let mut listener = match bound {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!(binder = %self.binder.describe(), "Failed to open listener: {}", e);
                self.close_generation(generation).await;
                return;
            }
        };
        tracing::info!(
            service = %self.service.name,
            uuid = %self.service.uuid,
            "Waiting for peer connection"
        );

        // No timeout: the peer may take arbitrarily long to show up
        let accepted = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(generation, "Pending accept cancelled");
                return;
            }
            accepted = listener.accept() => accepted,
        };
        drop(listener);

        let (channel, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!("Accept failed: {}", e);
                self.close_generation(generation).await;
                return;
            }
        };
        tracing::info!(%peer, "Peer connected");

        let (reader, writer) = tokio::io::split(channel);
        if self.on_connected(generation, &cancel, writer).await {
            self.receive_loop(generation, &cancel, reader).await;
        }
    }

    /// Install the writer and flush the pending queue while holding the write lock
    async fn on_connected(
        &self,
        generation: u64,
        cancel: &CancellationToken,
        writer: WriteHalf<BoxedChannel>,
    ) -> bool {
        let mut outbound = self.outbound.lock().await;
        {
            let mut control = self.control();
            if control.generation != generation || cancel.is_cancelled() {
                return false;
            }
            self.set_state(&mut control, SessionState::Connected);
        }
        outbound.writer = Some(writer);
        outbound.generation = generation;
        outbound.cancel = cancel.clone();

        match self.queue.drain_to(&mut *outbound).await {
            Ok(0) => true,
            Ok(sent) => {
                tracing::info!(sent, "Flushed queued notifications");
                true
            }
            Err(e) => {
                tracing::warn!("Session failed while flushing queue: {}", e);
                self.fail_locked(&mut outbound, generation);
                false
            }
        }
    }

    async fn receive_loop(
        &self,
        generation: u64,
        cancel: &CancellationToken,
        mut reader: ReadHalf<BoxedChannel>,
    ) {
        let mut decoder = self.codec.frame_decoder();
        let mut buf = vec![0u8; self.read_buffer_size];
        loop {
            let read = tokio::select! {
                _ = cancel.cancelled() => return,
                read = reader.read(&mut buf) => read,
            };
            match read {
                Ok(0) => {
                    tracing::info!("Peer disconnected");
                    break;
                }
                Ok(n) => {
                    decoder.extend(&buf[..n]);
                    if let Err(e) = self.dispatch_frames(&mut decoder).await {
                        tracing::warn!("Dropping connection: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!("Read from peer failed: {}", e);
                    break;
                }
            }
        }
        self.close_generation(generation).await;
    }

    async fn dispatch_frames(&self, decoder: &mut FrameDecoder) -> Result<()> {
        while let Some(frame) = decoder.next_frame()? {
            match self.codec.decode(&frame) {
                DecodeOutcome::Reply(reply) => {
                    tracing::debug!(key = %reply.key, "Reply received");
                    self.router.route_reply(&reply).await;
                }
                DecodeOutcome::NotAReply(reason) => {
                    tracing::info!(bytes = frame.len(), "Ignoring inbound payload: {}", reason);
                }
            }
        }
        Ok(())
    }

    /// Write one payload to the connected peer.
    ///
    /// Fails with `NotConnected` when there is no peer; a write error closes
    /// the session.
    pub async fn send(&self, payload: &[u8]) -> Result<()> {
        let mut outbound = self.outbound.lock().await;
        if outbound.writer.is_none() {
            return Err(RelayError::NotConnected);
        }
        let frame = self.codec.frame(payload)?;
        self.write_locked(&mut outbound, &frame).await
    }

    /// Send an event if connected, otherwise queue it
    pub async fn submit(&self, event: NotificationEvent) -> SendOutcome {
        let mut outbound = self.outbound.lock().await;
        if outbound.writer.is_none() {
            self.queue.enqueue(event).await;
            return SendOutcome::Queued;
        }

        let frame = match self.codec.encode_frame(&event) {
            Ok(frame) => frame,
            Err(e) => return SendOutcome::Failed(e),
        };
        match self.write_locked(&mut outbound, &frame).await {
            Ok(()) => {
                tracing::debug!(key = %event.key, bytes = frame.len(), "Notification sent");
                SendOutcome::Sent
            }
            Err(e) => SendOutcome::Failed(e),
        }
    }

    async fn write_locked(&self, outbound: &mut Outbound, frame: &[u8]) -> Result<()> {
        let generation = outbound.generation;
        let result = outbound.write_frame(frame).await;
        if let Err(ref e) = result {
            tracing::warn!("Write to peer failed: {}", e);
            self.fail_locked(outbound, generation);
        }
        result
    }

    /// Close the session; safe to call in any state
    pub async fn close(&self) {
        let generation = self.control().generation;
        self.close_generation(generation).await;
    }

    fn mark_closed(&self, generation: u64) -> bool {
        let mut control = self.control();
        if control.generation != generation || control.state == SessionState::Closed {
            return false;
        }
        if let Some(cancel) = control.cancel.take() {
            cancel.cancel();
        }
        self.set_state(&mut control, SessionState::Closed);
        true
    }

    fn fail_locked(&self, outbound: &mut Outbound, generation: u64) {
        self.mark_closed(generation);
        if outbound.generation == generation {
            outbound.writer = None;
        }
    }

    async fn close_generation(&self, generation: u64) -> bool {
        // Cancel first so a blocked accept, read or write lets go of the lock
        let closed = self.mark_closed(generation);
        let writer = {
            let mut outbound = self.outbound.lock().await;
            if outbound.generation == generation {
                outbound.writer.take()
            } else {
                None
            }
        };
        if let Some(mut writer) = writer {
            let _ = tokio::time::timeout(SHUTDOWN_GRACE, writer.shutdown()).await;
        }
        if closed {
            tracing::info!(generation, "Session closed");
        }
        closed
    }
}
