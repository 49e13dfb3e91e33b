//! In-memory transport used by the session and manager tests

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, DuplexStream, ReadBuf};
use tokio::sync::{mpsc, Mutex};

use super::{BoxedChannel, ChannelBinder, ChannelListener, ServiceRecord};
use crate::relay::codec::{NotificationCodec, WireNotification};

const PIPE_CAPACITY: usize = 64 * 1024;

pub(crate) struct MemoryBinder {
    binds: AtomicUsize,
    incoming: Arc<Mutex<mpsc::UnboundedReceiver<DuplexStream>>>,
}

impl MemoryBinder {
    /// Number of listeners opened so far
    pub fn binds(&self) -> usize {
        self.binds.load(Ordering::SeqCst)
    }
}

/// Desktop end of the in-memory transport
#[derive(Clone)]
pub(crate) struct MemoryPeer {
    tx: mpsc::UnboundedSender<DuplexStream>,
}

impl MemoryPeer {
    pub fn connect(&self) -> DuplexStream {
        let (ours, theirs) = tokio::io::duplex(PIPE_CAPACITY);
        let _ = self.tx.send(theirs);
        ours
    }
}

pub(crate) fn memory_transport() -> (Arc<MemoryBinder>, MemoryPeer) {
    let (tx, rx) = mpsc::unbounded_channel();
    let binder = MemoryBinder {
        binds: AtomicUsize::new(0),
        incoming: Arc::new(Mutex::new(rx)),
    };
    (Arc::new(binder), MemoryPeer { tx })
}

struct MemoryListener {
    incoming: Arc<Mutex<mpsc::UnboundedReceiver<DuplexStream>>>,
}

#[async_trait::async_trait]
impl ChannelBinder for MemoryBinder {
    async fn bind(&self, _service: &ServiceRecord) -> io::Result<Box<dyn ChannelListener>> {
        self.binds.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryListener {
            incoming: self.incoming.clone(),
        }))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[async_trait::async_trait]
impl ChannelListener for MemoryListener {
    async fn accept(&mut self) -> io::Result<(BoxedChannel, String)> {
        let stream = self
            .incoming
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| io::Error::new(io::ErrorKind::ConnectionAborted, "peer gone"))?;
        Ok((Box::new(stream), "memory-peer".to_string()))
    }
}

/// Binder whose single peer connects and then refuses every write
#[derive(Default)]
pub(crate) struct BrokenPipeBinder;

struct BrokenPipeListener {
    handed_out: bool,
}

/// Never yields inbound data; every write fails with `BrokenPipe`
struct BrokenPipeChannel;

impl AsyncRead for BrokenPipeChannel {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Pending
    }
}

impl AsyncWrite for BrokenPipeChannel {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::Error::from(io::ErrorKind::BrokenPipe)))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[async_trait::async_trait]
impl ChannelBinder for BrokenPipeBinder {
    async fn bind(&self, _service: &ServiceRecord) -> io::Result<Box<dyn ChannelListener>> {
        Ok(Box::new(BrokenPipeListener { handed_out: false }))
    }

    fn describe(&self) -> String {
        "broken-pipe".to_string()
    }
}

#[async_trait::async_trait]
impl ChannelListener for BrokenPipeListener {
    async fn accept(&mut self) -> io::Result<(BoxedChannel, String)> {
        if self.handed_out {
            std::future::pending::<()>().await;
        }
        self.handed_out = true;
        Ok((Box::new(BrokenPipeChannel), "broken-peer".to_string()))
    }
}

/// Read `count` notifications from the desktop end
pub(crate) async fn read_notifications(
    stream: &mut DuplexStream,
    codec: &NotificationCodec,
    count: usize,
) -> Vec<WireNotification> {
    let mut decoder = codec.frame_decoder();
    let mut received = Vec::new();
    let mut buf = [0u8; 256];
    while received.len() < count {
        while let Some(frame) = decoder.next_frame().unwrap() {
            received.push(codec.decode_notification(&frame).unwrap());
        }
        if received.len() >= count {
            break;
        }
        let n = stream.read(&mut buf).await.unwrap();
        assert!(n > 0, "session closed before {} notifications arrived", count);
        decoder.extend(&buf[..n]);
    }
    received
}
