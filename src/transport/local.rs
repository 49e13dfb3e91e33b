//! TCP and Unix domain socket binders for running the relay without Bluetooth

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::{TcpListener, UnixListener};

use super::{BoxedChannel, ChannelBinder, ChannelListener, ServiceRecord};

/// Listens on a TCP address
pub struct TcpBinder {
    addr: String,
}

impl TcpBinder {
    pub fn new(addr: String) -> Self {
        Self { addr }
    }

    /// Bind and return the concrete listener (exposes the bound address)
    pub async fn listen(&self) -> io::Result<TcpChannelListener> {
        let listener = TcpListener::bind(&self.addr).await?;
        Ok(TcpChannelListener { listener })
    }
}

pub struct TcpChannelListener {
    listener: TcpListener,
}

impl TcpChannelListener {
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

#[async_trait::async_trait]
impl ChannelBinder for TcpBinder {
    async fn bind(&self, service: &ServiceRecord) -> io::Result<Box<dyn ChannelListener>> {
        let listener = self.listen().await?;
        tracing::info!(
            service = %service.name,
            addr = %listener.local_addr()?,
            "Listening for peer over TCP"
        );
        Ok(Box::new(listener))
    }

    fn describe(&self) -> String {
        format!("tcp://{}", self.addr)
    }
}

#[async_trait::async_trait]
impl ChannelListener for TcpChannelListener {
    async fn accept(&mut self) -> io::Result<(BoxedChannel, String)> {
        let (stream, addr) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        Ok((Box::new(stream), addr.to_string()))
    }
}

/// Listens on a Unix domain socket path
pub struct UnixBinder {
    path: PathBuf,
}

impl UnixBinder {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

struct UnixChannelListener {
    listener: UnixListener,
    path: PathBuf,
}

#[async_trait::async_trait]
impl ChannelBinder for UnixBinder {
    async fn bind(&self, service: &ServiceRecord) -> io::Result<Box<dyn ChannelListener>> {
        // Remove a stale socket left by a previous run
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.path)?;
        tracing::info!(
            service = %service.name,
            path = %self.path.display(),
            "Listening for peer on Unix socket"
        );
        Ok(Box::new(UnixChannelListener {
            listener,
            path: self.path.clone(),
        }))
    }

    fn describe(&self) -> String {
        format!("unix://{}", self.path.display())
    }
}

#[async_trait::async_trait]
impl ChannelListener for UnixChannelListener {
    async fn accept(&mut self) -> io::Result<(BoxedChannel, String)> {
        let (stream, _addr) = self.listener.accept().await?;
        Ok((Box::new(stream), self.path.display().to_string()))
    }
}
