//! Byte-stream channels between the device and the desktop peer
//!
//! The relay core only needs an ordered, reliable, bidirectional stream. The
//! listening side is produced by a [`ChannelBinder`]: Bluetooth RFCOMM in
//! production (behind the `rfcomm` feature), TCP or Unix domain sockets for
//! development against a desktop peer on the same machine.

pub mod local;
#[cfg(test)]
pub(crate) mod memory;
#[cfg(feature = "rfcomm")]
pub mod rfcomm;

use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

use crate::app::config::{TransportConfig, TransportKind};

pub use local::{TcpBinder, UnixBinder};

/// Service identifier advertised by the listening side
pub const DEFAULT_SERVICE_UUID: Uuid = Uuid::from_u128(0xf81d4fae_7dec_11d0_a765_00a0c91e6bf6);

/// Service name advertised by the listening side
pub const DEFAULT_SERVICE_NAME: &str = "integrationforlinux";

/// Any stream the session can split into read and write halves
pub trait Channel: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> Channel for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

pub type BoxedChannel = Box<dyn Channel>;

/// Service record advertised while listening
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub uuid: Uuid,
    pub name: String,
}

impl Default for ServiceRecord {
    fn default() -> Self {
        Self {
            uuid: DEFAULT_SERVICE_UUID,
            name: DEFAULT_SERVICE_NAME.to_string(),
        }
    }
}

/// Opens the listening side of a channel
#[async_trait::async_trait]
pub trait ChannelBinder: Send + Sync {
    /// Start listening and advertise `service`
    async fn bind(&self, service: &ServiceRecord) -> io::Result<Box<dyn ChannelListener>>;

    /// Human readable description for logs
    fn describe(&self) -> String;
}

/// A bound listener waiting for the peer
#[async_trait::async_trait]
pub trait ChannelListener: Send {
    /// Block until the peer connects; returns the channel and a peer label
    async fn accept(&mut self) -> io::Result<(BoxedChannel, String)>;
}

/// Build the binder selected in the configuration
pub fn binder_from_config(config: &TransportConfig) -> anyhow::Result<Arc<dyn ChannelBinder>> {
    match config.kind {
        TransportKind::Tcp => Ok(Arc::new(TcpBinder::new(config.tcp_addr.clone()))),
        TransportKind::Unix => Ok(Arc::new(UnixBinder::new(config.unix_path.clone()))),
        #[cfg(feature = "rfcomm")]
        TransportKind::Rfcomm => Ok(Arc::new(rfcomm::RfcommBinder::new(config.rfcomm_channel))),
        #[cfg(not(feature = "rfcomm"))]
        TransportKind::Rfcomm => {
            anyhow::bail!("RFCOMM transport requires building with the `rfcomm` feature")
        }
    }
}

/// Where the desktop peer connects to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerTarget {
    Tcp(String),
    Unix(PathBuf),
    /// Bluetooth address of the device and its RFCOMM channel
    Rfcomm { address: String, channel: u8 },
}

impl std::fmt::Display for PeerTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerTarget::Tcp(addr) => write!(f, "tcp://{}", addr),
            PeerTarget::Unix(path) => write!(f, "unix://{}", path.display()),
            PeerTarget::Rfcomm { address, channel } => write!(f, "rfcomm://{}/{}", address, channel),
        }
    }
}

/// Connect to a listening device (desktop side)
pub async fn connect(target: &PeerTarget) -> io::Result<BoxedChannel> {
    match target {
        PeerTarget::Tcp(addr) => Ok(Box::new(tokio::net::TcpStream::connect(addr).await?)),
        PeerTarget::Unix(path) => Ok(Box::new(tokio::net::UnixStream::connect(path).await?)),
        #[cfg(feature = "rfcomm")]
        PeerTarget::Rfcomm { address, channel } => rfcomm::connect(address, *channel).await,
        #[cfg(not(feature = "rfcomm"))]
        PeerTarget::Rfcomm { .. } => Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "RFCOMM transport requires building with the `rfcomm` feature",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_service_record() {
        let record = ServiceRecord::default();
        assert_eq!(
            record.uuid.to_string(),
            "f81d4fae-7dec-11d0-a765-00a0c91e6bf6"
        );
        assert_eq!(record.name, "integrationforlinux");
    }

    #[test]
    fn test_peer_target_display() {
        let target = PeerTarget::Rfcomm {
            address: "AA:BB:CC:DD:EE:FF".to_string(),
            channel: 3,
        };
        assert_eq!(target.to_string(), "rfcomm://AA:BB:CC:DD:EE:FF/3");
    }
}
