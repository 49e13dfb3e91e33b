//! Bluetooth RFCOMM channel through BlueZ
//!
//! The listening side registers a serial-port profile with the service UUID and
//! name so the desktop can find it through SDP. The profile stays registered
//! only while the listener is alive.

use bluer::rfcomm::{Profile, ProfileHandle, Role, SocketAddr, Stream};
use futures::StreamExt;
use std::io;

use super::{BoxedChannel, ChannelBinder, ChannelListener, ServiceRecord};
use crate::relay::manager::PermissionGate;

fn bluez_error(e: bluer::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}

pub struct RfcommBinder {
    /// Fixed RFCOMM channel; BlueZ picks one when unset
    channel: Option<u16>,
}

impl RfcommBinder {
    pub fn new(channel: Option<u16>) -> Self {
        Self { channel }
    }
}

struct RfcommListener {
    _session: bluer::Session,
    profile: ProfileHandle,
}

#[async_trait::async_trait]
impl ChannelBinder for RfcommBinder {
    async fn bind(&self, service: &ServiceRecord) -> io::Result<Box<dyn ChannelListener>> {
        let session = bluer::Session::new().await.map_err(bluez_error)?;
        let profile = Profile {
            uuid: service.uuid,
            name: Some(service.name.clone()),
            role: Some(Role::Server),
            channel: self.channel,
            // The channel is not authenticated
            require_authentication: Some(false),
            require_authorization: Some(false),
            ..Default::default()
        };
        let profile = session
            .register_profile(profile)
            .await
            .map_err(bluez_error)?;

        tracing::info!(
            service = %service.name,
            uuid = %service.uuid,
            "RFCOMM profile registered"
        );
        Ok(Box::new(RfcommListener {
            _session: session,
            profile,
        }))
    }

    fn describe(&self) -> String {
        match self.channel {
            Some(channel) => format!("rfcomm channel {}", channel),
            None => "rfcomm".to_string(),
        }
    }
}

#[async_trait::async_trait]
impl ChannelListener for RfcommListener {
    async fn accept(&mut self) -> io::Result<(BoxedChannel, String)> {
        let request = self.profile.next().await.ok_or_else(|| {
            io::Error::new(io::ErrorKind::ConnectionAborted, "RFCOMM profile unregistered")
        })?;
        let device = request.device();
        let stream = request.accept().map_err(bluez_error)?;
        Ok((Box::new(stream), device.to_string()))
    }
}

/// Connect to a device's RFCOMM channel (desktop side)
pub async fn connect(address: &str, channel: u8) -> io::Result<BoxedChannel> {
    let address: bluer::Address = address
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("{}: {}", address, e)))?;
    let stream = Stream::connect(SocketAddr::new(address, channel)).await?;
    Ok(Box::new(stream))
}

/// Granted while the default Bluetooth adapter exists and is powered
pub struct AdapterGate;

impl AdapterGate {
    async fn adapter_powered() -> bluer::Result<bool> {
        let session = bluer::Session::new().await?;
        let adapter = session.default_adapter().await?;
        adapter.is_powered().await
    }
}

#[async_trait::async_trait]
impl PermissionGate for AdapterGate {
    async fn is_granted(&self) -> bool {
        match Self::adapter_powered().await {
            Ok(powered) => {
                if !powered {
                    tracing::info!("Bluetooth adapter is powered off");
                }
                powered
            }
            Err(e) => {
                tracing::warn!("Bluetooth adapter unavailable: {}", e);
                false
            }
        }
    }
}
