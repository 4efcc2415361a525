//! Framed bus channels (CAN)
//!
//! A [`FramedBusChannel`] sends and receives [`Frame`]s over one interface.
//! The wire access itself sits behind the [`FrameTransport`] trait so the
//! same channel logic runs on SocketCAN or on the in-memory loopback bus.

use crate::types::{BusError, Frame, Result};
use std::io;
use std::time::Duration;

pub mod loopback;
pub mod socket;

pub use self::loopback::{LoopbackBus, LoopbackEndpoint};
pub use self::socket::SocketCanTransport;

/// Raw frame transport underneath a channel
pub trait FrameTransport {
    /// Put one frame on the wire
    fn transmit(&mut self, frame: &Frame) -> io::Result<()>;

    /// Wait up to `timeout` for a frame; `Ok(None)` when nothing arrived
    fn receive(&mut self, timeout: Duration) -> io::Result<Option<Frame>>;

    /// Release the underlying endpoint
    fn shutdown(&mut self) {}
}

/// One named channel on a framed broadcast bus
pub struct FramedBusChannel {
    name: String,
    bitrate: u32,
    fd_enabled: bool,
    transport: Box<dyn FrameTransport>,
    open: bool,
}

impl FramedBusChannel {
    /// Open a SocketCAN channel
    ///
    /// The interface must already be up at `bitrate`; this does not configure
    /// it. Fails with [`BusError::Connection`] when the socket cannot be bound.
    pub fn open(channel_name: &str, bitrate: u32, flexible_data_rate_enabled: bool) -> Result<Self> {
        let transport = SocketCanTransport::open(channel_name, flexible_data_rate_enabled)
            .map_err(|source| BusError::Connection {
                interface: channel_name.to_string(),
                source,
            })?;

        log::info!(
            "Opened channel {} ({} bit/s, fd {})",
            channel_name,
            bitrate,
            if flexible_data_rate_enabled { "on" } else { "off" }
        );

        Ok(Self::with_transport(
            channel_name,
            bitrate,
            flexible_data_rate_enabled,
            Box::new(transport),
        ))
    }

    /// Build a channel on top of an arbitrary transport
    pub fn with_transport(
        name: impl Into<String>,
        bitrate: u32,
        fd_enabled: bool,
        transport: Box<dyn FrameTransport>,
    ) -> Self {
        Self {
            name: name.into(),
            bitrate,
            fd_enabled,
            transport,
            open: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bitrate(&self) -> u32 {
        self.bitrate
    }

    pub fn fd_enabled(&self) -> bool {
        self.fd_enabled
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Send one frame
    ///
    /// A rejected frame is reported as [`BusError::Transmit`]; nothing is
    /// retried here.
    pub fn send(&mut self, frame: &Frame) -> Result<()> {
        if !self.open {
            return Err(BusError::ChannelClosed(self.name.clone()));
        }

        if frame.is_fd() && !self.fd_enabled {
            return Err(BusError::Transmit {
                channel: self.name.clone(),
                id: frame.id(),
                reason: "CAN FD frame on a classic channel".to_string(),
            });
        }

        self.transport.transmit(frame).map_err(|e| BusError::Transmit {
            channel: self.name.clone(),
            id: frame.id(),
            reason: e.to_string(),
        })?;

        log::trace!("{} TX {}", self.name, frame);
        Ok(())
    }

    /// Wait up to `timeout` for the next frame
    ///
    /// No traffic within the window is `Ok(None)`, not an error.
    pub fn receive(&mut self, timeout: Duration) -> Result<Option<Frame>> {
        if !self.open {
            return Err(BusError::ChannelClosed(self.name.clone()));
        }

        let frame = self.transport.receive(timeout).map_err(|e| BusError::Receive {
            channel: self.name.clone(),
            reason: e.to_string(),
        })?;

        if let Some(ref frame) = frame {
            log::trace!("{} RX {}", self.name, frame);
        }
        Ok(frame)
    }

    /// Close the channel; further calls are no-ops
    pub fn close(&mut self) {
        if self.open {
            self.transport.shutdown();
            self.open = false;
            log::info!("Closed channel {}", self.name);
        }
    }
}

impl Drop for FramedBusChannel {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for FramedBusChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramedBusChannel")
            .field("name", &self.name)
            .field("bitrate", &self.bitrate)
            .field("fd_enabled", &self.fd_enabled)
            .field("open", &self.open)
            .finish()
    }
}
