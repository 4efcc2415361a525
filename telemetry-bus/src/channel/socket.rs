//! SocketCAN transport (Linux)
//!
//! Wraps a raw `CAN_RAW` socket from the `socketcan` crate. A classic socket
//! is used unless CAN FD is requested, in which case an FD socket is opened so
//! both frame kinds can be exchanged.

use super::FrameTransport;
use crate::types::Frame;
use embedded_can::{ExtendedId, Frame as EmbeddedFrame, Id, StandardId};
use socketcan::{CanAnyFrame, CanFdFrame, CanFdSocket, CanFrame, CanSocket, Socket};
use std::io;
use std::time::Duration;

enum RawSocket {
    Classic(CanSocket),
    Fd(CanFdSocket),
}

/// Frame transport bound to one SocketCAN interface
pub struct SocketCanTransport {
    interface: String,
    socket: Option<RawSocket>,
}

impl SocketCanTransport {
    /// Bind a raw CAN socket to `interface`
    pub fn open(interface: &str, fd_enabled: bool) -> io::Result<Self> {
        let socket = if fd_enabled {
            RawSocket::Fd(CanFdSocket::open(interface)?)
        } else {
            RawSocket::Classic(CanSocket::open(interface)?)
        };

        Ok(Self {
            interface: interface.to_string(),
            socket: Some(socket),
        })
    }

    fn socket(&self) -> io::Result<&RawSocket> {
        self.socket.as_ref().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotConnected,
                format!("socket on {} already shut down", self.interface),
            )
        })
    }
}

fn embedded_id(frame: &Frame) -> io::Result<Id> {
    let id = if frame.is_extended() {
        ExtendedId::new(frame.id()).map(Id::Extended)
    } else {
        u16::try_from(frame.id())
            .ok()
            .and_then(StandardId::new)
            .map(Id::Standard)
    };

    id.ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("identifier 0x{:X} out of range", frame.id()),
        )
    })
}

fn classic_frame(frame: &Frame) -> io::Result<CanFrame> {
    CanFrame::new(embedded_id(frame)?, frame.data()).ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "payload does not fit a classic frame")
    })
}

fn fd_frame(frame: &Frame) -> io::Result<CanFdFrame> {
    CanFdFrame::new(embedded_id(frame)?, frame.data()).ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "payload does not fit an FD frame")
    })
}

fn to_frame<F: socketcan::Frame>(raw: &F, is_fd: bool) -> io::Result<Frame> {
    let built = match (is_fd, raw.is_extended()) {
        (true, extended) => Frame::fd(raw.raw_id(), raw.data(), extended),
        (false, true) => Frame::extended(raw.raw_id(), raw.data()),
        (false, false) => Frame::new(raw.raw_id(), raw.data()),
    };
    built.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
}

fn is_timeout(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

impl FrameTransport for SocketCanTransport {
    fn transmit(&mut self, frame: &Frame) -> io::Result<()> {
        match self.socket()? {
            RawSocket::Classic(socket) => socket.write_frame(&classic_frame(frame)?),
            RawSocket::Fd(socket) if frame.is_fd() => socket.write_frame(&fd_frame(frame)?),
            RawSocket::Fd(socket) => socket.write_frame(&classic_frame(frame)?),
        }
    }

    fn receive(&mut self, timeout: Duration) -> io::Result<Option<Frame>> {
        let interface = self.interface.clone();
        match self.socket()? {
            RawSocket::Classic(socket) => match socket.read_frame_timeout(timeout) {
                Ok(CanFrame::Data(raw)) => to_frame(&raw, false).map(Some),
                Ok(CanFrame::Remote(_)) => {
                    log::trace!("{}: ignoring remote frame", interface);
                    Ok(None)
                }
                Ok(CanFrame::Error(_)) => {
                    log::warn!("{}: error frame received", interface);
                    Ok(None)
                }
                Err(e) if is_timeout(&e) => Ok(None),
                Err(e) => Err(e),
            },
            RawSocket::Fd(socket) => match socket.read_frame_timeout(timeout) {
                Ok(CanAnyFrame::Normal(raw)) => to_frame(&raw, false).map(Some),
                Ok(CanAnyFrame::Fd(raw)) => to_frame(&raw, true).map(Some),
                Ok(CanAnyFrame::Remote(_)) => {
                    log::trace!("{}: ignoring remote frame", interface);
                    Ok(None)
                }
                Ok(CanAnyFrame::Error(_)) => {
                    log::warn!("{}: error frame received", interface);
                    Ok(None)
                }
                Err(e) if is_timeout(&e) => Ok(None),
                Err(e) => Err(e),
            },
        }
    }

    fn shutdown(&mut self) {
        if self.socket.take().is_some() {
            log::debug!("Released socket on {}", self.interface);
        }
    }
}
