//! Network interface bring-up and teardown
//!
//! Interface configuration is privileged, OS-specific setup that happens
//! outside the dispatcher: the process entry point brings interfaces up
//! before opening channels and takes them down after the run loop returns.

use crate::types::{BusError, Result};
use std::process::Command;

/// Configures CAN network interfaces on behalf of the host process
pub trait InterfaceLink {
    /// Bring `name` up at `bitrate`, with or without CAN FD
    fn bring_up(&mut self, name: &str, bitrate: u32, fd_enabled: bool) -> Result<()>;

    /// Take `name` down
    fn take_down(&mut self, name: &str) -> Result<()>;
}

/// Configures interfaces with iproute2 (`ip link set ...`)
#[derive(Debug, Clone)]
pub struct IpLink {
    use_sudo: bool,
    data_bitrate: u32,
}

impl IpLink {
    /// `use_sudo` prefixes every command with `sudo`
    pub fn new(use_sudo: bool) -> Self {
        Self {
            use_sudo,
            data_bitrate: 2_000_000,
        }
    }

    /// Builder method: data-phase bitrate used when CAN FD is enabled
    pub fn with_data_bitrate(mut self, data_bitrate: u32) -> Self {
        self.data_bitrate = data_bitrate;
        self
    }

    /// Arguments for `ip` that bring an interface up
    pub fn bring_up_args(&self, name: &str, bitrate: u32, fd_enabled: bool) -> Vec<String> {
        let mut args: Vec<String> = ["link", "set", name, "up", "type", "can", "bitrate"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.push(bitrate.to_string());

        if fd_enabled {
            args.push("dbitrate".to_string());
            args.push(self.data_bitrate.to_string());
            args.push("fd".to_string());
            args.push("on".to_string());
        } else {
            args.push("fd".to_string());
            args.push("off".to_string());
        }
        args
    }

    /// Arguments for `ip` that take an interface down
    pub fn take_down_args(&self, name: &str) -> Vec<String> {
        ["link", "set", name, "down"].iter().map(|s| s.to_string()).collect()
    }

    fn execute(&self, args: &[String]) -> Result<()> {
        let mut command = if self.use_sudo {
            let mut command = Command::new("sudo");
            command.arg("ip");
            command
        } else {
            Command::new("ip")
        };
        command.args(args);

        log::debug!("Running {:?}", command);
        let output = command
            .output()
            .map_err(|e| BusError::Link(format!("failed to run ip: {}", e)))?;

        if !output.status.success() {
            return Err(BusError::Link(format!(
                "ip {} exited with {}: {}",
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

impl InterfaceLink for IpLink {
    fn bring_up(&mut self, name: &str, bitrate: u32, fd_enabled: bool) -> Result<()> {
        log::info!("Bringing up {} at {} bit/s", name, bitrate);
        self.execute(&self.bring_up_args(name, bitrate, fd_enabled))
    }

    fn take_down(&mut self, name: &str) -> Result<()> {
        log::info!("Taking down {}", name);
        self.execute(&self.take_down_args(name))
    }
}

/// For interfaces that are configured elsewhere (e.g. vcan, systemd-networkd)
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLink;

impl InterfaceLink for NoopLink {
    fn bring_up(&mut self, name: &str, _bitrate: u32, _fd_enabled: bool) -> Result<()> {
        log::debug!("Assuming {} is already up", name);
        Ok(())
    }

    fn take_down(&mut self, name: &str) -> Result<()> {
        log::debug!("Leaving {} as is", name);
        Ok(())
    }
}
