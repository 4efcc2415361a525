//! Linux spidev backend

use super::RegisterBusDevice;
use crate::config::SensorConfig;
use crate::types::{BusError, Result};
use linux_embedded_hal::spidev::{SpiModeFlags, Spidev, SpidevOptions};
use linux_embedded_hal::{Delay, SpidevDevice};

/// Register device on a kernel spidev node, timed by `thread::sleep`
pub type LinuxRegisterDevice = RegisterBusDevice<SpidevDevice, Delay>;

/// Open and configure the spidev node described by `config`
///
/// Mode 0, 8-bit words, kernel-driven chip select per transaction.
pub fn open_spidev(config: &SensorConfig) -> Result<LinuxRegisterDevice> {
    let connection_error = |source| BusError::Connection {
        interface: config.spi_path.clone(),
        source,
    };

    let mut spi = Spidev::open(&config.spi_path).map_err(connection_error)?;
    let options = SpidevOptions::new()
        .bits_per_word(8)
        .max_speed_hz(config.max_speed_hz)
        .mode(SpiModeFlags::SPI_MODE_0)
        .build();
    spi.configure(&options).map_err(connection_error)?;

    log::info!(
        "Opened {} for {} at {} Hz",
        config.spi_path,
        config.name,
        config.max_speed_hz
    );

    Ok(RegisterBusDevice::new(config.name.clone(), SpidevDevice(spi), Delay))
}
