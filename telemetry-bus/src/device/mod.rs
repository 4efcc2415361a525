//! Register-addressed peripheral devices (SPI)
//!
//! [`RegisterBusDevice`] performs framed register transactions over any
//! `embedded_hal` [`SpiDevice`] and implements the BME688 temperature
//! readout on top of them. Timing delays go through [`DelayNs`] so the
//! sequence can be driven by a real clock or by a test double.

use crate::types::{
    pack_temperature_adc, BusError, CalibrationCoefficients, RegisterValue, Result,
    CALIBRATION_BLOCK_LEN,
};
use embedded_hal::delay::DelayNs;
use embedded_hal::spi::SpiDevice;

pub mod bme688;
pub mod spidev;

pub use self::spidev::{open_spidev, LinuxRegisterDevice};

/// A device the dispatcher can read temperatures from
pub trait TemperatureSensor {
    /// Name reported with each reading
    fn name(&self) -> &str;

    /// Trigger one measurement and return degrees Celsius
    fn measure_temperature(&mut self) -> Result<f64>;
}

/// Register read/write access to one chip-select on a SPI bus
pub struct RegisterBusDevice<SPI, D> {
    name: String,
    spi: SPI,
    delay: D,
}

impl<SPI, D> RegisterBusDevice<SPI, D>
where
    SPI: SpiDevice,
    D: DelayNs,
{
    pub fn new(name: impl Into<String>, spi: SPI, delay: D) -> Self {
        Self {
            name: name.into(),
            spi,
            delay,
        }
    }

    /// Give back the bus and delay provider
    pub fn release(self) -> (SPI, D) {
        (self.spi, self.delay)
    }

    /// Write one register in a single transaction: `[address & 0x7F, value]`
    pub fn write_register(&mut self, address: u8, value: u8) -> Result<()> {
        self.spi
            .write(&[address & bme688::WRITE_MASK, value])
            .map_err(|e| {
                BusError::Io(format!(
                    "{}: write of register 0x{:02X} failed: {:?}",
                    self.name, address, e
                ))
            })?;
        log::trace!("{}: wrote 0x{:02X} to 0x{:02X}", self.name, value, address);
        Ok(())
    }

    /// Read `length` consecutive registers starting at `address`
    ///
    /// The transaction is `[address | 0x80, 0x00 * length]`; the byte clocked
    /// in while the address goes out is a dummy and is dropped.
    pub fn read_register(&mut self, address: u8, length: usize) -> Result<RegisterValue> {
        if length == 0 {
            return Err(BusError::InvalidRequest(format!(
                "zero-length read of register 0x{:02X}",
                address
            )));
        }

        let Some(frame_len) = length.checked_add(1) else {
            return Err(BusError::InvalidRequest(format!(
                "read of {} bytes from register 0x{:02X} is too long",
                length, address
            )));
        };

        let mut buffer = vec![0u8; frame_len];
        buffer[0] = address | bme688::READ_FLAG;
        self.spi.transfer_in_place(&mut buffer).map_err(|e| {
            BusError::Io(format!(
                "{}: read of register 0x{:02X} failed: {:?}",
                self.name, address, e
            ))
        })?;

        let raw_bytes = buffer.split_off(1);
        log::trace!("{}: read 0x{:02X} -> {:02X?}", self.name, address, raw_bytes);
        Ok(RegisterValue { address, raw_bytes })
    }

    /// Compare the identity register against `expected_id`
    ///
    /// A mismatch is `Ok(false)`; only a failed transfer is an error.
    pub fn verify_identity(&mut self, expected_id: u8) -> Result<bool> {
        let chip_id = self
            .read_register(bme688::CHIP_ID, 1)?
            .first()
            .unwrap_or_default();

        if chip_id != expected_id {
            log::error!(
                "{}: invalid chip id 0x{:02X}, expected 0x{:02X}",
                self.name,
                chip_id,
                expected_id
            );
            return Ok(false);
        }

        log::info!("{}: detected chip id 0x{:02X}", self.name, chip_id);
        Ok(true)
    }

    /// Soft reset, returning only once the reset delay has elapsed
    pub fn reset(&mut self) -> Result<()> {
        self.write_register(bme688::RESET, bme688::SOFT_RESET_CMD)?;
        self.delay.delay_ms(bme688::RESET_DELAY_MS);
        log::debug!("{}: soft reset complete", self.name);
        Ok(())
    }

    /// Switch off the gas heater so only temperature is measured
    pub fn disable_gas_sensor(&mut self) -> Result<()> {
        self.write_register(bme688::CTRL_GAS, bme688::DISABLE_GAS)
    }

    /// Reset, disable the gas sensor and wait for the device to settle
    pub fn initialize(&mut self) -> Result<()> {
        self.reset()?;
        self.disable_gas_sensor()?;
        self.delay.delay_ms(bme688::SETTLE_DELAY_MS);
        log::info!("{}: initialized", self.name);
        Ok(())
    }

    /// Read and decode the temperature calibration block
    pub fn read_calibration(&mut self) -> Result<CalibrationCoefficients> {
        let value = self.read_register(bme688::CALIB_DATA, CALIBRATION_BLOCK_LEN)?;
        let raw: [u8; CALIBRATION_BLOCK_LEN] = value.raw_bytes.as_slice().try_into().map_err(|_| {
            BusError::Io(format!(
                "{}: short calibration read ({} bytes)",
                self.name,
                value.raw_bytes.len()
            ))
        })?;

        let calib = CalibrationCoefficients::from_raw(&raw);
        log::debug!("{}: calibration {}", self.name, calib);
        Ok(calib)
    }

    /// Run one forced-mode conversion and return degrees Celsius
    ///
    /// Calibration is read fresh on every call.
    pub fn measure_temperature(&mut self) -> Result<f64> {
        self.write_register(bme688::CTRL_MEAS, bme688::CTRL_MEAS_VALUE)?;
        self.delay.delay_ms(bme688::CONVERSION_DELAY_MS);

        let value = self.read_register(bme688::TEMP_MSB, bme688::TEMP_DATA_LEN)?;
        let raw: [u8; 3] = value.raw_bytes.as_slice().try_into().map_err(|_| {
            BusError::Io(format!("{}: short temperature read", self.name))
        })?;
        let adc = pack_temperature_adc(raw);
        log::debug!("{}: raw temperature {:02X?} -> adc {}", self.name, raw, adc);

        let calib = self.read_calibration()?;
        Ok(calib.compensate(adc))
    }
}

impl<SPI, D> TemperatureSensor for RegisterBusDevice<SPI, D>
where
    SPI: SpiDevice,
    D: DelayNs,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn measure_temperature(&mut self) -> Result<f64> {
        RegisterBusDevice::measure_temperature(self)
    }
}
