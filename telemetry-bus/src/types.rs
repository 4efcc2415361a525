//! Core types for the telemetry bus library
//!
//! This module defines the values that flow between the bus components:
//! frames on the CAN side, register contents and calibration data on the
//! peripheral side, and the error type shared by all of them.

use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::OnceLock;
use std::time::Instant;

/// Wall-clock timestamp type used for sensor readings
pub type Timestamp = DateTime<Utc>;

/// Result type for bus operations
pub type Result<T> = std::result::Result<T, BusError>;

/// Largest identifier representable in an 11-bit (standard) frame
pub const MAX_STANDARD_ID: u32 = 0x7FF;
/// Largest identifier representable in a 29-bit (extended) frame
pub const MAX_EXTENDED_ID: u32 = 0x1FFF_FFFF;
/// Payload limit for classic CAN frames
pub const MAX_CLASSIC_DATA_LEN: usize = 8;
/// Payload limit for CAN FD frames
pub const MAX_FD_DATA_LEN: usize = 64;

/// Seconds elapsed on the process-wide monotonic clock
///
/// The origin is fixed the first time any frame is stamped, so values are
/// only comparable within one process.
pub fn monotonic_seconds() -> f64 {
    static ORIGIN: OnceLock<Instant> = OnceLock::new();
    ORIGIN.get_or_init(Instant::now).elapsed().as_secs_f64()
}

/// Errors that can occur while talking to a bus
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Failed to open interface '{interface}': {source}")]
    Connection {
        interface: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to transmit frame 0x{id:X} on '{channel}': {reason}")]
    Transmit {
        channel: String,
        id: u32,
        reason: String,
    },

    #[error("Failed to receive on '{channel}': {reason}")]
    Receive { channel: String, reason: String },

    #[error("Channel '{0}' is closed")]
    ChannelClosed(String),

    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    #[error("Peripheral bus transfer failed: {0}")]
    Io(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Invalid register request: {0}")]
    InvalidRequest(String),

    #[error("Interface configuration failed: {0}")]
    Link(String),
}

/// One frame on a CAN bus
///
/// Frames are immutable once constructed. The constructors validate the
/// identifier range and payload length, so every `Frame` in circulation is
/// representable on the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    id: u32,
    data: Vec<u8>,
    is_extended: bool,
    is_fd: bool,
    timestamp: f64,
}

impl Frame {
    /// Create a classic frame with an 11-bit identifier
    pub fn new(id: u32, data: &[u8]) -> Result<Self> {
        Self::build(id, data, false, false)
    }

    /// Create a classic frame with a 29-bit identifier
    pub fn extended(id: u32, data: &[u8]) -> Result<Self> {
        Self::build(id, data, true, false)
    }

    /// Create a CAN FD frame (up to 64 data bytes)
    pub fn fd(id: u32, data: &[u8], is_extended: bool) -> Result<Self> {
        Self::build(id, data, is_extended, true)
    }

    fn build(id: u32, data: &[u8], is_extended: bool, is_fd: bool) -> Result<Self> {
        let max_id = if is_extended { MAX_EXTENDED_ID } else { MAX_STANDARD_ID };
        if id > max_id {
            return Err(BusError::InvalidFrame(format!(
                "identifier 0x{:X} exceeds 0x{:X}",
                id, max_id
            )));
        }

        let max_len = if is_fd { MAX_FD_DATA_LEN } else { MAX_CLASSIC_DATA_LEN };
        if data.len() > max_len {
            return Err(BusError::InvalidFrame(format!(
                "{} data bytes exceed the {}-byte limit",
                data.len(),
                max_len
            )));
        }

        Ok(Self {
            id,
            data: data.to_vec(),
            is_extended,
            is_fd,
            timestamp: monotonic_seconds(),
        })
    }

    /// Frame identifier (11 or 29 bit)
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Payload bytes
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Number of payload bytes
    pub fn dlc(&self) -> usize {
        self.data.len()
    }

    pub fn is_extended(&self) -> bool {
        self.is_extended
    }

    pub fn is_fd(&self) -> bool {
        self.is_fd
    }

    /// Monotonic timestamp in seconds, see [`monotonic_seconds`]
    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.6} {:x} {:03X} [{}]",
            self.timestamp,
            self.is_fd as u8,
            self.id,
            self.data.len()
        )?;
        for byte in &self.data {
            write!(f, " {:02X}", byte)?;
        }
        Ok(())
    }
}

/// Bytes read from a device register block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterValue {
    /// First register address of the block
    pub address: u8,
    /// Register contents, dummy byte already stripped
    pub raw_bytes: Vec<u8>,
}

impl RegisterValue {
    /// Contents of the first register in the block
    pub fn first(&self) -> Option<u8> {
        self.raw_bytes.first().copied()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw_bytes
    }
}

/// Reinterpret a raw 16-bit register value as two's complement
pub fn twos_complement_16(raw: u16) -> i16 {
    if raw > 32767 {
        (i32::from(raw) - 65536) as i16
    } else {
        raw as i16
    }
}

/// Reinterpret a raw 8-bit register value as two's complement
pub fn twos_complement_8(raw: u8) -> i8 {
    if raw > 127 {
        (i16::from(raw) - 256) as i8
    } else {
        raw as i8
    }
}

/// Temperature calibration coefficients of a BME68x sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CalibrationCoefficients {
    pub dig_t1: u16,
    pub dig_t2: i16,
    pub dig_t3: i8,
}

/// Size of the temperature calibration block
pub const CALIBRATION_BLOCK_LEN: usize = 6;

impl CalibrationCoefficients {
    /// Decode the raw calibration block
    ///
    /// Layout: `dig_T1` little-endian u16 at bytes 0..2, `dig_T2` little-endian
    /// at bytes 2..4 and `dig_T3` at byte 4. Byte 5 is not used.
    pub fn from_raw(raw: &[u8; CALIBRATION_BLOCK_LEN]) -> Self {
        Self {
            dig_t1: LittleEndian::read_u16(&raw[0..2]),
            dig_t2: twos_complement_16(LittleEndian::read_u16(&raw[2..4])),
            dig_t3: twos_complement_8(raw[4]),
        }
    }

    /// Apply the compensation formula to a raw temperature ADC value
    pub fn compensate(&self, adc: u32) -> f64 {
        compensate_temperature(
            adc,
            f64::from(self.dig_t1),
            f64::from(self.dig_t2),
            f64::from(self.dig_t3),
        )
    }
}

impl fmt::Display for CalibrationCoefficients {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "dig_T1={}, dig_T2={}, dig_T3={}",
            self.dig_t1, self.dig_t2, self.dig_t3
        )
    }
}

/// Floating-point temperature compensation, result in degrees Celsius
///
/// Takes the coefficients as `f64` so the formula can be evaluated with
/// values outside the register widths.
pub fn compensate_temperature(adc: u32, dig_t1: f64, dig_t2: f64, dig_t3: f64) -> f64 {
    let adc = f64::from(adc);
    let var1 = (adc / 16384.0 - dig_t1 / 1024.0) * dig_t2;
    let var2 = (adc / 131072.0 - dig_t1 / 8192.0) * (adc / 131072.0 - dig_t1 / 8192.0) * dig_t3;
    let t_fine = var1 + var2;
    t_fine / 5120.0
}

/// Pack the three temperature data registers into the 20-bit ADC value
pub fn pack_temperature_adc(raw: [u8; 3]) -> u32 {
    (u32::from(raw[0]) << 12) | (u32::from(raw[1]) << 4) | (u32::from(raw[2]) >> 4)
}

/// One temperature measurement taken by the dispatcher
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReading {
    /// Name of the device that produced the reading
    pub device: String,
    /// Compensated temperature in degrees Celsius
    pub temperature_c: f64,
    /// Wall-clock time of the measurement
    pub taken_at: Timestamp,
}
