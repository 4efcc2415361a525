//! Telemetry Bus Library
//!
//! Hardware adapters for a vehicle telemetry node: framed CAN I/O and
//! register-addressed SPI sensors behind one polling/dispatch model.
//!
//! # Architecture
//!
//! - [`FramedBusChannel`] sends and receives frames on one CAN interface
//! - [`RegisterBusDevice`] performs register transactions on a SPI device and
//!   reads BME688 temperatures
//! - [`TelemetryDispatcher`] polls channels, routes frames to handlers by
//!   identifier and schedules device reads until cancelled
//!
//! The library does NOT:
//! - Configure network interfaces (see [`link`] for the host-side helper)
//! - Install signal handlers or initialise logging
//! - Retry failed transmissions or transfers
//!
//! # Example Usage
//!
//! ```no_run
//! use telemetry_bus::{CancellationToken, FrameId, FramedBusChannel, TelemetryDispatcher};
//! use std::time::Duration;
//!
//! let channel = FramedBusChannel::open("can0", 1_000_000, false).unwrap();
//!
//! let mut dispatcher = TelemetryDispatcher::new();
//! dispatcher.add_channel(channel);
//! dispatcher.register_handler(FrameId::H2Alarm, |frame| {
//!     println!("H2 alarm: {}", frame);
//!     Ok(())
//! });
//!
//! let token = CancellationToken::new();
//! let stats = dispatcher.run(Duration::from_millis(100), &token).unwrap();
//! println!("{} frames dispatched", stats.frames_dispatched);
//! ```

// Public modules
pub mod channel;
pub mod config;
pub mod device;
pub mod dispatcher;
pub mod identifiers;
pub mod link;
pub mod types;

// Re-export main types for convenience
pub use channel::{FrameTransport, FramedBusChannel, LoopbackBus, SocketCanTransport};
pub use config::{ChannelConfig, DispatcherConfig, SensorConfig};
pub use device::{RegisterBusDevice, TemperatureSensor};
pub use dispatcher::{CancellationToken, DispatchStats, TelemetryDispatcher};
pub use identifiers::{FrameId, TEST_FRAME_ID};
pub use link::{InterfaceLink, IpLink, NoopLink};
pub use types::{
    BusError, CalibrationCoefficients, Frame, RegisterValue, Result, SensorReading, Timestamp,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
