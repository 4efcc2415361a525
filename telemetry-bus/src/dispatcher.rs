//! Telemetry dispatcher
//!
//! Cooperative, single-threaded poll loop over a set of CAN channels and
//! peripheral devices. Each iteration:
//! 1. Check the cancellation token
//! 2. Receive (with a short timeout) on every channel and route each frame
//!    to the handler registered for its identifier
//! 3. Send periodic frames that are due
//! 4. Read devices whose schedule is due
//! 5. Sleep for the poll interval
//!
//! Handler failures (errors and panics) are logged and counted, never fatal.
//! The dispatcher does not touch interface configuration: bringing interfaces
//! up and down is the caller's job.

use crate::channel::FramedBusChannel;
use crate::config::DispatcherConfig;
use crate::device::TemperatureSensor;
use crate::types::{BusError, Frame, Result, SensorReading};
use chrono::Utc;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Callback invoked with every frame matching its identifier
pub type FrameHandler = Box<dyn FnMut(&Frame) -> anyhow::Result<()>>;

/// Callback invoked with every scheduled sensor reading
pub type ReadingHandler = Box<dyn FnMut(&SensorReading) -> anyhow::Result<()>>;

/// Produces the next frame of a periodic transmission
pub type FrameProducer = Box<dyn FnMut() -> Result<Frame>>;

/// Shared stop flag for [`TelemetryDispatcher::run`]
///
/// Clones observe the same flag, so a signal handler or another thread can
/// hold one clone while the loop polls another.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Counters collected over one or more runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub iterations: u64,
    pub frames_received: u64,
    pub frames_dispatched: u64,
    pub unhandled_frames: u64,
    pub handler_failures: u64,
    pub receive_errors: u64,
    pub frames_transmitted: u64,
    pub transmit_failures: u64,
    pub device_reads: u64,
    pub device_failures: u64,
}

struct PeriodicTransmit {
    channel: usize,
    period: Duration,
    next_due: Option<Instant>,
    producer: FrameProducer,
}

struct ScheduledDevice {
    sensor: Box<dyn TemperatureSensor>,
    period: Duration,
    next_due: Option<Instant>,
    handler: ReadingHandler,
}

/// Owns channels, devices and the handler table, and runs the poll loop
pub struct TelemetryDispatcher {
    channels: Vec<FramedBusChannel>,
    handlers: HashMap<u32, FrameHandler>,
    transmits: Vec<PeriodicTransmit>,
    devices: Vec<ScheduledDevice>,
    receive_timeout: Duration,
    channel_timeouts: HashMap<String, Duration>,
    stats: DispatchStats,
}

impl TelemetryDispatcher {
    /// Create an empty dispatcher with the default receive timeout
    pub fn new() -> Self {
        Self::with_config(&DispatcherConfig::default())
    }

    pub fn with_config(config: &DispatcherConfig) -> Self {
        Self {
            channels: Vec::new(),
            handlers: HashMap::new(),
            transmits: Vec::new(),
            devices: Vec::new(),
            receive_timeout: config.receive_timeout(),
            channel_timeouts: HashMap::new(),
            stats: DispatchStats::default(),
        }
    }

    /// Per-channel receive window used in each iteration
    pub fn set_receive_timeout(&mut self, timeout: Duration) {
        self.receive_timeout = timeout;
    }

    /// Receive window for one channel, overriding the shared one
    ///
    /// Useful for a channel that is only transmitted on, so its receive does
    /// not stretch every iteration.
    pub fn set_channel_receive_timeout(&mut self, channel_name: &str, timeout: Duration) -> Result<()> {
        if !self.channels.iter().any(|c| c.name() == channel_name) {
            return Err(BusError::UnknownChannel(channel_name.to_string()));
        }
        self.channel_timeouts.insert(channel_name.to_string(), timeout);
        Ok(())
    }

    /// Take ownership of a channel; channels are polled in insertion order
    pub fn add_channel(&mut self, channel: FramedBusChannel) {
        log::debug!("Dispatcher: added channel {}", channel.name());
        self.channels.push(channel);
    }

    pub fn channel_mut(&mut self, name: &str) -> Option<&mut FramedBusChannel> {
        self.channels.iter_mut().find(|c| c.name() == name)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Register the handler for one identifier; a later registration for the
    /// same identifier replaces the earlier one
    pub fn register_handler<F>(&mut self, identifier: impl Into<u32>, handler: F)
    where
        F: FnMut(&Frame) -> anyhow::Result<()> + 'static,
    {
        let identifier = identifier.into();
        if self.handlers.insert(identifier, Box::new(handler)).is_some() {
            log::debug!("Dispatcher: replaced handler for 0x{:03X}", identifier);
        }
    }

    pub fn has_handler(&self, identifier: u32) -> bool {
        self.handlers.contains_key(&identifier)
    }

    /// Send a frame from `producer` on `channel_name` every `period`
    ///
    /// The first frame goes out on the first iteration.
    pub fn add_periodic_transmit<F>(&mut self, channel_name: &str, period: Duration, producer: F) -> Result<()>
    where
        F: FnMut() -> Result<Frame> + 'static,
    {
        let channel = self
            .channels
            .iter()
            .position(|c| c.name() == channel_name)
            .ok_or_else(|| BusError::UnknownChannel(channel_name.to_string()))?;

        self.transmits.push(PeriodicTransmit {
            channel,
            period,
            next_due: None,
            producer: Box::new(producer),
        });
        Ok(())
    }

    /// Read `sensor` every `period` and hand each reading to `handler`
    ///
    /// The first read happens on the first iteration.
    pub fn add_device<S, F>(&mut self, sensor: S, period: Duration, handler: F)
    where
        S: TemperatureSensor + 'static,
        F: FnMut(&SensorReading) -> anyhow::Result<()> + 'static,
    {
        log::debug!("Dispatcher: scheduled {} every {:?}", sensor.name(), period);
        self.devices.push(ScheduledDevice {
            sensor: Box::new(sensor),
            period,
            next_due: None,
            handler: Box::new(handler),
        });
    }

    /// Counters accumulated so far
    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Run until `cancellation` is signalled
    ///
    /// Cancellation is checked at the top of every iteration, so the loop
    /// returns within one poll interval plus the receive windows. A closed
    /// channel is the only fatal condition.
    pub fn run(&mut self, poll_interval: Duration, cancellation: &CancellationToken) -> Result<DispatchStats> {
        log::info!(
            "Dispatcher started: {} channel(s), {} handler(s), {} device(s)",
            self.channels.len(),
            self.handlers.len(),
            self.devices.len()
        );

        loop {
            if cancellation.is_cancelled() {
                log::info!("Dispatcher cancelled after {} iteration(s)", self.stats.iterations);
                break;
            }

            self.run_once()?;
            thread::sleep(poll_interval);
        }

        Ok(self.stats)
    }

    /// One loop iteration without the trailing sleep
    pub fn run_once(&mut self) -> Result<()> {
        self.stats.iterations += 1;

        for channel in self.channels.iter_mut() {
            let timeout = self
                .channel_timeouts
                .get(channel.name())
                .copied()
                .unwrap_or(self.receive_timeout);
            match channel.receive(timeout) {
                Ok(Some(frame)) => {
                    self.stats.frames_received += 1;
                    dispatch_frame(&mut self.handlers, &mut self.stats, &frame);
                }
                Ok(None) => log::trace!("No frame on {}", channel.name()),
                Err(e @ BusError::ChannelClosed(_)) => {
                    log::error!("Dispatcher stopping: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    self.stats.receive_errors += 1;
                    log::warn!("{}", e);
                }
            }
        }

        let now = Instant::now();
        self.poll_transmits(now);
        self.poll_devices(now);
        Ok(())
    }

    fn poll_transmits(&mut self, now: Instant) {
        for job in self.transmits.iter_mut() {
            if job.next_due.map_or(false, |due| now < due) {
                continue;
            }
            job.next_due = Some(now + job.period);

            let channel = &mut self.channels[job.channel];
            let result = (job.producer)().and_then(|frame| channel.send(&frame));
            match result {
                Ok(()) => self.stats.frames_transmitted += 1,
                Err(e) => {
                    self.stats.transmit_failures += 1;
                    log::warn!("{}", e);
                }
            }
        }
    }

    fn poll_devices(&mut self, now: Instant) {
        for device in self.devices.iter_mut() {
            if device.next_due.map_or(false, |due| now < due) {
                continue;
            }
            device.next_due = Some(now + device.period);

            match device.sensor.measure_temperature() {
                Ok(temperature_c) => {
                    self.stats.device_reads += 1;
                    let reading = SensorReading {
                        device: device.sensor.name().to_string(),
                        temperature_c,
                        taken_at: Utc::now(),
                    };
                    let handler = &mut device.handler;
                    if !invoke_guarded(&reading.device, || handler(&reading)) {
                        self.stats.handler_failures += 1;
                    }
                }
                Err(e) => {
                    self.stats.device_failures += 1;
                    log::warn!("{}: read failed: {}", device.sensor.name(), e);
                }
            }
        }
    }
}

impl Default for TelemetryDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Route a frame to the handler registered for its exact identifier
fn dispatch_frame(handlers: &mut HashMap<u32, FrameHandler>, stats: &mut DispatchStats, frame: &Frame) {
    let Some(handler) = handlers.get_mut(&frame.id()) else {
        stats.unhandled_frames += 1;
        log::trace!("No handler for 0x{:03X}", frame.id());
        return;
    };

    log::debug!("Dispatching 0x{:03X}", frame.id());
    stats.frames_dispatched += 1;
    let label = format!("handler 0x{:03X}", frame.id());
    if !invoke_guarded(&label, || handler(frame)) {
        stats.handler_failures += 1;
    }
}

/// Call a handler, containing both returned errors and panics
fn invoke_guarded<F>(label: &str, call: F) -> bool
where
    F: FnOnce() -> anyhow::Result<()>,
{
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            log::warn!("{} failed: {:#}", label, e);
            false
        }
        Err(payload) => {
            log::error!("{} panicked: {}", label, panic_message(payload.as_ref()));
            false
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
