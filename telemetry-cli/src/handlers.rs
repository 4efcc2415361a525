//! Frame and reading handlers used by the CLI modes

use anyhow::Result;
use serde::Serialize;
use telemetry_bus::{Frame, FrameId, SensorReading, TelemetryDispatcher};

/// How received data is written to stdout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// `<NAME> message:` followed by the frame line
    Text,
    /// One JSON object per line
    Json,
}

#[derive(Serialize)]
struct FrameRecord<'a> {
    name: Option<&'static str>,
    #[serde(flatten)]
    frame: &'a Frame,
}

/// Render a frame the way the receive mode prints it
pub fn render_frame(label: Option<&'static str>, frame: &Frame, mode: OutputMode) -> Result<String> {
    match mode {
        OutputMode::Text => Ok(match label {
            Some(name) => format!("{} message:\n {}", name, frame),
            None => format!("message received: {}", frame),
        }),
        OutputMode::Json => Ok(serde_json::to_string(&FrameRecord { name: label, frame })?),
    }
}

/// Render a sensor reading
pub fn render_reading(reading: &SensorReading, mode: OutputMode) -> Result<String> {
    match mode {
        OutputMode::Text => Ok(format!(
            "{} {}: Temperature: {:.2} °C",
            reading.taken_at.format("%H:%M:%S%.3f"),
            reading.device,
            reading.temperature_c
        )),
        OutputMode::Json => Ok(serde_json::to_string(reading)?),
    }
}

/// Register a printing handler for every named vehicle frame
pub fn register_vehicle_handlers(dispatcher: &mut TelemetryDispatcher, mode: OutputMode) {
    for id in FrameId::ALL {
        dispatcher.register_handler(id, move |frame: &Frame| {
            println!("{}", render_frame(Some(id.label()), frame, mode)?);
            Ok(())
        });
    }
}

/// Register a printing handler for a single raw identifier
pub fn register_raw_handler(dispatcher: &mut TelemetryDispatcher, id: u32, mode: OutputMode) {
    dispatcher.register_handler(id, move |frame: &Frame| {
        println!("{}", render_frame(None, frame, mode)?);
        Ok(())
    });
}

/// Payload generator with a wrapping counter at one byte position
pub struct CounterPayload {
    payload: Vec<u8>,
    index: Option<usize>,
    counter: u8,
}

impl CounterPayload {
    pub fn new(payload: Vec<u8>, index: Option<usize>) -> Self {
        Self {
            payload,
            index,
            counter: 0,
        }
    }

    /// The bench test pattern: `[counter, 0x22, 0x33, ..., 0x88]`
    pub fn test_pattern() -> Self {
        Self::new(vec![0x00, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88], Some(0))
    }

    /// Next payload; the counter advances after each call
    pub fn next_payload(&mut self) -> Vec<u8> {
        let mut payload = self.payload.clone();
        if let Some(slot) = self.index.and_then(|i| payload.get_mut(i)) {
            *slot = self.counter;
        }
        self.counter = self.counter.wrapping_add(1);
        payload
    }
}
