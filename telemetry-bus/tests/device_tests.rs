// Register device transactions against a simulated BME688

use embedded_hal::delay::DelayNs;
use embedded_hal::spi::{ErrorKind, ErrorType, Operation, SpiDevice};
use std::cell::RefCell;
use std::rc::Rc;
use telemetry_bus::device::bme688;
use telemetry_bus::{BusError, RegisterBusDevice, TemperatureSensor};

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Transfer(Vec<u8>),
    Delay(u32),
}

type Log = Rc<RefCell<Vec<Event>>>;

/// Register file behind a SPI interface, auto-incrementing on reads
///
/// Addresses are 7 bits on the wire, so every access is keyed by
/// `address & 0x7F`.
struct FakeChip {
    registers: [u8; 256],
    log: Log,
    fail: bool,
}

impl FakeChip {
    fn new(log: Log) -> Self {
        Self { registers: [0; 256], log, fail: false }
    }

    fn load(&mut self, address: u8, bytes: &[u8]) {
        let start = register_index(address);
        self.registers[start..start + bytes.len()].copy_from_slice(bytes);
    }
}

fn register_index(address: u8) -> usize {
    (address & 0x7F) as usize
}

impl ErrorType for FakeChip {
    type Error = ErrorKind;
}

impl SpiDevice for FakeChip {
    fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), Self::Error> {
        if self.fail {
            return Err(ErrorKind::Other);
        }

        for operation in operations.iter_mut() {
            match operation {
                Operation::Write(bytes) => {
                    self.log.borrow_mut().push(Event::Transfer(bytes.to_vec()));
                    if bytes.len() >= 2 && bytes[0] & 0x80 == 0 {
                        self.registers[register_index(bytes[0])] = bytes[1];
                    }
                }
                Operation::TransferInPlace(buffer) => {
                    self.log.borrow_mut().push(Event::Transfer(buffer.to_vec()));
                    let start = register_index(buffer[0]);
                    buffer[0] = 0xFF; // dummy byte
                    for i in 1..buffer.len() {
                        buffer[i] = self.registers[start + i - 1];
                    }
                }
                _ => return Err(ErrorKind::Other),
            }
        }
        Ok(())
    }
}

struct RecordingDelay {
    log: Log,
}

impl DelayNs for RecordingDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.log.borrow_mut().push(Event::Delay(ns / 1_000_000));
    }

    fn delay_ms(&mut self, ms: u32) {
        self.log.borrow_mut().push(Event::Delay(ms));
    }
}

fn device_with_log() -> (RegisterBusDevice<FakeChip, RecordingDelay>, Log) {
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let mut chip = FakeChip::new(Rc::clone(&log));
    chip.load(bme688::CHIP_ID, &[bme688::EXPECTED_CHIP_ID]);
    // dig_T1 = 27504, dig_T2 = 26435, dig_T3 = 3
    chip.load(bme688::CALIB_DATA, &[0x70, 0x6B, 0x43, 0x67, 0x03, 0x00]);
    // adc = 519888 = 0x7EED0
    chip.load(bme688::TEMP_MSB, &[0x7E, 0xED, 0x00]);
    let delay = RecordingDelay { log: Rc::clone(&log) };
    (RegisterBusDevice::new("bme688", chip, delay), log)
}

#[test]
fn write_register_clears_read_bit() {
    let (mut device, log) = device_with_log();
    device.write_register(0xF4, 0x21).unwrap();
    assert_eq!(log.borrow().as_slice(), &[Event::Transfer(vec![0x74, 0x21])]);
}

#[test]
fn read_register_sets_read_bit_and_drops_dummy_byte() {
    let (mut device, log) = device_with_log();
    let value = device.read_register(bme688::CALIB_DATA, 6).unwrap();

    assert_eq!(value.address, bme688::CALIB_DATA);
    assert_eq!(value.raw_bytes, vec![0x70, 0x6B, 0x43, 0x67, 0x03, 0x00]);
    assert_eq!(
        log.borrow().as_slice(),
        &[Event::Transfer(vec![0x88, 0, 0, 0, 0, 0, 0])]
    );
}

#[test]
fn zero_length_read_is_rejected() {
    let (mut device, log) = device_with_log();
    assert!(matches!(
        device.read_register(0x22, 0),
        Err(BusError::InvalidRequest(_))
    ));
    assert!(log.borrow().is_empty());
}

#[test]
fn oversized_read_is_rejected() {
    let (mut device, log) = device_with_log();
    assert!(matches!(
        device.read_register(bme688::TEMP_MSB, usize::MAX),
        Err(BusError::InvalidRequest(_))
    ));
    assert!(log.borrow().is_empty());
}

#[test]
fn chip_reads_back_loaded_registers() {
    let (mut device, _log) = device_with_log();
    assert_eq!(device.read_register(bme688::TEMP_MSB, 3).unwrap().raw_bytes, vec![0x7E, 0xED, 0x00]);
    device.write_register(bme688::CTRL_MEAS, 0x21).unwrap();
    assert_eq!(device.read_register(bme688::CTRL_MEAS, 1).unwrap().first(), Some(0x21));
}

#[test]
fn verify_identity_mismatch_is_not_an_error() {
    let (mut device, _log) = device_with_log();
    assert!(device.verify_identity(bme688::EXPECTED_CHIP_ID).unwrap());
    assert!(!device.verify_identity(0x60).unwrap());
}

#[test]
fn reset_waits_after_command() {
    let (mut device, log) = device_with_log();
    device.reset().unwrap();

    let events = log.borrow();
    assert_eq!(events[0], Event::Transfer(vec![0x60, 0xB6]));
    match events[1] {
        Event::Delay(ms) => assert!(ms >= 100),
        ref other => panic!("expected delay, got {:?}", other),
    }
}

#[test]
fn initialize_runs_reset_then_gas_disable() {
    let (mut device, log) = device_with_log();
    device.initialize().unwrap();

    assert_eq!(
        log.borrow().as_slice(),
        &[
            Event::Transfer(vec![0x60, 0xB6]),
            Event::Delay(100),
            Event::Transfer(vec![0x71, 0x00]),
            Event::Delay(100),
        ]
    );
}

#[test]
fn read_calibration_decodes_block() {
    let (mut device, _log) = device_with_log();
    let calib = device.read_calibration().unwrap();
    assert_eq!(calib.dig_t1, 27504);
    assert_eq!(calib.dig_t2, 26435);
    assert_eq!(calib.dig_t3, 3);
}

#[test]
fn measure_temperature_sequence_and_result() {
    let (mut device, log) = device_with_log();
    let temperature = device.measure_temperature().unwrap();

    let adc = 519888.0_f64;
    let var1 = (adc / 16384.0 - 27504.0 / 1024.0) * 26435.0;
    let var2 = (adc / 131072.0 - 27504.0 / 8192.0).powi(2) * 3.0;
    let expected = (var1 + var2) / 5120.0;
    assert!((temperature - expected).abs() < 1e-9, "{} != {}", temperature, expected);

    let events = log.borrow();
    assert_eq!(events[0], Event::Transfer(vec![0x74, 0x21]));
    match events[1] {
        Event::Delay(ms) => assert!(ms >= 200),
        ref other => panic!("expected delay, got {:?}", other),
    }
    assert_eq!(events[2], Event::Transfer(vec![0xA2, 0, 0, 0]));
    assert_eq!(events[3], Event::Transfer(vec![0x88, 0, 0, 0, 0, 0, 0]));
}

#[test]
fn calibration_is_read_on_every_measurement() {
    let (mut device, log) = device_with_log();
    device.measure_temperature().unwrap();
    device.measure_temperature().unwrap();

    let calibration_reads = log
        .borrow()
        .iter()
        .filter(|e| matches!(e, Event::Transfer(bytes) if bytes[0] == 0x88))
        .count();
    assert_eq!(calibration_reads, 2);
}

#[test]
fn transfer_failure_maps_to_io_error() {
    let (device, _log) = device_with_log();
    let (mut chip, delay) = device.release();
    chip.fail = true;
    let mut device = RegisterBusDevice::new("bme688", chip, delay);

    assert!(matches!(device.write_register(0x74, 0x21), Err(BusError::Io(_))));
    assert!(matches!(device.read_register(0x50, 1), Err(BusError::Io(_))));
    assert!(matches!(device.verify_identity(0x61), Err(BusError::Io(_))));
    assert!(matches!(
        TemperatureSensor::measure_temperature(&mut device),
        Err(BusError::Io(_))
    ));
    assert_eq!(TemperatureSensor::name(&device), "bme688");
}
