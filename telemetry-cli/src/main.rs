//! Vehicle Telemetry CLI Application
//!
//! This is the command-line front end for the telemetry-bus library.
//! It is the process entry point the library expects:
//! - Brings CAN interfaces up before opening channels, and down afterwards
//! - Adapts Ctrl-C to dispatcher cancellation
//! - Loads TOML configuration for the combined `run` mode
//! - Prints received frames and sensor readings

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use telemetry_bus::device::open_spidev;
use telemetry_bus::{
    CancellationToken, ChannelConfig, DispatchStats, DispatcherConfig, Frame, SensorConfig,
    SensorReading, TelemetryDispatcher, TEST_FRAME_ID,
};

mod config;
mod handlers;
mod session;

use config::{AppConfig, LinkConfig};
use handlers::{CounterPayload, OutputMode};
use session::LinkSession;

/// Vehicle Telemetry - CAN and SPI sensor diagnostics
#[derive(Parser, Debug)]
#[command(name = "telemetry-cli")]
#[command(about = "Send, receive and dispatch vehicle CAN frames and read SPI sensors", long_about = None)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Mode,

    /// Do not bring interfaces up/down (they are configured elsewhere)
    #[arg(long, global = true)]
    no_link: bool,

    /// Run `ip` without sudo
    #[arg(long, global = true)]
    no_sudo: bool,

    /// Print frames and readings as JSON lines
    #[arg(long, global = true)]
    json: bool,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Receive frames and print the named vehicle messages
    Receive {
        /// CAN interface
        #[arg(short, long, default_value = "can0")]
        channel: String,

        /// Nominal bitrate in bit/s
        #[arg(long, default_value_t = 1_000_000)]
        bitrate: u32,

        /// Enable CAN FD
        #[arg(long)]
        fd: bool,

        /// Receive window per iteration in milliseconds
        #[arg(long, default_value_t = 10_000)]
        timeout_ms: u64,

        /// Sleep between iterations in milliseconds
        #[arg(long, default_value_t = 100)]
        poll_ms: u64,
    },

    /// Transmit a counter frame periodically
    Transmit {
        /// CAN interface
        #[arg(short, long, default_value = "can0")]
        channel: String,

        /// Nominal bitrate in bit/s
        #[arg(long, default_value_t = 1_000_000)]
        bitrate: u32,

        /// Frame identifier (decimal or 0x-prefixed hex)
        #[arg(long, value_parser = parse_u32, default_value = "0x123")]
        id: u32,

        /// Transmit period in milliseconds
        #[arg(long, default_value_t = 100)]
        period_ms: u64,
    },

    /// Transmit on one interface and receive on another
    Bridge {
        /// Transmitting interface
        #[arg(long, default_value = "can0")]
        tx: String,

        /// Receiving interface
        #[arg(long, default_value = "can1")]
        rx: String,

        /// Nominal bitrate in bit/s
        #[arg(long, default_value_t = 1_000_000)]
        bitrate: u32,

        /// Frame identifier (decimal or 0x-prefixed hex)
        #[arg(long, value_parser = parse_u32, default_value = "0x123")]
        id: u32,

        /// Transmit period in milliseconds
        #[arg(long, default_value_t = 100)]
        period_ms: u64,

        /// Receive window on the rx interface in milliseconds (capped at the period)
        #[arg(long, default_value_t = 100)]
        timeout_ms: u64,
    },

    /// Read the BME688 temperature over SPI
    Sensor {
        /// spidev device node
        #[arg(long, default_value = "/dev/spidev0.0")]
        spi: String,

        /// SPI clock in Hz
        #[arg(long, default_value_t = 1_000_000)]
        speed_hz: u32,

        /// Expected chip identity (decimal or 0x-prefixed hex)
        #[arg(long, value_parser = parse_u8, default_value = "0x61")]
        chip_id: u8,

        /// Keep reading at this period instead of reading once
        #[arg(long)]
        interval_ms: Option<u64>,
    },

    /// Run channels, periodic transmits and the sensor from a config file
    Run {
        /// Path to configuration file (config.toml)
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(args.verbose, args.quiet);

    log::info!("Telemetry CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using telemetry-bus library v{}", telemetry_bus::VERSION);

    let output = if args.json { OutputMode::Json } else { OutputMode::Text };
    let link = LinkConfig {
        manage: !args.no_link,
        sudo: !args.no_sudo,
        ..LinkConfig::default()
    };

    let stats = match &args.command {
        Mode::Receive {
            channel,
            bitrate,
            fd,
            timeout_ms,
            poll_ms,
        } => {
            let channel = ChannelConfig::new(channel.as_str()).with_bitrate(*bitrate).with_fd(*fd);
            let timing = DispatcherConfig::new()
                .with_receive_timeout(Duration::from_millis(*timeout_ms))
                .with_poll_interval(Duration::from_millis(*poll_ms));
            receive_mode(channel, timing, &link, output)?
        }
        Mode::Transmit {
            channel,
            bitrate,
            id,
            period_ms,
        } => {
            let channel = ChannelConfig::new(channel.as_str()).with_bitrate(*bitrate);
            transmit_mode(channel, *id, Duration::from_millis(*period_ms), &link)?
        }
        Mode::Bridge {
            tx,
            rx,
            bitrate,
            id,
            period_ms,
            timeout_ms,
        } => {
            let tx = ChannelConfig::new(tx.as_str()).with_bitrate(*bitrate);
            let rx = ChannelConfig::new(rx.as_str()).with_bitrate(*bitrate);
            bridge_mode(
                tx,
                rx,
                *id,
                Duration::from_millis(*period_ms),
                Duration::from_millis(*timeout_ms),
                &link,
                output,
            )?
        }
        Mode::Sensor {
            spi,
            speed_hz,
            chip_id,
            interval_ms,
        } => {
            let mut sensor = SensorConfig::new().with_spi_path(spi.as_str());
            sensor.max_speed_hz = *speed_hz;
            sensor.expected_chip_id = *chip_id;
            match interval_ms {
                Some(ms) => {
                    sensor.read_interval_ms = *ms;
                    sensor_mode(&sensor, true, output)?
                }
                None => sensor_mode(&sensor, false, output)?,
            }
        }
        Mode::Run { config } => {
            log::info!("Loading configuration from: {:?}", config);
            let mut app_config = config::load_config(config)?;
            if args.no_link {
                app_config.link.manage = false;
            }
            if args.no_sudo {
                app_config.link.sudo = false;
            }
            log::debug!("Configuration loaded successfully");
            run_mode(&app_config, output)?
        }
    };

    if let Some(stats) = stats {
        log_stats(&stats);
    }
    Ok(())
}

/// Receive mode - print every named vehicle frame
fn receive_mode(
    channel: ChannelConfig,
    timing: DispatcherConfig,
    link: &LinkConfig,
    output: OutputMode,
) -> Result<Option<DispatchStats>> {
    let mut session = LinkSession::new(session::link_for(link));
    let mut dispatcher = TelemetryDispatcher::with_config(&timing);
    for bus in session.open_channels(std::slice::from_ref(&channel))? {
        dispatcher.add_channel(bus);
    }
    println!("Bus interface connected");

    handlers::register_vehicle_handlers(&mut dispatcher, output);
    run_until_interrupted(&mut dispatcher, timing.poll_interval(), &mut session).map(Some)
}

/// Transmit mode - send the bench test pattern periodically
fn transmit_mode(
    channel: ChannelConfig,
    id: u32,
    period: Duration,
    link: &LinkConfig,
) -> Result<Option<DispatchStats>> {
    let mut session = LinkSession::new(session::link_for(link));
    let mut dispatcher = TelemetryDispatcher::new();
    for bus in session.open_channels(std::slice::from_ref(&channel))? {
        dispatcher.add_channel(bus);
    }
    println!("Bus interface connected");

    add_test_pattern(&mut dispatcher, &channel.name, id, period)?;
    run_until_interrupted(&mut dispatcher, period, &mut session).map(Some)
}

/// Bridge mode - transmit on one interface, receive on the other
fn bridge_mode(
    tx: ChannelConfig,
    rx: ChannelConfig,
    id: u32,
    period: Duration,
    receive_timeout: Duration,
    link: &LinkConfig,
    output: OutputMode,
) -> Result<Option<DispatchStats>> {
    let mut session = LinkSession::new(session::link_for(link));
    let mut dispatcher = TelemetryDispatcher::new();
    dispatcher.set_receive_timeout(bridge_receive_window(receive_timeout, period));
    for bus in session.open_channels(&[tx.clone(), rx])? {
        dispatcher.add_channel(bus);
    }
    dispatcher.set_channel_receive_timeout(&tx.name, BRIDGE_POLL_INTERVAL)?;
    println!("Bus interface connected");

    add_test_pattern(&mut dispatcher, &tx.name, id, period)?;
    handlers::register_raw_handler(&mut dispatcher, id, output);
    run_until_interrupted(&mut dispatcher, BRIDGE_POLL_INTERVAL, &mut session).map(Some)
}

/// Sleep between bridge iterations, also the receive window on the tx side
const BRIDGE_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// The rx window never exceeds the transmit period, so one idle iteration
/// stays within `period` plus the two short tx-side waits
fn bridge_receive_window(receive_timeout: Duration, period: Duration) -> Duration {
    receive_timeout.min(period)
}

/// Sensor mode - verify, initialise, then read once or periodically
fn sensor_mode(sensor: &SensorConfig, periodic: bool, output: OutputMode) -> Result<Option<DispatchStats>> {
    let mut device = open_spidev(sensor).context("Could not open SPI device")?;

    if !device.verify_identity(sensor.expected_chip_id)? {
        bail!(
            "{} did not report chip id 0x{:02X}",
            sensor.spi_path,
            sensor.expected_chip_id
        );
    }
    println!("BME688 detected successfully.");
    device.initialize()?;

    if !periodic {
        println!("Reading Temperature...");
        let reading = SensorReading {
            device: sensor.name.clone(),
            temperature_c: device.measure_temperature()?,
            taken_at: chrono::Utc::now(),
        };
        println!("{}", handlers::render_reading(&reading, output)?);
        return Ok(None);
    }

    let mut dispatcher = TelemetryDispatcher::new();
    add_sensor(&mut dispatcher, sensor, device, output);

    let token = CancellationToken::new();
    session::cancel_on_ctrlc(&token)?;
    let stats = dispatcher.run(sensor.read_interval().min(Duration::from_millis(100)), &token)?;
    Ok(Some(stats))
}

/// Run mode - everything described by the configuration file
fn run_mode(config: &AppConfig, output: OutputMode) -> Result<Option<DispatchStats>> {
    let mut session = LinkSession::new(session::link_for(&config.link));
    let mut dispatcher = TelemetryDispatcher::with_config(&config.dispatcher);

    for bus in session.open_channels(&config.channels)? {
        dispatcher.add_channel(bus);
    }
    if !config.channels.is_empty() {
        handlers::register_vehicle_handlers(&mut dispatcher, output);
    }

    for entry in &config.transmit {
        let id = entry.id;
        let mut payload = CounterPayload::new(entry.payload.clone(), entry.counter_byte);
        dispatcher.add_periodic_transmit(&entry.channel, Duration::from_millis(entry.period_ms), move || {
            Frame::new(id, &payload.next_payload())
        })?;
    }

    if let Some(sensor) = &config.sensor {
        let mut device = open_spidev(sensor).context("Could not open SPI device")?;
        if !device.verify_identity(sensor.expected_chip_id)? {
            bail!("{} did not report chip id 0x{:02X}", sensor.spi_path, sensor.expected_chip_id);
        }
        device.initialize()?;
        add_sensor(&mut dispatcher, sensor, device, output);
    }

    run_until_interrupted(&mut dispatcher, config.dispatcher.poll_interval(), &mut session).map(Some)
}

fn add_test_pattern(dispatcher: &mut TelemetryDispatcher, channel: &str, id: u32, period: Duration) -> Result<()> {
    let mut payload = CounterPayload::test_pattern();
    dispatcher.add_periodic_transmit(channel, period, move || {
        let frame = Frame::new(id, &payload.next_payload())?;
        println!("message sent {}", frame);
        Ok(frame)
    })?;
    if id != TEST_FRAME_ID {
        log::debug!("Transmitting on 0x{:03X} instead of the bench id", id);
    }
    Ok(())
}

fn add_sensor(
    dispatcher: &mut TelemetryDispatcher,
    sensor: &SensorConfig,
    device: telemetry_bus::device::LinuxRegisterDevice,
    output: OutputMode,
) {
    dispatcher.add_device(device, sensor.read_interval(), move |reading: &SensorReading| {
        println!("{}", handlers::render_reading(reading, output)?);
        Ok(())
    });
}

/// Run the dispatcher until Ctrl-C, then take the interfaces down
fn run_until_interrupted(
    dispatcher: &mut TelemetryDispatcher,
    poll_interval: Duration,
    session: &mut LinkSession,
) -> Result<DispatchStats> {
    let token = CancellationToken::new();
    session::cancel_on_ctrlc(&token)?;

    let result = dispatcher.run(poll_interval, &token);
    session.take_down_all();
    Ok(result?)
}

fn log_stats(stats: &DispatchStats) {
    log::info!(
        "{} iteration(s): {} received, {} dispatched, {} unhandled, {} transmitted, {} device read(s)",
        stats.iterations,
        stats.frames_received,
        stats.frames_dispatched,
        stats.unhandled_frames,
        stats.frames_transmitted,
        stats.device_reads
    );
    let failures = stats.handler_failures
        + stats.receive_errors
        + stats.transmit_failures
        + stats.device_failures;
    if failures > 0 {
        log::warn!(
            "Failures: {} handler, {} receive, {} transmit, {} device",
            stats.handler_failures,
            stats.receive_errors,
            stats.transmit_failures,
            stats.device_failures
        );
    }
}

fn parse_u32(value: &str) -> std::result::Result<u32, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|e| format!("invalid number '{}': {}", value, e))
}

fn parse_u8(value: &str) -> std::result::Result<u8, String> {
    let wide = parse_u32(value)?;
    u8::try_from(wide).map_err(|_| format!("'{}' does not fit in one byte", value))
}

/// Level selected by `-q` / `-v` / `-vv`
fn log_level(verbose: u8, quiet: bool) -> log::LevelFilter {
    use log::LevelFilter;

    match (quiet, verbose) {
        (true, _) => LevelFilter::Error,
        (false, 0) => LevelFilter::Info,
        (false, 1) => LevelFilter::Debug,
        (false, _) => LevelFilter::Trace,
    }
}

/// Initialize logging; `RUST_LOG` directives refine the verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use std::io::Write;

    env_logger::Builder::new()
        .filter_level(log_level(verbose, quiet))
        .parse_default_env()
        .format(|buf, record| {
            writeln!(buf, "[{} {}] {}", record.level(), record.target(), record.args())
        })
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_numbers() {
        assert_eq!(parse_u32("0x123"), Ok(0x123));
        assert_eq!(parse_u32("0X7ff"), Ok(0x7FF));
        assert_eq!(parse_u32("291"), Ok(291));
        assert!(parse_u32("0xZZ").is_err());
        assert_eq!(parse_u8("0x61"), Ok(0x61));
        assert!(parse_u8("0x100").is_err());
    }

    #[test]
    fn test_args_parse_modes() {
        let args = Args::try_parse_from(["telemetry-cli", "--no-link", "transmit", "--id", "0x10"]).unwrap();
        assert!(args.no_link);
        match args.command {
            Mode::Transmit { channel, id, period_ms, .. } => {
                assert_eq!(channel, "can0");
                assert_eq!(id, 0x10);
                assert_eq!(period_ms, 100);
            }
            other => panic!("unexpected mode: {:?}", other),
        }

        let args = Args::try_parse_from(["telemetry-cli", "bridge", "--json"]).unwrap();
        assert!(args.json);
        assert!(matches!(args.command, Mode::Bridge { ref tx, ref rx, .. } if tx == "can0" && rx == "can1"));

        let args = Args::try_parse_from(["telemetry-cli", "sensor", "--interval-ms", "500"]).unwrap();
        assert!(matches!(args.command, Mode::Sensor { interval_ms: Some(500), chip_id: 0x61, .. }));
    }

    #[test]
    fn test_bridge_receive_window_capped_by_period() {
        let period = Duration::from_millis(100);
        assert_eq!(bridge_receive_window(Duration::from_millis(250), period), period);
        assert_eq!(
            bridge_receive_window(Duration::from_millis(20), period),
            Duration::from_millis(20)
        );

        let iteration = BRIDGE_POLL_INTERVAL + bridge_receive_window(period, period) + BRIDGE_POLL_INTERVAL;
        assert!(iteration <= period + Duration::from_millis(2));
    }

    #[test]
    fn test_log_level_from_flags() {
        use log::LevelFilter;

        assert_eq!(log_level(0, false), LevelFilter::Info);
        assert_eq!(log_level(1, false), LevelFilter::Debug);
        assert_eq!(log_level(4, false), LevelFilter::Trace);
        assert_eq!(log_level(2, true), LevelFilter::Error);
    }

    #[test]
    fn test_args_reject_bad_id() {
        assert!(Args::try_parse_from(["telemetry-cli", "transmit", "--id", "zz"]).is_err());
    }
}
