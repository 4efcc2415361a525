// Runs the dispatcher against the in-memory bus: one channel transmits a
// counter frame, a second channel receives and prints it.
//
// cargo run -p telemetry-bus --example loopback_dispatch

use std::thread;
use std::time::Duration;
use telemetry_bus::{
    CancellationToken, Frame, FramedBusChannel, LoopbackBus, TelemetryDispatcher, TEST_FRAME_ID,
};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let bus = LoopbackBus::new();
    let mut dispatcher = TelemetryDispatcher::new();
    dispatcher.add_channel(FramedBusChannel::with_transport("tx", 1_000_000, false, Box::new(bus.endpoint())));
    dispatcher.add_channel(FramedBusChannel::with_transport("rx", 1_000_000, false, Box::new(bus.endpoint())));

    let mut counter = 0u8;
    dispatcher.add_periodic_transmit("tx", Duration::from_millis(100), move || {
        let frame = Frame::new(TEST_FRAME_ID, &[counter, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88]);
        counter = counter.wrapping_add(1);
        frame
    })?;

    dispatcher.register_handler(TEST_FRAME_ID, |frame: &Frame| {
        println!("message received: {}", frame);
        Ok(())
    });

    let token = CancellationToken::new();
    let stopper = token.clone();
    thread::spawn(move || {
        thread::sleep(Duration::from_secs(1));
        stopper.cancel();
    });

    let stats = dispatcher.run(Duration::from_millis(50), &token)?;
    println!("{:#?}", stats);
    Ok(())
}
