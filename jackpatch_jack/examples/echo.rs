//! Echoes every MIDI message received on `echo:in` back out of `echo:out`.
//!
//! Usage: `echo [SOURCE_PORT [DESTINATION_PORT]]`, e.g.
//! `echo "a2j:Keyboard [20] (capture): Keyboard MIDI 1" "fluidsynth:midi_00"`

use core::{convert::Infallible, time::Duration};
use std::thread;

use jackpatch_jack::{
    JackClient, JackServer,
    sched::{Direction, Result},
};

const POLL_INTERVAL: Duration = Duration::from_millis(1);

fn main() -> Result<Infallible> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut client = JackClient::new("echo", JackServer::new());

    let input = client.register_port("in", Direction::Input)?;
    let output = client.register_port("out", Direction::Output)?;

    client.activate()?;

    let mut args = std::env::args().skip(1);

    if let Some(source) = args.next() {
        client.connect_by_name(&source, input.name())?;
    }

    if let Some(destination) = args.next() {
        client.connect_by_name(output.name(), &destination)?;
    }

    log::info!("echoing {} to {}", input.name(), output.name());

    loop {
        while let Some(message) = client.receive(&input)? {
            log::debug!("{:02x?} at {:.3}s", message.payload.as_slice(), message.time);
            client.send(&output, &message.payload, 0.)?;
        }

        // logs them
        client.take_diagnostics();

        thread::sleep(POLL_INTERVAL);
    }
}
