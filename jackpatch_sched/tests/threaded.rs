//! The control and realtime halves running on different threads.

use core::{num::NonZeroUsize, sync::atomic};
use std::{
    sync::{Arc, Mutex, PoisonError},
    thread,
};

use jackpatch_sched::{
    BlockIo, BufferUnavailable, EventWriter, InputEvent, Message, PortId, SchedulerConfig,
    WriteError, process,
};

const BLOCK: u32 = 64;

type Sink = Arc<Mutex<Vec<(u64, Vec<u8>)>>>;

struct Block {
    start: u64,
}

struct SinkWriter<'a> {
    events: std::sync::MutexGuard<'a, Vec<(u64, Vec<u8>)>>,
    start: u64,
}

impl EventWriter for SinkWriter<'_> {
    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), WriteError> {
        self.events
            .push((self.start + u64::from(offset), bytes.to_vec()));
        Ok(())
    }
}

impl BlockIo for Block {
    type Output = Sink;
    // emits one event per block, carrying the block's start frame
    type Input = ();
    type Writer<'a> = SinkWriter<'a>;

    fn n_frames(&self) -> u32 {
        BLOCK
    }

    fn output_buffer<'a>(&'a self, port: &'a mut Sink) -> Option<SinkWriter<'a>> {
        Some(SinkWriter {
            events: port.lock().unwrap_or_else(PoisonError::into_inner),
            start: self.start,
        })
    }

    fn read_input(
        &self,
        _: &(),
        mut on_event: impl FnMut(InputEvent<'_>),
    ) -> Result<(), BufferUnavailable> {
        on_event(InputEvent {
            offset: 0,
            bytes: &self.start.to_le_bytes(),
        });
        Ok(())
    }
}

fn nz(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap()
}

#[test]
fn sends_from_another_thread_arrive_once_and_in_order() {
    const MESSAGES: u32 = 10_000;

    let config = SchedulerConfig::new()
        .with_ports_per_direction(nz(1))
        .with_send_capacity(nz(32));

    let (mut ctl, mut rt) = process::channel::<Sink, ()>(&config);

    let port = PortId::new(0);
    let sink = Sink::default();
    ctl.add_output(port, Arc::clone(&sink)).unwrap();

    let done = Arc::new(atomic::AtomicBool::new(false));

    let realtime = thread::spawn({
        let done = Arc::clone(&done);
        move || {
            let mut start = 0;
            loop {
                let finished = done.load(atomic::Ordering::Acquire);

                rt.process(&Block { start });
                start += u64::from(BLOCK);

                if finished && rt.schedule().is_empty() {
                    break;
                }
            }
        }
    });

    for i in 0..MESSAGES {
        let message = Message::new(port, 0, &i.to_le_bytes()).unwrap();
        while ctl.send(message.clone()).is_err() {
            thread::yield_now();
        }
    }

    done.store(true, atomic::Ordering::Release);
    realtime.join().unwrap();

    let events = sink.lock().unwrap();

    let tags: Vec<_> = events
        .iter()
        .map(|(_, bytes)| u32::from_le_bytes(bytes.as_slice().try_into().unwrap()))
        .collect();
    assert_eq!(tags, (0..MESSAGES).collect::<Vec<_>>());

    assert!(events.windows(2).all(|w| w[0].0 < w[1].0));
    assert!(ctl.diagnostics_mut().drain().next().is_none());
    assert_eq!(ctl.pending_sends(), 0);
}

#[test]
fn receives_on_another_thread_arrive_once_and_in_order() {
    const BLOCKS: u64 = 1000;

    let config = SchedulerConfig::new()
        .with_ports_per_direction(nz(1))
        .with_receive_capacity(nz(2048));

    let (mut ctl, mut rt) = process::channel::<Sink, ()>(&config);

    let port = PortId::new(0);
    ctl.add_input(port, ()).unwrap();

    let realtime = thread::spawn(move || {
        for block in 0..BLOCKS {
            rt.process(&Block {
                start: block * u64::from(BLOCK),
            });
        }
    });

    let mut times = Vec::new();

    while times.len() < BLOCKS as usize {
        match ctl.take_received(port) {
            Some(message) => {
                let start = u64::from_le_bytes(message.payload().try_into().unwrap());
                assert_eq!(message.time(), start);
                times.push(message.time());
            }
            None => thread::yield_now(),
        }
    }

    realtime.join().unwrap();

    let expected: Vec<_> = (0..BLOCKS).map(|b| b * u64::from(BLOCK)).collect();
    assert_eq!(times, expected);
    assert_eq!(ctl.elapsed_frames(), BLOCKS * u64::from(BLOCK));
    assert!(ctl.diagnostics_mut().drain().next().is_none());
}
