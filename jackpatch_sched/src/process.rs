//! The per-block realtime entry point, and the rings feeding it.
//!
//! A client is split in two halves by [`channel`]: a [`Controller`], used from
//! the control thread, and a [`Processor`], handed to the audio server and run
//! once per block on its realtime thread. The halves only talk through
//! wait-free SPSC rings and a couple of atomics, all allocated up front.
//!
//! Per block, the processor:
//!
//! 1. moves newly sent messages into its [`SendQueue`], then picks up newly
//!    registered ports (in that order, so a message's port is always known
//!    by the time the message is scheduled),
//! 2. for each output port, in registration order, writes the messages due in
//!    this block into the port's buffer,
//! 3. for each input port, in registration order, appends the block's events to
//!    the receive queue, stamped with their absolute frame,
//! 4. advances its block clock.
//!
//! Nothing in [`Processor::process`] locks, allocates or logs. Whatever goes
//! wrong is reported as a [`Diagnostic`].

use core::sync::atomic;
use std::sync::Arc;

use crate::{
    SchedulerConfig,
    diagnostics::{self, Diagnostic, Diagnostics, DiagnosticsTx},
    error::{BufferUnavailable, CapacityExceeded, QueueError, WriteError},
    message::{Message, PortId},
    queue,
    receive_queue::{self, ReceiveQueue, ReceiveTx},
    registry::PortRegistry,
    send_queue::SendQueue,
};

/// A writable output buffer, valid for one block.
pub trait EventWriter {
    /// Writes `bytes` at `offset` frames into the block.
    ///
    /// Offsets passed by the scheduler strictly increase within a block.
    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), WriteError>;
}

/// One event read from an input buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputEvent<'a> {
    /// Frames since the start of the block.
    pub offset: u32,
    pub bytes: &'a [u8],
}

/// What the audio server exposes of one block to the scheduler.
pub trait BlockIo {
    /// Native handle of an output port.
    type Output;
    /// Native handle of an input port.
    type Input;
    type Writer<'a>: EventWriter
    where
        Self: 'a;

    /// Length of the block, in frames.
    fn n_frames(&self) -> u32;

    /// Acquires the buffer of `port` for writing this block's events.
    fn output_buffer<'a>(&'a self, port: &'a mut Self::Output) -> Option<Self::Writer<'a>>;

    /// Calls `on_event` for every event `port` received during this block.
    fn read_input(
        &self,
        port: &Self::Input,
        on_event: impl FnMut(InputEvent<'_>),
    ) -> Result<(), BufferUnavailable>;
}

/// Anything that can be driven by an audio server, one block at a time.
pub trait BlockProcessor<B: BlockIo> {
    fn process_block(&mut self, block: &B);
}

pub(crate) enum PortCommand<O, I> {
    Output(PortId, O),
    Input(PortId, I),
}

/// Progress published by the realtime thread after every block.
#[derive(Debug, Default)]
struct Status {
    frames: atomic::AtomicU64,
    scheduled: atomic::AtomicUsize,
}

/// Splits a new client into its control and realtime halves.
pub fn channel<O, I>(config: &SchedulerConfig) -> (Controller<O, I>, Processor<O, I>) {
    let ports_per_direction = config.ports_per_direction().get();

    let (sends_tx, sends_rx) = rtrb::RingBuffer::new(config.send_capacity().get());
    let (ports_tx, ports_rx) = rtrb::RingBuffer::new(ports_per_direction.saturating_mul(2));
    let (received_tx, received) = receive_queue::receive_queue(config.receive_capacity().get());
    let (diagnostics_tx, diagnostics) =
        diagnostics::channel(config.diagnostics_capacity().get());

    let status = Arc::new(Status::default());

    let controller = Controller {
        sends: sends_tx,
        ports: ports_tx,
        received,
        diagnostics,
        status: Arc::clone(&status),
    };

    let processor = Processor {
        sends: sends_rx,
        ports: ports_rx,
        schedule: SendQueue::with_capacity(config.send_capacity().get()),
        registry: PortRegistry::new(ports_per_direction),
        received: received_tx,
        diagnostics: diagnostics_tx,
        status,
        frames: 0,
    };

    (controller, processor)
}

/// Control-thread half of a client's scheduler.
pub struct Controller<O, I> {
    sends: rtrb::Producer<Message>,
    ports: rtrb::Producer<PortCommand<O, I>>,
    received: ReceiveQueue,
    diagnostics: Diagnostics,
    status: Arc<Status>,
}

impl<O, I> Controller<O, I> {
    /// Hands `message` over to the realtime thread.
    ///
    /// Its time is counted from the start of the next block processed.
    #[inline]
    pub fn send(&mut self, message: Message) -> Result<(), QueueError> {
        self.sends.push(message).map_err(|_| QueueError::Full)
    }

    /// Asks the realtime thread to start servicing an output port.
    pub fn add_output(&mut self, id: PortId, handle: O) -> Result<(), CapacityExceeded<O>> {
        if self.ports.is_full() {
            return Err(CapacityExceeded {
                item: handle,
                capacity: self.ports.buffer().capacity(),
            });
        }

        let pushed = self.ports.push(PortCommand::Output(id, handle));
        // only the realtime side frees slots in between
        debug_assert!(pushed.is_ok(), "room checked above");
        Ok(())
    }

    /// Asks the realtime thread to start servicing an input port.
    pub fn add_input(&mut self, id: PortId, handle: I) -> Result<(), CapacityExceeded<I>> {
        if self.ports.is_full() {
            return Err(CapacityExceeded {
                item: handle,
                capacity: self.ports.buffer().capacity(),
            });
        }

        let pushed = self.ports.push(PortCommand::Input(id, handle));
        debug_assert!(pushed.is_ok(), "room checked above");
        Ok(())
    }

    /// Removes and returns the oldest message received on `port`.
    #[inline]
    pub fn take_received(&mut self, port: PortId) -> Option<Message> {
        self.received.take_for(port)
    }

    /// Messages sent but not delivered yet, whether still in flight to the
    /// realtime thread or already scheduled there.
    pub fn pending_sends(&self) -> usize {
        queue::producer_in_flight(&self.sends)
            + self.status.scheduled.load(atomic::Ordering::Acquire)
    }

    /// Messages received but not taken yet.
    #[inline]
    pub fn pending_receives(&self) -> usize {
        self.received.len()
    }

    /// Frames processed on the block clock, as of the last completed block.
    #[inline]
    pub fn elapsed_frames(&self) -> u64 {
        self.status.frames.load(atomic::Ordering::Acquire)
    }

    #[inline]
    pub fn diagnostics_mut(&mut self) -> &mut Diagnostics {
        &mut self.diagnostics
    }

    #[inline]
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Drops every received message not taken yet.
    pub fn clear_received(&mut self) {
        self.received.clear();
    }
}

/// Realtime half of a client's scheduler.
pub struct Processor<O, I> {
    sends: rtrb::Consumer<Message>,
    ports: rtrb::Consumer<PortCommand<O, I>>,
    schedule: SendQueue,
    registry: PortRegistry<O, I>,
    received: ReceiveTx,
    diagnostics: DiagnosticsTx,
    status: Arc<Status>,
    // start of the next block on the block clock
    frames: u64,
}

impl<O, I> Processor<O, I> {
    fn intake(&mut self) {
        for message in queue::drain_all(&mut self.sends) {
            let port = message.port();

            if self.schedule.enqueue(message).is_err() {
                self.diagnostics
                    .report(Diagnostic::SendPoolExhausted { port });
            }
        }

        // after the sends: every message picked up above was sent after its
        // port was registered, so the port is known once this loop is done
        for command in queue::drain_all(&mut self.ports) {
            let (port, direction, inserted) = match command {
                PortCommand::Output(id, handle) => (
                    id,
                    crate::Direction::Output,
                    self.registry.insert_output(id, handle).is_ok(),
                ),
                PortCommand::Input(id, handle) => (
                    id,
                    crate::Direction::Input,
                    self.registry.insert_input(id, handle).is_ok(),
                ),
            };

            if !inserted {
                self.diagnostics
                    .report(Diagnostic::RegistryFull { port, direction });
            }
        }
    }

    /// Runs the scheduler for one block.
    pub fn process<B>(&mut self, block: &B)
    where
        B: BlockIo<Output = O, Input = I>,
    {
        let n_frames = block.n_frames();

        self.intake();

        for (port, output) in self.registry.outputs_mut() {
            let Some(mut writer) = block.output_buffer(output) else {
                self.diagnostics
                    .report(Diagnostic::OutputBufferUnavailable { port });
                self.schedule.defer(port, n_frames);
                continue;
            };

            for message in self.schedule.drain_due(port, n_frames) {
                // due messages lie inside the block, so this never truncates
                let offset = message.time() as u32;

                if writer.write(offset, message.payload()).is_err() {
                    self.diagnostics
                        .report(Diagnostic::WriteFailed { port, offset });
                }
            }
        }

        let block_start = self.frames;

        for (port, input) in self.registry.inputs() {
            let read = block.read_input(input, |event| {
                let time = block_start.wrapping_add(u64::from(event.offset));

                match Message::new(port, time, event.bytes) {
                    Ok(message) => {
                        if self.received.append(message).is_err() {
                            self.diagnostics
                                .report(Diagnostic::ReceiveQueueFull { port });
                        }
                    }
                    Err(_) => self.diagnostics.report(Diagnostic::InboundTooLarge {
                        port,
                        len: event.bytes.len(),
                    }),
                }
            });

            if read.is_err() {
                self.diagnostics
                    .report(Diagnostic::InputBufferUnavailable { port });
            }
        }

        self.frames = self.frames.wrapping_add(u64::from(n_frames));
        self.publish();
    }

    #[inline]
    fn publish(&self) {
        self.status
            .frames
            .store(self.frames, atomic::Ordering::Release);
        self.status
            .scheduled
            .store(self.schedule.len(), atomic::Ordering::Release);
    }

    /// The messages waiting to be sent, as of the last block.
    #[inline(always)]
    pub fn schedule(&self) -> &SendQueue {
        &self.schedule
    }

    #[inline(always)]
    pub fn registry(&self) -> &PortRegistry<O, I> {
        &self.registry
    }

    /// Start of the next block on the block clock.
    #[inline(always)]
    pub fn elapsed_frames(&self) -> u64 {
        self.frames
    }

    /// Drops every pending message and forgets every port, rewinding the block
    /// clock to zero.
    ///
    /// Must only be called while no server runs this processor, typically
    /// after the connection was closed.
    pub fn reset(&mut self) {
        queue::drain_all(&mut self.sends).for_each(drop);
        queue::drain_all(&mut self.ports).for_each(drop);
        self.schedule.clear();
        self.registry.clear();
        self.frames = 0;
        self.publish();
    }
}

impl<B: BlockIo> BlockProcessor<B> for Processor<B::Output, B::Input> {
    #[inline(always)]
    fn process_block(&mut self, block: &B) {
        self.process(block);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Direction, nz};
    use std::cell::RefCell;

    /// A block whose output ports record into a shared log, and whose input
    /// ports replay a fixed list of events.
    struct TestBlock {
        n_frames: u32,
        outputs_available: bool,
        inputs_available: bool,
    }

    struct Recorder<'a> {
        log: &'a RefCell<Vec<(u32, Vec<u8>)>>,
        capacity: usize,
    }

    impl EventWriter for Recorder<'_> {
        fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), WriteError> {
            let mut log = self.log.borrow_mut();
            if log.len() >= self.capacity {
                return Err(WriteError::NoSpace);
            }
            log.push((offset, bytes.to_vec()));
            Ok(())
        }
    }

    #[derive(Debug)]
    struct TestOutput {
        log: RefCell<Vec<(u32, Vec<u8>)>>,
        capacity: usize,
    }

    impl TestOutput {
        fn new(capacity: usize) -> Self {
            Self {
                log: RefCell::new(Vec::new()),
                capacity,
            }
        }
    }

    impl BlockIo for TestBlock {
        type Output = TestOutput;
        type Input = Vec<(u32, Vec<u8>)>;
        type Writer<'a> = Recorder<'a>;

        fn n_frames(&self) -> u32 {
            self.n_frames
        }

        fn output_buffer<'a>(&'a self, port: &'a mut TestOutput) -> Option<Recorder<'a>> {
            self.outputs_available.then(|| Recorder {
                log: &port.log,
                capacity: port.capacity,
            })
        }

        fn read_input(
            &self,
            port: &Self::Input,
            mut on_event: impl FnMut(InputEvent<'_>),
        ) -> Result<(), BufferUnavailable> {
            if !self.inputs_available {
                return Err(BufferUnavailable);
            }
            for (offset, bytes) in port {
                on_event(InputEvent {
                    offset: *offset,
                    bytes,
                });
            }
            Ok(())
        }
    }

    fn block(n_frames: u32) -> TestBlock {
        TestBlock {
            n_frames,
            outputs_available: true,
            inputs_available: true,
        }
    }

    fn written(processor: &mut Processor<TestOutput, Vec<(u32, Vec<u8>)>>) -> Vec<(u32, Vec<u8>)> {
        processor
            .registry
            .outputs_mut()
            .flat_map(|(_, o)| o.log.take())
            .collect()
    }

    fn config() -> SchedulerConfig {
        SchedulerConfig::new()
            .with_ports_per_direction(nz(2))
            .with_send_capacity(nz(8))
            .with_receive_capacity(nz(4))
            .with_diagnostics_capacity(nz(16))
    }

    #[test]
    fn sent_messages_reach_their_port_at_their_offset() {
        let (mut ctl, mut rt) = channel(&config());
        let out = PortId::new(0);

        ctl.add_output(out, TestOutput::new(16)).unwrap();
        ctl.send(Message::new(out, 70, &[1]).unwrap()).unwrap();
        ctl.send(Message::new(out, 10, &[2]).unwrap()).unwrap();
        assert_eq!(ctl.pending_sends(), 2);

        rt.process(&block(64));
        assert_eq!(written(&mut rt), [(10, vec![2])]);
        assert_eq!(ctl.pending_sends(), 1);

        rt.process(&block(64));
        assert_eq!(written(&mut rt), [(6, vec![1])]);
        assert_eq!(ctl.pending_sends(), 0);
        assert_eq!(ctl.elapsed_frames(), 128);
    }

    #[test]
    fn inbound_events_get_absolute_times() {
        let (mut ctl, mut rt) = channel(&config());
        let inp = PortId::new(1);

        ctl.add_input(inp, vec![(3, vec![0x90, 60, 100]), (9, vec![0x80, 60, 0])])
            .unwrap();

        rt.process(&block(32));
        rt.process(&block(32));

        let times: Vec<_> = core::iter::from_fn(|| ctl.take_received(inp))
            .map(|m| m.time())
            .collect();

        assert_eq!(times, [3, 9, 35, 41]);
    }

    #[test]
    fn unavailable_output_buffer_defers_and_reports() {
        let (mut ctl, mut rt) = channel(&config());
        let out = PortId::new(0);

        ctl.add_output(out, TestOutput::new(16)).unwrap();
        ctl.send(Message::new(out, 5, &[1]).unwrap()).unwrap();
        ctl.send(Message::new(out, 40, &[2]).unwrap()).unwrap();

        rt.process(&TestBlock {
            outputs_available: false,
            ..block(32)
        });
        assert!(written(&mut rt).is_empty());

        rt.process(&block(32));
        assert_eq!(written(&mut rt), [(0, vec![1]), (8, vec![2])]);

        assert_eq!(
            ctl.diagnostics_mut().drain().collect::<Vec<_>>(),
            [Diagnostic::OutputBufferUnavailable { port: out }]
        );
    }

    #[test]
    fn unavailable_input_buffer_is_reported() {
        let (mut ctl, mut rt) = channel(&config());
        let inp = PortId::new(1);

        ctl.add_input(inp, vec![(0, vec![0xf8])]).unwrap();
        rt.process(&TestBlock {
            inputs_available: false,
            ..block(32)
        });

        assert!(ctl.take_received(inp).is_none());
        assert_eq!(
            ctl.diagnostics_mut().drain().collect::<Vec<_>>(),
            [Diagnostic::InputBufferUnavailable { port: inp }]
        );
    }

    #[test]
    fn failed_writes_are_reported_and_dropped() {
        let (mut ctl, mut rt) = channel(&config());
        let out = PortId::new(0);

        ctl.add_output(out, TestOutput::new(1)).unwrap();
        ctl.send(Message::new(out, 0, &[1]).unwrap()).unwrap();
        ctl.send(Message::new(out, 0, &[2]).unwrap()).unwrap();

        rt.process(&block(32));

        assert_eq!(written(&mut rt), [(0, vec![1])]);
        assert_eq!(rt.schedule().len(), 0);
        assert_eq!(
            ctl.diagnostics_mut().drain().collect::<Vec<_>>(),
            [Diagnostic::WriteFailed { port: out, offset: 1 }]
        );
    }

    #[test]
    fn full_receive_queue_drops_and_reports() {
        let (mut ctl, mut rt) = channel(&config());
        let inp = PortId::new(1);

        ctl.add_input(inp, (0..6).map(|i| (i, vec![0xf8])).collect())
            .unwrap();
        rt.process(&block(32));

        assert_eq!(ctl.pending_receives(), 4);
        let diagnostics: Vec<_> = ctl.diagnostics_mut().drain().collect();
        assert_eq!(diagnostics, [Diagnostic::ReceiveQueueFull { port: inp }; 2]);
    }

    #[test]
    fn oversized_inbound_events_are_dropped() {
        let (mut ctl, mut rt) = channel(&config());
        let inp = PortId::new(1);

        ctl.add_input(inp, vec![(0, vec![0xf0; crate::MAX_MESSAGE_SIZE + 1])])
            .unwrap();
        rt.process(&block(32));

        assert!(ctl.take_received(inp).is_none());
        assert_eq!(
            ctl.diagnostics_mut().drain().collect::<Vec<_>>(),
            [Diagnostic::InboundTooLarge {
                port: inp,
                len: crate::MAX_MESSAGE_SIZE + 1
            }]
        );
    }

    #[test]
    fn exhausted_pool_drops_and_reports() {
        let config = config().with_send_capacity(nz(2));
        let (mut ctl, mut rt) = channel(&config);
        let out = PortId::new(0);

        ctl.add_output(out, TestOutput::new(16)).unwrap();
        ctl.send(Message::new(out, 500, &[1]).unwrap()).unwrap();
        ctl.send(Message::new(out, 500, &[2]).unwrap()).unwrap();
        assert_eq!(
            ctl.send(Message::new(out, 500, &[3]).unwrap()),
            Err(QueueError::Full)
        );

        rt.process(&block(32));
        ctl.send(Message::new(out, 500, &[3]).unwrap()).unwrap();
        ctl.send(Message::new(out, 500, &[4]).unwrap()).unwrap();
        rt.process(&block(32));

        assert_eq!(rt.schedule().len(), 2);
        assert_eq!(
            ctl.diagnostics_mut().drain().collect::<Vec<_>>(),
            [Diagnostic::SendPoolExhausted { port: out }; 2]
        );
    }

    #[test]
    fn ports_beyond_the_realtime_capacity_are_reported() {
        let (mut ctl, mut rt) = channel(&config());

        for i in 0..3 {
            ctl.add_output(PortId::new(i), TestOutput::new(1)).unwrap();
        }
        ctl.add_output(PortId::new(3), TestOutput::new(1)).unwrap();

        rt.process(&block(32));

        assert_eq!(rt.registry().len(Direction::Output), 2);
        assert_eq!(
            ctl.diagnostics_mut().drain().collect::<Vec<_>>(),
            [
                Diagnostic::RegistryFull {
                    port: PortId::new(2),
                    direction: Direction::Output
                },
                Diagnostic::RegistryFull {
                    port: PortId::new(3),
                    direction: Direction::Output
                },
            ]
        );
    }

    #[test]
    fn reset_forgets_everything() {
        let (mut ctl, mut rt) = channel(&config());
        let out = PortId::new(0);

        ctl.add_output(out, TestOutput::new(16)).unwrap();
        ctl.send(Message::new(out, 500, &[1]).unwrap()).unwrap();
        rt.process(&block(32));
        ctl.send(Message::new(out, 0, &[2]).unwrap()).unwrap();

        rt.reset();

        assert_eq!(ctl.pending_sends(), 0);
        assert_eq!(ctl.elapsed_frames(), 0);
        assert_eq!(rt.registry().direction_of(out), None);
        assert!(rt.schedule().is_empty());
    }

    #[test]
    fn usable_through_the_block_processor_trait() {
        fn run<P: BlockProcessor<TestBlock>>(processor: &mut P) {
            processor.process_block(&block(16));
        }

        let (ctl, mut rt) = channel::<TestOutput, Vec<(u32, Vec<u8>)>>(&config());
        run(&mut rt);
        assert_eq!(ctl.elapsed_frames(), 16);
    }
}
