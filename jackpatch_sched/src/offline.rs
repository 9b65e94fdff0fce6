//! An in-process audio server, running blocks on demand.
//!
//! [`OfflineServer`] behaves like a real server as seen from a
//! [`Client`](crate::Client), minus the realtime thread: blocks are processed
//! when [`run_block`](OfflineServer::run_block) is called. Events can be
//! injected into input ports, and what the scheduler wrote into output ports
//! can be inspected afterwards. Failures (unreachable server, refused
//! activation, unavailable buffers, full buffers) can be simulated.
//!
//! Ports are shared between the server and the processor, behind mutexes. This
//! is fine for tests, not for a realtime thread.

use core::{mem, sync::atomic};
use std::sync::{Arc, Mutex, PoisonError};

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    error::{ActivationError, BufferUnavailable, ConnectionError, PortError, WriteError},
    message::Payload,
    process::{BlockIo, EventWriter, InputEvent, Processor},
    server::Server,
};

/// An event written by the scheduler into an output port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenEvent {
    /// Absolute frame, counted from when the server was opened.
    pub frame: u64,
    /// Frames since the start of the block it was written in.
    pub offset: u32,
    pub bytes: Payload,
}

#[derive(Debug)]
struct PortState {
    available: atomic::AtomicBool,
    // events an output buffer accepts per block
    capacity: atomic::AtomicUsize,
}

impl Default for PortState {
    fn default() -> Self {
        Self {
            available: atomic::AtomicBool::new(true),
            capacity: atomic::AtomicUsize::new(usize::MAX),
        }
    }
}

impl PortState {
    #[inline]
    fn is_available(&self) -> bool {
        self.available.load(atomic::Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Default)]
pub struct OfflineOutput {
    written: Arc<Mutex<Vec<WrittenEvent>>>,
    state: Arc<PortState>,
}

#[derive(Debug, Clone, Default)]
pub struct OfflineInput {
    pending: Arc<Mutex<Vec<(u32, Vec<u8>)>>>,
    state: Arc<PortState>,
}

/// One block of an [`OfflineServer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfflineBlock {
    start_frame: u64,
    n_frames: u32,
}

impl OfflineBlock {
    pub const fn new(start_frame: u64, n_frames: u32) -> Self {
        Self {
            start_frame,
            n_frames,
        }
    }
}

pub struct OfflineWriter<'a> {
    written: std::sync::MutexGuard<'a, Vec<WrittenEvent>>,
    block: &'a OfflineBlock,
    capacity: usize,
    count: usize,
    last_offset: Option<u32>,
}

impl EventWriter for OfflineWriter<'_> {
    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), WriteError> {
        if offset >= self.block.n_frames || self.last_offset.is_some_and(|last| offset < last) {
            return Err(WriteError::Rejected);
        }

        if self.count >= self.capacity {
            return Err(WriteError::NoSpace);
        }

        let bytes = Payload::try_from(bytes).map_err(|_| WriteError::NoSpace)?;

        self.written.push(WrittenEvent {
            frame: self.block.start_frame + u64::from(offset),
            offset,
            bytes,
        });

        self.count += 1;
        self.last_offset = Some(offset);

        Ok(())
    }
}

impl BlockIo for OfflineBlock {
    type Output = OfflineOutput;
    type Input = OfflineInput;
    type Writer<'a> = OfflineWriter<'a>;

    #[inline(always)]
    fn n_frames(&self) -> u32 {
        self.n_frames
    }

    fn output_buffer<'a>(&'a self, port: &'a mut OfflineOutput) -> Option<OfflineWriter<'a>> {
        port.state.is_available().then(|| OfflineWriter {
            written: port.written.lock().unwrap_or_else(PoisonError::into_inner),
            block: self,
            capacity: port.state.capacity.load(atomic::Ordering::Relaxed),
            count: 0,
            last_offset: None,
        })
    }

    fn read_input(
        &self,
        port: &OfflineInput,
        mut on_event: impl FnMut(InputEvent<'_>),
    ) -> Result<(), BufferUnavailable> {
        let mut events = mem::take(
            &mut *port.pending.lock().unwrap_or_else(PoisonError::into_inner),
        );

        if !port.state.is_available() {
            return Err(BufferUnavailable);
        }

        events.sort_by_key(|&(offset, _)| offset);

        for (offset, bytes) in &events {
            on_event(InputEvent {
                offset: *offset,
                bytes,
            });
        }

        Ok(())
    }
}

/// An audio server living in the current process. See the [module docs](self).
pub struct OfflineServer {
    sample_rate: u32,
    block_size: u32,
    reachable: bool,
    reject_activation: bool,
    fail_deactivation: bool,
    client_name: Option<String>,
    processor: Option<Processor<OfflineOutput, OfflineInput>>,
    outputs: FxHashMap<String, OfflineOutput>,
    inputs: FxHashMap<String, OfflineInput>,
    external: FxHashSet<String>,
    connections: FxHashSet<(String, String)>,
    frames: u64,
}

impl OfflineServer {
    pub fn new(sample_rate: u32, block_size: u32) -> Self {
        Self {
            sample_rate,
            block_size,
            reachable: true,
            reject_activation: false,
            fail_deactivation: false,
            client_name: None,
            processor: None,
            outputs: FxHashMap::default(),
            inputs: FxHashMap::default(),
            external: FxHashSet::default(),
            connections: FxHashSet::default(),
            frames: 0,
        }
    }

    /// A server nobody can connect to.
    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    pub fn reject_activation(mut self, reject: bool) -> Self {
        self.reject_activation = reject;
        self
    }

    pub fn fail_deactivation(mut self, fail: bool) -> Self {
        self.fail_deactivation = fail;
        self
    }

    #[inline(always)]
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Frames processed since the server was opened.
    #[inline(always)]
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Whether a processor is running.
    #[inline(always)]
    pub fn is_active(&self) -> bool {
        self.processor.is_some()
    }

    /// Makes a port of another client available for connections.
    pub fn add_external_port(&mut self, full_name: impl Into<String>) {
        self.external.insert(full_name.into());
    }

    /// Processes one block. Returns `false` if no processor is running.
    pub fn run_block(&mut self) -> bool {
        let Some(processor) = self.processor.as_mut() else {
            return false;
        };

        processor.process(&OfflineBlock::new(self.frames, self.block_size));
        self.frames += u64::from(self.block_size);

        true
    }

    /// Processes `n` blocks. Returns `false` if no processor is running.
    pub fn run_blocks(&mut self, n: usize) -> bool {
        (0..n).all(|_| self.run_block())
    }

    /// Queues an event on the input port `port`, to be read `offset` frames into
    /// the next block.
    ///
    /// Returns `false` if there is no such port, or the offset is out of the block.
    pub fn inject(&mut self, port: &str, offset: u32, bytes: &[u8]) -> bool {
        let Some(input) = self.inputs.get(port) else {
            return false;
        };

        if offset >= self.block_size {
            return false;
        }

        input
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((offset, bytes.to_vec()));

        true
    }

    /// Takes everything written into the output port `port` so far.
    pub fn take_written(&mut self, port: &str) -> Vec<WrittenEvent> {
        self.outputs
            .get(port)
            .map(|o| mem::take(&mut *o.written.lock().unwrap_or_else(PoisonError::into_inner)))
            .unwrap_or_default()
    }

    fn port_state(&self, port: &str) -> Option<&PortState> {
        self.outputs
            .get(port)
            .map(|o| &*o.state)
            .or_else(|| self.inputs.get(port).map(|i| &*i.state))
    }

    /// Makes the buffer of `port` (input or output) unavailable, or available again.
    ///
    /// Returns `false` if there is no such port.
    pub fn set_available(&mut self, port: &str, available: bool) -> bool {
        self.port_state(port)
            .map(|s| s.available.store(available, atomic::Ordering::Relaxed))
            .is_some()
    }

    /// Limits how many events the output port `port` accepts per block.
    ///
    /// Returns `false` if there is no such port.
    pub fn set_output_capacity(&mut self, port: &str, events: usize) -> bool {
        self.outputs
            .get(port)
            .map(|o| o.state.capacity.store(events, atomic::Ordering::Relaxed))
            .is_some()
    }

    pub fn is_connected(&self, source: &str, destination: &str) -> bool {
        self.connections
            .contains(&(source.to_owned(), destination.to_owned()))
    }

    fn knows(&self, port: &str) -> bool {
        self.outputs.contains_key(port)
            || self.inputs.contains_key(port)
            || self.external.contains(port)
    }

    fn full_name(&self, port: &str) -> Result<String, PortError> {
        let client = self.client_name.as_deref().ok_or(PortError::Closed)?;

        let reason = if port.is_empty() {
            "empty port name"
        } else if port.contains(':') {
            "port names can't contain ':'"
        } else {
            let full_name = format!("{client}:{port}");

            if !self.knows(&full_name) {
                return Ok(full_name);
            }

            "a port with this name already exists"
        };

        Err(PortError::Registration {
            name: port.to_owned(),
            reason: reason.to_owned(),
        })
    }
}

impl Server for OfflineServer {
    type Output = OfflineOutput;
    type Input = OfflineInput;

    fn open(&mut self, client_name: &str) -> Result<(), ConnectionError> {
        if !self.reachable {
            return Err(ConnectionError::ServerUnreachable);
        }

        if client_name.is_empty() {
            return Err(ConnectionError::ClientCreation("empty client name".into()));
        }

        self.client_name = Some(client_name.to_owned());
        self.frames = 0;

        Ok(())
    }

    fn close(&mut self) {
        self.processor = None;

        let outputs = mem::take(&mut self.outputs);
        let inputs = mem::take(&mut self.inputs);

        self.connections.retain(|(source, destination)| {
            let owned = |name: &String| outputs.contains_key(name) || inputs.contains_key(name);
            !owned(source) && !owned(destination)
        });

        self.client_name = None;
    }

    fn is_open(&self) -> bool {
        self.client_name.is_some()
    }

    fn sample_rate(&self) -> Option<u32> {
        self.is_open().then_some(self.sample_rate)
    }

    fn register_output(&mut self, name: &str) -> Result<(OfflineOutput, String), PortError> {
        let full_name = self.full_name(name)?;
        let port = OfflineOutput::default();

        self.outputs.insert(full_name.clone(), port.clone());

        Ok((port, full_name))
    }

    fn register_input(&mut self, name: &str) -> Result<(OfflineInput, String), PortError> {
        let full_name = self.full_name(name)?;
        let port = OfflineInput::default();

        self.inputs.insert(full_name.clone(), port.clone());

        Ok((port, full_name))
    }

    fn activate(
        &mut self,
        processor: Processor<OfflineOutput, OfflineInput>,
    ) -> Result<(), ActivationError> {
        if !self.is_open() {
            return Err(ActivationError::Rejected("not connected".into()));
        }

        if self.reject_activation {
            return Err(ActivationError::Rejected("activation refused".into()));
        }

        self.processor = Some(processor);

        Ok(())
    }

    fn deactivate(
        &mut self,
    ) -> Result<Processor<OfflineOutput, OfflineInput>, ActivationError> {
        if self.fail_deactivation {
            return Err(ActivationError::Deactivation("deactivation refused".into()));
        }

        self.processor
            .take()
            .ok_or_else(|| ActivationError::Deactivation("not active".into()))
    }

    fn connect(&mut self, source: &str, destination: &str) -> bool {
        if !self.knows(source) || !self.knows(destination) {
            return false;
        }

        self.connections
            .insert((source.to_owned(), destination.to_owned()));

        true
    }

    fn disconnect(&mut self, source: &str, destination: &str) -> bool {
        if !self.knows(source) || !self.knows(destination) {
            return false;
        }

        self.connections
            .remove(&(source.to_owned(), destination.to_owned()));

        true
    }
}
