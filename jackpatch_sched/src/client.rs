//! The control-thread API.
//!
//! A [`Client`] owns a [`Server`] connection and the control half of the
//! scheduler. Its life cycle:
//!
//! ```text
//! Closed --open--> Open --activate--> Active <--deactivate/activate--> Inactive
//!    ^                                   |                                |
//!    +----------------------------- close -----------------------------+
//! ```
//!
//! [`send`](Client::send), [`receive`](Client::receive), and the connection
//! methods activate the client first if needed, so a freshly created client can
//! be used right away.

use core::{
    mem,
    sync::atomic::{AtomicU32, Ordering},
};

use crate::{
    Diagnostic, SchedulerConfig,
    error::{ActivationError, ConnectionError, QueueError, Result},
    frames_to_seconds,
    message::{Direction, Message, Payload, PortId},
    process::{self, Controller, Processor},
    registry::PortRegistry,
    seconds_to_frames,
    server::Server,
};

static NEXT_CLIENT: AtomicU32 = AtomicU32::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientState {
    Closed,
    Open,
    Active,
    Inactive,
}

/// A port created through [`Client::register_port`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PortHandle {
    // the client that registered it
    client: u32,
    id: PortId,
    direction: Direction,
    name: String,
    managed: bool,
}

impl PortHandle {
    #[inline(always)]
    pub fn id(&self) -> PortId {
        self.id
    }

    #[inline(always)]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The full name of the port on the server.
    #[inline(always)]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the scheduler moves messages through this port.
    ///
    /// Ports registered past the configured capacity still exist on the
    /// server, but can't send or receive.
    #[inline(always)]
    pub fn is_managed(&self) -> bool {
        self.managed
    }
}

/// A message taken from the receive queue.
#[derive(Debug, Clone, PartialEq)]
pub struct Received {
    pub payload: Payload,
    /// Seconds since the client was opened, on the block clock.
    pub time: f64,
}

/// A client of an audio server, scheduling MIDI messages on its ports.
pub struct Client<S: Server> {
    name: String,
    server: S,
    id: u32,
    state: ClientState,
    config: SchedulerConfig,
    controller: Controller<S::Output, S::Input>,
    // `None` exactly while the server runs it
    processor: Option<Processor<S::Output, S::Input>>,
    ports: PortRegistry<(), ()>,
    next_port: u32,
    unmanaged_outputs: Vec<S::Output>,
    unmanaged_inputs: Vec<S::Input>,
    notes: Vec<Diagnostic>,
}

impl<S: Server> Client<S> {
    pub fn new(name: impl Into<String>, server: S) -> Self {
        Self::with_config(name, server, SchedulerConfig::default())
    }

    pub fn with_config(name: impl Into<String>, server: S, config: SchedulerConfig) -> Self {
        let (controller, processor) = process::channel(&config);

        Self {
            name: name.into(),
            server,
            id: NEXT_CLIENT.fetch_add(1, Ordering::Relaxed),
            state: ClientState::Closed,
            config,
            controller,
            processor: Some(processor),
            ports: PortRegistry::new(config.ports_per_direction().get()),
            next_port: 0,
            unmanaged_outputs: Vec::new(),
            unmanaged_inputs: Vec::new(),
            notes: Vec::new(),
        }
    }

    #[inline(always)]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline(always)]
    pub fn state(&self) -> ClientState {
        self.state
    }

    #[inline(always)]
    pub fn is_open(&self) -> bool {
        self.state != ClientState::Closed
    }

    #[inline(always)]
    pub fn is_active(&self) -> bool {
        self.state == ClientState::Active
    }

    #[inline(always)]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    #[inline(always)]
    pub fn server(&self) -> &S {
        &self.server
    }

    #[inline(always)]
    pub fn server_mut(&mut self) -> &mut S {
        &mut self.server
    }

    /// Frames per second of the server, while connected.
    pub fn sample_rate(&self) -> Option<u32> {
        self.is_open().then(|| self.server.sample_rate()).flatten()
    }

    /// Frames processed since the client was opened, as of the last block.
    #[inline]
    pub fn elapsed_frames(&self) -> u64 {
        self.controller.elapsed_frames()
    }

    /// Messages sent, but not yet written into a port buffer.
    #[inline]
    pub fn pending_sends(&self) -> usize {
        self.controller.pending_sends()
    }

    /// Messages received, but not yet taken with [`receive`](Self::receive).
    #[inline]
    pub fn pending_receives(&self) -> usize {
        self.controller.pending_receives()
    }

    /// Connects to the server. Does nothing if already connected.
    pub fn open(&mut self) -> core::result::Result<(), ConnectionError> {
        if self.is_open() {
            return Ok(());
        }

        self.server.open(&self.name).inspect_err(|e| {
            log::error!("client \"{}\": {e}", self.name);
        })?;

        self.state = ClientState::Open;

        log::info!(
            "client \"{}\" connected, sample rate: {:?}",
            self.name,
            self.server.sample_rate(),
        );

        Ok(())
    }

    /// Starts processing blocks, connecting first if needed. Does nothing if
    /// already active.
    ///
    /// If the server refuses, the connection is closed, and every queue reset.
    pub fn activate(&mut self) -> core::result::Result<(), ActivationError> {
        if self.is_active() {
            return Ok(());
        }

        self.open()?;

        let Some(processor) = self.processor.take() else {
            unreachable!("processor is only missing while active")
        };

        match self.server.activate(processor) {
            Ok(()) => {
                self.state = ClientState::Active;
                log::debug!("client \"{}\" activated", self.name);
                Ok(())
            }
            Err(e) => {
                log::error!("client \"{}\": {e}", self.name);
                self.teardown();
                Err(e)
            }
        }
    }

    /// Stops processing blocks. Does nothing unless active.
    ///
    /// When this returns, the process callback is not running anymore. If the
    /// server fails to stop it, the connection is dropped instead.
    pub fn deactivate(&mut self) -> core::result::Result<(), ActivationError> {
        if !self.is_active() {
            return Ok(());
        }

        match self.server.deactivate() {
            Ok(processor) => {
                self.processor = Some(processor);
                self.state = ClientState::Inactive;
                log::debug!("client \"{}\" deactivated", self.name);
                Ok(())
            }
            Err(e) => {
                log::error!("client \"{}\": {e}", self.name);
                self.teardown();
                Err(e)
            }
        }
    }

    /// Deactivates, disconnects from the server, and drops every pending
    /// message and every port. Does nothing if already closed.
    pub fn close(&mut self) {
        if !self.is_open() {
            return;
        }

        // on failure, the client was already torn down
        if self.deactivate().is_ok() {
            self.teardown();
        }
    }

    fn teardown(&mut self) {
        // port handles go before the connection they belong to
        if let Some(processor) = self.processor.as_mut() {
            processor.reset();
        }
        self.unmanaged_outputs.clear();
        self.unmanaged_inputs.clear();

        self.server.close();

        if self.processor.is_some() {
            self.controller.clear_received();
        } else {
            // lost along with the server's callback, start over
            let (controller, processor) = process::channel(&self.config);
            self.controller = controller;
            self.processor = Some(processor);
        }

        self.ports.clear();
        self.state = ClientState::Closed;

        log::info!("client \"{}\" closed", self.name);
    }

    /// Creates a MIDI port on the server, connecting first if needed.
    ///
    /// Past the configured number of ports per direction, the port is still
    /// created, but is not managed: a [`Diagnostic::RegistryFull`] is recorded,
    /// sending to it fails and receiving from it yields nothing.
    pub fn register_port(&mut self, name: &str, direction: Direction) -> Result<PortHandle> {
        self.open()?;

        let id = PortId::new(self.next_port);
        let full = self.ports.is_full(direction);

        let (full_name, managed) = match direction {
            Direction::Output => {
                let (handle, full_name) = self.server.register_output(name)?;

                let rejected = if full {
                    Some(handle)
                } else {
                    self.controller.add_output(id, handle).err().map(|e| e.item)
                };

                let managed = rejected.is_none();
                if managed {
                    let inserted = self.ports.insert_output(id, ());
                    debug_assert!(inserted.is_ok(), "room checked above");
                }
                self.unmanaged_outputs.extend(rejected);

                (full_name, managed)
            }
            Direction::Input => {
                let (handle, full_name) = self.server.register_input(name)?;

                let rejected = if full {
                    Some(handle)
                } else {
                    self.controller.add_input(id, handle).err().map(|e| e.item)
                };

                let managed = rejected.is_none();
                if managed {
                    let inserted = self.ports.insert_input(id, ());
                    debug_assert!(inserted.is_ok(), "room checked above");
                }
                self.unmanaged_inputs.extend(rejected);

                (full_name, managed)
            }
        };

        self.next_port = self.next_port.wrapping_add(1);

        if managed {
            log::debug!("client \"{}\": registered {direction} port {full_name}", self.name);
        } else {
            let diagnostic = Diagnostic::RegistryFull {
                port: id,
                direction,
            };
            log::warn!("client \"{}\": {diagnostic} ({full_name})", self.name);
            self.notes.push(diagnostic);
        }

        Ok(PortHandle {
            client: self.id,
            id,
            direction,
            name: full_name,
            managed,
        })
    }

    fn check_port(
        &self,
        port: &PortHandle,
        direction: Direction,
    ) -> core::result::Result<(), QueueError> {
        if port.client != self.id {
            return Err(QueueError::ForeignPort(port.id));
        }

        match self.ports.direction_of(port.id) {
            Some(d) if d == direction => Ok(()),
            Some(_) => Err(QueueError::WrongDirection(port.id)),
            None => Err(QueueError::UnmanagedPort(port.id)),
        }
    }

    /// Schedules `bytes` to be sent on `port`, `seconds` from the start of the
    /// next block.
    ///
    /// The delay is rounded to the nearest frame. Negative delays mean "as soon
    /// as possible". Ports of another client are refused.
    pub fn send(&mut self, port: &PortHandle, bytes: &[u8], seconds: f64) -> Result<()> {
        self.activate()?;
        self.check_port(port, Direction::Output)?;

        let frames = seconds_to_frames(seconds, self.sample_rate().unwrap_or_default());
        let message = Message::new(port.id, frames, bytes)?;

        self.controller.send(message)?;

        Ok(())
    }

    /// Takes the oldest message received on `port`, if any.
    ///
    /// Ports that aren't managed never receive anything. Ports of another
    /// client are refused.
    pub fn receive(&mut self, port: &PortHandle) -> Result<Option<Received>> {
        self.activate()?;

        match self.check_port(port, Direction::Input) {
            Ok(()) => (),
            Err(QueueError::UnmanagedPort(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let sample_rate = self.sample_rate().unwrap_or_default();

        Ok(self.controller.take_received(port.id).map(|message| Received {
            time: frames_to_seconds(message.time(), sample_rate),
            payload: message.into_payload(),
        }))
    }

    /// Connects two ports. Returns whether they are connected afterwards.
    pub fn connect(&mut self, source: &PortHandle, destination: &PortHandle) -> Result<bool> {
        self.connect_by_name(&source.name, &destination.name)
    }

    /// Disconnects two ports. Returns whether they are disconnected afterwards.
    pub fn disconnect(&mut self, source: &PortHandle, destination: &PortHandle) -> Result<bool> {
        self.disconnect_by_name(&source.name, &destination.name)
    }

    /// Like [`connect`](Self::connect), with full port names. Both ports may
    /// belong to other clients.
    pub fn connect_by_name(&mut self, source: &str, destination: &str) -> Result<bool> {
        self.activate()?;

        let connected = self.server.connect(source, destination);
        if connected {
            log::debug!("client \"{}\": connected {source} -> {destination}", self.name);
        } else {
            log::warn!("client \"{}\": failed to connect {source} -> {destination}", self.name);
        }

        Ok(connected)
    }

    pub fn disconnect_by_name(&mut self, source: &str, destination: &str) -> Result<bool> {
        self.activate()?;

        let disconnected = self.server.disconnect(source, destination);
        if disconnected {
            log::debug!("client \"{}\": disconnected {source} -> {destination}", self.name);
        } else {
            log::warn!("client \"{}\": failed to disconnect {source} -> {destination}", self.name);
        }

        Ok(disconnected)
    }

    /// Takes every diagnostic recorded so far, oldest first, logging each one.
    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        let mut diagnostics = mem::take(&mut self.notes);
        let start = diagnostics.len();

        diagnostics.extend(self.controller.diagnostics_mut().drain());

        // control-side ones were logged when recorded
        for diagnostic in &diagnostics[start..] {
            log::warn!("client \"{}\": {diagnostic}", self.name);
        }

        diagnostics
    }

    /// Diagnostics dropped because they weren't taken in time.
    #[inline]
    pub fn lost_diagnostics(&self) -> usize {
        self.controller.diagnostics().lost()
    }
}

impl<S: Server> Drop for Client<S> {
    fn drop(&mut self) {
        self.close();
    }
}
