//! The interface a [`Client`](crate::Client) expects from an audio server.
//!
//! Implementations own the native connection. They create native ports, and
//! run a [`Processor`] once per block on the server's realtime thread between
//! [`activate`](Server::activate) and [`deactivate`](Server::deactivate).

use crate::{
    error::{ActivationError, ConnectionError, PortError},
    process::Processor,
};

/// A connection to an audio server.
///
/// Every method is called from the control thread.
pub trait Server {
    /// Native handle of an output port, moved to the realtime thread once registered.
    type Output: Send + 'static;
    /// Native handle of an input port, moved to the realtime thread once registered.
    type Input: Send + 'static;

    /// Connects to the server under `client_name`.
    fn open(&mut self, client_name: &str) -> Result<(), ConnectionError>;

    /// Drops the connection. If a processor is still running, it is stopped
    /// and dropped.
    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Frames per second of the server, once connected.
    fn sample_rate(&self) -> Option<u32>;

    /// Creates an output port named `name`.
    ///
    /// Returns the native handle, along with the port's full name, as used
    /// by [`connect`](Self::connect).
    fn register_output(&mut self, name: &str) -> Result<(Self::Output, String), PortError>;

    /// Creates an input port named `name`. See [`register_output`](Self::register_output).
    fn register_input(&mut self, name: &str) -> Result<(Self::Input, String), PortError>;

    /// Starts calling `processor` once per block.
    ///
    /// On failure the processor is dropped.
    fn activate(
        &mut self,
        processor: Processor<Self::Output, Self::Input>,
    ) -> Result<(), ActivationError>;

    /// Stops the processor started by [`activate`](Self::activate) and hands it back.
    ///
    /// When this returns, the processor's last block has completed.
    fn deactivate(&mut self) -> Result<Processor<Self::Output, Self::Input>, ActivationError>;

    /// Connects the port named `source` to the one named `destination`.
    ///
    /// Returns whether both are connected afterwards, so connecting twice
    /// succeeds.
    fn connect(&mut self, source: &str, destination: &str) -> bool;

    /// Disconnects the port named `source` from the one named `destination`.
    ///
    /// Returns whether both are disconnected afterwards.
    fn disconnect(&mut self, source: &str, destination: &str) -> bool;
}
