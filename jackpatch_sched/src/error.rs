//! Error types for the scheduler and its control API.
//!
//! Control-thread operations return these synchronously. Failures on the
//! realtime path are never returned to anyone: they become
//! [`Diagnostic`](crate::Diagnostic)s instead.

use core::fmt;

use thiserror::Error;

use crate::message::PortId;

/// Failures establishing or using the connection to the audio server.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("failed to connect to the audio server")]
    ServerUnreachable,

    #[error("failed to communicate with the audio server")]
    Communication,

    #[error("failed to create a client: {0}")]
    ClientCreation(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActivationError {
    #[error(transparent)]
    Open(#[from] ConnectionError),

    #[error("the server refused to activate the client: {0}")]
    Rejected(String),

    #[error("failed to deactivate the client: {0}")]
    Deactivation(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PortError {
    #[error("failed to register a port named \"{name}\": {reason}")]
    Registration { name: String, reason: String },

    #[error("the client is not connected to a server")]
    Closed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue is full")]
    Full,

    #[error("no free slot left in the send schedule")]
    PoolExhausted,

    #[error("payload of {len} bytes exceeds the maximum message size of {max} bytes")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("port {0} is not managed by the scheduler")]
    UnmanagedPort(PortId),

    #[error("port {0} belongs to another client")]
    ForeignPort(PortId),

    #[error("port {0} cannot be used in this direction")]
    WrongDirection(PortId),
}

/// Failure writing one event into an output buffer.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteError {
    #[error("not enough space left in the port buffer")]
    NoSpace,

    #[error("the port buffer rejected the event")]
    Rejected,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("the port buffer could not be acquired for this block")]
pub struct BufferUnavailable;

/// A fixed-capacity table is full. Hands the rejected item back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapacityExceeded<T> {
    pub item: T,
    pub capacity: usize,
}

impl<T> fmt::Display for CapacityExceeded<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "capacity of {} exceeded", self.capacity)
    }
}

impl<T: fmt::Debug> std::error::Error for CapacityExceeded<T> {}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Activation(#[from] ActivationError),

    #[error(transparent)]
    Port(#[from] PortError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

pub type Result<T> = core::result::Result<T, Error>;
