//! Realtime MIDI scheduling for audio-server clients.
//!
//! This crate moves timestamped MIDI messages between application code and the
//! periodic process callback of an audio server, keeping sample-accurate ordering
//! without ever blocking or allocating on the realtime thread.
//!
//! ## Scope
//!
//! - A time-ordered send schedule, backed by a pre-allocated slot pool, drained
//!   once per block into the hardware buffers ([`send_queue`]).
//! - A FIFO of received messages, filtered by port on dequeue ([`receive_queue`]).
//! - Fixed-capacity port bookkeeping ([`registry`]).
//! - The per-block realtime entry point ([`process`]) and the lock-free rings
//!   connecting it to the control thread.
//! - A [`Client`] driving any [`Server`] implementation through its
//!   `Closed → Open → Active ⇄ Inactive` life cycle.
//!
//! The audio server itself is an external collaborator: see the [`server`] module
//! for the interface, and the `jackpatch_jack` crate for the JACK implementation.

use core::num;

pub mod client;
pub mod diagnostics;
pub mod error;
pub mod message;
pub mod process;
pub mod queue;
pub mod receive_queue;
pub mod registry;
pub mod send_queue;
pub mod server;

#[cfg(feature = "offline")]
pub mod offline;

pub use client::{Client, ClientState, PortHandle, Received};
pub use diagnostics::Diagnostic;
pub use error::{
    ActivationError, BufferUnavailable, ConnectionError, Error, PortError, QueueError, Result,
    WriteError,
};
pub use message::{Direction, Message, Payload, PortId};
pub use process::{BlockIo, BlockProcessor, EventWriter, InputEvent, Processor};
pub use server::Server;

pub use arrayvec;
pub use rtrb;

#[inline(always)]
const fn nz(x: usize) -> num::NonZeroUsize {
    num::NonZeroUsize::new(x).unwrap()
}

/// Largest payload, in bytes, a single message can carry.
pub const MAX_MESSAGE_SIZE: usize = 256;

/// Hard upper bound on the number of ports, per direction, a client can manage.
pub const MAX_PORTS_PER_CLIENT: usize = 256;

/// Messages per port and per block the default pool is sized for.
pub const EXPECTED_MESSAGES_PER_BLOCK: usize = 16;

pub const DEFAULT_PORTS_PER_DIRECTION: num::NonZeroUsize = nz(MAX_PORTS_PER_CLIENT);

pub const DEFAULT_SEND_CAPACITY: num::NonZeroUsize =
    nz(MAX_PORTS_PER_CLIENT * EXPECTED_MESSAGES_PER_BLOCK);

pub const DEFAULT_RECEIVE_CAPACITY: num::NonZeroUsize = nz(4096);

pub const DEFAULT_DIAGNOSTICS_CAPACITY: num::NonZeroUsize = nz(256);

/// Sizes of every queue and table a client allocates up front.
///
/// Nothing here grows afterwards: the realtime thread only ever works within
/// these bounds, and overflowing any of them is reported, never waited on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    ports_per_direction: num::NonZeroUsize,
    send_capacity: num::NonZeroUsize,
    receive_capacity: num::NonZeroUsize,
    diagnostics_capacity: num::NonZeroUsize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerConfig {
    pub const fn new() -> Self {
        Self {
            ports_per_direction: DEFAULT_PORTS_PER_DIRECTION,
            send_capacity: DEFAULT_SEND_CAPACITY,
            receive_capacity: DEFAULT_RECEIVE_CAPACITY,
            diagnostics_capacity: DEFAULT_DIAGNOSTICS_CAPACITY,
        }
    }

    /// Sets how many ports of each direction get scheduled.
    ///
    /// Clamped to [`MAX_PORTS_PER_CLIENT`].
    #[inline(always)]
    pub const fn with_ports_per_direction(mut self, n: num::NonZeroUsize) -> Self {
        self.ports_per_direction = if n.get() > MAX_PORTS_PER_CLIENT {
            DEFAULT_PORTS_PER_DIRECTION
        } else {
            n
        };
        self
    }

    /// Sets both the send ring length and the number of slots in the send schedule.
    #[inline(always)]
    pub const fn with_send_capacity(mut self, n: num::NonZeroUsize) -> Self {
        self.send_capacity = n;
        self
    }

    #[inline(always)]
    pub const fn with_receive_capacity(mut self, n: num::NonZeroUsize) -> Self {
        self.receive_capacity = n;
        self
    }

    #[inline(always)]
    pub const fn with_diagnostics_capacity(mut self, n: num::NonZeroUsize) -> Self {
        self.diagnostics_capacity = n;
        self
    }

    #[inline(always)]
    pub const fn ports_per_direction(&self) -> num::NonZeroUsize {
        self.ports_per_direction
    }

    #[inline(always)]
    pub const fn send_capacity(&self) -> num::NonZeroUsize {
        self.send_capacity
    }

    #[inline(always)]
    pub const fn receive_capacity(&self) -> num::NonZeroUsize {
        self.receive_capacity
    }

    #[inline(always)]
    pub const fn diagnostics_capacity(&self) -> num::NonZeroUsize {
        self.diagnostics_capacity
    }
}

/// Converts a delay in seconds to a whole number of frames at `sample_rate`.
///
/// Negative and NaN delays map to zero, delays too large to represent saturate.
#[inline]
pub fn seconds_to_frames(seconds: f64, sample_rate: u32) -> u64 {
    // float to int casts saturate, and send NaN to 0
    (seconds * f64::from(sample_rate)).round().max(0.) as u64
}

/// Converts a frame count at `sample_rate` to seconds.
#[inline]
pub fn frames_to_seconds(frames: u64, sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return 0.;
    }
    frames as f64 / f64::from(sample_rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_round_to_nearest_frame() {
        assert_eq!(seconds_to_frames(0.01, 48_000), 480);
        assert_eq!(seconds_to_frames(0., 44_100), 0);
        assert_eq!(seconds_to_frames(1. / 3., 3), 1);
    }

    #[test]
    fn negative_and_nan_delays_clamp_to_zero() {
        assert_eq!(seconds_to_frames(-2.5, 48_000), 0);
        assert_eq!(seconds_to_frames(f64::NAN, 48_000), 0);
    }

    #[test]
    fn far_future_saturates() {
        assert_eq!(seconds_to_frames(f64::INFINITY, 48_000), u64::MAX);
        assert_eq!(seconds_to_frames(1e300, 48_000), u64::MAX);
    }

    #[test]
    fn frames_convert_back_to_seconds() {
        assert_eq!(frames_to_seconds(24_000, 48_000), 0.5);
        assert_eq!(frames_to_seconds(10, 0), 0.);
    }

    #[test]
    fn port_count_is_clamped() {
        let config = SchedulerConfig::new().with_ports_per_direction(nz(10_000));
        assert_eq!(config.ports_per_direction().get(), MAX_PORTS_PER_CLIENT);

        let config = SchedulerConfig::new().with_ports_per_direction(nz(3));
        assert_eq!(config.ports_per_direction().get(), 3);
    }
}
