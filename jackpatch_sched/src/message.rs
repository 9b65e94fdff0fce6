//! Timestamped MIDI messages and the identifiers addressing them.

use core::fmt;

use crate::{MAX_MESSAGE_SIZE, error::QueueError};

/// Inline byte storage for a message. Moving it never touches the allocator.
pub type Payload = arrayvec::ArrayVec<u8, MAX_MESSAGE_SIZE>;

/// Identifies a port within one client.
///
/// Ids are handed out by the client and never reused for its whole lifetime,
/// so a stale id can only ever miss, never alias another port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortId(u32);

impl PortId {
    #[inline(always)]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline(always)]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Whether a port receives from or sends to the rest of the audio graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Events flow from the server into the client.
    Input,
    /// Events flow from the client out to the server.
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Input => "input",
            Self::Output => "output",
        })
    }
}

/// A MIDI message addressed to a port, at a time expressed in frames.
///
/// For outbound messages, `time` is relative to the start of the next block the
/// scheduler will process. For inbound messages it is the absolute frame at
/// which the event was captured, on the scheduler's block clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    port: PortId,
    time: u64,
    payload: Payload,
}

impl Message {
    /// Copies `bytes` into a new message.
    ///
    /// Fails if `bytes` is longer than [`MAX_MESSAGE_SIZE`].
    pub fn new(port: PortId, time: u64, bytes: &[u8]) -> Result<Self, QueueError> {
        let mut payload = Payload::new();

        payload
            .try_extend_from_slice(bytes)
            .map_err(|_| QueueError::PayloadTooLarge {
                len: bytes.len(),
                max: MAX_MESSAGE_SIZE,
            })?;

        Ok(Self::with_payload(port, time, payload))
    }

    #[inline(always)]
    pub const fn with_payload(port: PortId, time: u64, payload: Payload) -> Self {
        Self {
            port,
            time,
            payload,
        }
    }

    #[inline(always)]
    pub const fn port(&self) -> PortId {
        self.port
    }

    #[inline(always)]
    pub const fn time(&self) -> u64 {
        self.time
    }

    #[inline(always)]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[inline(always)]
    pub fn into_payload(self) -> Payload {
        self.payload
    }

    // only the schedule rewrites times, and only while it owns the message
    #[inline(always)]
    pub(crate) fn set_time(&mut self, time: u64) {
        self.time = time;
    }
}
