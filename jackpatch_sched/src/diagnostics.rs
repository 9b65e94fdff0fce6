//! Reporting of recoverable failures, from the realtime thread to the control thread.
//!
//! The process callback has no caller to return errors to, and must not log.
//! Instead it pushes [`Diagnostic`]s onto a wait-free ring. When that ring is
//! full, the diagnostic is counted as lost instead.

use core::{fmt, sync::atomic};
use std::sync::Arc;

use crate::{
    message::{Direction, PortId},
    queue,
};

/// Something went wrong without stopping the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Diagnostic {
    /// No buffer could be acquired for an output port. Its messages were kept,
    /// and shifted by one block.
    OutputBufferUnavailable { port: PortId },
    /// No buffer could be acquired for an input port. Its events for the block
    /// are lost.
    InputBufferUnavailable { port: PortId },
    /// A due message could not be written into its port's buffer, and was dropped.
    WriteFailed { port: PortId, offset: u32 },
    /// The send schedule had no free slot, the message was dropped.
    SendPoolExhausted { port: PortId },
    /// The receive queue was full, the event was dropped.
    ReceiveQueueFull { port: PortId },
    /// An inbound event exceeded the maximum message size, and was dropped.
    InboundTooLarge { port: PortId, len: usize },
    /// A port was created, but the client had no room left to schedule it.
    /// MIDI I/O is disabled for that port.
    RegistryFull { port: PortId, direction: Direction },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::OutputBufferUnavailable { port } => {
                write!(f, "failed to get a buffer for sending on port {port}")
            }
            Self::InputBufferUnavailable { port } => {
                write!(f, "failed to get a buffer for receiving on port {port}")
            }
            Self::WriteFailed { port, offset } => write!(
                f,
                "failed to write a message at offset {offset} on port {port}"
            ),
            Self::SendPoolExhausted { port } => {
                write!(f, "send schedule full, dropped a message for port {port}")
            }
            Self::ReceiveQueueFull { port } => {
                write!(f, "receive queue full, dropped a message from port {port}")
            }
            Self::InboundTooLarge { port, len } => {
                write!(f, "dropped a {len} byte message from port {port}")
            }
            Self::RegistryFull { port, direction } => write!(
                f,
                "client has too many {direction} ports, MIDI is disabled for port {port}"
            ),
        }
    }
}

/// Creates a diagnostics channel holding at most `capacity` undelivered reports.
pub fn channel(capacity: usize) -> (DiagnosticsTx, Diagnostics) {
    let (tx, rx) = rtrb::RingBuffer::new(capacity);
    let lost = Arc::new(atomic::AtomicUsize::new(0));

    (
        DiagnosticsTx {
            tx,
            lost: Arc::clone(&lost),
        },
        Diagnostics { rx, lost },
    )
}

/// Realtime end of the diagnostics channel.
#[derive(Debug)]
pub struct DiagnosticsTx {
    tx: rtrb::Producer<Diagnostic>,
    lost: Arc<atomic::AtomicUsize>,
}

impl DiagnosticsTx {
    /// Records `diagnostic`. Never blocks.
    #[inline]
    pub fn report(&mut self, diagnostic: Diagnostic) {
        if self.tx.push(diagnostic).is_err() {
            self.lost.fetch_add(1, atomic::Ordering::Relaxed);
        }
    }
}

/// Control end of the diagnostics channel.
#[derive(Debug)]
pub struct Diagnostics {
    rx: rtrb::Consumer<Diagnostic>,
    lost: Arc<atomic::AtomicUsize>,
}

impl Diagnostics {
    /// Takes every diagnostic reported so far, oldest first.
    pub fn drain(&mut self) -> impl Iterator<Item = Diagnostic> + '_ {
        queue::drain_all(&mut self.rx)
    }

    /// Number of diagnostics that were dropped because nobody collected the
    /// previous ones in time.
    pub fn lost(&self) -> usize {
        self.lost.load(atomic::Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_arrive_in_order() {
        let (mut tx, mut rx) = channel(4);

        tx.report(Diagnostic::SendPoolExhausted { port: PortId::new(0) });
        tx.report(Diagnostic::ReceiveQueueFull { port: PortId::new(1) });

        assert_eq!(
            rx.drain().collect::<Vec<_>>(),
            [
                Diagnostic::SendPoolExhausted { port: PortId::new(0) },
                Diagnostic::ReceiveQueueFull { port: PortId::new(1) },
            ]
        );
        assert_eq!(rx.drain().count(), 0);
        assert_eq!(rx.lost(), 0);
    }

    #[test]
    fn overflow_is_counted_not_blocking() {
        let (mut tx, mut rx) = channel(1);

        for _ in 0..5 {
            tx.report(Diagnostic::InputBufferUnavailable { port: PortId::new(2) });
        }

        assert_eq!(rx.drain().count(), 1);
        assert_eq!(rx.lost(), 4);
    }

    #[test]
    fn messages_name_the_port() {
        let text = Diagnostic::RegistryFull {
            port: PortId::new(7),
            direction: Direction::Input,
        }
        .to_string();

        assert!(text.contains("#7"));
        assert!(text.contains("input"));
    }
}
