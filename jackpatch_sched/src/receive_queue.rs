//! The FIFO of inbound messages, from the realtime thread to the control thread.
//!
//! The realtime end only ever appends to a wait-free ring. The control end moves
//! whatever arrived into its own deque before searching it, so consumers can
//! pick out one port's messages without disturbing the order of the others.

use std::collections::VecDeque;

use crate::{
    error::QueueError,
    message::{Message, PortId},
    queue,
};

/// Creates a receive queue holding at most `capacity` messages in flight.
pub fn receive_queue(capacity: usize) -> (ReceiveTx, ReceiveQueue) {
    let (tx, rx) = rtrb::RingBuffer::new(capacity);

    (
        ReceiveTx { tx },
        ReceiveQueue {
            rx,
            pending: VecDeque::new(),
        },
    )
}

/// Realtime end of a [`ReceiveQueue`].
#[derive(Debug)]
pub struct ReceiveTx {
    tx: rtrb::Producer<Message>,
}

impl ReceiveTx {
    /// Appends `message` at the tail. Wait-free and allocation-free.
    ///
    /// When the ring is full the message is dropped.
    #[inline(always)]
    pub fn append(&mut self, message: Message) -> Result<(), QueueError> {
        self.tx.push(message).map_err(|_| QueueError::Full)
    }
}

/// Control end of the receive path.
#[derive(Debug)]
pub struct ReceiveQueue {
    rx: rtrb::Consumer<Message>,
    pending: VecDeque<Message>,
}

impl ReceiveQueue {
    #[inline]
    fn collect(&mut self) {
        self.pending.extend(queue::drain_all(&mut self.rx));
    }

    /// Removes and returns the oldest message received on `port`.
    ///
    /// Messages of other ports keep their relative order, including those that
    /// arrived before the returned one.
    pub fn take_for(&mut self, port: PortId) -> Option<Message> {
        self.collect();

        let idx = self.pending.iter().position(|m| m.port() == port)?;
        self.pending.remove(idx)
    }

    /// Number of messages waiting, across all ports.
    pub fn len(&self) -> usize {
        self.pending.len() + self.rx.slots()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every waiting message.
    pub fn clear(&mut self) {
        self.collect();
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: PortId = PortId::new(0);
    const B: PortId = PortId::new(1);

    fn msg(port: PortId, tag: u8) -> Message {
        Message::new(port, u64::from(tag), &[tag]).unwrap()
    }

    fn tag(message: Option<Message>) -> Option<u8> {
        message.map(|m| m.payload()[0])
    }

    #[test]
    fn ports_are_isolated_and_ordered() {
        let (mut tx, mut rx) = receive_queue(16);

        for (port, t) in [(A, 0), (B, 1), (A, 2), (B, 3), (B, 4), (A, 5)] {
            tx.append(msg(port, t)).unwrap();
        }

        assert_eq!(tag(rx.take_for(B)), Some(1));
        assert_eq!(tag(rx.take_for(A)), Some(0));
        assert_eq!(tag(rx.take_for(A)), Some(2));
        assert_eq!(tag(rx.take_for(B)), Some(3));
        assert_eq!(tag(rx.take_for(A)), Some(5));
        assert_eq!(tag(rx.take_for(A)), None);
        assert_eq!(tag(rx.take_for(B)), Some(4));
        assert!(rx.is_empty());
    }

    #[test]
    fn unknown_port_yields_nothing_and_keeps_the_rest() {
        let (mut tx, mut rx) = receive_queue(4);

        tx.append(msg(A, 0)).unwrap();

        assert!(rx.take_for(PortId::new(9)).is_none());
        assert_eq!(rx.len(), 1);
    }

    #[test]
    fn full_ring_drops_new_messages() {
        let (mut tx, mut rx) = receive_queue(2);

        tx.append(msg(A, 0)).unwrap();
        tx.append(msg(A, 1)).unwrap();
        assert_eq!(tx.append(msg(A, 2)), Err(QueueError::Full));

        // the control side making room lets the realtime side continue
        assert_eq!(tag(rx.take_for(A)), Some(0));
        tx.append(msg(A, 3)).unwrap();

        assert_eq!(tag(rx.take_for(A)), Some(1));
        assert_eq!(tag(rx.take_for(A)), Some(3));
    }

    #[test]
    fn len_counts_both_sides() {
        let (mut tx, mut rx) = receive_queue(8);

        tx.append(msg(A, 0)).unwrap();
        tx.append(msg(B, 1)).unwrap();
        tx.append(msg(B, 2)).unwrap();
        assert_eq!(rx.len(), 3);

        // moves everything to the deque, takes one out
        rx.take_for(B);
        assert_eq!(rx.len(), 2);

        tx.append(msg(A, 3)).unwrap();
        assert_eq!(rx.len(), 3);
    }

    #[test]
    fn clear_drops_everything() {
        let (mut tx, mut rx) = receive_queue(8);

        tx.append(msg(A, 0)).unwrap();
        rx.take_for(B);
        tx.append(msg(B, 1)).unwrap();

        rx.clear();
        assert!(rx.is_empty());
        assert!(rx.take_for(A).is_none());
        assert!(rx.take_for(B).is_none());
    }
}
