//! The time-ordered schedule of outbound messages.
//!
//! All output ports of a client share one schedule. Entries live in a slot pool
//! allocated once, linked in time order through slot indices, with vacant slots
//! chained into a freelist. Inserting, unlinking and clearing never allocate,
//! so the whole structure can be owned and mutated by the realtime thread.

use crate::{
    error::QueueError,
    message::{Message, PortId},
};

#[derive(Debug)]
struct Slot {
    message: Option<Message>,
    // next entry in time order when occupied, next vacant slot otherwise
    next: Option<usize>,
}

/// A pre-allocated, time-ordered list of [`Message`]s.
///
/// After any sequence of [`enqueue`](Self::enqueue)s, times are non-decreasing
/// from head to tail, with equal times kept in insertion order.
#[derive(Debug)]
pub struct SendQueue {
    slots: Box<[Slot]>,
    head: Option<usize>,
    tail: Option<usize>,
    free: Option<usize>,
    len: usize,
}

impl SendQueue {
    /// Allocates a schedule able to hold `capacity` messages.
    pub fn with_capacity(capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|i| Slot {
                message: None,
                next: (i + 1 < capacity).then_some(i + 1),
            })
            .collect();

        Self {
            slots,
            head: None,
            tail: None,
            free: (capacity > 0).then_some(0),
            len: 0,
        }
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline(always)]
    fn time_at(&self, idx: usize) -> u64 {
        self.slots[idx].message.as_ref().map_or(0, Message::time)
    }

    /// Inserts `message` after every entry scheduled at or before its time.
    ///
    /// If no slot is free the message is dropped and the schedule is left
    /// untouched.
    pub fn enqueue(&mut self, message: Message) -> Result<(), QueueError> {
        let Some(idx) = self.free else {
            return Err(QueueError::PoolExhausted);
        };

        let time = message.time();

        // most sends land at the end, check there first
        let prev = match self.tail {
            Some(tail) if self.time_at(tail) <= time => Some(tail),
            _ => {
                let mut prev = None;
                let mut cursor = self.head;

                while let Some(i) = cursor {
                    if self.time_at(i) > time {
                        break;
                    }
                    prev = Some(i);
                    cursor = self.slots[i].next;
                }

                prev
            }
        };

        let next = match prev {
            Some(p) => self.slots[p].next,
            None => self.head,
        };

        self.free = self.slots[idx].next;
        self.slots[idx] = Slot {
            message: Some(message),
            next,
        };

        match prev {
            Some(p) => self.slots[p].next = Some(idx),
            None => self.head = Some(idx),
        }

        if next.is_none() {
            self.tail = Some(idx);
        }

        self.len += 1;

        Ok(())
    }

    /// Removes the entry at `idx`, whose predecessor in time order is `prev`,
    /// and returns its slot to the freelist.
    fn unlink(&mut self, prev: Option<usize>, idx: usize) -> Option<Message> {
        let next = self.slots[idx].next;

        match prev {
            Some(p) => self.slots[p].next = next,
            None => self.head = next,
        }

        if self.tail == Some(idx) {
            self.tail = prev;
        }

        let message = self.slots[idx].message.take();
        self.slots[idx].next = self.free;
        self.free = Some(idx);
        self.len -= 1;

        message
    }

    /// Advances `port`'s entries by one block of `block_size` frames, returning
    /// those falling inside it.
    ///
    /// The returned iterator yields due messages in schedule order, each one
    /// with its offset into the block as its time. When a message for `port` is
    /// not strictly later than the previous one yielded, it is pushed to one
    /// frame after it, so no two messages of a port share a frame. Entries that
    /// are not due have `block_size` subtracted from their time. Entries for
    /// other ports are left alone.
    ///
    /// Like [`Vec::drain`], dropping the iterator early finishes the walk: the
    /// remaining due messages are removed and dropped, the others shifted.
    #[inline]
    pub fn drain_due(&mut self, port: PortId, block_size: u32) -> DrainDue<'_> {
        let cursor = self.head;

        DrainDue {
            queue: self,
            port,
            block_size: u64::from(block_size),
            prev: None,
            cursor,
            last_due: None,
        }
    }

    /// Shifts all of `port`'s entries by one block, without delivering any.
    ///
    /// Used when the port's buffer could not be acquired: entries that were due
    /// in the skipped block end up at the very start of the next one.
    pub fn defer(&mut self, port: PortId, block_size: u32) {
        let mut cursor = self.head;

        while let Some(idx) = cursor {
            let slot = &mut self.slots[idx];

            if let Some(message) = slot.message.as_mut().filter(|m| m.port() == port) {
                message.set_time(message.time().saturating_sub(u64::from(block_size)));
            }

            cursor = slot.next;
        }
    }

    /// Iterates over the scheduled messages, in time order.
    pub fn iter(&self) -> impl Iterator<Item = &Message> + '_ {
        let mut cursor = self.head;

        core::iter::from_fn(move || {
            let idx = cursor?;
            let slot = &self.slots[idx];
            cursor = slot.next;
            slot.message.as_ref()
        })
    }

    /// Drops every scheduled message, keeping the pool allocated.
    pub fn clear(&mut self) {
        let capacity = self.capacity();

        for (i, slot) in self.slots.iter_mut().enumerate() {
            slot.message = None;
            slot.next = (i + 1 < capacity).then_some(i + 1);
        }

        self.head = None;
        self.tail = None;
        self.free = (capacity > 0).then_some(0);
        self.len = 0;
    }
}

/// Iterator returned by [`SendQueue::drain_due`].
pub struct DrainDue<'a> {
    queue: &'a mut SendQueue,
    port: PortId,
    block_size: u64,
    // last entry kept in the list, so unlinking knows its predecessor
    prev: Option<usize>,
    cursor: Option<usize>,
    last_due: Option<u64>,
}

impl Iterator for DrainDue<'_> {
    type Item = Message;

    fn next(&mut self) -> Option<Message> {
        while let Some(idx) = self.cursor {
            let slot = &mut self.queue.slots[idx];
            let next = slot.next;

            let Some(message) = slot.message.as_mut().filter(|m| m.port() == self.port) else {
                self.prev = Some(idx);
                self.cursor = next;
                continue;
            };

            if let Some(last) = self.last_due {
                if message.time() <= last {
                    message.set_time(last.saturating_add(1));
                }
            }

            self.cursor = next;

            if message.time() < self.block_size {
                self.last_due = Some(message.time());
                return self.queue.unlink(self.prev, idx);
            }

            message.set_time(message.time() - self.block_size);
            self.prev = Some(idx);
        }

        None
    }
}

impl Drop for DrainDue<'_> {
    fn drop(&mut self) {
        self.for_each(drop);
    }
}
