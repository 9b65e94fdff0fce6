//! Fixed-capacity bookkeeping of a client's ports.
//!
//! Port registration never allocates: both tables are inline arrays bounded by
//! [`MAX_PORTS_PER_CLIENT`], with a lower, per-client limit chosen at
//! construction. Registration order is preserved, it is the order in which the
//! process callback services ports.

use arrayvec::ArrayVec;

use crate::{
    MAX_PORTS_PER_CLIENT,
    error::CapacityExceeded,
    message::{Direction, PortId},
};

/// Input and output ports of one client, each mapped to a handle.
///
/// The realtime side stores native port handles here, the control side only
/// needs to know which ids are managed, and uses `()`.
#[derive(Debug)]
pub struct PortRegistry<O, I> {
    outputs: ArrayVec<(PortId, O), MAX_PORTS_PER_CLIENT>,
    inputs: ArrayVec<(PortId, I), MAX_PORTS_PER_CLIENT>,
    capacity: usize,
}

impl<O, I> PortRegistry<O, I> {
    /// Creates a registry accepting `capacity` ports per direction.
    ///
    /// Clamped to [`MAX_PORTS_PER_CLIENT`].
    pub fn new(capacity: usize) -> Self {
        Self {
            outputs: ArrayVec::new(),
            inputs: ArrayVec::new(),
            capacity: capacity.min(MAX_PORTS_PER_CLIENT),
        }
    }

    /// Maximum number of ports per direction.
    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    fn insert<T>(
        table: &mut ArrayVec<(PortId, T), MAX_PORTS_PER_CLIENT>,
        capacity: usize,
        id: PortId,
        handle: T,
    ) -> Result<(), CapacityExceeded<T>> {
        if table.len() >= capacity {
            return Err(CapacityExceeded {
                item: handle,
                capacity,
            });
        }

        table
            .try_push((id, handle))
            .map_err(|e| CapacityExceeded {
                item: e.element().1,
                capacity,
            })
    }

    /// Appends an output port. Hands `handle` back when the table is full.
    pub fn insert_output(&mut self, id: PortId, handle: O) -> Result<(), CapacityExceeded<O>> {
        Self::insert(&mut self.outputs, self.capacity, id, handle)
    }

    /// Appends an input port. Hands `handle` back when the table is full.
    pub fn insert_input(&mut self, id: PortId, handle: I) -> Result<(), CapacityExceeded<I>> {
        Self::insert(&mut self.inputs, self.capacity, id, handle)
    }

    /// Output ports, in registration order.
    #[inline(always)]
    pub fn outputs_mut(&mut self) -> impl Iterator<Item = (PortId, &mut O)> + '_ {
        self.outputs.iter_mut().map(|(id, handle)| (*id, handle))
    }

    /// Input ports, in registration order.
    #[inline(always)]
    pub fn inputs(&self) -> impl Iterator<Item = (PortId, &I)> + '_ {
        self.inputs.iter().map(|(id, handle)| (*id, handle))
    }

    /// In which direction `id` is managed, if at all.
    pub fn direction_of(&self, id: PortId) -> Option<Direction> {
        if self.outputs.iter().any(|(o, _)| *o == id) {
            Some(Direction::Output)
        } else if self.inputs.iter().any(|(i, _)| *i == id) {
            Some(Direction::Input)
        } else {
            None
        }
    }

    #[inline(always)]
    pub fn len(&self, direction: Direction) -> usize {
        match direction {
            Direction::Input => self.inputs.len(),
            Direction::Output => self.outputs.len(),
        }
    }

    #[inline(always)]
    pub fn is_full(&self, direction: Direction) -> bool {
        self.len(direction) >= self.capacity
    }

    pub fn clear(&mut self) {
        self.outputs.clear();
        self.inputs.clear();
    }
}
