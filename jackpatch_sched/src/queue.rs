//! Small helpers for working with the `rtrb` rings connecting the control
//! thread and the realtime thread.

/// Acquires a read chunk covering all available consumer slots.
#[inline(always)]
pub fn consumer_get_all<T>(rx: &mut rtrb::Consumer<T>) -> rtrb::chunks::ReadChunk<'_, T> {
    // asking for exactly `slots()` items never fails
    rx.read_chunk(rx.slots())
        .unwrap_or_else(|_| unreachable!("slots() items are always readable"))
}

/// Pops every item currently in the ring, in order.
///
/// Items pushed concurrently while the returned iterator is alive are left for
/// the next call. Allocation-free, suitable for the realtime thread.
#[inline(always)]
pub fn drain_all<T>(rx: &mut rtrb::Consumer<T>) -> impl Iterator<Item = T> + '_ {
    consumer_get_all(rx).into_iter()
}

/// Number of items pushed but not yet popped, seen from the producer.
#[inline(always)]
pub fn producer_in_flight<T>(tx: &rtrb::Producer<T>) -> usize {
    tx.buffer().capacity().saturating_sub(tx.slots())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_everything_in_order() {
        let (mut tx, mut rx) = rtrb::RingBuffer::new(4);

        for i in 0..3 {
            tx.push(i).unwrap();
        }
        assert_eq!(producer_in_flight(&tx), 3);

        assert_eq!(drain_all(&mut rx).collect::<Vec<_>>(), [0, 1, 2]);
        assert_eq!(producer_in_flight(&tx), 0);
        assert_eq!(drain_all(&mut rx).count(), 0);
    }

    #[test]
    fn partially_consumed_drain_keeps_the_rest() {
        let (mut tx, mut rx) = rtrb::RingBuffer::new(4);

        for i in 0..4 {
            tx.push(i).unwrap();
        }

        assert_eq!(drain_all(&mut rx).take(2).collect::<Vec<_>>(), [0, 1]);
        assert_eq!(drain_all(&mut rx).collect::<Vec<_>>(), [2, 3]);
    }
}
