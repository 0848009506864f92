// buffering disciplines.
//
// each discipline is a tiny state machine over write/read, plus the two
// capacity probes the transaction layer needs. the discipline decides what
// happens at the rim: refuse the write (backpressure), evict the oldest
// value (lossy), or overwrite a register slot. nothing in here knows about
// sealing or waiters; that lives a layer up.

use std::collections::VecDeque;

/// Buffering discipline of a mailbox
///
/// Chosen once, when the mailbox is created, and fixed for its lifetime:
///
/// - [`unbounded`](Buffer::unbounded): FIFO queue with no upper bound. The
///   producer never waits; memory use is unbounded.
/// - [`bounded`](Buffer::bounded): FIFO queue holding at most `bound`
///   values. A producer sending into a full mailbox waits until a consumer
///   makes room.
/// - [`single`](Buffer::single): a rendezvous slot holding at most one
///   value. A second send waits until the first value is taken. Externally
///   equivalent to `bounded(1)`.
/// - [`latest`](Buffer::latest): a register that always presents the most
///   recently written value (or the initial one). Writes overwrite, reads
///   do not consume, and neither side ever waits.
/// - [`newest`](Buffer::newest): FIFO queue holding at most `bound` values
///   where overflow evicts the oldest queued value instead of making the
///   producer wait. `newest(1)` is a single slot that is simply
///   overwritten.
pub struct Buffer<T>(Repr<T>);

enum Repr<T> {
    Unbounded(VecDeque<T>),
    Bounded { queue: VecDeque<T>, bound: usize },
    Single(Option<T>),
    Latest { value: T, dup: fn(&T) -> T },
    Newest { queue: VecDeque<T>, bound: usize },
}

impl<T> Buffer<T> {
    /// FIFO queue with no upper bound
    pub fn unbounded() -> Self {
        Buffer(Repr::Unbounded(VecDeque::new()))
    }

    /// FIFO queue holding at most `bound` values, creating backpressure
    /// when full
    ///
    /// Panics if `bound` is zero.
    pub fn bounded(bound: usize) -> Self {
        assert!(bound >= 1, "bounded buffer must hold at least one value");
        Buffer(Repr::Bounded { queue: VecDeque::with_capacity(bound.min(1024)), bound })
    }

    /// Rendezvous slot holding at most one value
    pub fn single() -> Self {
        Buffer(Repr::Single(None))
    }

    /// Register that always presents the most recently written value,
    /// starting from `init`
    ///
    /// Reads are non-destructive, so a slow reader sees the same value
    /// repeatedly until it is overwritten.
    pub fn latest(init: T) -> Self
    where
        T: Clone,
    {
        Buffer(Repr::Latest { value: init, dup: T::clone })
    }

    /// FIFO queue holding at most `bound` values, evicting the oldest on
    /// overflow instead of creating backpressure
    ///
    /// Panics if `bound` is zero.
    pub fn newest(bound: usize) -> Self {
        assert!(bound >= 1, "newest buffer must hold at least one value");
        Buffer(Repr::Newest { queue: VecDeque::with_capacity(bound.min(1024)), bound })
    }

    /// accept a value, or give it back if the discipline refuses it.
    /// eviction (for newest) happens atomically with the append, so the
    /// queue never transiently overflows.
    pub(crate) fn write(&mut self, value: T) -> Option<T> {
        match &mut self.0 {
            Repr::Unbounded(queue) => {
                queue.push_back(value);
                None
            }
            Repr::Bounded { queue, bound } => {
                if queue.len() < *bound {
                    queue.push_back(value);
                    None
                } else {
                    Some(value)
                }
            }
            Repr::Single(slot) => {
                if slot.is_none() {
                    *slot = Some(value);
                    None
                } else {
                    Some(value)
                }
            }
            Repr::Latest { value: slot, .. } => {
                *slot = value;
                None
            }
            Repr::Newest { queue, bound } => {
                if queue.len() == *bound {
                    queue.pop_front();
                }
                debug_assert!(queue.len() < *bound);
                queue.push_back(value);
                None
            }
        }
    }

    /// take the next value. for the latest register this is a peek: the
    /// slot keeps its value.
    pub(crate) fn read(&mut self) -> Option<T> {
        match &mut self.0 {
            Repr::Unbounded(queue) => queue.pop_front(),
            Repr::Bounded { queue, .. } => queue.pop_front(),
            Repr::Single(slot) => slot.take(),
            Repr::Latest { value, dup } => Some(dup(value)),
            Repr::Newest { queue, .. } => queue.pop_front(),
        }
    }

    /// whether a write would currently be refused
    pub(crate) fn is_full(&self) -> bool {
        self.free_space() == Some(0)
    }

    /// slots left before writes are refused; None if writes are never
    /// refused
    pub(crate) fn free_space(&self) -> Option<usize> {
        match &self.0 {
            Repr::Unbounded(_) => None,
            Repr::Bounded { queue, bound } => Some(bound - queue.len()),
            Repr::Single(slot) => Some(if slot.is_some() { 0 } else { 1 }),
            Repr::Latest { .. } => None,
            Repr::Newest { .. } => None,
        }
    }

    /// drop queued values that no consumer will ever take. the latest
    /// register keeps its slot (it is never empty by construction).
    pub(crate) fn discard_queued(&mut self) {
        match &mut self.0 {
            Repr::Unbounded(queue) => queue.clear(),
            Repr::Bounded { queue, .. } => queue.clear(),
            Repr::Single(slot) => *slot = None,
            Repr::Latest { .. } => {}
            Repr::Newest { queue, .. } => queue.clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;
    use rand_pcg::Pcg32;
    use std::collections::VecDeque;

    fn new_rng() -> impl Rng {
        Pcg32::from_seed(0xfeedfacefeedfacefeedfacefeedfaceu128.to_le_bytes())
    }

    #[test]
    fn unbounded_is_fifo_and_never_full() {
        let mut buf = Buffer::unbounded();
        for i in 0..100 {
            assert!(buf.write(i).is_none());
            assert!(!buf.is_full());
        }
        for i in 0..100 {
            assert_eq!(buf.read(), Some(i));
        }
        assert_eq!(buf.read(), None);
    }

    #[test]
    fn bounded_refuses_at_capacity() {
        let mut buf = Buffer::bounded(3);
        assert!(buf.write(1).is_none());
        assert!(buf.write(2).is_none());
        assert!(buf.write(3).is_none());
        assert!(buf.is_full());
        assert_eq!(buf.write(4), Some(4));
        assert_eq!(buf.read(), Some(1));
        assert!(!buf.is_full());
        assert!(buf.write(4).is_none());
        assert_eq!(buf.read(), Some(2));
        assert_eq!(buf.read(), Some(3));
        assert_eq!(buf.read(), Some(4));
        assert_eq!(buf.read(), None);
    }

    #[test]
    fn single_holds_at_most_one() {
        let mut buf = Buffer::single();
        assert_eq!(buf.free_space(), Some(1));
        assert!(buf.write('a').is_none());
        assert!(buf.is_full());
        assert_eq!(buf.write('b'), Some('b'));
        assert_eq!(buf.read(), Some('a'));
        assert_eq!(buf.read(), None);
        assert!(buf.write('b').is_none());
    }

    #[test]
    fn latest_overwrites_and_reads_do_not_consume() {
        let mut buf = Buffer::latest(42);
        assert_eq!(buf.read(), Some(42));
        assert_eq!(buf.read(), Some(42));
        for i in 1..=5 {
            assert!(buf.write(i).is_none());
            assert!(!buf.is_full());
        }
        assert_eq!(buf.read(), Some(5));
        assert_eq!(buf.read(), Some(5));
    }

    #[test]
    fn newest_evicts_oldest() {
        let mut buf = Buffer::newest(2);
        for i in 1..=5 {
            assert!(buf.write(i).is_none());
        }
        assert_eq!(buf.read(), Some(4));
        assert_eq!(buf.read(), Some(5));
        assert_eq!(buf.read(), None);
    }

    #[test]
    fn newest_one_is_an_overwritten_slot() {
        let mut buf = Buffer::newest(1);
        assert!(buf.write(1).is_none());
        assert!(buf.write(2).is_none());
        assert_eq!(buf.read(), Some(2));
        assert_eq!(buf.read(), None);
    }

    // drive newest(bound) against a keep-the-last-`bound` model with a
    // seeded interleaving of writes and reads
    #[test]
    fn newest_matches_sliding_window_model() {
        let mut rng = new_rng();
        for bound in [1usize, 2, 3, 7, 16] {
            let mut model = VecDeque::<u32>::new();
            let mut buf = Buffer::newest(bound);
            for i in 0u32..10_000 {
                if rng.gen_ratio(60, 100) {
                    assert!(buf.write(i).is_none());
                    if model.len() == bound {
                        model.pop_front();
                    }
                    model.push_back(i);
                } else {
                    assert_eq!(buf.read(), model.pop_front());
                }
            }
        }
    }

    #[test]
    fn bounded_matches_capped_queue_model() {
        let mut rng = new_rng();
        for bound in [1usize, 2, 5, 32] {
            let mut model = VecDeque::<u32>::new();
            let mut buf = Buffer::bounded(bound);
            for i in 0u32..10_000 {
                if rng.gen_ratio(50, 100) {
                    let refused = buf.write(i);
                    if model.len() < bound {
                        assert!(refused.is_none());
                        model.push_back(i);
                    } else {
                        assert_eq!(refused, Some(i));
                    }
                } else {
                    assert_eq!(buf.read(), model.pop_front());
                }
                assert_eq!(buf.is_full(), model.len() == bound);
            }
        }
    }

    #[test]
    #[should_panic]
    fn bounded_rejects_zero_capacity() {
        let _ = Buffer::<u8>::bounded(0);
    }

    #[test]
    #[should_panic]
    fn newest_rejects_zero_capacity() {
        let _ = Buffer::<u8>::newest(0);
    }
}
