// implementation of the mailbox.
//
// the basic architecture is as such:
//
// endpoint handles wrap around Arc<shared state>
//                                     |
//          /--------------------------/
//          v
//       shared state
//          |
//          |------ a mutex holding the buffer (one of the disciplines in
//          |       the buffer module), the sealed flag, and a waiter set
//          |       per side: wakers parked by send/recv operations that
//          |       could not proceed, keyed by operation token.
//          |
//          \------ two atomic reference counts, one per side. handles and
//                  pending operation futures hold references; the last
//                  reference of a side dropping seals the mailbox.
//
// the organization of these modules is as such:
//
//      buffer<---------------core: the sin-eater of the unsafety. owns the
//                            ^     lockable state and the type-erased,
//                            |     address-ordered lock sets that let one
//                            |     transaction span several mailboxes.
//                            |
//      polling<--------+-----send, recv: the endpoint APIs. manual futures
//                      |     that evaluate and commit a whole transaction
//      adapters<-------/     per poll under the core's lock sets, plus the
//                            blocking and stream-facing wrappers.

mod adapters;
mod buffer;
mod core;
mod polling;
mod recv;
mod send;

pub use adapters::{IntoStream, RecvStream};
pub use buffer::Buffer;
pub use recv::{Input, RecvFut, TryRecv};
pub use send::{Output, SendFut, TrySend};

use self::core::Mailbox;
use std::{future::Future, sync::Arc};

/// Create a mailbox with the given buffering discipline
///
/// Returns the producer endpoint, the consumer endpoint, and a first-class
/// [`Seal`] handle. Both endpoints may be cloned freely and moved to other
/// tasks or threads; the mailbox is sealed when [`Seal::seal`] is invoked
/// or when the last handle of either side is dropped, whichever happens
/// first.
pub fn mailbox<T: Send + 'static>(buffer: Buffer<T>) -> (Output<T>, Input<T>, Seal) {
    let shared = Mailbox::new(buffer);
    let output = Output::solo(shared.clone());
    let input = Input::solo(shared.clone());
    (output, input, Seal(Arc::new(shared)))
}

/// Create a mailbox scoped to `body`, sealing it on every exit path
///
/// The mailbox is sealed when `body` returns, and also if it panics, so
/// anything still holding a clone of the endpoints observes termination.
pub fn with_mailbox<T, R>(buffer: Buffer<T>, body: impl FnOnce(Output<T>, Input<T>) -> R) -> R
where
    T: Send + 'static,
{
    let (output, input, seal) = mailbox(buffer);
    let _guard = SealOnDrop(seal);
    body(output, input)
}

/// Create a mailbox scoped to the future returned by `body`, sealing it on
/// every exit path
///
/// The mailbox is sealed when the future completes, and also if it panics
/// or is dropped before completing (task cancellation).
pub async fn with_mailbox_async<T, Fut>(
    buffer: Buffer<T>,
    body: impl FnOnce(Output<T>, Input<T>) -> Fut,
) -> Fut::Output
where
    T: Send + 'static,
    Fut: Future,
{
    let (output, input, seal) = mailbox(buffer);
    let _guard = SealOnDrop(seal);
    body(output, input).await
}

/// First-class handle for sealing a mailbox
///
/// Sealing is idempotent and terminal: after it, every send is refused
/// while already-buffered values remain receivable. The handle is not a
/// producer or consumer reference; holding or dropping it has no effect on
/// the mailbox's lifetime.
#[derive(Clone)]
pub struct Seal(Arc<dyn SealTarget>);

impl Seal {
    /// Seal the mailbox
    pub fn seal(&self) {
        self.0.seal_now();
    }
}

trait SealTarget: Send + Sync {
    fn seal_now(&self);
}

impl<T: Send + 'static> SealTarget for Mailbox<T> {
    fn seal_now(&self) {
        self.seal();
    }
}

struct SealOnDrop(Seal);

impl Drop for SealOnDrop {
    fn drop(&mut self) {
        self.0.seal();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        panic::{catch_unwind, AssertUnwindSafe},
        sync::Mutex,
        thread,
        time::Duration,
    };

    #[test]
    fn drains_in_order_after_seal_then_ends() {
        let (output, input, seal) = mailbox(Buffer::unbounded());
        for v in 1..=5 {
            assert!(output.send_blocking(v));
        }
        seal.seal();
        for v in 1..=5 {
            assert_eq!(input.recv_blocking(), Some(v));
        }
        assert_eq!(input.recv_blocking(), None);
        assert_eq!(input.recv_blocking(), None);
    }

    #[test]
    fn seal_is_terminal_even_with_values_still_queued() {
        let (output, input, seal) = mailbox(Buffer::unbounded());
        assert!(output.send_blocking(1));
        seal.seal();
        seal.seal(); // idempotent
        assert!(!output.send_blocking(2));
        assert!(!output.send_blocking(3));
        assert_eq!(input.recv_blocking(), Some(1));
        assert_eq!(input.recv_blocking(), None);
    }

    #[test]
    fn latest_register_always_presents_the_newest_value() {
        let (output, input, seal) = mailbox(Buffer::latest(42));
        assert_eq!(input.recv_blocking(), Some(42));
        for v in 1..=5 {
            assert!(output.send_blocking(v));
        }
        assert_eq!(input.recv_blocking(), Some(5));
        // reads do not consume the register
        assert_eq!(input.recv_blocking(), Some(5));
        seal.seal();
        assert!(!output.send_blocking(6));
        // the register keeps serving its last value after sealing
        assert_eq!(input.recv_blocking(), Some(5));
    }

    #[test]
    fn newest_keeps_only_the_last_values() {
        let (output, input, _seal) = mailbox(Buffer::newest(2));
        for v in 1..=5 {
            assert!(output.send_blocking(v));
        }
        drop(output);
        assert_eq!(input.recv_blocking(), Some(4));
        assert_eq!(input.recv_blocking(), Some(5));
        assert_eq!(input.recv_blocking(), None);
    }

    #[test]
    fn single_slot_refuses_a_second_value_until_taken() {
        let (output, input, seal) = mailbox(Buffer::single());
        assert!(matches!(output.try_send('a'), TrySend::Sent));
        assert!(matches!(output.try_send('b'), TrySend::Full('b')));
        assert_eq!(input.recv_blocking(), Some('a'));
        assert!(matches!(output.try_send('b'), TrySend::Sent));
        seal.seal();
        assert!(matches!(output.try_send('c'), TrySend::Sealed));
        assert_eq!(input.recv_blocking(), Some('b'));
        assert!(matches!(input.try_recv(), TryRecv::Sealed));
    }

    #[test]
    fn rendezvous_blocks_the_second_send_until_the_first_is_taken() {
        let (output, input, _seal) = mailbox(Buffer::single());
        let producer = thread::spawn(move || {
            assert!(output.send_blocking(1));
            assert!(output.send_blocking(2));
        });
        thread::sleep(Duration::from_millis(20));
        assert_eq!(input.recv_blocking(), Some(1));
        assert_eq!(input.recv_blocking(), Some(2));
        producer.join().unwrap();
        assert_eq!(input.recv_blocking(), None);
    }

    #[test]
    fn bounded_backpressure_delivers_everything_in_order() {
        let (output, input, _seal) = mailbox(Buffer::bounded(4));
        let producer = thread::spawn(move || {
            for v in 0..100 {
                assert!(output.send_blocking(v));
            }
        });
        let mut got = Vec::new();
        while let Some(v) = input.recv_blocking() {
            got.push(v);
        }
        producer.join().unwrap();
        assert_eq!(got, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn merged_output_delivers_to_every_mailbox_and_ors_acceptance() {
        let (o1, i1, s1) = mailbox::<i32>(Buffer::unbounded());
        let (o2, i2, _s2) = mailbox::<i32>(Buffer::unbounded());
        let merged = o1.merge(o2);

        assert!(merged.send_blocking(10));
        assert_eq!(i1.recv_blocking(), Some(10));
        assert_eq!(i2.recv_blocking(), Some(10));

        // one side sealed: it refuses, the other accepts, the send succeeds
        s1.seal();
        assert!(merged.send_blocking(11));
        assert!(matches!(i1.try_recv(), TryRecv::Sealed));
        assert_eq!(i2.recv_blocking(), Some(11));

        // both sides gone: the send is refused
        drop(i2);
        assert!(!merged.send_blocking(12));
    }

    #[test]
    fn exhausted_output_is_the_merge_identity() {
        assert!(!Output::<i32>::exhausted().send_blocking(1));

        let (output, input, _seal) = mailbox::<i32>(Buffer::unbounded());
        let merged = Output::exhausted().merge(output);
        assert!(merged.send_blocking(7));
        assert_eq!(input.recv_blocking(), Some(7));
    }

    #[test]
    fn raced_input_commits_the_first_value_found() {
        let (o1, i1, _s1) = mailbox::<i32>(Buffer::unbounded());
        let (o2, i2, _s2) = mailbox::<i32>(Buffer::unbounded());
        let raced = i1.race(i2);

        assert!(o2.send_blocking(5));
        assert_eq!(raced.recv_blocking(), Some(5));

        // earlier operand wins a tie
        assert!(o1.send_blocking(1));
        assert!(o2.send_blocking(2));
        assert_eq!(raced.recv_blocking(), Some(1));

        // drains stragglers after both sides seal, then ends
        drop(o1);
        drop(o2);
        assert_eq!(raced.recv_blocking(), Some(2));
        assert_eq!(raced.recv_blocking(), None);
    }

    #[test]
    fn exhausted_input_is_the_race_identity() {
        assert_eq!(Input::<i32>::exhausted().recv_blocking(), None);

        let (output, input, _seal) = mailbox::<i32>(Buffer::unbounded());
        let raced = Input::exhausted().race(input);
        assert!(output.send_blocking(9));
        assert_eq!(raced.recv_blocking(), Some(9));
        drop(output);
        assert_eq!(raced.recv_blocking(), None);
    }

    #[test]
    fn map_projects_inside_the_receive() {
        let (output, input, _seal) = mailbox::<i32>(Buffer::unbounded());
        let doubled = input.map(|v| v * 2);
        assert!(output.send_blocking(21));
        assert_eq!(doubled.recv_blocking(), Some(42));
        drop(output);
        assert_eq!(doubled.recv_blocking(), None);
    }

    #[test]
    fn chained_receive_short_circuits_on_exhaustion() {
        let (o1, i1, _s1) = mailbox::<i32>(Buffer::unbounded());
        let (o2, i2, _s2) = mailbox::<i32>(Buffer::unbounded());

        assert!(o1.send_blocking(1));
        assert!(o2.send_blocking(10));
        let i2_again = i2.clone();
        let got = polling::block_on(&mut Box::pin(
            i1.recv_and_then(move |base| i2.map(move |v| v + base)),
        ));
        assert_eq!(got, Some(11));

        // exhausted prefix never consults the continuation
        drop(o1);
        let got = polling::block_on(&mut Box::pin(
            i1.recv_and_then(move |_| i2_again),
        ));
        assert_eq!(got, None);
    }

    #[test]
    fn dropping_the_last_output_ends_a_blocked_receive() {
        let (output, input, _seal) = mailbox::<i32>(Buffer::unbounded());
        let consumer = thread::spawn(move || input.recv_blocking());
        thread::sleep(Duration::from_millis(20));
        drop(output);
        assert_eq!(consumer.join().unwrap(), None);
    }

    #[test]
    fn dropping_the_last_input_makes_sends_refuse() {
        let (output, input, _seal) = mailbox(Buffer::bounded(2));
        assert!(output.send_blocking(1));
        drop(input);
        assert!(!output.send_blocking(2));
    }

    #[test]
    fn cloned_handles_keep_a_side_alive() {
        let (output, input, _seal) = mailbox::<i32>(Buffer::unbounded());
        let second = output.clone();
        drop(output);
        assert!(second.send_blocking(1));
        drop(second);
        assert_eq!(input.recv_blocking(), Some(1));
        assert_eq!(input.recv_blocking(), None);
    }

    #[test]
    fn rescinding_an_unresolved_send_recovers_the_value() {
        let (output, _input, _seal) = mailbox(Buffer::bounded(1));
        assert!(output.send_blocking(1));
        let mut fut = output.send(2);
        assert_eq!(polling::poll_once(&mut fut), None);
        assert_eq!(fut.rescind(), Some(2));
        assert_eq!(fut.rescind(), None);
    }

    #[test]
    fn blocking_timeouts_hand_back_undeliverable_values() {
        let (output, input, _seal) = mailbox(Buffer::bounded(1));
        assert!(output.send_blocking(1));
        assert!(matches!(
            output.send_blocking_timeout(2, Duration::from_millis(10)),
            TrySend::Full(2)
        ));
        assert!(matches!(
            input.recv_blocking_timeout(Duration::from_millis(10)),
            TryRecv::Value(1)
        ));
        assert!(matches!(
            input.recv_blocking_timeout(Duration::from_millis(10)),
            TryRecv::Empty
        ));
    }

    #[test]
    fn scoped_mailbox_seals_on_normal_exit() {
        let (output, input) = with_mailbox(Buffer::unbounded(), |output, input| {
            assert!(output.send_blocking(1));
            (output.clone(), input.clone())
        });
        // both sides still hold handles, yet the scope's end sealed it
        assert!(!output.send_blocking(2));
        assert_eq!(input.recv_blocking(), Some(1));
        assert_eq!(input.recv_blocking(), None);
    }

    #[test]
    fn scoped_mailbox_seals_on_panic() {
        let smuggled = Mutex::new(None);
        let result = catch_unwind(AssertUnwindSafe(|| {
            with_mailbox(Buffer::unbounded(), |output, input| {
                assert!(output.send_blocking(1));
                *smuggled.lock().unwrap() = Some((output.clone(), input.clone()));
                panic!("scope body failed");
            })
        }));
        assert!(result.is_err());
        let (output, input) = smuggled.into_inner().unwrap().unwrap();
        assert!(!output.send_blocking(2));
        assert_eq!(input.recv_blocking(), Some(1));
        assert_eq!(input.recv_blocking(), None);
    }
}
