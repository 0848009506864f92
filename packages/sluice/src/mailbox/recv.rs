// consumer endpoint.
//
// an Input is a list of sources raced against each other. a source is
// either a mailbox or a projection over another source, so mapping an
// input never leaves the transaction: the projection runs while the
// mailbox locks are still held. the source trait is object safe and keyed
// by the underlying mailbox, which lets one receive transaction span
// mailboxes of different element types.

use super::{
    core::{next_token, LockSet, Mailbox, Participant},
    polling,
};
use smallvec::{smallvec, SmallVec};
use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, Waker},
    time::Duration,
};

/// outcome of one source's attempt inside a receive transaction
pub(crate) enum Polled<T> {
    Value(T),
    Exhausted,
    Pending,
}

/// one leg of a receive transaction
pub(crate) trait Source<T>: Send + Sync {
    /// the lockable participant behind this leg
    fn participant(&self) -> &dyn Participant;
    /// attempt to produce a value under the transaction's locks
    fn poll_value(&self, locks: &mut LockSet<'_>) -> Polled<T>;
    fn park(&self, locks: &mut LockSet<'_>, token: u64, waker: &Waker);
    fn unpark(&self, locks: &mut LockSet<'_>, token: u64);
    /// add a live consumer reference on the underlying mailbox
    fn retain(&self);
    /// drop a live consumer reference on the underlying mailbox
    fn release(&self);
}

struct MailboxSource<T>(Mailbox<T>);

impl<T: Send + 'static> Source<T> for MailboxSource<T> {
    fn participant(&self) -> &dyn Participant {
        &self.0
    }

    fn poll_value(&self, locks: &mut LockSet<'_>) -> Polled<T> {
        // safety: the lock under this key was taken from `self.0`, a
        // mailbox of element type T
        let state = unsafe { locks.get(self.0.key()).state::<T>() };
        let was_full = state.buffer.is_full();
        if let Some(value) = state.buffer.read() {
            // taking a value out of a full mailbox makes room
            if was_full {
                state.send_waiters.wake_all();
            }
            Polled::Value(value)
        } else if state.sealed {
            Polled::Exhausted
        } else {
            Polled::Pending
        }
    }

    fn park(&self, locks: &mut LockSet<'_>, token: u64, waker: &Waker) {
        let state = unsafe { locks.get(self.0.key()).state::<T>() };
        state.recv_waiters.park(token, waker);
    }

    fn unpark(&self, locks: &mut LockSet<'_>, token: u64) {
        let state = unsafe { locks.get(self.0.key()).state::<T>() };
        state.recv_waiters.unpark(token);
    }

    fn retain(&self) {
        self.0.retain_receiver();
    }

    fn release(&self) {
        self.0.release_receiver();
    }
}

/// projection over another source, applied inside the transaction
struct MapSource<A, T> {
    inner: Arc<dyn Source<A>>,
    project: Arc<dyn Fn(A) -> T + Send + Sync>,
}

impl<A: Send + 'static, T: Send + 'static> Source<T> for MapSource<A, T> {
    fn participant(&self) -> &dyn Participant {
        self.inner.participant()
    }

    fn poll_value(&self, locks: &mut LockSet<'_>) -> Polled<T> {
        match self.inner.poll_value(locks) {
            Polled::Value(value) => Polled::Value((self.project)(value)),
            Polled::Exhausted => Polled::Exhausted,
            Polled::Pending => Polled::Pending,
        }
    }

    fn park(&self, locks: &mut LockSet<'_>, token: u64, waker: &Waker) {
        self.inner.park(locks, token, waker);
    }

    fn unpark(&self, locks: &mut LockSet<'_>, token: u64) {
        self.inner.unpark(locks, token);
    }

    fn retain(&self) {
        self.inner.retain();
    }

    fn release(&self) {
        self.inner.release();
    }
}

/// Consumer endpoint of one or more mailboxes
///
/// Cloning an `Input` adds a live consumer reference to every mailbox it
/// draws from; dropping one removes those references. When the last
/// consumer reference of a mailbox is gone the mailbox is sealed and its
/// queued values are discarded, so producers observe refusal instead of
/// filling a queue nobody reads.
///
/// Inputs compose: [`race`](Input::race) receives from whichever of two
/// inputs produces a value first, [`map`](Input::map) transforms received
/// values inside the receive transaction, and
/// [`exhausted`](Input::exhausted) is the neutral element of the race.
pub struct Input<T> {
    sources: SmallVec<[Arc<dyn Source<T>>; 1]>,
}

impl<T: Send + 'static> Input<T> {
    pub(crate) fn solo(mailbox: Mailbox<T>) -> Self {
        Input { sources: smallvec![Arc::new(MailboxSource(mailbox)) as Arc<dyn Source<T>>] }
    }

    /// An input with no mailbox behind it: every receive ends immediately
    ///
    /// Neutral element of [`race`](Input::race).
    pub fn exhausted() -> Self {
        Input { sources: SmallVec::new() }
    }

    /// Combine two inputs into one that receives from whichever produces a
    /// value first
    ///
    /// A receive through the combined input attempts every underlying
    /// mailbox in one transaction, commits the first value found (earlier
    /// operands win ties), and ends with `None` only once every mailbox is
    /// exhausted.
    ///
    /// The composition is associative, and `race` with
    /// [`exhausted`](Input::exhausted) on either side changes nothing.
    pub fn race(mut self, mut other: Input<T>) -> Input<T> {
        let mut sources = std::mem::take(&mut self.sources);
        sources.extend(std::mem::take(&mut other.sources));
        Input { sources }
    }

    /// Transform every received value with `project`, inside the receive
    /// transaction
    pub fn map<U, F>(mut self, project: F) -> Input<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let project: Arc<dyn Fn(T) -> U + Send + Sync> = Arc::new(project);
        let sources = std::mem::take(&mut self.sources);
        Input {
            sources: sources
                .into_iter()
                .map(|inner| {
                    Arc::new(MapSource { inner, project: Arc::clone(&project) })
                        as Arc<dyn Source<U>>
                })
                .collect(),
        }
    }

    /// Receive the next value
    ///
    /// Resolves to `Some` once a value is available and to `None` once
    /// every underlying mailbox is sealed and drained. Dropping the future
    /// before it resolves leaves every mailbox untouched.
    pub fn recv(&self) -> RecvFut<T> {
        for source in &self.sources {
            source.retain();
        }
        RecvFut {
            sources: self.sources.clone(),
            token: next_token(),
            parked: false,
            resolved: false,
        }
    }

    /// Receive the next value, then receive once more from the input
    /// chosen by `next`
    ///
    /// Ends with `None` without consulting `next` if this input is
    /// exhausted. The two receives are separate transactions: the first
    /// value is consumed even if the chosen input turns out to be
    /// exhausted.
    pub async fn recv_and_then<U, F>(&self, next: F) -> Option<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Input<U>,
    {
        match self.recv().await {
            Some(value) => next(value).recv().await,
            None => None,
        }
    }

    /// Receive the next value, blocking the calling thread
    pub fn recv_blocking(&self) -> Option<T> {
        polling::block_on(&mut self.recv())
    }

    /// Receive the next value, blocking the calling thread at most
    /// `timeout`
    pub fn recv_blocking_timeout(&self, timeout: Duration) -> TryRecv<T> {
        match polling::block_on_timeout(&mut self.recv(), timeout) {
            Some(Some(value)) => TryRecv::Value(value),
            Some(None) => TryRecv::Sealed,
            None => TryRecv::Empty,
        }
    }

    /// Receive a value only if one is available immediately
    pub fn try_recv(&self) -> TryRecv<T> {
        match polling::poll_once(&mut self.recv()) {
            Some(Some(value)) => TryRecv::Value(value),
            Some(None) => TryRecv::Sealed,
            None => TryRecv::Empty,
        }
    }
}

impl<T> Clone for Input<T> {
    fn clone(&self) -> Self {
        for source in &self.sources {
            source.retain();
        }
        Input { sources: self.sources.clone() }
    }
}

impl<T> Drop for Input<T> {
    fn drop(&mut self) {
        for source in &self.sources {
            source.release();
        }
    }
}

/// Outcome of a receive attempt that would not wait indefinitely
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TryRecv<T> {
    /// A value was available
    Value(T),
    /// Every underlying mailbox is sealed and drained
    Sealed,
    /// No value was available yet
    Empty,
}

/// Future for receiving a value through an [`Input`]
///
/// Resolves to `Some` once a value is available and to `None` once every
/// underlying mailbox is sealed and drained. Counts as a live consumer
/// reference on every underlying mailbox until it resolves or is dropped.
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct RecvFut<T> {
    sources: SmallVec<[Arc<dyn Source<T>>; 1]>,
    token: u64,
    parked: bool,
    resolved: bool,
}

impl<T> Unpin for RecvFut<T> {}

impl<T: Send + 'static> Future for RecvFut<T> {
    type Output = Option<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<T>> {
        let this = Pin::into_inner(self);
        assert!(!this.resolved, "recv future polled after already resolved");

        // an input with no sources is exhausted without locking anything
        if this.sources.is_empty() {
            this.resolved = true;
            return Poll::Ready(None);
        }

        // one transaction: every underlying mailbox locked at once, in
        // address order
        let mut locks = LockSet::acquire(this.sources.iter().map(|s| s.participant()));

        if this.parked {
            for source in &this.sources {
                source.unpark(&mut locks, this.token);
            }
            this.parked = false;
        }

        // first leg to produce a value wins; later legs stay untouched
        let mut all_exhausted = true;
        for source in &this.sources {
            match source.poll_value(&mut locks) {
                Polled::Value(value) => {
                    this.resolved = true;
                    return Poll::Ready(Some(value));
                }
                Polled::Exhausted => {}
                Polled::Pending => all_exhausted = false,
            }
        }

        if all_exhausted {
            this.resolved = true;
            return Poll::Ready(None);
        }

        for source in &this.sources {
            source.park(&mut locks, this.token, cx.waker());
        }
        this.parked = true;
        Poll::Pending
    }
}

impl<T> Drop for RecvFut<T> {
    fn drop(&mut self) {
        if self.parked {
            let mut locks = LockSet::acquire(self.sources.iter().map(|s| s.participant()));
            for source in &self.sources {
                source.unpark(&mut locks, self.token);
            }
        }
        for source in &self.sources {
            source.release();
        }
    }
}
