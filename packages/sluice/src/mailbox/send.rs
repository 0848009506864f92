// producer endpoint.

use super::{
    core::{next_token, LockSet, Mailbox, Participant},
    polling,
};
use smallvec::{smallvec, SmallVec};
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

/// Producer endpoint of one or more mailboxes
///
/// Cloning an `Output` adds a live producer reference to every mailbox it
/// targets; dropping one removes those references. When the last producer
/// reference of a mailbox is gone the mailbox is sealed, so its consumers
/// drain whatever is buffered and then end.
///
/// Outputs compose: [`merge`](Output::merge) combines two outputs into one
/// that delivers every sent value to all of their mailboxes in a single
/// transaction, and [`exhausted`](Output::exhausted) is the neutral element
/// of that composition.
pub struct Output<T> {
    targets: SmallVec<[Mailbox<T>; 1]>,
    /// duplicates a value for fan-out; present whenever there may be more
    /// than one target
    dup: Option<fn(&T) -> T>,
}

impl<T: Send + 'static> Output<T> {
    pub(crate) fn solo(mailbox: Mailbox<T>) -> Self {
        Output { targets: smallvec![mailbox], dup: None }
    }

    /// An output with no mailbox behind it: every send is refused
    ///
    /// Neutral element of [`merge`](Output::merge).
    pub fn exhausted() -> Self {
        Output { targets: SmallVec::new(), dup: None }
    }

    /// Combine two outputs into one that sends to all of their mailboxes
    ///
    /// A send through the combined output delivers the value to every
    /// underlying mailbox in a single transaction and reports acceptance if
    /// at least one of them took it. If any live mailbox is full the whole
    /// send waits (the slowest live consumer paces the broadcast); sealed
    /// mailboxes stop participating and merely report refusal.
    ///
    /// The composition is associative, and `merge` with
    /// [`exhausted`](Output::exhausted) on either side changes nothing.
    pub fn merge(mut self, mut other: Output<T>) -> Output<T>
    where
        T: Clone,
    {
        let mut targets = std::mem::take(&mut self.targets);
        targets.extend(std::mem::take(&mut other.targets));
        Output { targets, dup: Some(T::clone) }
    }

    /// Send a value, waiting while any live target mailbox is full
    ///
    /// Resolves to `true` if at least one mailbox accepted the value and
    /// `false` if every target was sealed (a refused value is discarded).
    /// Dropping the future before it resolves leaves every mailbox
    /// untouched; [`rescind`](SendFut::rescind) does the same and hands the
    /// value back.
    pub fn send(&self, value: T) -> SendFut<T> {
        for target in &self.targets {
            target.retain_sender();
        }
        SendFut {
            targets: self.targets.clone(),
            dup: self.dup,
            value: Some(value),
            token: next_token(),
            parked: false,
            resolved: false,
        }
    }

    /// Send a value, blocking the calling thread while any live target
    /// mailbox is full
    pub fn send_blocking(&self, value: T) -> bool {
        polling::block_on(&mut self.send(value))
    }

    /// Send a value, blocking the calling thread at most `timeout`
    ///
    /// On timeout the value is handed back untouched.
    pub fn send_blocking_timeout(&self, value: T, timeout: Duration) -> TrySend<T> {
        let mut fut = self.send(value);
        match polling::block_on_timeout(&mut fut, timeout) {
            Some(true) => TrySend::Sent,
            Some(false) => TrySend::Sealed,
            None => TrySend::Full(fut.rescind().expect("unresolved send future lost its value")),
        }
    }

    /// Send a value only if it can be accepted immediately
    pub fn try_send(&self, value: T) -> TrySend<T> {
        let mut fut = self.send(value);
        match polling::poll_once(&mut fut) {
            Some(true) => TrySend::Sent,
            Some(false) => TrySend::Sealed,
            None => TrySend::Full(fut.rescind().expect("unresolved send future lost its value")),
        }
    }
}

impl<T> Clone for Output<T> {
    fn clone(&self) -> Self {
        for target in &self.targets {
            target.retain_sender();
        }
        Output { targets: self.targets.clone(), dup: self.dup }
    }
}

impl<T> Drop for Output<T> {
    fn drop(&mut self) {
        for target in &self.targets {
            target.release_sender();
        }
    }
}

/// Outcome of a send attempt that would not wait indefinitely
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TrySend<T> {
    /// At least one target mailbox accepted the value
    Sent,
    /// Every target mailbox was sealed; the value was discarded
    Sealed,
    /// The transaction would have had to wait for room; the value is
    /// handed back
    Full(T),
}

/// Future for sending a value through an [`Output`]
///
/// Resolves to `true` if at least one target mailbox accepted the value,
/// `false` if every target was sealed. Counts as a live producer reference
/// on every target until it resolves or is dropped.
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct SendFut<T> {
    targets: SmallVec<[Mailbox<T>; 1]>,
    dup: Option<fn(&T) -> T>,
    value: Option<T>,
    token: u64,
    parked: bool,
    resolved: bool,
}

impl<T> Unpin for SendFut<T> {}

impl<T: Send + 'static> SendFut<T> {
    /// Abort this send if it has not resolved yet, recovering the value
    ///
    /// Returns `Some` exactly when the future had not resolved. Polling the
    /// future afterwards panics.
    pub fn rescind(&mut self) -> Option<T> {
        if self.resolved {
            return None;
        }
        if self.parked {
            let mut locks = LockSet::acquire(self.targets.iter().map(|t| t as &dyn Participant));
            for target in &self.targets {
                // safety: the lock under this key was taken from `target`,
                // a mailbox of element type T
                let state = unsafe { locks.get(target.key()).state::<T>() };
                state.send_waiters.unpark(self.token);
            }
            self.parked = false;
        }
        self.resolved = true;
        self.value.take()
    }
}

impl<T: Send + 'static> Future for SendFut<T> {
    type Output = bool;

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<bool> {
        let this = Pin::into_inner(self);
        assert!(!this.resolved, "send future polled after already resolved or rescinded");

        // an output with no targets refuses without locking anything
        if this.targets.is_empty() {
            this.resolved = true;
            this.value = None;
            return Poll::Ready(false);
        }

        // one transaction: every target locked at once, in address order
        let mut locks = LockSet::acquire(this.targets.iter().map(|t| t as &dyn Participant));

        // demand per distinct mailbox, so an output merged with its own
        // clone is accounted for (it writes the value twice)
        let mut groups: SmallVec<[(usize, usize); 2]> = SmallVec::new();
        for target in &this.targets {
            let key = target.key();
            if let Some(i) = groups.iter().position(|(k, _)| *k == key) {
                groups[i].1 += 1;
            } else {
                groups.push((key, 1));
            }
        }

        if this.parked {
            for (key, _) in &groups {
                // safety: locks are keyed by the targets that were locked
                // above, all of element type T
                let state = unsafe { locks.get(*key).state::<T>() };
                state.send_waiters.unpark(this.token);
            }
            this.parked = false;
        }

        // a full live mailbox forces the whole transaction to wait; sealed
        // mailboxes stop participating
        let mut blocked = false;
        let mut live_demand = 0usize;
        for (key, demand) in &groups {
            let state = unsafe { locks.get(*key).state::<T>() };
            if state.sealed {
                continue;
            }
            live_demand += demand;
            if state.buffer.free_space().is_some_and(|free| free < *demand) {
                blocked = true;
            }
        }

        if blocked {
            for (key, _) in &groups {
                let state = unsafe { locks.get(*key).state::<T>() };
                state.send_waiters.park(this.token, cx.waker());
            }
            this.parked = true;
            return Poll::Pending;
        }

        if live_demand == 0 {
            this.resolved = true;
            this.value = None;
            return Poll::Ready(false);
        }

        // commit: a duplicate goes into every live slot but the last,
        // which takes the value itself
        let mut remaining = live_demand;
        for (key, demand) in &groups {
            let state = unsafe { locks.get(*key).state::<T>() };
            if state.sealed {
                continue;
            }
            for _ in 0..*demand {
                remaining -= 1;
                let v = if remaining == 0 {
                    this.value.take().expect("send future missing its value")
                } else {
                    let dup = this.dup.expect("fanned-out output missing its duplicator");
                    dup(this.value.as_ref().expect("send future missing its value"))
                };
                let refused = state.buffer.write(v);
                debug_assert!(refused.is_none(), "capacity was checked before committing");
            }
            state.recv_waiters.wake_all();
        }

        this.resolved = true;
        Poll::Ready(true)
    }
}

impl<T> Drop for SendFut<T> {
    fn drop(&mut self) {
        if self.parked {
            let mut locks = LockSet::acquire(self.targets.iter().map(|t| t as &dyn Participant));
            for target in &self.targets {
                // safety: as in poll, one address maps to one element type
                let state = unsafe { locks.get(target.key()).state::<T>() };
                state.send_waiters.unpark(self.token);
            }
        }
        for target in &self.targets {
            target.release_sender();
        }
    }
}
