// concurrency core of the mailbox. this module is the sin-eater of the
// unsafety: everything above it (send, recv) composes the pieces exposed
// here without writing another unsafe block.
//
// a mailbox is an Arc around:
//
// - a mutex holding the lockable state: the buffer, the sealed flag, and
//   one waiter set per side.
// - two atomic reference counts, one per side, kept outside the mutex.
//   pending send/recv futures hold a reference on their side, so a side is
//   not considered departed while one of its operations is in flight.
//
// every operation commits entirely inside the mutexes of the mailboxes it
// touches. a composed operation (fanned-out send, raced recv) locks all of
// its mailboxes at once, in ascending allocation-address order, so two
// overlapping composites can never deadlock. the locks it holds are type
// erased (the composite may span mailboxes of one element type reached
// through different projections), tagged with the owning allocation's
// address, and recovered to their concrete type by the caller that took
// them; one address maps to exactly one element type, which is what makes
// the recovery sound.
//
// wakeups cannot be lost: a waiter parks its waker under the same lock
// that guards the state it observed, and every state transition that could
// unblock it (value written, room made, seal) happens under that lock and
// wakes the relevant side before releasing it.

use super::buffer::Buffer;
use smallvec::SmallVec;
use std::{
    sync::{
        atomic::{AtomicU64, Ordering::Relaxed},
        Arc, Mutex,
    },
    task::Waker,
};
use tracing::trace;

/// allocate a token identifying one pending operation across every waiter
/// set it parks in
pub(crate) fn next_token() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    NEXT.fetch_add(1, Relaxed)
}

/// wakers parked on one side of a mailbox, keyed by operation token
pub(crate) struct WaiterSet {
    entries: SmallVec<[(u64, Waker); 4]>,
}

impl WaiterSet {
    fn new() -> Self {
        WaiterSet { entries: SmallVec::new() }
    }

    /// park a waker under `token`, replacing a previously parked one
    pub(crate) fn park(&mut self, token: u64, waker: &Waker) {
        if let Some(i) = self.entries.iter().position(|(t, _)| *t == token) {
            let parked = &mut self.entries[i].1;
            if !parked.will_wake(waker) {
                *parked = waker.clone();
            }
        } else {
            self.entries.push((token, waker.clone()));
        }
    }

    /// drop the waker parked under `token`, if any
    pub(crate) fn unpark(&mut self, token: u64) {
        self.entries.retain(|(t, _)| *t != token);
    }

    /// wake and drain every parked waiter. woken operations re-park when
    /// they re-run and still cannot proceed.
    pub(crate) fn wake_all(&mut self) {
        for (_, waker) in self.entries.drain(..) {
            waker.wake();
        }
    }
}

/// lockable subset of mailbox state
pub(crate) struct Lockable<T> {
    pub(crate) buffer: Buffer<T>,
    /// monotonic: once set, never cleared
    pub(crate) sealed: bool,
    pub(crate) send_waiters: WaiterSet,
    pub(crate) recv_waiters: WaiterSet,
}

impl<T> Lockable<T> {
    /// seal under an already-held lock. idempotent. both sides are woken:
    /// parked senders resolve to refusal, parked receivers drain or end.
    pub(crate) fn seal(&mut self) {
        if !self.sealed {
            self.sealed = true;
            self.send_waiters.wake_all();
            self.recv_waiters.wake_all();
        }
    }
}

struct Shared<T> {
    lockable: Mutex<Lockable<T>>,
    /// live producer handles, pending send futures included
    send_count: AtomicU64,
    /// live consumer handles, pending recv futures included
    recv_count: AtomicU64,
}

/// handle to a mailbox's shared state
pub(crate) struct Mailbox<T>(Arc<Shared<T>>);

impl<T> Clone for Mailbox<T> {
    fn clone(&self) -> Self {
        Mailbox(Arc::clone(&self.0))
    }
}

impl<T> Mailbox<T> {
    /// construct with both sides counted at one
    pub(crate) fn new(buffer: Buffer<T>) -> Self {
        Mailbox(Arc::new(Shared {
            lockable: Mutex::new(Lockable {
                buffer,
                sealed: false,
                send_waiters: WaiterSet::new(),
                recv_waiters: WaiterSet::new(),
            }),
            send_count: AtomicU64::new(1),
            recv_count: AtomicU64::new(1),
        }))
    }

    /// stable ordering key: the address of the shared allocation
    pub(crate) fn key(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    pub(crate) fn seal(&self) {
        self.0.lockable.lock().unwrap().seal();
    }

    pub(crate) fn retain_sender(&self) {
        self.0.send_count.fetch_add(1, Relaxed);
    }

    /// drop one producer reference; the last one seals the mailbox so
    /// consumers drain what is buffered and then end
    pub(crate) fn release_sender(&self) {
        if self.0.send_count.fetch_sub(1, Relaxed) == 1 {
            trace!(mailbox = self.key(), "last producer reference gone, sealing");
            self.seal();
        }
    }

    pub(crate) fn retain_receiver(&self) {
        self.0.recv_count.fetch_add(1, Relaxed);
    }

    /// drop one consumer reference; the last one seals the mailbox so
    /// producers observe refusal, and discards values nobody will take
    pub(crate) fn release_receiver(&self) {
        if self.0.recv_count.fetch_sub(1, Relaxed) == 1 {
            trace!(mailbox = self.key(), "last consumer reference gone, sealing");
            let mut lock = self.0.lockable.lock().unwrap();
            lock.seal();
            lock.buffer.discard_queued();
        }
    }
}

/// something that can surface a type-erased lock on its underlying mailbox
pub(crate) trait Participant {
    fn key(&self) -> usize;
    fn lock_erased(&self) -> ErasedLock<'_>;
}

impl<T> Participant for Mailbox<T> {
    fn key(&self) -> usize {
        Mailbox::key(self)
    }

    fn lock_erased(&self) -> ErasedLock<'_> {
        let mut guard = self.0.lockable.lock().unwrap();
        // the pointer targets the Lockable inside the mutex (inside the Arc
        // allocation), not the guard, so boxing the guard does not move the
        // pointee. it stays valid exactly as long as the guard is held.
        let state = (&mut *guard) as *mut Lockable<T> as *mut ();
        ErasedLock { key: Mailbox::key(self), state, _guard: Box::new(guard) }
    }
}

// erases the concrete MutexGuard type so locks over mailboxes of different
// element types can live in one set
trait Held {}
impl<X> Held for X {}

/// a held mailbox lock with its element type erased, tagged with the
/// address of the owning allocation
pub(crate) struct ErasedLock<'a> {
    key: usize,
    state: *mut (),
    _guard: Box<dyn Held + 'a>,
}

impl<'a> ErasedLock<'a> {
    pub(crate) fn key(&self) -> usize {
        self.key
    }

    /// recover the concrete lockable state.
    ///
    /// safety: the caller must guarantee this lock was taken from a mailbox
    /// whose element type is `T`. callers look locks up by allocation
    /// address, and one address maps to exactly one element type.
    pub(crate) unsafe fn state<T>(&mut self) -> &mut Lockable<T> {
        &mut *(self.state as *mut Lockable<T>)
    }
}

/// every mailbox lock one composed transaction holds, acquired in
/// ascending address order so overlapping transactions cannot deadlock
pub(crate) struct LockSet<'a> {
    locks: SmallVec<[ErasedLock<'a>; 2]>,
}

impl<'a> LockSet<'a> {
    /// lock each distinct participant, in address order
    pub(crate) fn acquire<I>(participants: I) -> Self
    where
        I: IntoIterator<Item = &'a (dyn Participant + 'a)>,
    {
        let mut parts: SmallVec<[&dyn Participant; 2]> = participants.into_iter().collect();
        parts.sort_by_key(|p| p.key());
        parts.dedup_by_key(|p| p.key());
        LockSet { locks: parts.iter().map(|p| p.lock_erased()).collect() }
    }

    /// the held lock for the mailbox at `key`. panics if the transaction
    /// did not list that mailbox as a participant.
    pub(crate) fn get(&mut self, key: usize) -> &mut ErasedLock<'a> {
        self.locks
            .iter_mut()
            .find(|lock| lock.key() == key)
            .expect("transaction touched a mailbox it did not lock")
    }
}
