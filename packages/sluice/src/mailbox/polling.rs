// blocking layer over the send/recv futures, so plain threads can use a
// mailbox without an async runtime. derived from the pollster crate's
// design: one condvar-backed signal per blocking call, used as the waker.

use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, Condvar, Mutex},
    task::{Context, Poll, Wake, Waker},
    time::{Duration, Instant},
};

enum SignalState {
    Empty,
    Waiting,
    Notified,
}

struct Signal {
    state: Mutex<SignalState>,
    cond: Condvar,
}

enum Timeout {
    Never,
    At(Instant),
    Immediate,
}

impl Signal {
    fn new() -> Self {
        Signal { state: Mutex::new(SignalState::Empty), cond: Condvar::new() }
    }

    /// wait for a notification; true if the timeout elapsed first
    fn wait(&self, timeout: &Timeout) -> bool {
        let mut state = self.state.lock().unwrap();
        match *state {
            SignalState::Notified => *state = SignalState::Empty,
            SignalState::Waiting => unreachable!("only one thread waits on a signal"),
            SignalState::Empty => {
                *state = SignalState::Waiting;
                while let SignalState::Waiting = *state {
                    match timeout {
                        Timeout::Never => {
                            state = self.cond.wait(state).unwrap();
                        }
                        Timeout::At(deadline) => {
                            let left = deadline.saturating_duration_since(Instant::now());
                            let (next, result) = self.cond.wait_timeout(state, left).unwrap();
                            state = next;
                            if result.timed_out() && matches!(*state, SignalState::Waiting) {
                                *state = SignalState::Empty;
                                return true;
                            }
                        }
                        Timeout::Immediate => {
                            *state = SignalState::Empty;
                            return true;
                        }
                    }
                }
            }
        }
        false
    }

    fn notify(&self) {
        let mut state = self.state.lock().unwrap();
        match *state {
            SignalState::Notified => {}
            SignalState::Empty => *state = SignalState::Notified,
            SignalState::Waiting => {
                *state = SignalState::Empty;
                self.cond.notify_one();
            }
        }
    }
}

impl Wake for Signal {
    fn wake(self: Arc<Self>) {
        self.notify();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.notify();
    }
}

fn drive<F>(fut: &mut F, timeout: Timeout) -> Option<F::Output>
where
    F: Future + Unpin,
{
    let signal = Arc::new(Signal::new());
    let waker = Waker::from(Arc::clone(&signal));
    let mut cx = Context::from_waker(&waker);
    loop {
        match Pin::new(&mut *fut).poll(&mut cx) {
            Poll::Ready(out) => break Some(out),
            Poll::Pending => {
                if signal.wait(&timeout) {
                    break None;
                }
            }
        }
    }
}

/// block the thread until the future resolves
pub(crate) fn block_on<F>(fut: &mut F) -> F::Output
where
    F: Future + Unpin,
{
    drive(fut, Timeout::Never).expect("future did not resolve without a timeout")
}

/// block the thread until the future resolves or the timeout elapses
pub(crate) fn block_on_timeout<F>(fut: &mut F, timeout: Duration) -> Option<F::Output>
where
    F: Future + Unpin,
{
    drive(fut, Timeout::At(Instant::now() + timeout))
}

/// poll the future exactly once, returning its output only if it resolves
/// without waiting
pub(crate) fn poll_once<F>(fut: &mut F) -> Option<F::Output>
where
    F: Future + Unpin,
{
    drive(fut, Timeout::Immediate)
}
