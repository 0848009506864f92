// adapters between mailboxes and `futures` streams: an input can be read
// as a stream, and an output can drain one. both drive exactly one
// transaction per value and buffer nothing themselves.

use super::{
    recv::{Input, RecvFut},
    send::Output,
};
use futures::{pin_mut, Future, Stream, StreamExt};
use std::{
    pin::Pin,
    task::{Context, Poll},
};

impl<T: Send + 'static> Input<T> {
    /// View this input as a stream of values
    ///
    /// The stream is lazy (nothing happens until it is polled) and
    /// restartable (dropping it and starting another loses nothing); it
    /// ends once every underlying mailbox is sealed and drained.
    pub fn stream(&self) -> RecvStream<'_, T> {
        RecvStream { input: self, fut: None, done: false }
    }

    /// Consume this input into a stream of values
    ///
    /// Same contract as [`stream`](Input::stream), but owns its consumer
    /// reference, so the stream alone keeps the mailboxes unsealed.
    pub fn into_stream(self) -> IntoStream<T> {
        IntoStream { input: self, fut: None, done: false }
    }
}

impl<T: Send + 'static> Output<T> {
    /// Drain a stream of values into this output
    ///
    /// Sends one value per transaction, waiting for room as usual, and
    /// stops cleanly as soon as a send is refused (every target sealed) or
    /// the stream ends. Returns how many values were accepted.
    pub async fn send_all<S>(&self, stream: S) -> usize
    where
        S: Stream<Item = T>,
    {
        pin_mut!(stream);
        let mut accepted = 0;
        while let Some(value) = stream.next().await {
            if !self.send(value).await {
                break;
            }
            accepted += 1;
        }
        accepted
    }
}

/// Stream of values borrowed from an [`Input`]
///
/// Created by [`Input::stream`]. Fused: keeps returning `None` once the
/// input is exhausted.
#[must_use = "streams do nothing unless polled"]
pub struct RecvStream<'a, T> {
    input: &'a Input<T>,
    fut: Option<RecvFut<T>>,
    done: bool,
}

impl<T: Send + 'static> Stream for RecvStream<'_, T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<T>> {
        let this = Pin::into_inner(self);
        if this.done {
            return Poll::Ready(None);
        }
        if this.fut.is_none() {
            this.fut = Some(this.input.recv());
        }
        let fut = this.fut.as_mut().expect("receive future installed above");
        match Pin::new(fut).poll(cx) {
            Poll::Ready(item) => {
                this.fut = None;
                this.done = item.is_none();
                Poll::Ready(item)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> Unpin for RecvStream<'_, T> {}

/// Stream of values owning an [`Input`]
///
/// Created by [`Input::into_stream`]. Fused: keeps returning `None` once
/// the input is exhausted.
#[must_use = "streams do nothing unless polled"]
pub struct IntoStream<T> {
    input: Input<T>,
    fut: Option<RecvFut<T>>,
    done: bool,
}

impl<T: Send + 'static> Stream for IntoStream<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<T>> {
        let this = Pin::into_inner(self);
        if this.done {
            return Poll::Ready(None);
        }
        if this.fut.is_none() {
            this.fut = Some(this.input.recv());
        }
        let fut = this.fut.as_mut().expect("receive future installed above");
        match Pin::new(fut).poll(cx) {
            Poll::Ready(item) => {
                this.fut = None;
                this.done = item.is_none();
                Poll::Ready(item)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> Unpin for IntoStream<T> {}
