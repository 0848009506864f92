//! # Sluice: mailboxes that broker values between concurrent pipelines.
//!
//! A mailbox decouples producers from consumers that proceed at different
//! rates. It is created by calling the [`mailbox`] function, which creates
//! a linked pair of [`Output`] (the producer endpoint) and [`Input`] (the
//! consumer endpoint), plus a first-class [`Seal`] handle. The buffering
//! discipline is chosen up front via [`Buffer`], based on various
//! tradeoffs:
//!
//! - Bounded vs. unbounded: is there an upper bound to how much RAM the
//!   mailbox will consume, or will a producer always be able to push a new
//!   value without waiting?
//! - Lossless vs. lossy: when a bounded mailbox is full, does the producer
//!   wait for room (backpressure), or does the oldest queued value get
//!   evicted so the producer never waits?
//! - Queue vs. register: does each value get delivered at most once, or
//!   does the mailbox always present the most recent value to any reader
//!   who asks, however often they ask?
//!
//! Sending and receiving are transactions: each send and each receive
//! inspects and mutates the mailbox atomically, and either commits or
//! leaves no trace. A send into a full (but live) mailbox waits; a receive
//! from an empty (but live) mailbox waits. There are no error values.
//! A send resolves to `false` once the mailbox is sealed, and a receive
//! resolves to `None` once the mailbox is sealed and drained; both are
//! ordinary outcomes the caller uses to terminate cleanly.
//!
//! Mailboxes have a concept of being "sealed." Sealing happens explicitly
//! through [`Seal`], at scope exit with [`with_mailbox`] /
//! [`with_mailbox_async`], or implicitly when the last handle of either
//! side is dropped. When the last [`Output`] is dropped, consumers drain
//! whatever is buffered and then see `None`. When the last [`Input`] is
//! dropped, producers see `false` on their next send. Handles are
//! reference counted, so either trigger fires promptly, which is what
//! keeps arbitrary topologies (including cycles of mailboxes) free of
//! deadlock: every waiting operation is also watching the sealed flag, and
//! something always ends up setting it.
//!
//! Endpoints compose. [`Output::merge`] fans a single send out to several
//! mailboxes in one transaction, pacing the producer by the slowest live
//! consumer — a broadcast. [`Input::race`] receives from whichever of
//! several mailboxes produces a value first — work stealing. Both have
//! neutral elements ([`Output::exhausted`], [`Input::exhausted`]) and are
//! associative, so endpoint collections fold cleanly.
//!
//! ```
//! use sluice::{mailbox, Buffer};
//!
//! #[tokio::main(flavor = "multi_thread", worker_threads = 2)]
//! async fn main() {
//!     let (output, input, _seal) = mailbox(Buffer::bounded(4));
//!
//!     let producer = tokio::spawn(async move {
//!         for n in 1..=8 {
//!             if !output.send(n).await {
//!                 break;
//!             }
//!         }
//!         // dropping the last producer handle seals the mailbox
//!     });
//!
//!     let mut seen = Vec::new();
//!     while let Some(n) = input.recv().await {
//!         seen.push(n);
//!     }
//!     producer.await.unwrap();
//!     assert_eq!(seen, vec![1, 2, 3, 4, 5, 6, 7, 8]);
//! }
//! ```
//!
//! Every operation also has a blocking form (`send_blocking`,
//! `recv_blocking`, and their timeout and try variants), so plain threads
//! can use a mailbox without an async runtime, and the two worlds can face
//! each other across the same mailbox. For plugging into `futures`-based
//! pipelines, [`Input::stream`] reads an input as a `Stream` and
//! [`Output::send_all`] drains one into an output, terminating cleanly
//! when the other side departs.

mod mailbox;

pub use crate::mailbox::{
    mailbox, with_mailbox, with_mailbox_async, Buffer, Input, IntoStream, Output, RecvFut,
    RecvStream, Seal, SendFut, TryRecv, TrySend,
};
