//! Client-server communication protocol.
//!
//! This module defines how pong clients and servers exchange messages: the
//! envelope framing, the status catalog used for protocol-level errors, and
//! the readiness-driven transport both ends run on.
//!
//! # Overview
//!
//! A server accepts TCP clients up to a configured capacity and relays every
//! valid envelope a client sends to every registered client, the sender
//! included. Clients send from the calling thread and receive through a
//! background read loop that publishes each drained frame to a buffer the
//! caller polls.
//!
//! # Key Components
//!
//! - [`Envelope`]: The `{headers, body}` object every frame carries.
//! - [`Status`]: Protocol status codes and the error envelopes built from them.
//! - [`Server`]: Accept, validate and broadcast loop.
//! - [`Client`]: Connection with a background read loop and polling receive.
//! - [`CancelToken`]: Cooperative stop signal that also wakes a blocked selector.
//!
//! # Wire Format
//!
//! A frame is the standard base64 encoding of a UTF-8 JSON object:
//!
//! - The object has exactly the keys `headers` (an object) and `body` (any
//!   JSON value); decoding tolerates extra keys.
//! - There is no length prefix or delimiter. One drain of a readable socket
//!   is treated as one frame.
//! - Error envelopes carry `EMessage`, `EName` and `ECode` headers.
//!
//! # See Also
//!
//! - [`config`](crate::config): Tunables for servers and clients.
use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod buffer;
pub mod client;
pub mod envelope;
pub mod selector;
pub mod server;
pub mod status;
pub mod thread;
pub mod transport;

pub use buffer::{BufferError, ConnectionBuffer, Direction, SharedBuffer, SlotState};
pub use client::{AppClient, Client, NO_DATA};
pub use envelope::{Decoded, Envelope, Headers, Message, decode, encode};
pub use server::{Peer, Server, ServerState};
pub use status::{Status, transform_error};
pub use thread::{CancelToken, Worker};
pub use transport::TransportError;

/// Locks `mutex`, recovering the data if a previous holder panicked.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
