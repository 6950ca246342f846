//! Broadcast message exchange over TCP.
//!
//! A [`Server`] relays every envelope a client sends to all connected
//! clients; a [`Client`] exchanges envelopes with one server from a
//! background read loop. See [`protocol`] for the wire format.
pub mod cli;
pub mod config;
pub mod diagnostics;
pub mod protocol;

pub use cli::{Command, CommandError, Shell, prompt};
pub use config::{ClientConfig, ServerConfig};
pub use protocol::{AppClient, Client, Envelope, Server, Status, TransportError};
