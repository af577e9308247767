//! # amqpwire
//!
//! Connection core for an AMQP 0-9-1 client: transport with per-I/O
//! deadlines (plain TCP or TLS), the open handshake (version, SASL,
//! tuning, vhost), channel multiplexing, bidirectional heartbeats and
//! exactly-once shutdown with listener fan-out.
//!
//! ## Architecture
//!
//! - **Reader task**: the only consumer of the transport's read half;
//!   decodes frames and dispatches them to channel 0 handling, the
//!   owning channel, or the closed-channel tolerance path.
//! - **Heartbeater task**: fills idle gaps with heartbeat frames and
//!   stretches the read deadline after inbound traffic.
//! - **Callers**: open channels, perform channel-0 RPC, register
//!   close/blocked listeners. All outbound frames share one write
//!   lock, so frames never interleave on the wire.
//!
//! ## Example
//!
//! ```ignore
//! use amqpwire::{Connection, ConnectionOptions};
//!
//! #[tokio::main]
//! async fn main() -> amqpwire::Result<()> {
//!     let conn = Connection::connect("localhost", 5672, ConnectionOptions::default()).await?;
//!
//!     let (tx, mut closes) = tokio::sync::mpsc::channel(1);
//!     conn.notify_close(tx);
//!
//!     let channel = conn.open_channel().await?;
//!     // ... drive the channel ...
//!     channel.close().await?;
//!     conn.close().await
//! }
//! ```

pub mod auth;
pub mod error;
pub mod options;
pub mod protocol;

mod channel;
mod connection;
mod handshake;
mod heartbeat;
mod notify;
mod registry;
mod rpc;
mod transport;

pub use channel::Channel;
pub use connection::{Connection, ServerInfo, Tuning};
pub use error::{Error, ErrorKind, Result};
pub use notify::Blocking;
pub use options::ConnectionOptions;
pub use transport::{IoStream, TlsSettings};
