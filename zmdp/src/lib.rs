//! # zmdp - asynchronous broker RPC client over ZeroMQ DEALER sockets
//!
//! A client for Majordomo-style brokers: connect, discover the broker's
//! service catalog in one handshake, and call the announced remote methods
//! through typed local proxies.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use zmdp::{BrokerClient, ClientConfig, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = BrokerClient::connect(ClientConfig::new("tcp://localhost:5555")).await?;
//!
//!     // Synchronous round trip while the receive loop is stopped
//!     let echo = client.require_service("echo")?;
//!     let pong: String = echo.call("ping", &("hello",)).await?;
//!     assert_eq!(pong, "hello");
//!
//!     // Start the receive loop for future-based calls
//!     client.start().await;
//!     let reply = echo.call_async::<_, String>("ping", &("again",)).await?;
//!     let pong = reply.wait().await?;
//!     assert_eq!(pong, "again");
//!
//!     client.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Call modes
//!
//! While the receive loop is stopped, [`RemoteService::call`] blocks inline
//! on the socket for the matching reply. While the loop is running it owns
//! socket receive, so calls go through [`RemoteService::call_async`], which
//! returns a [`PendingReply`] the loop resolves when the correlated reply
//! arrives. The two modes are explicit methods rather than ambient state, so
//! a call site always knows what it gets back.
//!
//! Replies correlate by (message id, service name); the message id is a
//! rolling u8 counter, which bounds a single service to 256 calls in flight.

pub mod client;
pub mod error;
pub mod pending;
pub mod protocol;
pub mod proxy;
pub mod transport;


// Re-exports
pub use client::{BrokerClient, ClientConfig};
pub use error::{Error, Result};
pub use pending::{CorrelationKey, PendingCalls, PendingReply};
pub use protocol::{CatalogEntry, Reply};
pub use proxy::{RemoteMethod, RemoteService};
pub use transport::{Transport, ZmqTransport};
