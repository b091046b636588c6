//! Deribit session client - multiplexed JSON-RPC over one TLS WebSocket.
//!
//! This library connects to the Deribit WebSocket API and lets many tasks
//! share one connection for trading calls and subscription streams.
//!
//! # Architecture
//!
//! The client is layered:
//!
//! - **Transport**: one [`TransportChannel`] owns the socket. It is brought
//!   up in four stages (resolve, TCP, TLS, WebSocket) under one timeout.
//! - **Session**: a [`Multiplexer`] correlates requests with replies by id,
//!   a [`Registry`] maps subscription channels to handlers, and a single
//!   consumer task reads every frame and routes it.
//! - **Client**: [`Client`] exposes the exchange API on top.
//!
//! Key design principles:
//!
//! - Every call resolves exactly once: reply, timeout, or channel closed
//! - Replies are never delivered to the wrong caller
//! - Unsubscribe stops deliveries before the request is sent
//! - Nothing is retried automatically
//!
//! # Quick Start
//!
//! ```no_run
//! use deribit_session::{Client, ClientConfig, Result, book_handler};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = Client::connect(ClientConfig::testnet()).await?;
//!
//!     let book = client.get_order_book("BTC-PERPETUAL", 5).await?;
//!     println!("{book}");
//!
//!     let stop = CancellationToken::new();
//!     let handler = book_handler(|update| println!("{update}"));
//!     client.stream("book.BTC-PERPETUAL.100ms", handler, stop).await?;
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | [`Client`] and [`AuthToken`] |
//! | [`config`] | [`ClientConfig`] builder and [`Credentials`] |
//! | [`book`] | Order book payload decoding |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Request ids and their allocator |
//! | [`protocol`] | JSON-RPC wire records |
//! | [`session`] | Multiplexer, registry and consumer |
//! | [`transport`] | Channel, handshake and TLS |

// ============================================================================
// Modules
// ============================================================================

/// Order book payload decoding.
pub mod book;

/// High-level client.
pub mod client;

/// Client configuration and credentials.
pub mod config;

/// Error types and result aliases.
///
/// All fallible client operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Request identifiers.
pub mod identifiers;

/// JSON-RPC wire records.
pub mod protocol;

/// Session layer: correlation, subscriptions, reader task.
pub mod session;

/// WebSocket transport layer.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::{AuthToken, Client};
pub use config::{ClientConfig, ClientConfigBuilder, Credentials};

// Book types
pub use book::{BookSummary, BookUpdate, Level, LevelAction, book_handler};

// Error types
pub use error::{CallError, ConnectError, Error, Result, TransportError};

// Identifier types
pub use identifiers::{IdAllocator, RequestId};

// Protocol types
pub use protocol::{Frame, Method, Notification, OrderParams, OrderType, Response};

// Session types
pub use session::{ErrorSink, Handler, Multiplexer, Registry, Session};

// Transport types
pub use transport::{ChannelState, Endpoint, Ready, TlsMode, TransportChannel};
