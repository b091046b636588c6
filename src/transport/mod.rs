//! WebSocket transport layer.
//!
//! This module owns the single connection to the exchange: bring-up,
//! framed send/receive, and close.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐                          ┌──────────────────┐
//! │  Session (Rust)  │        TLS WebSocket     │  Deribit API     │
//! │                  │◄────────────────────────►│                  │
//! │ TransportChannel │   test.deribit.com:443   │  /ws/api/v2      │
//! └──────────────────┘                          └──────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `TransportChannel::new` - Unconnected
//! 2. `TransportChannel::open` - resolve, TCP, TLS, WebSocket upgrade
//! 3. `send` / `receive` - JSON-RPC text frames
//! 4. `TransportChannel::close` - normal closure, socket released
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `endpoint` | Host, port, path and TLS mode |
//! | `state` | Channel lifecycle state |
//! | `handshake` | Four-stage bring-up |
//! | `channel` | Framed send/receive and close |
//! | `gauge` | Live socket accounting |
//! | `tls` | rustls client configurations |
//! | `io` | Frame I/O traits used by the session |

// ============================================================================
// Submodules
// ============================================================================

/// Framed send/receive and close.
pub mod channel;

/// Connection endpoint and TLS settings.
pub mod endpoint;

/// Live socket accounting.
pub mod gauge;

/// Four-stage connection bring-up.
mod handshake;

/// Frame I/O traits.
pub mod io;

/// Channel lifecycle state.
pub mod state;

/// rustls client configurations.
pub mod tls;

// ============================================================================
// Re-exports
// ============================================================================

pub use channel::{DEFAULT_CONNECT_TIMEOUT, Ready, TransportChannel};
pub use endpoint::{Endpoint, TlsMode};
pub use gauge::{SocketGauge, TrackedStream};
pub use io::{FrameSource, FrameWriter};
pub use state::ChannelState;
