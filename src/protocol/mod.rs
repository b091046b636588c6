//! JSON-RPC wire records.
//!
//! Deribit speaks JSON-RPC 2.0 over one WebSocket. Three kinds of frames
//! share the connection:
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | [`Request`] | Client → Exchange | Correlated call (`id` set) |
//! | [`Response`] | Exchange → Client | Reply carrying the same `id` |
//! | [`Notification`] | Exchange → Client | Subscription push or heartbeat (no `id`) |
//!
//! The session core only looks at the `id` of replies and the `channel` of
//! subscription pushes. Everything else stays an opaque [`serde_json::Value`].
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `method` | Typed catalogue of API methods and their params |
//! | `request` | Request and Response records |
//! | `notification` | Server-initiated notifications |
//! | `frame` | Classification of inbound text frames |

// ============================================================================
// Submodules
// ============================================================================

/// Inbound frame classification.
pub mod frame;

/// API method catalogue.
pub mod method;

/// Server-initiated notifications.
pub mod notification;

/// Request and Response records.
pub mod request;

// ============================================================================
// Re-exports
// ============================================================================

pub use frame::Frame;
pub use method::{AuthParams, Method, OrderParams, OrderType};
pub use notification::{HeartbeatKind, Notification, NotificationKind};
pub use request::{Request, Response, RpcError};
