//! Server-initiated notifications.
//!
//! Notifications carry no `id`. Deribit sends two kinds:
//!
//! | Method | Params |
//! |--------|--------|
//! | `subscription` | `{ "channel": "book.BTC-PERPETUAL.100ms", "data": { ... } }` |
//! | `heartbeat` | `{ "type": "heartbeat" \| "test_request" }` |

// ============================================================================
// Imports
// ============================================================================

use serde::Deserialize;
use serde_json::Value;

/// Payload reported for subscription pushes without `data`.
static NULL: Value = Value::Null;

// ============================================================================
// Notification
// ============================================================================

/// A push frame from the exchange.
///
/// # Format
///
/// ```json
/// {
///   "jsonrpc": "2.0",
///   "method": "subscription",
///   "params": { "channel": "book.BTC-PERPETUAL.100ms", "data": { ... } }
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Notification {
    /// Notification method.
    pub method: String,

    /// Notification params.
    #[serde(default)]
    pub params: Value,
}

impl Notification {
    /// Returns the subscription channel, if this is a subscription push.
    #[inline]
    #[must_use]
    pub fn channel(&self) -> Option<&str> {
        if self.method != "subscription" {
            return None;
        }
        self.params.get("channel").and_then(Value::as_str)
    }

    /// Classifies the notification.
    #[must_use]
    pub fn kind(&self) -> NotificationKind<'_> {
        match self.method.as_str() {
            "subscription" => match self.channel() {
                Some(channel) => NotificationKind::Subscription {
                    channel,
                    data: self.params.get("data").unwrap_or(&NULL),
                },
                None => NotificationKind::Unknown {
                    method: &self.method,
                },
            },
            "heartbeat" => {
                let kind = match self.params.get("type").and_then(Value::as_str) {
                    Some("test_request") => HeartbeatKind::TestRequest,
                    _ => HeartbeatKind::Heartbeat,
                };
                NotificationKind::Heartbeat(kind)
            }
            _ => NotificationKind::Unknown {
                method: &self.method,
            },
        }
    }
}

// ============================================================================
// NotificationKind
// ============================================================================

/// Borrowed view of a classified notification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NotificationKind<'a> {
    /// Push for a subscribed channel.
    Subscription {
        /// Channel name.
        channel: &'a str,
        /// Channel payload.
        data: &'a Value,
    },
    /// Heartbeat from the exchange.
    Heartbeat(HeartbeatKind),
    /// Anything else.
    Unknown {
        /// Notification method.
        method: &'a str,
    },
}

/// Heartbeat flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatKind {
    /// Informational beat.
    Heartbeat,
    /// The exchange expects a `public/test` call in answer.
    TestRequest,
}

// ============================================================================
// Tests
// ============================================================================
