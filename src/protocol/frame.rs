//! Inbound frame classification.
//!
//! Every text frame read off the socket is classified exactly once before
//! dispatch. A frame with a numeric `id` is a reply; one with a `method` and
//! no `id` is a notification; anything else is kept as raw text for logging.

// ============================================================================
// Imports
// ============================================================================

use serde::Deserialize;

use super::{Notification, Response};

// ============================================================================
// Frame
// ============================================================================

/// One inbound message.
///
/// Transient: it lives only for the duration of one dispatch.
#[derive(Debug, Clone)]
pub enum Frame {
    /// Reply to a correlated call.
    Reply(Response),
    /// Server-initiated push.
    Notification(Notification),
    /// Not valid JSON-RPC.
    Unparseable(String),
}

/// Shape-based match used by [`Frame::parse`].
#[derive(Deserialize)]
#[serde(untagged)]
enum Incoming {
    Reply(Response),
    Notification(Notification),
}

impl Frame {
    /// Classifies a text frame.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        match serde_json::from_str::<Incoming>(text) {
            Ok(Incoming::Reply(response)) => Self::Reply(response),
            Ok(Incoming::Notification(notification)) => Self::Notification(notification),
            Err(_) => Self::Unparseable(text.to_string()),
        }
    }

    /// Short label for logging.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Reply(_) => "reply",
            Self::Notification(_) => "notification",
            Self::Unparseable(_) => "unparseable",
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifiers::RequestId;

    #[test]
    fn test_reply_frame() {
        let frame = Frame::parse(r#"{"jsonrpc":"2.0","id":9,"result":{"order_id":"42"}}"#);
        match frame {
            Frame::Reply(response) => {
                assert_eq!(response.id, RequestId::new(9));
                assert_eq!(response.result.as_ref().expect("result")["order_id"], "42");
            }
            other => panic!("expected reply, got {other:?}"),
        }
    }

    #[test]
    fn test_error_reply_frame() {
        let frame =
            Frame::parse(r#"{"jsonrpc":"2.0","id":3,"error":{"code":13009,"message":"unauthorized"}}"#);
        assert!(matches!(frame, Frame::Reply(ref r) if r.error.is_some()));
    }

    #[test]
    fn test_notification_frame() {
        let frame = Frame::parse(
            r#"{"jsonrpc":"2.0","method":"subscription","params":{"channel":"book.BTC-PERPETUAL","data":{}}}"#,
        );
        match frame {
            Frame::Notification(notification) => {
                assert_eq!(notification.channel(), Some("book.BTC-PERPETUAL"));
            }
            other => panic!("expected notification, got {other:?}"),
        }
    }

    #[test]
    fn test_unparseable_frames() {
        assert_eq!(Frame::parse("not json").kind(), "unparseable");
        assert_eq!(Frame::parse(r#"{"foo": 1}"#).kind(), "unparseable");
        assert_eq!(Frame::parse(r#"{"id": "abc", "result": 1}"#).kind(), "unparseable");
        assert_eq!(Frame::parse("[1, 2, 3]").kind(), "unparseable");
    }
}
