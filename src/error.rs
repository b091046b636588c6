//! Error types for the Deribit session client.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible client operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use deribit_session::{Client, Result};
//!
//! async fn example(client: &Client) -> Result<()> {
//!     let book = client.get_order_book("BTC-PERPETUAL", 5).await?;
//!     println!("{book}");
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Type | Variants |
//! |----------|------|----------|
//! | Connection bring-up | [`ConnectError`] | resolution, TCP, TLS, framing, timeout |
//! | Frame I/O | [`TransportError`] | not connected, I/O fault, closed |
//! | Correlated calls | [`CallError`] | timeout, channel closed, serialization, id exhaustion |
//! | Misuse | [`Error::InvalidState`] | double open, call before open |
//! | Exchange | [`Error::Rpc`] | JSON-RPC error replies |

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;
use std::time::Duration;

use thiserror::Error;

use crate::identifiers::RequestId;
use crate::transport::ChannelState;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

/// Error returned by [`TransportChannel::send`](crate::transport::TransportChannel::send).
pub type SendError = TransportError;

/// Error returned by [`TransportChannel::receive`](crate::transport::TransportChannel::receive).
pub type ReceiveError = TransportError;

// ============================================================================
// ConnectError
// ============================================================================

/// Failure of one handshake stage.
///
/// Every variant leaves the channel in [`ChannelState::Closed`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// Host name did not resolve to any address.
    #[error("Name resolution failed for {host}: {message}")]
    ResolutionFailed {
        /// Host being resolved.
        host: String,
        /// Resolver error.
        message: String,
    },

    /// No resolved address accepted a TCP connection.
    #[error("TCP connect failed: {message}")]
    TcpFailed {
        /// Last connect error.
        message: String,
    },

    /// TLS negotiation or certificate validation failed.
    #[error("TLS handshake failed: {message}")]
    EncryptionFailed {
        /// Description of the TLS failure.
        message: String,
    },

    /// WebSocket upgrade failed.
    #[error("WebSocket handshake failed: {message}")]
    FramingFailed {
        /// Description of the upgrade failure.
        message: String,
    },

    /// The whole bring-up exceeded the connect timeout.
    #[error("Connection timeout after {timeout_ms}ms")]
    Timeout {
        /// Milliseconds waited before giving up.
        timeout_ms: u64,
    },

    /// `close()` was called while the handshake was in progress.
    #[error("Connection aborted during handshake")]
    Aborted,
}

// ============================================================================
// TransportError
// ============================================================================

/// Failure to send or receive a frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The channel is not open.
    #[error("Channel not connected (state: {state})")]
    NotConnected {
        /// State observed at the time of the call.
        state: ChannelState,
    },

    /// Transport fault. The channel is closed afterwards.
    #[error("Transport I/O error: {message}")]
    Io {
        /// Underlying error description.
        message: String,
    },

    /// The peer closed the connection normally.
    #[error("Channel closed by peer")]
    Closed,
}

// ============================================================================
// CallError
// ============================================================================

/// Outcome of a correlated call that produced no reply.
#[derive(Error, Debug)]
pub enum CallError {
    /// No reply arrived before the deadline.
    #[error("Request {request_id} timed out after {timeout_ms}ms")]
    TimedOut {
        /// The request that timed out.
        request_id: RequestId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// The channel closed before a reply arrived.
    #[error("Channel closed before reply")]
    ChannelClosed,

    /// The request could not be serialized.
    #[error("Request serialization failed: {0}")]
    SerializationFailed(#[source] serde_json::Error),

    /// Every request identifier of this channel has been used.
    #[error("Request identifier space exhausted")]
    IdentifierSpaceExhausted,

    /// Too many calls are already waiting for replies.
    #[error("Too many pending requests: {pending}/{max}")]
    TooManyPending {
        /// Calls currently in flight.
        pending: usize,
        /// Configured limit.
        max: usize,
    },
}

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Session Errors
    // ========================================================================
    /// Connection bring-up failed.
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// Frame send or receive failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Correlated call failed.
    #[error(transparent)]
    Call(#[from] CallError),

    /// Operation not valid in the current channel state.
    ///
    /// Programmer misuse, e.g. opening an already open channel.
    #[error("Invalid state for {operation}: {state}")]
    InvalidState {
        /// Operation that was attempted.
        operation: &'static str,
        /// State the channel was in.
        state: ChannelState,
    },

    // ========================================================================
    // Exchange Errors
    // ========================================================================
    /// The exchange answered with a JSON-RPC error.
    #[error("RPC error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// Error message from the exchange.
        message: String,
    },

    /// Reply did not have the expected shape.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates an invalid state error.
    #[inline]
    pub fn invalid_state(operation: &'static str, state: ChannelState) -> Self {
        Self::InvalidState { operation, state }
    }

    /// Creates an RPC error.
    #[inline]
    pub fn rpc(code: i64, message: impl Into<String>) -> Self {
        Self::Rpc {
            code,
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

/// Milliseconds in `duration`, saturating at `u64::MAX`.
#[inline]
#[must_use]
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl TransportError {
    /// Creates an I/O error.
    #[inline]
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Connect(ConnectError::Timeout { .. }) | Self::Call(CallError::TimedOut { .. })
        )
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connect(_) | Self::Transport(_) | Self::Call(CallError::ChannelClosed)
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed when the caller retries the call
    /// on the same connection.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Call(CallError::TimedOut { .. } | CallError::TooManyPending { .. })
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
