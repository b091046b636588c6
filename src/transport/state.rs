//! Channel lifecycle state.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

// ============================================================================
// ChannelState
// ============================================================================

/// Lifecycle of a transport channel.
///
/// ```text
/// Unconnected → Resolving → TcpConnecting → EncryptHandshaking
///             → FrameHandshaking → Open → Closing → Closed
/// ```
///
/// A fault at any stage goes straight to `Closed`. `Closed` may be opened
/// again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    /// Never opened.
    Unconnected,
    /// Resolving the host name.
    Resolving,
    /// Connecting the TCP socket.
    TcpConnecting,
    /// Negotiating TLS.
    EncryptHandshaking,
    /// Upgrading to WebSocket.
    FrameHandshaking,
    /// Ready for frames.
    Open,
    /// Close in progress.
    Closing,
    /// Released.
    Closed,
}

impl ChannelState {
    /// Returns `true` while a handshake stage is running.
    #[inline]
    #[must_use]
    pub const fn is_handshaking(self) -> bool {
        matches!(
            self,
            Self::Resolving | Self::TcpConnecting | Self::EncryptHandshaking | Self::FrameHandshaking
        )
    }

    /// Returns `true` if `open()` may start from this state.
    #[inline]
    #[must_use]
    pub const fn can_open(self) -> bool {
        matches!(self, Self::Unconnected | Self::Closed)
    }

    /// The stage that follows this one during bring-up.
    #[must_use]
    pub const fn next_stage(self) -> Option<Self> {
        match self {
            Self::Unconnected | Self::Closed => Some(Self::Resolving),
            Self::Resolving => Some(Self::TcpConnecting),
            Self::TcpConnecting => Some(Self::EncryptHandshaking),
            Self::EncryptHandshaking => Some(Self::FrameHandshaking),
            Self::FrameHandshaking => Some(Self::Open),
            Self::Open | Self::Closing => None,
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ============================================================================
// Tests
// ============================================================================
