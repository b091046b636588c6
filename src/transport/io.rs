//! Frame I/O seams between the session and the transport.
//!
//! The session layer only needs "write one text frame" and "read the next
//! frame". Expressing those as traits lets the multiplexer and consumer run
//! against in-memory doubles in unit tests.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;

use crate::error::TransportError;
use crate::protocol::Frame;

use super::TransportChannel;

// ============================================================================
// Traits
// ============================================================================

/// Outbound half: writes serialized requests.
#[async_trait]
pub trait FrameWriter: Send + Sync {
    /// Writes one text frame.
    async fn send_text(&self, text: String) -> Result<(), TransportError>;
}

/// Inbound half: yields classified frames.
///
/// Only one task reads at a time. Implementations must be cancel-safe.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Waits for the next frame.
    async fn receive(&self) -> Result<Frame, TransportError>;
}

// ============================================================================
// TransportChannel
// ============================================================================

#[async_trait]
impl FrameWriter for TransportChannel {
    async fn send_text(&self, text: String) -> Result<(), TransportError> {
        self.send(text).await
    }
}

#[async_trait]
impl FrameSource for TransportChannel {
    async fn receive(&self) -> Result<Frame, TransportError> {
        TransportChannel::receive(self).await
    }
}
