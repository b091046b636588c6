//! Live socket accounting.
//!
//! Every socket the handshake acquires is wrapped in a [`TrackedStream`]
//! holding a lease on the channel's [`SocketGauge`]. The lease is released
//! when the socket is dropped, however deep inside TLS and WebSocket layers
//! it ends up, so the gauge reads zero once nothing holds the connection.

// ============================================================================
// Imports
// ============================================================================

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

// ============================================================================
// SocketGauge
// ============================================================================

/// Counter of live sockets.
#[derive(Debug, Clone, Default)]
pub struct SocketGauge {
    live: Arc<AtomicUsize>,
}

impl SocketGauge {
    /// Creates a gauge reading zero.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sockets currently held.
    #[inline]
    #[must_use]
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Wraps `stream` and counts it until dropped.
    #[must_use]
    pub fn track(&self, stream: TcpStream) -> TrackedStream {
        self.live.fetch_add(1, Ordering::AcqRel);
        TrackedStream {
            inner: stream,
            _lease: Lease {
                live: Arc::clone(&self.live),
            },
        }
    }
}

/// Decrements the gauge on drop.
#[derive(Debug)]
struct Lease {
    live: Arc<AtomicUsize>,
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::AcqRel);
    }
}

// ============================================================================
// TrackedStream
// ============================================================================

/// A TCP stream counted by a [`SocketGauge`].
#[derive(Debug)]
pub struct TrackedStream {
    inner: TcpStream,
    _lease: Lease,
}

impl AsyncRead for TrackedStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for TrackedStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

// ============================================================================
// Tests
// ============================================================================
