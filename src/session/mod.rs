//! Session layer over one open channel.
//!
//! # Architecture
//!
//! ```text
//!  caller ──call()──► Multiplexer ──send──► TransportChannel
//!    ▲                    ▲                        │
//!    │ reply              │ fulfill                │ receive
//!    │                    │                        ▼
//!    └──────────────── Consumer (one task) ◄───────┘
//!                         │ dispatch
//!                         ▼
//!                      Registry ──► handlers
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `multiplexer` | Correlation ids, deadlines, reply matching |
//! | `registry` | Channel subscriptions and handlers |
//! | `consumer` | The single reader task |

// ============================================================================
// Submodules
// ============================================================================

/// The stream consumer task.
pub mod consumer;

/// Request/reply correlation.
pub mod multiplexer;

/// Subscription registry.
pub mod registry;

// ============================================================================
// Re-exports
// ============================================================================

pub use consumer::{Consumer, ErrorSink, tracing_sink};
pub use multiplexer::{DEFAULT_MAX_PENDING, Multiplexer};
pub use registry::{Handler, Registry};

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::transport::{FrameSource, FrameWriter};

// ============================================================================
// Session
// ============================================================================

/// Multiplexer, registry and consumer of one connection.
pub struct Session {
    mux: Arc<Multiplexer>,
    registry: Arc<Registry>,
    consumer: Mutex<Option<Consumer>>,
    exited: CancellationToken,
    authenticated: AtomicBool,
}

impl Session {
    /// Starts a session over `writer` and `source`.
    ///
    /// `admin_timeout` bounds subscribe, unsubscribe and heartbeat answers.
    pub fn start(
        writer: Arc<dyn FrameWriter>,
        source: Arc<dyn FrameSource>,
        max_pending: usize,
        admin_timeout: Duration,
        sink: ErrorSink,
    ) -> Self {
        let mux = Arc::new(Multiplexer::new(writer, max_pending));
        let registry = Arc::new(Registry::new(Arc::clone(&mux), admin_timeout));
        let consumer = Consumer::spawn(
            source,
            Arc::clone(&mux),
            Arc::clone(&registry),
            sink,
            admin_timeout,
        );
        let exited = consumer.exited();

        Self {
            mux,
            registry,
            consumer: Mutex::new(Some(consumer)),
            exited,
            authenticated: AtomicBool::new(false),
        }
    }

    /// The multiplexer.
    #[inline]
    #[must_use]
    pub fn mux(&self) -> &Arc<Multiplexer> {
        &self.mux
    }

    /// The subscription registry.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Token cancelled when the consumer has exited.
    #[must_use]
    pub fn exited(&self) -> CancellationToken {
        self.exited.clone()
    }

    /// Returns `true` after a successful `public/auth`.
    #[inline]
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    pub(crate) fn set_authenticated(&self, authenticated: bool) {
        self.authenticated.store(authenticated, Ordering::Release);
    }

    /// Stops the consumer and waits for it. Idempotent.
    ///
    /// Pending calls fail with `ChannelClosed` once this returns.
    pub async fn stop(&self) {
        let consumer = self.consumer.lock().await.take();
        if let Some(consumer) = consumer {
            debug!("Stopping session");
            consumer.stop().await;
        }
        self.mux.shutdown();
    }
}
