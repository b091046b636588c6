//! Request/reply correlation.
//!
//! [`Multiplexer::call`] is the only way a request reaches the wire. Each
//! call gets a fresh [`RequestId`], a slot in the correlation table, and a
//! deadline. The stream consumer hands every reply to
//! [`Multiplexer::fulfill`], which completes exactly the slot whose id
//! matches.
//!
//! # Ordering
//!
//! The slot is inserted before the frame is sent, so a reply can never
//! arrive for an id the table does not know yet. Removal happens under the
//! same lock as lookup, so a slot is resolved at most once: by the reply,
//! by its deadline, or by [`Multiplexer::shutdown`].

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::oneshot;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, trace, warn};

use crate::error::{CallError, millis};
use crate::identifiers::{IdAllocator, RequestId};
use crate::protocol::{Method, Request, Response};
use crate::transport::FrameWriter;

// ============================================================================
// Constants
// ============================================================================

/// Default limit on calls waiting for a reply.
pub const DEFAULT_MAX_PENDING: usize = 100;

/// Deadline used when `now + timeout` does not fit in an [`Instant`].
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

// ============================================================================
// Types
// ============================================================================

/// A call waiting for its reply.
struct Pending {
    deadline: Instant,
    tx: oneshot::Sender<Response>,
}

/// Correlation table.
#[derive(Default)]
struct Table {
    slots: FxHashMap<RequestId, Pending>,
    closed: bool,
}

// ============================================================================
// Multiplexer
// ============================================================================

/// Correlates requests with replies over one channel.
pub struct Multiplexer {
    writer: Arc<dyn FrameWriter>,
    ids: IdAllocator,
    table: Mutex<Table>,
    max_pending: usize,
}

impl Multiplexer {
    /// Creates a multiplexer writing through `writer`.
    #[must_use]
    pub fn new(writer: Arc<dyn FrameWriter>, max_pending: usize) -> Self {
        Self::with_ids(writer, max_pending, IdAllocator::new())
    }

    /// Creates a multiplexer drawing ids from `ids`.
    #[must_use]
    pub fn with_ids(writer: Arc<dyn FrameWriter>, max_pending: usize, ids: IdAllocator) -> Self {
        Self {
            writer,
            ids,
            table: Mutex::new(Table::default()),
            max_pending,
        }
    }

    /// Sends `method` and waits up to `timeout` for the matching reply.
    ///
    /// An error reply from the exchange is still a reply: it is returned as
    /// `Ok(response)` for the caller to inspect.
    ///
    /// # Errors
    ///
    /// - [`CallError::IdentifierSpaceExhausted`] if no id is left
    /// - [`CallError::SerializationFailed`] if `method` does not serialize
    /// - [`CallError::TooManyPending`] past the configured limit
    /// - [`CallError::ChannelClosed`] if the channel closed before a reply
    /// - [`CallError::TimedOut`] if the deadline passed first
    pub async fn call(&self, method: Method, timeout: Duration) -> Result<Response, CallError> {
        let id = self.ids.allocate()?;
        let name = method.name().to_string();
        let text = serde_json::to_string(&Request::new(id, method))
            .map_err(CallError::SerializationFailed)?;

        let now = Instant::now();
        let deadline = now
            .checked_add(timeout)
            .unwrap_or_else(|| now + FAR_FUTURE);
        let (tx, rx) = oneshot::channel();

        {
            let mut table = self.table.lock();
            if table.closed {
                return Err(CallError::ChannelClosed);
            }
            if table.slots.len() >= self.max_pending {
                warn!(
                    pending = table.slots.len(),
                    max = self.max_pending,
                    "Too many pending requests"
                );
                return Err(CallError::TooManyPending {
                    pending: table.slots.len(),
                    max: self.max_pending,
                });
            }
            table.slots.insert(id, Pending { deadline, tx });
        }

        // Removes the slot on every exit, including a dropped call future.
        let _slot = SlotGuard { table: &self.table, id };

        debug!(%id, method = %name, "Sending request");

        // One deadline for the send and the reply.
        let exchange = async {
            if let Err(e) = self.writer.send_text(text).await {
                debug!(%id, error = %e, "Request not sent");
                return Err(CallError::ChannelClosed);
            }
            rx.await.map_err(|_| CallError::ChannelClosed)
        };

        match timeout_at(deadline, exchange).await {
            Ok(Ok(response)) => {
                trace!(%id, "Reply received");
                Ok(response)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                let timeout_ms = millis(timeout);
                debug!(%id, method = %name, timeout_ms, "Request timed out");
                Err(CallError::TimedOut {
                    request_id: id,
                    timeout_ms,
                })
            }
        }
    }

    /// Completes the call waiting for `response.id`.
    ///
    /// Returns `false` for a reply nobody waits for any more (late reply
    /// after timeout, or an unknown id). Such replies are dropped.
    pub fn fulfill(&self, response: Response) -> bool {
        let id = response.id;
        let Some(pending) = self.table.lock().slots.remove(&id) else {
            debug!(%id, "Dropping uncorrelated reply");
            return false;
        };

        if Instant::now() > pending.deadline {
            trace!(%id, "Reply arrived after deadline");
        }

        // The caller may have stopped waiting; that is not an error here.
        pending.tx.send(response).is_ok()
    }

    /// Fails every pending call with [`CallError::ChannelClosed`].
    ///
    /// Calls started afterwards fail immediately.
    pub fn shutdown(&self) {
        let drained: Vec<(RequestId, Pending)> = {
            let mut table = self.table.lock();
            table.closed = true;
            table.slots.drain().collect()
        };

        if !drained.is_empty() {
            debug!(count = drained.len(), "Failing pending requests");
        }
        // Dropping each sender resolves its receiver with ChannelClosed.
        drop(drained);
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) ran.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.table.lock().closed
    }

    /// Number of calls waiting for a reply.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.table.lock().slots.len()
    }
}

/// Removes one slot from the table when dropped.
struct SlotGuard<'a> {
    table: &'a Mutex<Table>,
    id: RequestId,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.table.lock().slots.remove(&self.id);
    }
}

// ============================================================================
// Tests
// ============================================================================
