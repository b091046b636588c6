//! Subscription registry.
//!
//! Tracks which channels are subscribed and which handler receives their
//! pushes. Entries are keyed by channel name.
//!
//! # Entry lifecycle
//!
//! | Status | Meaning | Pushes |
//! |--------|---------|--------|
//! | `Pending` | subscribe request sent, not yet confirmed | delivered |
//! | `Active` | confirmed by the exchange | delivered |
//! | `Inactive` | unsubscribed | dropped |
//!
//! # Races with the exchange
//!
//! - The handler is installed before the subscribe request is sent, so a
//!   push routed ahead of the confirmation is delivered. Only a confirmed
//!   entry counts as subscribed.
//! - A second subscribe for a pending channel waits for the first one. If
//!   that fails it sends its own request.
//! - A failed subscribe removes only the entry it inserted.
//! - Unsubscribe marks the entry inactive *before* sending the request.
//!   Pushes still in flight are dropped silently.
//!
//! Handlers run under the registry read lock. Deactivation takes the write
//! lock, so once `unsubscribe` has flipped the status no delivery for that
//! channel is running or will start. Handlers must therefore not call back
//! into the registry.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::protocol::Method;

use super::Multiplexer;

// ============================================================================
// Types
// ============================================================================

/// Receives the `data` payload of every push on one channel.
pub type Handler = Box<dyn Fn(&Value) + Send + Sync>;

enum Status {
    /// Fires `true` on confirmation; dropped unconfirmed on failure.
    Pending(watch::Sender<bool>),
    Active,
    Inactive,
}

struct Entry {
    status: Status,
    generation: u64,
    handler: Handler,
}

type Entries = RwLock<FxHashMap<String, Entry>>;

// ============================================================================
// Registry
// ============================================================================

/// Channel name to handler map.
pub struct Registry {
    mux: Arc<Multiplexer>,
    entries: Entries,
    generations: AtomicU64,
    timeout: Duration,
}

impl Registry {
    /// Creates an empty registry sending requests through `mux`.
    ///
    /// `timeout` bounds each subscribe and unsubscribe request.
    #[must_use]
    pub fn new(mux: Arc<Multiplexer>, timeout: Duration) -> Self {
        Self {
            mux,
            entries: RwLock::new(FxHashMap::default()),
            generations: AtomicU64::new(0),
            timeout,
        }
    }

    /// Subscribes `channel`, delivering pushes to `handler`.
    ///
    /// Already confirmed: returns `Ok(())` without a request and `handler`
    /// is dropped. A subscribe already in flight is joined rather than
    /// repeated. `authenticated` selects `private/subscribe` over
    /// `public/subscribe`.
    ///
    /// # Errors
    ///
    /// Any call or RPC error. No entry is left behind.
    pub async fn subscribe(
        &self,
        channel: &str,
        handler: Handler,
        authenticated: bool,
    ) -> Result<()> {
        let generation = loop {
            let mut confirmed = {
                let mut entries = self.entries.write();
                match entries.get(channel).map(|e| &e.status) {
                    Some(Status::Active) => {
                        debug!(channel, "Already subscribed");
                        return Ok(());
                    }
                    Some(Status::Pending(tx)) => tx.subscribe(),
                    Some(Status::Inactive) | None => {
                        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
                        let (tx, _) = watch::channel(false);
                        entries.insert(
                            channel.to_string(),
                            Entry {
                                status: Status::Pending(tx),
                                generation,
                                handler,
                            },
                        );
                        break generation;
                    }
                }
            };

            debug!(channel, "Waiting for subscribe in flight");
            if confirmed.wait_for(|ok| *ok).await.is_ok() {
                return Ok(());
            }
            trace!(channel, "Subscribe in flight failed, retrying");
        };

        // Rolls the entry back unless confirmed, also when this future is
        // dropped mid-request.
        let mut inflight = Inflight {
            entries: &self.entries,
            channel,
            generation,
            confirmed: false,
        };

        debug!(channel, authenticated, "Subscribing");

        let outcome = match self
            .mux
            .call(Method::subscribe(channel, authenticated), self.timeout)
            .await
        {
            Ok(response) => response.into_result(),
            Err(e) => Err(e.into()),
        };

        match outcome {
            Ok(confirmed) => {
                let listed = confirmed
                    .as_array()
                    .is_some_and(|list| list.iter().any(|c| c.as_str() == Some(channel)));
                if !listed {
                    warn!(channel, result = %confirmed, "Channel missing from subscribe confirmation");
                }
                inflight.confirm();
                Ok(())
            }
            Err(e) => {
                debug!(channel, error = %e, "Subscribe failed, rolling back");
                Err(e)
            }
        }
    }

    /// Unsubscribes `channel`.
    ///
    /// The entry stops receiving pushes before the request is sent.
    /// Unknown or inactive channels are a no-op.
    ///
    /// # Errors
    ///
    /// Any call or RPC error. The entry stays inactive either way.
    pub async fn unsubscribe(&self, channel: &str, authenticated: bool) -> Result<()> {
        {
            let mut entries = self.entries.write();
            match entries.get_mut(channel) {
                Some(entry) if !matches!(entry.status, Status::Inactive) => {
                    entry.status = Status::Inactive;
                }
                _ => {
                    debug!(channel, "Not subscribed");
                    return Ok(());
                }
            }
        }

        debug!(channel, authenticated, "Unsubscribing");

        self.mux
            .call(Method::unsubscribe(channel, authenticated), self.timeout)
            .await?
            .into_result()?;

        Ok(())
    }

    /// Delivers a push to the handler of `channel`.
    ///
    /// Returns `false` if the channel is unknown or inactive; the push is
    /// dropped.
    pub fn dispatch(&self, channel: &str, data: &Value) -> bool {
        let entries = self.entries.read();
        match entries.get(channel) {
            Some(entry) if !matches!(entry.status, Status::Inactive) => {
                (entry.handler)(data);
                true
            }
            Some(_) => {
                trace!(channel, "Dropping push for inactive channel");
                false
            }
            None => {
                trace!(channel, "Dropping push for unknown channel");
                false
            }
        }
    }

    /// Returns `true` if `channel` is subscribed and confirmed.
    #[must_use]
    pub fn is_active(&self, channel: &str) -> bool {
        self.entries
            .read()
            .get(channel)
            .is_some_and(|e| matches!(e.status, Status::Active))
    }

    /// Names of all confirmed channels.
    #[must_use]
    pub fn active_channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self
            .entries
            .read()
            .iter()
            .filter(|(_, e)| matches!(e.status, Status::Active))
            .map(|(name, _)| name.clone())
            .collect();
        channels.sort();
        channels
    }
}

/// One subscribe request in flight.
struct Inflight<'a> {
    entries: &'a Entries,
    channel: &'a str,
    generation: u64,
    confirmed: bool,
}

impl Inflight<'_> {
    /// Promotes the entry to `Active` and releases waiters.
    ///
    /// An entry unsubscribed meanwhile stays inactive.
    fn confirm(&mut self) {
        self.confirmed = true;
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(self.channel)
            && entry.generation == self.generation
            && let Status::Pending(tx) = &entry.status
        {
            tx.send_replace(true);
            entry.status = Status::Active;
        }
    }
}

impl Drop for Inflight<'_> {
    fn drop(&mut self) {
        if self.confirmed {
            return;
        }
        let mut entries = self.entries.write();
        if entries
            .get(self.channel)
            .is_some_and(|e| e.generation == self.generation)
        {
            // Drops the pending sender, which wakes waiters to retry.
            entries.remove(self.channel);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::mpsc;

    use crate::error::{Error, TransportError};
    use crate::identifiers::RequestId;
    use crate::session::multiplexer::tests::reply;
    use crate::transport::FrameWriter;

    /// Writer forwarding every request to the test body.
    struct ForwardingWriter(mpsc::UnboundedSender<Value>);

    #[async_trait]
    impl FrameWriter for ForwardingWriter {
        async fn send_text(&self, text: String) -> std::result::Result<(), TransportError> {
            let value = serde_json::from_str(&text).expect("valid json");
            self.0.send(value).map_err(|_| TransportError::Closed)
        }
    }

    fn setup() -> (Arc<Multiplexer>, Arc<Registry>, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mux = Arc::new(Multiplexer::new(Arc::new(ForwardingWriter(tx)), 100));
        let registry = Arc::new(Registry::new(Arc::clone(&mux), Duration::from_secs(3)));
        (mux, registry, rx)
    }

    fn id_of(request: &Value) -> RequestId {
        RequestId::new(request["id"].as_u64().expect("id"))
    }

    fn counting_handler(count: &Arc<AtomicUsize>) -> Handler {
        let count = Arc::clone(count);
        Box::new(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn test_subscribe_then_dispatch() {
        let (mux, registry, mut requests) = setup();
        let count = Arc::new(AtomicUsize::new(0));

        let task = {
            let registry = Arc::clone(&registry);
            let handler = counting_handler(&count);
            tokio::spawn(async move { registry.subscribe("book.BTC-PERPETUAL.100ms", handler, false).await })
        };

        let request = requests.recv().await.expect("subscribe request");
        assert_eq!(request["method"], "public/subscribe");
        assert_eq!(request["params"]["channels"], json!(["book.BTC-PERPETUAL.100ms"]));

        // A push racing the confirmation is delivered.
        assert!(registry.dispatch("book.BTC-PERPETUAL.100ms", &json!({})));

        mux.fulfill(reply(id_of(&request), json!(["book.BTC-PERPETUAL.100ms"])));
        task.await.expect("join").expect("subscribe");

        assert!(registry.dispatch("book.BTC-PERPETUAL.100ms", &json!({})));
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(registry.active_channels(), vec!["book.BTC-PERPETUAL.100ms"]);
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let (mux, registry, mut requests) = setup();
        let count = Arc::new(AtomicUsize::new(0));

        let task = {
            let registry = Arc::clone(&registry);
            let handler = counting_handler(&count);
            tokio::spawn(async move { registry.subscribe("trades.BTC-PERPETUAL.raw", handler, true).await })
        };
        let request = requests.recv().await.expect("subscribe request");
        assert_eq!(request["method"], "private/subscribe");
        mux.fulfill(reply(id_of(&request), json!(["trades.BTC-PERPETUAL.raw"])));
        task.await.expect("join").expect("subscribe");

        registry
            .subscribe("trades.BTC-PERPETUAL.raw", counting_handler(&count), true)
            .await
            .expect("second subscribe");

        assert!(requests.try_recv().is_err());
        registry.dispatch("trades.BTC-PERPETUAL.raw", &json!({}));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_subscribe_leaves_no_entry() {
        let (mux, registry, mut requests) = setup();
        let count = Arc::new(AtomicUsize::new(0));

        let task = {
            let registry = Arc::clone(&registry);
            let handler = counting_handler(&count);
            tokio::spawn(async move { registry.subscribe("book.NOPE.100ms", handler, false).await })
        };
        let request = requests.recv().await.expect("subscribe request");
        mux.fulfill(error_reply(&request, 10001, "invalid_channel"));

        let err = task.await.expect("join").unwrap_err();
        assert!(matches!(err, Error::Rpc { code: 10001, .. }));
        assert!(!registry.is_active("book.NOPE.100ms"));
        assert!(!registry.dispatch("book.NOPE.100ms", &json!({})));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    fn error_reply(request: &Value, code: i64, message: &str) -> crate::protocol::Response {
        serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": request["id"],
            "error": {"code": code, "message": message},
        }))
        .expect("error reply")
    }

    #[tokio::test]
    async fn test_concurrent_subscribe_joins_request_in_flight() {
        let (mux, registry, mut requests) = setup();
        let count = Arc::new(AtomicUsize::new(0));

        let subscribers: Vec<_> = (0..2)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let handler = counting_handler(&count);
                tokio::spawn(async move { registry.subscribe("book.Y.100ms", handler, false).await })
            })
            .collect();

        let request = requests.recv().await.expect("subscribe request");
        assert!(!registry.is_active("book.Y.100ms"));
        mux.fulfill(reply(id_of(&request), json!(["book.Y.100ms"])));

        for subscriber in subscribers {
            subscriber.await.expect("join").expect("subscribe");
        }
        assert!(requests.try_recv().is_err());
        assert!(registry.is_active("book.Y.100ms"));
    }

    #[tokio::test]
    async fn test_waiter_retries_after_failed_subscribe() {
        let (mux, registry, mut requests) = setup();
        let count = Arc::new(AtomicUsize::new(0));

        let first = {
            let registry = Arc::clone(&registry);
            let handler = counting_handler(&count);
            tokio::spawn(async move { registry.subscribe("book.Y.100ms", handler, false).await })
        };
        let request = requests.recv().await.expect("first request");

        let second = {
            let registry = Arc::clone(&registry);
            let handler = counting_handler(&count);
            tokio::spawn(async move { registry.subscribe("book.Y.100ms", handler, false).await })
        };
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(requests.try_recv().is_err());

        mux.fulfill(error_reply(&request, 10001, "invalid_channel"));
        assert!(first.await.expect("join").is_err());

        // The waiter sends its own request.
        let request = requests.recv().await.expect("second request");
        assert_eq!(request["method"], "public/subscribe");
        assert!(!registry.is_active("book.Y.100ms"));
        mux.fulfill(reply(id_of(&request), json!(["book.Y.100ms"])));

        second.await.expect("join").expect("subscribe");
        assert!(registry.is_active("book.Y.100ms"));
        assert!(registry.dispatch("book.Y.100ms", &json!({})));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_subscribe_keeps_newer_entry() {
        let (mux, registry, mut requests) = setup();
        let count = Arc::new(AtomicUsize::new(0));

        let first = {
            let registry = Arc::clone(&registry);
            let handler = counting_handler(&count);
            tokio::spawn(async move { registry.subscribe("book.Z.100ms", handler, false).await })
        };
        let first_request = requests.recv().await.expect("first subscribe");

        let unsubscribe = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.unsubscribe("book.Z.100ms", false).await })
        };
        let unsubscribe_request = requests.recv().await.expect("unsubscribe");
        assert_eq!(unsubscribe_request["method"], "public/unsubscribe");

        let second = {
            let registry = Arc::clone(&registry);
            let handler = counting_handler(&count);
            tokio::spawn(async move { registry.subscribe("book.Z.100ms", handler, false).await })
        };
        let second_request = requests.recv().await.expect("second subscribe");

        mux.fulfill(error_reply(&first_request, 10001, "invalid_channel"));
        assert!(first.await.expect("join").is_err());
        mux.fulfill(reply(id_of(&unsubscribe_request), json!(["book.Z.100ms"])));
        unsubscribe.await.expect("join").expect("unsubscribe");

        // Still pending under the second subscribe.
        assert!(registry.dispatch("book.Z.100ms", &json!({})));

        mux.fulfill(reply(id_of(&second_request), json!(["book.Z.100ms"])));
        second.await.expect("join").expect("subscribe");
        assert!(registry.is_active("book.Z.100ms"));
    }

    #[tokio::test]
    async fn test_unsubscribe_deactivates_before_request() {
        let (mux, registry, mut requests) = setup();
        let count = Arc::new(AtomicUsize::new(0));

        let task = {
            let registry = Arc::clone(&registry);
            let handler = counting_handler(&count);
            tokio::spawn(async move { registry.subscribe("book.ETH-PERPETUAL.100ms", handler, false).await })
        };
        let request = requests.recv().await.expect("subscribe request");
        mux.fulfill(reply(id_of(&request), json!(["book.ETH-PERPETUAL.100ms"])));
        task.await.expect("join").expect("subscribe");

        let task = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.unsubscribe("book.ETH-PERPETUAL.100ms", false).await })
        };
        let request = requests.recv().await.expect("unsubscribe request");
        assert_eq!(request["method"], "public/unsubscribe");

        // Unsubscribe request is out but unconfirmed: pushes are dropped.
        assert!(!registry.dispatch("book.ETH-PERPETUAL.100ms", &json!({})));

        mux.fulfill(reply(id_of(&request), json!(["book.ETH-PERPETUAL.100ms"])));
        task.await.expect("join").expect("unsubscribe");

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(registry.active_channels().is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_is_noop() {
        let (_mux, registry, mut requests) = setup();
        registry
            .unsubscribe("book.BTC-PERPETUAL.100ms", false)
            .await
            .expect("noop");
        assert!(requests.try_recv().is_err());
    }
}
