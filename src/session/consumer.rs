//! The stream consumer.
//!
//! One task per connection is the only reader of the channel. Each cycle it
//! either observes the stop token or takes one frame and routes it:
//!
//! | Frame | Destination |
//! |-------|-------------|
//! | Reply | [`Multiplexer::fulfill`] |
//! | `subscription` push | [`Registry::dispatch`] |
//! | `heartbeat` `test_request` | answered with `public/test` |
//! | Anything else | logged and dropped |
//!
//! A receive error ends the loop. It goes to the [`ErrorSink`] unless stop
//! was already requested, in which case it is expected shutdown noise.
//! However the loop ends, pending calls are failed and the `exited` token
//! fires.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::Error;
use crate::protocol::{Frame, HeartbeatKind, Method, NotificationKind};
use crate::transport::FrameSource;

use super::{Multiplexer, Registry};

// ============================================================================
// Types
// ============================================================================

/// Receives errors that no caller is waiting for.
pub type ErrorSink = Arc<dyn Fn(&Error) + Send + Sync>;

/// Sink that logs through `tracing`.
#[must_use]
pub fn tracing_sink() -> ErrorSink {
    Arc::new(|error: &Error| tracing::error!(error = %error, "Session error"))
}

// ============================================================================
// Consumer
// ============================================================================

/// Handle to the running consumer task.
pub struct Consumer {
    task: JoinHandle<()>,
    stop: CancellationToken,
    exited: CancellationToken,
}

impl Consumer {
    /// Spawns the consumer.
    ///
    /// `heartbeat_timeout` bounds the `public/test` answer to a heartbeat.
    pub fn spawn(
        source: Arc<dyn FrameSource>,
        mux: Arc<Multiplexer>,
        registry: Arc<Registry>,
        sink: ErrorSink,
        heartbeat_timeout: Duration,
    ) -> Self {
        let stop = CancellationToken::new();
        let exited = CancellationToken::new();

        let task = tokio::spawn(
            Loop {
                source,
                mux,
                registry,
                sink,
                heartbeat_timeout,
                stop: stop.clone(),
                exited: exited.clone(),
            }
            .run(),
        );

        Self { task, stop, exited }
    }

    /// Token cancelled when the consumer has exited.
    #[must_use]
    pub fn exited(&self) -> CancellationToken {
        self.exited.clone()
    }

    /// Returns `true` once the loop has ended.
    #[inline]
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.exited.is_cancelled()
    }

    /// Requests a stop and waits for the task to end.
    pub async fn stop(self) {
        self.stop.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Consumer task ended abnormally");
        }
    }
}

// ============================================================================
// Loop
// ============================================================================

struct Loop {
    source: Arc<dyn FrameSource>,
    mux: Arc<Multiplexer>,
    registry: Arc<Registry>,
    sink: ErrorSink,
    heartbeat_timeout: Duration,
    stop: CancellationToken,
    exited: CancellationToken,
}

impl Loop {
    async fn run(self) {
        debug!("Consumer started");
        let _exit = ExitGuard {
            mux: Arc::clone(&self.mux),
            exited: self.exited.clone(),
        };

        loop {
            let received = tokio::select! {
                biased;

                () = self.stop.cancelled() => {
                    debug!("Consumer stop requested");
                    break;
                }

                received = self.source.receive() => received,
            };

            match received {
                Ok(frame) => self.dispatch(frame),
                Err(e) => {
                    if self.stop.is_cancelled() {
                        debug!(error = %e, "Receive ended during shutdown");
                    } else {
                        (self.sink)(&Error::Transport(e));
                    }
                    break;
                }
            }
        }
    }

    fn dispatch(&self, frame: Frame) {
        match frame {
            Frame::Reply(response) => {
                trace!(id = %response.id, "Routing reply");
                self.mux.fulfill(response);
            }
            Frame::Notification(notification) => match notification.kind() {
                NotificationKind::Subscription { channel, data } => {
                    trace!(channel, "Routing push");
                    self.registry.dispatch(channel, data);
                }
                NotificationKind::Heartbeat(HeartbeatKind::TestRequest) => {
                    debug!("Answering heartbeat test request");
                    self.answer_heartbeat();
                }
                NotificationKind::Heartbeat(HeartbeatKind::Heartbeat) => {
                    trace!("Heartbeat");
                }
                NotificationKind::Unknown { method } => {
                    warn!(method, "Dropping unknown notification");
                }
            },
            Frame::Unparseable(text) => {
                warn!(len = text.len(), "Dropping unparseable frame");
            }
        }
    }

    /// The reply is routed back through this loop, so the answer must not
    /// be awaited here.
    fn answer_heartbeat(&self) {
        let mux = Arc::clone(&self.mux);
        let sink = Arc::clone(&self.sink);
        let timeout = self.heartbeat_timeout;

        tokio::spawn(async move {
            let outcome = match mux.call(Method::Test, timeout).await {
                Ok(response) => response.into_result().map(|_| ()),
                Err(e) => Err(e.into()),
            };
            if let Err(e) = outcome {
                if !e.is_connection_error() {
                    sink(&e);
                }
            }
        });
    }
}

/// Fails pending calls and fires `exited` however the loop ends, unwinding
/// from a panicking handler included.
struct ExitGuard {
    mux: Arc<Multiplexer>,
    exited: CancellationToken,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.mux.shutdown();
        self.exited.cancel();
        if std::thread::panicking() {
            warn!("Consumer exited on panic");
        } else {
            info!("Consumer exited");
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
    use parking_lot::Mutex;
    use serde_json::{Value, json};
    use tokio::sync::{Mutex as AsyncMutex, mpsc};

    use crate::error::{CallError, TransportError};
    use crate::session::multiplexer::tests::RecordingWriter;
    use crate::transport::FrameWriter;

    /// Source fed by the test through a channel.
    struct ScriptedSource(AsyncMutex<mpsc::UnboundedReceiver<Result<Frame, TransportError>>>);

    #[async_trait]
    impl FrameSource for ScriptedSource {
        async fn receive(&self) -> Result<Frame, TransportError> {
            self.0
                .lock()
                .await
                .recv()
                .await
                .unwrap_or(Err(TransportError::Closed))
        }
    }

    struct Harness {
        frames: mpsc::UnboundedSender<Result<Frame, TransportError>>,
        writer: Arc<RecordingWriter>,
        mux: Arc<Multiplexer>,
        registry: Arc<Registry>,
        errors: Arc<Mutex<Vec<String>>>,
        consumer: Consumer,
    }

    fn harness() -> Harness {
        let (frames, rx) = mpsc::unbounded_channel();
        let writer = Arc::new(RecordingWriter::default());
        let mux = Arc::new(Multiplexer::new(
            Arc::clone(&writer) as Arc<dyn FrameWriter>,
            100,
        ));
        let registry = Arc::new(Registry::new(Arc::clone(&mux), Duration::from_secs(3)));
        let errors = Arc::new(Mutex::new(Vec::new()));

        let sink: ErrorSink = {
            let errors = Arc::clone(&errors);
            Arc::new(move |e: &Error| errors.lock().push(e.to_string()))
        };

        let consumer = Consumer::spawn(
            Arc::new(ScriptedSource(AsyncMutex::new(rx))),
            Arc::clone(&mux),
            Arc::clone(&registry),
            sink,
            Duration::from_secs(3),
        );

        Harness {
            frames,
            writer,
            mux,
            registry,
            errors,
            consumer,
        }
    }

    fn frame(value: Value) -> Result<Frame, TransportError> {
        Ok(Frame::parse(&value.to_string()))
    }

    #[tokio::test]
    async fn test_routes_reply_to_waiting_call() {
        let h = harness();

        let call = {
            let mux = Arc::clone(&h.mux);
            tokio::spawn(async move { mux.call(Method::Test, Duration::from_secs(5)).await })
        };
        while h.writer.ids().is_empty() {
            tokio::task::yield_now().await;
        }
        let id = h.writer.ids()[0];

        h.frames
            .send(frame(json!({"jsonrpc": "2.0", "id": id.get(), "result": {"version": "1"}})))
            .expect("send");

        let response = call.await.expect("join").expect("reply");
        assert_eq!(response.id, id);
        h.consumer.stop().await;
    }

    #[tokio::test]
    async fn test_routes_push_and_drops_unknown() {
        let h = harness();
        let count = Arc::new(AtomicUsize::new(0));

        let subscribe = {
            let registry = Arc::clone(&h.registry);
            let count = Arc::clone(&count);
            tokio::spawn(async move {
                let handler: crate::session::Handler = Box::new(move |_| {
                    count.fetch_add(1, Ordering::SeqCst);
                });
                registry.subscribe("book.BTC-PERPETUAL.100ms", handler, false).await
            })
        };
        while h.writer.ids().is_empty() {
            tokio::task::yield_now().await;
        }
        let id = h.writer.ids()[0];
        h.frames
            .send(frame(json!({"jsonrpc": "2.0", "id": id.get(), "result": ["book.BTC-PERPETUAL.100ms"]})))
            .expect("send");
        subscribe.await.expect("join").expect("subscribe");

        let push = |channel: &str| {
            frame(json!({
                "jsonrpc": "2.0",
                "method": "subscription",
                "params": {"channel": channel, "data": {"change_id": 1}},
            }))
        };
        h.frames.send(push("book.BTC-PERPETUAL.100ms")).expect("send");
        h.frames.send(push("book.ETH-PERPETUAL.100ms")).expect("send");
        h.frames.send(Ok(Frame::Unparseable("garbage".into()))).expect("send");

        // A call used as a barrier: once its reply is routed, so is the rest.
        let barrier = {
            let mux = Arc::clone(&h.mux);
            tokio::spawn(async move { mux.call(Method::Test, Duration::from_secs(5)).await })
        };
        while h.writer.ids().len() < 2 {
            tokio::task::yield_now().await;
        }
        let id = h.writer.ids()[1];
        h.frames
            .send(frame(json!({"jsonrpc": "2.0", "id": id.get(), "result": null})))
            .expect("send");
        barrier.await.expect("join").expect("barrier");

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(h.errors.lock().is_empty());
        h.consumer.stop().await;
    }

    #[tokio::test]
    async fn test_answers_heartbeat_test_request() {
        let h = harness();

        h.frames
            .send(frame(json!({
                "jsonrpc": "2.0",
                "method": "heartbeat",
                "params": {"type": "test_request"},
            })))
            .expect("send");

        while h.writer.methods().is_empty() {
            tokio::task::yield_now().await;
        }
        assert_eq!(h.writer.methods(), vec!["public/test"]);
        h.consumer.stop().await;
    }

    #[tokio::test]
    async fn test_receive_error_goes_to_sink_and_fails_pending() {
        let h = harness();

        let call = {
            let mux = Arc::clone(&h.mux);
            tokio::spawn(async move { mux.call(Method::Test, Duration::from_secs(30)).await })
        };
        while h.writer.ids().is_empty() {
            tokio::task::yield_now().await;
        }

        h.frames
            .send(Err(TransportError::io("connection reset")))
            .expect("send");

        let exited = h.consumer.exited();
        exited.cancelled().await;

        assert!(matches!(
            call.await.expect("join"),
            Err(CallError::ChannelClosed)
        ));
        assert_eq!(
            *h.errors.lock(),
            vec!["Transport I/O error: connection reset".to_string()]
        );
        assert!(h.consumer.is_finished());
        h.consumer.stop().await;
    }

    #[tokio::test]
    async fn test_panicking_handler_still_shuts_down() {
        let h = harness();

        let subscribe = {
            let registry = Arc::clone(&h.registry);
            tokio::spawn(async move {
                let handler: crate::session::Handler = Box::new(|_| panic!("handler bug"));
                registry.subscribe("book.BTC-PERPETUAL.100ms", handler, false).await
            })
        };
        while h.writer.ids().is_empty() {
            tokio::task::yield_now().await;
        }
        let id = h.writer.ids()[0];
        h.frames
            .send(frame(json!({"jsonrpc": "2.0", "id": id.get(), "result": ["book.BTC-PERPETUAL.100ms"]})))
            .expect("send");
        subscribe.await.expect("join").expect("subscribe");

        let call = {
            let mux = Arc::clone(&h.mux);
            tokio::spawn(async move { mux.call(Method::Test, Duration::from_secs(30)).await })
        };
        while h.writer.ids().len() < 2 {
            tokio::task::yield_now().await;
        }

        h.frames
            .send(frame(json!({
                "jsonrpc": "2.0",
                "method": "subscription",
                "params": {"channel": "book.BTC-PERPETUAL.100ms", "data": {}},
            })))
            .expect("send");

        let exited = h.consumer.exited();
        tokio::time::timeout(Duration::from_secs(5), exited.cancelled())
            .await
            .expect("exited fired");

        assert!(h.mux.is_shut_down());
        assert!(matches!(
            call.await.expect("join"),
            Err(CallError::ChannelClosed)
        ));
        h.consumer.stop().await;
    }

    #[tokio::test]
    async fn test_stop_is_silent() {
        let h = harness();
        let exited = h.consumer.exited();

        h.consumer.stop().await;

        assert!(exited.is_cancelled());
        assert!(h.errors.lock().is_empty());
        assert!(h.mux.is_shut_down());
        assert_eq!(h.mux.pending_count(), 0);
    }
}
