//! The transport channel.
//!
//! Owns the single WebSocket connection of a client. Everything else talks
//! to the exchange through [`TransportChannel::send`] and
//! [`TransportChannel::receive`].
//!
//! # Locking
//!
//! | Part | Lock | Held by |
//! |------|------|---------|
//! | Write half | `tokio::sync::Mutex` | any caller of `send`, one at a time |
//! | Read half | `tokio::sync::Mutex` | the stream consumer |
//! | Lifetime token | `parking_lot::Mutex` | never across `.await` |
//!
//! The lifetime token is replaced on every `open()` and cancelled by
//! `close()` or by a transport fault, which wakes a pending `receive()`.

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::{ConnectError, Error, ReceiveError, Result, SendError, TransportError};
use crate::protocol::Frame;

use super::gauge::SocketGauge;
use super::handshake::{Established, Handshake, WsStream};
use super::state::ChannelState;
use super::{Endpoint, TlsMode};

// ============================================================================
// Constants
// ============================================================================

/// Default bound on the whole handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on delivering the normal-closure frame.
const CLOSE_FRAME_TIMEOUT: Duration = Duration::from_secs(1);

// ============================================================================
// Types
// ============================================================================

type Writer = SplitSink<WsStream, Message>;
type Reader = SplitStream<WsStream>;

/// Result of a successful [`TransportChannel::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ready {
    /// Remote address of the socket.
    pub peer: SocketAddr,
    /// Whether the encryption stage negotiated TLS.
    pub encrypted: bool,
}

// ============================================================================
// TransportChannel
// ============================================================================

/// A framed, optionally encrypted connection to one endpoint.
///
/// # Thread Safety
///
/// `TransportChannel` is `Send + Sync`. Share it behind an `Arc`; `send`
/// may be called from many tasks while one task sits in `receive`.
pub struct TransportChannel {
    endpoint: Endpoint,
    tls: TlsMode,
    connect_timeout: Duration,
    state: watch::Sender<ChannelState>,
    writer: AsyncMutex<Option<Writer>>,
    reader: AsyncMutex<Option<Reader>>,
    lifetime: Mutex<CancellationToken>,
    gauge: SocketGauge,
}

impl TransportChannel {
    /// Creates an unconnected channel.
    #[must_use]
    pub fn new(endpoint: Endpoint, tls: TlsMode, connect_timeout: Duration) -> Self {
        Self {
            endpoint,
            tls,
            connect_timeout,
            state: watch::Sender::new(ChannelState::Unconnected),
            writer: AsyncMutex::new(None),
            reader: AsyncMutex::new(None),
            lifetime: Mutex::new(CancellationToken::new()),
            gauge: SocketGauge::new(),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Current lifecycle state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Receiver observing every state transition.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    /// Sockets currently held by this channel.
    #[inline]
    #[must_use]
    pub fn live_sockets(&self) -> usize {
        self.gauge.live()
    }

    /// Endpoint this channel connects to.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    // ========================================================================
    // Open
    // ========================================================================

    /// Runs the handshake and makes the channel `Open`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] unless the channel is `Unconnected` or
    ///   `Closed` (double open, concurrent open)
    /// - [`Error::Connect`] with the failing stage; the channel is `Closed`
    pub async fn open(&self) -> Result<Ready> {
        let abort = {
            let mut lifetime = self.lifetime.lock();

            let mut observed = ChannelState::Unconnected;
            let started = self.state.send_if_modified(|state| {
                observed = *state;
                if state.can_open() {
                    *state = ChannelState::Resolving;
                    true
                } else {
                    false
                }
            });

            if !started {
                return Err(Error::invalid_state("open", observed));
            }

            *lifetime = CancellationToken::new();
            lifetime.clone()
        };

        info!(endpoint = %self.endpoint, tls = ?self.tls, "Opening channel");

        let Established { stream, peer } =
            Handshake::new(&self.endpoint, &self.tls, &self.state, &self.gauge)
                .run(self.connect_timeout, &abort)
                .await?;

        let (sink, source) = stream.split();
        *self.writer.lock().await = Some(sink);
        *self.reader.lock().await = Some(source);

        let opened = self.state.send_if_modified(|state| {
            if *state == ChannelState::FrameHandshaking {
                *state = ChannelState::Open;
                true
            } else {
                false
            }
        });

        if !opened {
            // close() moved us to Closing while the halves were installed.
            self.release().await;
            self.state.send_replace(ChannelState::Closed);
            return Err(ConnectError::Aborted.into());
        }

        let encrypted = self.tls.is_encrypted();
        info!(%peer, encrypted, "Channel open");

        Ok(Ready { peer, encrypted })
    }

    // ========================================================================
    // Send / Receive
    // ========================================================================

    /// Writes one text frame.
    ///
    /// Concurrent callers are serialized; frames are never interleaved.
    ///
    /// # Errors
    ///
    /// - [`TransportError::NotConnected`] unless `Open`
    /// - [`TransportError::Closed`] if `close()` ran while the write waited
    /// - [`TransportError::Io`] on a write fault; the channel is `Closed`
    pub async fn send(&self, text: String) -> std::result::Result<(), SendError> {
        let state = self.state();
        if state != ChannelState::Open {
            return Err(TransportError::NotConnected { state });
        }

        // A write stalled on backpressure gives way to close().
        let lifetime = self.lifetime.lock().clone();
        tokio::select! {
            biased;

            () = lifetime.cancelled() => {
                debug!("Send abandoned, channel closing");
                Err(TransportError::Closed)
            }

            sent = self.write_text(text) => sent,
        }
    }

    async fn write_text(&self, text: String) -> std::result::Result<(), SendError> {
        let mut writer = self.writer.lock().await;
        let Some(sink) = writer.as_mut() else {
            return Err(TransportError::NotConnected {
                state: self.state(),
            });
        };

        trace!(len = text.len(), "Sending frame");

        if let Err(e) = sink.send(Message::Text(text.into())).await {
            warn!(error = %e, "Send failed, closing channel");
            writer.take();
            drop(writer);
            self.fault();
            return Err(TransportError::io(e.to_string()));
        }

        Ok(())
    }

    /// Waits for the next complete frame.
    ///
    /// Ping and pong control frames are handled transparently. Cancel-safe:
    /// dropping the future loses no frame.
    ///
    /// # Errors
    ///
    /// - [`TransportError::NotConnected`] if no connection is held
    /// - [`TransportError::Closed`] when the peer or `close()` ends the
    ///   connection
    /// - [`TransportError::Io`] on a read fault
    ///
    /// The channel is `Closed` after either of the last two.
    pub async fn receive(&self) -> std::result::Result<Frame, ReceiveError> {
        let lifetime = self.lifetime.lock().clone();
        let mut reader = self.reader.lock().await;

        let Some(source) = reader.as_mut() else {
            return Err(TransportError::NotConnected {
                state: self.state(),
            });
        };

        let error = loop {
            let message = tokio::select! {
                biased;

                () = lifetime.cancelled() => break TransportError::Closed,

                message = source.next() => message,
            };

            match message {
                Some(Ok(Message::Text(text))) => {
                    trace!(len = text.len(), "Received frame");
                    return Ok(Frame::parse(text.as_str()));
                }
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => return Ok(Frame::parse(text)),
                    Err(_) => {
                        warn!(len = bytes.len(), "Dropping non-UTF-8 binary frame");
                    }
                },
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "Peer closed connection");
                    break TransportError::Closed;
                }
                None => {
                    debug!("Stream ended");
                    break TransportError::Closed;
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Receive failed");
                    break TransportError::io(e.to_string());
                }
            }
        };

        reader.take();
        drop(reader);
        self.fault();

        Err(error)
    }

    // ========================================================================
    // Close
    // ========================================================================

    /// Closes the channel. Idempotent.
    ///
    /// From `Open` a normal-closure frame is sent first. During a handshake
    /// the handshake is aborted and this waits until it has unwound. Every
    /// path ends with the connection released and the state `Closed`.
    pub async fn close(&self) {
        let mut prior = ChannelState::Closed;
        self.state.send_if_modified(|state| {
            prior = *state;
            if *state == ChannelState::Open || state.is_handshaking() {
                *state = ChannelState::Closing;
                true
            } else {
                false
            }
        });

        match prior {
            ChannelState::Unconnected | ChannelState::Closed => {
                debug!(state = %prior, "Close ignored");
                return;
            }
            ChannelState::Open => {
                info!(endpoint = %self.endpoint, "Closing channel");
                self.lifetime.lock().cancel();
                self.send_close_frame().await;
                self.release().await;
                self.state.send_replace(ChannelState::Closed);
            }
            _ => {
                debug!(state = %prior, "Close waiting for handshake to unwind");
                self.lifetime.lock().cancel();
                let mut watcher = self.state.subscribe();
                let _ = watcher.wait_for(|s| *s == ChannelState::Closed).await;
                self.release().await;
            }
        }

        debug!(live = self.live_sockets(), "Channel closed");
    }

    async fn send_close_frame(&self) {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "client closing".into(),
        };

        // Bounds the wait for the writer as well as the write.
        let sent = tokio::time::timeout(CLOSE_FRAME_TIMEOUT, async {
            let mut writer = self.writer.lock().await;
            match writer.as_mut() {
                Some(sink) => sink.send(Message::Close(Some(frame))).await,
                None => Ok(()),
            }
        })
        .await;

        match sent {
            Ok(Ok(())) => trace!("Close frame sent"),
            Ok(Err(e)) => debug!(error = %e, "Close frame not delivered"),
            Err(_) => debug!("Close frame timed out"),
        }
    }

    /// Drops both halves, which drops the socket.
    async fn release(&self) {
        self.writer.lock().await.take();
        self.reader.lock().await.take();
    }

    /// Transport fault: `Open → Closed` and wake the reader.
    fn fault(&self) {
        let faulted = self.state.send_if_modified(|state| {
            if *state == ChannelState::Open {
                *state = ChannelState::Closed;
                true
            } else {
                false
            }
        });

        if faulted {
            debug!("Channel faulted");
        }
        self.lifetime.lock().cancel();
    }
}

impl std::fmt::Debug for TransportChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportChannel")
            .field("endpoint", &self.endpoint)
            .field("tls", &self.tls)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
