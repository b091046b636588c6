//! Connection bring-up.
//!
//! Four ordered stages run as one async pipeline:
//!
//! | Stage | State | Failure |
//! |-------|-------|---------|
//! | Name resolution | `Resolving` | [`ConnectError::ResolutionFailed`] |
//! | TCP connect | `TcpConnecting` | [`ConnectError::TcpFailed`] |
//! | TLS handshake | `EncryptHandshaking` | [`ConnectError::EncryptionFailed`] |
//! | WebSocket upgrade | `FrameHandshaking` | [`ConnectError::FramingFailed`] |
//!
//! The first failing stage ends the pipeline. Whatever was acquired so far
//! is owned by the pipeline future and released when it drops. The whole
//! pipeline is bounded by one connect timeout. Nothing is retried.

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rustls::ClientConfig;
use rustls::pki_types::ServerName;
use tokio::net::{TcpStream, lookup_host};
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, client_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ConnectError, millis};

use super::gauge::{SocketGauge, TrackedStream};
use super::state::ChannelState;
use super::tls::webpki_config;
use super::{Endpoint, TlsMode};

// ============================================================================
// Types
// ============================================================================

/// Fully negotiated stream.
pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TrackedStream>>;

/// Output of a successful bring-up.
pub(crate) struct Established {
    /// The framed stream.
    pub stream: WsStream,
    /// Address the socket connected to.
    pub peer: SocketAddr,
}

// ============================================================================
// Handshake
// ============================================================================

/// Drives one channel through its handshake stages.
///
/// Expects the channel to be in `Resolving` already; `open()` makes that
/// transition atomically so concurrent opens are rejected before any I/O.
pub(crate) struct Handshake<'a> {
    endpoint: &'a Endpoint,
    tls: &'a TlsMode,
    state: &'a watch::Sender<ChannelState>,
    gauge: &'a SocketGauge,
}

impl<'a> Handshake<'a> {
    pub(crate) fn new(
        endpoint: &'a Endpoint,
        tls: &'a TlsMode,
        state: &'a watch::Sender<ChannelState>,
        gauge: &'a SocketGauge,
    ) -> Self {
        Self {
            endpoint,
            tls,
            state,
            gauge,
        }
    }

    /// Runs all stages under `connect_timeout`.
    ///
    /// On any failure the channel state is `Closed` when this returns.
    pub(crate) async fn run(
        self,
        connect_timeout: Duration,
        abort: &CancellationToken,
    ) -> Result<Established, ConnectError> {
        let result = tokio::select! {
            biased;

            () = abort.cancelled() => Err(ConnectError::Aborted),

            staged = timeout(connect_timeout, self.stages()) => staged.unwrap_or_else(|_| {
                Err(ConnectError::Timeout {
                    timeout_ms: millis(connect_timeout),
                })
            }),
        };

        if let Err(ref e) = result {
            warn!(endpoint = %self.endpoint, error = %e, "Handshake failed");
            self.state.send_replace(ChannelState::Closed);
        }

        result
    }

    async fn stages(&self) -> Result<Established, ConnectError> {
        let addrs = self.resolve().await?;

        self.advance(ChannelState::Resolving)?;
        let (socket, peer) = self.connect(&addrs).await?;

        self.advance(ChannelState::TcpConnecting)?;
        let stream = self.encrypt(socket).await?;

        self.advance(ChannelState::EncryptHandshaking)?;
        let stream = self.upgrade(stream).await?;

        info!(endpoint = %self.endpoint, %peer, "Handshake completed");

        Ok(Established { stream, peer })
    }

    /// Moves `from` to its next stage, or fails if `close()` got there first.
    fn advance(&self, from: ChannelState) -> Result<(), ConnectError> {
        let Some(to) = from.next_stage() else {
            return Err(ConnectError::Aborted);
        };
        let advanced = self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        });

        if advanced {
            debug!(state = %to, "Channel state advanced");
            Ok(())
        } else {
            Err(ConnectError::Aborted)
        }
    }

    // ========================================================================
    // Stages
    // ========================================================================

    async fn resolve(&self) -> Result<Vec<SocketAddr>, ConnectError> {
        let host = self.endpoint.host();
        let failed = |message: String| ConnectError::ResolutionFailed {
            host: host.to_string(),
            message,
        };

        let addrs: Vec<SocketAddr> = lookup_host((host, self.endpoint.port()))
            .await
            .map_err(|e| failed(e.to_string()))?
            .collect();

        if addrs.is_empty() {
            return Err(failed("no addresses".to_string()));
        }

        debug!(host, count = addrs.len(), "Host resolved");
        Ok(addrs)
    }

    async fn connect(&self, addrs: &[SocketAddr]) -> Result<(TrackedStream, SocketAddr), ConnectError> {
        let mut last_error = String::from("no address attempted");

        for &addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(socket) => {
                    if let Err(e) = socket.set_nodelay(true) {
                        warn!(%addr, error = %e, "Failed to set TCP_NODELAY");
                    }
                    debug!(%addr, "TCP connected");
                    return Ok((self.gauge.track(socket), addr));
                }
                Err(e) => {
                    debug!(%addr, error = %e, "TCP connect attempt failed");
                    last_error = format!("{addr}: {e}");
                }
            }
        }

        Err(ConnectError::TcpFailed {
            message: last_error,
        })
    }

    async fn encrypt(
        &self,
        socket: TrackedStream,
    ) -> Result<MaybeTlsStream<TrackedStream>, ConnectError> {
        let config = match self.tls {
            TlsMode::Disabled => {
                debug!("TLS disabled, passing through");
                return Ok(MaybeTlsStream::Plain(socket));
            }
            TlsMode::Verified => webpki_config()?,
            TlsMode::Custom(config) => Arc::clone(config),
        };

        let stream = tls_connect(config, self.endpoint.host(), socket).await?;
        debug!("TLS established");
        Ok(MaybeTlsStream::Rustls(stream))
    }

    async fn upgrade(&self, stream: MaybeTlsStream<TrackedStream>) -> Result<WsStream, ConnectError> {
        let url = self.endpoint.ws_url(self.tls.is_encrypted());

        let (stream, response) =
            client_async(url, stream)
                .await
                .map_err(|e| ConnectError::FramingFailed {
                    message: e.to_string(),
                })?;

        debug!(status = %response.status(), "WebSocket upgrade accepted");
        Ok(stream)
    }
}

/// Client side TLS handshake with certificate verification.
async fn tls_connect(
    config: Arc<ClientConfig>,
    host: &str,
    socket: TrackedStream,
) -> Result<tokio_rustls::client::TlsStream<TrackedStream>, ConnectError> {
    let server_name =
        ServerName::try_from(host.to_string()).map_err(|e| ConnectError::EncryptionFailed {
            message: format!("invalid server name {host}: {e}"),
        })?;

    TlsConnector::from(config)
        .connect(server_name, socket)
        .await
        .map_err(|e| ConnectError::EncryptionFailed {
            message: e.to_string(),
        })
}

// ============================================================================
// Tests
// ============================================================================
