//! High-level client.
//!
//! [`Client`] opens the channel, starts the session and exposes the
//! exchange API as typed async methods.
//!
//! # Example
//!
//! ```no_run
//! use deribit_session::{Client, ClientConfig, Credentials, OrderParams};
//!
//! # async fn example() -> deribit_session::Result<()> {
//! let client = Client::connect(ClientConfig::testnet()).await?;
//! client.authenticate(&Credentials::from_env()?).await?;
//!
//! let order = client.buy(OrderParams::limit("BTC-PERPETUAL", 10.0, 50_000.0)).await?;
//! println!("{order}");
//!
//! client.close().await;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{ClientConfig, Credentials};
use crate::error::{CallError, Error, Result};
use crate::protocol::{AuthParams, Method, OrderParams, Response};
use crate::session::{Handler, Session};
use crate::transport::{ChannelState, FrameSource, FrameWriter, Ready, TransportChannel};

// ============================================================================
// AuthToken
// ============================================================================

/// Result of `public/auth`.
#[derive(Clone, Deserialize)]
pub struct AuthToken {
    /// Bearer token for this connection.
    pub access_token: String,
    /// Token for [`Client::refresh`].
    pub refresh_token: String,
    /// Lifetime of `access_token` in seconds.
    pub expires_in: u64,
    /// Granted scopes.
    #[serde(default)]
    pub scope: String,
    /// Usually `bearer`.
    #[serde(default)]
    pub token_type: String,
}

impl AuthToken {
    /// Decodes the result of `public/auth`.
    ///
    /// # Errors
    ///
    /// [`Error::Protocol`] if `result` is not a token.
    pub fn from_result(result: &Value) -> Result<Self> {
        Self::deserialize(result)
            .map_err(|e| Error::protocol(format!("unexpected auth result: {e}")))
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish()
    }
}

// ============================================================================
// Client
// ============================================================================

/// A connected, multiplexed session with the exchange.
///
/// # Thread Safety
///
/// `Client` is `Send + Sync`. Calls from many tasks share the connection;
/// each waits only for its own reply.
pub struct Client {
    channel: Arc<TransportChannel>,
    session: Session,
    ready: Ready,
    call_timeout: Duration,
}

impl Client {
    /// Opens the channel and starts the session.
    ///
    /// # Errors
    ///
    /// [`Error::Connect`] with the failing handshake stage.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let channel = Arc::new(TransportChannel::new(
            config.endpoint,
            config.tls,
            config.connect_timeout,
        ));

        let ready = channel.open().await?;

        let session = Session::start(
            Arc::clone(&channel) as Arc<dyn FrameWriter>,
            Arc::clone(&channel) as Arc<dyn FrameSource>,
            config.max_pending,
            config.admin_timeout,
            config.error_sink,
        );

        info!(peer = %ready.peer, "Client connected");

        Ok(Self {
            channel,
            session,
            ready,
            call_timeout: config.call_timeout,
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Handshake outcome.
    #[inline]
    #[must_use]
    pub fn ready(&self) -> Ready {
        self.ready
    }

    /// Channel state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.channel.state()
    }

    /// Sockets held by the channel.
    #[inline]
    #[must_use]
    pub fn live_sockets(&self) -> usize {
        self.channel.live_sockets()
    }

    /// Returns `true` after a successful [`authenticate`](Self::authenticate).
    #[inline]
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.session.is_authenticated()
    }

    /// Calls waiting for a reply.
    #[inline]
    #[must_use]
    pub fn pending_calls(&self) -> usize {
        self.session.mux().pending_count()
    }

    /// Active subscription channels.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        self.session.registry().active_channels()
    }

    // ========================================================================
    // Calls
    // ========================================================================

    /// Sends `method` and returns the raw reply.
    ///
    /// An error reply is returned as a reply; see [`Response::into_result`].
    ///
    /// # Errors
    ///
    /// [`Error::Call`] if no reply arrived.
    pub async fn call(&self, method: Method, timeout: Duration) -> Result<Response> {
        Ok(self.session.mux().call(method, timeout).await?)
    }

    /// Calls with the configured timeout and unwraps the result.
    async fn request(&self, method: Method) -> Result<Value> {
        self.call(method, self.call_timeout).await?.into_result()
    }

    /// Authenticates with the client credentials grant.
    ///
    /// Later subscriptions use the `private/*` methods.
    ///
    /// # Errors
    ///
    /// - [`Error::Rpc`] if the exchange rejects the credentials
    /// - [`Error::Protocol`] if the result is not a token
    pub async fn authenticate(&self, credentials: &Credentials) -> Result<AuthToken> {
        debug!(client_id = %credentials.client_id, "Authenticating");

        let result = self
            .request(Method::Auth(AuthParams::ClientCredentials {
                client_id: credentials.client_id.clone(),
                client_secret: credentials.client_secret.clone(),
            }))
            .await?;

        let token = AuthToken::from_result(&result)?;
        self.session.set_authenticated(true);
        info!(expires_in = token.expires_in, scope = %token.scope, "Authenticated");

        Ok(token)
    }

    /// Exchanges a refresh token for a new token pair.
    ///
    /// # Errors
    ///
    /// - [`Error::Rpc`] if the exchange rejects the token
    /// - [`Error::Protocol`] if the result is not a token
    pub async fn refresh(&self, token: &AuthToken) -> Result<AuthToken> {
        let result = self
            .request(Method::Auth(AuthParams::RefreshToken {
                refresh_token: token.refresh_token.clone(),
            }))
            .await?;

        let token = AuthToken::from_result(&result)?;
        self.session.set_authenticated(true);
        debug!(expires_in = token.expires_in, "Token refreshed");

        Ok(token)
    }

    /// Places a buy order.
    pub async fn buy(&self, order: OrderParams) -> Result<Value> {
        self.request(Method::Buy(order)).await
    }

    /// Places a sell order.
    pub async fn sell(&self, order: OrderParams) -> Result<Value> {
        self.request(Method::Sell(order)).await
    }

    /// Cancels one order.
    pub async fn cancel(&self, order_id: impl Into<String>) -> Result<Value> {
        self.request(Method::Cancel {
            order_id: order_id.into(),
        })
        .await
    }

    /// Cancels every open order.
    pub async fn cancel_all(&self) -> Result<Value> {
        self.request(Method::CancelAll).await
    }

    /// Changes price and amount of an open order.
    pub async fn edit(&self, order_id: impl Into<String>, amount: f64, price: f64) -> Result<Value> {
        self.request(Method::Edit {
            order_id: order_id.into(),
            amount,
            price,
        })
        .await
    }

    /// Fetches the order book, `depth` levels per side.
    ///
    /// Decode with [`BookSummary::from_value`](crate::book::BookSummary::from_value).
    pub async fn get_order_book(&self, instrument: impl Into<String>, depth: u32) -> Result<Value> {
        self.request(Method::GetOrderBook {
            instrument_name: instrument.into(),
            depth: Some(depth),
        })
        .await
    }

    /// Fetches the position in one instrument.
    pub async fn get_position(&self, instrument: impl Into<String>) -> Result<Value> {
        self.request(Method::GetPosition {
            instrument_name: instrument.into(),
        })
        .await
    }

    /// Fetches all positions in `currency`.
    pub async fn get_positions(&self, currency: impl Into<String>) -> Result<Value> {
        self.request(Method::GetPositions {
            currency: currency.into(),
            kind: None,
        })
        .await
    }

    /// Asks the exchange for heartbeats every `interval`.
    ///
    /// `test_request` heartbeats are answered automatically.
    pub async fn enable_heartbeat(&self, interval: Duration) -> Result<Value> {
        self.request(Method::SetHeartbeat {
            interval: interval.as_secs(),
        })
        .await
    }

    /// Liveness probe.
    pub async fn test(&self) -> Result<Value> {
        self.request(Method::Test).await
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// Subscribes `channel`. Idempotent.
    ///
    /// # Errors
    ///
    /// Any call or RPC error; no subscription is left behind.
    pub async fn subscribe(&self, channel: &str, handler: Handler) -> Result<()> {
        self.session
            .registry()
            .subscribe(channel, handler, self.is_authenticated())
            .await
    }

    /// Unsubscribes `channel`. Pushes stop before the request is sent.
    ///
    /// # Errors
    ///
    /// Any call or RPC error.
    pub async fn unsubscribe(&self, channel: &str) -> Result<()> {
        self.session
            .registry()
            .unsubscribe(channel, self.is_authenticated())
            .await
    }

    /// Subscribes, delivers pushes until `stop` fires, then unsubscribes.
    ///
    /// # Errors
    ///
    /// - Any subscribe or unsubscribe error
    /// - [`CallError::ChannelClosed`] if the connection ended first
    pub async fn stream(&self, channel: &str, handler: Handler, stop: CancellationToken) -> Result<()> {
        self.subscribe(channel, handler).await?;
        info!(channel, "Streaming");

        let exited = self.session.exited();
        tokio::select! {
            () = stop.cancelled() => {
                debug!(channel, "Stream stop requested");
                self.unsubscribe(channel).await
            }
            () = exited.cancelled() => {
                debug!(channel, "Connection ended while streaming");
                Err(Error::Call(CallError::ChannelClosed))
            }
        }
    }

    // ========================================================================
    // Close
    // ========================================================================

    /// Stops the consumer, fails pending calls and closes the channel.
    /// Idempotent.
    pub async fn close(&self) {
        self.session.stop().await;
        self.channel.close().await;
        debug!(live = self.channel.live_sockets(), "Client closed");
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("channel", &self.channel)
            .field("ready", &self.ready)
            .field("authenticated", &self.is_authenticated())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
