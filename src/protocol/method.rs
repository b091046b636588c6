//! API method catalogue.
//!
//! Each variant serializes to the `method`/`params` pair of a JSON-RPC
//! request. Method names follow Deribit's `scope/name` format.
//!
//! | Scope | Methods |
//! |-------|---------|
//! | `public` | `auth`, `get_order_book`, `subscribe`, `unsubscribe`, `set_heartbeat`, `disable_heartbeat`, `test` |
//! | `private` | `buy`, `sell`, `edit`, `cancel`, `cancel_all`, `get_position`, `get_positions`, `subscribe`, `unsubscribe` |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::Serialize;
use serde_json::Value;

// ============================================================================
// Method
// ============================================================================

/// A JSON-RPC method with its parameters.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "method", content = "params")]
pub enum Method {
    /// Authenticate the connection.
    #[serde(rename = "public/auth")]
    Auth(AuthParams),

    /// Place a buy order.
    #[serde(rename = "private/buy")]
    Buy(OrderParams),

    /// Place a sell order.
    #[serde(rename = "private/sell")]
    Sell(OrderParams),

    /// Change price and amount of an open order.
    #[serde(rename = "private/edit")]
    Edit {
        /// Exchange order ID.
        order_id: String,
        /// New amount.
        amount: f64,
        /// New price.
        price: f64,
    },

    /// Cancel one order.
    #[serde(rename = "private/cancel")]
    Cancel {
        /// Exchange order ID.
        order_id: String,
    },

    /// Cancel every open order.
    #[serde(rename = "private/cancel_all")]
    CancelAll,

    /// Fetch an order book snapshot.
    #[serde(rename = "public/get_order_book")]
    GetOrderBook {
        /// Instrument, e.g. `BTC-PERPETUAL`.
        instrument_name: String,
        /// Levels per side.
        #[serde(skip_serializing_if = "Option::is_none")]
        depth: Option<u32>,
    },

    /// Fetch the position for one instrument.
    #[serde(rename = "private/get_position")]
    GetPosition {
        /// Instrument, e.g. `BTC-PERPETUAL`.
        instrument_name: String,
    },

    /// Fetch all positions for a currency.
    #[serde(rename = "private/get_positions")]
    GetPositions {
        /// Currency, e.g. `BTC`.
        currency: String,
        /// Instrument kind filter (`future`, `option`, ...).
        #[serde(skip_serializing_if = "Option::is_none")]
        kind: Option<String>,
    },

    /// Subscribe to public channels.
    #[serde(rename = "public/subscribe")]
    PublicSubscribe {
        /// Channel names.
        channels: Vec<String>,
    },

    /// Unsubscribe from public channels.
    #[serde(rename = "public/unsubscribe")]
    PublicUnsubscribe {
        /// Channel names.
        channels: Vec<String>,
    },

    /// Subscribe to channels on an authenticated connection.
    #[serde(rename = "private/subscribe")]
    PrivateSubscribe {
        /// Channel names.
        channels: Vec<String>,
    },

    /// Unsubscribe on an authenticated connection.
    #[serde(rename = "private/unsubscribe")]
    PrivateUnsubscribe {
        /// Channel names.
        channels: Vec<String>,
    },

    /// Ask the exchange to send heartbeats.
    #[serde(rename = "public/set_heartbeat")]
    SetHeartbeat {
        /// Interval in seconds (minimum 10).
        interval: u64,
    },

    /// Stop heartbeats.
    #[serde(rename = "public/disable_heartbeat")]
    DisableHeartbeat,

    /// Liveness probe, also the answer to a heartbeat `test_request`.
    #[serde(rename = "public/test")]
    Test,

    /// Any other method, params passed through untouched.
    #[serde(untagged)]
    Raw {
        /// Method name.
        method: String,
        /// Opaque params.
        params: Value,
    },
}

impl Method {
    /// Creates a raw method call.
    #[inline]
    #[must_use]
    pub fn raw(method: impl Into<String>, params: Value) -> Self {
        Self::Raw {
            method: method.into(),
            params,
        }
    }

    /// Returns the wire method name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Auth(_) => "public/auth",
            Self::Buy(_) => "private/buy",
            Self::Sell(_) => "private/sell",
            Self::Edit { .. } => "private/edit",
            Self::Cancel { .. } => "private/cancel",
            Self::CancelAll => "private/cancel_all",
            Self::GetOrderBook { .. } => "public/get_order_book",
            Self::GetPosition { .. } => "private/get_position",
            Self::GetPositions { .. } => "private/get_positions",
            Self::PublicSubscribe { .. } => "public/subscribe",
            Self::PublicUnsubscribe { .. } => "public/unsubscribe",
            Self::PrivateSubscribe { .. } => "private/subscribe",
            Self::PrivateUnsubscribe { .. } => "private/unsubscribe",
            Self::SetHeartbeat { .. } => "public/set_heartbeat",
            Self::DisableHeartbeat => "public/disable_heartbeat",
            Self::Test => "public/test",
            Self::Raw { method, .. } => method,
        }
    }

    /// Subscribe request for `channel`, private when `authenticated`.
    #[must_use]
    pub fn subscribe(channel: impl Into<String>, authenticated: bool) -> Self {
        let channels = vec![channel.into()];
        if authenticated {
            Self::PrivateSubscribe { channels }
        } else {
            Self::PublicSubscribe { channels }
        }
    }

    /// Unsubscribe request for `channel`, private when `authenticated`.
    #[must_use]
    pub fn unsubscribe(channel: impl Into<String>, authenticated: bool) -> Self {
        let channels = vec![channel.into()];
        if authenticated {
            Self::PrivateUnsubscribe { channels }
        } else {
            Self::PublicUnsubscribe { channels }
        }
    }
}

// ============================================================================
// AuthParams
// ============================================================================

/// Parameters of `public/auth`.
#[derive(Clone, Serialize)]
#[serde(tag = "grant_type", rename_all = "snake_case")]
pub enum AuthParams {
    /// API key and secret.
    ClientCredentials {
        /// API client ID.
        client_id: String,
        /// API client secret.
        client_secret: String,
    },
    /// Renew a session with a refresh token.
    RefreshToken {
        /// Refresh token from a previous auth.
        refresh_token: String,
    },
}

impl fmt::Debug for AuthParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientCredentials { client_id, .. } => f
                .debug_struct("ClientCredentials")
                .field("client_id", client_id)
                .field("client_secret", &"<redacted>")
                .finish(),
            Self::RefreshToken { .. } => f
                .debug_struct("RefreshToken")
                .field("refresh_token", &"<redacted>")
                .finish(),
        }
    }
}

// ============================================================================
// OrderParams
// ============================================================================

/// Order type for `private/buy` and `private/sell`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    /// Limit order (requires a price).
    Limit,
    /// Market order.
    Market,
}

/// Parameters of `private/buy` and `private/sell`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderParams {
    /// Instrument, e.g. `BTC-PERPETUAL`.
    pub instrument_name: String,
    /// Order amount.
    pub amount: f64,
    /// Limit price.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    /// Order type.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub order_type: Option<OrderType>,
    /// User label echoed in order updates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Reject instead of crossing the book.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_only: Option<bool>,
}

impl OrderParams {
    /// Creates a limit order.
    #[must_use]
    pub fn limit(instrument_name: impl Into<String>, amount: f64, price: f64) -> Self {
        Self {
            instrument_name: instrument_name.into(),
            amount,
            price: Some(price),
            order_type: Some(OrderType::Limit),
            label: None,
            post_only: None,
        }
    }

    /// Creates a market order.
    #[must_use]
    pub fn market(instrument_name: impl Into<String>, amount: f64) -> Self {
        Self {
            instrument_name: instrument_name.into(),
            amount,
            price: None,
            order_type: Some(OrderType::Market),
            label: None,
            post_only: None,
        }
    }

    /// Sets the order label.
    #[inline]
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Sets the post-only flag.
    #[inline]
    #[must_use]
    pub fn with_post_only(mut self, post_only: bool) -> Self {
        self.post_only = Some(post_only);
        self
    }
}

// ============================================================================
// Tests
// ============================================================================
