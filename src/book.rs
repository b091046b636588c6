//! Order book payload decoding.
//!
//! Typed views over `book.*` subscription pushes and `public/get_order_book`
//! results. Nothing here keeps book state between updates.
//!
//! # Level formats
//!
//! | Source | Shape | Example |
//! |--------|-------|---------|
//! | Raw change stream | `[action, price, amount]` | `["change", 64210.5, 1200]` |
//! | Grouped stream / snapshot | `[price, amount]` | `[64210.5, 1200]` |
//! | Deleted grouped level | `["delete", amount]` | `["delete", 0]` |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde_json::Value;
use tracing::{trace, warn};

use crate::error::{Error, Result};
use crate::session::Handler;

// ============================================================================
// Level
// ============================================================================

/// What a level update does to the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelAction {
    /// A new price level.
    New,
    /// New amount for an existing level.
    Change,
    /// The level is gone.
    Delete,
    /// Absolute amount, no action given.
    Set,
}

/// One price level.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(try_from = "RawLevel")]
pub struct Level {
    /// Update action.
    pub action: LevelAction,
    /// Price, absent when a grouped level is deleted.
    pub price: Option<f64>,
    /// Amount at this price.
    pub amount: f64,
}

impl Level {
    /// Returns `true` if this level was removed.
    #[inline]
    #[must_use]
    pub fn is_delete(&self) -> bool {
        self.action == LevelAction::Delete
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.price {
            Some(price) => write!(f, "{price} x {}", self.amount)?,
            None => write!(f, "- x {}", self.amount)?,
        }
        if self.is_delete() {
            f.write_str(" (deleted)")?;
        }
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawLevel {
    Action(String, f64, f64),
    Tagged(String, f64),
    Grouped(f64, f64),
}

impl TryFrom<RawLevel> for Level {
    type Error = String;

    fn try_from(raw: RawLevel) -> std::result::Result<Self, Self::Error> {
        let level = match raw {
            RawLevel::Action(action, price, amount) => Self {
                action: match action.as_str() {
                    "new" => LevelAction::New,
                    "change" => LevelAction::Change,
                    "delete" => LevelAction::Delete,
                    other => return Err(format!("unknown level action {other}")),
                },
                price: Some(price),
                amount,
            },
            RawLevel::Tagged(tag, amount) if tag == "delete" => Self {
                action: LevelAction::Delete,
                price: None,
                amount,
            },
            RawLevel::Tagged(tag, _) => return Err(format!("unknown level tag {tag}")),
            RawLevel::Grouped(price, amount) => Self {
                action: LevelAction::Set,
                price: Some(price),
                amount,
            },
        };
        Ok(level)
    }
}

// ============================================================================
// BookUpdate
// ============================================================================

/// A `book.*` subscription push.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BookUpdate {
    /// Instrument, e.g. `BTC-PERPETUAL`.
    pub instrument_name: String,
    /// Exchange timestamp in milliseconds.
    #[serde(default)]
    pub timestamp: u64,
    /// Identifier of this update.
    #[serde(default)]
    pub change_id: Option<u64>,
    /// Identifier of the previous update; absent on the snapshot.
    #[serde(default)]
    pub prev_change_id: Option<u64>,
    /// `snapshot` or `change` on raw streams.
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    /// Bid side levels.
    #[serde(default)]
    pub bids: Vec<Level>,
    /// Ask side levels.
    #[serde(default)]
    pub asks: Vec<Level>,
}

impl BookUpdate {
    /// Decodes the `data` of a book push.
    ///
    /// # Errors
    ///
    /// [`Error::Json`] if the payload is not a book update.
    pub fn from_value(data: &Value) -> Result<Self> {
        Self::deserialize(data).map_err(Error::from)
    }

    /// Number of deleted levels on both sides.
    #[must_use]
    pub fn deleted_count(&self) -> usize {
        self.bids
            .iter()
            .chain(&self.asks)
            .filter(|level| level.is_delete())
            .count()
    }
}

impl fmt::Display for BookUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} @ {}", self.instrument_name, self.timestamp)?;
        for level in &self.bids {
            writeln!(f, "  bid {level}")?;
        }
        for level in &self.asks {
            writeln!(f, "  ask {level}")?;
        }
        Ok(())
    }
}

/// Wraps a typed callback as a subscription [`Handler`].
///
/// Payloads that do not decode are logged and skipped.
#[must_use]
pub fn book_handler<F>(f: F) -> Handler
where
    F: Fn(BookUpdate) + Send + Sync + 'static,
{
    Box::new(move |data| match BookUpdate::from_value(data) {
        Ok(update) => {
            trace!(
                instrument = %update.instrument_name,
                change_id = ?update.change_id,
                deleted = update.deleted_count(),
                "Book update"
            );
            f(update);
        }
        Err(e) => warn!(error = %e, "Undecodable book update"),
    })
}

// ============================================================================
// BookSummary
// ============================================================================

/// Result of `public/get_order_book`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BookSummary {
    /// Instrument, e.g. `BTC-PERPETUAL`.
    pub instrument_name: String,
    /// Exchange timestamp in milliseconds.
    #[serde(default)]
    pub timestamp: u64,
    /// Identifier of the book state.
    #[serde(default)]
    pub change_id: Option<u64>,
    /// Bids, best first.
    #[serde(default)]
    pub bids: Vec<Level>,
    /// Asks, best first.
    #[serde(default)]
    pub asks: Vec<Level>,
    /// Best bid price.
    #[serde(default)]
    pub best_bid_price: Option<f64>,
    /// Best ask price.
    #[serde(default)]
    pub best_ask_price: Option<f64>,
    /// Mark price.
    #[serde(default)]
    pub mark_price: Option<f64>,
    /// Index price.
    #[serde(default)]
    pub index_price: Option<f64>,
}

impl BookSummary {
    /// Decodes a `public/get_order_book` result.
    ///
    /// # Errors
    ///
    /// [`Error::Json`] if the result is not an order book.
    pub fn from_value(result: &Value) -> Result<Self> {
        Self::deserialize(result).map_err(Error::from)
    }

    /// Up to `n` best bids.
    #[must_use]
    pub fn top_bids(&self, n: usize) -> &[Level] {
        &self.bids[..n.min(self.bids.len())]
    }

    /// Up to `n` best asks.
    #[must_use]
    pub fn top_asks(&self, n: usize) -> &[Level] {
        &self.asks[..n.min(self.asks.len())]
    }

    /// Best ask minus best bid.
    #[must_use]
    pub fn spread(&self) -> Option<f64> {
        Some(self.best_ask_price? - self.best_bid_price?)
    }
}

// ============================================================================
// Tests
// ============================================================================
