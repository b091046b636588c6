//! Request and Response records.
//!
//! Defines the JSON-RPC envelope for correlated calls between the client
//! and the exchange.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::RequestId;

use super::Method;

/// JSON-RPC protocol version sent with every request.
const JSONRPC_VERSION: &str = "2.0";

// ============================================================================
// Request
// ============================================================================

/// A correlated call from client to exchange.
///
/// # Format
///
/// ```json
/// {
///   "jsonrpc": "2.0",
///   "id": 42,
///   "method": "private/buy",
///   "params": { "instrument_name": "BTC-PERPETUAL", "amount": 10 }
/// }
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    /// Always `"2.0"`.
    pub jsonrpc: &'static str,

    /// Correlation identifier echoed by the reply.
    pub id: RequestId,

    /// Method with params.
    #[serde(flatten)]
    pub method: Method,
}

impl Request {
    /// Creates a request with a specific ID.
    #[inline]
    #[must_use]
    pub fn new(id: RequestId, method: Method) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method,
        }
    }
}

// ============================================================================
// Response
// ============================================================================

/// A reply from exchange to client.
///
/// # Format
///
/// Success:
/// ```json
/// { "jsonrpc": "2.0", "id": 42, "result": { ... }, "usIn": 1, "usOut": 2, "usDiff": 1 }
/// ```
///
/// Error:
/// ```json
/// { "jsonrpc": "2.0", "id": 42, "error": { "code": 10009, "message": "not_enough_funds" } }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    /// Matches the request `id`.
    pub id: RequestId,

    /// Result data (if success).
    #[serde(default)]
    pub result: Option<Value>,

    /// Error object (if error).
    #[serde(default)]
    pub error: Option<RpcError>,

    /// Server receive time in microseconds.
    #[serde(default, rename = "usIn")]
    pub us_in: Option<u64>,

    /// Server send time in microseconds.
    #[serde(default, rename = "usOut")]
    pub us_out: Option<u64>,

    /// Server processing time in microseconds.
    #[serde(default, rename = "usDiff")]
    pub us_diff: Option<u64>,

    /// Whether the reply came from the test environment.
    #[serde(default)]
    pub testnet: Option<bool>,
}

impl Response {
    /// Extracts the result value, returning error if response was error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Rpc`] if the exchange answered with an error.
    pub fn into_result(self) -> Result<Value> {
        match self.error {
            Some(error) => Err(Error::rpc(error.code, error.message)),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

// ============================================================================
// RpcError
// ============================================================================

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RpcError {
    /// Error code.
    pub code: i64,
    /// Error message.
    pub message: String,
    /// Additional error data.
    #[serde(default)]
    pub data: Option<Value>,
}

// ============================================================================
// Tests
// ============================================================================
