//! Connection endpoint and TLS settings.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Deribit test environment host.
pub const TESTNET_HOST: &str = "test.deribit.com";

/// Deribit production host.
pub const MAINNET_HOST: &str = "www.deribit.com";

/// WebSocket API path on both environments.
pub const API_PATH: &str = "/ws/api/v2";

// ============================================================================
// Endpoint
// ============================================================================

/// Where the channel connects to.
///
/// Immutable after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
    path: String,
}

impl Endpoint {
    /// Creates an endpoint.
    ///
    /// A missing leading `/` on `path` is added.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, path: impl Into<String>) -> Self {
        let path = path.into();
        let path = if path.starts_with('/') {
            path
        } else {
            format!("/{path}")
        };

        Self {
            host: host.into(),
            port,
            path,
        }
    }

    /// Deribit test environment.
    #[must_use]
    pub fn testnet() -> Self {
        Self::new(TESTNET_HOST, 443, API_PATH)
    }

    /// Deribit production environment.
    #[must_use]
    pub fn mainnet() -> Self {
        Self::new(MAINNET_HOST, 443, API_PATH)
    }

    /// Parses a `wss://` or `ws://` URL.
    ///
    /// Returns the endpoint and the TLS mode the scheme implies.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if the URL is malformed, has no host, or uses
    /// another scheme.
    pub fn parse(url: &str) -> Result<(Self, TlsMode)> {
        let parsed = Url::parse(url).map_err(|e| Error::config(format!("invalid URL {url}: {e}")))?;

        let tls = match parsed.scheme() {
            "wss" => TlsMode::Verified,
            "ws" => TlsMode::Disabled,
            other => {
                return Err(Error::config(format!(
                    "unsupported scheme {other}, expected ws or wss"
                )));
            }
        };

        let host = parsed
            .host_str()
            .ok_or_else(|| Error::config(format!("URL has no host: {url}")))?;
        let port = parsed
            .port_or_known_default()
            .ok_or_else(|| Error::config(format!("URL has no port: {url}")))?;

        Ok((Self::new(host, port, parsed.path()), tls))
    }

    /// Host name.
    #[inline]
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port.
    #[inline]
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Request path.
    #[inline]
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// URI sent in the WebSocket upgrade request.
    ///
    /// The port is omitted when it is the scheme default.
    #[must_use]
    pub fn ws_url(&self, encrypted: bool) -> String {
        let (scheme, default_port) = if encrypted { ("wss", 443) } else { ("ws", 80) };
        if self.port == default_port {
            format!("{scheme}://{}{}", self.host, self.path)
        } else {
            format!("{scheme}://{}:{}{}", self.host, self.port, self.path)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}{}", self.host, self.port, self.path)
    }
}

// ============================================================================
// TlsMode
// ============================================================================

/// How the encryption stage is performed.
#[derive(Clone, Default)]
pub enum TlsMode {
    /// TLS with the bundled webpki root store. Certificate checks are on.
    #[default]
    Verified,
    /// TLS with a caller-supplied rustls configuration.
    Custom(Arc<rustls::ClientConfig>),
    /// Plain TCP. The encryption stage passes straight through.
    Disabled,
}

impl TlsMode {
    /// Returns `true` unless TLS is disabled.
    #[inline]
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        !matches!(self, Self::Disabled)
    }
}

impl fmt::Debug for TlsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Verified => f.write_str("Verified"),
            Self::Custom(_) => f.write_str("Custom"),
            Self::Disabled => f.write_str("Disabled"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
