//! Client configuration.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use deribit_session::ClientConfig;
//!
//! # fn example() -> deribit_session::Result<()> {
//! let config = ClientConfig::builder()
//!     .url("wss://test.deribit.com/ws/api/v2")
//!     .call_timeout(Duration::from_secs(5))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::session::{DEFAULT_MAX_PENDING, ErrorSink, tracing_sink};
use crate::transport::{DEFAULT_CONNECT_TIMEOUT, Endpoint, TlsMode};

// ============================================================================
// Constants
// ============================================================================

/// Default bound on trading and query calls.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound on subscribe, unsubscribe and heartbeat answers.
pub const DEFAULT_ADMIN_TIMEOUT: Duration = Duration::from_secs(3);

/// Environment variable holding the API client id.
pub const CLIENT_ID_VAR: &str = "DERIBIT_CLIENT_ID";

/// Environment variable holding the API client secret.
pub const CLIENT_SECRET_VAR: &str = "DERIBIT_CLIENT_SECRET";

// ============================================================================
// ClientConfig
// ============================================================================

/// Settings for [`Client::connect`](crate::Client::connect).
#[derive(Clone)]
pub struct ClientConfig {
    /// Exchange endpoint.
    pub endpoint: Endpoint,
    /// Encryption stage settings.
    pub tls: TlsMode,
    /// Bound on the whole handshake.
    pub connect_timeout: Duration,
    /// Bound on trading and query calls.
    pub call_timeout: Duration,
    /// Bound on subscribe, unsubscribe and heartbeat answers.
    pub admin_timeout: Duration,
    /// Limit on calls waiting for a reply.
    pub max_pending: usize,
    /// Receives errors no caller is waiting for.
    pub error_sink: ErrorSink,
}

impl ClientConfig {
    /// Creates a builder with default settings.
    #[inline]
    #[must_use]
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Testnet with default settings.
    #[must_use]
    pub fn testnet() -> Self {
        Self {
            endpoint: Endpoint::testnet(),
            tls: TlsMode::Verified,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            admin_timeout: DEFAULT_ADMIN_TIMEOUT,
            max_pending: DEFAULT_MAX_PENDING,
            error_sink: tracing_sink(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::testnet()
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("endpoint", &self.endpoint)
            .field("tls", &self.tls)
            .field("connect_timeout", &self.connect_timeout)
            .field("call_timeout", &self.call_timeout)
            .field("admin_timeout", &self.admin_timeout)
            .field("max_pending", &self.max_pending)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// ClientConfigBuilder
// ============================================================================

/// Builder for [`ClientConfig`].
#[derive(Default)]
pub struct ClientConfigBuilder {
    endpoint: Option<Endpoint>,
    url: Option<String>,
    tls: Option<TlsMode>,
    connect_timeout: Option<Duration>,
    call_timeout: Option<Duration>,
    admin_timeout: Option<Duration>,
    max_pending: Option<usize>,
    error_sink: Option<ErrorSink>,
}

impl ClientConfigBuilder {
    /// Creates a builder with no settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Connects to `endpoint`.
    #[inline]
    #[must_use]
    pub fn endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = Some(endpoint);
        self.url = None;
        self
    }

    /// Connects to a `wss://` or `ws://` URL.
    ///
    /// The scheme picks the TLS mode unless [`tls`](Self::tls) overrides it.
    #[inline]
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self.endpoint = None;
        self
    }

    /// Uses the Deribit test environment.
    #[inline]
    #[must_use]
    pub fn testnet(self) -> Self {
        self.endpoint(Endpoint::testnet())
    }

    /// Uses the Deribit production environment.
    #[inline]
    #[must_use]
    pub fn mainnet(self) -> Self {
        self.endpoint(Endpoint::mainnet())
    }

    /// Sets the encryption stage settings.
    #[inline]
    #[must_use]
    pub fn tls(mut self, tls: TlsMode) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Bounds the whole handshake.
    #[inline]
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Bounds trading and query calls.
    #[inline]
    #[must_use]
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Bounds subscribe, unsubscribe and heartbeat answers.
    #[inline]
    #[must_use]
    pub fn admin_timeout(mut self, timeout: Duration) -> Self {
        self.admin_timeout = Some(timeout);
        self
    }

    /// Limits calls waiting for a reply.
    #[inline]
    #[must_use]
    pub fn max_pending(mut self, max: usize) -> Self {
        self.max_pending = Some(max);
        self
    }

    /// Routes unsolicited errors to `sink` instead of the log.
    #[inline]
    #[must_use]
    pub fn error_sink(mut self, sink: ErrorSink) -> Self {
        self.error_sink = Some(sink);
        self
    }

    /// Builds the configuration with validation.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the URL does not parse
    /// - [`Error::Config`] if a timeout or the pending limit is zero
    pub fn build(self) -> Result<ClientConfig> {
        let defaults = ClientConfig::testnet();

        let (endpoint, implied_tls) = match (self.endpoint, self.url) {
            (_, Some(url)) => Endpoint::parse(&url)?,
            (Some(endpoint), None) => (endpoint, TlsMode::Verified),
            (None, None) => (defaults.endpoint, TlsMode::Verified),
        };

        let config = ClientConfig {
            endpoint,
            tls: self.tls.unwrap_or(implied_tls),
            connect_timeout: self.connect_timeout.unwrap_or(defaults.connect_timeout),
            call_timeout: self.call_timeout.unwrap_or(defaults.call_timeout),
            admin_timeout: self.admin_timeout.unwrap_or(defaults.admin_timeout),
            max_pending: self.max_pending.unwrap_or(defaults.max_pending),
            error_sink: self.error_sink.unwrap_or(defaults.error_sink),
        };

        Self::validate(&config)?;
        Ok(config)
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ClientConfigBuilder {
    fn validate(config: &ClientConfig) -> Result<()> {
        for (name, value) in [
            ("connect_timeout", config.connect_timeout),
            ("call_timeout", config.call_timeout),
            ("admin_timeout", config.admin_timeout),
        ] {
            if value.is_zero() {
                return Err(Error::config(format!("{name} must be greater than zero")));
            }
        }

        if config.max_pending == 0 {
            return Err(Error::config("max_pending must be at least 1"));
        }

        Ok(())
    }
}

// ============================================================================
// Credentials
// ============================================================================

/// API key pair for `public/auth`.
///
/// Never printed: `Debug` redacts the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// API client id.
    pub client_id: String,
    /// API client secret.
    pub client_secret: String,
}

impl Credentials {
    /// Creates credentials.
    #[inline]
    #[must_use]
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Reads `DERIBIT_CLIENT_ID` and `DERIBIT_CLIENT_SECRET`.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] naming the first variable that is unset or empty.
    pub fn from_env() -> Result<Self> {
        let read = |var: &str| {
            std::env::var(var)
                .ok()
                .filter(|v| !v.is_empty())
                .ok_or_else(|| Error::config(format!("{var} is not set")))
        };

        Ok(Self::new(read(CLIENT_ID_VAR)?, read(CLIENT_SECRET_VAR)?))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::builder().build().expect("defaults");
        assert_eq!(config.endpoint, Endpoint::testnet());
        assert!(config.tls.is_encrypted());
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.call_timeout, Duration::from_secs(5));
        assert_eq!(config.admin_timeout, Duration::from_secs(3));
        assert_eq!(config.max_pending, 100);
    }

    #[test]
    fn test_url_implies_tls_mode() {
        let config = ClientConfig::builder()
            .url("ws://127.0.0.1:9000/ws")
            .build()
            .expect("build");
        assert_eq!(config.endpoint.port(), 9000);
        assert!(!config.tls.is_encrypted());
    }

    #[test]
    fn test_explicit_tls_overrides_scheme() {
        let config = ClientConfig::builder()
            .url("ws://localhost:9443/ws")
            .tls(TlsMode::Verified)
            .build()
            .expect("build");
        assert!(config.tls.is_encrypted());
    }

    #[test]
    fn test_bad_url_is_config_error() {
        let err = ClientConfig::builder()
            .url("ftp://test.deribit.com")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = ClientConfig::builder()
            .call_timeout(Duration::ZERO)
            .build()
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Configuration error: call_timeout must be greater than zero"
        );
    }

    #[test]
    fn test_zero_max_pending_rejected() {
        let err = ClientConfig::builder().max_pending(0).build().unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_credentials_debug_redacts_secret() {
        let credentials = Credentials::new("abc", "super-secret");
        let debug = format!("{credentials:?}");
        assert!(debug.contains("abc"));
        assert!(!debug.contains("super-secret"));
    }
}
