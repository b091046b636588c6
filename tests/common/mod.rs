//! Stub exchange for integration tests.
//!
//! A TLS WebSocket server on `localhost` with a freshly generated
//! self-signed certificate. Each accepted connection is handed to a test
//! script as a [`Peer`].

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rcgen::{CertifiedKey, generate_simple_self_signed};
use rustls::ServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::server::TlsStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};

use deribit_session::transport::tls::config_with_roots;
use deribit_session::{ClientConfig, Endpoint, TlsMode};

// ============================================================================
// Setup
// ============================================================================

/// Installs a test subscriber honouring `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Polls `condition` until it holds or `timeout` passes.
pub async fn eventually(timeout: Duration, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within {timeout:?}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// ============================================================================
// StubServer
// ============================================================================

pub struct StubServer {
    pub port: u16,
    pub certificate: CertificateDer<'static>,
    task: JoinHandle<()>,
}

impl StubServer {
    /// Starts the server; `script` runs once per accepted connection.
    pub async fn start<F, Fut>(script: F) -> Self
    where
        F: Fn(Peer) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let CertifiedKey { cert, key_pair } =
            generate_simple_self_signed(vec!["localhost".to_string()]).expect("certificate");
        let certificate = cert.der().clone();
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .expect("protocol versions")
            .with_no_client_auth()
            .with_single_cert(vec![certificate.clone()], key)
            .expect("server certificate");
        let acceptor = TlsAcceptor::from(Arc::new(config));

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let script = Arc::new(script);

        let task = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let acceptor = acceptor.clone();
                let script = Arc::clone(&script);
                tokio::spawn(async move {
                    // Untrusting clients abort here.
                    let Ok(tls) = acceptor.accept(socket).await else {
                        return;
                    };
                    let Ok(ws) = accept_async(tls).await else {
                        return;
                    };
                    script(Peer { ws }).await;
                });
            }
        });

        Self {
            port,
            certificate,
            task,
        }
    }

    /// Endpoint clients should connect to.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new("localhost", self.port, "/ws/api/v2")
    }

    /// TLS mode trusting this server's certificate.
    pub fn trusted_tls(&self) -> TlsMode {
        TlsMode::Custom(config_with_roots([self.certificate.clone()]).expect("client config"))
    }

    /// Client configuration trusting this server.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::builder()
            .endpoint(self.endpoint())
            .tls(self.trusted_tls())
            .build()
            .expect("config")
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ============================================================================
// Peer
// ============================================================================

/// Server side of one connection.
pub struct Peer {
    ws: WebSocketStream<TlsStream<TcpStream>>,
}

impl Peer {
    /// Next JSON-RPC request, or `None` once the client is gone.
    pub async fn next_request(&mut self) -> Option<Value> {
        while let Some(Ok(message)) = self.ws.next().await {
            match message {
                Message::Text(text) => {
                    return Some(serde_json::from_str(text.as_str()).expect("client sent JSON"));
                }
                Message::Close(_) => return None,
                _ => {}
            }
        }
        None
    }

    /// Next request, asserting its method.
    pub async fn expect_request(&mut self, method: &str) -> Value {
        let request = self.next_request().await.expect("request");
        assert_eq!(request["method"], method, "unexpected request {request}");
        request
    }

    pub async fn send(&mut self, value: Value) {
        self.ws
            .send(Message::Text(value.to_string().into()))
            .await
            .expect("stub send");
    }

    /// Success reply to `request`.
    pub async fn reply(&mut self, request: &Value, result: Value) {
        self.send(json!({
            "jsonrpc": "2.0",
            "id": request["id"],
            "result": result,
            "usIn": 1,
            "usOut": 2,
            "usDiff": 1,
            "testnet": true,
        }))
        .await;
    }

    /// Error reply to `request`.
    pub async fn reply_error(&mut self, request: &Value, code: i64, message: &str) {
        self.send(json!({
            "jsonrpc": "2.0",
            "id": request["id"],
            "error": {"code": code, "message": message},
        }))
        .await;
    }

    /// Subscription push on `channel`.
    pub async fn push(&mut self, channel: &str, data: Value) {
        self.send(json!({
            "jsonrpc": "2.0",
            "method": "subscription",
            "params": {"channel": channel, "data": data},
        }))
        .await;
    }

    /// Normal closure from the server side.
    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }

    /// Drains requests until the client disconnects.
    pub async fn idle(mut self) {
        while self.next_request().await.is_some() {}
    }
}
