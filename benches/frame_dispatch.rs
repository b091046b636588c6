//! Frame classification and correlation benchmarks.
//!
//! - Frame parsing: reply, subscription push, garbage
//! - Request round trip through the multiplexer with an in-memory writer
//!
//! Run with: cargo bench --bench frame_dispatch
//! Results saved to: target/criterion/

use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use serde_json::Value;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;

use deribit_session::protocol::Frame;
use deribit_session::transport::FrameWriter;
use deribit_session::{Method, Multiplexer, Response, TransportError};

// ============================================================================
// Inputs
// ============================================================================

const REPLY: &str = r#"{"jsonrpc":"2.0","id":4217,"result":{"order":{"order_id":"ETH-349","order_state":"open","price":3000.0,"amount":10.0}},"usIn":1700000000000001,"usOut":1700000000000101,"usDiff":100,"testnet":true}"#;

const PUSH: &str = r#"{"jsonrpc":"2.0","method":"subscription","params":{"channel":"book.BTC-PERPETUAL.100ms","data":{"type":"change","timestamp":1700000000000,"instrument_name":"BTC-PERPETUAL","change_id":11,"prev_change_id":10,"bids":[["new",64210.5,1200.0],["delete",64200.0,0.0]],"asks":[["change",64215.0,300.0]]}}}"#;

const GARBAGE: &str = "not json at all";

// ============================================================================
// Benchmark: Frame Parsing
// ============================================================================

fn bench_frame_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_parse");

    for (name, text) in [("reply", REPLY), ("push", PUSH), ("garbage", GARBAGE)] {
        group.bench_with_input(BenchmarkId::new("parse", name), text, |b, text| {
            b.iter(|| Frame::parse(black_box(text)));
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Multiplexer Round Trip
// ============================================================================

/// Writer that echoes every request back as a reply.
struct EchoWriter(mpsc::UnboundedSender<u64>);

#[async_trait]
impl FrameWriter for EchoWriter {
    async fn send_text(&self, text: String) -> Result<(), TransportError> {
        let value: Value = serde_json::from_str(&text).map_err(|e| TransportError::io(e.to_string()))?;
        let id = value["id"].as_u64().unwrap_or_default();
        self.0.send(id).map_err(|_| TransportError::Closed)
    }
}

fn bench_round_trip(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");

    let mut group = c.benchmark_group("round_trip");

    for &concurrent in &[1usize, 16, 64] {
        group.bench_with_input(
            BenchmarkId::new("calls", concurrent),
            &concurrent,
            |b, &concurrent| {
                b.to_async(&rt).iter(|| async move {
                    let (tx, mut rx) = mpsc::unbounded_channel();
                    let mux = Arc::new(Multiplexer::new(Arc::new(EchoWriter(tx)), 1024));

                    let responder = {
                        let mux = Arc::clone(&mux);
                        tokio::spawn(async move {
                            while let Some(id) = rx.recv().await {
                                let text = format!(r#"{{"jsonrpc":"2.0","id":{id},"result":null}}"#);
                                if let Frame::Reply(response) = Frame::parse(&text) {
                                    mux.fulfill(response);
                                }
                            }
                        })
                    };

                    let calls: Vec<_> = (0..concurrent)
                        .map(|_| {
                            let mux = Arc::clone(&mux);
                            tokio::spawn(async move {
                                mux.call(Method::Test, Duration::from_secs(5)).await
                            })
                        })
                        .collect();

                    for call in calls {
                        let response: Response = call.await.expect("join").expect("reply");
                        black_box(response);
                    }

                    drop(mux);
                    responder.abort();
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_frame_parse, bench_round_trip);
criterion_main!(benches);
