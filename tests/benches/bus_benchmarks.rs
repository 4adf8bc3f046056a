//! # Relay Bus Benchmarks
//!
//! | Area | What is measured |
//! |------|------------------|
//! | Wire codec | Frame parsing and event encoding |
//! | Pipeline | One message through a chain of N middleware |
//! | Exchange | Channel publication fan-out to N listeners |

use bus_exchange::Exchange;
use bus_server::{from_fn, Connection, Envelope, InboundFrame, Message, Pipeline, Stage, WireEvent};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use std::time::Duration;

// ============================================================================
// Wire codec
// ============================================================================

fn bench_wire_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("wire-codec");

    let frame = r#"["shout", "hello", {"volume": 11}, [1, 2, 3], "zion"]"#;
    group.bench_function("parse_frame", |b| {
        b.iter(|| black_box(InboundFrame::parse(black_box(frame)).is_ok()))
    });

    let envelope = Envelope::new("shout", "zion", vec![json!("Hello!!!!!!"), json!({"n": 1})])
        .with_target("zion");
    group.bench_function("encode_event", |b| {
        b.iter(|| black_box(WireEvent::from_envelope(black_box(&envelope)).to_text()))
    });

    group.finish();
}

// ============================================================================
// Pipeline
// ============================================================================

fn bench_pipeline(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    let mut group = c.benchmark_group("pipeline");
    group.measurement_time(Duration::from_secs(5));

    for depth in [1usize, 8, 32] {
        let pipeline = Pipeline::new(Stage::Processing);
        for _ in 0..depth {
            pipeline.use_middleware(from_fn(|message: &mut Message, _: Option<&Connection>| {
                message.content_mut().push(json!(1));
                Ok(())
            }));
        }

        group.throughput(Throughput::Elements(depth as u64));
        group.bench_with_input(BenchmarkId::new("receive", depth), &pipeline, |b, pipeline| {
            b.to_async(&runtime).iter(|| async move {
                let message = Message::new(Envelope::new("bench", "actor", vec![]));
                black_box(pipeline.receive(message, None).await.is_ok())
            })
        });
    }

    group.finish();
}

// ============================================================================
// Exchange
// ============================================================================

fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("exchange");

    for listeners in [1usize, 16, 256] {
        let exchange = Exchange::new();
        let subscriptions: Vec<_> = (0..listeners).map(|_| exchange.subscribe("zion")).collect();

        group.throughput(Throughput::Elements(listeners as u64));
        group.bench_with_input(BenchmarkId::new("publish", listeners), &exchange, |b, exchange| {
            b.iter(|| {
                let envelope = Envelope::new("bench", "actor", vec![json!("x")]);
                black_box(exchange.publish(envelope, Some("zion")))
            })
        });

        drop(subscriptions);
    }

    group.finish();
}

criterion_group!(benches, bench_wire_codec, bench_pipeline, bench_fan_out);
criterion_main!(benches);
