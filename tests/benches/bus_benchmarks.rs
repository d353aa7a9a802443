//! # Event Bus Benchmarks
//!
//! Hot paths on the dispatch side of a bus:
//!
//! | Path | What is measured |
//! |------|------------------|
//! | Pattern matching | glob match of one channel against one pattern |
//! | Codec | encode and decode of a typical event |
//! | Middleware chain | overhead of the standard chain around a no-op handler |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use event_bus::middleware::StandardChainConfig;
use event_bus::{callback_fn, payload, ChannelPattern, Event, EventType, MiddlewareChain};
use serde_json::json;

fn bench_pattern_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("pattern-matching");

    let cases = [
        ("exact", "robot.status", "robot.status"),
        ("prefix", "game.*", "game.g42.moves"),
        ("infix", "*ai.move.request*", "service.ai_service.events"),
        ("class", "web.clients.[a-f]*", "web.clients.c1"),
    ];
    for (name, pattern, channel) in cases {
        let compiled = ChannelPattern::parse(pattern).expect("valid pattern");
        group.bench_with_input(BenchmarkId::new("matches", name), &channel, |b, channel| {
            b.iter(|| black_box(compiled.matches(black_box(channel))))
        });
    }
    group.finish();
}

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");
    let event = Event::of(
        EventType::MoveExecuted,
        payload(json!({
            "game_id": "g42",
            "move": "e2e4",
            "fen": "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1",
            "clock_ms": 180_000,
        })),
    )
    .with_source("game_manager")
    .with_event_id("game.g42.moves_1700000000000");
    let bytes = event.encode().expect("encodable event");

    group.throughput(Throughput::Bytes(bytes.len() as u64));
    group.bench_function("encode", |b| b.iter(|| black_box(event.encode())));
    group.bench_function("decode", |b| b.iter(|| black_box(Event::decode(&bytes))));
    group.finish();
}

fn bench_middleware_chain(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("runtime");
    let mut group = c.benchmark_group("middleware-chain");

    let handler = callback_fn(|_event| async { Ok(()) });
    let event = Event::of(EventType::WebMessageReceived, payload(json!({"n": 1})));

    let chains = [
        ("empty", MiddlewareChain::new()),
        (
            "standard",
            MiddlewareChain::standard(&StandardChainConfig {
                logging: false,
                ..StandardChainConfig::default()
            }),
        ),
    ];
    for (name, chain) in chains {
        group.bench_function(BenchmarkId::new("execute", name), |b| {
            b.iter(|| {
                runtime.block_on(chain.execute(black_box(event.clone()), handler.clone()))
            })
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_pattern_matching,
    bench_codec,
    bench_middleware_chain
);
criterion_main!(benches);
