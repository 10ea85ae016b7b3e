//! Record building and rendering benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use http::{HeaderMap, StatusCode};
use klog::{CapturedExchange, RequestRecord, ResponseRecord, SkipPaths, SpanIds};
use serde_json::json;

fn ids() -> SpanIds {
    SpanIds {
        trace_id: "4bf92f3577b34da6a3ce929d0e0e4736".to_string(),
        span_id: "00f067aa0ba902b7".to_string(),
    }
}

fn bench_skip_paths(c: &mut Criterion) {
    let mut group = c.benchmark_group("skip_paths");

    for count in [1usize, 8, 64].iter() {
        let skip: SkipPaths = (0..*count).map(|i| format!("/internal/{i}")).collect();
        group.bench_with_input(BenchmarkId::new("miss", count), &skip, |b, skip| {
            b.iter(|| skip.is_skipped(black_box("/orders")))
        });
    }

    group.finish();
}

fn bench_request_record(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_record");
    let keys = vec!["X-Request-Id".to_string(), "X-Tenant".to_string()];
    let (parts, _) = http::Request::builder()
        .method("POST")
        .uri("/orders?page=2")
        .header("host", "shop.local")
        .header("x-request-id", "req-42")
        .body(())
        .unwrap()
        .into_parts();

    for size in [0usize, 1024, 64 * 1024].iter() {
        let body = json!({ "payload": "x".repeat(*size) }).to_string().into_bytes();
        group.bench_with_input(BenchmarkId::new("capture_render", size), &body, |b, body| {
            b.iter(|| {
                let record = RequestRecord::capture(&parts, black_box(body), &keys, &ids());
                CapturedExchange::Request(record).render()
            })
        });
    }

    group.finish();
}

fn bench_response_record(c: &mut Criterion) {
    let mut headers = HeaderMap::new();
    headers.insert("content-type", "application/json".parse().unwrap());
    headers.insert("cache-control", "no-store".parse().unwrap());
    let body = br#"{"status":"accepted","id":981}"#;

    c.bench_function("response_record/capture_render", |b| {
        b.iter(|| {
            let record = ResponseRecord::capture(StatusCode::ACCEPTED, &headers, black_box(body), &ids());
            CapturedExchange::Response(record).render()
        })
    });
}

criterion_group!(benches, bench_skip_paths, bench_request_record, bench_response_record);
criterion_main!(benches);
