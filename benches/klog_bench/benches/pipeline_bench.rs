//! End-to-end overhead of the capture layer

use bytes::Bytes;
use criterion::{criterion_group, criterion_main, Criterion};
use http::{Request, Response};
use http_body_util::{BodyExt, Full};
use klog::{Config, KlogLayer, RequestBody};
use std::convert::Infallible;
use tower::{service_fn, Layer, ServiceExt};

async fn ok(req: Request<RequestBody>) -> Result<Response<Full<Bytes>>, Infallible> {
    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => Bytes::new(),
    };
    Ok(Response::new(Full::new(body)))
}

fn request(path: &str) -> Request<Full<Bytes>> {
    Request::post(path)
        .body(Full::new(Bytes::from_static(br#"{"sku":"A-1","qty":3}"#)))
        .unwrap()
}

fn bench_pipeline(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("pipeline");

    let cases = [
        ("disabled", Config::new().enabled(false).stdout(false), "/orders"),
        ("skipped", Config::new().stdout(false).skip_path("/health"), "/health"),
        ("captured", Config::new().stdout(false), "/orders"),
    ];

    for (name, config, path) in cases {
        let svc = KlogLayer::new(config).layer(service_fn(ok));
        group.bench_function(name, |b| {
            b.to_async(&runtime).iter(|| {
                let svc = svc.clone();
                async move {
                    let response = svc.oneshot(request(path)).await.unwrap();
                    response.into_body().collect().await.unwrap().to_bytes()
                }
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_pipeline);
criterion_main!(benches);
