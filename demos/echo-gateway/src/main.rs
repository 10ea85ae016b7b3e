//! Echo server with request/response capture
//!
//! ```bash
//! RUST_LOG=info cargo run -p echo-gateway
//! curl -X POST localhost:8080/orders -H 'X-Request-Id: 1' -d '{"sku":"A-1"}'
//! ```
//!
//! Set `KLOG_CONFIG` to a JSON document shaped like the host's plugin map
//! to override the built-in configuration. Build with `--features kafka` to
//! publish to a real broker.

use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use klog::{KlogLayer, RequestBody, PLUGIN_NAME};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower::{service_fn, Layer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_ADDR: &str = "127.0.0.1:8080";

type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn default_extra() -> Value {
    json!({
        PLUGIN_NAME: {
            "enabled": true,
            "skip_paths": ["/health"],
            "log_header_keys": ["X-Request-Id", "X-Tenant"],
            "kafka": {
                "enabled": cfg!(feature = "kafka"),
                "broker_urls": ["localhost:9092"],
                "topic": "access-log",
                "partition": 0
            }
        }
    })
}

fn load_extra() -> Value {
    match std::env::var("KLOG_CONFIG") {
        Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|err| {
            error!("KLOG_CONFIG is not valid JSON ({}), using defaults", err);
            default_extra()
        }),
        Err(_) => default_extra(),
    }
}

async fn echo(req: Request<RequestBody>) -> Result<Response<Full<Bytes>>, Infallible> {
    if req.uri().path() == "/health" {
        return Ok(Response::new(Full::new(Bytes::from_static(b"ok"))));
    }

    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            error!("failed to read body: {}", err);
            Bytes::new()
        }
    };

    let payload = json!({
        "method": method.as_str(),
        "path": path,
        "echo": String::from_utf8_lossy(&body),
    });
    let response = Response::builder()
        .status(StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(payload.to_string())))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())));
    Ok(response)
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let layer = KlogLayer::from_extra(&load_extra());
    let closed = layer.spawn_shutdown_listener();

    let addr: SocketAddr = std::env::var("ECHO_ADDR")
        .unwrap_or_else(|_| DEFAULT_ADDR.to_string())
        .parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("echo gateway listening on http://{}", addr);

    match closed {
        // The listener owns SIGINT/SIGTERM once installed; stop when it finishes.
        Some(closed) => {
            tokio::select! {
                result = serve(listener, layer) => result,
                _ = closed => {
                    info!("echo gateway shutting down");
                    Ok(())
                }
            }
        }
        None => serve(listener, layer).await,
    }
}

async fn serve(listener: TcpListener, layer: KlogLayer) -> Result<(), BoxError> {
    let service = layer.layer(service_fn(echo));
    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let service = TowerToHyperService::new(service.clone());

        tokio::spawn(async move {
            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                error!("Connection error: {}", err);
            }
        });
    }
}
