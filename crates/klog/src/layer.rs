//! The request/response capturing middleware
//!
//! # Example
//!
//! ```rust,no_run
//! use klog::KlogLayer;
//! use serde_json::json;
//! use tower::ServiceBuilder;
//!
//! # async fn run() {
//! let extra = json!({
//!     "klog-plugin": {
//!         "skip_paths": ["/health"],
//!         "log_header_keys": ["X-Request-Id"],
//!         "kafka": { "enabled": false }
//!     }
//! });
//! let layer = KlogLayer::from_extra(&extra);
//! layer.spawn_shutdown_listener();
//!
//! let service = ServiceBuilder::new()
//!     .layer(layer)
//!     .service_fn(|_req: http::Request<klog::RequestBody>| async {
//!         Ok::<_, std::convert::Infallible>(http::Response::new(http_body_util::Full::new(
//!             bytes::Bytes::from_static(b"ok"),
//!         )))
//!     });
//! # let _ = service;
//! # }
//! ```

use crate::capture::{box_body, drain_body, BoxError, CaptureBody, RequestBody, ResponseTap};
use crate::config::Config;
use crate::publisher::{Connector, Publisher};
use crate::record::{CapturedExchange, Emitter, RequestRecord};
use crate::shutdown;
use crate::trace::RequestTracer;
use crate::PLUGIN_NAME;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::{Request, Response};
use http_body::Body;
use opentelemetry_sdk::trace::TracerProvider;
use serde_json::Value;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::task::JoinHandle;
use tower::{Layer, Service};

struct Shared {
    config: Config,
    emitter: Emitter,
    tracer: RequestTracer,
}

/// Tower layer that captures request/response pairs
///
/// Cheap to clone; all clones share one configuration, one tracer and one
/// publisher.
#[derive(Clone)]
pub struct KlogLayer {
    shared: Arc<Shared>,
}

impl KlogLayer {
    /// Build a layer with the default connector for this build
    pub fn new(config: Config) -> Self {
        Self::builder(config).build()
    }

    /// Build a layer from the host's plugin configuration map
    pub fn from_extra(extra: &Value) -> Self {
        Self::new(Config::from_extra(extra))
    }

    pub fn builder(config: Config) -> KlogLayerBuilder {
        KlogLayerBuilder {
            config,
            connector: None,
            tracer: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// The shared publisher, if publishing is enabled
    pub fn publisher(&self) -> Option<&Arc<Publisher>> {
        self.shared.emitter.publisher()
    }

    /// Close the publisher when the process receives SIGINT or SIGTERM
    ///
    /// Returns `None` when there is no publisher or no tokio runtime.
    pub fn spawn_shutdown_listener(&self) -> Option<JoinHandle<()>> {
        let publisher = self.publisher()?.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => Some(handle.spawn(shutdown::close_on(
                publisher,
                shutdown::shutdown_signal(),
            ))),
            Err(_) => {
                tracing::warn!(
                    plugin = PLUGIN_NAME,
                    "[PLUGIN: {}] no async runtime, publisher will not be closed on shutdown",
                    PLUGIN_NAME
                );
                None
            }
        }
    }
}

/// Builder for [`KlogLayer`]
pub struct KlogLayerBuilder {
    config: Config,
    connector: Option<Arc<dyn Connector>>,
    tracer: Option<RequestTracer>,
}

impl KlogLayerBuilder {
    /// Use `connector` to reach the log sink
    pub fn connector<C: Connector + 'static>(self, connector: C) -> Self {
        self.shared_connector(Arc::new(connector))
    }

    pub fn shared_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Open request spans on `provider` instead of a private one
    pub fn tracer_provider(mut self, provider: TracerProvider) -> Self {
        self.tracer = Some(RequestTracer::with_provider(provider));
        self
    }

    pub fn build(self) -> KlogLayer {
        let Self {
            config,
            connector,
            tracer,
        } = self;

        tracing::info!(
            plugin = PLUGIN_NAME,
            enabled = config.enabled,
            "[PLUGIN: {}] skip_paths: {}",
            PLUGIN_NAME,
            config.skip_paths_display()
        );

        let publisher = if config.enabled && config.publisher.enabled {
            match connector.or_else(default_connector) {
                Some(connector) => Some(Arc::new(Publisher::new(
                    config.publisher.clone(),
                    connector,
                ))),
                None => {
                    tracing::warn!(
                        plugin = PLUGIN_NAME,
                        "[PLUGIN: {}] publisher enabled but no broker connector is available, records are not published",
                        PLUGIN_NAME
                    );
                    None
                }
            }
        } else {
            None
        };

        KlogLayer {
            shared: Arc::new(Shared {
                emitter: Emitter::new(config.stdout, publisher),
                tracer: tracer.unwrap_or_default(),
                config,
            }),
        }
    }
}

#[cfg(feature = "kafka")]
fn default_connector() -> Option<Arc<dyn Connector>> {
    Some(Arc::new(crate::publisher::kafka::KafkaConnector::new()))
}

#[cfg(not(feature = "kafka"))]
fn default_connector() -> Option<Arc<dyn Connector>> {
    None
}

impl<S> Layer<S> for KlogLayer {
    type Service = KlogService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        KlogService {
            inner,
            shared: self.shared.clone(),
        }
    }
}

/// Service produced by [`KlogLayer`]
#[derive(Clone)]
pub struct KlogService<S> {
    inner: S,
    shared: Arc<Shared>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for KlogService<S>
where
    S: Service<Request<RequestBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ReqBody: Body<Data = Bytes> + Send + 'static,
    ReqBody::Error: Into<BoxError>,
    ResBody: Body<Data = Bytes> + Send + 'static,
{
    type Response = Response<CaptureBody<ResBody>>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        // Use the service that was driven to readiness; leave a fresh clone behind.
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        Box::pin(intercept(self.shared.clone(), inner, req))
    }
}

/// Call the inner service, erasing its future type
fn forward<S, ResBody>(
    inner: &mut S,
    req: Request<RequestBody>,
) -> BoxFuture<'static, Result<Response<ResBody>, S::Error>>
where
    S: Service<Request<RequestBody>, Response = Response<ResBody>>,
    S::Future: Send + 'static,
{
    Box::pin(inner.call(req))
}

async fn intercept<S, ReqBody, ResBody>(
    shared: Arc<Shared>,
    mut inner: S,
    req: Request<ReqBody>,
) -> Result<Response<CaptureBody<ResBody>>, S::Error>
where
    S: Service<Request<RequestBody>, Response = Response<ResBody>>,
    S::Future: Send + 'static,
    S::Error: 'static,
    ReqBody: Body<Data = Bytes> + Send + 'static,
    ReqBody::Error: Into<BoxError>,
    ResBody: 'static,
{
    let config = &shared.config;
    if !config.enabled {
        let response = forward(&mut inner, req.map(box_body)).await?;
        return Ok(response.map(CaptureBody::passthrough));
    }

    let path = req.uri().path().to_owned();
    let mut span = shared.tracer.start(&path, req.headers());
    let (mut parts, body) = req.into_parts();
    parts.extensions.insert(span.ids().clone());

    if config.skip_paths.is_skipped(&path) {
        tracing::debug!(plugin = PLUGIN_NAME, path = %path, "path skipped");
        span.event("REQUEST");
        let response = forward(&mut inner, Request::from_parts(parts, box_body(body))).await?;
        let tap = ResponseTap::span_only(span);
        return Ok(response.map(|body| CaptureBody::tapped(body, tap)));
    }

    let drained = drain_body(body).await;
    let record =
        RequestRecord::capture(&parts, &drained.data, &config.log_header_keys, span.ids());
    shared.emitter.emit(&CapturedExchange::Request(record)).await;
    span.event("REQUEST");

    let response = forward(&mut inner, Request::from_parts(parts, drained.replay())).await?;

    let (head, body) = response.into_parts();
    let tap = ResponseTap::capturing(
        span,
        head.status,
        head.headers.clone(),
        shared.emitter.clone(),
    );
    Ok(Response::from_parts(head, CaptureBody::tapped(body, tap)))
}
