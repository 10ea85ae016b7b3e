use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use klog::shutdown::close_on;
use klog::{Config, KlogLayer, MemoryBroker, PublishError, PublisherConfig, PublisherState, RequestBody};
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::oneshot;
use tower::{service_fn, Layer, ServiceExt};

async fn ok(_req: Request<RequestBody>) -> Result<Response<Full<Bytes>>, Infallible> {
    Ok(Response::new(Full::new(Bytes::from_static(b"ok"))))
}

fn config() -> Config {
    Config::new()
        .stdout(false)
        .publisher(PublisherConfig::new(["memory:9092"], "access-log"))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_during_publish_is_clean() {
    let broker = MemoryBroker::new();
    broker.set_latency(Duration::from_millis(100));
    let layer = KlogLayer::builder(config()).connector(broker.clone()).build();
    let publisher = layer.publisher().unwrap().clone();
    let svc = layer.layer(service_fn(ok));

    let request = tokio::spawn({
        let svc = svc.clone();
        async move {
            let response = svc
                .oneshot(Request::post("/orders").body(Full::new(Bytes::from_static(b"{}"))).unwrap())
                .await
                .unwrap();
            let status = response.status();
            response.into_body().collect().await.unwrap();
            status
        }
    });

    let (tx, rx) = oneshot::channel::<()>();
    let listener = tokio::spawn(close_on(publisher.clone(), async {
        let _ = rx.await;
    }));
    tokio::time::sleep(Duration::from_millis(150)).await;
    tx.send(()).unwrap();
    listener.await.unwrap();

    assert_eq!(request.await.unwrap(), StatusCode::OK);
    assert_eq!(publisher.state().await, PublisherState::Closed);
    assert_eq!(broker.close_count(), 1);
    assert!(broker.messages().len() <= 2);
}

#[tokio::test]
async fn requests_after_close_still_succeed() {
    let broker = MemoryBroker::new();
    let layer = KlogLayer::builder(config()).connector(broker.clone()).build();
    let publisher = layer.publisher().unwrap().clone();
    let svc = layer.layer(service_fn(ok));

    close_on(publisher.clone(), async {}).await;

    let response = svc
        .oneshot(Request::get("/after").body(Full::new(Bytes::new())).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body, Bytes::from_static(b"ok"));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(broker.messages().is_empty());
    assert_eq!(broker.dial_count(), 0);
    assert!(matches!(
        publisher.publish(Bytes::from_static(b"late")).await,
        Err(PublishError::Closed)
    ));
}

#[tokio::test]
async fn close_twice_is_harmless() {
    let broker = MemoryBroker::new();
    let layer = KlogLayer::builder(config()).connector(broker.clone()).build();
    let publisher = layer.publisher().unwrap().clone();
    publisher.get_or_create().await.unwrap();

    close_on(publisher.clone(), async {}).await;
    close_on(publisher.clone(), async {}).await;

    assert_eq!(broker.close_count(), 1);
}

#[tokio::test]
async fn serve_loop_stops_once_publisher_is_closed() {
    let broker = MemoryBroker::new();
    let layer = KlogLayer::builder(config()).connector(broker.clone()).build();
    let publisher = layer.publisher().unwrap().clone();
    let svc = layer.layer(service_fn(ok));

    let (tx, rx) = oneshot::channel::<()>();
    let closed = tokio::spawn(close_on(publisher.clone(), async {
        let _ = rx.await;
    }));

    // Keeps serving until the close listener finishes, like a server accept loop.
    let serve = async {
        loop {
            let response = svc
                .clone()
                .oneshot(Request::get("/tick").body(Full::new(Bytes::new())).unwrap())
                .await
                .unwrap();
            response.into_body().collect().await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };

    tx.send(()).unwrap();
    let stopped = tokio::time::timeout(Duration::from_secs(2), async {
        tokio::select! {
            _ = serve => false,
            _ = closed => true,
        }
    })
    .await;

    assert_eq!(stopped, Ok(true));
    assert_eq!(publisher.state().await, PublisherState::Closed);
}
