//! Body capture for both sides of the exchange
//!
//! The request body is drained into memory and replaced by a replayable copy.
//! The response body is wrapped in [`CaptureBody`], which hands every frame
//! on as soon as it is polled and keeps a copy of the data for the RESPONSE
//! record.

use crate::record::{CapturedExchange, Emitter, ResponseRecord};
use crate::trace::RequestSpan;
use crate::PLUGIN_NAME;
use bytes::{BufMut, Bytes, BytesMut};
use futures_util::stream;
use http::{HeaderMap, StatusCode};
use http_body::{Body, Frame, SizeHint};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use pin_project_lite::pin_project;
use std::fmt;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

/// Boxed error type carried by request bodies
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Request body type seen by the wrapped service
pub type RequestBody = UnsyncBoxBody<Bytes, BoxError>;

/// A request body read into memory
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DrainedBody {
    /// Every data frame, concatenated
    pub data: Bytes,
    /// Trailer fields, merged when sent in several frames
    pub trailers: Option<HeaderMap>,
}

impl DrainedBody {
    /// Turn the drained frames back into a body carrying the same data and
    /// trailers
    pub fn replay(self) -> RequestBody {
        match self.trailers {
            None => Full::new(self.data)
                .map_err(|never| match never {})
                .boxed_unsync(),
            Some(trailers) => {
                let mut frames: Vec<Result<Frame<Bytes>, BoxError>> = Vec::with_capacity(2);
                if !self.data.is_empty() {
                    frames.push(Ok(Frame::data(self.data)));
                }
                frames.push(Ok(Frame::trailers(trailers)));
                StreamBody::new(stream::iter(frames)).boxed_unsync()
            }
        }
    }
}

/// Read every frame of `body` into memory
///
/// A read error is logged and the frames read before it are kept.
pub async fn drain_body<B>(body: B) -> DrainedBody
where
    B: Body,
    B::Error: Into<BoxError>,
{
    let mut body = std::pin::pin!(body);
    let mut collected = BytesMut::new();
    let mut trailers: Option<HeaderMap> = None;

    while let Some(frame) = body.frame().await {
        match frame {
            Ok(frame) => match frame.into_data() {
                Ok(data) => collected.put(data),
                Err(frame) => {
                    if let Ok(fields) = frame.into_trailers() {
                        match &mut trailers {
                            Some(existing) => existing.extend(fields),
                            None => trailers = Some(fields),
                        }
                    }
                }
            },
            Err(err) => {
                let err: BoxError = err.into();
                tracing::error!(
                    plugin = PLUGIN_NAME,
                    error = %err,
                    read = collected.len(),
                    "[PLUGIN: {}] failed to read request body: {}",
                    PLUGIN_NAME,
                    err
                );
                break;
            }
        }
    }

    DrainedBody {
        data: collected.freeze(),
        trailers,
    }
}

/// Convert any request body into [`RequestBody`] without reading it
pub fn box_body<B>(body: B) -> RequestBody
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    body.map_err(Into::into).boxed_unsync()
}

struct ResponseCapture {
    status: StatusCode,
    headers: HeaderMap,
    body: BytesMut,
    emitter: Emitter,
}

/// Completion hook attached to a response body
///
/// Always ends the request span; when capturing, also emits the RESPONSE
/// record built from the response head and the body bytes seen so far.
pub struct ResponseTap {
    span: RequestSpan,
    capture: Option<ResponseCapture>,
}

impl ResponseTap {
    /// Tap that only records the span event (skipped paths)
    pub fn span_only(span: RequestSpan) -> Self {
        Self {
            span,
            capture: None,
        }
    }

    /// Tap that captures the body and emits the RESPONSE record
    pub fn capturing(
        span: RequestSpan,
        status: StatusCode,
        headers: HeaderMap,
        emitter: Emitter,
    ) -> Self {
        Self {
            span,
            capture: Some(ResponseCapture {
                status,
                headers,
                body: BytesMut::new(),
                emitter,
            }),
        }
    }

    fn record(&mut self, data: &Bytes) {
        if let Some(capture) = &mut self.capture {
            capture.body.extend_from_slice(data);
        }
    }

    fn finish(mut self) {
        self.span.event("RESPONSE");
        if let Some(capture) = self.capture.take() {
            let record = ResponseRecord::capture(
                capture.status,
                &capture.headers,
                &capture.body,
                self.span.ids(),
            );
            capture.emitter.emit_detached(CapturedExchange::Response(record));
        }
        self.span.end();
    }
}

pin_project! {
    /// Response body that forwards frames unchanged while copying data
    ///
    /// Frames are never held back. The tap fires once: at end of stream, on
    /// the first body error, or when the body is dropped before either.
    pub struct CaptureBody<B> {
        #[pin]
        inner: B,
        tap: Option<ResponseTap>,
    }

    impl<B> PinnedDrop for CaptureBody<B> {
        fn drop(this: Pin<&mut Self>) {
            if let Some(tap) = this.project().tap.take() {
                tap.finish();
            }
        }
    }
}

impl<B> CaptureBody<B> {
    /// Forward `inner` with no capture at all
    pub fn passthrough(inner: B) -> Self {
        Self { inner, tap: None }
    }

    pub fn tapped(inner: B, tap: ResponseTap) -> Self {
        Self {
            inner,
            tap: Some(tap),
        }
    }
}

impl<B: fmt::Debug> fmt::Debug for CaptureBody<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureBody")
            .field("inner", &self.inner)
            .field("tapped", &self.tap.is_some())
            .finish()
    }
}

impl<B> Body for CaptureBody<B>
where
    B: Body<Data = Bytes>,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();
        let polled = ready!(this.inner.poll_frame(cx));

        match &polled {
            Some(Ok(frame)) => {
                if let (Some(tap), Some(data)) = (this.tap.as_mut(), frame.data_ref()) {
                    tap.record(data);
                }
            }
            Some(Err(_)) | None => {
                if let Some(tap) = this.tap.take() {
                    tap.finish();
                }
            }
        }

        Poll::Ready(polled)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
