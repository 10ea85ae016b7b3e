//! Captured exchange records and their emission
//!
//! One [`CapturedExchange`] is built for each side of a captured request,
//! rendered to key-ordered JSON, then written to the local logger and/or
//! handed to the publisher. Emission is best-effort: nothing here can fail
//! the HTTP exchange.

use crate::publisher::Publisher;
use crate::trace::SpanIds;
use crate::PLUGIN_NAME;
use bytes::Bytes;
use http::header::{HOST, USER_AGENT};
use http::request::Parts;
use http::{HeaderMap, StatusCode};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Which side of the exchange a record describes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Request => "REQUEST",
            Direction::Response => "RESPONSE",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Header name to every value sent under it
pub type HeaderValues = BTreeMap<String, Vec<String>>;

/// Request side of an exchange
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RequestRecord {
    pub span_id: String,
    pub trace_id: String,
    pub method: String,
    pub host: String,
    pub path: String,
    pub user_agent: String,
    pub query: String,
    /// Only the configured header keys
    pub headers: HeaderValues,
    pub request_body: String,
}

impl RequestRecord {
    /// Build the record from the request head and its drained body
    ///
    /// Every configured key appears in `headers`, with an empty list when the
    /// request did not carry it.
    pub fn capture(parts: &Parts, body: &[u8], header_keys: &[String], ids: &SpanIds) -> Self {
        let host = parts
            .headers
            .get(HOST)
            .map(|v| lossy(v.as_bytes()))
            .or_else(|| parts.uri.authority().map(|a| a.as_str().to_owned()))
            .unwrap_or_default();

        let headers = header_keys
            .iter()
            .map(|key| {
                let values = parts
                    .headers
                    .get_all(key.as_str())
                    .iter()
                    .map(|v| lossy(v.as_bytes()))
                    .collect();
                (key.clone(), values)
            })
            .collect();

        Self {
            span_id: ids.span_id.clone(),
            trace_id: ids.trace_id.clone(),
            method: parts.method.to_string(),
            host,
            path: parts.uri.path().to_owned(),
            user_agent: parts
                .headers
                .get(USER_AGENT)
                .map(|v| lossy(v.as_bytes()))
                .unwrap_or_default(),
            query: parts.uri.query().unwrap_or_default().to_owned(),
            headers,
            request_body: lossy(body),
        }
    }
}

/// Response side of an exchange
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ResponseRecord {
    pub span_id: String,
    pub trace_id: String,
    pub response_status_code: u16,
    /// Every response header
    pub response_headers: HeaderValues,
    pub response_body: String,
}

impl ResponseRecord {
    pub fn capture(status: StatusCode, headers: &HeaderMap, body: &[u8], ids: &SpanIds) -> Self {
        let mut response_headers = HeaderValues::new();
        for (name, value) in headers {
            response_headers
                .entry(name.as_str().to_owned())
                .or_default()
                .push(lossy(value.as_bytes()));
        }

        Self {
            span_id: ids.span_id.clone(),
            trace_id: ids.trace_id.clone(),
            response_status_code: status.as_u16(),
            response_headers,
            response_body: lossy(body),
        }
    }
}

/// One side of a captured HTTP exchange
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "direction", rename_all = "UPPERCASE")]
pub enum CapturedExchange {
    Request(RequestRecord),
    Response(ResponseRecord),
}

impl CapturedExchange {
    pub fn direction(&self) -> Direction {
        match self {
            CapturedExchange::Request(_) => Direction::Request,
            CapturedExchange::Response(_) => Direction::Response,
        }
    }

    pub fn span_id(&self) -> &str {
        match self {
            CapturedExchange::Request(r) => &r.span_id,
            CapturedExchange::Response(r) => &r.span_id,
        }
    }

    pub fn trace_id(&self) -> &str {
        match self {
            CapturedExchange::Request(r) => &r.trace_id,
            CapturedExchange::Response(r) => &r.trace_id,
        }
    }

    /// Render as JSON with keys in sorted order
    pub fn render(&self) -> String {
        let rendered = serde_json::to_value(self).and_then(|value| serde_json::to_string(&value));
        match rendered {
            Ok(entry) => entry,
            Err(err) => {
                tracing::error!(
                    plugin = PLUGIN_NAME,
                    error = %err,
                    "[PLUGIN: {}] failed to render {} record",
                    PLUGIN_NAME,
                    self.direction()
                );
                String::from("{}")
            }
        }
    }
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Writes records to the local logger and the publisher
#[derive(Clone)]
pub struct Emitter {
    stdout: bool,
    publisher: Option<Arc<Publisher>>,
}

impl Emitter {
    pub fn new(stdout: bool, publisher: Option<Arc<Publisher>>) -> Self {
        Self { stdout, publisher }
    }

    pub fn publisher(&self) -> Option<&Arc<Publisher>> {
        self.publisher.as_ref()
    }

    /// Emit a record, waiting for the publish to finish
    pub async fn emit(&self, exchange: &CapturedExchange) {
        let direction = exchange.direction();
        let entry = exchange.render();
        self.log(direction, &entry);

        if let Some(publisher) = &self.publisher {
            publish_entry(publisher, direction, entry).await;
        }
    }

    /// Emit a record without waiting on the publisher
    ///
    /// The local log line is written immediately; the publish runs as a task
    /// on the current tokio runtime.
    pub fn emit_detached(&self, exchange: CapturedExchange) {
        let direction = exchange.direction();
        let entry = exchange.render();
        self.log(direction, &entry);

        let Some(publisher) = self.publisher.clone() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    publish_entry(&publisher, direction, entry).await;
                });
            }
            Err(_) => {
                tracing::warn!(
                    plugin = PLUGIN_NAME,
                    direction = %direction,
                    "[PLUGIN: {}] no async runtime, {} record not published",
                    PLUGIN_NAME,
                    direction
                );
            }
        }
    }

    fn log(&self, direction: Direction, entry: &str) {
        if self.stdout {
            tracing::info!(
                plugin = PLUGIN_NAME,
                direction = %direction,
                "[PLUGIN: {}] {}: {}",
                PLUGIN_NAME,
                direction,
                entry
            );
        }
    }
}

async fn publish_entry(publisher: &Publisher, direction: Direction, entry: String) {
    tracing::debug!(
        plugin = PLUGIN_NAME,
        topic = publisher.topic(),
        "push log to kafka"
    );
    match publisher.publish(Bytes::from(entry)).await {
        Ok(()) => {}
        // Cached states and dial failures were already reported by the publisher.
        Err(err) if err.is_cached() || err.is_dial_failure() => {
            tracing::debug!(
                plugin = PLUGIN_NAME,
                direction = %direction,
                error = %err,
                "[PLUGIN: {}] {} record not published",
                PLUGIN_NAME,
                direction
            );
        }
        Err(err) => {
            tracing::error!(
                plugin = PLUGIN_NAME,
                direction = %direction,
                error = %err,
                "[PLUGIN: {}] publish {} record failed: {}",
                PLUGIN_NAME,
                direction,
                err
            );
        }
    }
}
