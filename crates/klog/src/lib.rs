//! HTTP exchange capture for tower services
//!
//! `klog` wraps a service with [`KlogLayer`]. For every request that is not
//! excluded it records a REQUEST and a RESPONSE entry, correlated through a
//! shared span, and writes them to the local logger and/or a message broker.
//!
//! Capture never changes what the client sees: bodies are forwarded
//! byte-for-byte and logging or publishing failures are only logged.

pub mod capture;
pub mod config;
pub mod error;
pub mod layer;
pub mod publisher;
pub mod record;
pub mod shutdown;
pub mod skip;
pub mod trace;

/// Identity used in log prefixes and as the configuration section key
pub const PLUGIN_NAME: &str = "klog-plugin";

pub use capture::{BoxError, CaptureBody, RequestBody};
pub use config::{Config, PublisherConfig};
pub use error::{PublishError, Result};
pub use layer::{KlogLayer, KlogLayerBuilder, KlogService};
pub use publisher::{BrokerMessage, Connection, Connector, MemoryBroker, Publisher, PublisherState};
pub use record::{CapturedExchange, Direction, RequestRecord, ResponseRecord};
pub use skip::SkipPaths;
pub use trace::{RequestTracer, SpanIds};

#[cfg(feature = "kafka")]
pub use publisher::kafka::KafkaConnector;
