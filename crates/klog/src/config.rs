//! Configuration extraction
//!
//! The host hands the plugin an untyped JSON tree. This module coerces that
//! tree into a typed [`Config`] in one pass. Extraction never fails: every
//! absent or mistyped field falls back to its default and a diagnostic naming
//! the field is logged.
//!
//! ```json
//! {
//!   "klog-plugin": {
//!     "enabled": true,
//!     "skip_paths": ["/health"],
//!     "log_header_keys": ["X-Request-Id"],
//!     "kafka": {
//!       "enabled": true,
//!       "broker_urls": ["localhost:9092"],
//!       "topic": "gateway-logs",
//!       "partition": 0
//!     }
//!   }
//! }
//! ```

use crate::skip::SkipPaths;
use crate::PLUGIN_NAME;
use serde_json::{Map, Value};
use std::time::Duration;

/// Default deadline applied to broker dials and publishes
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Broker publishing settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublisherConfig {
    /// Whether records are published to the broker
    pub enabled: bool,
    /// Broker endpoints (`host:port`)
    pub brokers: Vec<String>,
    /// Destination topic
    pub topic: String,
    /// Destination partition
    pub partition: i32,
    /// Deadline for a single dial or publish
    pub timeout: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            brokers: Vec::new(),
            topic: String::new(),
            partition: 0,
            timeout: DEFAULT_PUBLISH_TIMEOUT,
        }
    }
}

impl PublisherConfig {
    /// Enabled publisher config for `topic` on the given brokers
    pub fn new<I, S>(brokers: I, topic: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            enabled: true,
            brokers: brokers.into_iter().map(Into::into).collect(),
            topic: topic.into(),
            ..Self::default()
        }
    }

    pub fn partition(mut self, partition: i32) -> Self {
        self.partition = partition;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Middleware configuration, immutable once the layer is built
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Master switch; a disabled layer forwards everything untouched
    pub enabled: bool,
    /// Paths excluded from capture
    pub skip_paths: SkipPaths,
    /// Request header names copied into request records
    pub log_header_keys: Vec<String>,
    /// Whether records are written through the local logger
    pub stdout: bool,
    /// Broker publishing settings
    pub publisher: PublisherConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            skip_paths: SkipPaths::new(),
            log_header_keys: Vec::new(),
            stdout: true,
            publisher: PublisherConfig::default(),
        }
    }
}

impl Config {
    /// Default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Extract the plugin section from the host's plugin map
    ///
    /// The section is looked up under the plugin name. A missing section is
    /// treated like an empty one.
    pub fn from_extra(extra: &Value) -> Self {
        match extra.get(PLUGIN_NAME) {
            Some(section) => Self::from_value(section),
            None => {
                tracing::warn!(
                    plugin = PLUGIN_NAME,
                    "[PLUGIN: {}] no configuration section found, using defaults",
                    PLUGIN_NAME
                );
                Self::from_value(&Value::Object(Map::new()))
            }
        }
    }

    /// Extract configuration from the plugin's own section
    pub fn from_value(section: &Value) -> Self {
        let empty = Map::new();
        let map = match section.as_object() {
            Some(map) => map,
            None => {
                tracing::warn!(
                    plugin = PLUGIN_NAME,
                    found = kind(section),
                    "[PLUGIN: {}] configuration is not an object, using defaults",
                    PLUGIN_NAME
                );
                &empty
            }
        };
        let fields = Fields::new("", map);
        let mut config = Config::default();

        if let Some(enabled) = fields.bool("enabled", Presence::Expected) {
            config.enabled = enabled;
        }
        if let Some(paths) = fields.strings("skip_paths", Presence::Expected) {
            config.skip_paths = paths.into_iter().collect();
        }
        if let Some(keys) = fields.strings("log_header_keys", Presence::Expected) {
            config.log_header_keys = keys;
        }
        if let Some(stdout) = fields.bool("stdout", Presence::Optional) {
            config.stdout = stdout;
        }

        match map.get("kafka").or_else(|| map.get("publisher")) {
            Some(Value::Object(section)) => {
                config.publisher = PublisherConfig::from_map(section);
            }
            Some(other) => {
                tracing::warn!(
                    plugin = PLUGIN_NAME,
                    field = "kafka",
                    found = kind(other),
                    "[PLUGIN: {}] config for [kafka] is not an object, publishing disabled",
                    PLUGIN_NAME
                );
            }
            None => {
                tracing::info!(
                    plugin = PLUGIN_NAME,
                    field = "kafka",
                    "[PLUGIN: {}] config for [kafka] not set, publishing disabled",
                    PLUGIN_NAME
                );
            }
        }

        config
    }

    /// Builder-style toggle for the master switch
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Add a skipped path
    pub fn skip_path(mut self, path: impl Into<String>) -> Self {
        self.skip_paths.push(path);
        self
    }

    /// Add a header name to copy into request records
    pub fn log_header_key(mut self, key: impl Into<String>) -> Self {
        self.log_header_keys.push(key.into());
        self
    }

    pub fn stdout(mut self, stdout: bool) -> Self {
        self.stdout = stdout;
        self
    }

    pub fn publisher(mut self, publisher: PublisherConfig) -> Self {
        self.publisher = publisher;
        self
    }

    /// Comma-joined skip paths, for the installation log line
    pub fn skip_paths_display(&self) -> String {
        self.skip_paths.to_string()
    }
}

impl PublisherConfig {
    fn from_map(map: &Map<String, Value>) -> Self {
        let fields = Fields::new("kafka.", map);
        let mut config = PublisherConfig::default();

        if let Some(enabled) = fields.bool("enabled", Presence::Expected) {
            config.enabled = enabled;
        }
        if let Some(brokers) = fields.strings("broker_urls", Presence::Expected) {
            config.brokers = brokers;
        }
        if let Some(topic) = fields.string("topic", Presence::Expected) {
            config.topic = topic;
        }
        if let Some(partition) = fields.int32("partition", Presence::Optional) {
            config.partition = partition;
        }
        if let Some(ms) = fields.positive_u64("timeout_ms", Presence::Optional) {
            config.timeout = Duration::from_millis(ms);
        }

        config
    }
}

/// How loudly a missing field is reported
#[derive(Clone, Copy)]
enum Presence {
    Expected,
    Optional,
}

/// Typed accessors over one configuration object
struct Fields<'a> {
    scope: &'static str,
    map: &'a Map<String, Value>,
}

impl<'a> Fields<'a> {
    fn new(scope: &'static str, map: &'a Map<String, Value>) -> Self {
        Self { scope, map }
    }

    fn bool(&self, key: &str, presence: Presence) -> Option<bool> {
        match self.map.get(key) {
            Some(Value::Bool(value)) => Some(*value),
            found => self.reject(key, found, presence),
        }
    }

    fn string(&self, key: &str, presence: Presence) -> Option<String> {
        match self.map.get(key) {
            Some(Value::String(value)) => Some(value.clone()),
            found => self.reject(key, found, presence),
        }
    }

    /// Keeps string elements only; other elements are dropped silently
    fn strings(&self, key: &str, presence: Presence) -> Option<Vec<String>> {
        match self.map.get(key) {
            Some(Value::Array(items)) => Some(
                items
                    .iter()
                    .filter_map(|item| item.as_str().map(str::to_owned))
                    .collect(),
            ),
            found => self.reject(key, found, presence),
        }
    }

    fn int32(&self, key: &str, presence: Presence) -> Option<i32> {
        match self.map.get(key) {
            Some(Value::Number(n)) => match n.as_i64().and_then(|v| i32::try_from(v).ok()) {
                Some(value) => Some(value),
                None => self.reject(key, self.map.get(key), presence),
            },
            found => self.reject(key, found, presence),
        }
    }

    fn positive_u64(&self, key: &str, presence: Presence) -> Option<u64> {
        match self.map.get(key).and_then(Value::as_u64) {
            Some(value) if value > 0 => Some(value),
            _ => self.reject(key, self.map.get(key), presence),
        }
    }

    fn reject<T>(&self, key: &str, found: Option<&Value>, presence: Presence) -> Option<T> {
        let field = format!("{}{}", self.scope, key);
        match (found, presence) {
            (None, Presence::Optional) => {
                tracing::debug!(
                    plugin = PLUGIN_NAME,
                    field = %field,
                    "[PLUGIN: {}] config for [{}] not set, using default",
                    PLUGIN_NAME,
                    field
                );
            }
            (None, Presence::Expected) => {
                tracing::warn!(
                    plugin = PLUGIN_NAME,
                    field = %field,
                    "[PLUGIN: {}] config for [{}] not input, using default",
                    PLUGIN_NAME,
                    field
                );
            }
            (Some(value), _) => {
                tracing::warn!(
                    plugin = PLUGIN_NAME,
                    field = %field,
                    found = kind(value),
                    "[PLUGIN: {}] config for [{}] wrong, using default",
                    PLUGIN_NAME,
                    field
                );
            }
        }
        None
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn missing_section_yields_defaults() {
        let config = Config::from_extra(&json!({ "other-plugin": { "enabled": false } }));
        assert_eq!(config, Config::default());
        assert!(config.enabled);
        assert!(config.stdout);
        assert!(!config.publisher.enabled);
    }

    #[test]
    fn reads_all_fields() {
        let extra = json!({
            PLUGIN_NAME: {
                "enabled": true,
                "skip_paths": ["/health", "/metrics"],
                "log_header_keys": ["X-Request-Id"],
                "stdout": false,
                "kafka": {
                    "enabled": true,
                    "broker_urls": ["kafka-0:9092", "kafka-1:9092"],
                    "topic": "gateway-logs",
                    "partition": 3,
                    "timeout_ms": 250
                }
            }
        });

        let config = Config::from_extra(&extra);

        assert!(config.enabled);
        assert!(config.skip_paths.is_skipped("/health"));
        assert!(config.skip_paths.is_skipped("/metrics"));
        assert_eq!(config.log_header_keys, vec!["X-Request-Id".to_string()]);
        assert!(!config.stdout);
        assert_eq!(
            config.publisher,
            PublisherConfig::new(["kafka-0:9092", "kafka-1:9092"], "gateway-logs")
                .partition(3)
                .timeout(Duration::from_millis(250))
        );
    }

    #[test]
    fn mistyped_fields_fall_back() {
        let config = Config::from_value(&json!({
            "enabled": "yes",
            "skip_paths": "/health",
            "log_header_keys": 7,
            "stdout": null,
            "kafka": { "enabled": 1, "broker_urls": {}, "topic": 9, "partition": "0" }
        }));

        assert!(config.enabled);
        assert!(config.skip_paths.is_empty());
        assert!(config.log_header_keys.is_empty());
        assert!(config.stdout);
        assert_eq!(config.publisher, PublisherConfig::default());
    }

    #[test]
    fn non_string_sequence_elements_are_dropped() {
        let config = Config::from_value(&json!({
            "skip_paths": ["/a", 1, null, "/b", ["/c"], { "p": "/d" }],
            "log_header_keys": [true, "X-Trace"]
        }));

        assert_eq!(config.skip_paths.as_slice(), ["/a", "/b"]);
        assert_eq!(config.log_header_keys, vec!["X-Trace".to_string()]);
    }

    #[test]
    fn publisher_alias_is_accepted() {
        let config = Config::from_value(&json!({
            "publisher": { "enabled": true, "broker_urls": ["b:9092"], "topic": "t" }
        }));
        assert!(config.publisher.enabled);
        assert_eq!(config.publisher.topic, "t");
    }

    #[test]
    fn out_of_range_partition_falls_back() {
        let config = Config::from_value(&json!({
            "kafka": { "enabled": true, "partition": 1u64 << 40 }
        }));
        assert_eq!(config.publisher.partition, 0);

        let config = Config::from_value(&json!({
            "kafka": { "enabled": true, "partition": 1.5 }
        }));
        assert_eq!(config.publisher.partition, 0);
    }

    #[test]
    fn zero_timeout_falls_back() {
        let config = Config::from_value(&json!({ "kafka": { "timeout_ms": 0 } }));
        assert_eq!(config.publisher.timeout, DEFAULT_PUBLISH_TIMEOUT);
    }

    #[test]
    fn non_object_section_yields_defaults() {
        assert_eq!(Config::from_value(&json!([1, 2, 3])), Config::default());
        assert_eq!(Config::from_value(&json!("klog")), Config::default());
        assert_eq!(Config::from_extra(&json!(null)), Config::default());
    }

    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| json!(n)),
            any::<f64>().prop_map(|f| json!(f)),
            "[a-z_/]{0,8}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 24, 6, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                proptest::collection::btree_map(
                    prop_oneof![
                        Just("enabled".to_string()),
                        Just("skip_paths".to_string()),
                        Just("log_header_keys".to_string()),
                        Just("kafka".to_string()),
                        Just("broker_urls".to_string()),
                        Just("partition".to_string()),
                        "[a-z]{1,6}",
                    ],
                    inner,
                    0..6
                )
                .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_extraction_is_total(section in arb_json()) {
            let config = Config::from_value(&section);
            let wrapped = Config::from_extra(&json!({ PLUGIN_NAME: section }));
            prop_assert_eq!(config, wrapped);
        }
    }
}
