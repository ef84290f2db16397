//! # Configuration
//!
//! Explicit, immutable configuration for a cache instance. A [`CorralConfig`]
//! is constructed once, validated, and threaded through every component by
//! value. It also owns the store key layout and pub/sub topic naming so that
//! all namespacing decisions live in one place.
//!
//! ## Key layout (`:`-joined segments)
//!
//! - `{scope}:meta` — hash of all metadata records, field `{uuid}:{provider}`
//! - `{scope}:cycle` — sorted set of `uuid -> last-write unix timestamp`
//! - `{scope}:atomic:{uuid}` — exclusion-guard lock flag
//! - `{scope}:{name}:{uuid}` — item sequence for one collection
//!
//! ## Examples
//!
//! ```rust
//! use corral::CorralConfig;
//!
//! let config = CorralConfig::new()
//!     .with_scope("app1")
//!     .with_name("search")
//!     .with_timeout_ms(2_000);
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.meta_key(), "app1:meta");
//! assert_eq!(config.items_key("abc"), "app1:search:abc");
//! assert_eq!(config.request_pattern(), "app1:search:request:*");
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{CorralError, Result};

/// Configuration for one logical cache instance
///
/// `scope` namespaces every store key; `name` distinguishes logical cache
/// instances sharing one store. Both feed the key layout and topic names, so
/// neither may contain the `:` delimiter or the `*` wildcard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorralConfig {
    /// Namespace prefix for all store keys and topics
    pub scope: String,

    /// Sub-namespace distinguishing logical cache instances sharing a store
    pub name: String,

    /// Store endpoint host
    pub host: String,

    /// Store endpoint port
    pub port: u16,

    /// How long a cache-miss `load` waits for a producer, in milliseconds
    pub timeout_ms: u64,

    /// Read-ahead threshold: a refill request is emitted when the requested
    /// window's upper bound plus this buffer exceeds the loaded estimate
    pub buffer: u64,

    /// Exclusion-guard lock lifetime, in seconds
    pub ttl_seconds: u64,

    /// Retention-sweeper period, in seconds
    pub interval_seconds: u64,

    /// Retention window: collections not refreshed within this many seconds
    /// are eligible for sweeping
    pub retention_seconds: u64,
}

impl Default for CorralConfig {
    fn default() -> Self {
        Self {
            scope: "corral".to_string(),
            name: "default".to_string(),
            host: "127.0.0.1".to_string(),
            port: 6379,
            timeout_ms: 5_000,
            buffer: 100,
            ttl_seconds: 5,
            interval_seconds: 60,
            retention_seconds: 3_600,
        }
    }
}

impl CorralConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the namespace prefix
    pub fn with_scope<S: Into<String>>(mut self, scope: S) -> Self {
        self.scope = scope.into();
        self
    }

    /// Set the logical cache instance name
    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    /// Set the store endpoint
    pub fn with_endpoint<S: Into<String>>(mut self, host: S, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    /// Set the load-miss wait bound in milliseconds
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set the read-ahead buffer threshold
    pub fn with_buffer(mut self, buffer: u64) -> Self {
        self.buffer = buffer;
        self
    }

    /// Set the exclusion-guard lock lifetime in seconds
    pub fn with_ttl_seconds(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = ttl_seconds;
        self
    }

    /// Set the sweeper period in seconds
    pub fn with_interval_seconds(mut self, interval_seconds: u64) -> Self {
        self.interval_seconds = interval_seconds;
        self
    }

    /// Set the retention window in seconds
    pub fn with_retention_seconds(mut self, retention_seconds: u64) -> Self {
        self.retention_seconds = retention_seconds;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        for (label, value) in [("scope", &self.scope), ("name", &self.name)] {
            if value.is_empty() {
                return Err(CorralError::config(format!("{label} must not be empty")));
            }
            if value.contains(':') || value.contains('*') {
                return Err(CorralError::config(format!(
                    "{label} must not contain ':' or '*': {value}"
                )));
            }
        }

        if self.timeout_ms == 0 {
            return Err(CorralError::config("timeout_ms must be greater than zero"));
        }
        if self.ttl_seconds == 0 {
            return Err(CorralError::config("ttl_seconds must be greater than zero"));
        }
        if self.interval_seconds == 0 {
            return Err(CorralError::config(
                "interval_seconds must be greater than zero",
            ));
        }
        if self.retention_seconds == 0 {
            return Err(CorralError::config(
                "retention_seconds must be greater than zero",
            ));
        }

        Ok(())
    }

    /// Connection URL for the backing store
    pub fn store_url(&self) -> String {
        format!("redis://{}:{}", self.host, self.port)
    }

    /// Key of the hash holding all metadata records
    pub fn meta_key(&self) -> String {
        format!("{}:meta", self.scope)
    }

    /// Key of the sorted set mapping uuid to last-write timestamp
    pub fn cycle_key(&self) -> String {
        format!("{}:cycle", self.scope)
    }

    /// Key of the exclusion-guard lock flag for a uuid
    pub fn atomic_key(&self, uuid: &str) -> String {
        format!("{}:atomic:{}", self.scope, uuid)
    }

    /// Key of the item sequence for a collection
    pub fn items_key(&self, uuid: &str) -> String {
        format!("{}:{}:{}", self.scope, self.name, uuid)
    }

    /// Producer-request topic for a uuid
    pub fn request_topic(&self, uuid: &str) -> String {
        format!("{}:{}:request:{}", self.scope, self.name, uuid)
    }

    /// Wildcard pattern matching every producer-request topic of this instance
    pub fn request_pattern(&self) -> String {
        format!("{}:{}:request:*", self.scope, self.name)
    }

    /// Call-scoped result topic used to wake one pending `load`
    pub fn result_topic(&self, uuid: &str, call_id: &str) -> String {
        format!("{}:result:{}:{}", self.name, uuid, call_id)
    }
}
