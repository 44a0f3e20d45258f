//! Query fingerprints and descriptors.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use xxhash_rust::xxh3::xxh3_64;

/// Identity of a logical query; equal fingerprints never run concurrently
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Fingerprint of a JSON query payload.
    ///
    /// Object keys are serialized in sorted order, so payloads that differ
    /// only in key order share a fingerprint.
    pub fn of_payload(payload: &Value) -> Self {
        let canonical = payload.to_string();
        Self(format!("{:016x}", xxh3_64(canonical.as_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Fingerprint {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Fingerprint {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<Fingerprint> for String {
    fn from(value: Fingerprint) -> Self {
        value.0
    }
}

/// What an operator sees about a running query
pub trait QueryDescriptor {
    /// Name of the metric being queried
    fn metric_name(&self) -> &str;

    /// The query as submitted
    fn query_json(&self) -> Value;
}

/// Descriptor for a query over a single metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMetric {
    pub name: String,
    pub query: Value,
}

impl QueryMetric {
    pub fn new(name: impl Into<String>, query: Value) -> Self {
        Self {
            name: name.into(),
            query,
        }
    }

    /// Fingerprint of the query payload
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of_payload(&self.query)
    }
}

impl QueryDescriptor for QueryMetric {
    fn metric_name(&self) -> &str {
        &self.name
    }

    fn query_json(&self) -> Value {
        self.query.clone()
    }
}
