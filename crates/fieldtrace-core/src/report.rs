//! Grouping finalized traces into reports.

use crate::trace::Trace;
use crate::wire;
use prost::Message;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Operation name used in query keys for anonymous operations.
pub const ANONYMOUS_OPERATION: &str = "-";

/// Grouping key derived from operation name and signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryKey(String);

impl QueryKey {
    pub fn new(operation_name: &str, signature: &str) -> Self {
        let operation = if operation_name.is_empty() {
            ANONYMOUS_OPERATION
        } else {
            operation_name
        };
        Self(format!("# {}\n{}", operation, signature))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Free-form report metadata, set once per flush.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportHeader {
    pub service: String,
    pub hostname: String,
    pub agent_version: String,
    pub service_version: String,
    pub runtime_version: String,
    pub uname: String,
    pub schema_tag: String,
    pub executable_schema_id: String,
    pub graph_ref: String,
}

/// A batch of traces grouped by query key, ready for transmission.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Report {
    pub header: ReportHeader,
    pub traces_per_query: BTreeMap<QueryKey, Vec<Trace>>,
}

impl Report {
    /// Groups `traces` by query key.
    ///
    /// Every trace lands in exactly one bucket, and traces keep their input
    /// order within a bucket.
    pub fn build(traces: Vec<Trace>, header: ReportHeader) -> Self {
        let mut traces_per_query: BTreeMap<QueryKey, Vec<Trace>> = BTreeMap::new();
        for trace in traces {
            traces_per_query
                .entry(trace.query_key())
                .or_default()
                .push(trace);
        }
        Self {
            header,
            traces_per_query,
        }
    }

    pub fn trace_count(&self) -> usize {
        self.traces_per_query.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.traces_per_query.is_empty()
    }

    pub fn get(&self, key: &QueryKey) -> Option<&[Trace]> {
        self.traces_per_query.get(key).map(Vec::as_slice)
    }

    pub fn to_wire(&self) -> wire::FullTracesReport {
        wire::FullTracesReport::from(self)
    }

    /// Serializes the report to its binary wire form.
    pub fn encode(&self) -> Vec<u8> {
        self.to_wire().encode_to_vec()
    }
}
