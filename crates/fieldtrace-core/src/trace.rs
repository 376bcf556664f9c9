//! Trace record types.

use crate::path::{Path, Segment};
use crate::report::QueryKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::SystemTime;

/// Source position of an error within the query document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

impl Location {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// An error attached to a node of the response tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeError {
    /// Human readable error message.
    pub message: String,
    /// Structured error detail, serialized as JSON.
    pub json: String,
    /// Locations in the query document the error refers to.
    pub locations: Vec<Location>,
}

/// One point in a request's response tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Segment that reached this node from its parent; `None` for the root.
    pub id: Option<Segment>,
    /// Field name as declared in the schema (unaliased).
    pub original_field_name: String,
    /// Declared return type, e.g. `[User!]!`.
    pub field_type: String,
    /// Type the field was resolved on.
    pub parent_type: String,
    /// Resolver start offset in nanoseconds from request start.
    pub start_time_ns: u64,
    /// Resolver end offset in nanoseconds from request start.
    pub end_time_ns: u64,
    pub children: Vec<Node>,
    pub errors: Vec<NodeError>,
}

impl Node {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn with_id(segment: Segment) -> Self {
        Self {
            id: Some(segment),
            ..Default::default()
        }
    }

    /// Response field name, set only when reached through a field segment.
    pub fn response_name(&self) -> Option<&str> {
        self.id.as_ref().and_then(Segment::field_name)
    }

    /// List position, set only when reached through an index segment.
    pub fn index(&self) -> Option<u32> {
        self.id.as_ref().and_then(Segment::index)
    }

    pub fn child(&self, segment: &Segment) -> Option<&Node> {
        self.children
            .iter()
            .find(|c| c.id.as_ref() == Some(segment))
    }

    /// Follows `path` without creating anything.
    pub fn descend(&self, path: &Path) -> Option<&Node> {
        path.segments()
            .iter()
            .try_fold(self, |node, segment| node.child(segment))
    }

    /// Total number of nodes below this one.
    pub fn descendant_count(&self) -> usize {
        self.children
            .iter()
            .map(|c| 1 + c.descendant_count())
            .sum()
    }

    /// Orders children by segment at every level: fields by name, then
    /// list positions numerically.
    pub fn sort_children(&mut self) {
        self.children.sort_by(|a, b| a.id.cmp(&b.id));
        for child in &mut self.children {
            child.sort_children();
        }
    }
}

/// Client identification, usually filled in by a trace customizer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
    pub address: String,
    pub reference_id: String,
}

/// HTTP request details of the traced operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpInfo {
    /// Request method, e.g. `POST`.
    pub method: String,
    pub host: String,
    pub path: String,
    pub status_code: u32,
    pub secure: bool,
    pub protocol: String,
}

/// Cache visibility of a response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheScope {
    #[default]
    Unknown,
    Public,
    Private,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicy {
    pub scope: CacheScope,
    pub max_age_ns: i64,
}

/// The complete telemetry record for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    /// Canonical query text, the raw input as fallback, or empty when the
    /// input could not be parsed.
    pub signature: String,
    /// Operation name; empty for anonymous operations.
    pub operation_name: String,
    pub start_time: SystemTime,
    pub end_time: SystemTime,
    /// Elapsed time measured on a monotonic clock.
    pub duration_ns: u64,
    pub root: Node,
    /// Sanitized variables, each value serialized as JSON.
    pub variables: BTreeMap<String, String>,
    pub client: ClientInfo,
    pub http: Option<HttpInfo>,
    pub cache_policy: Option<CachePolicy>,
    /// Pre-encoded query plan message, passed through untouched.
    pub query_plan: Option<Vec<u8>>,
}

impl Trace {
    /// Grouping key used when aggregating traces into a report.
    pub fn query_key(&self) -> QueryKey {
        QueryKey::new(&self.operation_name, &self.signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_identity_accessors() {
        let field = Node::with_id(Segment::Field("users".into()));
        assert_eq!(field.response_name(), Some("users"));
        assert_eq!(field.index(), None);

        let item = Node::with_id(Segment::Index(3));
        assert_eq!(item.response_name(), None);
        assert_eq!(item.index(), Some(3));

        assert_eq!(Node::root().id, None);
    }

    #[test]
    fn test_sort_children_is_recursive() {
        let mut users = Node::with_id(Segment::Field("users".into()));
        users.children = vec![
            Node::with_id(Segment::Index(10)),
            Node::with_id(Segment::Index(2)),
        ];
        let mut root = Node::root();
        root.children = vec![users, Node::with_id(Segment::Field("admin".into()))];

        root.sort_children();

        assert_eq!(root.children[0].response_name(), Some("admin"));
        let users = &root.children[1];
        assert_eq!(users.children[0].index(), Some(2));
        assert_eq!(users.children[1].index(), Some(10));
        assert_eq!(root.descendant_count(), 4);
    }
}
