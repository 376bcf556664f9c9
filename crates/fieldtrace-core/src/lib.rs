//! Core data model for fieldtrace.
//!
//! - [`Path`] and [`Segment`] address nodes of a response tree
//! - [`Node`] and [`Trace`] hold one request's telemetry
//! - [`tree`] folds path-addressed fragments into a single tree
//! - [`Report`] groups finished traces by [`QueryKey`]
//! - [`wire`] holds the protobuf messages sent to the collector
//!
//! # Example
//!
//! ```rust
//! use fieldtrace_core::{tree, Node, NodeData, Path};
//!
//! let mut root = Node::root();
//! tree::merge(&mut root, &Path::parse(["users", "0", "id"]), &NodeData::default());
//! tree::merge(&mut root, &Path::parse(["users", "1", "id"]), &NodeData::default());
//!
//! assert_eq!(root.children.len(), 1);
//! assert_eq!(root.children[0].children.len(), 2);
//! ```

mod path;
mod report;
mod trace;
pub mod tree;
pub mod wire;

pub use path::{Path, Segment};
pub use report::{QueryKey, Report, ReportHeader, ANONYMOUS_OPERATION};
pub use trace::{CachePolicy, CacheScope, ClientInfo, HttpInfo, Location, Node, NodeError, Trace};
pub use tree::NodeData;

use std::sync::Arc;

/// Error type returned by user-supplied callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Receiver of finalized traces.
///
/// Implementations must not block the caller; they run on the request path.
pub trait TraceSink: Send + Sync {
    fn submit(&self, trace: Trace);
}

impl<T: TraceSink + ?Sized> TraceSink for Arc<T> {
    fn submit(&self, trace: Trace) {
        (**self).submit(trace)
    }
}
