//! Protobuf messages of the collector's trace ingress.
//!
//! Field numbers follow the collector's `reports.proto`; only the fields this
//! crate populates are declared. Unknown fields are skipped by decoders, so
//! the subset stays wire compatible.

use crate::report::{Report, ReportHeader};
use crate::trace::{CachePolicy, CacheScope, HttpInfo, Location, Node, NodeError, Trace};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone, PartialEq, prost::Message)]
pub struct Timestamp {
    #[prost(int64, tag = "1")]
    pub seconds: i64,
    #[prost(int32, tag = "2")]
    pub nanos: i32,
}

impl Timestamp {
    pub fn as_nanos(&self) -> i128 {
        i128::from(self.seconds) * 1_000_000_000 + i128::from(self.nanos)
    }
}

impl From<SystemTime> for Timestamp {
    fn from(time: SystemTime) -> Self {
        match time.duration_since(UNIX_EPOCH) {
            Ok(d) => Self {
                seconds: d.as_secs() as i64,
                nanos: d.subsec_nanos() as i32,
            },
            // Clock before the epoch; clamp rather than encode a negative time.
            Err(_) => Self::default(),
        }
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ReportHeaderMessage {
    #[prost(string, tag = "3")]
    pub service: String,
    #[prost(string, tag = "5")]
    pub hostname: String,
    #[prost(string, tag = "6")]
    pub agent_version: String,
    #[prost(string, tag = "7")]
    pub service_version: String,
    #[prost(string, tag = "8")]
    pub runtime_version: String,
    #[prost(string, tag = "9")]
    pub uname: String,
    #[prost(string, tag = "10")]
    pub schema_tag: String,
    #[prost(string, tag = "11")]
    pub executable_schema_id: String,
    #[prost(string, tag = "12")]
    pub graph_ref: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ErrorLocation {
    #[prost(uint32, tag = "1")]
    pub line: u32,
    #[prost(uint32, tag = "2")]
    pub column: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct TraceError {
    #[prost(string, tag = "1")]
    pub message: String,
    #[prost(message, repeated, tag = "2")]
    pub location: Vec<ErrorLocation>,
    #[prost(string, tag = "4")]
    pub json: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct TraceNode {
    #[prost(oneof = "trace_node::Id", tags = "1, 2")]
    pub id: Option<trace_node::Id>,
    #[prost(string, tag = "3")]
    pub r#type: String,
    #[prost(uint64, tag = "8")]
    pub start_time: u64,
    #[prost(uint64, tag = "9")]
    pub end_time: u64,
    #[prost(message, repeated, tag = "11")]
    pub error: Vec<TraceError>,
    #[prost(message, repeated, tag = "12")]
    pub child: Vec<TraceNode>,
    #[prost(string, tag = "13")]
    pub parent_type: String,
    #[prost(string, tag = "14")]
    pub original_field_name: String,
}

pub mod trace_node {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Id {
        #[prost(string, tag = "1")]
        ResponseName(String),
        #[prost(uint32, tag = "2")]
        Index(u32),
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Details {
    #[prost(string, tag = "3")]
    pub operation_name: String,
    #[prost(btree_map = "string, string", tag = "4")]
    pub variables_json: BTreeMap<String, String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum HttpMethod {
    Unknown = 0,
    Options = 1,
    Get = 2,
    Head = 3,
    Post = 4,
    Put = 5,
    Delete = 6,
    Trace = 7,
    Connect = 8,
    Patch = 9,
}

impl HttpMethod {
    pub fn parse(method: &str) -> Self {
        match method.to_ascii_uppercase().as_str() {
            "OPTIONS" => HttpMethod::Options,
            "GET" => HttpMethod::Get,
            "HEAD" => HttpMethod::Head,
            "POST" => HttpMethod::Post,
            "PUT" => HttpMethod::Put,
            "DELETE" => HttpMethod::Delete,
            "TRACE" => HttpMethod::Trace,
            "CONNECT" => HttpMethod::Connect,
            "PATCH" => HttpMethod::Patch,
            _ => HttpMethod::Unknown,
        }
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Http {
    #[prost(enumeration = "HttpMethod", tag = "1")]
    pub method: i32,
    #[prost(string, tag = "2")]
    pub host: String,
    #[prost(string, tag = "3")]
    pub path: String,
    #[prost(uint32, tag = "6")]
    pub status_code: u32,
    #[prost(bool, tag = "8")]
    pub secure: bool,
    #[prost(string, tag = "9")]
    pub protocol: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Scope {
    Unknown = 0,
    Public = 1,
    Private = 2,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CachePolicyMessage {
    #[prost(enumeration = "Scope", tag = "1")]
    pub scope: i32,
    #[prost(int64, tag = "2")]
    pub max_age_ns: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct TraceMessage {
    #[prost(message, optional, tag = "3")]
    pub end_time: Option<Timestamp>,
    #[prost(message, optional, tag = "4")]
    pub start_time: Option<Timestamp>,
    #[prost(message, optional, tag = "6")]
    pub details: Option<Details>,
    #[prost(string, tag = "7")]
    pub client_name: String,
    #[prost(string, tag = "8")]
    pub client_version: String,
    #[prost(string, tag = "9")]
    pub client_address: String,
    #[prost(message, optional, tag = "10")]
    pub http: Option<Http>,
    #[prost(uint64, tag = "11")]
    pub duration_ns: u64,
    #[prost(message, optional, tag = "14")]
    pub root: Option<TraceNode>,
    #[prost(message, optional, tag = "18")]
    pub cache_policy: Option<CachePolicyMessage>,
    #[prost(string, tag = "19")]
    pub signature: String,
    #[prost(string, tag = "23")]
    pub client_reference_id: String,
    /// Already-encoded `QueryPlanNode`; a length-delimited field either way.
    #[prost(bytes = "vec", optional, tag = "26")]
    pub query_plan: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Traces {
    #[prost(message, repeated, tag = "1")]
    pub trace: Vec<TraceMessage>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct FullTracesReport {
    #[prost(message, optional, tag = "1")]
    pub header: Option<ReportHeaderMessage>,
    #[prost(btree_map = "string, message", tag = "5")]
    pub traces_per_query: BTreeMap<String, Traces>,
}

impl From<&Location> for ErrorLocation {
    fn from(location: &Location) -> Self {
        Self {
            line: location.line,
            column: location.column,
        }
    }
}

impl From<&NodeError> for TraceError {
    fn from(error: &NodeError) -> Self {
        Self {
            message: error.message.clone(),
            location: error.locations.iter().map(ErrorLocation::from).collect(),
            json: error.json.clone(),
        }
    }
}

impl From<&Node> for TraceNode {
    fn from(node: &Node) -> Self {
        use crate::path::Segment;

        let id = node.id.as_ref().map(|segment| match segment {
            Segment::Field(name) => trace_node::Id::ResponseName(name.clone()),
            Segment::Index(i) => trace_node::Id::Index(*i),
        });
        Self {
            id,
            r#type: node.field_type.clone(),
            start_time: node.start_time_ns,
            end_time: node.end_time_ns,
            error: node.errors.iter().map(TraceError::from).collect(),
            child: node.children.iter().map(TraceNode::from).collect(),
            parent_type: node.parent_type.clone(),
            original_field_name: node.original_field_name.clone(),
        }
    }
}

impl From<&HttpInfo> for Http {
    fn from(http: &HttpInfo) -> Self {
        Self {
            method: HttpMethod::parse(&http.method) as i32,
            host: http.host.clone(),
            path: http.path.clone(),
            status_code: http.status_code,
            secure: http.secure,
            protocol: http.protocol.clone(),
        }
    }
}

impl From<&CachePolicy> for CachePolicyMessage {
    fn from(policy: &CachePolicy) -> Self {
        let scope = match policy.scope {
            CacheScope::Unknown => Scope::Unknown,
            CacheScope::Public => Scope::Public,
            CacheScope::Private => Scope::Private,
        };
        Self {
            scope: scope as i32,
            max_age_ns: policy.max_age_ns,
        }
    }
}

impl From<&Trace> for TraceMessage {
    fn from(trace: &Trace) -> Self {
        Self {
            end_time: Some(trace.end_time.into()),
            start_time: Some(trace.start_time.into()),
            details: Some(Details {
                operation_name: trace.operation_name.clone(),
                variables_json: trace.variables.clone(),
            }),
            client_name: trace.client.name.clone(),
            client_version: trace.client.version.clone(),
            client_address: trace.client.address.clone(),
            http: trace.http.as_ref().map(Http::from),
            duration_ns: trace.duration_ns,
            root: Some(TraceNode::from(&trace.root)),
            cache_policy: trace.cache_policy.as_ref().map(CachePolicyMessage::from),
            signature: trace.signature.clone(),
            client_reference_id: trace.client.reference_id.clone(),
            query_plan: trace.query_plan.clone(),
        }
    }
}

impl From<&ReportHeader> for ReportHeaderMessage {
    fn from(header: &ReportHeader) -> Self {
        Self {
            service: header.service.clone(),
            hostname: header.hostname.clone(),
            agent_version: header.agent_version.clone(),
            service_version: header.service_version.clone(),
            runtime_version: header.runtime_version.clone(),
            uname: header.uname.clone(),
            schema_tag: header.schema_tag.clone(),
            executable_schema_id: header.executable_schema_id.clone(),
            graph_ref: header.graph_ref.clone(),
        }
    }
}

impl From<&Report> for FullTracesReport {
    fn from(report: &Report) -> Self {
        let traces_per_query = report
            .traces_per_query
            .iter()
            .map(|(key, traces)| {
                let trace = traces.iter().map(TraceMessage::from).collect();
                (key.as_str().to_string(), Traces { trace })
            })
            .collect();
        Self {
            header: Some(ReportHeaderMessage::from(&report.header)),
            traces_per_query,
        }
    }
}
