//! Wire messages exchanged over the `/ws` endpoint and the registry
//! checkpoint format.
//!
//! Messages are declared directly with `prost` derives so the crate builds
//! without a `protoc` toolchain. Field tags are part of the wire contract
//! and must never be renumbered.

#![allow(clippy::pedantic, clippy::nursery)]

pub mod google {
    pub mod rpc {
        /// The `google.rpc.Status` message.
        #[derive(Clone, PartialEq, prost::Message)]
        pub struct Status {
            #[prost(int32, tag = "1")]
            pub code: i32,
            #[prost(string, tag = "2")]
            pub message: String,
            #[prost(message, repeated, tag = "3")]
            pub details: Vec<prost_types::Any>,
        }

        /// The canonical `google.rpc.Code` values.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
        #[repr(i32)]
        pub enum Code {
            Ok = 0,
            Cancelled = 1,
            Unknown = 2,
            InvalidArgument = 3,
            DeadlineExceeded = 4,
            NotFound = 5,
            AlreadyExists = 6,
            PermissionDenied = 7,
            ResourceExhausted = 8,
            FailedPrecondition = 9,
            Aborted = 10,
            OutOfRange = 11,
            Unimplemented = 12,
            Internal = 13,
            Unavailable = 14,
            DataLoss = 15,
            Unauthenticated = 16,
        }
    }
}

/// Kind of auxiliary sample value carried by each record of a structure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum PayloadType {
    NoPayload = 0,
    IntPayload = 1,
    FloatPayload = 2,
}

/// A corner of a query region: two spatial axes and one temporal axis.
#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct Point {
    #[prost(float, tag = "1")]
    pub x: f32,
    #[prost(float, tag = "2")]
    pub y: f32,
    #[prost(int64, tag = "3")]
    pub time: i64,
}

#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct Location {
    #[prost(float, tag = "1")]
    pub x: f32,
    #[prost(float, tag = "2")]
    pub y: f32,
}

/// A single record. Every field is optional: absent fields were either not
/// requested or hold the empty sentinel value.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Element {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub oid: Option<Vec<u8>>,
    #[prost(message, optional, tag = "2")]
    pub location: Option<Location>,
    #[prost(int64, optional, tag = "3")]
    pub time: Option<i64>,
    #[prost(int64, optional, tag = "4")]
    pub int_payload: Option<i64>,
    #[prost(float, optional, tag = "5")]
    pub float_payload: Option<f32>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct StructureInfo {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(uint64, tag = "2")]
    pub count: u64,
    #[prost(enumeration = "PayloadType", tag = "3")]
    pub payload_type: i32,
    /// Seconds since the structure was last built, `-1` while building.
    #[prost(int64, tag = "4")]
    pub sec_since_rebuild: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct BuildRequest {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(bool, tag = "2")]
    pub force: bool,
    #[prost(enumeration = "PayloadType", tag = "3")]
    pub payload_type: i32,
    #[prost(string, tag = "4")]
    pub input_location: String,
    #[prost(bool, tag = "5")]
    pub remove_input: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct BuildResponse {
    #[prost(message, optional, tag = "1")]
    pub structure: Option<StructureInfo>,
}

#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct ListRequest {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ListResponse {
    #[prost(message, repeated, tag = "1")]
    pub structures: Vec<StructureInfo>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DropRequest {
    #[prost(string, tag = "1")]
    pub name: String,
}

#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct DropResponse {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct InsertRequest {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, repeated, tag = "2")]
    pub elements: Vec<Element>,
}

#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct InsertResponse {
    #[prost(uint64, tag = "1")]
    pub inserted: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct StartQueryRequest {
    #[prost(string, tag = "1")]
    pub structure_name: String,
    #[prost(message, optional, tag = "2")]
    pub min_point: Option<Point>,
    #[prost(message, optional, tag = "3")]
    pub max_point: Option<Point>,
    #[prost(bool, tag = "4")]
    pub return_oid: bool,
    #[prost(bool, tag = "5")]
    pub return_location: bool,
    #[prost(bool, tag = "6")]
    pub return_time: bool,
    /// Requested idle timeout in seconds; `0` selects the server default.
    #[prost(uint32, tag = "7")]
    pub suggested_ttl: u32,
}

#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct StartQueryResponse {
    #[prost(uint64, tag = "1")]
    pub query_id: u64,
    #[prost(uint64, tag = "2")]
    pub elements_in_range: u64,
    /// The idle timeout actually granted, in seconds.
    #[prost(uint32, tag = "3")]
    pub ttl: u32,
}

#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct QueryRequest {
    #[prost(uint64, tag = "1")]
    pub query_id: u64,
    #[prost(uint32, tag = "2")]
    pub elements_to_return: u32,
}

#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct Statistics {
    #[prost(uint64, tag = "1")]
    pub count: u64,
    #[prost(double, tag = "2")]
    pub mean: f64,
    #[prost(double, tag = "3")]
    pub variance: f64,
    #[prost(double, tag = "4")]
    pub min: f64,
    #[prost(double, tag = "5")]
    pub max: f64,
}

#[derive(Clone, Copy, PartialEq, prost::Message)]
pub struct ElementStatistics {
    #[prost(message, optional, tag = "1")]
    pub x: Option<Statistics>,
    #[prost(message, optional, tag = "2")]
    pub y: Option<Statistics>,
    #[prost(message, optional, tag = "3")]
    pub time: Option<Statistics>,
    #[prost(message, optional, tag = "4")]
    pub payload: Option<Statistics>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct QueryResponse {
    #[prost(message, repeated, tag = "1")]
    pub elements: Vec<Element>,
    #[prost(uint64, tag = "2")]
    pub sample_count_last: u64,
    #[prost(uint64, tag = "3")]
    pub sample_count_total: u64,
    #[prost(bool, tag = "4")]
    pub done: bool,
    #[prost(message, optional, tag = "5")]
    pub stats_last: Option<ElementStatistics>,
    #[prost(message, optional, tag = "6")]
    pub stats_total: Option<ElementStatistics>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ClientMessage {
    #[prost(uint32, optional, tag = "1")]
    pub request_id: Option<u32>,
    #[prost(oneof = "client_message::Payload", tags = "2, 3, 4, 5, 6, 7")]
    pub payload: Option<client_message::Payload>,
}

pub mod client_message {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Payload {
        #[prost(message, tag = "2")]
        Build(super::BuildRequest),
        #[prost(message, tag = "3")]
        List(super::ListRequest),
        #[prost(message, tag = "4")]
        Drop(super::DropRequest),
        #[prost(message, tag = "5")]
        Insert(super::InsertRequest),
        #[prost(message, tag = "6")]
        StartQuery(super::StartQueryRequest),
        #[prost(message, tag = "7")]
        Query(super::QueryRequest),
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ServerMessage {
    #[prost(message, optional, tag = "1")]
    pub response: Option<ServerResponse>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ServerResponse {
    #[prost(uint32, optional, tag = "1")]
    pub request_id: Option<u32>,
    #[prost(message, optional, tag = "2")]
    pub status: Option<google::rpc::Status>,
    #[prost(oneof = "server_response::Payload", tags = "3, 4, 5, 6, 7, 8")]
    pub payload: Option<server_response::Payload>,
}

pub mod server_response {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Payload {
        #[prost(message, tag = "3")]
        Build(super::BuildResponse),
        #[prost(message, tag = "4")]
        List(super::ListResponse),
        #[prost(message, tag = "5")]
        Drop(super::DropResponse),
        #[prost(message, tag = "6")]
        Insert(super::InsertResponse),
        #[prost(message, tag = "7")]
        StartQuery(super::StartQueryResponse),
        #[prost(message, tag = "8")]
        Query(super::QueryResponse),
    }
}

/// One registry entry in a checkpoint.
#[derive(Clone, PartialEq, prost::Message)]
pub struct SavedStructure {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub file_name: String,
    #[prost(enumeration = "PayloadType", tag = "3")]
    pub payload_type: i32,
    #[prost(uint64, tag = "4")]
    pub built_at_ms: u64,
}

/// Registry checkpoint written to `{data_dir}/registry.state`.
#[derive(Clone, PartialEq, prost::Message)]
pub struct RepositoryState {
    #[prost(message, repeated, tag = "1")]
    pub structures: Vec<SavedStructure>,
    #[prost(uint64, tag = "2")]
    pub saved_at_ms: u64,
}
