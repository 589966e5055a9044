//! Common helpers for end-to-end tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use crate::client_connection::ClientConnection;
use crate::proto::{self, google::rpc::Code};
use crate::query::{SessionConfig, SessionManager};
use crate::service::SamplingService;
use crate::storage::TimeSource;
use crate::structure::{RegistryConfig, StructureRegistry};
use crate::testing::ManualClock;

/// A client wired to a fresh service over a temporary data directory.
///
/// Time only moves through `clock`, so session expiry is deterministic.
pub struct TestClient {
    pub client: ClientConnection,
    pub runtime: tokio::runtime::Runtime,
    pub clock: Arc<ManualClock>,
    service: Arc<SamplingService>,
    dir: TempDir,
}

impl TestClient {
    /// Create a new test client with an empty registry.
    #[must_use]
    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    pub fn new() -> Self {
        #[allow(clippy::expect_used)]
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let clock = Arc::new(ManualClock::new(1_000));

        // Small nodes so a few hundred records span several levels.
        let mut config = RegistryConfig::new(dir.path().join("data"));
        config.leaf_capacity = 8;
        config.internal_capacity = 4;
        config.cache_pages = 16;

        let registry = Arc::new(StructureRegistry::new(
            config,
            Arc::clone(&clock) as Arc<dyn TimeSource>,
        ));
        let sessions = Arc::new(SessionManager::new(
            Arc::clone(&clock) as Arc<dyn TimeSource>,
            SessionConfig::default(),
        ));
        let service = Arc::new(SamplingService::new(registry, sessions));
        let client = ClientConnection::new(Arc::clone(&service));

        #[allow(clippy::expect_used)]
        let runtime = tokio::runtime::Runtime::new().expect("Failed to create runtime");

        Self {
            client,
            runtime,
            clock,
            service,
            dir,
        }
    }

    /// Send a message and return the response.
    pub fn send(&self, message: proto::ClientMessage) -> proto::ServerResponse {
        let response = self
            .runtime
            .block_on(async { self.client.handle_message(message).await });

        #[allow(clippy::expect_used)]
        response.response.expect("Response should be present")
    }

    /// Run a sweep of expired sessions at the current clock time.
    pub fn sweep(&self) -> usize {
        self.service.sessions().sweep_expired()
    }

    /// Run `f` while query `id` is checked out, as if a fetch on it were
    /// still running.
    pub fn with_fetch_in_progress<T>(&self, id: u64, f: impl FnOnce() -> T) -> T {
        #[allow(clippy::expect_used)]
        let held = self
            .service
            .sessions()
            .check_out(id)
            .expect("Query should be idle");
        let result = f();
        drop(held);
        result
    }

    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.dir.path().join("data")
    }

    /// Write an input file for a build and return its path.
    pub fn write_input(&self, file_name: &str, lines: &[String]) -> PathBuf {
        let path = self.dir.path().join(file_name);
        let mut contents = lines.join("\n");
        contents.push('\n');
        #[allow(clippy::expect_used)]
        std::fs::write(&path, contents).expect("Failed to write input file");
        path
    }

    /// Build `name` from `count` sensor rows and assert success.
    pub fn build_sensors(&self, name: &str, count: usize) -> proto::StructureInfo {
        let input = self.write_input(&format!("{name}.csv"), &sensor_rows(count));
        let resp = self.send(build_request(1, name, &input, true));
        assert_eq!(code(&resp), Code::Ok, "build failed: {resp:?}");
        match resp.payload {
            Some(proto::server_response::Payload::Build(build)) => {
                #[allow(clippy::expect_used)]
                build.structure.expect("Build response should carry the structure")
            }
            other => panic!("Expected Build response, got {other:?}"),
        }
    }

    /// Start a query over `name` covering every sensor row, returning its id.
    pub fn start_full_query(&self, name: &str) -> u64 {
        let resp = self.send(start_query_request(
            2,
            name,
            (0.0, 0.0, 0),
            (90.0, 180.0, i64::MAX),
            (true, true, true),
            0,
        ));
        start_query_payload(&resp).query_id
    }
}

/// Sensor rows `oid,x,y,time` spread over a 10x10 grid.
///
/// Row `i` has oid `i + 1`, so every oid is non-empty and unique.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn sensor_rows(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| {
            let x = (i % 10) as f32 + 0.5;
            let y = ((i / 10) % 10) as f32 + 0.5;
            format!("{:024x},{x},{y},{}", i + 1, i + 1)
        })
        .collect()
}

/// Decode a 12-byte oid back into the row number it was written from.
#[must_use]
pub fn oid_number(oid: &[u8]) -> u128 {
    oid.iter().fold(0u128, |acc, b| (acc << 8) | u128::from(*b))
}

#[must_use]
pub fn code(resp: &proto::ServerResponse) -> Code {
    resp.status
        .as_ref()
        .and_then(|status| Code::try_from(status.code).ok())
        .unwrap_or(Code::Unknown)
}

#[must_use]
pub fn message(resp: &proto::ServerResponse) -> &str {
    resp.status
        .as_ref()
        .map_or("", |status| status.message.as_str())
}

#[must_use]
pub fn build_request(
    request_id: u32,
    name: &str,
    input: &Path,
    force: bool,
) -> proto::ClientMessage {
    proto::ClientMessage {
        request_id: Some(request_id),
        payload: Some(proto::client_message::Payload::Build(proto::BuildRequest {
            name: name.to_string(),
            force,
            payload_type: proto::PayloadType::NoPayload.into(),
            input_location: input.display().to_string(),
            remove_input: false,
        })),
    }
}

#[must_use]
pub fn list_request(request_id: u32) -> proto::ClientMessage {
    proto::ClientMessage {
        request_id: Some(request_id),
        payload: Some(proto::client_message::Payload::List(proto::ListRequest {})),
    }
}

#[must_use]
pub fn drop_request(request_id: u32, name: &str) -> proto::ClientMessage {
    proto::ClientMessage {
        request_id: Some(request_id),
        payload: Some(proto::client_message::Payload::Drop(proto::DropRequest {
            name: name.to_string(),
        })),
    }
}

#[must_use]
pub fn insert_request(
    request_id: u32,
    name: &str,
    elements: Vec<proto::Element>,
) -> proto::ClientMessage {
    proto::ClientMessage {
        request_id: Some(request_id),
        payload: Some(proto::client_message::Payload::Insert(proto::InsertRequest {
            name: name.to_string(),
            elements,
        })),
    }
}

/// Start a query over the box `min..=max`, with `(oid, location, time)`
/// selecting the returned fields.
#[must_use]
pub fn start_query_request(
    request_id: u32,
    name: &str,
    min: (f32, f32, i64),
    max: (f32, f32, i64),
    fields: (bool, bool, bool),
    ttl: u32,
) -> proto::ClientMessage {
    proto::ClientMessage {
        request_id: Some(request_id),
        payload: Some(proto::client_message::Payload::StartQuery(
            proto::StartQueryRequest {
                structure_name: name.to_string(),
                min_point: Some(proto::Point {
                    x: min.0,
                    y: min.1,
                    time: min.2,
                }),
                max_point: Some(proto::Point {
                    x: max.0,
                    y: max.1,
                    time: max.2,
                }),
                return_oid: fields.0,
                return_location: fields.1,
                return_time: fields.2,
                suggested_ttl: ttl,
            },
        )),
    }
}

#[must_use]
pub fn query_request(request_id: u32, query_id: u64, count: u32) -> proto::ClientMessage {
    proto::ClientMessage {
        request_id: Some(request_id),
        payload: Some(proto::client_message::Payload::Query(proto::QueryRequest {
            query_id,
            elements_to_return: count,
        })),
    }
}

/// Extract a successful StartQuery payload.
pub fn start_query_payload(resp: &proto::ServerResponse) -> proto::StartQueryResponse {
    assert_eq!(code(resp), Code::Ok, "start query failed: {resp:?}");
    match &resp.payload {
        Some(proto::server_response::Payload::StartQuery(started)) => *started,
        other => panic!("Expected StartQuery response, got {other:?}"),
    }
}

/// Extract a successful Query payload.
pub fn query_payload(resp: &proto::ServerResponse) -> &proto::QueryResponse {
    assert_eq!(code(resp), Code::Ok, "query failed: {resp:?}");
    match &resp.payload {
        Some(proto::server_response::Payload::Query(page)) => page,
        other => panic!("Expected Query response, got {other:?}"),
    }
}
