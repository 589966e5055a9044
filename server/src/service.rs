//! Request handling for the sampling API.
//!
//! `SamplingService` turns validated client commands into registry and
//! session operations and maps their errors onto `google.rpc.Code`. Every
//! method may block on disk I/O; async callers run them on the blocking
//! thread pool.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::proto::{self, google::rpc::Code};
use crate::query::{SessionError, SessionManager};
use crate::rtree::TreeError;
use crate::structure::{BuildError, BuildStage, RegistryError, StructureRegistry};
use crate::types::client_message::{BuildCommand, ClientMessagePayload, StartQueryCommand};
use crate::types::{BoundingBox, Record};

/// An operation failure, carrying its status code.
#[derive(Debug)]
pub enum ServiceError {
    Registry(RegistryError),
    Session(SessionError),
    /// A drop was requested while the structure is being built.
    DropWhileBuilding(String),
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Registry(e) => write!(f, "{e}"),
            Self::Session(e) => write!(f, "{e}"),
            Self::DropWhileBuilding(name) => write!(
                f,
                "structure '{name}' is being built and cannot be dropped"
            ),
        }
    }
}

impl std::error::Error for ServiceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Registry(e) => Some(e),
            Self::Session(e) => Some(e),
            Self::DropWhileBuilding(_) => None,
        }
    }
}

impl From<RegistryError> for ServiceError {
    fn from(err: RegistryError) -> Self {
        Self::Registry(err)
    }
}

impl From<SessionError> for ServiceError {
    fn from(err: SessionError) -> Self {
        Self::Session(err)
    }
}

impl ServiceError {
    /// Status code reported to the client.
    #[must_use]
    pub const fn code(&self) -> Code {
        match self {
            Self::Registry(e) => match e {
                RegistryError::InvalidName(_)
                | RegistryError::Build(BuildError {
                    stage: BuildStage::ParseInput,
                    ..
                })
                | RegistryError::Insert {
                    source: TreeError::PayloadMismatch { .. },
                    ..
                } => Code::InvalidArgument,
                RegistryError::AlreadyExists(_) | RegistryError::BuildInProgress(_) => {
                    Code::AlreadyExists
                }
                RegistryError::NotFound(_) | RegistryError::InputNotFound(_) => Code::NotFound,
                RegistryError::Build(_)
                | RegistryError::Insert { .. }
                | RegistryError::Checkpoint(_) => Code::Internal,
            },
            Self::Session(e) => match e {
                SessionError::NotFound { .. } => Code::NotFound,
                SessionError::AlreadyInFlight(_) => Code::Aborted,
                SessionError::StructureModified(_) => Code::FailedPrecondition,
                SessionError::Tree(_) => Code::Internal,
            },
            Self::DropWhileBuilding(_) => Code::PermissionDenied,
        }
    }

    #[must_use]
    pub fn to_status(&self) -> proto::google::rpc::Status {
        proto::google::rpc::Status {
            code: self.code().into(),
            message: self.to_string(),
            ..Default::default()
        }
    }
}

/// Logs regions that fall outside valid latitude/longitude ranges.
fn warn_on_bad_coordinates(structure: &str, region: &BoundingBox) {
    let lat = -90.0..=90.0;
    let lon = -180.0..=180.0;
    if !lat.contains(&region.min.x) || !lat.contains(&region.max.x) {
        warn!(
            structure,
            min = region.min.x,
            max = region.max.x,
            "Query latitude outside [-90, 90]"
        );
    }
    if !lon.contains(&region.min.y) || !lon.contains(&region.max.y) {
        warn!(
            structure,
            min = region.min.y,
            max = region.max.y,
            "Query longitude outside [-180, 180]"
        );
    }
}

/// The sampling API over a structure registry and a session table.
pub struct SamplingService {
    registry: Arc<StructureRegistry>,
    sessions: Arc<SessionManager>,
}

impl SamplingService {
    #[must_use]
    pub const fn new(registry: Arc<StructureRegistry>, sessions: Arc<SessionManager>) -> Self {
        Self { registry, sessions }
    }

    #[must_use]
    pub const fn registry(&self) -> &Arc<StructureRegistry> {
        &self.registry
    }

    #[must_use]
    pub const fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Run one command to completion.
    pub fn handle(
        &self,
        payload: ClientMessagePayload,
    ) -> Result<proto::server_response::Payload, ServiceError> {
        use proto::server_response::Payload;

        Ok(match payload {
            ClientMessagePayload::Build(cmd) => Payload::Build(self.build(&cmd)?),
            ClientMessagePayload::List => Payload::List(self.list()),
            ClientMessagePayload::Drop { name } => Payload::Drop(self.drop_structure(&name)?),
            ClientMessagePayload::Insert { name, records } => {
                Payload::Insert(self.insert(&name, records)?)
            }
            ClientMessagePayload::StartQuery(cmd) => Payload::StartQuery(self.start_query(&cmd)?),
            ClientMessagePayload::Query {
                query_id,
                max_elements,
            } => Payload::Query(self.query(query_id, max_elements)?),
        })
    }

    pub fn build(&self, cmd: &BuildCommand) -> Result<proto::BuildResponse, ServiceError> {
        let structure = self.registry.build(cmd)?;
        Ok(proto::BuildResponse {
            structure: Some(structure.info(structure.built_at_ms())),
        })
    }

    #[must_use]
    pub fn list(&self) -> proto::ListResponse {
        proto::ListResponse {
            structures: self.registry.list(),
        }
    }

    pub fn drop_structure(&self, name: &str) -> Result<proto::DropResponse, ServiceError> {
        self.registry.drop_structure(name).map_err(|e| match e {
            RegistryError::BuildInProgress(name) => ServiceError::DropWhileBuilding(name),
            e => ServiceError::Registry(e),
        })?;
        Ok(proto::DropResponse {})
    }

    pub fn insert(
        &self,
        name: &str,
        records: Vec<Record>,
    ) -> Result<proto::InsertResponse, ServiceError> {
        let inserted = self.registry.insert(name, records)?;
        Ok(proto::InsertResponse {
            inserted: inserted as u64,
        })
    }

    pub fn start_query(
        &self,
        cmd: &StartQueryCommand,
    ) -> Result<proto::StartQueryResponse, ServiceError> {
        let structure = self.registry.get(&cmd.structure)?;
        warn_on_bad_coordinates(&cmd.structure, &cmd.region);

        let started = self.sessions.start(
            structure,
            cmd.region,
            cmd.projection,
            cmd.suggested_ttl_secs,
        )?;
        info!(
            structure = %cmd.structure,
            query_id = started.id,
            region = ?cmd.region,
            elements_in_range = started.elements_in_range,
            ttl_secs = started.ttl_secs,
            "Started query"
        );
        Ok(proto::StartQueryResponse {
            query_id: started.id,
            elements_in_range: started.elements_in_range,
            ttl: started.ttl_secs,
        })
    }

    pub fn query(
        &self,
        query_id: u64,
        max_elements: u32,
    ) -> Result<proto::QueryResponse, ServiceError> {
        let started = Instant::now();
        let max = usize::try_from(max_elements).unwrap_or(usize::MAX);
        let page = self.sessions.fetch(query_id, max)?;
        info!(
            query_id,
            requested = max_elements,
            returned = page.elements.len(),
            elapsed = ?started.elapsed(),
            "Query page served"
        );
        Ok(page.to_proto())
    }
}
