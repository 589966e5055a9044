//! Named sampling structures and their lifecycle.
//!
//! - `registry`: build, list, drop, insert, and checkpoint/restore
//! - `sampling`: one built structure and its R-tree
//! - `ingest`: bulk-load input parsing
//! - `checkpoint`: the persisted registry state

mod checkpoint;
mod ingest;
mod registry;
mod sampling;

pub use checkpoint::{CheckpointError, STATE_FILE};
pub use ingest::{IngestError, parse_line, read_records};
pub use registry::{
    BuildError, BuildErrorKind, BuildStage, RegistryConfig, RegistryError, StructureRegistry,
    validate_name,
};
pub use sampling::SamplingStructure;
