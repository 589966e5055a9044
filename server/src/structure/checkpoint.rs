//! Registry checkpoint file.
//!
//! The checkpoint lists every built structure and the file backing it, so a
//! restarted server can reopen them without rebuilding. It is a single
//! protobuf-encoded `RepositoryState`, replaced atomically by writing a
//! temporary file and renaming it over the old one.

use std::fs;
use std::io::Write;
use std::path::Path;

use prost::Message;

use crate::proto;

/// Checkpoint file name inside the data directory.
pub const STATE_FILE: &str = "registry.state";

/// Errors reading or writing a checkpoint.
#[derive(Debug)]
pub enum CheckpointError {
    Io(std::io::Error),
    Decode(prost::DecodeError),
}

impl std::fmt::Display for CheckpointError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "checkpoint I/O error: {e}"),
            Self::Decode(e) => write!(f, "checkpoint is not a valid registry state: {e}"),
        }
    }
}

impl std::error::Error for CheckpointError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Decode(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for CheckpointError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<prost::DecodeError> for CheckpointError {
    fn from(err: prost::DecodeError) -> Self {
        Self::Decode(err)
    }
}

/// Write `state` to `path`, replacing any previous checkpoint.
pub fn save(path: &Path, state: &proto::RepositoryState) -> Result<(), CheckpointError> {
    let tmp = path.with_extension("state.tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&state.encode_to_vec())?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Read the checkpoint at `path`, or `None` if there is none.
pub fn load(path: &Path) -> Result<Option<proto::RepositoryState>, CheckpointError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(proto::RepositoryState::decode(bytes.as_slice())?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join(STATE_FILE);
        let state = proto::RepositoryState {
            structures: vec![proto::SavedStructure {
                name: "city.sensors".to_string(),
                file_name: "city.sensors.1.0.tree".to_string(),
                payload_type: proto::PayloadType::IntPayload.into(),
                built_at_ms: 1,
            }],
            saved_at_ms: 2,
        };

        save(&path, &state).expect("save");
        assert_eq!(load(&path).expect("load"), Some(state));
        assert!(!path.with_extension("state.tmp").exists());
    }

    #[test]
    fn test_missing_checkpoint_is_none() {
        let dir = tempdir().expect("create temp dir");
        assert_eq!(load(&dir.path().join(STATE_FILE)).expect("load"), None);
    }

    #[test]
    fn test_garbage_checkpoint_is_rejected() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join(STATE_FILE);
        fs::write(&path, [0xff, 0xff, 0xff]).expect("write");
        assert!(matches!(load(&path), Err(CheckpointError::Decode(_))));
    }
}
