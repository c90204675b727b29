//! The State Store: atomic persistence of per-download resume records
//! (spec §4.B).

mod error;
mod sidecar;
mod state;

pub use error::{Result, StorageError};
pub use sidecar::{clean, delete, exists, list, save, sidecar_path, load, SIDECAR_SUFFIX};
pub use state::{Checksum, ChecksumAlgorithm, Chunk, ChunkStatus, State, SCHEMA_VERSION};
