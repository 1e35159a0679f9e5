//! Graph consistency errors

use thiserror::Error;

use super::{ChunkId, ModuleId};

/// Errors raised by chunk graph operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("unknown module {0}")]
    UnknownModule(ModuleId),

    #[error("unknown chunk {0}")]
    UnknownChunk(ChunkId),

    #[error("chunk {0} has been removed from the compilation")]
    DetachedChunk(ChunkId),

    #[error("module {module} is not part of chunk {chunk}")]
    ModuleNotInChunk { module: ModuleId, chunk: ChunkId },

    #[error("chunk {0} has no modules to split")]
    EmptyChunk(ChunkId),

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error("graph invariant violated: {0}")]
    Invariant(String),
}
