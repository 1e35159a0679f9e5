//! Chunk records of the chunk graph

use std::fmt;

use serde::{Deserialize, Serialize};

use super::ModuleId;

/// Stable identifier of a chunk, as assigned by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(pub usize);

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A chunk is an ordered group of modules that will be emitted as one bundle
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Chunk id
    pub id: ChunkId,

    /// Chunk name (anonymous for async-only bundles)
    pub name: Option<String>,

    /// Modules in emission order
    pub modules: Vec<ModuleId>,

    /// Chunks that must be loaded before this one
    pub parents: Vec<ChunkId>,

    /// Chunks this one loads or requires
    pub children: Vec<ChunkId>,

    /// Module executed when the chunk is loaded
    pub entry_module: Option<ModuleId>,

    /// Modules whose dynamic import created this chunk
    pub origins: Vec<ModuleId>,

    /// The chunk file registers itself with the wait/resolve registry
    pub awaits_resolve: bool,

    /// Removed from the compilation's chunk list
    pub detached: bool,
}

impl Chunk {
    pub fn new(id: ChunkId, name: Option<String>) -> Self {
        Self {
            id,
            name,
            modules: Vec::new(),
            parents: Vec::new(),
            children: Vec::new(),
            entry_module: None,
            origins: Vec::new(),
            awaits_resolve: false,
            detached: false,
        }
    }

    /// Name for display and for derived chunk names
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.id.to_string(),
        }
    }

    pub fn contains(&self, module: ModuleId) -> bool {
        self.modules.contains(&module)
    }

    /// Check if chunk is empty
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Number of modules in chunk
    pub fn len(&self) -> usize {
        self.modules.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_falls_back_to_id() {
        let named = Chunk::new(ChunkId(0), Some("app".to_string()));
        let anonymous = Chunk::new(ChunkId(7), None);

        assert_eq!(named.display_name(), "app");
        assert_eq!(anonymous.display_name(), "7");
        assert!(anonymous.is_empty());
    }
}
