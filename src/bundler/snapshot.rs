//! Serialized chunk graph handed over by the host
//!
//! Indices in a snapshot refer to positions in its own `modules` and
//! `chunks` arrays, which become the module and chunk ids of the
//! resulting [`Compilation`].

use serde::{Deserialize, Serialize};

use super::{ChunkId, Compilation, GraphError, ModuleId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleSnapshot {
    /// Resource identifier
    pub identifier: String,

    /// Size in bytes
    #[serde(default)]
    pub size: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkSnapshot {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub modules: Vec<usize>,

    #[serde(default)]
    pub entry_module: Option<usize>,

    #[serde(default)]
    pub parents: Vec<usize>,

    /// Modules whose dynamic import loads this chunk
    #[serde(default)]
    pub origins: Vec<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryPointSnapshot {
    pub name: String,
    pub chunks: Vec<usize>,
}

/// A complete module/chunk graph
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphSnapshot {
    #[serde(default)]
    pub modules: Vec<ModuleSnapshot>,

    #[serde(default)]
    pub chunks: Vec<ChunkSnapshot>,

    #[serde(default)]
    pub entrypoints: Vec<EntryPointSnapshot>,
}

impl GraphSnapshot {
    /// Parse a snapshot from JSON
    pub fn from_json(json: &str) -> Result<Self, GraphError> {
        serde_json::from_str(json).map_err(|e| GraphError::Snapshot(e.to_string()))
    }

    /// Build the compilation described by this snapshot
    pub fn into_compilation(self) -> Result<Compilation, GraphError> {
        let mut compilation = Compilation::new();
        let module_count = self.modules.len();
        let chunk_count = self.chunks.len();

        let module_id = |index: usize| -> Result<ModuleId, GraphError> {
            if index < module_count {
                Ok(ModuleId(index))
            } else {
                Err(GraphError::Snapshot(format!("module index {} out of range", index)))
            }
        };
        let chunk_id = |index: usize| -> Result<ChunkId, GraphError> {
            if index < chunk_count {
                Ok(ChunkId(index))
            } else {
                Err(GraphError::Snapshot(format!("chunk index {} out of range", index)))
            }
        };

        for module in self.modules {
            compilation.add_module(module.identifier, module.size);
        }

        for (index, chunk) in self.chunks.iter().enumerate() {
            // Duplicate names would collapse two chunks into one
            let id = match &chunk.name {
                Some(name) if compilation.named_chunk(name).is_some() => {
                    return Err(GraphError::Snapshot(format!("duplicate chunk name '{}'", name)));
                }
                name => compilation.add_chunk(name.as_deref()),
            };
            debug_assert_eq!(id, ChunkId(index));
        }

        for (index, chunk) in self.chunks.iter().enumerate() {
            let id = ChunkId(index);

            for &module in &chunk.modules {
                compilation.add_module_to_chunk(module_id(module)?, id)?;
            }
            if let Some(entry) = chunk.entry_module {
                compilation.set_entry_module(id, Some(module_id(entry)?))?;
            }
            for &parent in &chunk.parents {
                compilation.connect(chunk_id(parent)?, id)?;
            }
            for &origin in &chunk.origins {
                compilation.add_origin(id, module_id(origin)?)?;
            }
        }

        for entrypoint in self.entrypoints {
            let chunks = entrypoint
                .chunks
                .iter()
                .map(|&index| chunk_id(index))
                .collect::<Result<Vec<_>, _>>()?;
            compilation.add_entrypoint(&entrypoint.name, chunks)?;
        }

        Ok(compilation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRAPH: &str = r#"{
        "modules": [
            { "identifier": "./app.js", "size": 1024 },
            { "identifier": "./lib/common.js", "size": 1024 },
            { "identifier": "./lib/lazy.js", "size": 2048 }
        ],
        "chunks": [
            { "name": "app", "modules": [0, 1], "entry_module": 0 },
            { "modules": [2], "parents": [0], "origins": [1] }
        ],
        "entrypoints": [ { "name": "app", "chunks": [0] } ]
    }"#;

    #[test]
    fn test_snapshot_builds_compilation() {
        let compilation = GraphSnapshot::from_json(GRAPH)
            .unwrap()
            .into_compilation()
            .unwrap();

        let app = compilation.named_chunk("app").unwrap();
        let lazy = ChunkId(1);

        assert_eq!(compilation.entry_module(app).unwrap(), Some(ModuleId(0)));
        assert_eq!(compilation.chunk(app).unwrap().children, vec![lazy]);
        assert_eq!(compilation.chunk(lazy).unwrap().origins, vec![ModuleId(1)]);
        assert!(compilation.has_runtime(app));
        assert!(!compilation.is_initial(lazy));
        compilation.check_invariants().unwrap();
    }

    #[test]
    fn test_snapshot_rejects_bad_indices() {
        let snapshot = GraphSnapshot {
            modules: vec![],
            chunks: vec![ChunkSnapshot {
                name: Some("app".into()),
                modules: vec![4],
                ..Default::default()
            }],
            entrypoints: vec![],
        };

        assert!(matches!(
            snapshot.into_compilation(),
            Err(GraphError::Snapshot(_))
        ));
    }

    #[test]
    fn test_snapshot_rejects_duplicate_names() {
        let chunk = ChunkSnapshot {
            name: Some("app".into()),
            ..Default::default()
        };
        let snapshot = GraphSnapshot {
            modules: vec![],
            chunks: vec![chunk.clone(), chunk],
            entrypoints: vec![],
        };

        assert!(snapshot.into_compilation().is_err());
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            GraphSnapshot::from_json("{ nope"),
            Err(GraphError::Snapshot(_))
        ));
    }
}
