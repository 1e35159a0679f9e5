//! Serializable view of a compilation after splitting

use serde::Serialize;

use super::{ChunkId, Compilation, ModuleId, RuntimeFeature};
use crate::loader::runtime::{bootstrap_source, hold_call, BootstrapPatch};
use crate::loader::RenderOptions;
use crate::utils::hash_content;

/// One chunk of the resulting graph
#[derive(Debug, Clone, Serialize)]
pub struct ChunkReport {
    pub id: ChunkId,
    pub name: Option<String>,
    pub modules: Vec<String>,
    pub entry_module: Option<ModuleId>,
    pub parents: Vec<ChunkId>,
    pub children: Vec<ChunkId>,
    pub initial: bool,
    pub runtime: bool,
    pub awaits_resolve: bool,

    /// Call a held chunk's file makes before registering its modules
    pub hold: Option<String>,

    /// Sum of module sizes in bytes
    pub size: usize,

    /// Hash of the ordered module list
    pub hash: String,
}

/// A synthesized loader and its generated source
#[derive(Debug, Clone, Serialize)]
pub struct LoaderReport {
    pub module: ModuleId,
    pub identifier: String,
    pub chunks: Vec<ChunkId>,
    pub source: String,
}

/// Everything a downstream consumer needs from one build
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub chunks: Vec<ChunkReport>,
    pub entrypoints: Vec<(String, Vec<ChunkId>)>,
    pub loaders: Vec<LoaderReport>,
    pub runtime: Vec<RuntimeFeature>,

    /// Bootstrap additions, when a split needs the wait/resolve registry
    pub bootstrap: Option<BootstrapPatch>,
}

impl BuildReport {
    pub fn new(compilation: &Compilation, render: &RenderOptions) -> Self {
        let chunks = compilation
            .chunks()
            .map(|chunk| {
                let modules: Vec<_> = chunk
                    .modules
                    .iter()
                    .filter_map(|&id| compilation.module(id).ok())
                    .collect();

                let identifiers: Vec<String> =
                    modules.iter().map(|m| m.identifier.clone()).collect();

                ChunkReport {
                    id: chunk.id,
                    name: chunk.name.clone(),
                    size: modules.iter().map(|m| m.size).sum(),
                    hash: hash_content(identifiers.join("\n").as_bytes()),
                    modules: identifiers,
                    entry_module: chunk.entry_module,
                    parents: chunk.parents.clone(),
                    children: chunk.children.clone(),
                    initial: compilation.is_initial(chunk.id),
                    runtime: compilation.has_runtime(chunk.id),
                    awaits_resolve: chunk.awaits_resolve,
                    hold: chunk
                        .awaits_resolve
                        .then(|| hold_call(&render.globals, &[chunk.id])),
                }
            })
            .collect();

        let loaders = compilation
            .modules()
            .filter_map(|module| {
                let program = module.program()?;
                Some(LoaderReport {
                    module: module.id,
                    identifier: module.identifier.clone(),
                    chunks: module.chunks.iter().copied().collect(),
                    source: program.render_for(compilation, render),
                })
            })
            .collect();

        Self {
            chunks,
            entrypoints: compilation
                .entrypoints()
                .iter()
                .map(|ep| (ep.name.clone(), ep.chunks.clone()))
                .collect(),
            loaders,
            runtime: compilation.runtime_features().iter().copied().collect(),
            bootstrap: compilation
                .runtime_features()
                .contains(&RuntimeFeature::WaitResolve)
                .then(|| bootstrap_source(&render.globals)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_sizes_and_hashes() {
        let mut compilation = Compilation::new();
        let app = compilation.add_chunk(Some("app"));
        let a = compilation.add_module("./a.js", 100);
        let b = compilation.add_module("./b.js", 50);
        compilation.add_module_to_chunk(a, app).unwrap();
        compilation.add_module_to_chunk(b, app).unwrap();
        compilation.add_entrypoint("app", vec![app]).unwrap();

        let report = BuildReport::new(&compilation, &RenderOptions::default());

        assert_eq!(report.chunks.len(), 1);
        assert_eq!(report.chunks[0].size, 150);
        assert_eq!(report.chunks[0].hash.len(), 16);
        assert!(report.chunks[0].runtime);
        assert!(report.loaders.is_empty());
        assert_eq!(report.entrypoints, vec![("app".to_string(), vec![app])]);
        assert!(report.bootstrap.is_none());
    }

    #[test]
    fn test_report_carries_bootstrap_when_required() {
        let mut compilation = Compilation::new();
        compilation.require_runtime(RuntimeFeature::WaitResolve);

        let report = BuildReport::new(&compilation, &RenderOptions::default());

        assert_eq!(report.runtime, vec![RuntimeFeature::WaitResolve]);
        let patch = report.bootstrap.unwrap();
        assert!(patch.globals.contains("__webpackWaitResolve"));
        assert!(patch.ensure_guard.contains("__waitResolveChunks[chunkId][2]"));
    }

    #[test]
    fn test_held_chunk_reports_its_hold_call() {
        let mut compilation = Compilation::new();
        let app = compilation.add_chunk(Some("app"));
        let lazy = compilation.add_chunk(None);
        for (path, chunk) in [("./app.js", app), ("./lazy.js", lazy)] {
            let module = compilation.add_module(path, 10);
            compilation.add_module_to_chunk(module, chunk).unwrap();
        }
        compilation.connect(app, lazy).unwrap();
        compilation.set_awaits_resolve(lazy, true).unwrap();
        compilation.add_entrypoint("app", vec![app]).unwrap();

        let report = BuildReport::new(&compilation, &RenderOptions::default());

        assert!(report.chunks[0].hold.is_none());
        assert_eq!(
            report.chunks[1].hold.as_deref(),
            Some(format!("window[\"__webpackWaitResolve\"]([{}]);", lazy).as_str())
        );
    }
}
