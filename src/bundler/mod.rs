//! Host chunk graph model
//!
//! Modules and chunks live in arenas owned by a [`Compilation`] and refer to
//! each other through [`ModuleId`] / [`ChunkId`]. Every edge (parent/child,
//! chunk membership) is stored on both ends and only mutated through the
//! methods here, so the two sides never disagree.

mod chunk;
mod error;
mod graph;
mod report;
mod snapshot;

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::loader::LoaderProgram;

pub use chunk::{Chunk, ChunkId};
pub use error::GraphError;
pub use graph::{Module, ModuleId, ModuleKind};
pub use report::{BuildReport, ChunkReport, LoaderReport};
pub use snapshot::{ChunkSnapshot, EntryPointSnapshot, GraphSnapshot, ModuleSnapshot};

/// Runtime support the host bootstrap has to include
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuntimeFeature {
    /// Registry for chunks that signal readiness themselves
    WaitResolve,
}

/// The ordered chunk list of one user-declared entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    pub name: String,
    pub chunks: Vec<ChunkId>,
}

impl EntryPoint {
    /// Insert `chunk` right before `before`. Returns false if `before` is not listed.
    pub fn insert_chunk(&mut self, chunk: ChunkId, before: ChunkId) -> bool {
        if self.chunks.contains(&chunk) {
            return false;
        }

        match self.chunks.iter().position(|&id| id == before) {
            Some(index) => {
                self.chunks.insert(index, chunk);
                true
            }
            None => false,
        }
    }

    /// Put `chunk` in the position held by `old`
    pub fn replace_chunk(&mut self, chunk: ChunkId, old: ChunkId) -> bool {
        match self.chunks.iter().position(|&id| id == old) {
            Some(index) => {
                self.chunks[index] = chunk;
                true
            }
            None => false,
        }
    }
}

/// One build's module and chunk graph
#[derive(Debug, Clone, Default)]
pub struct Compilation {
    modules: Vec<Module>,
    chunks: Vec<Chunk>,

    /// Attached chunks, in compilation order
    chunk_order: Vec<ChunkId>,

    named_chunks: HashMap<String, ChunkId>,
    entrypoints: Vec<EntryPoint>,
    runtime_features: BTreeSet<RuntimeFeature>,
}

impl Compilation {
    /// Create a new empty compilation
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource-backed module
    pub fn add_module(&mut self, identifier: impl Into<String>, size: usize) -> ModuleId {
        let id = ModuleId(self.modules.len());
        self.modules.push(Module::new(id, identifier, size));
        id
    }

    /// Add a synthesized loader module
    pub fn add_loader_module(&mut self, name: &str, program: LoaderProgram) -> ModuleId {
        let id = ModuleId(self.modules.len());
        self.modules.push(Module::loader(id, name, program));
        id
    }

    /// Replace the program of a synthesized loader
    pub fn set_loader_program(&mut self, module: ModuleId, program: LoaderProgram) -> Result<(), GraphError> {
        let target = self.module_mut(module)?;
        if !target.is_loader() {
            return Err(GraphError::Invariant(format!("module {} is not a loader", module)));
        }

        target.size = program.render(&Default::default()).len();
        target.kind = ModuleKind::Loader(program);
        Ok(())
    }

    /// Add a chunk. A taken name yields the chunk that already carries it.
    pub fn add_chunk(&mut self, name: Option<&str>) -> ChunkId {
        if let Some(&existing) = name.and_then(|name| self.named_chunks.get(name)) {
            return existing;
        }

        let id = ChunkId(self.chunks.len());
        self.chunks.push(Chunk::new(id, name.map(str::to_string)));
        self.chunk_order.push(id);

        if let Some(name) = name {
            self.named_chunks.insert(name.to_string(), id);
        }

        id
    }

    /// Declare an entry point whose first chunk is `chunk`
    pub fn add_entrypoint(&mut self, name: &str, chunks: Vec<ChunkId>) -> Result<(), GraphError> {
        for &chunk in &chunks {
            self.attached(chunk)?;
        }

        self.entrypoints.push(EntryPoint {
            name: name.to_string(),
            chunks,
        });

        Ok(())
    }

    pub fn module(&self, id: ModuleId) -> Result<&Module, GraphError> {
        self.modules.get(id.0).ok_or(GraphError::UnknownModule(id))
    }

    fn module_mut(&mut self, id: ModuleId) -> Result<&mut Module, GraphError> {
        self.modules.get_mut(id.0).ok_or(GraphError::UnknownModule(id))
    }

    /// Get a chunk by id, detached or not
    pub fn chunk(&self, id: ChunkId) -> Result<&Chunk, GraphError> {
        self.chunks.get(id.0).ok_or(GraphError::UnknownChunk(id))
    }

    fn attached(&self, id: ChunkId) -> Result<&Chunk, GraphError> {
        let chunk = self.chunk(id)?;
        if chunk.detached {
            return Err(GraphError::DetachedChunk(id));
        }
        Ok(chunk)
    }

    fn attached_mut(&mut self, id: ChunkId) -> Result<&mut Chunk, GraphError> {
        let chunk = self.chunks.get_mut(id.0).ok_or(GraphError::UnknownChunk(id))?;
        if chunk.detached {
            return Err(GraphError::DetachedChunk(id));
        }
        Ok(chunk)
    }

    /// All modules ever added
    pub fn modules(&self) -> impl Iterator<Item = &Module> {
        self.modules.iter()
    }

    /// Attached chunks in compilation order
    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunk_order.iter().map(move |id| &self.chunks[id.0])
    }

    /// Ids of attached chunks in compilation order
    pub fn chunk_ids(&self) -> Vec<ChunkId> {
        self.chunk_order.clone()
    }

    pub fn named_chunk(&self, name: &str) -> Option<ChunkId> {
        self.named_chunks.get(name).copied()
    }

    pub fn entrypoints(&self) -> &[EntryPoint] {
        &self.entrypoints
    }

    pub fn entrypoint(&self, name: &str) -> Option<&EntryPoint> {
        self.entrypoints.iter().find(|ep| ep.name == name)
    }

    /// Entry points listing `chunk`
    pub fn entrypoints_of(&self, chunk: ChunkId) -> impl Iterator<Item = &EntryPoint> {
        self.entrypoints
            .iter()
            .filter(move |ep| ep.chunks.contains(&chunk))
    }

    /// The chunk carries the runtime of an entry point (it is loaded first)
    pub fn has_runtime(&self, chunk: ChunkId) -> bool {
        self.entrypoints
            .iter()
            .any(|ep| ep.chunks.first() == Some(&chunk))
    }

    /// The chunk is loaded eagerly as part of an entry point
    pub fn is_initial(&self, chunk: ChunkId) -> bool {
        self.entrypoints_of(chunk).next().is_some()
    }

    pub fn entry_module(&self, chunk: ChunkId) -> Result<Option<ModuleId>, GraphError> {
        Ok(self.chunk(chunk)?.entry_module)
    }

    /// Runtime chunks reached by walking up the parents of `chunk`
    pub fn entry_ancestors(&self, chunk: ChunkId) -> Vec<ChunkId> {
        let mut result = Vec::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([chunk]);

        while let Some(id) = queue.pop_front() {
            if !visited.insert(id) {
                continue;
            }

            if self.has_runtime(id) {
                result.push(id);
                continue;
            }

            if let Ok(current) = self.chunk(id) {
                queue.extend(current.parents.iter().copied());
            }
        }

        result
    }

    /// Link `parent` -> `child` on both ends
    pub fn connect(&mut self, parent: ChunkId, child: ChunkId) -> Result<(), GraphError> {
        self.attached(child)?;

        let parent_chunk = self.attached_mut(parent)?;
        if !parent_chunk.children.contains(&child) {
            parent_chunk.children.push(child);
        }

        let child_chunk = self.attached_mut(child)?;
        if !child_chunk.parents.contains(&parent) {
            child_chunk.parents.push(parent);
        }

        Ok(())
    }

    /// Remove the `parent` -> `child` link on both ends
    pub fn disconnect(&mut self, parent: ChunkId, child: ChunkId) -> Result<(), GraphError> {
        let parent_chunk = self.chunks.get_mut(parent.0).ok_or(GraphError::UnknownChunk(parent))?;
        parent_chunk.children.retain(|&id| id != child);

        let child_chunk = self.chunks.get_mut(child.0).ok_or(GraphError::UnknownChunk(child))?;
        child_chunk.parents.retain(|&id| id != parent);

        Ok(())
    }

    /// Add `module` to `chunk`, keeping the reverse index in step
    pub fn add_module_to_chunk(&mut self, module: ModuleId, chunk: ChunkId) -> Result<(), GraphError> {
        self.module(module)?;

        let target = self.attached_mut(chunk)?;
        if !target.contains(module) {
            target.modules.push(module);
        }

        self.module_mut(module)?.chunks.insert(chunk);
        Ok(())
    }

    /// Move `module` from one chunk to another. A moved entry module leaves
    /// `from` without one.
    pub fn move_module(&mut self, module: ModuleId, from: ChunkId, to: ChunkId) -> Result<(), GraphError> {
        self.attached(to)?;

        let source = self.chunks.get_mut(from.0).ok_or(GraphError::UnknownChunk(from))?;
        let Some(index) = source.modules.iter().position(|&id| id == module) else {
            return Err(GraphError::ModuleNotInChunk { module, chunk: from });
        };
        source.modules.remove(index);

        if source.entry_module == Some(module) {
            source.entry_module = None;
        }

        self.module_mut(module)?.chunks.remove(&from);
        self.add_module_to_chunk(module, to)
    }

    /// Designate the module executed when `chunk` loads
    pub fn set_entry_module(&mut self, chunk: ChunkId, module: Option<ModuleId>) -> Result<(), GraphError> {
        let target = self.attached_mut(chunk)?;

        if let Some(module) = module {
            if !target.contains(module) {
                return Err(GraphError::ModuleNotInChunk { module, chunk });
            }
        }

        target.entry_module = module;
        Ok(())
    }

    /// Record the modules whose dynamic import loads `chunk`
    pub fn add_origin(&mut self, chunk: ChunkId, module: ModuleId) -> Result<(), GraphError> {
        self.module(module)?;

        let target = self.attached_mut(chunk)?;
        if !target.origins.contains(&module) {
            target.origins.push(module);
        }

        Ok(())
    }

    pub fn set_awaits_resolve(&mut self, chunk: ChunkId, awaits: bool) -> Result<(), GraphError> {
        self.attached_mut(chunk)?.awaits_resolve = awaits;
        Ok(())
    }

    /// Remove a chunk from the chunk list and the name map and unlink every
    /// edge. Returns the former parents and children. Modules stay where
    /// they are; the caller moves them first.
    pub fn detach_chunk(&mut self, id: ChunkId) -> Result<(Vec<ChunkId>, Vec<ChunkId>), GraphError> {
        let chunk = self.attached(id)?;
        let parents = chunk.parents.clone();
        let children = chunk.children.clone();

        for &parent in &parents {
            self.disconnect(parent, id)?;
        }
        for &child in &children {
            self.disconnect(id, child)?;
        }

        self.chunk_order.retain(|&other| other != id);
        self.named_chunks.retain(|_, &mut other| other != id);

        let chunk = self.attached_mut(id)?;
        chunk.detached = true;

        debug!("Detached chunk {}", id);

        Ok((parents, children))
    }

    /// Splice `chunk` in front of `before` in every entry point listing it
    pub fn insert_chunk_before(&mut self, chunk: ChunkId, before: ChunkId) -> usize {
        self.entrypoints
            .iter_mut()
            .map(|ep| ep.insert_chunk(chunk, before))
            .filter(|&done| done)
            .count()
    }

    /// Put `chunk` into every entry point position held by `old`
    pub fn replace_chunk(&mut self, chunk: ChunkId, old: ChunkId) -> usize {
        self.entrypoints
            .iter_mut()
            .map(|ep| ep.replace_chunk(chunk, old))
            .filter(|&done| done)
            .count()
    }

    /// Chunks loaded, eagerly or on demand, for an entry point
    pub fn reachable_chunks(&self, entrypoint: &EntryPoint) -> BTreeSet<ChunkId> {
        let mut visited = BTreeSet::new();
        let mut queue: VecDeque<ChunkId> = entrypoint.chunks.iter().copied().collect();

        while let Some(id) = queue.pop_front() {
            if !visited.insert(id) {
                continue;
            }

            if let Ok(chunk) = self.chunk(id) {
                queue.extend(chunk.children.iter().copied());
            }
        }

        visited
    }

    /// Modules inside the chunks reachable from an entry point
    pub fn reachable_modules(&self, entrypoint: &EntryPoint) -> BTreeSet<ModuleId> {
        self.reachable_chunks(entrypoint)
            .into_iter()
            .filter_map(|id| self.chunk(id).ok())
            .flat_map(|chunk| chunk.modules.iter().copied())
            .collect()
    }

    pub fn require_runtime(&mut self, feature: RuntimeFeature) {
        self.runtime_features.insert(feature);
    }

    pub fn runtime_features(&self) -> &BTreeSet<RuntimeFeature> {
        &self.runtime_features
    }

    /// Verify the structural invariants every rewrite has to keep
    pub fn check_invariants(&self) -> Result<(), GraphError> {
        for chunk in self.chunks() {
            self.check_chunk(chunk)?;
        }

        for module in self.modules() {
            self.check_module(module)?;
        }

        let mut reachable = BTreeSet::new();
        for entrypoint in &self.entrypoints {
            for &chunk in &entrypoint.chunks {
                self.attached(chunk)?;
            }
            reachable.extend(self.reachable_chunks(entrypoint));
        }

        if !self.entrypoints.is_empty() {
            if let Some(orphan) = self.chunk_order.iter().find(|id| !reachable.contains(id)) {
                return Err(GraphError::Invariant(format!(
                    "chunk {} is not reachable from any entry point",
                    orphan
                )));
            }
        }

        Ok(())
    }

    /// Verify the invariants around `ids` and their direct neighbours only,
    /// so an inconsistency elsewhere in the graph does not mask a rewrite
    pub fn check_chunks(&self, ids: &[ChunkId]) -> Result<(), GraphError> {
        let mut scope = BTreeSet::new();
        for &id in ids {
            let chunk = self.attached(id)?;
            scope.insert(id);
            scope.extend(chunk.parents.iter().copied());
            scope.extend(chunk.children.iter().copied());
        }

        for &id in &scope {
            let chunk = self.attached(id)?;
            self.check_chunk(chunk)?;
            for &module in &chunk.modules {
                self.check_module(self.module(module)?)?;
            }
        }

        if !self.entrypoints.is_empty() {
            let reachable: BTreeSet<ChunkId> = self
                .entrypoints
                .iter()
                .flat_map(|entrypoint| self.reachable_chunks(entrypoint))
                .collect();

            if let Some(orphan) = ids.iter().find(|id| !reachable.contains(id)) {
                return Err(GraphError::Invariant(format!(
                    "chunk {} is not reachable from any entry point",
                    orphan
                )));
            }
        }

        Ok(())
    }

    fn check_chunk(&self, chunk: &Chunk) -> Result<(), GraphError> {
        if let Some(entry) = chunk.entry_module {
            if !chunk.contains(entry) {
                return Err(GraphError::Invariant(format!(
                    "entry module {} of chunk {} is not in the chunk",
                    entry, chunk.id
                )));
            }
        }

        for &child in &chunk.children {
            let other = self.attached(child)?;
            if !other.parents.contains(&chunk.id) {
                return Err(GraphError::Invariant(format!(
                    "chunk {} lists {} as child, but not the other way round",
                    chunk.id, child
                )));
            }
        }

        for &parent in &chunk.parents {
            let other = self.attached(parent)?;
            if !other.children.contains(&chunk.id) {
                return Err(GraphError::Invariant(format!(
                    "chunk {} lists {} as parent, but not the other way round",
                    chunk.id, parent
                )));
            }
        }

        for &module in &chunk.modules {
            if !self.module(module)?.chunks.contains(&chunk.id) {
                return Err(GraphError::Invariant(format!(
                    "module {} is missing chunk {} in its chunk index",
                    module, chunk.id
                )));
            }
        }

        Ok(())
    }

    fn check_module(&self, module: &Module) -> Result<(), GraphError> {
        for &chunk in &module.chunks {
            if !self.attached(chunk)?.contains(module.id) {
                return Err(GraphError::Invariant(format!(
                    "module {} claims chunk {} which does not hold it",
                    module.id, chunk
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_graph() -> (Compilation, ChunkId, Vec<ModuleId>) {
        let mut compilation = Compilation::new();
        let app = compilation.add_chunk(Some("app"));
        let modules: Vec<ModuleId> = ["./app.js", "./common.js", "./lib/xlass.js"]
            .iter()
            .map(|path| compilation.add_module(*path, 1024))
            .collect();

        for &module in &modules {
            compilation.add_module_to_chunk(module, app).unwrap();
        }
        compilation.set_entry_module(app, Some(modules[0])).unwrap();
        compilation.add_entrypoint("app", vec![app]).unwrap();

        (compilation, app, modules)
    }

    #[test]
    fn test_named_chunks_are_unique() {
        let mut compilation = Compilation::new();
        let first = compilation.add_chunk(Some("app"));
        let second = compilation.add_chunk(Some("app"));
        let anonymous = compilation.add_chunk(None);

        assert_eq!(first, second);
        assert_ne!(first, anonymous);
        assert_eq!(compilation.named_chunk("app"), Some(first));
        assert_eq!(compilation.chunk_ids().len(), 2);
    }

    #[test]
    fn test_move_module_updates_both_indices() {
        let (mut compilation, app, modules) = entry_graph();
        let other = compilation.add_chunk(None);
        compilation.connect(app, other).unwrap();

        compilation.move_module(modules[2], app, other).unwrap();

        assert!(!compilation.chunk(app).unwrap().contains(modules[2]));
        assert!(compilation.chunk(other).unwrap().contains(modules[2]));
        let index = &compilation.module(modules[2]).unwrap().chunks;
        assert_eq!(index.iter().copied().collect::<Vec<_>>(), vec![other]);
        compilation.check_invariants().unwrap();
    }

    #[test]
    fn test_moving_entry_module_clears_it() {
        let (mut compilation, app, modules) = entry_graph();
        let other = compilation.add_chunk(None);
        compilation.connect(app, other).unwrap();

        compilation.move_module(modules[0], app, other).unwrap();

        assert_eq!(compilation.entry_module(app).unwrap(), None);
    }

    #[test]
    fn test_move_module_not_in_chunk() {
        let (mut compilation, app, modules) = entry_graph();
        let other = compilation.add_chunk(None);

        let err = compilation.move_module(modules[0], other, app).unwrap_err();
        assert_eq!(err, GraphError::ModuleNotInChunk { module: modules[0], chunk: other });
    }

    #[test]
    fn test_set_entry_module_requires_membership() {
        let (mut compilation, _, _) = entry_graph();
        let other = compilation.add_chunk(None);
        let stray = compilation.add_module("./stray.js", 1);

        assert!(compilation.set_entry_module(other, Some(stray)).is_err());
    }

    #[test]
    fn test_runtime_and_initial_follow_entrypoints() {
        let (mut compilation, app, _) = entry_graph();
        let vendor = compilation.add_chunk(Some("vendor"));
        let lazy = compilation.add_chunk(None);
        compilation.connect(app, lazy).unwrap();
        compilation.connect(vendor, app).unwrap();

        assert!(compilation.has_runtime(app));
        assert_eq!(compilation.insert_chunk_before(vendor, app), 1);

        assert!(compilation.has_runtime(vendor));
        assert!(!compilation.has_runtime(app));
        assert!(compilation.is_initial(app));
        assert!(!compilation.is_initial(lazy));
        assert_eq!(compilation.entry_ancestors(lazy), vec![vendor]);
    }

    #[test]
    fn test_entry_ancestors_survive_cycles() {
        let (mut compilation, app, _) = entry_graph();
        let a = compilation.add_chunk(None);
        let b = compilation.add_chunk(None);
        compilation.connect(app, a).unwrap();
        compilation.connect(a, b).unwrap();
        compilation.connect(b, a).unwrap();

        assert_eq!(compilation.entry_ancestors(b), vec![app]);
    }

    #[test]
    fn test_detach_chunk_unlinks_everything() {
        let (mut compilation, app, _) = entry_graph();
        let lazy = compilation.add_chunk(None);
        compilation.connect(app, lazy).unwrap();

        let (parents, children) = compilation.detach_chunk(app).unwrap();

        assert!(parents.is_empty());
        assert_eq!(children, vec![lazy]);
        assert!(compilation.chunk(lazy).unwrap().parents.is_empty());
        assert_eq!(compilation.named_chunk("app"), None);
        assert_eq!(compilation.chunk_ids(), vec![lazy]);
        assert_eq!(
            compilation.connect(app, lazy),
            Err(GraphError::DetachedChunk(app))
        );
    }

    #[test]
    fn test_replace_chunk_in_entrypoint() {
        let (mut compilation, app, _) = entry_graph();
        let ensure = compilation.add_chunk(None);

        assert_eq!(compilation.replace_chunk(ensure, app), 1);
        assert_eq!(compilation.entrypoint("app").unwrap().chunks, vec![ensure]);
    }

    #[test]
    fn test_unreachable_chunk_breaks_invariants() {
        let (mut compilation, _, _) = entry_graph();
        compilation.add_chunk(Some("orphan"));

        assert!(matches!(
            compilation.check_invariants(),
            Err(GraphError::Invariant(_))
        ));
    }

    #[test]
    fn test_check_chunks_ignores_unrelated_orphans() {
        let (mut compilation, app, modules) = entry_graph();
        let orphan = compilation.add_chunk(Some("orphan"));
        let lazy = compilation.add_chunk(None);
        compilation.connect(app, lazy).unwrap();
        compilation.move_module(modules[2], app, lazy).unwrap();

        assert!(compilation.check_invariants().is_err());
        compilation.check_chunks(&[app, lazy]).unwrap();
        assert!(matches!(
            compilation.check_chunks(&[orphan]),
            Err(GraphError::Invariant(_))
        ));
    }

    #[test]
    fn test_reachable_modules_follow_children() {
        let (mut compilation, app, modules) = entry_graph();
        let lazy = compilation.add_chunk(None);
        compilation.connect(app, lazy).unwrap();
        compilation.move_module(modules[1], app, lazy).unwrap();

        let entrypoint = compilation.entrypoint("app").unwrap();
        let reachable = compilation.reachable_modules(entrypoint);
        assert_eq!(reachable, modules.iter().copied().collect());
    }
}
