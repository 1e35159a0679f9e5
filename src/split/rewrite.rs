//! Graph rewriting
//!
//! Each [`Strategy`] restructures one chunk given the module groups the
//! partitioner produced:
//!
//! - `Sync` turns all groups but the one holding the entry module into a chain
//!   of parent chunks loaded before the original, in entry point order.
//! - `Async` replaces the chunk with a loader chunk of the same name that
//!   fetches one child chunk per group and then runs the original entry.
//! - `AsyncNested` splits a lazily loaded chunk into siblings; the chunk keeps
//!   its id, holds itself on arrival and releases its waiters once the
//!   siblings are in.

use std::collections::HashSet;

use serde::Serialize;
use tracing::debug;

use crate::bundler::{ChunkId, Compilation, GraphError, ModuleId, RuntimeFeature};
use crate::loader::{Continuation, LoaderProgram};

/// Modules to distribute and modules that stay put
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitPlan {
    /// Ordered groups; each one becomes a chunk
    pub groups: Vec<Vec<ModuleId>>,

    /// Modules that stay with the chunk carrying the loader
    pub pinned: Vec<ModuleId>,
}

impl SplitPlan {
    /// Every grouped or pinned module belongs to `chunk` and appears once
    pub fn validate(&self, compilation: &Compilation, chunk: ChunkId) -> Result<(), GraphError> {
        let record = compilation.chunk(chunk)?;
        if record.detached {
            return Err(GraphError::DetachedChunk(chunk));
        }

        let mut seen = HashSet::new();
        for &module in self.groups.iter().flatten().chain(&self.pinned) {
            if !record.contains(module) {
                return Err(GraphError::ModuleNotInChunk { module, chunk });
            }
            if !seen.insert(module) {
                return Err(GraphError::Invariant(format!(
                    "module {} is planned twice for chunk {}",
                    module, chunk
                )));
            }
        }

        Ok(())
    }
}

/// What a rewrite did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RewriteResult {
    pub strategy: Strategy,

    /// Chunk now holding the original's name and entry point position
    pub head: ChunkId,

    /// Chunks added to the compilation, head included
    pub created: Vec<ChunkId>,

    /// Chunk dropped from the compilation
    pub removed: Option<ChunkId>,

    /// Synthesized loader module
    pub loader: Option<ModuleId>,
}

impl RewriteResult {
    /// Chunks still in the compilation that the rewrite created or edited
    pub fn touched(&self, chunk: ChunkId) -> Vec<ChunkId> {
        let mut touched = vec![self.head];
        if self.removed != Some(chunk) {
            touched.push(chunk);
        }
        for &created in &self.created {
            if !touched.contains(&created) {
                touched.push(created);
            }
        }
        touched
    }
}

/// Shape of a split
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Statically ordered chain of eagerly loaded chunks
    Sync,
    /// Loader chunk fetching lazy children
    Async,
    /// Lazy chunk split into held siblings
    AsyncNested,
}

impl Strategy {
    /// Chunks with a runtime follow the configured mode; lazy chunks are
    /// always split into siblings; other initial chunks are never split.
    pub fn select(compilation: &Compilation, chunk: ChunkId, asynchronous: bool) -> Option<Self> {
        if compilation.has_runtime(chunk) {
            Some(if asynchronous { Strategy::Async } else { Strategy::Sync })
        } else if !compilation.is_initial(chunk) {
            Some(Strategy::AsyncNested)
        } else {
            None
        }
    }

    /// Style-extraction modules must not leave the loader chunk
    pub fn pins_styles(self) -> bool {
        !matches!(self, Strategy::Sync)
    }

    pub fn apply(
        self,
        compilation: &mut Compilation,
        chunk: ChunkId,
        plan: SplitPlan,
    ) -> Result<RewriteResult, GraphError> {
        if plan.groups.iter().all(Vec::is_empty) {
            return Err(GraphError::EmptyChunk(chunk));
        }
        plan.validate(compilation, chunk)?;

        match self {
            Strategy::Sync => SyncChain.apply(compilation, chunk, plan),
            Strategy::Async => AsyncEnsure.apply(compilation, chunk, plan),
            Strategy::AsyncNested => NestedSiblings.apply(compilation, chunk, plan),
        }
    }
}

/// A structural edit of one chunk
pub trait Rewrite {
    fn apply(
        &self,
        compilation: &mut Compilation,
        chunk: ChunkId,
        plan: SplitPlan,
    ) -> Result<RewriteResult, GraphError>;
}

/// `Strategy::Sync`
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncChain;

impl Rewrite for SyncChain {
    fn apply(
        &self,
        compilation: &mut Compilation,
        chunk: ChunkId,
        plan: SplitPlan,
    ) -> Result<RewriteResult, GraphError> {
        let original = compilation.chunk(chunk)?;
        let entry = original.entry_module;
        let name = original.display_name();
        let children = original.children.clone();

        // The entry module never leaves the original chunk
        let groups: Vec<Vec<ModuleId>> = plan
            .groups
            .into_iter()
            .filter(|group| entry.map_or(true, |entry| !group.contains(&entry)))
            .collect();

        let mut created = Vec::with_capacity(groups.len());
        let mut last = chunk;

        for (index, group) in groups.into_iter().enumerate() {
            let link = fresh_named_chunk(compilation, &format!("divide-chunk_{}{}", name, index));

            for module in group {
                compilation.move_module(module, chunk, link)?;
            }

            let parents = compilation.chunk(last)?.parents.clone();
            for parent in parents {
                compilation.disconnect(parent, last)?;
                compilation.connect(parent, link)?;
            }
            compilation.connect(link, last)?;
            compilation.insert_chunk_before(link, last);

            debug!("Chained chunk {} in front of {}", link, last);

            created.push(link);
            last = link;
        }

        let mut candidates = vec![chunk];
        candidates.extend(&created);
        rehome_children(compilation, chunk, &children, &candidates, chunk)?;

        Ok(RewriteResult {
            strategy: Strategy::Sync,
            head: last,
            created,
            removed: None,
            loader: None,
        })
    }
}

/// `Strategy::Async`
#[derive(Debug, Clone, Copy, Default)]
pub struct AsyncEnsure;

impl Rewrite for AsyncEnsure {
    fn apply(
        &self,
        compilation: &mut Compilation,
        chunk: ChunkId,
        plan: SplitPlan,
    ) -> Result<RewriteResult, GraphError> {
        let original = compilation.chunk(chunk)?;
        let name = original.name.clone();
        let display_name = original.display_name();
        let entry = original.entry_module;

        let (parents, children) = compilation.detach_chunk(chunk)?;

        let ensure = compilation.add_chunk(name.as_deref());
        for parent in parents {
            compilation.connect(parent, ensure)?;
        }
        compilation.replace_chunk(ensure, chunk);

        let mut created = vec![ensure];
        let mut parts = Vec::with_capacity(plan.groups.len());

        for group in plan.groups {
            let part = compilation.add_chunk(None);
            compilation.connect(ensure, part)?;

            for module in group {
                compilation.move_module(module, chunk, part)?;
            }

            parts.push(part);
        }
        created.extend(&parts);

        for module in plan.pinned {
            compilation.move_module(module, chunk, ensure)?;
        }

        // Nothing is left behind in the detached chunk
        let leftovers = compilation.chunk(chunk)?.modules.clone();
        for module in leftovers {
            compilation.move_module(module, chunk, ensure)?;
        }

        let program = LoaderProgram::synthesize(&parts, entry, None);
        let loader = compilation.add_loader_module(&format!("divide-entry-module_{}", display_name), program);
        compilation.add_module_to_chunk(loader, ensure)?;
        compilation.set_entry_module(ensure, Some(loader))?;

        rehome_children(compilation, chunk, &children, &created, ensure)?;

        debug!(
            "Replaced chunk {} by loader chunk {} fetching {:?}",
            chunk, ensure, parts
        );

        Ok(RewriteResult {
            strategy: Strategy::Async,
            head: ensure,
            created,
            removed: Some(chunk),
            loader: Some(loader),
        })
    }
}

/// `Strategy::AsyncNested`
#[derive(Debug, Clone, Copy, Default)]
pub struct NestedSiblings;

impl Rewrite for NestedSiblings {
    fn apply(
        &self,
        compilation: &mut Compilation,
        chunk: ChunkId,
        plan: SplitPlan,
    ) -> Result<RewriteResult, GraphError> {
        let original = compilation.chunk(chunk)?;
        let parents = original.parents.clone();
        let children = original.children.clone();
        let entry = original.entry_module;

        let mut siblings = Vec::with_capacity(plan.groups.len());

        for group in plan.groups {
            let sibling = compilation.add_chunk(None);
            for &parent in &parents {
                compilation.connect(parent, sibling)?;
            }

            for module in group {
                compilation.move_module(module, chunk, sibling)?;
            }

            siblings.push(sibling);
        }

        // An existing loader is regenerated to wait on the siblings too
        let existing = match entry {
            Some(module) => compilation.module(module)?.program().cloned(),
            None => None,
        };

        let loader = match (entry, existing) {
            (Some(module), Some(program)) => {
                let mut fetch = program.chunks();
                fetch.extend(&siblings);

                let mut resolve: Vec<ChunkId> = program
                    .continuations()
                    .iter()
                    .flat_map(|c| match c {
                        Continuation::Resolve(ids) => ids.clone(),
                        Continuation::Require(_) => Vec::new(),
                    })
                    .collect();
                if !resolve.contains(&chunk) {
                    resolve.push(chunk);
                }

                let regenerated = LoaderProgram::synthesize(&fetch, program.entry(), Some(&resolve));
                compilation.set_loader_program(module, regenerated)?;
                module
            }
            (entry, _) => {
                let program = LoaderProgram::synthesize(&siblings, entry, Some(&[chunk]));
                let loader = compilation.add_loader_module(&format!("divide-resolve-module_{}", chunk), program);
                compilation.add_module_to_chunk(loader, chunk)?;
                compilation.set_entry_module(chunk, Some(loader))?;
                loader
            }
        };

        compilation.set_awaits_resolve(chunk, true)?;
        compilation.require_runtime(RuntimeFeature::WaitResolve);

        let mut candidates = vec![chunk];
        candidates.extend(&siblings);
        rehome_children(compilation, chunk, &children, &candidates, chunk)?;

        debug!("Split lazy chunk {} into siblings {:?}", chunk, siblings);

        Ok(RewriteResult {
            strategy: Strategy::AsyncNested,
            head: chunk,
            created: siblings,
            removed: None,
            loader: Some(loader),
        })
    }
}

/// Add a chunk named `base`, or `base~N` if that name is taken
fn fresh_named_chunk(compilation: &mut Compilation, base: &str) -> ChunkId {
    let mut name = base.to_string();
    let mut attempt = 1;

    while compilation.named_chunk(&name).is_some() {
        name = format!("{}~{}", base, attempt);
        attempt += 1;
    }

    compilation.add_chunk(Some(&name))
}

/// Re-parent lazy chunks that used to hang off `old` to whichever candidate
/// now holds the module that triggers them. Chunks without a known trigger
/// go to `fallback`.
fn rehome_children(
    compilation: &mut Compilation,
    old: ChunkId,
    children: &[ChunkId],
    candidates: &[ChunkId],
    fallback: ChunkId,
) -> Result<(), GraphError> {
    for &child in children {
        let record = compilation.chunk(child)?;
        if record.detached || candidates.contains(&child) {
            continue;
        }
        let origins = record.origins.clone();

        let mut targets = Vec::new();
        for &candidate in candidates {
            let holder = compilation.chunk(candidate)?;
            if origins.iter().any(|&module| holder.contains(module)) {
                targets.push(candidate);
            }
        }
        if targets.is_empty() {
            targets.push(fallback);
        }

        if !targets.contains(&old) {
            compilation.disconnect(old, child)?;
        }
        for target in targets {
            compilation.connect(target, child)?;
        }
    }

    Ok(())
}
