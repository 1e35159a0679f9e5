//! Plugin system
//!
//! Plugins hook into the chunk optimization stages of a build, the chunk
//! list handed to HTML generation, and the end of the build.

mod divide;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::bundler::{ChunkId, Compilation};

pub use divide::DividePlugin;

/// Identity of one plugin instance within a build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PluginIdent(pub usize);

/// Chunk optimization stages, fired in this order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptimizeStage {
    Chunks,
    ExtractedChunks,
}

impl OptimizeStage {
    pub const ALL: [OptimizeStage; 2] = [OptimizeStage::Chunks, OptimizeStage::ExtractedChunks];
}

/// Bookkeeping for one build. Dropped when the build ends.
#[derive(Debug, Default)]
pub struct BuildContext {
    processed: HashSet<ChunkId>,
    passes: HashSet<PluginIdent>,
    split_entries: HashMap<PluginIdent, BTreeSet<String>>,
}

impl BuildContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_processed(&self, chunk: ChunkId) -> bool {
        self.processed.contains(&chunk)
    }

    pub fn mark_processed(&mut self, chunk: ChunkId) {
        self.processed.insert(chunk);
    }

    /// Returns false if this instance already ran its pass in this build
    pub fn begin_pass(&mut self, ident: PluginIdent) -> bool {
        self.passes.insert(ident)
    }

    pub fn record_split_entry(&mut self, ident: PluginIdent, name: &str) {
        self.split_entries
            .entry(ident)
            .or_default()
            .insert(name.to_string());
    }

    /// Names of the chunks an instance has split in this build
    pub fn split_entries(&self, ident: PluginIdent) -> impl Iterator<Item = &str> {
        self.split_entries
            .get(&ident)
            .into_iter()
            .flat_map(|names| names.iter().map(String::as_str))
    }

    /// Drop everything recorded for this build
    pub fn release(mut self) {
        debug!(
            "Releasing build state: {} processed chunks, {} passes",
            self.processed.len(),
            self.passes.len()
        );
        self.processed.clear();
        self.passes.clear();
        self.split_entries.clear();
    }
}

/// What the HTML generator asks for
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct HtmlOptions {
    /// Chunk names to include. `None` means all chunks.
    pub chunks: Option<Vec<String>>,

    #[serde(alias = "excludeChunks")]
    pub exclude_chunks: Vec<String>,
}

impl HtmlOptions {
    pub fn targets_all(&self) -> bool {
        match &self.chunks {
            None => true,
            Some(names) => names.iter().any(|name| name == "all"),
        }
    }

    pub fn wants(&self, name: &str) -> bool {
        if self.exclude_chunks.iter().any(|excluded| excluded == name) {
            return false;
        }
        self.targets_all() || self.chunks.iter().flatten().any(|target| target == name)
    }
}

/// Plugin trait - implement this to hook into a build
pub trait Plugin: Send + Sync {
    /// Plugin name for logging and debugging
    fn name(&self) -> &str;

    /// Called for every chunk optimization stage
    fn optimize_chunks(
        &self,
        _compilation: &mut Compilation,
        _stage: OptimizeStage,
        _ctx: &mut BuildContext,
    ) -> Result<()> {
        Ok(())
    }

    /// Adjust the chunks listed in a generated page
    fn alter_html_chunks(
        &self,
        _compilation: &Compilation,
        chunks: Vec<ChunkId>,
        _options: &HtmlOptions,
        _ctx: &BuildContext,
    ) -> Result<Vec<ChunkId>> {
        Ok(chunks)
    }

    /// Called when the build ends
    fn build_end(&self, _ctx: &BuildContext) -> Result<()> {
        Ok(())
    }
}

/// Plugin manager
#[derive(Default)]
pub struct PluginManager {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginManager {
    /// Create a new plugin manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        self.plugins.push(plugin);
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Run every optimization stage through every plugin
    pub fn optimize(&self, compilation: &mut Compilation, ctx: &mut BuildContext) -> Result<()> {
        // Splits only check the chunks they touch, so report the rest once
        if let Err(e) = compilation.check_invariants() {
            warn!("Chunk graph is inconsistent before splitting: {}", e);
        }

        for stage in OptimizeStage::ALL {
            for plugin in &self.plugins {
                debug!("Running {} for {:?}", plugin.name(), stage);
                plugin.optimize_chunks(compilation, stage, ctx)?;
            }
        }
        Ok(())
    }

    /// Chunks to list in a generated page: initial chunks matching the
    /// requested names, then each plugin's adjustment
    pub fn html_chunks(
        &self,
        compilation: &Compilation,
        options: &HtmlOptions,
        ctx: &BuildContext,
    ) -> Result<Vec<ChunkId>> {
        let mut chunks: Vec<ChunkId> = compilation
            .chunks()
            .filter(|chunk| compilation.is_initial(chunk.id))
            .filter(|chunk| options.wants(&chunk.display_name()))
            .map(|chunk| chunk.id)
            .collect();

        for plugin in &self.plugins {
            chunks = plugin.alter_html_chunks(compilation, chunks, options, ctx)?;
        }

        Ok(chunks)
    }

    /// Run build_end hooks and release the build state
    pub fn build_end(&self, ctx: BuildContext) -> Result<()> {
        for plugin in &self.plugins {
            plugin.build_end(&ctx)?;
        }
        ctx.release();
        Ok(())
    }
}

/// Order `chunks` so every chunk follows its listed parents. Ties keep their
/// input order; cycles fall back to it.
pub fn sort_by_dependency(compilation: &Compilation, chunks: &[ChunkId]) -> Vec<ChunkId> {
    let listed: HashSet<ChunkId> = chunks.iter().copied().collect();
    let mut emitted: HashSet<ChunkId> = HashSet::with_capacity(chunks.len());
    let mut remaining: Vec<ChunkId> = chunks.to_vec();
    let mut sorted = Vec::with_capacity(chunks.len());

    while !remaining.is_empty() {
        let ready = remaining.iter().position(|&id| {
            compilation.chunk(id).map_or(true, |chunk| {
                chunk
                    .parents
                    .iter()
                    .all(|parent| !listed.contains(parent) || emitted.contains(parent))
            })
        });

        let next = remaining.remove(ready.unwrap_or(0));
        emitted.insert(next);
        sorted.push(next);
    }

    sorted
}
