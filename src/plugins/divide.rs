//! Chunk splitting plugin
//!
//! Splits entry chunks (and the lazy chunks they load) according to a
//! [`SplitPolicy`]. Several instances with different policies can run in
//! one build; a chunk is only ever split once.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};

use super::{sort_by_dependency, BuildContext, HtmlOptions, OptimizeStage, Plugin, PluginIdent};
use crate::bundler::{ChunkId, Compilation, GraphError};
use crate::split::{partition, ByteSize, SizeModel, SplitPlan, SplitPolicy, Strategy};

static NEXT_IDENT: AtomicUsize = AtomicUsize::new(0);

/// Modules emitted by stylesheet extraction loaders
static STYLE_EXTRACTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"extract-text-webpack-plugin|mini-css-extract-plugin").unwrap());

pub struct DividePlugin {
    ident: PluginIdent,
    policy: SplitPolicy,
    size_model: Box<dyn SizeModel + Send + Sync>,
}

impl DividePlugin {
    pub fn new(policy: SplitPolicy) -> Self {
        Self {
            ident: PluginIdent(NEXT_IDENT.fetch_add(1, Ordering::Relaxed)),
            policy,
            size_model: Box::new(ByteSize),
        }
    }

    pub fn with_size_model(mut self, model: impl SizeModel + Send + Sync + 'static) -> Self {
        self.size_model = Box::new(model);
        self
    }

    pub fn ident(&self) -> PluginIdent {
        self.ident
    }

    pub fn policy(&self) -> &SplitPolicy {
        &self.policy
    }

    fn name_allowed(&self, name: Option<&str>) -> bool {
        match name {
            Some(name) => {
                !self.policy.exclude.matches(name)
                    && self.policy.include.as_ref().map_or(true, |include| include.matches(name))
            }
            None => self.policy.include.is_none(),
        }
    }

    fn entry_qualifies(&self, compilation: &Compilation, chunk: ChunkId) -> bool {
        compilation.has_runtime(chunk)
            && compilation
                .chunk(chunk)
                .map_or(false, |record| self.name_allowed(record.name.as_deref()))
    }

    /// Whether this instance may split `chunk` in the current pass
    pub fn is_valid_chunk(
        &self,
        compilation: &Compilation,
        chunk: ChunkId,
        ctx: &BuildContext,
        entries: &mut HashMap<ChunkId, bool>,
    ) -> bool {
        if ctx.is_processed(chunk) {
            return false;
        }
        let Ok(record) = compilation.chunk(chunk) else {
            return false;
        };
        if record.detached {
            return false;
        }

        if compilation.has_runtime(chunk) {
            let qualifies = self.entry_qualifies(compilation, chunk);
            entries.insert(chunk, qualifies);
            return qualifies;
        }

        if compilation.is_initial(chunk) {
            return false;
        }

        if let Some(name) = record.name.as_deref() {
            if self.policy.exclude.matches(name) {
                return false;
            }
        }

        compilation.entry_ancestors(chunk).into_iter().any(|ancestor| {
            *entries
                .entry(ancestor)
                .or_insert_with(|| self.entry_qualifies(compilation, ancestor))
        })
    }

    /// Chunks to split, evaluated on the graph as it is before the pass.
    /// Entry chunks come first.
    pub fn eligible_chunks(&self, compilation: &Compilation, ctx: &BuildContext) -> Vec<ChunkId> {
        let mut order = compilation.chunk_ids();
        order.sort_by_key(|&id| !compilation.has_runtime(id));

        let mut entries = HashMap::new();
        order
            .into_iter()
            .filter(|&id| self.is_valid_chunk(compilation, id, ctx, &mut entries))
            .collect()
    }

    /// Partition a chunk's modules. `None` when the chunk is not worth splitting.
    pub fn plan(
        &self,
        compilation: &Compilation,
        chunk: ChunkId,
        strategy: Strategy,
    ) -> Result<Option<SplitPlan>, GraphError> {
        let record = compilation.chunk(chunk)?;
        if record.is_empty() {
            debug!("Chunk {} has no modules", record.display_name());
            return Ok(None);
        }

        let mut movable = Vec::with_capacity(record.len());
        let mut pinned = Vec::new();

        for &id in &record.modules {
            let module = compilation.module(id)?;
            let is_style = strategy.pins_styles() && STYLE_EXTRACTION.is_match(&module.identifier);

            if module.is_loader() || is_style {
                pinned.push(id);
            } else {
                movable.push(id);
            }
        }

        let groups = partition(&movable, self.policy.mode, &self.policy.group_count, |&id| {
            compilation
                .module(id)
                .map_or(0.0, |module| self.size_model.weight(module))
        });

        if groups.len() <= 1 {
            debug!("Chunk {} is not worth splitting", record.display_name());
            return Ok(None);
        }

        Ok(Some(SplitPlan { groups, pinned }))
    }

    fn split(&self, compilation: &mut Compilation, chunk: ChunkId, ctx: &mut BuildContext) -> Result<()> {
        if ctx.is_processed(chunk) || compilation.chunk(chunk)?.detached {
            return Ok(());
        }

        let Some(strategy) = Strategy::select(compilation, chunk, self.policy.asynchronous) else {
            return Ok(());
        };
        let Some(plan) = self.plan(compilation, chunk, strategy)? else {
            return Ok(());
        };

        let record = compilation.chunk(chunk)?;
        let name = record.name.clone();
        let display_name = record.display_name();

        // Restored when the rewrite fails so a skipped chunk leaves no trace
        let backup = compilation.clone();
        let outcome = strategy.apply(compilation, chunk, plan).and_then(|result| {
            compilation.check_chunks(&result.touched(chunk))?;
            Ok(result)
        });

        match outcome {
            Ok(result) => {
                ctx.mark_processed(chunk);
                ctx.mark_processed(result.head);
                for &created in &result.created {
                    ctx.mark_processed(created);
                }

                if let (Some(name), Strategy::Sync | Strategy::Async) = (name.as_deref(), strategy) {
                    ctx.record_split_entry(self.ident, name);
                }

                info!(
                    "Split chunk {} ({:?}) into {} chunks",
                    display_name,
                    strategy,
                    result.created.len()
                );
            }
            Err(e) => {
                warn!("Skipping chunk {}: {}", display_name, e);
                *compilation = backup;
                ctx.mark_processed(chunk);
            }
        }

        Ok(())
    }

    /// The named chunk followed by its first-parent ancestors
    fn chain(compilation: &Compilation, name: &str) -> Vec<ChunkId> {
        let mut chain = Vec::new();
        let mut current = compilation.named_chunk(name);

        while let Some(id) = current {
            if chain.contains(&id) {
                break;
            }
            chain.push(id);
            current = compilation
                .chunk(id)
                .ok()
                .and_then(|chunk| chunk.parents.first().copied());
        }

        chain
    }
}

impl Plugin for DividePlugin {
    fn name(&self) -> &str {
        "divide"
    }

    fn optimize_chunks(
        &self,
        compilation: &mut Compilation,
        stage: OptimizeStage,
        ctx: &mut BuildContext,
    ) -> Result<()> {
        if !ctx.begin_pass(self.ident) {
            debug!("divide#{} already ran, skipping {:?}", self.ident.0, stage);
            return Ok(());
        }

        if self.policy.is_disabled() {
            return Ok(());
        }

        for chunk in self.eligible_chunks(compilation, ctx) {
            self.split(compilation, chunk, ctx)?;
        }

        Ok(())
    }

    fn alter_html_chunks(
        &self,
        compilation: &Compilation,
        chunks: Vec<ChunkId>,
        options: &HtmlOptions,
        ctx: &BuildContext,
    ) -> Result<Vec<ChunkId>> {
        if self.policy.asynchronous || options.targets_all() {
            return Ok(chunks);
        }

        let mut owned = HashSet::new();
        let mut wanted = Vec::new();

        for name in ctx.split_entries(self.ident) {
            let chain = Self::chain(compilation, name);
            owned.extend(chain.iter().copied());

            if options.wants(name) {
                wanted.extend(chain);
            }
        }

        let mut result: Vec<ChunkId> = chunks.into_iter().filter(|id| !owned.contains(id)).collect();
        for id in wanted {
            if !result.contains(&id) {
                result.push(id);
            }
        }

        Ok(sort_by_dependency(compilation, &result))
    }

    fn build_end(&self, ctx: &BuildContext) -> Result<()> {
        debug!(
            "divide#{} split {} entry chunks",
            self.ident.0,
            ctx.split_entries(self.ident).count()
        );
        Ok(())
    }
}
