//! Wait/resolve protocol
//!
//! A chunk split by a nested pass cannot report itself as loaded when its
//! script arrives: its modules live partly in sibling chunks its own loader
//! fetches. Such a chunk holds itself in a registry first, and its loader
//! releases everyone waiting on it through the resolve signal once the
//! siblings are in.
//!
//! This module renders the bootstrap additions the host runtime needs for
//! that, and models the protocol so the generated loaders can be replayed
//! against a chunk graph.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::Serialize;

use super::{Continuation, RuntimeGlobals};
use crate::bundler::{ChunkId, Compilation, EntryPoint, GraphError, ModuleId};

const BOOTSTRAP_TEMPLATE: &str = r#"var __parentWaitResolve = window["{wait}"];
var __waitResolveChunks = {};
window["{wait}"] = function (chunkIds) {
	for (var i = 0; i < chunkIds.length; i++) {
		var chunkId = chunkIds[i];
		if (installedChunks[chunkId]) {
			__waitResolveChunks[chunkId] = installedChunks[chunkId];
			installedChunks[chunkId] = 0;
		}
	}
	if (__parentWaitResolve) __parentWaitResolve(chunkIds);
};
{resolve} = function (chunkIds) {
	var chunkId, i = 0, resolves = [];
	for (; i < chunkIds.length; i++) {
		chunkId = chunkIds[i];
		if (__waitResolveChunks[chunkId]) {
			resolves.push(__waitResolveChunks[chunkId][0]);
		}
		installedChunks[chunkId] = 0;
		__waitResolveChunks[chunkId] = undefined;
	}
	while (resolves.length) {
		resolves.shift()();
	}
};"#;

const ENSURE_GUARD_TEMPLATE: &str = r#"if (__waitResolveChunks[chunkId]) {
	return __waitResolveChunks[chunkId][2];
}"#;

/// Bootstrap additions for hosts that load held chunks
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BootstrapPatch {
    /// Registry and resolve function, placed after `installedChunks`
    pub globals: String,

    /// Placed at the top of the chunk fetch function
    pub ensure_guard: String,
}

/// Render the host-side half of the protocol
pub fn bootstrap_source(globals: &RuntimeGlobals) -> BootstrapPatch {
    BootstrapPatch {
        globals: BOOTSTRAP_TEMPLATE
            .replace("{wait}", &globals.wait_resolve)
            .replace("{resolve}", &globals.resolve),
        ensure_guard: ENSURE_GUARD_TEMPLATE.to_string(),
    }
}

/// The call a held chunk's file makes before registering its modules
pub fn hold_call(globals: &RuntimeGlobals, chunks: &[ChunkId]) -> String {
    let ids: Vec<String> = chunks.iter().map(ToString::to_string).collect();
    format!("window[\"{}\"]([{}]);", globals.wait_resolve, ids.join(", "))
}

#[derive(Debug)]
enum Slot<W> {
    Loading(Vec<W>),
    Held(Vec<W>),
    Loaded,
}

/// Outcome of asking for a chunk
#[derive(Debug, PartialEq, Eq)]
pub enum Ensure<W> {
    /// Already loaded: the waiter is handed straight back
    Ready(W),
    /// First request: the caller starts the fetch
    Started,
    /// Queued behind a fetch or a hold already in progress
    Pending,
}

/// Chunk states and their waiters
#[derive(Debug)]
pub struct ResolveRegistry<W> {
    slots: HashMap<ChunkId, Slot<W>>,
}

impl<W> Default for ResolveRegistry<W> {
    fn default() -> Self {
        Self {
            slots: HashMap::new(),
        }
    }
}

impl<W> ResolveRegistry<W> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self, chunk: ChunkId) -> bool {
        matches!(self.slots.get(&chunk), Some(Slot::Loaded))
    }

    /// Chunks delivered with the page
    pub fn mark_loaded(&mut self, chunk: ChunkId) {
        self.slots.insert(chunk, Slot::Loaded);
    }

    pub fn ensure(&mut self, chunk: ChunkId, waiter: W) -> Ensure<W> {
        match self.slots.get_mut(&chunk) {
            Some(Slot::Loaded) => Ensure::Ready(waiter),
            Some(Slot::Loading(waiters)) | Some(Slot::Held(waiters)) => {
                waiters.push(waiter);
                Ensure::Pending
            }
            None => {
                self.slots.insert(chunk, Slot::Loading(vec![waiter]));
                Ensure::Started
            }
        }
    }

    /// Keep waiters of `chunks` parked until they are resolved explicitly
    pub fn hold(&mut self, chunks: &[ChunkId]) {
        for &chunk in chunks {
            match self.slots.remove(&chunk) {
                Some(Slot::Loading(waiters)) | Some(Slot::Held(waiters)) => {
                    self.slots.insert(chunk, Slot::Held(waiters));
                }
                Some(Slot::Loaded) => {
                    self.slots.insert(chunk, Slot::Loaded);
                }
                None => {
                    self.slots.insert(chunk, Slot::Held(Vec::new()));
                }
            }
        }
    }

    /// The script of `chunk` arrived. Held chunks keep their waiters.
    pub fn script_loaded(&mut self, chunk: ChunkId) -> Vec<W> {
        match self.slots.remove(&chunk) {
            Some(Slot::Held(waiters)) => {
                self.slots.insert(chunk, Slot::Held(waiters));
                Vec::new()
            }
            Some(Slot::Loading(waiters)) => {
                self.slots.insert(chunk, Slot::Loaded);
                waiters
            }
            Some(Slot::Loaded) | None => {
                self.slots.insert(chunk, Slot::Loaded);
                Vec::new()
            }
        }
    }

    /// Mark `chunks` loaded and release their waiters in registration order.
    /// Chunks already loaded release nothing.
    pub fn resolve(&mut self, chunks: &[ChunkId]) -> Vec<W> {
        let mut released = Vec::new();

        for &chunk in chunks {
            match self.slots.insert(chunk, Slot::Loaded) {
                Some(Slot::Held(waiters)) | Some(Slot::Loading(waiters)) => released.extend(waiters),
                Some(Slot::Loaded) | None => {}
            }
        }

        released
    }

    /// The fetch of `chunk` failed. It may be requested again later.
    pub fn fail(&mut self, chunk: ChunkId) -> Vec<W> {
        match self.slots.remove(&chunk) {
            Some(Slot::Loading(waiters)) | Some(Slot::Held(waiters)) => waiters,
            Some(Slot::Loaded) => {
                self.slots.insert(chunk, Slot::Loaded);
                Vec::new()
            }
            None => Vec::new(),
        }
    }
}

/// Order in which outstanding fetches complete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchOrder {
    /// Oldest request first
    #[default]
    Fifo,
    /// Newest request first
    Lifo,
}

/// Something observable while an entry point loads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "id", rename_all = "kebab-case")]
pub enum LoadEvent {
    Fetch(ChunkId),
    Arrive(ChunkId),
    Hold(ChunkId),
    Resolve(ChunkId),
    Execute(ModuleId),
    /// Reported on the runtime error channel
    Error(ChunkId),
}

/// Events recorded while loading one entry point
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadTrace {
    pub events: Vec<LoadEvent>,
}

impl LoadTrace {
    /// Modules executed, in order
    pub fn executed(&self) -> Vec<ModuleId> {
        self.events
            .iter()
            .filter_map(|event| match event {
                LoadEvent::Execute(id) => Some(*id),
                _ => None,
            })
            .collect()
    }

    pub fn fetched(&self) -> Vec<ChunkId> {
        self.events
            .iter()
            .filter_map(|event| match event {
                LoadEvent::Fetch(id) => Some(*id),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<ChunkId> {
        self.events
            .iter()
            .filter_map(|event| match event {
                LoadEvent::Error(id) => Some(*id),
                _ => None,
            })
            .collect()
    }

    pub fn position(&self, event: LoadEvent) -> Option<usize> {
        self.events.iter().position(|e| *e == event)
    }
}

/// Replays how generated loaders bring up an entry point
pub struct LoadSimulator<'a> {
    compilation: &'a Compilation,
    order: FetchOrder,
    failing: HashSet<ChunkId>,
}

impl<'a> LoadSimulator<'a> {
    pub fn new(compilation: &'a Compilation) -> Self {
        Self {
            compilation,
            order: FetchOrder::default(),
            failing: HashSet::new(),
        }
    }

    pub fn with_order(mut self, order: FetchOrder) -> Self {
        self.order = order;
        self
    }

    /// Make every fetch of `chunk` fail
    pub fn failing(mut self, chunk: ChunkId) -> Self {
        self.failing.insert(chunk);
        self
    }

    pub fn run(&self, entrypoint: &EntryPoint) -> Result<LoadTrace, GraphError> {
        let mut run = Run {
            compilation: self.compilation,
            failing: &self.failing,
            registry: ResolveRegistry::new(),
            barriers: Vec::new(),
            queue: VecDeque::new(),
            trace: LoadTrace::default(),
        };

        for &chunk in &entrypoint.chunks {
            run.registry.mark_loaded(chunk);
        }
        for &chunk in &entrypoint.chunks {
            if let Some(module) = self.compilation.chunk(chunk)?.entry_module {
                run.execute(module)?;
            }
        }

        loop {
            let next = match self.order {
                FetchOrder::Fifo => run.queue.pop_front(),
                FetchOrder::Lifo => run.queue.pop_back(),
            };
            let Some(chunk) = next else { break };
            run.arrive(chunk)?;
        }

        Ok(run.trace)
    }
}

struct Barrier {
    remaining: usize,
    failed: bool,
    then: Vec<Continuation>,
}

struct Run<'a> {
    compilation: &'a Compilation,
    failing: &'a HashSet<ChunkId>,
    registry: ResolveRegistry<usize>,
    barriers: Vec<Barrier>,
    queue: VecDeque<ChunkId>,
    trace: LoadTrace,
}

impl Run<'_> {
    fn execute(&mut self, module: ModuleId) -> Result<(), GraphError> {
        let compilation = self.compilation;
        self.trace.events.push(LoadEvent::Execute(module));

        let Some(program) = compilation.module(module)?.program() else {
            return Ok(());
        };

        let chunks = program.chunks();
        let barrier = self.barriers.len();
        self.barriers.push(Barrier {
            remaining: chunks.len(),
            failed: false,
            then: program.continuations().to_vec(),
        });

        if chunks.is_empty() {
            return self.finish(barrier);
        }

        for chunk in chunks {
            match self.registry.ensure(chunk, barrier) {
                Ensure::Ready(waiter) => self.complete(waiter)?,
                Ensure::Started => {
                    self.trace.events.push(LoadEvent::Fetch(chunk));
                    self.queue.push_back(chunk);
                }
                Ensure::Pending => {}
            }
        }

        Ok(())
    }

    fn arrive(&mut self, chunk: ChunkId) -> Result<(), GraphError> {
        if self.failing.contains(&chunk) {
            self.trace.events.push(LoadEvent::Error(chunk));
            for waiter in self.registry.fail(chunk) {
                self.barriers[waiter].failed = true;
            }
            return Ok(());
        }

        self.trace.events.push(LoadEvent::Arrive(chunk));

        let compilation = self.compilation;
        let record = compilation.chunk(chunk)?;
        if record.awaits_resolve {
            self.registry.hold(&[chunk]);
            self.trace.events.push(LoadEvent::Hold(chunk));
        }

        for waiter in self.registry.script_loaded(chunk) {
            self.complete(waiter)?;
        }

        if let Some(module) = record.entry_module {
            self.execute(module)?;
        }

        Ok(())
    }

    fn complete(&mut self, barrier: usize) -> Result<(), GraphError> {
        let state = &mut self.barriers[barrier];
        state.remaining = state.remaining.saturating_sub(1);

        if state.remaining == 0 && !state.failed {
            self.finish(barrier)?;
        }

        Ok(())
    }

    fn finish(&mut self, barrier: usize) -> Result<(), GraphError> {
        let then = std::mem::take(&mut self.barriers[barrier].then);

        for continuation in then {
            match continuation {
                Continuation::Resolve(chunks) => {
                    for &chunk in &chunks {
                        if !self.registry.is_loaded(chunk) {
                            self.trace.events.push(LoadEvent::Resolve(chunk));
                        }
                    }
                    for waiter in self.registry.resolve(&chunks) {
                        self.complete(waiter)?;
                    }
                }
                Continuation::Require(module) => self.execute(module)?,
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::LoaderProgram;

    #[test]
    fn test_bootstrap_uses_globals() {
        let patch = bootstrap_source(&RuntimeGlobals::default());

        assert!(patch.globals.contains("window[\"__webpackWaitResolve\"] = function (chunkIds)"));
        assert!(patch.globals.contains("__webpack_require__._resolve = function (chunkIds)"));
        assert!(patch.ensure_guard.contains("__waitResolveChunks[chunkId][2]"));
    }

    #[test]
    fn test_hold_call() {
        let call = hold_call(&RuntimeGlobals::default(), &[ChunkId(2), ChunkId(5)]);
        assert_eq!(call, "window[\"__webpackWaitResolve\"]([2, 5]);");
    }

    #[test]
    fn test_waiters_resume_in_registration_order() {
        let mut registry = ResolveRegistry::new();
        let chunk = ChunkId(1);

        assert_eq!(registry.ensure(chunk, "first"), Ensure::Started);
        assert_eq!(registry.ensure(chunk, "second"), Ensure::Pending);
        registry.hold(&[chunk]);
        assert_eq!(registry.ensure(chunk, "third"), Ensure::Pending);

        assert!(registry.script_loaded(chunk).is_empty());
        assert!(!registry.is_loaded(chunk));

        assert_eq!(registry.resolve(&[chunk]), vec!["first", "second", "third"]);
        assert!(registry.is_loaded(chunk));
    }

    #[test]
    fn test_duplicate_resolve_is_suppressed() {
        let mut registry = ResolveRegistry::new();
        let chunk = ChunkId(4);

        registry.ensure(chunk, 1);
        registry.hold(&[chunk]);

        assert_eq!(registry.resolve(&[chunk]), vec![1]);
        assert!(registry.resolve(&[chunk]).is_empty());
        assert_eq!(registry.ensure(chunk, 2), Ensure::Ready(2));
    }

    #[test]
    fn test_failed_chunk_can_be_requested_again() {
        let mut registry = ResolveRegistry::new();
        let chunk = ChunkId(3);

        registry.ensure(chunk, 'a');
        registry.ensure(chunk, 'b');
        assert_eq!(registry.fail(chunk), vec!['a', 'b']);
        assert_eq!(registry.ensure(chunk, 'c'), Ensure::Started);
    }

    /// ensure chunk (runtime) -> two group chunks, entry module in the second
    fn async_graph() -> (Compilation, ModuleId, Vec<ChunkId>) {
        let mut compilation = Compilation::new();
        let ensure = compilation.add_chunk(Some("app"));
        let first = compilation.add_chunk(None);
        let second = compilation.add_chunk(None);
        compilation.connect(ensure, first).unwrap();
        compilation.connect(ensure, second).unwrap();

        let common = compilation.add_module("./common.js", 10);
        let app = compilation.add_module("./app.js", 10);
        compilation.add_module_to_chunk(common, first).unwrap();
        compilation.add_module_to_chunk(app, second).unwrap();

        let loader = compilation.add_loader_module(
            "divide-entry-module_app",
            LoaderProgram::synthesize(&[first, second], Some(app), None),
        );
        compilation.add_module_to_chunk(loader, ensure).unwrap();
        compilation.set_entry_module(ensure, Some(loader)).unwrap();
        compilation.add_entrypoint("app", vec![ensure]).unwrap();

        (compilation, app, vec![first, second])
    }

    #[test]
    fn test_entry_runs_once_after_all_fetches() {
        let (compilation, app, groups) = async_graph();
        let entrypoint = compilation.entrypoint("app").unwrap();

        for order in [FetchOrder::Fifo, FetchOrder::Lifo] {
            let trace = LoadSimulator::new(&compilation)
                .with_order(order)
                .run(entrypoint)
                .unwrap();

            assert_eq!(trace.fetched(), groups);
            assert_eq!(trace.executed().iter().filter(|&&m| m == app).count(), 1);

            let entry_at = trace.position(LoadEvent::Execute(app)).unwrap();
            for &chunk in &groups {
                assert!(trace.position(LoadEvent::Arrive(chunk)).unwrap() < entry_at);
            }
        }
    }

    #[test]
    fn test_fetch_failure_skips_continuation() {
        let (compilation, app, groups) = async_graph();
        let entrypoint = compilation.entrypoint("app").unwrap();

        let trace = LoadSimulator::new(&compilation)
            .failing(groups[1])
            .run(entrypoint)
            .unwrap();

        assert_eq!(trace.errors(), vec![groups[1]]);
        assert!(!trace.executed().contains(&app));
    }

    #[test]
    fn test_held_chunk_releases_parent_after_siblings() {
        let mut compilation = Compilation::new();
        let app = compilation.add_chunk(Some("app"));
        let lazy = compilation.add_chunk(None);
        let sibling = compilation.add_chunk(None);
        compilation.connect(app, lazy).unwrap();
        compilation.connect(app, sibling).unwrap();

        let lazy_module = compilation.add_module("./lazy.js", 10);
        compilation.add_module_to_chunk(lazy_module, sibling).unwrap();

        let resume = compilation.add_module("./resume.js", 10);
        compilation.add_module_to_chunk(resume, app).unwrap();

        // app loads `lazy` and then runs `resume`
        let trigger = compilation.add_loader_module(
            "trigger",
            LoaderProgram::synthesize(&[lazy], Some(resume), None),
        );
        compilation.add_module_to_chunk(trigger, app).unwrap();
        compilation.set_entry_module(app, Some(trigger)).unwrap();

        let resolver = compilation.add_loader_module(
            "divide-resolve-module_1",
            LoaderProgram::synthesize(&[sibling], None, Some(&[lazy][..])),
        );
        compilation.add_module_to_chunk(resolver, lazy).unwrap();
        compilation.set_entry_module(lazy, Some(resolver)).unwrap();
        compilation.set_awaits_resolve(lazy, true).unwrap();
        compilation.add_entrypoint("app", vec![app]).unwrap();

        let trace = LoadSimulator::new(&compilation)
            .run(compilation.entrypoint("app").unwrap())
            .unwrap();

        let held = trace.position(LoadEvent::Hold(lazy)).unwrap();
        let sibling_in = trace.position(LoadEvent::Arrive(sibling)).unwrap();
        let resolved = trace.position(LoadEvent::Resolve(lazy)).unwrap();
        let resumed = trace.position(LoadEvent::Execute(resume)).unwrap();

        assert!(held < sibling_in);
        assert!(sibling_in < resolved);
        assert!(resolved < resumed);
        assert_eq!(trace.executed().iter().filter(|&&m| m == resume).count(), 1);
    }
}
