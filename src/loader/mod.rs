//! Loader synthesis
//!
//! A loader is the synthetic entry module of a chunk produced by an async
//! split. It fetches a list of chunks in parallel, waits for all of them and
//! then continues: it either signals that a held chunk is now complete, or
//! runs the real entry module, or both. The program is kept as data and only
//! turned into text by [`LoaderProgram::render`].

pub mod runtime;

use serde::{Deserialize, Serialize};

use crate::bundler::{ChunkId, Compilation, ModuleId};

/// Names of the host runtime functions the generated code calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeGlobals {
    /// Module require function
    pub require: String,

    /// Chunk fetch, returns a promise
    pub ensure: String,

    /// Unhandled error channel
    pub on_error: String,

    /// Resolve signal for held chunks
    pub resolve: String,

    /// Window-level registry used to hold chunks
    pub wait_resolve: String,
}

impl Default for RuntimeGlobals {
    fn default() -> Self {
        Self {
            require: "__webpack_require__".to_string(),
            ensure: "__webpack_require__.e".to_string(),
            on_error: "__webpack_require__.oe".to_string(),
            resolve: "__webpack_require__._resolve".to_string(),
            wait_resolve: "__webpackWaitResolve".to_string(),
        }
    }
}

/// Options controlling generated text
#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    /// Annotate ids with the file or request they stand for
    pub pathinfo: bool,

    pub globals: RuntimeGlobals,
}

/// What runs once every fetch has completed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Continuation {
    /// Release everything waiting on these chunks
    Resolve(Vec<ChunkId>),

    /// Run the original entry module
    Require(ModuleId),
}

/// One statement of a loader
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// `var all = [];`
    DeclareAll,

    /// Start fetching a chunk and collect its promise
    PushEnsure(ChunkId),

    /// Wait for every collected promise, then continue or report
    JoinAll(Vec<Continuation>),
}

/// The source of a loader module, as a statement list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderProgram {
    statements: Vec<Statement>,
}

impl LoaderProgram {
    /// Fetch `chunks`, then run `then` in order
    pub fn new(chunks: Vec<ChunkId>, then: impl IntoIterator<Item = Continuation>) -> Self {
        let mut statements = Vec::with_capacity(chunks.len() + 2);
        statements.push(Statement::DeclareAll);
        statements.extend(chunks.into_iter().map(Statement::PushEnsure));
        statements.push(Statement::JoinAll(then.into_iter().collect()));

        Self { statements }
    }

    /// Build the loader for a split: the resolve signal goes out before the
    /// entry module runs.
    pub fn synthesize(
        chunks: &[ChunkId],
        entry: Option<ModuleId>,
        resolve: Option<&[ChunkId]>,
    ) -> Self {
        let resolve = resolve.map(|ids| Continuation::Resolve(ids.to_vec()));
        let require = entry.map(Continuation::Require);

        Self::new(chunks.to_vec(), resolve.into_iter().chain(require))
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    /// Chunks fetched by this loader, in order
    pub fn chunks(&self) -> Vec<ChunkId> {
        self.statements
            .iter()
            .filter_map(|statement| match statement {
                Statement::PushEnsure(id) => Some(*id),
                _ => None,
            })
            .collect()
    }

    pub fn continuations(&self) -> &[Continuation] {
        self.statements
            .iter()
            .find_map(|statement| match statement {
                Statement::JoinAll(then) => Some(then.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }

    /// The entry module run after loading, if any
    pub fn entry(&self) -> Option<ModuleId> {
        self.continuations().iter().find_map(|c| match c {
            Continuation::Require(id) => Some(*id),
            Continuation::Resolve(_) => None,
        })
    }

    /// Render without module request annotations
    pub fn render(&self, options: &RenderOptions) -> String {
        self.render_with(options, |_| None)
    }

    /// Render, annotating module ids with requests from the compilation
    pub fn render_for(&self, compilation: &Compilation, options: &RenderOptions) -> String {
        self.render_with(options, |id| {
            compilation.module(id).ok().map(|m| m.identifier.clone())
        })
    }

    fn render_with(&self, options: &RenderOptions, request: impl Fn(ModuleId) -> Option<String>) -> String {
        let globals = &options.globals;
        let mut lines = Vec::with_capacity(self.statements.len() + 2);

        for statement in &self.statements {
            match statement {
                Statement::DeclareAll => lines.push("var all = [];".to_string()),
                Statement::PushEnsure(chunk) => {
                    let info = if options.pathinfo {
                        comment(&format!("{}.js", chunk))
                    } else {
                        String::new()
                    };
                    lines.push(format!("all.push({}({}{}));", globals.ensure, info, chunk));
                }
                Statement::JoinAll(then) => {
                    lines.push("Promise.all(all).then(function () {".to_string());
                    for continuation in then {
                        lines.push(format!("    {};", continuation_call(continuation, options, &request)));
                    }
                    lines.push(format!("}}).catch({});", globals.on_error));
                }
            }
        }

        lines.join("\n")
    }
}

fn continuation_call(
    continuation: &Continuation,
    options: &RenderOptions,
    request: &impl Fn(ModuleId) -> Option<String>,
) -> String {
    let globals = &options.globals;

    match continuation {
        Continuation::Resolve(chunks) => {
            let ids: Vec<String> = chunks.iter().map(ToString::to_string).collect();
            format!("{}([{}])", globals.resolve, ids.join(", "))
        }
        Continuation::Require(module) => {
            let info = match request(*module) {
                Some(request) if options.pathinfo => comment(&request),
                _ => String::new(),
            };
            format!("{}({}{})", globals.require, info, module)
        }
    }
}

/// `/*! text */`, with anything that would close the comment defused
fn comment(text: &str) -> String {
    format!("/*! {} */", text.replace("*/", "*_/"))
}
