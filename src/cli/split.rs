//! Split command implementation

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tracing::info;

use crate::bundler::{BuildReport, Compilation, GraphSnapshot};
use crate::config::{Config, CONFIG_FILE};
use crate::loader::runtime::{FetchOrder, LoadEvent, LoadSimulator, LoadTrace};
use crate::plugins::{BuildContext, HtmlOptions};
use crate::utils::{format_duration, format_size};

/// Split the chunks of a serialized chunk graph
#[derive(Args, Debug)]
pub struct SplitCommand {
    /// Chunk graph snapshot (JSON)
    pub graph: PathBuf,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,

    /// Replay how each entry point loads after splitting
    #[arg(long)]
    pub trace: bool,

    /// Complete outstanding fetches newest first when tracing
    #[arg(long)]
    pub lifo: bool,

    /// Chunk names for the generated page, comma separated
    #[arg(long, value_delimiter = ',')]
    pub html: Option<Vec<String>>,

    /// Annotate loader sources with chunk and module comments
    #[arg(long)]
    pub pathinfo: bool,
}

/// Machine-readable result of a split
#[derive(Debug, Serialize)]
pub struct SplitOutput {
    pub report: BuildReport,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub traces: Vec<(String, LoadTrace)>,
}

impl SplitCommand {
    pub fn execute(&self, config_path: Option<&str>) -> Result<()> {
        let start = Instant::now();

        let config = match config_path {
            Some(path) => {
                info!("Loading configuration from {}", path);
                Config::load(path)?
            }
            None => Config::load_or_default(CONFIG_FILE)?,
        };

        let content = fs::read_to_string(&self.graph)
            .with_context(|| format!("Failed to read chunk graph: {}", self.graph.display()))?;
        let mut compilation = GraphSnapshot::from_json(&content)
            .and_then(GraphSnapshot::into_compilation)
            .with_context(|| format!("Invalid chunk graph: {}", self.graph.display()))?;

        let before = entry_modules(&compilation);

        let manager = config.plugin_manager();
        let mut ctx = BuildContext::new();
        manager.optimize(&mut compilation, &mut ctx)?;

        if entry_modules(&compilation) != before {
            bail!("Splitting changed the modules reachable from an entry point");
        }

        let html_options = match &self.html {
            Some(chunks) => Some(HtmlOptions {
                chunks: Some(chunks.clone()),
                exclude_chunks: Vec::new(),
            }),
            None => config.html.clone(),
        };
        let html = match &html_options {
            Some(options) => {
                let chunks = manager.html_chunks(&compilation, options, &ctx)?;
                Some(
                    chunks
                        .into_iter()
                        .map(|id| compilation.chunk(id).map(|chunk| chunk.display_name()))
                        .collect::<Result<Vec<_>, _>>()?,
                )
            }
            None => None,
        };

        manager.build_end(ctx)?;

        let mut render = config.render_options();
        render.pathinfo |= self.pathinfo;
        let report = BuildReport::new(&compilation, &render);

        let traces = if self.trace {
            self.traces(&compilation)?
        } else {
            Vec::new()
        };

        if self.json {
            let output = SplitOutput { report, html, traces };
            println!("{}", serde_json::to_string_pretty(&output)?);
            return Ok(());
        }

        print_summary(&report, html.as_deref(), &traces, start.elapsed());
        Ok(())
    }

    fn traces(&self, compilation: &Compilation) -> Result<Vec<(String, LoadTrace)>> {
        let order = if self.lifo { FetchOrder::Lifo } else { FetchOrder::Fifo };
        let simulator = LoadSimulator::new(compilation).with_order(order);

        let mut traces = Vec::new();
        for entrypoint in compilation.entrypoints() {
            traces.push((entrypoint.name.clone(), simulator.run(entrypoint)?));
        }
        Ok(traces)
    }
}

/// Identifiers of resource modules reachable from each entry point
fn entry_modules(compilation: &Compilation) -> Vec<(String, BTreeSet<String>)> {
    compilation
        .entrypoints()
        .iter()
        .map(|entrypoint| {
            let modules = compilation
                .reachable_modules(entrypoint)
                .into_iter()
                .filter_map(|id| compilation.module(id).ok())
                .filter(|module| !module.is_loader())
                .map(|module| module.identifier.clone())
                .collect();
            (entrypoint.name.clone(), modules)
        })
        .collect()
}

fn print_summary(
    report: &BuildReport,
    html: Option<&[String]>,
    traces: &[(String, LoadTrace)],
    elapsed: std::time::Duration,
) {
    println!(
        "{} {} chunk(s) in {}\n",
        "✓".green().bold(),
        report.chunks.len(),
        format_duration(elapsed)
    );

    for chunk in &report.chunks {
        let name = chunk
            .name
            .clone()
            .unwrap_or_else(|| chunk.id.to_string());
        let mut tags = Vec::new();
        if chunk.runtime {
            tags.push("runtime");
        } else if chunk.initial {
            tags.push("initial");
        }
        if chunk.awaits_resolve {
            tags.push("held");
        }

        println!(
            "  {} {} {} {} {}",
            "•".dimmed(),
            format!("[{}]", chunk.id).dimmed(),
            name.cyan(),
            format!("{} modules, {}", chunk.modules.len(), format_size(chunk.size)).dimmed(),
            tags.join(" ").yellow()
        );
    }

    if !report.loaders.is_empty() {
        println!("\n{}", "Loaders".bold());
        for loader in &report.loaders {
            println!("  {} {}", "•".dimmed(), loader.identifier.cyan());
            for line in loader.source.lines() {
                println!("      {}", line.dimmed());
            }
        }
    }

    if let Some(patch) = &report.bootstrap {
        println!("\n{}", "Bootstrap (after installedChunks)".bold());
        for line in patch.globals.lines() {
            println!("      {}", line.dimmed());
        }
        println!("\n{}", "Bootstrap (top of the chunk fetch function)".bold());
        for line in patch.ensure_guard.lines() {
            println!("      {}", line.dimmed());
        }
        for chunk in &report.chunks {
            if let Some(hold) = &chunk.hold {
                println!("  {} chunk {} starts with {}", "•".dimmed(), chunk.id, hold.cyan());
            }
        }
    }

    println!("\n{}", "Entry points".bold());
    for (name, chunks) in &report.entrypoints {
        let ids: Vec<String> = chunks.iter().map(ToString::to_string).collect();
        println!("  {} {} -> [{}]", "•".dimmed(), name.cyan(), ids.join(", "));
    }

    if let Some(html) = html {
        println!("\n{} {}", "Page chunks:".bold(), html.join(", "));
    }

    for (name, trace) in traces {
        println!("\n{} {}", "Load trace".bold(), name.cyan());
        for event in &trace.events {
            let line = match event {
                LoadEvent::Fetch(id) => format!("fetch   chunk {}", id),
                LoadEvent::Arrive(id) => format!("arrive  chunk {}", id),
                LoadEvent::Hold(id) => format!("hold    chunk {}", id),
                LoadEvent::Resolve(id) => format!("resolve chunk {}", id),
                LoadEvent::Execute(id) => format!("execute module {}", id),
                LoadEvent::Error(id) => format!("error   chunk {}", id).red().to_string(),
            };
            println!("  {}", line);
        }
    }

    println!();
}
