//! Sample project initialization command

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use crate::config::CONFIG_FILE;

const SAMPLE_GRAPH: &str = "graph.json";

/// Write a sample divide.toml and graph.json
#[derive(Args, Debug)]
pub struct InitCommand {
    /// Target directory
    #[arg(default_value = ".")]
    pub dir: String,

    /// Overwrite existing files
    #[arg(short, long)]
    pub force: bool,
}

impl InitCommand {
    pub fn execute(&self) -> Result<()> {
        let dir = Path::new(&self.dir);

        eprintln!("{} Writing sample files to {}...\n", "→".blue(), self.dir.cyan());

        if self.dir != "." {
            fs::create_dir_all(dir).context("Failed to create target directory")?;
        }

        self.write(dir, CONFIG_FILE, &generate_config())?;
        self.write(dir, SAMPLE_GRAPH, generate_graph())?;

        eprintln!("\n{} Done!\n", "✓".green().bold());
        eprintln!("  Next steps:");
        if self.dir != "." {
            eprintln!("    {} cd {}", "→".dimmed(), self.dir.cyan());
        }
        eprintln!("    {} divide split {} --trace", "→".dimmed(), SAMPLE_GRAPH);
        eprintln!();

        Ok(())
    }

    fn write(&self, dir: &Path, name: &str, content: &str) -> Result<()> {
        let path = dir.join(name);
        if path.exists() && !self.force {
            bail!("{} already exists, use --force to overwrite it", path.display());
        }

        fs::write(&path, content).with_context(|| format!("Failed to write {}", name))?;
        eprintln!("  {} Created {}", "✓".green(), name.cyan());
        Ok(())
    }
}

fn generate_config() -> String {
    format!(
        r#"# Divide configuration
#
# One [[plugin]] table per splitting pass. Passes run in order and never
# split a chunk twice.

[[plugin]]
# Split the "app" entry into three bundles loaded lazily by a loader chunk
divide = 3
chunks = "app"

[[plugin]]
# Chain the "login" entry into bundles below 2 KB, loaded in order
size = 2
async = false
chunks = ["login"]

[html]
chunks = ["login"]

[output]
pathinfo = false

# Generated with divide v{version}
"#,
        version = env!("CARGO_PKG_VERSION")
    )
}

fn generate_graph() -> &'static str {
    r#"{
  "modules": [
    { "identifier": "./src/app.js", "size": 1024 },
    { "identifier": "./src/lib/common.js", "size": 1024 },
    { "identifier": "./src/lib/xlass.js", "size": 5120 },
    { "identifier": "./src/lib/other.js", "size": 1024 },
    { "identifier": "./src/lazy/editor.js", "size": 2048 },
    { "identifier": "./src/login.js", "size": 512 },
    { "identifier": "./src/lib/form.js", "size": 1024 },
    { "identifier": "./src/lib/validate.js", "size": 1024 }
  ],
  "chunks": [
    { "name": "app", "modules": [0, 1, 2, 3], "entry_module": 0 },
    { "modules": [4], "parents": [0], "origins": [2] },
    { "name": "login", "modules": [5, 6, 7], "entry_module": 5 }
  ],
  "entrypoints": [
    { "name": "app", "chunks": [0] },
    { "name": "login", "chunks": [2] }
  ]
}
"#
}
