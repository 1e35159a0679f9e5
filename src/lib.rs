//! Divide library
//!
//! Splits the chunks of a bundler's chunk graph into balanced bundles and
//! synthesizes the loaders that join them back together at runtime.

pub mod bundler;
pub mod cli;
pub mod config;
pub mod loader;
pub mod plugins;
pub mod split;
pub mod utils;

pub use bundler::{BuildReport, Compilation, GraphError, GraphSnapshot};
pub use cli::Cli;
pub use config::Config;
pub use plugins::{BuildContext, DividePlugin, Plugin, PluginManager};
pub use split::{SplitPolicy, Strategy};
