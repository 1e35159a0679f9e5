//! Chunk name filters

use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::warn;

/// Matches chunk names against exact names or glob patterns
#[derive(Debug, Clone)]
pub struct ChunkFilter {
    globs: GlobSet,
    literals: Vec<String>,
}

impl ChunkFilter {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Self {
        let mut builder = GlobSetBuilder::new();
        let mut literals = Vec::new();

        for pattern in patterns {
            let pattern = pattern.as_ref();
            match Glob::new(pattern) {
                Ok(glob) => {
                    builder.add(glob);
                }
                Err(e) => {
                    warn!("Treating chunk pattern '{}' as a plain name: {}", pattern, e);
                    literals.push(pattern.to_string());
                }
            }
        }

        let globs = builder.build().unwrap_or_else(|e| {
            warn!("Ignoring chunk patterns: {}", e);
            literals.extend(patterns.iter().map(|p| p.as_ref().to_string()));
            GlobSet::empty()
        });

        Self { globs, literals }
    }

    pub fn empty() -> Self {
        Self::new::<&str>(&[])
    }

    pub fn matches(&self, name: &str) -> bool {
        self.literals.iter().any(|literal| literal == name) || self.globs.is_match(name)
    }
}

impl Default for ChunkFilter {
    fn default() -> Self {
        Self::empty()
    }
}
