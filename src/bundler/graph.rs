//! Module records of the chunk graph

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::ChunkId;
use crate::loader::LoaderProgram;

/// Stable identifier of a module, as assigned by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleId(pub usize);

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a module is made of
#[derive(Debug, Clone)]
pub enum ModuleKind {
    /// A module backed by a real resource
    Normal,

    /// A synthesized loader whose source is generated from a program
    Loader(LoaderProgram),
}

/// A module in the chunk graph
#[derive(Debug, Clone)]
pub struct Module {
    /// Module id
    pub id: ModuleId,

    /// Resource identifier (request path, including loader prefixes)
    pub identifier: String,

    /// Size of the module source in bytes
    pub size: usize,

    /// Reverse index: chunks this module currently belongs to
    pub chunks: BTreeSet<ChunkId>,

    /// Normal or synthesized
    pub kind: ModuleKind,
}

impl Module {
    /// Create a module backed by a resource
    pub fn new(id: ModuleId, identifier: impl Into<String>, size: usize) -> Self {
        Self {
            id,
            identifier: identifier.into(),
            size,
            chunks: BTreeSet::new(),
            kind: ModuleKind::Normal,
        }
    }

    /// Create a synthesized loader module
    pub fn loader(id: ModuleId, name: impl Into<String>, program: LoaderProgram) -> Self {
        let size = program.render(&Default::default()).len();

        Self {
            id,
            identifier: format!("ensure {}", name.into()),
            size,
            chunks: BTreeSet::new(),
            kind: ModuleKind::Loader(program),
        }
    }

    /// The loader program, if this module was synthesized
    pub fn program(&self) -> Option<&LoaderProgram> {
        match &self.kind {
            ModuleKind::Loader(program) => Some(program),
            ModuleKind::Normal => None,
        }
    }

    pub fn is_loader(&self) -> bool {
        matches!(self.kind, ModuleKind::Loader(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::Continuation;

    #[test]
    fn test_normal_module() {
        let module = Module::new(ModuleId(3), "./lib/xlass.js", 5 * 1024);
        assert_eq!(module.size, 5120);
        assert!(!module.is_loader());
        assert!(module.program().is_none());
        assert!(module.chunks.is_empty());
    }

    #[test]
    fn test_loader_module_sized_from_source() {
        let program = LoaderProgram::new(
            vec![ChunkId(1), ChunkId(2)],
            Some(Continuation::Require(ModuleId(0))),
        );
        let expected = program.render(&Default::default()).len();

        let module = Module::loader(ModuleId(9), "divide-entry-module_app", program);
        assert_eq!(module.identifier, "ensure divide-entry-module_app");
        assert_eq!(module.size, expected);
        assert!(module.is_loader());
    }
}
