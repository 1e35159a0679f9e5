//! Configuration schema definitions

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::split::{GroupCount, SplitMode, SplitPolicy};

/// A number that may be written as a string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NumberLike {
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
}

impl NumberLike {
    /// Numeric value. Anything unparsable or non-finite is 0.
    pub fn value(&self) -> f64 {
        let value = match self {
            NumberLike::Int(n) => *n as f64,
            NumberLike::Float(f) => *f,
            NumberLike::Text(s) => s.trim().parse::<f64>().unwrap_or(0.0),
            NumberLike::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
        };

        if value.is_finite() {
            value
        } else {
            0.0
        }
    }
}

/// A single name or a list of names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            OneOrMany::One(name) => vec![name.clone()],
            OneOrMany::Many(names) => names.clone(),
        }
    }
}

/// One `[[plugin]]` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DivideOptions {
    /// Number of groups per chunk
    #[serde(skip_serializing_if = "Option::is_none")]
    pub divide: Option<NumberLike>,

    /// Group size ceiling in KB
    #[serde(alias = "max_size", alias = "maxSize", skip_serializing_if = "Option::is_none")]
    pub size: Option<NumberLike>,

    /// Load the groups lazily behind a loader chunk
    #[serde(rename = "async")]
    pub asynchronous: bool,

    /// Entry chunks to split. All of them if unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunks: Option<OneOrMany>,

    #[serde(alias = "excludeChunks")]
    pub exclude_chunks: Vec<String>,

    /// "balanced" (default) or "ceil"
    #[serde(alias = "divideMode", skip_serializing_if = "Option::is_none")]
    pub divide_mode: Option<String>,
}

impl Default for DivideOptions {
    fn default() -> Self {
        Self {
            divide: None,
            size: None,
            asynchronous: true,
            chunks: None,
            exclude_chunks: Vec::new(),
            divide_mode: None,
        }
    }
}

impl DivideOptions {
    /// Group count, truncated. Anything below 1 is 0.
    pub fn divide_count(&self) -> usize {
        let divide = self.divide.as_ref().map_or(0.0, NumberLike::value);
        if divide >= 1.0 {
            divide.floor() as usize
        } else {
            0
        }
    }

    /// Size ceiling in bytes
    pub fn size_bytes(&self) -> f64 {
        self.size.as_ref().map_or(0.0, NumberLike::value) * 1024.0
    }

    fn group_count(&self) -> GroupCount {
        match self.divide_mode.as_deref() {
            None | Some("balanced") => GroupCount::default(),
            Some("ceil") => GroupCount::ceil(),
            Some(other) => {
                warn!("Unknown divide_mode '{}', using balanced groups", other);
                GroupCount::default()
            }
        }
    }

    /// Normalize into an immutable splitting policy
    pub fn policy(&self) -> SplitPolicy {
        let mut policy = SplitPolicy {
            mode: SplitMode::from_limits(self.divide_count(), self.size_bytes()),
            group_count: self.group_count(),
            asynchronous: self.asynchronous,
            ..SplitPolicy::default()
        };

        if let Some(chunks) = &self.chunks {
            policy = policy.include(&chunks.to_vec());
        }

        policy.exclude(&self.exclude_chunks)
    }
}

/// Output settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputOptions {
    /// Annotate loader sources with chunk and module comments
    pub pathinfo: bool,
}
