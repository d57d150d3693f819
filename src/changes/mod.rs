//! Path-level change records.
//!
//! The decoder emits one raw [`Change`] per effect of each command, in stream
//! order. [`normalize`] compacts that list into the canonical set, at most
//! one entry per path.

mod compact;

pub use compact::normalize;

use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Modify,
    Add,
    Delete,
}

impl ChangeKind {
    /// Letter used in container layer change listings.
    pub fn symbol(&self) -> char {
        match self {
            ChangeKind::Modify => 'C',
            ChangeKind::Add => 'A',
            ChangeKind::Delete => 'D',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    /// Absolute path inside the snapshot, byte for byte as the stream has it.
    #[serde(serialize_with = "serialize_path_lossy")]
    pub path: PathBuf,
    pub kind: ChangeKind,
}

impl Change {
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    pub fn add(path: impl Into<PathBuf>) -> Self {
        Self::new(path, ChangeKind::Add)
    }

    pub fn modify(path: impl Into<PathBuf>) -> Self {
        Self::new(path, ChangeKind::Modify)
    }

    pub fn delete(path: impl Into<PathBuf>) -> Self {
        Self::new(path, ChangeKind::Delete)
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind.symbol(), self.path.display())
    }
}

/// JSON strings must be UTF-8, so non UTF-8 names are only lossy on output.
fn serialize_path_lossy<S: Serializer>(path: &Path, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&path.to_string_lossy())
}
