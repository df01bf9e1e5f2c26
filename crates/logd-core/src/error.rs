use std::fmt;

/// Errors surfaced by the tree & diff kernel.
///
/// These map directly onto the `InvalidDiff` / `PatchConflict` kinds named
/// in the storage engine's error taxonomy; callers further up the stack
/// (the diff store, the reconstruction engine) wrap these with the path and
/// commit context they have available.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid diff at {path}: {reason}")]
    InvalidDiff { path: PathTrace, reason: String },

    #[error("patch conflict at {path}: precondition did not match current state")]
    PatchConflict { path: PathTrace },

    #[error("unsupported operator '{op}' at {path}")]
    UnsupportedOperator { op: String, path: PathTrace },

    #[error("malformed tag: {0}")]
    TagParse(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A position inside a tree, recorded the way `spec.md` requires a failing
/// patch to name "the offending path" — computed by walking down from the
/// root rather than stored on nodes (see the kernel's design notes on
/// back-pointers).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathTrace(pub Vec<PathSegment>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

impl PathTrace {
    pub fn root() -> Self {
        PathTrace(Vec::new())
    }

    pub fn child_field(&self, name: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Field(name.into()));
        PathTrace(segments)
    }

    pub fn child_index(&self, index: usize) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Index(index));
        PathTrace(segments)
    }
}

impl fmt::Display for PathTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "/");
        }
        for segment in &self.0 {
            match segment {
                PathSegment::Field(name) => write!(f, "/{name}")?,
                PathSegment::Index(idx) => write!(f, "[{idx}]")?,
            }
        }
        Ok(())
    }
}
