//! Virtual paths.
//!
//! A [`VfsPath`] is a composite key: an ordered sequence of non-empty,
//! whitespace-trimmed segments. Its canonical text form is `/seg1/seg2`,
//! with the root rendered as `/`. Segments are always separated by `/`,
//! even when they denote Windows or URL-like locations such as
//! `c:/my/folder` or `mydomain.com/resource`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{VfsError, VfsResult};

/// Separator between path segments, on every platform.
pub const PATH_SEPARATOR: char = '/';

/// Reserved separator addressing a named resource fork inside a segment
/// (e.g. `/photos/a.png?thumb`). Only backends that support forks interpret it.
pub const FORK_SEPARATOR: char = '?';

const UNPORTABLE: &[u8] = b"*?:[]\"<>|(){}&'!\\;$";

/// Returns the byte index of the first character that is unsafe to use in
/// a path segment shared across platforms, or `None` if the string is safe.
///
/// Unsafe are `*?:[]"<>|(){}&'!\;$` and every control character up to
/// `0x1F`. The check is advisory; paths containing these characters are
/// still accepted everywhere.
pub fn unportable_character(s: &str) -> Option<usize> {
    s.bytes()
        .position(|b| b <= 0x1F || UNPORTABLE.contains(&b))
}

/// A normalized, slash-delimited virtual path.
///
/// Equality is segment equality, so `""`, `"/"` and `" / "` are all the root
/// and `/a/b/`, `a/b` and `//a//b` are the same path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct VfsPath {
    names: Vec<String>,
}

impl VfsPath {
    /// Parse a raw string. Never fails: empty segments are dropped.
    pub fn new(raw: &str) -> Self {
        Self {
            names: split_names(raw).collect(),
        }
    }

    /// The root path (zero segments).
    pub fn root() -> Self {
        Self::default()
    }

    /// Build a path from already-split segments, normalizing each one.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut path = Self::root();
        for name in names {
            path.names.extend(split_names(name.as_ref()));
        }
        path
    }

    /// Returns true for the root path.
    pub fn is_root(&self) -> bool {
        self.names.is_empty()
    }

    /// All segments in order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Number of segments.
    pub fn name_count(&self) -> usize {
        self.names.len()
    }

    /// Segment at `idx`.
    ///
    /// # Panics
    ///
    /// Panics if `idx >= name_count()`. Callers index with positions derived
    /// from a successful match against this path.
    pub fn name_at(&self, idx: usize) -> &str {
        &self.names[idx]
    }

    /// Last segment, or `None` for the root.
    pub fn name(&self) -> Option<&str> {
        self.names.last().map(String::as_str)
    }

    /// All segments except the last. The parent of the root is the root.
    pub fn parent(&self) -> Self {
        let end = self.names.len().saturating_sub(1);
        Self {
            names: self.names[..end].to_vec(),
        }
    }

    /// Append a child. A name containing `/` appends several segments.
    pub fn child(&self, name: &str) -> Self {
        let mut names = self.names.clone();
        names.extend(split_names(name));
        Self { names }
    }

    /// Append all segments of another path.
    pub fn join(&self, other: &VfsPath) -> Self {
        let mut names = self.names.clone();
        names.extend_from_slice(&other.names);
        Self { names }
    }

    /// Segment-wise prefix test: `/a/b` starts with `/a` but not with `/a/b/c`
    /// and `/ab` does not start with `/a`.
    pub fn starts_with(&self, prefix: &VfsPath) -> bool {
        self.names.starts_with(&prefix.names)
    }

    /// Segment-wise suffix test.
    pub fn ends_with(&self, suffix: &VfsPath) -> bool {
        self.names.ends_with(&suffix.names)
    }

    /// Remove a leading prefix.
    ///
    /// Fails with [`VfsError::InvalidPath`] if this path does not start with
    /// `prefix`; check [`starts_with`](Self::starts_with) first when unsure.
    pub fn trim_prefix(&self, prefix: &VfsPath) -> VfsResult<Self> {
        if !self.starts_with(prefix) {
            return Err(VfsError::invalid_path(format!(
                "{self} does not start with {prefix}"
            )));
        }
        Ok(Self {
            names: self.names[prefix.names.len()..].to_vec(),
        })
    }

    /// Resolve `.` and `..` lexically. `..` never climbs above the root.
    pub fn normalize(&self) -> Self {
        let mut names: Vec<String> = Vec::with_capacity(self.names.len());
        for name in &self.names {
            match name.as_str() {
                "." => {}
                ".." => {
                    names.pop();
                }
                _ => names.push(name.clone()),
            }
        }
        Self { names }
    }
}

/// Flatten the segments of all paths into one path.
pub fn concat_paths<'a>(paths: impl IntoIterator<Item = &'a VfsPath>) -> VfsPath {
    let mut names = Vec::new();
    for path in paths {
        names.extend(path.names.iter().cloned());
    }
    VfsPath { names }
}

fn split_names(raw: &str) -> impl Iterator<Item = String> + '_ {
    raw.split(PATH_SEPARATOR)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl fmt::Display for VfsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.names.is_empty() {
            return f.write_str("/");
        }
        for name in &self.names {
            write!(f, "/{name}")?;
        }
        Ok(())
    }
}

impl From<&str> for VfsPath {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for VfsPath {
    fn from(s: String) -> Self {
        Self::new(&s)
    }
}

impl From<&String> for VfsPath {
    fn from(s: &String) -> Self {
        Self::new(s)
    }
}

impl From<VfsPath> for String {
    fn from(p: VfsPath) -> Self {
        p.to_string()
    }
}
