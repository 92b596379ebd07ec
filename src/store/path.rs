//! Slash-separated paths into a Store tree.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// A path in a Store tree: an ordered list of non-empty segments.
///
/// The root is the empty path.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TreePath(Vec<String>);

impl TreePath {
    /// The root path.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Build a path from segments.
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Parse a slash-separated path. Empty segments are dropped, so
    /// `"a//b/"` and `"a/b"` are the same path.
    pub fn parse(s: &str) -> Self {
        Self(s.split('/').filter(|seg| !seg.is_empty()).map(str::to_string).collect())
    }

    /// The segments in order.
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Whether this is the root path.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the path has no segments.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// A new path with `segment` appended.
    pub fn join(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    /// A new path with all of `tail`'s segments appended.
    pub fn concat(&self, tail: &TreePath) -> Self {
        let mut segments = self.0.clone();
        segments.extend(tail.0.iter().cloned());
        Self(segments)
    }

    /// Parent directory and final segment, unless this is the root.
    pub fn split_last(&self) -> Option<(TreePath, &str)> {
        let (last, init) = self.0.split_last()?;
        Some((Self(init.to_vec()), last.as_str()))
    }

    /// Parent directory, unless this is the root.
    pub fn parent(&self) -> Option<TreePath> {
        self.split_last().map(|(parent, _)| parent)
    }
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

impl FromIterator<String> for TreePath {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
