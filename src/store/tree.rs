//! Immutable, structurally shared tree nodes.
//!
//! Trees are the payload of commits and the staging area of transactions.
//! Directories and file contents sit behind `Arc`s, so cloning a tree is
//! cheap and diffing two trees can skip whole shared subtrees by pointer
//! comparison. Mutation goes through copy-on-write (`Arc::make_mut`), which
//! leaves previously published snapshots untouched.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::NotASnafu;
use crate::error::SyncResult;
use crate::store::TreePath;

/// How a file changed between two trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChangeKind {
    /// The file exists only in the newer tree.
    Added,

    /// The file exists only in the older tree.
    Removed,

    /// The file exists in both trees with different contents.
    Updated,
}

/// A single file-level difference between two trees.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PathChange {
    /// Path of the file that changed.
    pub path: TreePath,

    /// Kind of change.
    pub kind: ChangeKind,
}

impl fmt::Display for PathChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.kind {
            ChangeKind::Added => '+',
            ChangeKind::Removed => '-',
            ChangeKind::Updated => '~',
        };
        write!(f, "{tag}{}", self.path)
    }
}

/// One node of a tree: a file with contents, or a directory of named nodes.
#[derive(Debug, Clone)]
pub(crate) enum Node {
    File(Arc<Vec<u8>>),
    Dir(Arc<BTreeMap<String, Node>>),
}

impl Default for Node {
    fn default() -> Self {
        Node::Dir(Arc::new(BTreeMap::new()))
    }
}

impl Node {
    pub(crate) fn file(contents: impl Into<Vec<u8>>) -> Self {
        Node::File(Arc::new(contents.into()))
    }

    pub(crate) fn is_dir(&self) -> bool {
        matches!(self, Node::Dir(_))
    }

    /// Look up the node at `path`.
    pub(crate) fn get(&self, path: &TreePath) -> Option<&Node> {
        let mut node = self;
        for segment in path.segments() {
            match node {
                Node::Dir(entries) => node = entries.get(segment)?,
                Node::File(_) => return None,
            }
        }
        Some(node)
    }

    /// List the entry names of the directory at `path`.
    pub(crate) fn read_dir(&self, path: &TreePath) -> Option<Vec<String>> {
        match self.get(path)? {
            Node::Dir(entries) => Some(entries.keys().cloned().collect()),
            Node::File(_) => None,
        }
    }

    /// Read the file contents at `path`.
    pub(crate) fn read_file(&self, path: &TreePath) -> Option<Vec<u8>> {
        match self.get(path)? {
            Node::File(contents) => Some(contents.as_ref().clone()),
            Node::Dir(_) => None,
        }
    }

    /// Create the directory chain down to `path`.
    pub(crate) fn make_dirs(&mut self, path: &TreePath) -> SyncResult<()> {
        let mut node = self;
        for segment in path.segments() {
            let entries = match node {
                Node::Dir(entries) => Arc::make_mut(entries),
                Node::File(_) => {
                    return NotASnafu {
                        path: path.to_string(),
                        expected: "directory",
                    }
                    .fail()
                }
            };
            node = entries.entry(segment.clone()).or_default();
        }
        match node {
            Node::Dir(_) => Ok(()),
            Node::File(_) => NotASnafu {
                path: path.to_string(),
                expected: "directory",
            }
            .fail(),
        }
    }

    /// Create or replace the file at `path`, creating parent directories.
    pub(crate) fn put_file(&mut self, path: &TreePath, contents: Vec<u8>) -> SyncResult<()> {
        let (parent, name) = match path.split_last() {
            Some(split) => split,
            None => {
                return NotASnafu {
                    path: path.to_string(),
                    expected: "file",
                }
                .fail()
            }
        };
        self.make_dirs(&parent)?;
        let Some(Node::Dir(entries)) = self.get_mut(&parent) else {
            return NotASnafu {
                path: parent.to_string(),
                expected: "directory",
            }
            .fail();
        };
        let entries = Arc::make_mut(entries);
        if let Some(Node::Dir(_)) = entries.get(name) {
            return NotASnafu {
                path: path.to_string(),
                expected: "file",
            }
            .fail();
        }
        entries.insert(name.to_string(), Node::file(contents));
        Ok(())
    }

    /// Remove the file or subtree at `path`. Returns whether anything was
    /// removed. Removing the root clears the whole tree.
    pub(crate) fn remove(&mut self, path: &TreePath) -> bool {
        let Some((parent, name)) = path.split_last() else {
            let was_empty = matches!(self, Node::Dir(entries) if entries.is_empty());
            *self = Node::default();
            return !was_empty;
        };
        match self.get_mut(&parent) {
            Some(Node::Dir(entries)) => Arc::make_mut(entries).remove(name).is_some(),
            _ => false,
        }
    }

    fn get_mut(&mut self, path: &TreePath) -> Option<&mut Node> {
        let mut node = self;
        for segment in path.segments() {
            match node {
                Node::Dir(entries) => node = Arc::make_mut(entries).get_mut(segment)?,
                Node::File(_) => return None,
            }
        }
        Some(node)
    }

    /// File-level differences between `self` (older) and `new` (newer),
    /// in path order.
    pub(crate) fn diff(&self, new: &Node) -> Vec<PathChange> {
        let mut changes = Vec::new();
        diff_nodes(&TreePath::root(), Some(self), Some(new), &mut changes);
        changes
    }
}

fn diff_nodes(path: &TreePath, old: Option<&Node>, new: Option<&Node>, out: &mut Vec<PathChange>) {
    match (old, new) {
        (None, None) => {}
        (Some(Node::File(a)), Some(Node::File(b))) => {
            if !Arc::ptr_eq(a, b) && a != b {
                out.push(PathChange {
                    path: path.clone(),
                    kind: ChangeKind::Updated,
                });
            }
        }
        (Some(Node::Dir(a)), Some(Node::Dir(b))) => {
            if Arc::ptr_eq(a, b) {
                return;
            }
            let names: std::collections::BTreeSet<&String> = a.keys().chain(b.keys()).collect();
            for name in names {
                diff_nodes(&path.join(name.clone()), a.get(name), b.get(name), out);
            }
        }
        // File replaced by directory or the other way around: report the
        // removal of one shape and the addition of the other.
        (Some(old_node), Some(new_node)) => {
            diff_nodes(path, Some(old_node), None, out);
            diff_nodes(path, None, Some(new_node), out);
        }
        (Some(Node::File(_)), None) => out.push(PathChange {
            path: path.clone(),
            kind: ChangeKind::Removed,
        }),
        (None, Some(Node::File(_))) => out.push(PathChange {
            path: path.clone(),
            kind: ChangeKind::Added,
        }),
        (Some(Node::Dir(entries)), None) => {
            for (name, child) in entries.iter() {
                diff_nodes(&path.join(name.clone()), Some(child), None, out);
            }
        }
        (None, Some(Node::Dir(entries))) => {
            for (name, child) in entries.iter() {
                diff_nodes(&path.join(name.clone()), None, Some(child), out);
            }
        }
    }
}
