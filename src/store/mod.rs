//! The Store surface consumed by the bridge.
//!
//! The Store is a transactional, versioned filesystem: branches point at
//! commits, commits carry immutable trees, transactions stage mutations and
//! close with a commit or an abort. The conversion layer only ever needs a
//! *readable tree* — something with file/directory queries — so that seam is
//! a trait ([`TreeRead`]) satisfied both by a commit's tree and by an open
//! transaction's staged view.

use async_trait::async_trait;

use crate::error::SyncResult;

mod path;
mod tree;

pub mod memory;

pub use path::TreePath;
pub use tree::ChangeKind;
pub use tree::PathChange;

/// Read access to a tree of files.
#[async_trait]
pub trait TreeRead: Send + Sync {
    /// Whether a file exists at `path`.
    async fn exists_file(&self, path: &TreePath) -> SyncResult<bool>;

    /// Whether a directory exists at `path`.
    async fn exists_dir(&self, path: &TreePath) -> SyncResult<bool>;

    /// Read the file at `path`, if any.
    async fn read_file(&self, path: &TreePath) -> SyncResult<Option<Vec<u8>>>;

    /// List the entries of the directory at `path`, in name order.
    /// `None` when the directory does not exist.
    async fn read_dir(&self, path: &TreePath) -> SyncResult<Option<Vec<String>>>;
}

#[async_trait]
impl<T: TreeRead + ?Sized> TreeRead for &T {
    async fn exists_file(&self, path: &TreePath) -> SyncResult<bool> {
        (**self).exists_file(path).await
    }

    async fn exists_dir(&self, path: &TreePath) -> SyncResult<bool> {
        (**self).exists_dir(path).await
    }

    async fn read_file(&self, path: &TreePath) -> SyncResult<Option<Vec<u8>>> {
        (**self).read_file(path).await
    }

    async fn read_dir(&self, path: &TreePath) -> SyncResult<Option<Vec<String>>> {
        (**self).read_dir(path).await
    }
}
