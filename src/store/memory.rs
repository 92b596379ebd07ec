//! In-process transactional Store.
//!
//! A deterministic, in-memory implementation of the Store contract the
//! bridge consumes: named branches pointing at commits, commits carrying
//! immutable trees, transactions staging copy-on-write mutations, three-way
//! merge with explicit conflicts, and watchable branch heads. The entire
//! test suite runs against this backend.
//!
//! Locking: the store keeps one mutex over branch heads and the commit
//! graph; each transaction keeps its own mutex over its staged tree. No
//! lock is held across an await point.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::debug;

use crate::error::FastForwardRejectedSnafu;
use crate::error::SyncResult;
use crate::error::TransactionClosedSnafu;
use crate::error::TransactionConflictSnafu;
use crate::error::UnknownCommitSnafu;
use crate::store::tree::Node;
use crate::store::PathChange;
use crate::store::TreePath;
use crate::store::TreeRead;

/// Identifier of a Store commit.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommitId(String);

impl CommitId {
    /// The identifier as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct CommitData {
    parents: Vec<CommitId>,
    root: Node,
    message: String,
}

struct BranchData {
    head: watch::Sender<Option<CommitId>>,
}

#[derive(Default)]
struct StoreState {
    commits: HashMap<CommitId, CommitData>,
    branches: BTreeMap<String, BranchData>,
    next_commit: u64,
}

impl StoreState {
    fn branch(&mut self, name: &str) -> &mut BranchData {
        self.branches.entry(name.to_string()).or_insert_with(|| {
            let (head, _) = watch::channel(None);
            BranchData { head }
        })
    }

    fn head_of(&mut self, name: &str) -> Option<CommitId> {
        self.branch(name).head.borrow().clone()
    }

    fn mint_id(&mut self) -> CommitId {
        self.next_commit += 1;
        CommitId(format!("{:08x}", self.next_commit))
    }

    /// All ancestors of `id`, including `id` itself.
    fn ancestors(&self, id: &CommitId) -> BTreeSet<CommitId> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([id.clone()]);
        while let Some(current) = queue.pop_front() {
            if seen.insert(current.clone()) {
                if let Some(data) = self.commits.get(&current) {
                    queue.extend(data.parents.iter().cloned());
                }
            }
        }
        seen
    }

    /// Lowest common ancestor of two commits, if their histories meet.
    fn merge_base(&self, a: &CommitId, b: &CommitId) -> Option<CommitId> {
        let reachable = self.ancestors(a);
        let mut queue = VecDeque::from([b.clone()]);
        let mut seen = BTreeSet::new();
        while let Some(current) = queue.pop_front() {
            if reachable.contains(&current) {
                return Some(current);
            }
            if seen.insert(current.clone()) {
                if let Some(data) = self.commits.get(&current) {
                    queue.extend(data.parents.iter().cloned());
                }
            }
        }
        None
    }
}

/// A deterministic in-memory Store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to a branch, creating it (headless) on first use.
    pub fn branch(&self, name: impl Into<String>) -> Branch {
        let name = name.into();
        self.state.lock().unwrap().branch(&name);
        Branch {
            store: self.clone(),
            name,
        }
    }

    fn commit_data<T>(&self, id: &CommitId, f: impl FnOnce(&CommitData) -> T) -> SyncResult<T> {
        let state = self.state.lock().unwrap();
        match state.commits.get(id) {
            Some(data) => Ok(f(data)),
            None => UnknownCommitSnafu { id: id.to_string() }.fail(),
        }
    }

    fn commit_handle(&self, id: CommitId) -> StoreCommit {
        StoreCommit {
            store: self.clone(),
            id,
        }
    }
}

/// A commit in a [`MemoryStore`].
#[derive(Clone)]
pub struct StoreCommit {
    store: MemoryStore,
    id: CommitId,
}

impl StoreCommit {
    /// The commit identifier.
    pub fn id(&self) -> &CommitId {
        &self.id
    }

    /// The commit's immutable tree.
    pub fn tree(&self) -> SyncResult<Tree> {
        self.store.commit_data(&self.id, |data| Tree {
            root: data.root.clone(),
        })
    }

    /// Parent commits.
    pub fn parents(&self) -> SyncResult<Vec<StoreCommit>> {
        let parents = self.store.commit_data(&self.id, |data| data.parents.clone())?;
        Ok(parents.into_iter().map(|id| self.store.commit_handle(id)).collect())
    }

    /// The commit message.
    pub fn message(&self) -> SyncResult<String> {
        self.store.commit_data(&self.id, |data| data.message.clone())
    }

    /// Whether `self` is an ancestor of `other` (or the same commit).
    pub fn is_ancestor_of(&self, other: &StoreCommit) -> bool {
        let state = self.store.state.lock().unwrap();
        state.ancestors(&other.id).contains(&self.id)
    }
}

impl PartialEq for StoreCommit {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for StoreCommit {}

impl fmt::Debug for StoreCommit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StoreCommit").field(&self.id.0).finish()
    }
}

/// An immutable tree snapshot.
#[derive(Clone)]
pub struct Tree {
    root: Node,
}

impl Tree {
    /// File-level changes from `self` to `newer`.
    pub fn diff(&self, newer: &Tree) -> Vec<PathChange> {
        self.root.diff(&newer.root)
    }
}

#[async_trait]
impl TreeRead for Tree {
    async fn exists_file(&self, path: &TreePath) -> SyncResult<bool> {
        Ok(matches!(self.root.get(path), Some(node) if !node.is_dir()))
    }

    async fn exists_dir(&self, path: &TreePath) -> SyncResult<bool> {
        Ok(matches!(self.root.get(path), Some(node) if node.is_dir()))
    }

    async fn read_file(&self, path: &TreePath) -> SyncResult<Option<Vec<u8>>> {
        Ok(self.root.read_file(path))
    }

    async fn read_dir(&self, path: &TreePath) -> SyncResult<Option<Vec<String>>> {
        Ok(self.root.read_dir(path))
    }
}

/// A branch of a [`MemoryStore`].
#[derive(Clone)]
pub struct Branch {
    store: MemoryStore,
    name: String,
}

impl Branch {
    /// The branch name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current head commit, if the branch has one.
    pub async fn head(&self) -> Option<StoreCommit> {
        let id = self.store.state.lock().unwrap().head_of(&self.name)?;
        Some(self.store.commit_handle(id))
    }

    /// Open a transaction staged on the current head.
    pub async fn transaction(&self) -> SyncResult<Transaction> {
        let (base_head, root) = {
            let mut state = self.store.state.lock().unwrap();
            match state.head_of(&self.name) {
                Some(id) => {
                    let root = match state.commits.get(&id) {
                        Some(data) => data.root.clone(),
                        None => return UnknownCommitSnafu { id: id.to_string() }.fail(),
                    };
                    (Some(id), root)
                }
                None => (None, Node::default()),
            }
        };
        Ok(Transaction {
            store: self.store.clone(),
            branch: self.name.clone(),
            base_head,
            state: Mutex::new(TxState {
                root,
                merged_parents: Vec::new(),
                closed: false,
            }),
        })
    }

    /// Run `f` with a fresh transaction. The transaction is aborted if `f`
    /// leaves it open, so an early `?` inside `f` cannot leak one; `f`
    /// commits explicitly when it wants its changes kept.
    pub async fn with_transaction<T, F, Fut>(&self, f: F) -> SyncResult<T>
    where
        F: FnOnce(Arc<Transaction>) -> Fut,
        Fut: std::future::Future<Output = SyncResult<T>>,
    {
        let tx = Arc::new(self.transaction().await?);
        let result = f(Arc::clone(&tx)).await;
        if !tx.closed() {
            tx.abort().await;
        }
        result
    }

    /// Move the head forward to `commit`.
    ///
    /// The current head (when there is one) must be an ancestor of `commit`.
    pub async fn fast_forward(&self, commit: &StoreCommit) -> SyncResult<()> {
        let mut state = self.store.state.lock().unwrap();
        if !state.commits.contains_key(&commit.id) {
            return UnknownCommitSnafu {
                id: commit.id.to_string(),
            }
            .fail();
        }
        if let Some(head) = state.head_of(&self.name) {
            if head != commit.id && !state.ancestors(&commit.id).contains(&head) {
                return FastForwardRejectedSnafu {
                    branch: self.name.clone(),
                }
                .fail();
            }
        }
        state.branch(&self.name).head.send_replace(Some(commit.id.clone()));
        Ok(())
    }

    /// Subscribe to head changes.
    pub fn watch(&self) -> watch::Receiver<Option<CommitId>> {
        self.store.state.lock().unwrap().branch(&self.name).head.subscribe()
    }
}

struct TxState {
    root: Node,
    merged_parents: Vec<CommitId>,
    closed: bool,
}

/// The `ours`/`theirs`/`base` views of a three-way merge.
pub struct ThreeWay {
    /// The transaction's tree as it was before the merge applied anything.
    pub ours: Tree,

    /// The merged commit's tree.
    pub theirs: Tree,

    /// The common ancestor's tree (empty when histories are unrelated).
    pub base: Tree,
}

/// An open transaction on a branch.
///
/// A transaction must be closed exactly once, by [`commit`](Self::commit) or
/// [`abort`](Self::abort). Dropping an open transaction aborts it, so an
/// unwinding tick cannot leak one.
pub struct Transaction {
    store: MemoryStore,
    branch: String,
    base_head: Option<CommitId>,
    state: Mutex<TxState>,
}

impl Transaction {
    /// The branch this transaction belongs to.
    pub fn branch_name(&self) -> &str {
        &self.branch
    }

    /// The commits this transaction is based on: the branch head at open
    /// time plus any merged commits.
    pub fn parents(&self) -> Vec<StoreCommit> {
        let merged = self.state.lock().unwrap().merged_parents.clone();
        self.base_head
            .iter()
            .cloned()
            .chain(merged)
            .map(|id| self.store.commit_handle(id))
            .collect()
    }

    /// Whether the transaction has been committed or aborted.
    pub fn closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    fn open_state<T>(&self, f: impl FnOnce(&mut TxState) -> SyncResult<T>) -> SyncResult<T> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return TransactionClosedSnafu {
                branch: self.branch.clone(),
            }
            .fail();
        }
        f(&mut state)
    }

    /// Create the directory chain down to `path`.
    pub async fn make_dirs(&self, path: &TreePath) -> SyncResult<()> {
        self.open_state(|state| state.root.make_dirs(path))
    }

    /// Create or replace the file at `path`.
    pub async fn create_or_replace_file(&self, path: &TreePath, contents: impl Into<Vec<u8>>) -> SyncResult<()> {
        let contents = contents.into();
        self.open_state(|state| state.root.put_file(path, contents))
    }

    /// Remove the file or subtree at `path`. Removing a missing path is a
    /// no-op.
    pub async fn remove(&self, path: &TreePath) -> SyncResult<()> {
        self.open_state(|state| {
            state.root.remove(path);
            Ok(())
        })
    }

    /// Whether anything exists at `path`.
    pub async fn exists(&self, path: &TreePath) -> SyncResult<bool> {
        self.open_state(|state| Ok(state.root.get(path).is_some()))
    }

    /// The staged tree as an immutable snapshot.
    pub fn staged_tree(&self) -> SyncResult<Tree> {
        self.open_state(|state| {
            Ok(Tree {
                root: state.root.clone(),
            })
        })
    }

    /// File-level changes this transaction would introduce relative to
    /// `commit`'s tree.
    pub async fn diff(&self, commit: &StoreCommit) -> SyncResult<Vec<PathChange>> {
        let base = commit.tree()?;
        let staged = self.staged_tree()?;
        Ok(base.diff(&staged))
    }

    /// Three-way merge of `commit` into the staged tree.
    ///
    /// Changes on their side that do not collide with ours apply directly to
    /// the staged tree. Colliding file paths are returned unapplied, along
    /// with the three trees needed to resolve them. The merged commit
    /// becomes an extra parent of this transaction.
    pub async fn merge(&self, commit: &StoreCommit) -> SyncResult<(ThreeWay, Vec<TreePath>)> {
        let theirs = commit.tree()?;
        let base = {
            let state = self.store.state.lock().unwrap();
            let lca = match &self.base_head {
                Some(ours_head) => state.merge_base(ours_head, &commit.id),
                None => None,
            };
            match lca {
                Some(id) => match state.commits.get(&id) {
                    Some(data) => Tree {
                        root: data.root.clone(),
                    },
                    None => return UnknownCommitSnafu { id: id.to_string() }.fail(),
                },
                None => Tree {
                    root: Node::default(),
                },
            }
        };

        self.open_state(|state| {
            let ours = Tree {
                root: state.root.clone(),
            };
            let mut conflicts = Vec::new();

            for change in base.root.diff(&theirs.root) {
                let path = &change.path;
                let base_value = base.root.read_file(path);
                let their_value = theirs.root.read_file(path);
                let our_value = ours.root.read_file(path);

                if our_value == base_value {
                    // Only their side touched this path.
                    match their_value {
                        Some(contents) => state.root.put_file(path, contents)?,
                        None => {
                            state.root.remove(path);
                        }
                    }
                } else if our_value != their_value {
                    conflicts.push(path.clone());
                }
            }

            conflicts.sort();
            state.merged_parents.push(commit.id.clone());

            Ok((
                ThreeWay {
                    ours,
                    theirs,
                    base,
                },
                conflicts,
            ))
        })
    }

    /// Commit the staged tree onto the branch.
    ///
    /// Fails with a transaction conflict if the branch head moved since the
    /// transaction opened.
    pub async fn commit(&self, message: impl Into<String>) -> SyncResult<StoreCommit> {
        let message = message.into();
        let (root, merged_parents) = self.open_state(|state| {
            state.closed = true;
            Ok((state.root.clone(), std::mem::take(&mut state.merged_parents)))
        })?;

        let mut store = self.store.state.lock().unwrap();
        if store.head_of(&self.branch) != self.base_head {
            // The transaction stays closed; the staged tree is discarded.
            return TransactionConflictSnafu {
                branch: self.branch.clone(),
            }
            .fail();
        }
        let id = store.mint_id();
        let parents: Vec<CommitId> = self.base_head.iter().cloned().chain(merged_parents).collect();
        store.commits.insert(
            id.clone(),
            CommitData {
                parents,
                root,
                message,
            },
        );
        store.branch(&self.branch).head.send_replace(Some(id.clone()));
        Ok(self.store.commit_handle(id))
    }

    /// Abort the transaction, discarding staged changes. Idempotent.
    pub async fn abort(&self) {
        self.state.lock().unwrap().closed = true;
    }
}

#[async_trait]
impl TreeRead for Transaction {
    async fn exists_file(&self, path: &TreePath) -> SyncResult<bool> {
        self.open_state(|state| Ok(matches!(state.root.get(path), Some(node) if !node.is_dir())))
    }

    async fn exists_dir(&self, path: &TreePath) -> SyncResult<bool> {
        self.open_state(|state| Ok(matches!(state.root.get(path), Some(node) if node.is_dir())))
    }

    async fn read_file(&self, path: &TreePath) -> SyncResult<Option<Vec<u8>>> {
        self.open_state(|state| Ok(state.root.read_file(path)))
    }

    async fn read_dir(&self, path: &TreePath) -> SyncResult<Option<Vec<String>>> {
        self.open_state(|state| Ok(state.root.read_dir(path)))
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        // Runs during unwinding too, so tolerate a poisoned mutex.
        let state = match self.state.get_mut() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !state.closed {
            state.closed = true;
            debug!(branch = %self.branch, "open transaction dropped; aborting");
        }
    }
}
