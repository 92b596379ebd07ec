//! Mapping between [`Snapshot`]s and Store trees.
//!
//! The tree layout under the branch root:
//!
//! ```text
//! <user>/<repo>/pr/<number>/head            commit id
//! <user>/<repo>/pr/<number>/state           "open" | "closed"
//! <user>/<repo>/pr/<number>/title           title (may be absent)
//! <user>/<repo>/commit/<id>/                commit marker directory
//! <user>/<repo>/commit/<id>/status/<context...>/state
//! <user>/<repo>/commit/<id>/status/<context...>/description   (optional)
//! <user>/<repo>/commit/<id>/status/<context...>/target_url    (optional)
//! <user>/<repo>/ref/<name...>/head          commit id
//! ```
//!
//! File values terminate with a newline; readers trim surrounding
//! whitespace. A snapshot can be rebuilt from scratch with
//! [`snapshot_of_tree`], or incrementally from a prior snapshot and a tree
//! diff with [`apply_diff`]; both roads lead to the same snapshot.

use std::collections::BTreeSet;

use tracing::warn;

use crate::error::InvalidPrStateSnafu;
use crate::error::InvalidStatusStateSnafu;
use crate::error::SyncResult;
use crate::model::Commit;
use crate::model::PrState;
use crate::model::PullRequest;
use crate::model::Ref;
use crate::model::Repo;
use crate::model::Status;
use crate::model::StatusState;
use crate::model::DEFAULT_CONTEXT;
use crate::snapshot::Snapshot;
use crate::store::memory::Transaction;
use crate::store::PathChange;
use crate::store::TreePath;
use crate::store::TreeRead;

const PR_DIR: &str = "pr";
const COMMIT_DIR: &str = "commit";
const STATUS_DIR: &str = "status";
const REF_DIR: &str = "ref";
const HEAD_FILE: &str = "head";
const STATE_FILE: &str = "state";
const TITLE_FILE: &str = "title";
const DESCRIPTION_FILE: &str = "description";
const TARGET_URL_FILE: &str = "target_url";

// ============================================================================
// Paths
// ============================================================================

/// `<user>/<repo>` for a repository.
pub fn repo_path(repo: &Repo) -> TreePath {
    TreePath::new([repo.user(), repo.name()])
}

/// `<user>/<repo>/pr/<number>` for a pull request.
pub fn pr_dir(repo: &Repo, number: u32) -> TreePath {
    repo_path(repo).join(PR_DIR).join(number.to_string())
}

/// `<user>/<repo>/commit/<id>` for a commit.
pub fn commit_dir(repo: &Repo, id: &str) -> TreePath {
    repo_path(repo).join(COMMIT_DIR).join(id)
}

/// `<user>/<repo>/commit/<id>/status/<context...>` for a status context.
pub fn status_dir(commit: &Commit, context: &[String]) -> TreePath {
    let mut dir = commit_dir(&commit.repo, &commit.id).join(STATUS_DIR);
    for segment in context {
        dir = dir.join(segment.clone());
    }
    dir
}

/// `<user>/<repo>/ref/<name...>` for a ref.
pub fn ref_dir(repo: &Repo, name: &[String]) -> TreePath {
    let mut dir = repo_path(repo).join(REF_DIR);
    for segment in name {
        dir = dir.join(segment.clone());
    }
    dir
}

// ============================================================================
// Reading
// ============================================================================

/// Read a file and trim surrounding whitespace. `None` when missing.
async fn read_trimmed(tree: impl TreeRead, path: &TreePath) -> SyncResult<Option<String>> {
    Ok(tree
        .read_file(path)
        .await?
        .map(|bytes| String::from_utf8_lossy(&bytes).trim().to_string()))
}

/// Read a pull request subtree. `None` when `head` or `state` is missing;
/// an unparseable state is a conversion error.
pub async fn read_pr(tree: impl TreeRead, repo: &Repo, number: u32) -> SyncResult<Option<PullRequest>> {
    let dir = pr_dir(repo, number);
    let head = read_trimmed(&tree, &dir.join(HEAD_FILE)).await?;
    let state = read_trimmed(&tree, &dir.join(STATE_FILE)).await?;
    let (head, state) = match (head, state) {
        (Some(head), Some(state)) => (head, state),
        _ => return Ok(None),
    };
    let state = PrState::parse(&state).ok_or_else(|| {
        InvalidPrStateSnafu {
            value: state.clone(),
            path: dir.join(STATE_FILE).to_string(),
        }
        .build()
    })?;
    // Legacy entries may lack a title.
    let title = read_trimmed(&tree, &dir.join(TITLE_FILE)).await?.unwrap_or_default();
    Ok(Some(PullRequest {
        head: Commit::new(repo.clone(), head),
        number,
        state,
        title,
    }))
}

/// Read a status subtree at a raw context path (as found in the tree).
/// `None` when `state` is missing; an unparseable state is a conversion
/// error. The returned status carries the normalized context.
pub async fn read_status(tree: impl TreeRead, commit: &Commit, context: &[String]) -> SyncResult<Option<Status>> {
    let dir = status_dir(commit, context);
    let state = match read_trimmed(&tree, &dir.join(STATE_FILE)).await? {
        Some(state) => state,
        None => return Ok(None),
    };
    let state = StatusState::parse(&state).ok_or_else(|| {
        InvalidStatusStateSnafu {
            value: state.clone(),
            path: dir.join(STATE_FILE).to_string(),
        }
        .build()
    })?;
    let mut status = Status::new(commit.clone(), context.to_vec(), state);
    status.description = read_trimmed(&tree, &dir.join(DESCRIPTION_FILE))
        .await?
        .filter(|s| !s.is_empty());
    status.url = read_trimmed(&tree, &dir.join(TARGET_URL_FILE))
        .await?
        .filter(|s| !s.is_empty());
    Ok(Some(status))
}

/// Read a ref subtree. `None` when `head` is missing.
pub async fn read_ref(tree: impl TreeRead, repo: &Repo, name: &[String]) -> SyncResult<Option<Ref>> {
    let dir = ref_dir(repo, name);
    match read_trimmed(&tree, &dir.join(HEAD_FILE)).await? {
        Some(head) => Ok(Some(Ref::new(Commit::new(repo.clone(), head), name.to_vec())?)),
        None => Ok(None),
    }
}

/// Depth-first walk under `root`, collecting every directory (as a path
/// relative to `root`) that directly contains a file named `leaf`. A
/// directory contributes its own entry and its children's contributions.
pub async fn walk(tree: impl TreeRead, root: &TreePath, leaf: &str) -> SyncResult<Vec<TreePath>> {
    let mut found = Vec::new();
    let mut stack = vec![TreePath::root()];
    while let Some(rel) = stack.pop() {
        let abs = root.concat(&rel);
        let Some(entries) = tree.read_dir(&abs).await? else {
            continue;
        };
        for entry in entries {
            let child = abs.join(entry.clone());
            if entry == leaf && tree.exists_file(&child).await? {
                found.push(rel.clone());
            } else if tree.exists_dir(&child).await? {
                stack.push(rel.join(entry));
            }
        }
    }
    found.sort();
    Ok(found)
}

/// Rebuild a snapshot from a whole tree.
pub async fn snapshot_of_tree(tree: impl TreeRead) -> SyncResult<Snapshot> {
    let mut snapshot = Snapshot::empty();
    let users = tree.read_dir(&TreePath::root()).await?.unwrap_or_default();
    for user in users {
        let user_path = TreePath::new([user.clone()]);
        let Some(repo_names) = tree.read_dir(&user_path).await? else {
            continue;
        };
        for name in repo_names {
            if !tree.exists_dir(&user_path.join(name.clone())).await? {
                continue;
            }
            let Ok(repo) = Repo::new(user.clone(), name) else {
                continue;
            };
            snapshot.add_repo(repo.clone());
            load_repo(&tree, &repo, &mut snapshot).await?;
        }
    }
    Ok(snapshot)
}

async fn load_repo(tree: impl TreeRead, repo: &Repo, snapshot: &mut Snapshot) -> SyncResult<()> {
    let base = repo_path(repo);

    // Pull requests: skip entries missing head or state.
    for entry in tree.read_dir(&base.join(PR_DIR)).await?.unwrap_or_default() {
        let Ok(number) = entry.parse::<u32>() else {
            warn!(repo = %repo, entry = %entry, "skipping non-numeric pull request entry");
            continue;
        };
        if let Some(pr) = read_pr(&tree, repo, number).await? {
            snapshot.add_pr(pr);
        }
    }

    // Commits and their statuses.
    for id in tree.read_dir(&base.join(COMMIT_DIR)).await?.unwrap_or_default() {
        let commit = Commit::new(repo.clone(), id);
        snapshot.add_commit(commit.clone());
        let status_root = commit_dir(repo, &commit.id).join(STATUS_DIR);
        for context in walk(&tree, &status_root, STATE_FILE).await? {
            if let Some(status) = read_status(&tree, &commit, context.segments()).await? {
                snapshot.add_status(status);
            }
        }
    }

    // Refs.
    for name in walk(&tree, &base.join(REF_DIR), HEAD_FILE).await? {
        if name.is_root() {
            continue;
        }
        if let Some(r) = read_ref(&tree, repo, name.segments()).await? {
            snapshot.add_ref(r);
        }
    }

    Ok(())
}

// ============================================================================
// Incremental updates
// ============================================================================

/// What a changed tree path means for the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Classified {
    /// A pull request subtree changed.
    Pr(u32),

    /// A status subtree changed: commit id and raw context path.
    Status(String, Vec<String>),

    /// A ref subtree changed: name path.
    RefName(Vec<String>),

    /// A path under the repository that matches no known subtree. It still
    /// proves the repository is in play.
    Unknown,
}

/// Classify a changed path. `None` for paths shallower than `<user>/<repo>`.
fn classify(path: &TreePath) -> Option<(Repo, Classified)> {
    let segments = path.segments();
    if segments.len() < 2 {
        return None;
    }
    let repo = Repo::new(segments[0].clone(), segments[1].clone()).ok()?;
    let rest = &segments[2..];
    let class = match rest.first().map(String::as_str) {
        Some(dir) if dir == PR_DIR && rest.len() >= 2 => match rest[1].parse::<u32>() {
            Ok(number) => Classified::Pr(number),
            Err(_) => Classified::Unknown,
        },
        Some(dir) if dir == COMMIT_DIR && rest.len() >= 4 && rest[2] == STATUS_DIR => {
            Classified::Status(rest[1].clone(), rest[3..rest.len() - 1].to_vec())
        }
        Some(dir) if dir == REF_DIR && rest.len() >= 3 => Classified::RefName(rest[1..rest.len() - 1].to_vec()),
        _ => Classified::Unknown,
    };
    Some((repo, class))
}

/// Apply a tree diff to a prior snapshot, re-reading the affected subtrees
/// from `tree`. Produces the same snapshot a full rebuild of `tree` would.
pub async fn apply_diff(old: &Snapshot, tree: impl TreeRead, changes: &[PathChange]) -> SyncResult<Snapshot> {
    let mut snapshot = old.clone();
    let updates: BTreeSet<(Repo, Classified)> =
        changes.iter().filter_map(|change| classify(&change.path)).collect();

    for (repo, update) in updates {
        snapshot.add_repo(repo.clone());
        match update {
            Classified::Pr(number) => match read_pr(&tree, &repo, number).await? {
                Some(pr) => snapshot.replace_pr(pr),
                None => snapshot.remove_pr(&repo, number),
            },
            Classified::Status(id, raw_context) => {
                let commit = Commit::new(repo.clone(), id);
                match read_status(&tree, &commit, &raw_context).await? {
                    Some(status) => snapshot.replace_status(status),
                    None => {
                        let context = if raw_context.is_empty() {
                            vec![DEFAULT_CONTEXT.to_string()]
                        } else {
                            raw_context
                        };
                        snapshot.remove_status(&commit, &context);
                    }
                }
                if tree.exists_dir(&commit_dir(&repo, &commit.id)).await? {
                    snapshot.replace_commit(commit);
                } else {
                    snapshot.remove_commit(&repo, &commit.id);
                }
            }
            Classified::RefName(name) => match read_ref(&tree, &repo, &name).await? {
                Some(r) => snapshot.replace_ref(r),
                None => snapshot.remove_ref(&repo, &name),
            },
            Classified::Unknown => {}
        }
    }
    Ok(snapshot)
}

/// Build a snapshot for a tree: incrementally when a prior snapshot and its
/// diff are at hand, from scratch otherwise.
pub async fn snapshot(old: Option<(&Snapshot, &[PathChange])>, tree: impl TreeRead) -> SyncResult<Snapshot> {
    match old {
        Some((snapshot, changes)) => apply_diff(snapshot, tree, changes).await,
        None => snapshot_of_tree(tree).await,
    }
}

// ============================================================================
// Writing
// ============================================================================

async fn write_value(tx: &Transaction, path: &TreePath, value: &str) -> SyncResult<()> {
    let mut contents = value.as_bytes().to_vec();
    contents.push(b'\n');
    tx.create_or_replace_file(path, contents).await
}

async fn write_optional(tx: &Transaction, path: &TreePath, value: Option<&str>) -> SyncResult<()> {
    match value.filter(|v| !v.is_empty()) {
        Some(value) => write_value(tx, path, value).await,
        None => {
            if tx.exists(path).await? {
                tx.remove(path).await?;
            }
            Ok(())
        }
    }
}

/// Write a pull request subtree. Closed pull requests are not persisted:
/// the whole subtree is removed.
pub async fn update_pr(tx: &Transaction, pr: &PullRequest) -> SyncResult<()> {
    let dir = pr_dir(pr.repo(), pr.number);
    match pr.state {
        PrState::Closed => tx.remove(&dir).await,
        PrState::Open => {
            tx.make_dirs(&dir).await?;
            write_value(tx, &dir.join(HEAD_FILE), &pr.head.id).await?;
            write_value(tx, &dir.join(STATE_FILE), pr.state.as_str()).await?;
            write_value(tx, &dir.join(TITLE_FILE), &pr.title).await
        }
    }
}

/// Write a status subtree.
pub async fn update_status(tx: &Transaction, status: &Status) -> SyncResult<()> {
    let dir = status_dir(status.commit(), status.context());
    tx.make_dirs(&dir).await?;
    write_value(tx, &dir.join(STATE_FILE), status.state.as_str()).await?;
    write_optional(tx, &dir.join(DESCRIPTION_FILE), status.description.as_deref()).await?;
    write_optional(tx, &dir.join(TARGET_URL_FILE), status.url.as_deref()).await
}

/// Write a ref subtree.
pub async fn update_ref(tx: &Transaction, r: &Ref) -> SyncResult<()> {
    let dir = ref_dir(r.repo(), r.name());
    tx.make_dirs(&dir).await?;
    write_value(tx, &dir.join(HEAD_FILE), &r.head.id).await
}

/// Write every pull request of an iterator.
pub async fn update_prs<'a>(tx: &Transaction, prs: impl IntoIterator<Item = &'a PullRequest>) -> SyncResult<()> {
    for pr in prs {
        update_pr(tx, pr).await?;
    }
    Ok(())
}

/// Write every status of an iterator.
pub async fn update_statuses<'a>(tx: &Transaction, statuses: impl IntoIterator<Item = &'a Status>) -> SyncResult<()> {
    for status in statuses {
        update_status(tx, status).await?;
    }
    Ok(())
}

/// Write every ref of an iterator.
pub async fn update_refs<'a>(tx: &Transaction, refs: impl IntoIterator<Item = &'a Ref>) -> SyncResult<()> {
    for r in refs {
        update_ref(tx, r).await?;
    }
    Ok(())
}

/// Remove the subtrees of pruned pull requests and commits.
pub async fn apply_cleanup(tx: &Transaction, prs: &[PullRequest], commits: &[Commit]) -> SyncResult<()> {
    for pr in prs {
        tx.remove(&pr_dir(pr.repo(), pr.number)).await?;
    }
    for commit in commits {
        tx.remove(&commit_dir(&commit.repo, &commit.id)).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StatusState;
    use crate::store::memory::MemoryStore;

    fn repo() -> Repo {
        Repo::new("alice", "proj").unwrap()
    }

    fn commit(id: &str) -> Commit {
        Commit::new(repo(), id)
    }

    fn open_pr(number: u32, head: &str, title: &str) -> PullRequest {
        PullRequest {
            head: commit(head),
            number,
            state: PrState::Open,
            title: title.to_string(),
        }
    }

    async fn scratch_tx(store: &MemoryStore) -> Transaction {
        store.branch("scratch").transaction().await.unwrap()
    }

    #[tokio::test]
    async fn pr_write_read_roundtrip() {
        let store = MemoryStore::new();
        let tx = scratch_tx(&store).await;
        let pr = open_pr(7, "deadbeef", "add x");
        update_pr(&tx, &pr).await.unwrap();

        assert_eq!(
            tx.read_file(&TreePath::parse("alice/proj/pr/7/head")).await.unwrap(),
            Some(b"deadbeef\n".to_vec())
        );
        assert_eq!(read_pr(&tx, &repo(), 7).await.unwrap(), Some(pr));
        tx.abort().await;
    }

    #[tokio::test]
    async fn closed_pr_removes_the_subtree() {
        let store = MemoryStore::new();
        let tx = scratch_tx(&store).await;
        update_pr(&tx, &open_pr(7, "deadbeef", "add x")).await.unwrap();

        let mut pr = open_pr(7, "deadbeef", "add x");
        pr.state = PrState::Closed;
        update_pr(&tx, &pr).await.unwrap();

        assert!(!tx.exists(&TreePath::parse("alice/proj/pr/7")).await.unwrap());
        assert_eq!(read_pr(&tx, &repo(), 7).await.unwrap(), None);
        tx.abort().await;
    }

    #[tokio::test]
    async fn status_optional_fields_roundtrip() {
        let store = MemoryStore::new();
        let tx = scratch_tx(&store).await;
        let status = Status::new(commit("deadbeef"), vec!["ci".into(), "build".into()], StatusState::Success)
            .with_description("all green")
            .with_url("https://ci.example/1");
        update_status(&tx, &status).await.unwrap();
        assert_eq!(
            read_status(&tx, &commit("deadbeef"), status.context()).await.unwrap(),
            Some(status.clone())
        );

        // dropping the optionals removes the files
        let plain = Status::new(commit("deadbeef"), vec!["ci".into(), "build".into()], StatusState::Success);
        update_status(&tx, &plain).await.unwrap();
        assert!(
            !tx.exists(&TreePath::parse("alice/proj/commit/deadbeef/status/ci/build/description"))
                .await
                .unwrap()
        );
        assert_eq!(
            read_status(&tx, &commit("deadbeef"), plain.context()).await.unwrap(),
            Some(plain)
        );
        tx.abort().await;
    }

    #[tokio::test]
    async fn empty_context_is_read_as_default() {
        let store = MemoryStore::new();
        let tx = scratch_tx(&store).await;
        // A hand-authored status directly under status/.
        tx.create_or_replace_file(
            &TreePath::parse("alice/proj/commit/deadbeef/status/state"),
            b"pending\n".to_vec(),
        )
        .await
        .unwrap();

        let status = read_status(&tx, &commit("deadbeef"), &[]).await.unwrap().unwrap();
        assert_eq!(status.context(), [DEFAULT_CONTEXT.to_string()]);
        tx.abort().await;
    }

    #[tokio::test]
    async fn full_rebuild_collects_everything() {
        let store = MemoryStore::new();
        let tx = scratch_tx(&store).await;

        let pr = open_pr(7, "deadbeef", "add x");
        let status = Status::new(commit("deadbeef"), vec!["ci".into()], StatusState::Success);
        let r = Ref::new(commit("cafe"), vec!["heads".into(), "main".into()]).unwrap();
        update_pr(&tx, &pr).await.unwrap();
        update_status(&tx, &status).await.unwrap();
        update_ref(&tx, &r).await.unwrap();

        let snapshot = snapshot_of_tree(&tx).await.unwrap();
        assert_eq!(snapshot.prs().collect::<Vec<_>>(), vec![&pr]);
        assert_eq!(snapshot.statuses().collect::<Vec<_>>(), vec![&status]);
        assert_eq!(snapshot.refs().collect::<Vec<_>>(), vec![&r]);
        assert!(snapshot.commits().contains(&commit("deadbeef")));
        // ref heads have no commit record of their own
        assert!(!snapshot.commits().contains(&commit("cafe")));
        tx.abort().await;
    }

    #[tokio::test]
    async fn rebuild_skips_incomplete_prs() {
        let store = MemoryStore::new();
        let tx = scratch_tx(&store).await;
        tx.create_or_replace_file(&TreePath::parse("alice/proj/pr/7/head"), b"deadbeef\n".to_vec())
            .await
            .unwrap();
        let snapshot = snapshot_of_tree(&tx).await.unwrap();
        assert!(snapshot.prs().next().is_none());
        assert!(snapshot.repos().contains(&repo()));
        tx.abort().await;
    }

    #[tokio::test]
    async fn invalid_state_aborts_the_rebuild() {
        let store = MemoryStore::new();
        let tx = scratch_tx(&store).await;
        tx.create_or_replace_file(
            &TreePath::parse("alice/proj/commit/deadbeef/status/ci/state"),
            b"greenish\n".to_vec(),
        )
        .await
        .unwrap();
        let err = snapshot_of_tree(&tx).await.unwrap_err();
        assert!(matches!(err, crate::error::SyncError::InvalidStatusState { .. }));
        tx.abort().await;
    }

    #[tokio::test]
    async fn diff_apply_tracks_removals_and_updates() {
        let store = MemoryStore::new();
        let branch = store.branch("scratch");
        let tx = branch.transaction().await.unwrap();
        let pr = open_pr(7, "deadbeef", "add x");
        let status = Status::new(commit("deadbeef"), vec!["ci".into()], StatusState::Pending);
        update_pr(&tx, &pr).await.unwrap();
        update_status(&tx, &status).await.unwrap();
        let base = tx.commit("seed").await.unwrap();
        let old = snapshot_of_tree(&base.tree().unwrap()).await.unwrap();

        // flip the status and drop the pull request
        let tx = branch.transaction().await.unwrap();
        let flipped = Status::new(commit("deadbeef"), vec!["ci".into()], StatusState::Success);
        update_status(&tx, &flipped).await.unwrap();
        tx.remove(&TreePath::parse("alice/proj/pr/7")).await.unwrap();

        let changes = tx.diff(&base).await.unwrap();
        let incremental = apply_diff(&old, &tx, &changes).await.unwrap();
        let full = snapshot_of_tree(&tx).await.unwrap();
        assert_eq!(incremental, full);
        assert!(incremental.pr(&repo(), 7).is_none());
        assert_eq!(
            incremental
                .status(&commit("deadbeef"), &["ci".to_string()])
                .map(|s| s.state),
            Some(StatusState::Success)
        );
        tx.abort().await;
    }

    #[tokio::test]
    async fn unknown_paths_register_the_repo_only() {
        let store = MemoryStore::new();
        let tx = scratch_tx(&store).await;
        tx.create_or_replace_file(&TreePath::parse("alice/proj/misc/foo"), b"x\n".to_vec())
            .await
            .unwrap();
        let changes = vec![PathChange {
            path: TreePath::parse("alice/proj/misc/foo"),
            kind: crate::store::ChangeKind::Added,
        }];
        let snapshot = apply_diff(&Snapshot::empty(), &tx, &changes).await.unwrap();
        assert!(snapshot.repos().contains(&repo()));
        assert!(snapshot.commits().is_empty());
        assert!(snapshot.prs().next().is_none());
        tx.abort().await;
    }

    #[tokio::test]
    async fn shallow_paths_are_ignored() {
        let store = MemoryStore::new();
        let tx = scratch_tx(&store).await;
        let changes = vec![PathChange {
            path: TreePath::parse("README.md"),
            kind: crate::store::ChangeKind::Added,
        }];
        let snapshot = apply_diff(&Snapshot::empty(), &tx, &changes).await.unwrap();
        assert!(snapshot.is_empty());
        tx.abort().await;
    }
}
