//! Removal of data reachable only through closed pull requests.
//!
//! Pruning works one repository at a time. Within a repository, a status is
//! reachable when its commit is the head of an open pull request or of a
//! ref; a commit is reachable when it is the subject of a reachable status
//! or the head of an open pull request. Everything else exists only because
//! a pull request once did, and is dropped together with the closed pull
//! requests themselves.

use std::collections::BTreeSet;

use tracing::debug;

use crate::model::Commit;
use crate::model::PullRequest;
use crate::model::Repo;
use crate::snapshot::Snapshot;

/// Per-repository cleanup instructions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoCleanup {
    /// Nothing to remove.
    Clean,

    /// Closed pull requests and unreferenced commits to drop from the tree.
    Closed {
        /// Pull requests removed from the snapshot.
        prs: Vec<PullRequest>,
        /// Commits removed from the snapshot.
        commits: Vec<Commit>,
    },
}

/// Aggregate result of pruning a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PruneOutcome {
    /// The input snapshot was already fully reachable.
    Clean,

    /// Some entities were dropped.
    Pruned {
        /// The snapshot with unreachable entities removed.
        snapshot: Snapshot,
        /// All removed pull requests, across repositories.
        removed_prs: Vec<PullRequest>,
        /// All removed commits, across repositories.
        removed_commits: Vec<Commit>,
    },
}

impl PruneOutcome {
    /// The kept snapshot: the pruned one, or a clone of the input when clean.
    pub fn into_snapshot(self, input: &Snapshot) -> Snapshot {
        match self {
            PruneOutcome::Clean => input.clone(),
            PruneOutcome::Pruned { snapshot, .. } => snapshot,
        }
    }
}

/// Prune one repository's slice of a snapshot.
///
/// Returns the kept slice and the cleanup instructions. When the cleanup is
/// [`RepoCleanup::Clean`], the kept slice equals the input slice.
pub fn prune_repo(snapshot: &Snapshot, repo: &Repo) -> (Snapshot, RepoCleanup) {
    let open_prs: Vec<&PullRequest> =
        snapshot.prs().filter(|pr| pr.repo() == repo && pr.is_open()).collect();
    let closed_prs: Vec<PullRequest> =
        snapshot.prs().filter(|pr| pr.repo() == repo && !pr.is_open()).cloned().collect();

    // Heads that keep a status alive: open PR heads and ref heads.
    let live_heads: BTreeSet<&Commit> = open_prs
        .iter()
        .map(|pr| &pr.head)
        .chain(snapshot.refs().filter(|r| r.repo() == repo).map(|r| &r.head))
        .collect();

    let mut kept = Snapshot::empty();
    kept.add_repo(repo.clone());
    for r in snapshot.refs().filter(|r| r.repo() == repo) {
        kept.add_ref(r.clone());
    }
    for status in snapshot.statuses().filter(|s| s.repo() == repo) {
        if live_heads.contains(status.commit()) {
            kept.add_status(status.clone());
        }
    }
    for pr in &open_prs {
        kept.add_pr((*pr).clone());
    }

    let removed_commits: Vec<Commit> = snapshot
        .commits()
        .iter()
        .filter(|c| &c.repo == repo && !kept.commits().contains(*c))
        .cloned()
        .collect();

    if closed_prs.is_empty() && removed_commits.is_empty() {
        (kept, RepoCleanup::Clean)
    } else {
        (
            kept,
            RepoCleanup::Closed {
                prs: closed_prs,
                commits: removed_commits,
            },
        )
    }
}

/// Prune a whole snapshot.
///
/// Returns [`PruneOutcome::Clean`] when nothing was removed; in that case the
/// input is already its own pruned form.
pub fn prune(snapshot: &Snapshot) -> PruneOutcome {
    let mut pruned = Snapshot::empty();
    let mut removed_prs = Vec::new();
    let mut removed_commits = Vec::new();

    for repo in snapshot.repos() {
        let (kept, cleanup) = prune_repo(snapshot, repo);
        pruned = pruned.union(kept);
        if let RepoCleanup::Closed { prs, commits } = cleanup {
            removed_prs.extend(prs);
            removed_commits.extend(commits);
        }
    }

    if removed_prs.is_empty() && removed_commits.is_empty() {
        PruneOutcome::Clean
    } else {
        debug!(
            removed_prs = removed_prs.len(),
            removed_commits = removed_commits.len(),
            "pruned closed pull request data"
        );
        PruneOutcome::Pruned {
            snapshot: pruned,
            removed_prs,
            removed_commits,
        }
    }
}
