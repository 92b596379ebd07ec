//! The in-memory view of the bridged world.
//!
//! A [`Snapshot`] holds five sets: repositories, commits, statuses, pull
//! requests and refs. The `add_*` operations maintain the dependency
//! invariants (a status implies its commit and repository, a pull request
//! implies its head commit and repository, a ref implies its repository but
//! not its head commit). Snapshots are plain values: cloning is the way to
//! share one, and every mutation keeps the invariants.
//!
//! Sets with by-identity uniqueness are encoded as `BTreeMap`s keyed by the
//! entity identity, which also gives every set a canonical iteration order.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

use crate::model::Commit;
use crate::model::PullRequest;
use crate::model::Ref;
use crate::model::Repo;
use crate::model::Status;

/// Identity of a pull request: repository and number.
pub type PrKey = (Repo, u32);

/// Identity of a status: commit and context path.
pub type StatusKey = (Commit, Vec<String>);

/// Identity of a ref: repository and name path.
pub type RefKey = (Repo, Vec<String>);

/// A collected set of Hub entities.
///
/// Field order matters: the derived total order is lexicographic over
/// (repos, commits, statuses, prs, refs).
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Snapshot {
    repos: BTreeSet<Repo>,
    commits: BTreeSet<Commit>,
    statuses: BTreeMap<StatusKey, Status>,
    prs: BTreeMap<PrKey, PullRequest>,
    refs: BTreeMap<RefKey, Ref>,
}

impl Snapshot {
    /// The empty snapshot.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Set-wise union of two snapshots. On identity collisions the entry
    /// from `other` wins.
    pub fn union(mut self, other: Snapshot) -> Snapshot {
        self.repos.extend(other.repos);
        self.commits.extend(other.commits);
        self.statuses.extend(other.statuses);
        self.prs.extend(other.prs);
        self.refs.extend(other.refs);
        self
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Repositories in play.
    pub fn repos(&self) -> &BTreeSet<Repo> {
        &self.repos
    }

    /// Tracked commits.
    pub fn commits(&self) -> &BTreeSet<Commit> {
        &self.commits
    }

    /// Statuses, in canonical order.
    pub fn statuses(&self) -> impl Iterator<Item = &Status> {
        self.statuses.values()
    }

    /// Pull requests, in canonical order.
    pub fn prs(&self) -> impl Iterator<Item = &PullRequest> {
        self.prs.values()
    }

    /// Refs, in canonical order.
    pub fn refs(&self) -> impl Iterator<Item = &Ref> {
        self.refs.values()
    }

    /// Look up a pull request by identity.
    pub fn pr(&self, repo: &Repo, number: u32) -> Option<&PullRequest> {
        self.prs.get(&(repo.clone(), number))
    }

    /// Look up a status by identity.
    pub fn status(&self, commit: &Commit, context: &[String]) -> Option<&Status> {
        self.statuses.get(&(commit.clone(), context.to_vec()))
    }

    /// Look up a ref by identity.
    pub fn r#ref(&self, repo: &Repo, name: &[String]) -> Option<&Ref> {
        self.refs.get(&(repo.clone(), name.to_vec()))
    }

    /// Whether the snapshot holds nothing at all.
    pub fn is_empty(&self) -> bool {
        self.repos.is_empty()
            && self.commits.is_empty()
            && self.statuses.is_empty()
            && self.prs.is_empty()
            && self.refs.is_empty()
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Register a repository.
    pub fn add_repo(&mut self, repo: Repo) {
        self.repos.insert(repo);
    }

    /// Insert a commit, registering its repository.
    pub fn add_commit(&mut self, commit: Commit) {
        self.repos.insert(commit.repo.clone());
        self.commits.insert(commit);
    }

    /// Remove a commit by identity. Dependent statuses are left untouched.
    pub fn remove_commit(&mut self, repo: &Repo, id: &str) {
        self.commits.remove(&Commit::new(repo.clone(), id));
    }

    /// Remove then re-add a commit by identity.
    pub fn replace_commit(&mut self, commit: Commit) {
        self.remove_commit(&commit.repo.clone(), &commit.id.clone());
        self.add_commit(commit);
    }

    /// Insert a pull request, registering its head commit and repository.
    pub fn add_pr(&mut self, pr: PullRequest) {
        self.add_commit(pr.head.clone());
        self.prs.insert((pr.repo().clone(), pr.number), pr);
    }

    /// Remove a pull request by identity.
    pub fn remove_pr(&mut self, repo: &Repo, number: u32) {
        self.prs.remove(&(repo.clone(), number));
    }

    /// Remove then re-add a pull request by identity.
    pub fn replace_pr(&mut self, pr: PullRequest) {
        self.remove_pr(&pr.repo().clone(), pr.number);
        self.add_pr(pr);
    }

    /// Insert a status, registering its commit and repository.
    pub fn add_status(&mut self, status: Status) {
        self.add_commit(status.commit().clone());
        self.statuses
            .insert((status.commit().clone(), status.context().to_vec()), status);
    }

    /// Remove a status by identity.
    pub fn remove_status(&mut self, commit: &Commit, context: &[String]) {
        self.statuses.remove(&(commit.clone(), context.to_vec()));
    }

    /// Remove then re-add a status by identity.
    pub fn replace_status(&mut self, status: Status) {
        self.remove_status(&status.commit().clone(), &status.context().to_vec());
        self.add_status(status);
    }

    /// Insert a ref, registering its repository.
    ///
    /// The head commit is deliberately not added to `commits`: a ref tracks
    /// its head by value and needs no independent commit record.
    pub fn add_ref(&mut self, r: Ref) {
        self.repos.insert(r.repo().clone());
        self.refs.insert((r.repo().clone(), r.name().to_vec()), r);
    }

    /// Remove a ref by identity.
    pub fn remove_ref(&mut self, repo: &Repo, name: &[String]) {
        self.refs.remove(&(repo.clone(), name.to_vec()));
    }

    /// Remove then re-add a ref by identity.
    pub fn replace_ref(&mut self, r: Ref) {
        self.remove_ref(&r.repo().clone(), &r.name().to_vec());
        self.add_ref(r);
    }

    // ========================================================================
    // Deltas
    // ========================================================================

    /// Statuses present in `self` but absent (or different) in `old`.
    pub fn status_delta<'a>(&'a self, old: &'a Snapshot) -> impl Iterator<Item = &'a Status> {
        self.statuses
            .iter()
            .filter(|(key, status)| old.statuses.get(*key) != Some(status))
            .map(|(_, status)| status)
    }

    /// Pull requests present in `self` but absent (or different) in `old`.
    pub fn pr_delta<'a>(&'a self, old: &'a Snapshot) -> impl Iterator<Item = &'a PullRequest> {
        self.prs
            .iter()
            .filter(|(key, pr)| old.prs.get(*key) != Some(pr))
            .map(|(_, pr)| pr)
    }
}

impl std::fmt::Display for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{repos: {}, commits: {}, statuses: {}, prs: {}, refs: {}}}",
            self.repos.len(),
            self.commits.len(),
            self.statuses.len(),
            self.prs.len(),
            self.refs.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PrState;
    use crate::model::StatusState;

    fn repo() -> Repo {
        Repo::new("alice", "proj").unwrap()
    }

    fn commit(id: &str) -> Commit {
        Commit::new(repo(), id)
    }

    fn pr(number: u32, head: &str, state: PrState) -> PullRequest {
        PullRequest {
            head: commit(head),
            number,
            state,
            title: format!("pr {number}"),
        }
    }

    #[test]
    fn add_pr_registers_commit_and_repo() {
        let mut s = Snapshot::empty();
        s.add_pr(pr(7, "deadbeef", PrState::Open));
        assert!(s.repos().contains(&repo()));
        assert!(s.commits().contains(&commit("deadbeef")));
        assert_eq!(s.prs().count(), 1);
    }

    #[test]
    fn add_status_registers_commit_and_repo() {
        let mut s = Snapshot::empty();
        let status = Status::new(commit("deadbeef"), vec!["ci".into()], StatusState::Success);
        s.add_status(status.clone());
        assert!(s.commits().contains(&commit("deadbeef")));
        assert_eq!(s.status(&commit("deadbeef"), &["ci".to_string()]), Some(&status));
    }

    #[test]
    fn add_ref_does_not_register_commit() {
        let mut s = Snapshot::empty();
        let r = Ref::new(commit("cafe"), vec!["heads".into(), "main".into()]).unwrap();
        s.add_ref(r);
        assert!(s.repos().contains(&repo()));
        assert!(s.commits().is_empty());
    }

    #[test]
    fn replace_pr_is_keyed_by_number() {
        let mut s = Snapshot::empty();
        s.add_pr(pr(7, "deadbeef", PrState::Open));
        s.replace_pr(pr(7, "cafebabe", PrState::Open));
        assert_eq!(s.prs().count(), 1);
        assert_eq!(s.pr(&repo(), 7).unwrap().head.id, "cafebabe");
    }

    #[test]
    fn union_merges_all_sets() {
        let mut a = Snapshot::empty();
        a.add_pr(pr(1, "aa", PrState::Open));
        let mut b = Snapshot::empty();
        b.add_pr(pr(2, "bb", PrState::Open));
        let u = a.union(b);
        assert_eq!(u.prs().count(), 2);
        assert_eq!(u.commits().len(), 2);
    }

    #[test]
    fn deltas_report_new_and_changed_entries() {
        let mut old = Snapshot::empty();
        old.add_status(Status::new(commit("aa"), vec!["ci".into()], StatusState::Pending));

        let mut new = old.clone();
        // changed state, same identity
        new.replace_status(Status::new(commit("aa"), vec!["ci".into()], StatusState::Success));
        // brand new status
        new.add_status(Status::new(commit("bb"), vec!["lint".into()], StatusState::Failure));

        let delta: Vec<_> = new.status_delta(&old).collect();
        assert_eq!(delta.len(), 2);
        assert!(new.pr_delta(&old).next().is_none());
    }
}
