//! Pulling Hub state into a snapshot.
//!
//! Fetches run in parallel per repository (and per commit for statuses) and
//! fold commutatively: a failed call is logged and contributes nothing. The
//! Hub only reports open pull requests, so closure is inferred by absence:
//! a previously open pull request of a fetched repository that no longer
//! appears in the open set is marked closed.

use std::collections::BTreeSet;

use futures::stream;
use futures::FutureExt;
use futures::StreamExt;
use tracing::debug;
use tracing::warn;

use crate::hub::HubClient;
use crate::hub::Token;
use crate::hub::MAX_HUB_CONCURRENCY;
use crate::model::Commit;
use crate::model::PrState;
use crate::model::PullRequest;
use crate::model::Ref;
use crate::model::Repo;
use crate::model::Status;
use crate::snapshot::Snapshot;

/// Fold the current Hub state of `repos` into `old`.
///
/// Never fails: per-call Hub errors are logged and the call's result is
/// dropped from the fold.
pub async fn import<H: HubClient + ?Sized>(
    hub: &H,
    token: &Token,
    old: &Snapshot,
    repos: &BTreeSet<Repo>,
) -> Snapshot {
    // Open pull requests, one request per repository.
    let pr_futures: Vec<_> = repos
        .iter()
        .map(|repo| {
            async move {
                match hub.prs(token, repo).await {
                    Ok(prs) => prs,
                    Err(err) => {
                        warn!(%repo, error = %err, "failed to list open pull requests");
                        Vec::new()
                    }
                }
            }
            .boxed()
        })
        .collect();
    let prs: Vec<PullRequest> = stream::iter(pr_futures)
        .buffer_unordered(MAX_HUB_CONCURRENCY)
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .flatten()
        .collect();

    // Refs, one request per repository.
    let ref_futures: Vec<_> = repos
        .iter()
        .map(|repo| {
            async move {
                match hub.refs(token, repo).await {
                    Ok(refs) => refs,
                    Err(err) => {
                        warn!(%repo, error = %err, "failed to list refs");
                        Vec::new()
                    }
                }
            }
            .boxed()
        })
        .collect();
    let refs: Vec<Ref> = stream::iter(ref_futures)
        .buffer_unordered(MAX_HUB_CONCURRENCY)
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .flatten()
        .collect();

    // Every distinct commit the fetched state points at.
    let commits: BTreeSet<Commit> = prs
        .iter()
        .map(|pr| pr.head.clone())
        .chain(refs.iter().map(|r| r.head.clone()))
        .collect();

    // Statuses, one request per commit.
    let statuses: Vec<Status> = stream::iter(&commits)
        .map(|commit| {
            async move {
                match hub.status(token, commit).await {
                    Ok(statuses) => statuses,
                    Err(err) => {
                        warn!(%commit, error = %err, "failed to fetch statuses");
                        Vec::new()
                    }
                }
            }
            .boxed()
        })
        .buffer_unordered(MAX_HUB_CONCURRENCY)
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .flatten()
        .collect();

    debug!(
        repos = repos.len(),
        prs = prs.len(),
        refs = refs.len(),
        commits = commits.len(),
        statuses = statuses.len(),
        "imported hub state"
    );

    // Closure by absence: open pull requests of fetched repositories whose
    // (head, number) pair is gone from the open set are now closed.
    let open_keys: BTreeSet<(&Commit, u32)> = prs.iter().map(|pr| (&pr.head, pr.number)).collect();
    let closed: Vec<PullRequest> = old
        .prs()
        .filter(|pr| {
            pr.is_open() && repos.contains(pr.repo()) && !open_keys.contains(&(&pr.head, pr.number))
        })
        .map(|pr| {
            let mut closed = pr.clone();
            closed.state = PrState::Closed;
            closed
        })
        .collect();

    let mut snapshot = old.clone();
    for repo in repos {
        snapshot.add_repo(repo.clone());
    }
    for pr in closed {
        snapshot.replace_pr(pr);
    }
    for pr in prs {
        snapshot.replace_pr(pr);
    }
    for r in refs {
        snapshot.replace_ref(r);
    }
    for commit in commits {
        snapshot.add_commit(commit);
    }
    for status in statuses {
        snapshot.replace_status(status);
    }
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::FakeHub;
    use crate::model::StatusState;

    fn repo() -> Repo {
        Repo::new("alice", "proj").unwrap()
    }

    fn commit(id: &str) -> Commit {
        Commit::new(repo(), id)
    }

    fn open_pr(number: u32, head: &str) -> PullRequest {
        PullRequest {
            head: commit(head),
            number,
            state: PrState::Open,
            title: format!("pr {number}"),
        }
    }

    fn repo_set() -> BTreeSet<Repo> {
        BTreeSet::from([repo()])
    }

    #[tokio::test]
    async fn imports_prs_refs_and_statuses() {
        let hub = FakeHub::new();
        let token = Token::new("t");
        hub.open_pr(open_pr(7, "deadbeef"));
        hub.set_ref(Ref::new(commit("cafe"), vec!["heads".into(), "main".into()]).unwrap());
        hub.set_commit_status(Status::new(commit("deadbeef"), vec!["ci".into()], StatusState::Success));

        let snapshot = import(&hub, &token, &Snapshot::empty(), &repo_set()).await;

        assert_eq!(snapshot.prs().count(), 1);
        assert_eq!(snapshot.refs().count(), 1);
        assert_eq!(snapshot.statuses().count(), 1);
        // both the PR head and the ref head are derived commits
        assert!(snapshot.commits().contains(&commit("deadbeef")));
        assert!(snapshot.commits().contains(&commit("cafe")));
    }

    #[tokio::test]
    async fn closure_is_inferred_by_absence() {
        let hub = FakeHub::new();
        let token = Token::new("t");

        let mut old = Snapshot::empty();
        old.add_pr(open_pr(7, "deadbeef"));

        let snapshot = import(&hub, &token, &old, &repo_set()).await;
        let pr = snapshot.pr(&repo(), 7).unwrap();
        assert_eq!(pr.state, PrState::Closed);
    }

    #[tokio::test]
    async fn moved_head_stays_open() {
        let hub = FakeHub::new();
        let token = Token::new("t");
        hub.open_pr(open_pr(7, "cafebabe"));

        let mut old = Snapshot::empty();
        old.add_pr(open_pr(7, "deadbeef"));

        let snapshot = import(&hub, &token, &old, &repo_set()).await;
        let pr = snapshot.pr(&repo(), 7).unwrap();
        assert_eq!(pr.state, PrState::Open);
        assert_eq!(pr.head.id, "cafebabe");
    }

    #[tokio::test]
    async fn failing_repo_contributes_nothing() {
        let hub = FakeHub::new();
        let token = Token::new("t");
        hub.open_pr(open_pr(7, "deadbeef"));
        hub.fail_with("prs", "rate limited");

        let snapshot = import(&hub, &token, &Snapshot::empty(), &repo_set()).await;
        assert!(snapshot.prs().next().is_none());
        // the repository itself is still registered
        assert!(snapshot.repos().contains(&repo()));
    }

    #[tokio::test]
    async fn prs_outside_fetched_repos_are_untouched() {
        let hub = FakeHub::new();
        let token = Token::new("t");

        let other = Repo::new("bob", "lib").unwrap();
        let mut old = Snapshot::empty();
        old.add_pr(PullRequest {
            head: Commit::new(other.clone(), "abcd"),
            number: 3,
            state: PrState::Open,
            title: String::new(),
        });

        let snapshot = import(&hub, &token, &old, &repo_set()).await;
        assert_eq!(snapshot.pr(&other, 3).unwrap().state, PrState::Open);
    }
}
