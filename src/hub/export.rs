//! Pushing user edits back to the Hub.

use tracing::debug;
use tracing::warn;

use crate::hub::HubClient;
use crate::hub::Token;
use crate::snapshot::Snapshot;

/// Counts of outbound write calls attempted by [`call_api`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportSummary {
    /// Status writes.
    pub statuses: usize,

    /// Pull request writes.
    pub prs: usize,
}

impl ExportSummary {
    /// Whether nothing needed pushing.
    pub fn is_empty(&self) -> bool {
        self.statuses == 0 && self.prs == 0
    }
}

/// Push the difference between two snapshots to the Hub.
///
/// Emits one `set_status` per status in `new \ old` and one `set_pr` per
/// pull request in `new \ old`. Refs are never pushed outward. Failures are
/// logged per call and not retried within the tick. With `dry` set, the
/// deltas are computed and counted but no call is made.
pub async fn call_api<H: HubClient + ?Sized>(
    hub: &H,
    token: &Token,
    old: &Snapshot,
    new: &Snapshot,
    dry: bool,
) -> ExportSummary {
    let mut summary = ExportSummary::default();

    for status in new.status_delta(old) {
        summary.statuses += 1;
        if dry {
            debug!(%status, "dry run: skipping status write");
            continue;
        }
        if let Err(err) = hub.set_status(token, status).await {
            warn!(%status, error = %err, "failed to write status");
        }
    }

    for pr in new.pr_delta(old) {
        summary.prs += 1;
        if dry {
            debug!(%pr, "dry run: skipping pull request write");
            continue;
        }
        if let Err(err) = hub.set_pr(token, pr).await {
            warn!(%pr, error = %err, "failed to write pull request");
        }
    }

    if !summary.is_empty() {
        debug!(statuses = summary.statuses, prs = summary.prs, dry, "pushed deltas to hub");
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::FakeHub;
    use crate::model::Commit;
    use crate::model::PrState;
    use crate::model::PullRequest;
    use crate::model::Repo;
    use crate::model::Status;
    use crate::model::StatusState;

    fn repo() -> Repo {
        Repo::new("alice", "proj").unwrap()
    }

    fn commit(id: &str) -> Commit {
        Commit::new(repo(), id)
    }

    #[tokio::test]
    async fn pushes_exactly_the_delta() {
        let hub = FakeHub::new();
        let token = Token::new("t");

        let mut old = Snapshot::empty();
        old.add_status(Status::new(commit("aa"), vec!["ci".into()], StatusState::Pending));

        let mut new = old.clone();
        new.replace_status(Status::new(commit("aa"), vec!["ci".into()], StatusState::Success));
        new.add_pr(PullRequest {
            head: commit("bb"),
            number: 7,
            state: PrState::Open,
            title: "add x".into(),
        });

        let summary = call_api(&hub, &token, &old, &new, false).await;
        assert_eq!(summary, ExportSummary { statuses: 1, prs: 1 });
        assert_eq!(hub.set_status_calls().len(), 1);
        assert_eq!(hub.set_status_calls()[0].state, StatusState::Success);
        assert_eq!(hub.set_pr_calls().len(), 1);
    }

    #[tokio::test]
    async fn dry_run_makes_no_calls() {
        let hub = FakeHub::new();
        let token = Token::new("t");

        let mut new = Snapshot::empty();
        new.add_status(Status::new(commit("aa"), vec!["ci".into()], StatusState::Failure));

        let summary = call_api(&hub, &token, &Snapshot::empty(), &new, true).await;
        assert_eq!(summary.statuses, 1);
        assert!(hub.set_status_calls().is_empty());
    }

    #[tokio::test]
    async fn equal_snapshots_push_nothing() {
        let hub = FakeHub::new();
        let token = Token::new("t");

        let mut snapshot = Snapshot::empty();
        snapshot.add_status(Status::new(commit("aa"), vec!["ci".into()], StatusState::Success));

        let summary = call_api(&hub, &token, &snapshot, &snapshot.clone(), false).await;
        assert!(summary.is_empty());
        assert!(hub.set_status_calls().is_empty());
    }

    #[tokio::test]
    async fn failures_do_not_stop_the_batch() {
        let hub = FakeHub::new();
        let token = Token::new("t");
        hub.fail_with("set_status", "boom");

        let mut new = Snapshot::empty();
        new.add_status(Status::new(commit("aa"), vec!["ci".into()], StatusState::Success));
        new.add_status(Status::new(commit("bb"), vec!["ci".into()], StatusState::Failure));

        let summary = call_api(&hub, &token, &Snapshot::empty(), &new, false).await;
        assert_eq!(summary.statuses, 2);
        assert!(hub.set_status_calls().is_empty());
    }
}
