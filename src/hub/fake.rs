//! Deterministic in-memory Hub for tests and demos.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::SyncError;
use crate::error::SyncResult;
use crate::hub::HubClient;
use crate::hub::Token;
use crate::model::Commit;
use crate::model::Event;
use crate::model::PrState;
use crate::model::PullRequest;
use crate::model::Ref;
use crate::model::Repo;
use crate::model::Status;

#[derive(Default)]
struct FakeHubState {
    users: BTreeSet<String>,
    repos: BTreeSet<Repo>,
    /// Open pull requests only; closing removes the entry, which is exactly
    /// how the real Hub presents closure (by absence).
    prs: BTreeMap<(Repo, u32), PullRequest>,
    refs: BTreeMap<(Repo, Vec<String>), Ref>,
    statuses: BTreeMap<(Commit, Vec<String>), Status>,
    events: BTreeMap<Repo, Vec<Event>>,
    /// Operation name -> error message for injected failures.
    failures: BTreeMap<&'static str, String>,
    set_status_calls: Vec<Status>,
    set_pr_calls: Vec<PullRequest>,
}

/// An in-memory [`HubClient`].
///
/// Tests seed it with open pull requests, refs and statuses, flip them
/// between ticks, and inspect the recorded write calls. Any operation can be
/// made to fail with a scripted message.
#[derive(Default)]
pub struct FakeHub {
    state: Mutex<FakeHubState>,
}

impl FakeHub {
    /// An empty Hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user.
    pub fn add_user(&self, user: impl Into<String>) {
        self.state.lock().unwrap().users.insert(user.into());
    }

    /// Register a repository.
    pub fn add_repo(&self, repo: Repo) {
        let mut state = self.state.lock().unwrap();
        state.users.insert(repo.user().to_string());
        state.repos.insert(repo);
    }

    /// Add or update an open pull request.
    pub fn open_pr(&self, pr: PullRequest) {
        let mut state = self.state.lock().unwrap();
        state.users.insert(pr.repo().user().to_string());
        state.repos.insert(pr.repo().clone());
        state.prs.insert((pr.repo().clone(), pr.number), pr);
    }

    /// Close a pull request: it disappears from the open set.
    pub fn close_pr(&self, repo: &Repo, number: u32) {
        self.state.lock().unwrap().prs.remove(&(repo.clone(), number));
    }

    /// Set a ref.
    pub fn set_ref(&self, r: Ref) {
        let mut state = self.state.lock().unwrap();
        state.repos.insert(r.repo().clone());
        state.refs.insert((r.repo().clone(), r.name().to_vec()), r);
    }

    /// Set a commit status.
    pub fn set_commit_status(&self, status: Status) {
        let mut state = self.state.lock().unwrap();
        state.repos.insert(status.repo().clone());
        state
            .statuses
            .insert((status.commit().clone(), status.context().to_vec()), status);
    }

    /// Queue an event for a repository.
    pub fn push_event(&self, repo: Repo, event: Event) {
        self.state.lock().unwrap().events.entry(repo).or_default().push(event);
    }

    /// Make every call to `operation` fail with `message` until cleared.
    pub fn fail_with(&self, operation: &'static str, message: impl Into<String>) {
        self.state.lock().unwrap().failures.insert(operation, message.into());
    }

    /// Stop failing `operation`.
    pub fn clear_failure(&self, operation: &'static str) {
        self.state.lock().unwrap().failures.remove(operation);
    }

    /// Statuses written through [`HubClient::set_status`].
    pub fn set_status_calls(&self) -> Vec<Status> {
        self.state.lock().unwrap().set_status_calls.clone()
    }

    /// Pull requests written through [`HubClient::set_pr`].
    pub fn set_pr_calls(&self) -> Vec<PullRequest> {
        self.state.lock().unwrap().set_pr_calls.clone()
    }

    /// Forget recorded write calls.
    pub fn clear_calls(&self) {
        let mut state = self.state.lock().unwrap();
        state.set_status_calls.clear();
        state.set_pr_calls.clear();
    }

    fn check(&self, operation: &'static str) -> SyncResult<()> {
        match self.state.lock().unwrap().failures.get(operation) {
            Some(message) => Err(SyncError::hub(format!("{operation}: {message}"))),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl HubClient for FakeHub {
    async fn user_exists(&self, _token: &Token, user: &str) -> SyncResult<bool> {
        self.check("user_exists")?;
        Ok(self.state.lock().unwrap().users.contains(user))
    }

    async fn repo_exists(&self, _token: &Token, repo: &Repo) -> SyncResult<bool> {
        self.check("repo_exists")?;
        Ok(self.state.lock().unwrap().repos.contains(repo))
    }

    async fn repos(&self, _token: &Token, user: &str) -> SyncResult<Vec<Repo>> {
        self.check("repos")?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .repos
            .iter()
            .filter(|repo| repo.user() == user)
            .cloned()
            .collect())
    }

    async fn status(&self, _token: &Token, commit: &Commit) -> SyncResult<Vec<Status>> {
        self.check("status")?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .statuses
            .values()
            .filter(|status| status.commit() == commit)
            .cloned()
            .collect())
    }

    async fn set_status(&self, _token: &Token, status: &Status) -> SyncResult<()> {
        self.check("set_status")?;
        let mut state = self.state.lock().unwrap();
        state.set_status_calls.push(status.clone());
        state
            .statuses
            .insert((status.commit().clone(), status.context().to_vec()), status.clone());
        Ok(())
    }

    async fn set_pr(&self, _token: &Token, pr: &PullRequest) -> SyncResult<()> {
        self.check("set_pr")?;
        let mut state = self.state.lock().unwrap();
        state.set_pr_calls.push(pr.clone());
        match pr.state {
            PrState::Open => {
                state.prs.insert((pr.repo().clone(), pr.number), pr.clone());
            }
            PrState::Closed => {
                state.prs.remove(&(pr.repo().clone(), pr.number));
            }
        }
        Ok(())
    }

    async fn prs(&self, _token: &Token, repo: &Repo) -> SyncResult<Vec<PullRequest>> {
        self.check("prs")?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .prs
            .values()
            .filter(|pr| pr.repo() == repo)
            .cloned()
            .collect())
    }

    async fn refs(&self, _token: &Token, repo: &Repo) -> SyncResult<Vec<Ref>> {
        self.check("refs")?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .refs
            .values()
            .filter(|r| r.repo() == repo)
            .cloned()
            .collect())
    }

    async fn events(&self, _token: &Token, repo: &Repo) -> SyncResult<Vec<Event>> {
        self.check("events")?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .events
            .get(repo)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StatusState;

    fn repo() -> Repo {
        Repo::new("alice", "proj").unwrap()
    }

    #[tokio::test]
    async fn closed_prs_vanish_from_the_open_set() {
        let hub = FakeHub::new();
        let token = Token::new("t");
        let pr = PullRequest {
            head: Commit::new(repo(), "deadbeef"),
            number: 7,
            state: PrState::Open,
            title: "add x".into(),
        };
        hub.open_pr(pr.clone());
        assert_eq!(hub.prs(&token, &repo()).await.unwrap(), vec![pr]);

        hub.close_pr(&repo(), 7);
        assert!(hub.prs(&token, &repo()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn set_status_is_recorded_and_applied() {
        let hub = FakeHub::new();
        let token = Token::new("t");
        let commit = Commit::new(repo(), "deadbeef");
        let status = Status::new(commit.clone(), vec!["ci".into()], StatusState::Failure);

        hub.set_status(&token, &status).await.unwrap();
        assert_eq!(hub.set_status_calls(), vec![status.clone()]);
        assert_eq!(hub.status(&token, &commit).await.unwrap(), vec![status]);
    }

    #[tokio::test]
    async fn directory_queries_reflect_seeded_state() {
        let hub = FakeHub::new();
        let token = Token::new("t");
        hub.add_user("carol");
        hub.add_repo(repo());

        assert!(hub.user_exists(&token, "alice").await.unwrap());
        assert!(hub.user_exists(&token, "carol").await.unwrap());
        assert!(!hub.user_exists(&token, "mallory").await.unwrap());
        assert!(hub.repo_exists(&token, &repo()).await.unwrap());
        assert_eq!(hub.repos(&token, "alice").await.unwrap(), vec![repo()]);

        hub.push_event(repo(), Event::Other("ping".into()));
        assert_eq!(
            hub.events(&token, &repo()).await.unwrap(),
            vec![Event::Other("ping".into())]
        );
    }

    #[tokio::test]
    async fn injected_failures_surface_as_hub_errors() {
        let hub = FakeHub::new();
        let token = Token::new("t");
        hub.fail_with("refs", "offline");
        let err = hub.refs(&token, &repo()).await.unwrap_err();
        assert!(matches!(err, SyncError::Hub { .. }));

        hub.clear_failure("refs");
        assert!(hub.refs(&token, &repo()).await.is_ok());
    }
}
