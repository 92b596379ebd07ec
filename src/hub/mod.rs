//! The Hub side of the bridge: client contract, import and export.

use std::fmt;

use async_trait::async_trait;

use crate::error::SyncResult;
use crate::model::Commit;
use crate::model::Event;
use crate::model::PullRequest;
use crate::model::Ref;
use crate::model::Repo;
use crate::model::Status;

mod export;
mod fake;
mod import;

pub use export::call_api;
pub use export::ExportSummary;
pub use fake::FakeHub;
pub use import::import;

/// How many Hub requests may be in flight at once within one import phase.
pub const MAX_HUB_CONCURRENCY: usize = 16;

/// An opaque Hub credential.
///
/// Long-lived and shared read-only; passed to every Hub call.
#[derive(Clone)]
pub struct Token(String);

impl Token {
    /// Wrap a credential string.
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// The raw credential, for building requests.
    pub fn reveal(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token(***)")
    }
}

/// Operations the bridge needs from a Hub API client.
///
/// Every call returns a success value or an error carrying a human-readable
/// message. Callers log failures and drop the call's result; a failed call
/// never aborts a sync tick.
#[async_trait]
pub trait HubClient: Send + Sync {
    /// Whether `user` exists.
    async fn user_exists(&self, token: &Token, user: &str) -> SyncResult<bool>;

    /// Whether `repo` exists.
    async fn repo_exists(&self, token: &Token, repo: &Repo) -> SyncResult<bool>;

    /// Repositories owned by `user`.
    async fn repos(&self, token: &Token, user: &str) -> SyncResult<Vec<Repo>>;

    /// Statuses attached to `commit`.
    async fn status(&self, token: &Token, commit: &Commit) -> SyncResult<Vec<Status>>;

    /// Create or overwrite a commit status.
    async fn set_status(&self, token: &Token, status: &Status) -> SyncResult<()>;

    /// Update a pull request.
    async fn set_pr(&self, token: &Token, pr: &PullRequest) -> SyncResult<()>;

    /// Open pull requests of `repo`.
    async fn prs(&self, token: &Token, repo: &Repo) -> SyncResult<Vec<PullRequest>>;

    /// Refs of `repo`.
    async fn refs(&self, token: &Token, repo: &Repo) -> SyncResult<Vec<Ref>>;

    /// Pending events of `repo`.
    async fn events(&self, token: &Token, repo: &Repo) -> SyncResult<Vec<Event>>;
}

#[async_trait]
impl<T: HubClient + ?Sized> HubClient for std::sync::Arc<T> {
    async fn user_exists(&self, token: &Token, user: &str) -> SyncResult<bool> {
        (**self).user_exists(token, user).await
    }

    async fn repo_exists(&self, token: &Token, repo: &Repo) -> SyncResult<bool> {
        (**self).repo_exists(token, repo).await
    }

    async fn repos(&self, token: &Token, user: &str) -> SyncResult<Vec<Repo>> {
        (**self).repos(token, user).await
    }

    async fn status(&self, token: &Token, commit: &Commit) -> SyncResult<Vec<Status>> {
        (**self).status(token, commit).await
    }

    async fn set_status(&self, token: &Token, status: &Status) -> SyncResult<()> {
        (**self).set_status(token, status).await
    }

    async fn set_pr(&self, token: &Token, pr: &PullRequest) -> SyncResult<()> {
        (**self).set_pr(token, pr).await
    }

    async fn prs(&self, token: &Token, repo: &Repo) -> SyncResult<Vec<PullRequest>> {
        (**self).prs(token, repo).await
    }

    async fn refs(&self, token: &Token, repo: &Repo) -> SyncResult<Vec<Ref>> {
        (**self).refs(token, repo).await
    }

    async fn events(&self, token: &Token, repo: &Repo) -> SyncResult<Vec<Event>> {
        (**self).events(token, repo).await
    }
}
