//! Entity types shared by the Hub and the Store sides of the bridge.
//!
//! All entities are immutable values with identity-based ordering:
//! a repository is identified by its `(user, name)` pair, a pull request by
//! its number within a repository, a status by its context path within a
//! commit, a ref by its name within a repository. Snapshots key their sets
//! by these identities.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::error::InvalidEntitySnafu;
use crate::error::SyncResult;

/// Context used for a status whose context path is empty.
pub const DEFAULT_CONTEXT: &str = "default";

/// A repository on the Hub, identified by owner and name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Repo {
    user: String,
    name: String,
}

impl Repo {
    /// Create a repository identifier. Both parts must be non-empty.
    pub fn new(user: impl Into<String>, name: impl Into<String>) -> SyncResult<Self> {
        let user = user.into();
        let name = name.into();
        snafu::ensure!(
            !user.is_empty() && !name.is_empty(),
            InvalidEntitySnafu {
                message: format!("repository {user:?}/{name:?} has an empty component"),
            }
        );
        Ok(Self { user, name })
    }

    /// The owning user or organization.
    pub fn user(&self) -> &str {
        &self.user
    }

    /// The repository name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Repo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user, self.name)
    }
}

/// A commit within a repository.
///
/// The id is an opaque identifier string; it is compared and persisted but
/// never parsed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Commit {
    /// Repository the commit belongs to.
    pub repo: Repo,

    /// Opaque commit identifier.
    pub id: String,
}

impl Commit {
    /// Create a commit reference.
    pub fn new(repo: Repo, id: impl Into<String>) -> Self {
        Self { repo, id: id.into() }
    }
}

impl fmt::Display for Commit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repo, self.id)
    }
}

/// State of a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PrState {
    /// The pull request is open.
    Open,

    /// The pull request is closed (or merged).
    Closed,
}

impl PrState {
    /// Persisted representation.
    pub fn as_str(self) -> &'static str {
        match self {
            PrState::Open => "open",
            PrState::Closed => "closed",
        }
    }

    /// Parse the persisted representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(PrState::Open),
            "closed" => Some(PrState::Closed),
            _ => None,
        }
    }
}

impl fmt::Display for PrState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pull request.
///
/// Identity within a repository is the `number`; the owning repository is
/// the head commit's repository.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PullRequest {
    /// Head commit of the pull request branch.
    pub head: Commit,

    /// Pull request number.
    pub number: u32,

    /// Open or closed.
    pub state: PrState,

    /// Title line.
    pub title: String,
}

impl PullRequest {
    /// The repository this pull request belongs to.
    pub fn repo(&self) -> &Repo {
        &self.head.repo
    }

    /// Whether the pull request is open.
    pub fn is_open(&self) -> bool {
        self.state == PrState::Open
    }
}

impl fmt::Display for PullRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{} [{}]", self.repo(), self.number, self.state)
    }
}

/// State of a commit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StatusState {
    /// The checks errored before producing a verdict.
    Error,

    /// The checks are still running.
    Pending,

    /// The checks passed.
    Success,

    /// The checks failed.
    Failure,
}

impl StatusState {
    /// Persisted representation.
    pub fn as_str(self) -> &'static str {
        match self {
            StatusState::Error => "error",
            StatusState::Pending => "pending",
            StatusState::Success => "success",
            StatusState::Failure => "failure",
        }
    }

    /// Parse the persisted representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "error" => Some(StatusState::Error),
            "pending" => Some(StatusState::Pending),
            "success" => Some(StatusState::Success),
            "failure" => Some(StatusState::Failure),
            _ => None,
        }
    }
}

impl fmt::Display for StatusState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A build status attached to a commit.
///
/// Identity within a commit is the context path. An empty context is
/// normalized to `["default"]` at construction, so the invariant "context is
/// non-empty" holds everywhere else.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Status {
    commit: Commit,
    context: Vec<String>,

    /// Current state of the checks.
    pub state: StatusState,

    /// Optional free-form description.
    pub description: Option<String>,

    /// Optional link to the build output.
    pub url: Option<String>,
}

impl Status {
    /// Create a status with no description or url.
    pub fn new(commit: Commit, context: Vec<String>, state: StatusState) -> Self {
        let context = if context.is_empty() {
            vec![DEFAULT_CONTEXT.to_string()]
        } else {
            context
        };
        Self {
            commit,
            context,
            state,
            description: None,
            url: None,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the target url.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// The commit this status is attached to.
    pub fn commit(&self) -> &Commit {
        &self.commit
    }

    /// The context path. Never empty.
    pub fn context(&self) -> &[String] {
        &self.context
    }

    /// The repository of the underlying commit.
    pub fn repo(&self) -> &Repo {
        &self.commit.repo
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]={}", self.commit, self.context.join("/"), self.state)
    }
}

/// A named ref (branch or tag) in a repository.
///
/// Identity within a repository is the name path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Ref {
    /// Commit the ref points at.
    pub head: Commit,

    name: Vec<String>,
}

impl Ref {
    /// Create a ref. The name must have at least one segment.
    pub fn new(head: Commit, name: Vec<String>) -> SyncResult<Self> {
        snafu::ensure!(
            !name.is_empty(),
            InvalidEntitySnafu {
                message: format!("ref on {} has an empty name", head),
            }
        );
        Ok(Self { head, name })
    }

    /// The name path. Never empty.
    pub fn name(&self) -> &[String] {
        &self.name
    }

    /// The repository of the head commit.
    pub fn repo(&self) -> &Repo {
        &self.head.repo
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repo(), self.name.join("/"))
    }
}

/// An event reported by the Hub for a repository.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Event {
    /// A pull request was opened, updated or closed.
    Pr(PullRequest),

    /// A commit status changed.
    Status(Status),

    /// A ref moved.
    Ref(Ref),

    /// Anything the bridge does not model.
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> Repo {
        Repo::new("alice", "proj").unwrap()
    }

    #[test]
    fn repo_rejects_empty_components() {
        assert!(Repo::new("", "proj").is_err());
        assert!(Repo::new("alice", "").is_err());
    }

    #[test]
    fn status_normalizes_empty_context() {
        let commit = Commit::new(repo(), "deadbeef");
        let status = Status::new(commit, vec![], StatusState::Pending);
        assert_eq!(status.context(), [DEFAULT_CONTEXT.to_string()]);
    }

    #[test]
    fn ref_rejects_empty_name() {
        let commit = Commit::new(repo(), "deadbeef");
        assert!(Ref::new(commit, vec![]).is_err());
    }

    #[test]
    fn state_strings_roundtrip() {
        for state in [
            StatusState::Error,
            StatusState::Pending,
            StatusState::Success,
            StatusState::Failure,
        ] {
            assert_eq!(StatusState::parse(state.as_str()), Some(state));
        }
        assert_eq!(StatusState::parse("bogus"), None);
        for state in [PrState::Open, PrState::Closed] {
            assert_eq!(PrState::parse(state.as_str()), Some(state));
        }
    }
}
