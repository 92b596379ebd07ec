//! Error types for the sync engine.
//!
//! Uses `snafu` for structured error handling with context.

use snafu::Snafu;

/// Errors that can occur while bridging the Hub and the Store.
///
/// The taxonomy mirrors the failure domains of a sync tick: malformed
/// persisted state (conversion), Store transaction/branch failures, per-call
/// Hub failures, and violated engine invariants. All of them abort at most
/// the current tick; the run loop logs and waits for the next signal.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum SyncError {
    // ========================================================================
    // Conversion Errors
    // ========================================================================
    /// A persisted status state is not one of the four known values.
    #[snafu(display("invalid status state {value:?} at {path}"))]
    InvalidStatusState { value: String, path: String },

    /// A persisted pull request state is not "open" or "closed".
    #[snafu(display("invalid pull request state {value:?} at {path}"))]
    InvalidPrState { value: String, path: String },

    /// An entity failed its construction invariant.
    #[snafu(display("invalid entity: {message}"))]
    InvalidEntity { message: String },

    // ========================================================================
    // Store Errors
    // ========================================================================
    /// An unknown commit id was dereferenced.
    #[snafu(display("unknown commit {id}"))]
    UnknownCommit { id: String },

    /// The transaction was already committed or aborted.
    #[snafu(display("transaction on {branch:?} is closed"))]
    TransactionClosed { branch: String },

    /// The branch head moved while the transaction was open.
    #[snafu(display("transaction conflict on {branch:?}: head moved"))]
    TransactionConflict { branch: String },

    /// The fast-forward target does not descend from the current head.
    #[snafu(display("fast-forward rejected on {branch:?}"))]
    FastForwardRejected { branch: String },

    /// A path operation hit a file where a directory was expected (or the
    /// other way around).
    #[snafu(display("path {path} is not a {expected}"))]
    NotA { path: String, expected: &'static str },

    /// Three-way merge could not be set up.
    #[snafu(display("merge failed: {message}"))]
    MergeFailed { message: String },

    // ========================================================================
    // Hub Errors
    // ========================================================================
    /// A Hub API call failed. The message is the human-readable error
    /// reported by the client; callers log it and drop the call's result.
    #[snafu(display("hub: {message}"))]
    Hub { message: String },

    // ========================================================================
    // Invariant Violations
    // ========================================================================
    /// A just-opened transaction had an unexpected number of parents.
    #[snafu(display("expected exactly one parent on {branch:?}, found {count}"))]
    UnexpectedParents { branch: String, count: usize },
}

impl SyncError {
    /// Build a Hub error from any displayable cause.
    pub fn hub(message: impl std::fmt::Display) -> Self {
        SyncError::Hub {
            message: message.to_string(),
        }
    }
}

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;
