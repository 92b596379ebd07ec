//! hubsync: a bidirectional bridge between a code-hosting hub and a
//! transactional versioned filesystem.
//!
//! Hub state (pull requests, refs, commit statuses) is mirrored as a file
//! tree on a private Store branch. The private branch merges into a public
//! branch that users may edit; on conflict the user's edit wins. Edits on
//! the public branch flow back to the Hub as API calls.
//!
//! The pieces, leaves first:
//!
//! - [`model`]: immutable entity values and their identities.
//! - [`snapshot`]: the five-set [`Snapshot`](snapshot::Snapshot) value and
//!   its algebra.
//! - [`prune`]: removal of data reachable only through closed pull requests.
//! - [`store`]: the Store surface (paths, readable trees, diffs) and the
//!   in-process [`memory`](store::memory) implementation.
//! - [`conversion`]: serialization of snapshots to Store trees and back,
//!   full or incremental.
//! - [`hub`]: the Hub client contract, parallel import, outbound export,
//!   and a deterministic fake.
//! - [`sync`]: the engine running the tick pipeline and the watch loop.

#![warn(missing_docs)]

pub mod conversion;
pub mod error;
pub mod hub;
pub mod model;
pub mod prune;
pub mod snapshot;
pub mod store;
pub mod sync;

pub use error::SyncError;
pub use error::SyncResult;
pub use hub::FakeHub;
pub use hub::HubClient;
pub use hub::Token;
pub use model::Commit;
pub use model::Event;
pub use model::PrState;
pub use model::PullRequest;
pub use model::Ref;
pub use model::Repo;
pub use model::Status;
pub use model::StatusState;
pub use snapshot::Snapshot;
pub use store::memory::MemoryStore;
pub use sync::RunPolicy;
pub use sync::SyncConfig;
pub use sync::SyncEngine;
