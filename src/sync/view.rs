//! Per-tick views of the two Store branches.

use tracing::trace;

use crate::conversion;
use crate::error::SyncResult;
use crate::error::UnexpectedParentsSnafu;
use crate::snapshot::Snapshot;
use crate::store::memory::Branch;
use crate::store::memory::StoreCommit;
use crate::store::memory::Transaction;

/// One branch as a sync tick sees it: an open transaction, the head commit
/// the transaction is based on, and the snapshot derived from the staged
/// tree.
///
/// A view lives for at most one tick. Its transaction is closed exactly
/// once: by the tick committing it, by an explicit abort, or by the
/// transaction's own drop guard when a tick unwinds. After the transaction
/// closes, the head and snapshot stay usable as the "previous state" for the
/// next view.
pub struct BranchView {
    /// The branch this view is of.
    pub branch: Branch,

    /// The open transaction.
    pub tx: Transaction,

    /// Branch head at the time the transaction opened.
    pub head: StoreCommit,

    /// Snapshot of the staged tree.
    pub snapshot: Snapshot,
}

impl BranchView {
    /// Open a view of `branch`.
    ///
    /// With `old` given, the snapshot is computed incrementally from the old
    /// head's diff; otherwise the whole tree is read.
    pub async fn open(branch: &Branch, old: Option<&BranchView>) -> SyncResult<BranchView> {
        let tx = branch.transaction().await?;
        let mut parents = tx.parents();
        if parents.len() != 1 {
            let count = parents.len();
            tx.abort().await;
            return UnexpectedParentsSnafu {
                branch: branch.name().to_string(),
                count,
            }
            .fail();
        }
        let head = parents.remove(0);

        let snapshot = match old {
            None => conversion::snapshot_of_tree(&tx).await?,
            Some(old) => {
                let changes = tx.diff(&old.head).await?;
                conversion::snapshot(Some((&old.snapshot, changes.as_slice())), &tx).await?
            }
        };
        trace!(branch = branch.name(), head = %head.id(), %snapshot, "opened branch view");

        Ok(BranchView {
            branch: branch.clone(),
            tx,
            head,
            snapshot,
        })
    }

    /// Abort the view's transaction.
    pub async fn abort(&self) {
        self.tx.abort().await;
    }
}

/// The pair of branch views a tick works on.
pub struct SyncState {
    /// The user-facing branch.
    pub public: BranchView,

    /// The branch imported Hub state lands on.
    pub private: BranchView,
}

impl SyncState {
    /// Open views of both branches, incrementally when `old` is given.
    pub async fn open(
        public_branch: &Branch,
        private_branch: &Branch,
        old: Option<&SyncState>,
    ) -> SyncResult<SyncState> {
        let public = BranchView::open(public_branch, old.map(|state| &state.public)).await?;
        let private = BranchView::open(private_branch, old.map(|state| &state.private)).await?;
        Ok(SyncState { public, private })
    }

    /// Abort both transactions.
    pub async fn abort(&self) {
        self.public.abort().await;
        self.private.abort().await;
    }
}
