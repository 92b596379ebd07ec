//! The synchronization engine.
//!
//! One tick of the engine runs, in order: outbound API push of user edits,
//! Hub import onto the private branch, prune, private commit, merge of the
//! private branch into the public branch (user edits win on conflict), and
//! a prune pass over the public branch. Ticks never overlap: the run loop
//! processes one at a time and coalesces head-change signals that arrive
//! mid-tick into a single dirty flag.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::conversion;
use crate::error::SyncResult;
use crate::hub::call_api;
use crate::hub::import;
use crate::hub::HubClient;
use crate::hub::Token;
use crate::model::Repo;
use crate::prune::prune;
use crate::prune::PruneOutcome;
use crate::store::memory::Branch;
use crate::store::ChangeKind;
use crate::store::PathChange;
use crate::store::TreePath;
use crate::store::TreeRead;

mod view;

pub use view::BranchView;
pub use view::SyncState;

/// Initial file written on an otherwise empty private branch.
const README_PATH: &str = "README.md";
const README_BODY: &str = "\
# hubsync state branch

This branch mirrors hub state as a file tree:

    <user>/<repo>/pr/<number>/{head,state,title}
    <user>/<repo>/commit/<id>/status/<context...>/{state,description,target_url}
    <user>/<repo>/ref/<name...>/head

Edit files on the public branch to request changes; the bridge pushes the
difference back to the hub. Statuses removed locally are never deleted on
the hub side: the hub API cannot delete a status.
";

/// How often the engine runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunPolicy {
    /// One tick, then terminate.
    Once,

    /// Keep reacting to branch-head changes until cancelled.
    #[default]
    Repeat,
}

/// Engine configuration.
#[derive(Debug, Clone, Default)]
pub struct SyncConfig {
    /// Run once or keep watching.
    pub policy: RunPolicy,

    /// Compute outbound deltas but skip the Hub write calls.
    pub dry_updates: bool,
}

/// The synchronization engine: two Store branches, a Hub client, and the
/// tick pipeline tying them together.
pub struct SyncEngine<H: HubClient + ?Sized> {
    hub: Arc<H>,
    token: Token,
    public: Branch,
    private: Branch,
    config: SyncConfig,
    /// `None` until the first successful tick ("Starting"); the last good
    /// state afterwards ("Running").
    state: Option<SyncState>,
}

impl<H: HubClient + ?Sized> SyncEngine<H> {
    /// Create an engine over the given branches.
    pub fn new(hub: Arc<H>, token: Token, public: Branch, private: Branch, config: SyncConfig) -> Self {
        Self {
            hub,
            token,
            public,
            private,
            config,
            state: None,
        }
    }

    // ========================================================================
    // Branch initialization
    // ========================================================================

    /// Ensure both branches exist and share an ancestor.
    ///
    /// Two empty branches get an initial commit on the private branch which
    /// the public branch fast-forwards to; a single empty branch
    /// fast-forwards to the other one; two existing branches are left alone.
    pub async fn init_sync(&self) -> SyncResult<()> {
        let public_head = self.public.head().await;
        let private_head = self.private.head().await;
        match (public_head, private_head) {
            (None, None) => {
                let tx = self.private.transaction().await?;
                tx.create_or_replace_file(&TreePath::parse(README_PATH), README_BODY.as_bytes().to_vec())
                    .await?;
                let commit = tx.commit("Initial commit").await?;
                self.public.fast_forward(&commit).await?;
                info!(head = %commit.id(), "initialized empty branches");
                Ok(())
            }
            (None, Some(private_head)) => self.public.fast_forward(&private_head).await,
            (Some(public_head), None) => self.private.fast_forward(&public_head).await,
            (Some(_), Some(_)) => Ok(()),
        }
    }

    // ========================================================================
    // Ticks
    // ========================================================================

    /// Run one tick: `first_sync` if the engine has no state yet,
    /// `sync_once` otherwise. On success the resulting state becomes the
    /// baseline for the next tick; on failure the previous state is kept.
    pub async fn sync(&mut self) -> SyncResult<()> {
        let next = match self.state.take() {
            None => self.first_sync().await?,
            Some(old) => {
                let result = self.sync_once(&old).await;
                match result {
                    Ok(next) => next,
                    Err(err) => {
                        self.state = Some(old);
                        return Err(err);
                    }
                }
            }
        };
        self.state = Some(next);
        Ok(())
    }

    /// First tick: full snapshot rebuild of both branches, then a regular
    /// sync over every repository either branch mentions.
    async fn first_sync(&self) -> SyncResult<SyncState> {
        let state = SyncState::open(&self.public, &self.private, None).await?;
        let repos: BTreeSet<Repo> = state
            .public
            .snapshot
            .repos()
            .union(state.private.snapshot.repos())
            .cloned()
            .collect();
        if repos.is_empty() {
            debug!("no repositories on either branch; nothing to sync");
            state.abort().await;
            return Ok(state);
        }
        let state = self.sync_repos(state, &repos).await?;
        call_api(
            self.hub.as_ref(),
            &self.token,
            &state.private.snapshot,
            &state.public.snapshot,
            self.config.dry_updates,
        )
        .await;
        Ok(state)
    }

    /// Regular tick: push user edits first, then sync the repositories
    /// whose membership changed on either branch since the last tick.
    async fn sync_once(&self, old: &SyncState) -> SyncResult<SyncState> {
        let current = SyncState::open(&self.public, &self.private, Some(old)).await?;
        call_api(
            self.hub.as_ref(),
            &self.token,
            &old.public.snapshot,
            &current.public.snapshot,
            self.config.dry_updates,
        )
        .await;

        let repos: BTreeSet<Repo> = old
            .public
            .snapshot
            .repos()
            .symmetric_difference(current.public.snapshot.repos())
            .chain(
                old.private
                    .snapshot
                    .repos()
                    .symmetric_difference(current.private.snapshot.repos()),
            )
            .cloned()
            .collect();
        self.sync_repos(current, &repos).await
    }

    /// The central pipeline: import, prune, write, commit the private
    /// branch, merge it into the public branch, prune the public branch.
    async fn sync_repos(&self, state: SyncState, repos: &BTreeSet<Repo>) -> SyncResult<SyncState> {
        // Import the Hub's view of the repositories onto the private branch.
        let imported = import(self.hub.as_ref(), &self.token, &state.private.snapshot, repos).await;
        let (imported, cleanup) = match prune(&imported) {
            PruneOutcome::Clean => (imported, None),
            PruneOutcome::Pruned {
                snapshot,
                removed_prs,
                removed_commits,
            } => (snapshot, Some((removed_prs, removed_commits))),
        };
        if let Some((removed_prs, removed_commits)) = &cleanup {
            conversion::apply_cleanup(&state.private.tx, removed_prs, removed_commits).await?;
        }
        conversion::update_prs(&state.private.tx, imported.prs()).await?;
        conversion::update_statuses(&state.private.tx, imported.statuses()).await?;
        conversion::update_refs(&state.private.tx, imported.refs()).await?;

        let changes = state.private.tx.diff(&state.private.head).await?;
        if cleanup.is_none() && changes.is_empty() {
            state.private.tx.abort().await;
        } else {
            let message = format!("Sync with {}", repos_label(repos));
            let commit = state.private.tx.commit(message).await?;
            info!(head = %commit.id(), changes = changes.len(), "committed imported state");
        }

        // Pick up the new private head and merge it into the public branch.
        state.public.tx.abort().await;
        let state = SyncState::open(&self.public, &self.private, Some(&state)).await?;
        state.private.tx.abort().await;
        self.merge(&state).await?;

        // Prune what the merge may have carried onto the public branch.
        let state = SyncState::open(&self.public, &self.private, Some(&state)).await?;
        let state = match prune(&state.public.snapshot) {
            PruneOutcome::Clean => state,
            PruneOutcome::Pruned {
                removed_prs,
                removed_commits,
                ..
            } => {
                conversion::apply_cleanup(&state.public.tx, &removed_prs, &removed_commits).await?;
                let commit = state.public.tx.commit("Prune").await?;
                info!(head = %commit.id(), "pruned public branch");
                state.private.tx.abort().await;
                SyncState::open(&self.public, &self.private, Some(&state)).await?
            }
        };

        state.abort().await;
        Ok(state)
    }

    /// Merge the private head into the public transaction, resolving
    /// conflicts in favor of the public (user-edited) side.
    async fn merge(&self, state: &SyncState) -> SyncResult<()> {
        if state.public.snapshot == state.private.snapshot {
            state.public.tx.abort().await;
            return Ok(());
        }

        // No divergence on the public side: take the private head as-is.
        if state.public.head.is_ancestor_of(&state.private.head) {
            state.public.tx.abort().await;
            state.public.branch.fast_forward(&state.private.head).await?;
            info!(head = %state.private.head.id(), "fast-forwarded public branch");
            return Ok(());
        }

        let (three_way, conflicts) = state.public.tx.merge(&state.private.head).await?;
        for path in &conflicts {
            let ours = three_way.ours.read_file(path).await?;
            let theirs = three_way.theirs.read_file(path).await?;
            match (ours, theirs) {
                (None, None) => {
                    // Both sides deleted: drop the enclosing directory.
                    if let Some(dir) = path.parent() {
                        state.public.tx.remove(&dir).await?;
                    }
                }
                (Some(contents), _) => {
                    state.public.tx.create_or_replace_file(path, contents).await?;
                }
                (None, Some(contents)) => {
                    state.public.tx.create_or_replace_file(path, contents).await?;
                }
            }
        }

        let changes = state.public.tx.diff(&state.public.head).await?;
        if changes.is_empty() {
            state.public.tx.abort().await;
            return Ok(());
        }
        let message = merge_message(state.private.branch.name(), &changes, &conflicts);
        let commit = state.public.tx.commit(message).await?;
        info!(
            head = %commit.id(),
            changes = changes.len(),
            conflicts = conflicts.len(),
            "merged private branch into public branch"
        );
        Ok(())
    }

    // ========================================================================
    // Run loop
    // ========================================================================

    /// Initialize the branches and run the configured policy.
    ///
    /// With [`RunPolicy::Once`], a single tick runs and its error (if any)
    /// is returned. With [`RunPolicy::Repeat`], the engine watches both
    /// branch heads and re-runs a tick whenever one moves; tick failures are
    /// logged and the loop waits for the next signal. The `switch` cancels
    /// the loop and both watchers.
    pub async fn run(&mut self, switch: CancellationToken) -> SyncResult<()> {
        self.init_sync().await?;
        match self.config.policy {
            RunPolicy::Once => self.sync().await,
            RunPolicy::Repeat => {
                let notify = Arc::new(Notify::new());
                // Start dirty so the first tick runs without a signal.
                let dirty = Arc::new(Mutex::new(true));
                for branch in [&self.public, &self.private] {
                    spawn_watcher(branch, Arc::clone(&dirty), Arc::clone(&notify), switch.clone());
                }

                loop {
                    loop {
                        if switch.is_cancelled() {
                            info!("sync loop cancelled");
                            return Ok(());
                        }
                        let claimed = {
                            let mut dirty = dirty.lock().unwrap();
                            std::mem::take(&mut *dirty)
                        };
                        if claimed {
                            break;
                        }
                        tokio::select! {
                            _ = Box::pin(switch.cancelled()) => {
                                info!("sync loop cancelled");
                                return Ok(());
                            }
                            _ = Box::pin(notify.notified()) => {}
                        }
                    }
                    if let Err(err) = Box::pin(self.sync()).await {
                        warn!(error = %err, "sync tick failed; waiting for the next signal");
                    }
                }
            }
        }
    }
}

/// Watch one branch head; set the dirty flag and wake the reactor on every
/// change.
fn spawn_watcher(branch: &Branch, dirty: Arc<Mutex<bool>>, notify: Arc<Notify>, switch: CancellationToken) {
    let name = branch.name().to_string();
    let mut watch = branch.watch();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = switch.cancelled() => break,
                changed = watch.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    debug!(branch = %name, "branch head moved");
                    *dirty.lock().unwrap() = true;
                    notify.notify_one();
                }
            }
        }
    });
}

fn repos_label(repos: &BTreeSet<Repo>) -> String {
    let names: Vec<String> = repos.iter().map(Repo::to_string).collect();
    names.join(", ")
}

fn merge_message(private_branch: &str, changes: &[PathChange], conflicts: &[TreePath]) -> String {
    let added = changes.iter().filter(|c| c.kind == ChangeKind::Added).count();
    let removed = changes.iter().filter(|c| c.kind == ChangeKind::Removed).count();
    let updated = changes.iter().filter(|c| c.kind == ChangeKind::Updated).count();
    let mut message = format!("Merge branch {private_branch}\n\n{added} added, {removed} removed, {updated} updated\n");
    if !conflicts.is_empty() {
        message.push_str("\nConflicts:\n");
        for path in conflicts {
            message.push_str(&format!("  {path}\n"));
        }
    }
    message
}
