//! One-directional tree reconciliation
//!
//! The [`Reconciler`] makes a local tree match the remote one:
//!
//! 1. Remote absent: delete the local counterpart.
//! 2. Remote file: download it, replacing whatever is there locally.
//!    Depth does not matter for files.
//! 3. Remote container: make the local side an (empty if new) container.
//! 4. At depth one or infinite, download every remote file member, make
//!    every remote container member a local container, and delete local
//!    members with no remote counterpart.
//! 5. At depth infinite, recurse into every container member.
//!
//! The first failure aborts the whole call. Callers that need to keep going
//! across several trees do so one tree per call.

use std::collections::BTreeSet;
use std::ffi::{OsStr, OsString};

use serde::Serialize;
use tracing::{debug, info};

use crate::depth::Depth;
use crate::error::TargetResult;
use crate::progress::Progress;
use crate::state::{RemoteChild, ResourceState, Transfer};

/// Counts of what a reconciliation changed locally
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    pub downloaded: usize,
    pub unchanged: usize,
    pub created: usize,
    pub deleted: usize,
}

impl ReconcileStats {
    pub fn merge(&mut self, other: ReconcileStats) {
        self.downloaded += other.downloaded;
        self.unchanged += other.unchanged;
        self.created += other.created;
        self.deleted += other.deleted;
    }

    pub fn is_empty(&self) -> bool {
        self.downloaded == 0 && self.created == 0 && self.deleted == 0
    }
}

/// Pulls a remote tree into the local workspace
pub struct Reconciler<'a> {
    progress: &'a Progress,
    stats: ReconcileStats,
}

impl<'a> Reconciler<'a> {
    pub fn new(progress: &'a Progress) -> Self {
        Self {
            progress,
            stats: ReconcileStats::default(),
        }
    }

    pub fn stats(&self) -> ReconcileStats {
        self.stats
    }

    /// Make `state`'s local tree match its remote tree down to `depth`
    pub fn reconcile(&mut self, state: &mut ResourceState, depth: Depth) -> TargetResult<()> {
        self.progress.check_canceled()?;
        self.progress
            .subtask(&state.local().display().to_string());

        let Some(entry) = state.remote_entry()? else {
            if state.delete_local()? {
                debug!(local = %state.local().display(), "no remote counterpart, deleted");
                self.stats.deleted += 1;
            }
            return Ok(());
        };

        if !entry.is_container() {
            return self.fetch(state);
        }

        self.make_container(state)?;
        if depth == Depth::Zero {
            return Ok(());
        }

        let containers = self.reconcile_members(state)?;
        if depth == Depth::Infinite {
            for mut child in containers {
                self.reconcile(&mut child, Depth::Infinite)?;
            }
        }
        Ok(())
    }

    /// Shallow pass over the members of a container
    ///
    /// Returns the container members for the caller to descend into.
    fn reconcile_members(&mut self, state: &ResourceState) -> TargetResult<Vec<ResourceState>> {
        let mut unmatched: BTreeSet<OsString> = state.local_children()?.into_iter().collect();
        let mut containers = Vec::new();

        for RemoteChild { entry, mut state } in state.remote_children()? {
            self.progress.check_canceled()?;
            unmatched.remove(OsStr::new(&entry.name));

            if entry.is_container() {
                self.make_container(&mut state)?;
                containers.push(state);
            } else {
                self.fetch(&mut state)?;
            }
        }

        for name in unmatched {
            self.progress.check_canceled()?;
            let mut orphan = state.child(&name)?;
            if orphan.delete_local()? {
                debug!(local = %orphan.local().display(), "no remote counterpart, deleted");
                self.stats.deleted += 1;
            }
        }

        Ok(containers)
    }

    fn make_container(&mut self, state: &mut ResourceState) -> TargetResult<()> {
        if state.local_exists()? && !state.local_is_container()? {
            state.delete_local()?;
            self.stats.deleted += 1;
        }
        if state.create_local_container()? {
            self.stats.created += 1;
        }
        Ok(())
    }

    fn fetch(&mut self, state: &mut ResourceState) -> TargetResult<()> {
        match state.download(self.progress)? {
            Transfer::Copied(_) => self.stats.downloaded += 1,
            Transfer::Unchanged => self.stats.unchanged += 1,
            Transfer::Container => self.stats.created += 1,
        }
        self.progress.worked(1);
        Ok(())
    }
}

/// Reconcile one tree and report what changed
pub fn reconcile(
    state: &mut ResourceState,
    depth: Depth,
    progress: &Progress,
) -> TargetResult<ReconcileStats> {
    let mut reconciler = Reconciler::new(progress);
    reconciler.reconcile(state, depth)?;
    let stats = reconciler.stats();
    info!(
        local = %state.local().display(),
        %depth,
        downloaded = stats.downloaded,
        created = stats.created,
        deleted = stats.deleted,
        "reconciled"
    );
    Ok(stats)
}
