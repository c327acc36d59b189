//! Synchronization status classification
//!
//! Targets keep no history, so there is no common ancestor to diff against.
//! The direction of a change is approximated from the baseline instead:
//! the local side changed if it is dirty, the remote side changed if it is
//! out of date. Without a baseline, existence stands in for change: a
//! resource present on one side only is an addition from that side, and a
//! resource present on both sides is a conflicting change.

use std::fmt;
use std::ops::BitOr;

use serde::{Serialize, Serializer};

use crate::backend::BackendError;
use crate::error::{TargetError, TargetResult};
use crate::progress::Progress;
use crate::state::ResourceState;
use crate::transfer::{self, TransferError};

/// Direction and kind of a difference, as bit flags
///
/// One direction (`IN_SYNC`, `OUTGOING`, `INCOMING`, `CONFLICTING`) is
/// combined with one change kind (`ADDITION`, `DELETION`, `CHANGE`), with
/// `PSEUDO_CONFLICT` optionally added to a conflicting change whose
/// contents turned out to be identical.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SyncKind(u8);

impl SyncKind {
    pub const IN_SYNC: SyncKind = SyncKind(0);

    pub const ADDITION: SyncKind = SyncKind(1);
    pub const DELETION: SyncKind = SyncKind(2);
    pub const CHANGE: SyncKind = SyncKind(3);
    pub const CHANGE_MASK: SyncKind = SyncKind(3);

    pub const OUTGOING: SyncKind = SyncKind(4);
    pub const INCOMING: SyncKind = SyncKind(8);
    pub const CONFLICTING: SyncKind = SyncKind(12);
    pub const DIRECTION_MASK: SyncKind = SyncKind(12);

    pub const PSEUDO_CONFLICT: SyncKind = SyncKind(16);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn from_bits(bits: u8) -> Self {
        SyncKind(bits)
    }

    pub fn direction(self) -> SyncKind {
        SyncKind(self.0 & Self::DIRECTION_MASK.0)
    }

    pub fn change(self) -> SyncKind {
        SyncKind(self.0 & Self::CHANGE_MASK.0)
    }

    pub fn is_in_sync(self) -> bool {
        self.direction() == Self::IN_SYNC && self.change() == Self::IN_SYNC
    }

    pub fn is_pseudo_conflict(self) -> bool {
        self.0 & Self::PSEUDO_CONFLICT.0 != 0
    }

    /// Every bit of `other` is set in `self`
    pub fn contains(self, other: SyncKind) -> bool {
        self.0 & other.0 == other.0
    }

    /// Without the pseudo-conflict modifier
    pub fn base(self) -> SyncKind {
        SyncKind(self.0 & !Self::PSEUDO_CONFLICT.0)
    }
}

impl BitOr for SyncKind {
    type Output = SyncKind;

    fn bitor(self, rhs: SyncKind) -> SyncKind {
        SyncKind(self.0 | rhs.0)
    }
}

impl fmt::Display for SyncKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_in_sync() {
            return f.write_str("in sync");
        }
        let direction = match self.direction() {
            Self::OUTGOING => "outgoing",
            Self::INCOMING => "incoming",
            Self::CONFLICTING => "conflicting",
            _ => "unknown",
        };
        let change = match self.change() {
            Self::ADDITION => "addition",
            Self::DELETION => "deletion",
            Self::CHANGE => "change",
            _ => "unknown",
        };
        write!(f, "{} {}", direction, change)?;
        if self.is_pseudo_conflict() {
            f.write_str(" (identical content)")?;
        }
        Ok(())
    }
}

impl fmt::Debug for SyncKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SyncKind({:#04x}: {})", self.0, self)
    }
}

impl Serialize for SyncKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// Classify one resource from existence and change predicates
///
/// Callers without a baseline pass `outgoing = local` and
/// `incoming = remote`.
pub fn classify(remote: bool, local: bool, outgoing: bool, incoming: bool) -> SyncKind {
    use SyncKind as K;

    match (remote, local) {
        (false, false) => K::IN_SYNC,
        (false, true) => match (outgoing, incoming) {
            (false, true) => K::INCOMING | K::DELETION,
            (true, true) => K::CONFLICTING | K::CHANGE,
            (_, false) => K::OUTGOING | K::ADDITION,
        },
        (true, false) => match (outgoing, incoming) {
            (false, _) => K::INCOMING | K::ADDITION,
            (true, false) => K::OUTGOING | K::DELETION,
            (true, true) => K::CONFLICTING | K::CHANGE,
        },
        (true, true) => match (outgoing, incoming) {
            (false, false) => K::IN_SYNC,
            (false, true) => K::INCOMING | K::CHANGE,
            (true, false) => K::OUTGOING | K::CHANGE,
            (true, true) => K::CONFLICTING | K::CHANGE,
        },
    }
}

/// How closely [`TargetSyncElement::sync_kind`] looks at conflicts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Granularity {
    /// Baselines only
    #[default]
    Timestamp,
    /// Also compare contents of conflicting files byte for byte
    Contents,
}

/// Classifiable view of one resource and its members
#[derive(Debug, Clone)]
pub struct TargetSyncElement {
    state: ResourceState,
}

impl TargetSyncElement {
    pub fn new(state: ResourceState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &ResourceState {
        &self.state
    }

    pub fn sync_kind(&self, granularity: Granularity, progress: &Progress) -> TargetResult<SyncKind> {
        progress.check_canceled()?;
        let local = self.state.local_metadata()?;
        let remote = self.state.remote_entry()?;

        if let (Some(l), Some(r)) = (&local, &remote) {
            match (l.is_dir(), r.is_container()) {
                (true, true) => return Ok(SyncKind::IN_SYNC),
                (true, false) | (false, true) => {
                    return Ok(SyncKind::CONFLICTING | SyncKind::CHANGE)
                }
                (false, false) => {}
            }
        }

        let local_exists = local.is_some();
        let remote_exists = remote.is_some();
        let (outgoing, incoming) = if self.state.has_baseline() {
            (self.state.is_dirty()?, self.state.is_out_of_date()?)
        } else {
            (local_exists, remote_exists)
        };

        let kind = classify(remote_exists, local_exists, outgoing, incoming);
        if granularity == Granularity::Contents
            && kind == SyncKind::CONFLICTING | SyncKind::CHANGE
            && local_exists
            && remote_exists
            && self.contents_identical(progress)?
        {
            return Ok(kind | SyncKind::PSEUDO_CONFLICT);
        }
        Ok(kind)
    }

    /// Byte-for-byte comparison of both sides, after a size check
    pub fn contents_identical(&self, progress: &Progress) -> TargetResult<bool> {
        let local_size = self
            .state
            .local_metadata()?
            .map(|m| m.len())
            .unwrap_or_default();
        let remote_size = self.state.remote_entry()?.map(|e| e.size);
        if remote_size != Some(local_size) {
            return Ok(false);
        }

        let mut local = self.state.open_local()?;
        let mut remote = self.state.open_remote()?;
        transfer::same_content(&mut local, &mut remote, Some(progress)).map_err(|e| match e {
            TransferError::Canceled => TargetError::Canceled,
            TransferError::Io(e) => {
                TargetError::io(self.state.local(), BackendError::io("compare", e))
            }
        })
    }

    /// Elements for the union of local and remote members, sorted by name
    pub fn members(&self) -> TargetResult<Vec<TargetSyncElement>> {
        let mut names = self.state.local_children()?;
        for child in self.state.remote_children()? {
            names.push(child.entry.name.into());
        }
        names.sort();
        names.dedup();

        names
            .iter()
            .map(|name| Ok(TargetSyncElement::new(self.state.child(name)?)))
            .collect()
    }
}
