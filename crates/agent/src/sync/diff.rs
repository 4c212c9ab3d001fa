//! Snapshot diff
//!
//! Identity is the address alone: a port present in both snapshots is
//! unchanged even when its properties differ.

use crate::sync::snapshot::Snapshot;

/// Addresses that appeared and disappeared between two snapshots
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Compare `previous` against `current`
///
/// Finding the changed addresses is one pass over each side with hash
/// lookups into the other. Sorting the results adds `O(k log k)` in the
/// number of changed addresses, which keeps emission order stable across
/// runs.
pub fn diff(previous: &Snapshot, current: &Snapshot) -> SnapshotDiff {
    let mut added: Vec<String> = current
        .keys()
        .filter(|address| !previous.contains_key(*address))
        .cloned()
        .collect();
    let mut removed: Vec<String> = previous
        .keys()
        .filter(|address| !current.contains_key(*address))
        .cloned()
        .collect();

    added.sort_unstable();
    removed.sort_unstable();

    SnapshotDiff { added, removed }
}
