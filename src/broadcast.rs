//! Live playback snapshots, multicast with replay-latest semantics.
//!
//! The engine thread and the position poller write into a single
//! `tokio::sync::watch` channel. Each subscriber diffs what it receives
//! against what it saw last, so coalesced updates still report every field
//! group that moved in between.

mod poller;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Notify, watch};

use crate::catalog::TrackId;

pub use poller::{PositionPoller, PositionSource};

/// Independent groups of snapshot fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangedField {
    /// Engine readiness and availability.
    Ready,
    /// Playing vs not playing.
    Playback,
    Position,
    /// Track identity, folder and duration.
    Track,
}

impl ChangedField {
    const ALL: [ChangedField; 4] = [
        ChangedField::Ready,
        ChangedField::Playback,
        ChangedField::Position,
        ChangedField::Track,
    ];

    fn bit(self) -> u8 {
        match self {
            ChangedField::Ready => 1,
            ChangedField::Playback => 1 << 1,
            ChangedField::Position => 1 << 2,
            ChangedField::Track => 1 << 3,
        }
    }
}

/// Set of `ChangedField`s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangedFields(u8);

impl ChangedFields {
    pub const NONE: ChangedFields = ChangedFields(0);

    pub fn all() -> Self {
        ChangedField::ALL.into_iter().collect()
    }

    pub fn insert(&mut self, field: ChangedField) {
        self.0 |= field.bit();
    }

    pub fn contains(self, field: ChangedField) -> bool {
        self.0 & field.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = ChangedField> {
        ChangedField::ALL.into_iter().filter(move |f| self.contains(*f))
    }
}

impl FromIterator<ChangedField> for ChangedFields {
    fn from_iter<I: IntoIterator<Item = ChangedField>>(iter: I) -> Self {
        let mut set = ChangedFields::NONE;
        for f in iter {
            set.insert(f);
        }
        set
    }
}

/// Immutable view of the playback state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackSnapshot {
    pub is_engine_ready: bool,
    pub is_playing: bool,
    pub current_track_id: Option<TrackId>,
    pub position_ms: i64,
    pub duration_ms: i64,
    /// Folder of the loaded queue.
    pub folder: Option<PathBuf>,
    /// File name of the current track, as bookmarked by a tape.
    pub track_name: Option<String>,
    /// The engine could not be reached; transports should show as disabled.
    pub unavailable: bool,
}

impl PlaybackSnapshot {
    /// Field groups that differ between `self` and `next`.
    pub fn diff(&self, next: &PlaybackSnapshot) -> ChangedFields {
        let mut changed = ChangedFields::NONE;
        if self.is_engine_ready != next.is_engine_ready || self.unavailable != next.unavailable {
            changed.insert(ChangedField::Ready);
        }
        if self.is_playing != next.is_playing {
            changed.insert(ChangedField::Playback);
        }
        if self.position_ms != next.position_ms {
            changed.insert(ChangedField::Position);
        }
        if self.current_track_id != next.current_track_id
            || self.folder != next.folder
            || self.track_name != next.track_name
            || self.duration_ms != next.duration_ms
        {
            changed.insert(ChangedField::Track);
        }
        changed
    }
}

#[derive(Debug, Clone, Default)]
pub struct SnapshotUpdate {
    pub snapshot: PlaybackSnapshot,
    /// Groups that changed since the previous value the receiver saw.
    pub changed: ChangedFields,
    /// Number of published changes so far.
    pub seq: u64,
}

#[derive(Default)]
struct Attached {
    count: AtomicUsize,
    detached: Notify,
}

pub struct StateBroadcast {
    tx: watch::Sender<SnapshotUpdate>,
    attached: Arc<Attached>,
}

impl Default for StateBroadcast {
    fn default() -> Self {
        Self::new()
    }
}

impl StateBroadcast {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SnapshotUpdate::default());
        Self {
            tx,
            attached: Arc::new(Attached::default()),
        }
    }

    pub fn latest(&self) -> PlaybackSnapshot {
        self.tx.borrow().snapshot.clone()
    }

    /// Mutate the snapshot in place. Publishes only if some field group
    /// actually changed, and returns that set.
    pub fn update(&self, f: impl FnOnce(&mut PlaybackSnapshot)) -> ChangedFields {
        let mut changed = ChangedFields::NONE;
        self.tx.send_if_modified(|update| {
            let before = update.snapshot.clone();
            f(&mut update.snapshot);
            changed = before.diff(&update.snapshot);
            if changed.is_empty() {
                return false;
            }
            update.changed = changed;
            update.seq += 1;
            true
        });
        changed
    }

    /// Replace the whole snapshot.
    pub fn publish(&self, snapshot: PlaybackSnapshot) -> ChangedFields {
        self.update(|s| *s = snapshot)
    }

    pub fn mark_unavailable(&self) {
        self.update(|s| {
            s.unavailable = true;
            s.is_engine_ready = false;
            s.is_playing = false;
        });
    }

    /// Attach a consumer. The latest value is delivered first.
    pub fn subscribe(&self) -> Subscription {
        self.attached.count.fetch_add(1, Ordering::SeqCst);
        Subscription {
            rx: self.tx.subscribe(),
            last: None,
            attached: self.attached.clone(),
        }
    }

    /// Raw receiver for internal consumers; not counted as an attachment.
    pub fn watch(&self) -> watch::Receiver<SnapshotUpdate> {
        self.tx.subscribe()
    }

    /// Number of live `Subscription`s.
    pub fn attached_count(&self) -> usize {
        self.attached.count.load(Ordering::SeqCst)
    }

    /// Resolves when the attachment count drops to zero.
    pub(crate) async fn all_detached(&self) {
        let notified = self.attached.detached.notified();
        if self.attached_count() == 0 {
            return;
        }
        notified.await;
    }
}

/// One attached consumer of snapshots.
pub struct Subscription {
    rx: watch::Receiver<SnapshotUpdate>,
    last: Option<PlaybackSnapshot>,
    attached: Arc<Attached>,
}

impl Subscription {
    /// Next snapshot. The first call returns the current value immediately.
    /// `None` once the broadcast is gone.
    pub async fn next(&mut self) -> Option<SnapshotUpdate> {
        if self.last.is_some() {
            self.rx.changed().await.ok()?;
        }
        let current = self.rx.borrow_and_update().clone();
        let changed = match &self.last {
            Some(prev) => prev.diff(&current.snapshot),
            None => ChangedFields::all(),
        };
        self.last = Some(current.snapshot.clone());
        Some(SnapshotUpdate { changed, ..current })
    }

    pub fn latest(&self) -> PlaybackSnapshot {
        self.rx.borrow().snapshot.clone()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.attached.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.attached.detached.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests;
