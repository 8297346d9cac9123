//! Bring a live engine queue into a new desired order with minimal edits.
//!
//! Plans are computed over track ids and applied to a copy of the queue, so
//! a caller swaps in the result all at once or not at all. The track that is
//! currently playing is never removed, even if it vanished from the desired
//! list; it stays at the tail and is reported back as missing.

use std::collections::HashSet;

use crate::catalog::{Track, TrackId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueOp {
    Remove { index: usize },
    Append { id: TrackId },
    Move { from: usize, to: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub ops: Vec<QueueOp>,
    /// The playing track, kept although it is no longer desired.
    pub kept_missing: Option<TrackId>,
}

impl ReconcilePlan {
    pub fn is_noop(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Drop repeated ids, keeping the first occurrence.
fn dedup(ids: &[TrackId]) -> Vec<TrackId> {
    let mut seen = HashSet::new();
    ids.iter().filter(|id| seen.insert((*id).clone())).cloned().collect()
}

fn move_item<T>(queue: &mut Vec<T>, from: usize, to: usize) {
    let item = queue.remove(from);
    queue.insert(to, item);
}

/// Ops that turn `live` into `desired`, preserving `playing`.
pub fn plan(live: &[TrackId], desired: &[TrackId], playing: Option<&TrackId>) -> ReconcilePlan {
    let desired = dedup(desired);
    let wanted: HashSet<&TrackId> = desired.iter().collect();
    let mut queue = live.to_vec();
    let mut ops = Vec::new();

    // Highest index first so earlier indices stay valid.
    for index in (0..queue.len()).rev() {
        let id = &queue[index];
        if !wanted.contains(id) && Some(id) != playing {
            ops.push(QueueOp::Remove { index });
            queue.remove(index);
        }
    }

    for (target, id) in desired.iter().enumerate() {
        match queue.iter().position(|q| q == id) {
            Some(from) if from == target => {}
            Some(from) => {
                ops.push(QueueOp::Move { from, to: target });
                move_item(&mut queue, from, target);
            }
            None => {
                ops.push(QueueOp::Append { id: id.clone() });
                queue.push(id.clone());
                let from = queue.len() - 1;
                if from != target {
                    ops.push(QueueOp::Move { from, to: target });
                    move_item(&mut queue, from, target);
                }
            }
        }
    }

    let kept_missing = playing
        .filter(|p| !wanted.contains(p) && live.contains(p))
        .cloned();
    ReconcilePlan { ops, kept_missing }
}

/// Apply `ops` to `queue`. Appended ids are looked up in `incoming`.
/// Returns `false`, leaving `queue` untouched, if any op does not fit.
pub fn apply(queue: &mut Vec<Track>, ops: &[QueueOp], incoming: &[Track]) -> bool {
    let mut next = queue.clone();
    for op in ops {
        match op {
            QueueOp::Remove { index } if *index < next.len() => {
                next.remove(*index);
            }
            QueueOp::Append { id } => match incoming.iter().find(|t| &t.id == id) {
                Some(track) => next.push(track.clone()),
                None => return false,
            },
            QueueOp::Move { from, to } if *from < next.len() && *to < next.len() => {
                move_item(&mut next, *from, *to);
            }
            _ => return false,
        }
    }
    *queue = next;
    true
}

/// Whether `queue` starts with exactly `desired`, in order.
pub fn matches(queue: &[TrackId], desired: &[TrackId]) -> bool {
    let desired = dedup(desired);
    queue.len() >= desired.len() && queue[..desired.len()] == desired[..]
}

#[cfg(test)]
mod tests;
