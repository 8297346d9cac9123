use super::*;
use proptest::prelude::*;

fn track(n: u32) -> Track {
    Track::from_path(format!("/tape/{n:02}.mp3"))
}

fn tracks(ns: &[u32]) -> Vec<Track> {
    ns.iter().copied().map(track).collect()
}

fn ids(ts: &[Track]) -> Vec<TrackId> {
    ts.iter().map(|t| t.id.clone()).collect()
}

fn reconcile(live: &[u32], desired: &[u32], playing: Option<u32>) -> (Vec<Track>, ReconcilePlan) {
    let mut queue = tracks(live);
    let desired = tracks(desired);
    let playing = playing.map(|n| track(n).id);
    let plan = plan(&ids(&queue), &ids(&desired), playing.as_ref());
    assert!(apply(&mut queue, &plan.ops, &desired));
    (queue, plan)
}

#[test]
fn reversing_the_order_keeps_every_track() {
    let (queue, plan) = reconcile(&[1, 2, 3], &[3, 2, 1], Some(2));
    assert_eq!(ids(&queue), ids(&tracks(&[3, 2, 1])));
    assert!(plan.kept_missing.is_none());
    assert!(plan.ops.iter().all(|op| matches!(op, QueueOp::Move { .. })));
}

#[test]
fn identical_order_is_a_noop() {
    let (_, plan) = reconcile(&[1, 2, 3], &[1, 2, 3], Some(1));
    assert!(plan.is_noop());
}

#[test]
fn vanished_playing_track_stays_at_the_tail() {
    let (queue, plan) = reconcile(&[1, 2, 3], &[3, 1], Some(2));
    assert_eq!(ids(&queue), ids(&tracks(&[3, 1, 2])));
    assert_eq!(plan.kept_missing, Some(track(2).id));
}

#[test]
fn vanished_idle_tracks_are_removed_and_new_ones_inserted() {
    let (queue, plan) = reconcile(&[1, 2, 3], &[4, 1, 3], Some(1));
    assert_eq!(ids(&queue), ids(&tracks(&[4, 1, 3])));
    assert!(plan.kept_missing.is_none());
    assert!(plan.ops.contains(&QueueOp::Remove { index: 1 }));
    assert!(plan.ops.contains(&QueueOp::Append { id: track(4).id }));
}

#[test]
fn duplicate_desired_ids_count_once() {
    let (queue, _) = reconcile(&[1, 2], &[2, 2, 1], None);
    assert_eq!(ids(&queue), ids(&tracks(&[2, 1])));
}

#[test]
fn apply_rejects_ops_that_do_not_fit() {
    let mut queue = tracks(&[1, 2]);
    let before = ids(&queue);
    let ops = [QueueOp::Move { from: 0, to: 1 }, QueueOp::Remove { index: 7 }];
    assert!(!apply(&mut queue, &ops, &[]));
    assert_eq!(ids(&queue), before);

    let ops = [QueueOp::Append { id: track(9).id }];
    assert!(!apply(&mut queue, &ops, &[]));
}

#[test]
fn matches_checks_the_prefix() {
    let queue = ids(&tracks(&[3, 1, 2]));
    assert!(matches(&queue, &ids(&tracks(&[3, 1]))));
    assert!(!matches(&queue, &ids(&tracks(&[1, 3]))));
    assert!(!matches(&queue[..1], &ids(&tracks(&[3, 1]))));
}

fn live_and_desired() -> impl Strategy<Value = (Vec<u32>, Vec<u32>, Option<usize>)> {
    (
        proptest::sample::subsequence((0u32..20).collect::<Vec<_>>(), 0..20).prop_shuffle(),
        proptest::sample::subsequence((0u32..20).collect::<Vec<_>>(), 0..20).prop_shuffle(),
        proptest::option::of(0usize..20),
    )
}

proptest! {
    #[test]
    fn reconciled_queue_starts_with_desired((live, desired, pick) in live_and_desired()) {
        let playing = pick.and_then(|i| live.get(i % live.len().max(1)).copied());
        let (queue, plan) = reconcile(&live, &desired, playing);
        let queue_ids = ids(&queue);
        let desired_ids = ids(&tracks(&desired));

        prop_assert!(matches(&queue_ids, &desired_ids));
        if let Some(p) = playing {
            prop_assert!(queue_ids.contains(&track(p).id));
        }
        match &plan.kept_missing {
            Some(id) => {
                prop_assert_eq!(queue_ids.len(), desired_ids.len() + 1);
                prop_assert_eq!(queue_ids.last(), Some(id));
            }
            None => prop_assert_eq!(queue_ids.len(), desired_ids.len()),
        }
    }

    #[test]
    fn reconciling_twice_changes_nothing((live, desired, pick) in live_and_desired()) {
        let playing = pick.and_then(|i| live.get(i % live.len().max(1)).copied());
        let (queue, _) = reconcile(&live, &desired, playing);
        let playing_id = playing.map(|n| track(n).id);
        let again = plan(&ids(&queue), &ids(&tracks(&desired)), playing_id.as_ref());
        prop_assert!(again.is_noop());
    }
}
