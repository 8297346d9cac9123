use super::*;
use std::sync::atomic::AtomicI64;
use std::time::Duration;

struct CountingSource {
    position: AtomicI64,
    calls: AtomicUsize,
}

impl CountingSource {
    fn new(position: i64) -> Arc<Self> {
        Arc::new(Self {
            position: AtomicI64::new(position),
            calls: AtomicUsize::new(0),
        })
    }
}

impl PositionSource for CountingSource {
    fn position_ms(&self) -> Option<i64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Some(self.position.load(Ordering::SeqCst))
    }
}

fn playing_snapshot() -> PlaybackSnapshot {
    PlaybackSnapshot {
        is_engine_ready: true,
        is_playing: true,
        current_track_id: Some(TrackId::from_path(std::path::Path::new("/m/a.mp3"))),
        position_ms: 0,
        duration_ms: 60_000,
        folder: Some("/m".into()),
        track_name: Some("a.mp3".into()),
        unavailable: false,
    }
}

#[test]
fn diff_reports_each_group() {
    let a = playing_snapshot();
    assert!(a.diff(&a).is_empty());

    let mut b = a.clone();
    b.position_ms = 1_000;
    let changed = a.diff(&b);
    assert!(changed.contains(ChangedField::Position));
    assert_eq!(changed.iter().count(), 1);

    b.is_playing = false;
    b.track_name = Some("b.mp3".into());
    let changed = a.diff(&b);
    assert!(changed.contains(ChangedField::Playback));
    assert!(changed.contains(ChangedField::Track));
    assert!(!changed.contains(ChangedField::Ready));
}

#[test]
fn update_without_change_publishes_nothing() {
    let broadcast = StateBroadcast::new();
    let rx = broadcast.watch();

    assert!(broadcast.update(|_| {}).is_empty());
    assert!(!rx.has_changed().unwrap());

    let changed = broadcast.update(|s| s.position_ms = 5);
    assert!(changed.contains(ChangedField::Position));
    assert!(rx.has_changed().unwrap());
    assert_eq!(broadcast.latest().position_ms, 5);
}

#[tokio::test]
async fn subscribers_get_latest_first_then_coalesced_diffs() {
    let broadcast = StateBroadcast::new();
    broadcast.publish(playing_snapshot());

    let mut sub = broadcast.subscribe();
    let first = sub.next().await.unwrap();
    assert_eq!(first.snapshot, playing_snapshot());
    assert_eq!(first.changed, ChangedFields::all());

    // Two publishes before the subscriber looks: it sees both groups.
    broadcast.update(|s| s.track_name = Some("b.mp3".into()));
    broadcast.update(|s| s.position_ms = 2_000);
    let next = sub.next().await.unwrap();
    assert!(next.changed.contains(ChangedField::Track));
    assert!(next.changed.contains(ChangedField::Position));
    assert!(!next.changed.contains(ChangedField::Playback));
    assert_eq!(next.snapshot.position_ms, 2_000);
}

#[test]
fn attachment_count_follows_subscriptions() {
    let broadcast = StateBroadcast::new();
    let a = broadcast.subscribe();
    let b = broadcast.subscribe();
    let _untracked = broadcast.watch();
    assert_eq!(broadcast.attached_count(), 2);
    drop(a);
    assert_eq!(broadcast.attached_count(), 1);
    drop(b);
    assert_eq!(broadcast.attached_count(), 0);
}

#[test]
fn unavailable_clears_readiness() {
    let broadcast = StateBroadcast::new();
    broadcast.publish(playing_snapshot());
    broadcast.mark_unavailable();
    let s = broadcast.latest();
    assert!(s.unavailable);
    assert!(!s.is_playing);
    assert!(!s.is_engine_ready);
}

#[tokio::test(start_paused = true)]
async fn poller_refreshes_position_while_attached_and_playing() {
    let broadcast = Arc::new(StateBroadcast::new());
    broadcast.publish(playing_snapshot());
    let source = CountingSource::new(4_000);
    let poller = PositionPoller::new(broadcast.clone(), source.clone(), Duration::from_millis(1_000));

    // Nobody attached: nothing to do.
    poller.ensure_running();
    assert!(!poller.is_running());

    let sub = broadcast.subscribe();
    poller.ensure_running();
    assert!(poller.is_running());

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(broadcast.latest().position_ms, 4_000);

    drop(sub);
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert!(!poller.is_running());
}

#[tokio::test(start_paused = true)]
async fn poller_never_runs_twice() {
    let broadcast = Arc::new(StateBroadcast::new());
    broadcast.publish(playing_snapshot());
    let source = CountingSource::new(1);
    let poller = PositionPoller::new(broadcast.clone(), source.clone(), Duration::from_millis(1_000));

    let _sub = broadcast.subscribe();
    for _ in 0..5 {
        poller.ensure_running();
    }
    tokio::time::sleep(Duration::from_millis(3_500)).await;

    let calls = source.calls.load(Ordering::SeqCst);
    assert!((3..=4).contains(&calls), "calls = {calls}");
    poller.stop();
}

#[tokio::test(start_paused = true)]
async fn poller_stops_when_playback_stops() {
    let broadcast = Arc::new(StateBroadcast::new());
    broadcast.publish(playing_snapshot());
    let source = CountingSource::new(1);
    let poller = PositionPoller::new(broadcast.clone(), source, Duration::from_millis(1_000));
    let supervisor = poller.clone().supervise();

    let _sub = broadcast.subscribe();
    poller.ensure_running();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(poller.is_running());

    broadcast.update(|s| s.is_playing = false);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!poller.is_running());

    broadcast.update(|s| s.is_playing = true);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(poller.is_running());

    supervisor.abort();
    poller.stop();
}
