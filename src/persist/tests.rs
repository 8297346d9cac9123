use super::*;
use crate::broadcast::StateBroadcast;
use crate::catalog::Track;
use crate::config::EngineSettings;
use crate::engine::EngineHandle;
use crate::engine::testing::ScriptedTransport;
use crate::tape::Tape;
use std::path::Path;
use std::time::Duration;

fn checkpoint(name: &str, position_ms: i64) -> EngineEvent {
    EngineEvent::Checkpoint(Checkpoint {
        folder: "/lesson".into(),
        track_name: name.to_string(),
        position_ms,
    })
}

/// Flush until the stored tape satisfies `done`, or give up.
async fn wait_for(writer: &PersistenceWriter, store: &TapeStore, done: impl Fn(&Tape) -> bool) -> Option<Tape> {
    for _ in 0..100 {
        writer.flush().await;
        let tape = store.get(Path::new("/lesson")).await.unwrap();
        if done(&tape) {
            return Some(tape);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    None
}

#[test]
fn bookmark_needs_folder_and_track() {
    let mut status = EngineStatus::default();
    assert!(Bookmark::from_status(&status).is_none());

    status.queue = vec![Track::from_path("/lesson/A.mp3")];
    assert!(Bookmark::from_status(&status).is_none());

    status.folder = Some("/lesson".into());
    status.position_ms = -3;
    let b = Bookmark::from_status(&status).unwrap();
    assert_eq!(b.track_name, "A.mp3");
    assert_eq!(b.position_ms, 0);
}

#[tokio::test]
async fn save_then_flush_reaches_the_store() {
    let store = Arc::new(TapeStore::in_memory().await.unwrap());
    let (writer, _task) = PersistenceWriter::spawn(store.clone());
    writer.save(Bookmark {
        folder: "/lesson".into(),
        track_name: "C.mp3".into(),
        position_ms: 42_000,
    });
    assert_eq!(writer.flush().await, 0);

    let tape = store.get(Path::new("/lesson")).await.unwrap();
    assert_eq!(tape.current_track_name, "C.mp3");
    assert_eq!(tape.position_ms, 42_000);
}

#[tokio::test]
async fn checkpoints_sent_before_the_task_runs_are_written() {
    let store = Arc::new(TapeStore::in_memory().await.unwrap());
    let (events, rx) = broadcast::channel(16);
    let (writer, _task) = PersistenceWriter::spawn(store.clone());
    writer.follow(rx);
    // Nothing has been polled yet.
    events.send(checkpoint("A.mp3", 2_500)).unwrap();

    assert_eq!(writer.flush().await, 0);
    let tape = store.get(Path::new("/lesson")).await.unwrap();
    assert_eq!(tape.current_track_name, "A.mp3");
    assert_eq!(tape.position_ms, 2_500);
}

#[tokio::test]
async fn buffered_checkpoints_are_written_before_an_explicit_save() {
    let store = Arc::new(TapeStore::in_memory().await.unwrap());
    let (events, rx) = broadcast::channel(16);
    let (writer, _task) = PersistenceWriter::spawn(store.clone());
    writer.follow(rx);
    events.send(EngineEvent::QueueChanged { len: 3 }).unwrap();
    events.send(checkpoint("B.mp3", 0)).unwrap();
    writer.save(Bookmark {
        folder: "/lesson".into(),
        track_name: "B.mp3".into(),
        position_ms: 9_000,
    });

    assert_eq!(writer.flush().await, 0);
    let tape = store.get(Path::new("/lesson")).await.unwrap();
    assert_eq!(tape.current_track_name, "B.mp3");
    assert_eq!(tape.position_ms, 9_000);
}

#[tokio::test]
async fn a_pause_is_written_even_when_playback_resumes_at_once() {
    let store = Arc::new(TapeStore::in_memory().await.unwrap());
    let transport = ScriptedTransport::new();
    let engine_transport = transport.clone();
    let settings = EngineSettings {
        tick_ms: 10,
        ..EngineSettings::default()
    };
    let engine = EngineHandle::spawn(
        move || Ok(engine_transport),
        &settings,
        Arc::new(StateBroadcast::new()),
    )
    .unwrap();
    let (writer, _task) = PersistenceWriter::spawn(store.clone());
    writer.follow(engine.subscribe_events());

    let tracks = ["A.mp3", "B.mp3"]
        .iter()
        .map(|n| Track::from_path(format!("/lesson/{n}")))
        .collect();
    engine
        .load_queue(Some("/lesson".into()), tracks, 0, 0, true)
        .unwrap();
    engine.sync().await.unwrap();

    transport.set_position(Duration::from_millis(7_000));
    engine.pause().unwrap();
    engine.play().unwrap();
    engine.sync().await.unwrap();
    transport.set_position(Duration::from_millis(8_000));

    let tape = wait_for(&writer, &store, |t| t.position_ms == 7_000).await;
    let tape = tape.expect("pause was never persisted");
    assert_eq!(tape.current_track_name, "A.mp3");
    engine.release().await.unwrap();
}

#[tokio::test]
async fn track_changes_are_written_at_the_new_track() {
    let store = Arc::new(TapeStore::in_memory().await.unwrap());
    let transport = ScriptedTransport::new();
    let engine = EngineHandle::spawn(
        move || Ok(transport),
        &EngineSettings::default(),
        Arc::new(StateBroadcast::new()),
    )
    .unwrap();
    let (writer, _task) = PersistenceWriter::spawn(store.clone());
    writer.follow(engine.subscribe_events());

    let tracks = ["A.mp3", "B.mp3"]
        .iter()
        .map(|n| Track::from_path(format!("/lesson/{n}")))
        .collect();
    engine
        .load_queue(Some("/lesson".into()), tracks, 0, 4_000, true)
        .unwrap();
    engine.next().unwrap();
    engine.sync().await.unwrap();

    let tape = wait_for(&writer, &store, |t| t.current_track_name == "B.mp3").await;
    assert_eq!(tape.expect("track change was never persisted").position_ms, 0);
    engine.release().await.unwrap();
}
