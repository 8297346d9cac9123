use super::*;
use crate::broadcast::StateBroadcast;
use crate::catalog::{AudioMetadata, TrackMetadata};
use crate::config::{EngineSettings, LibrarySettings};
use crate::engine::testing::ScriptedTransport;
use std::time::Duration;

struct Fixture {
    _dir: tempfile::TempDir,
    folder: PathBuf,
    store: Arc<TapeStore>,
    prefs: Arc<PreferenceStore>,
    coordinator: ResumptionCoordinator,
}

async fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let folder = dir.path().join("lesson1");
    std::fs::create_dir(&folder).unwrap();
    for name in ["A.mp3", "B.mp3", "C.mp3"] {
        std::fs::write(folder.join(name), b"").unwrap();
    }
    let store = Arc::new(TapeStore::in_memory().await.unwrap());
    let prefs = Arc::new(PreferenceStore::in_memory());
    let catalogs = Arc::new(CatalogBuilder::new(LibrarySettings::default()));
    let coordinator = ResumptionCoordinator::new(store.clone(), prefs.clone(), catalogs);
    Fixture {
        _dir: dir,
        folder,
        store,
        prefs,
        coordinator,
    }
}

fn bookmarked(folder: &Path, name: &str, position_ms: i64) -> Tape {
    Tape {
        current_track_name: name.to_string(),
        position_ms,
        ..Tape::empty(folder)
    }
}

fn engine() -> EngineHandle {
    let transport = ScriptedTransport::new();
    EngineHandle::spawn(
        move || Ok(transport),
        &EngineSettings::default(),
        Arc::new(StateBroadcast::new()),
    )
    .unwrap()
}

fn timed(name: &str, secs: u64) -> Track {
    let mut t = Track::from_path(format!("/lesson/{name}"));
    t.metadata = TrackMetadata::Audio(AudioMetadata {
        duration: Some(Duration::from_secs(secs)),
        ..Default::default()
    });
    t
}

#[test]
fn locate_finds_the_bookmark_and_clamps_past_the_end() {
    let catalog = Catalog::new("/lesson", SortOrder::NameAsc, vec![timed("A.mp3", 60), timed("B.mp3", 10)]);

    let tape = bookmarked(Path::new("/lesson"), "A.mp3", 15_000);
    assert_eq!(locate(&tape, &catalog), (0, 15_000, true));

    let tape = bookmarked(Path::new("/lesson"), "B.mp3", 15_000);
    assert_eq!(locate(&tape, &catalog), (1, 0, true));

    let tape = bookmarked(Path::new("/lesson"), "gone.mp3", 15_000);
    assert_eq!(locate(&tape, &catalog), (0, 0, false));

    assert_eq!(locate(&Tape::empty("/lesson"), &catalog), (0, 0, false));
}

#[tokio::test]
async fn cold_start_loads_the_bookmarked_track() {
    let f = fixture().await;
    f.store.upsert(&bookmarked(&f.folder, "B.mp3", 15_000)).await.unwrap();
    f.prefs.set_last_playing_folder(Some(&f.folder)).unwrap();
    let engine = engine();

    let resumption = f.coordinator.resume(&engine).await.unwrap();
    let Resumption::Load(plan) = resumption else {
        panic!("expected a load, got {resumption:?}");
    };
    assert_eq!(plan.start_index, 1);
    assert_eq!(plan.start_position_ms, 15_000);

    let status = engine.status();
    assert_eq!(status.queue.len(), 3);
    assert_eq!(status.index, 1);
    assert_eq!(status.position_ms, 15_000);
    assert!(!status.play_when_ready);

    // A second call finds the queue and leaves it alone.
    assert!(matches!(f.coordinator.resume(&engine).await.unwrap(), Resumption::Reattach));
    engine.release().await.unwrap();
}

#[tokio::test]
async fn missing_track_starts_at_the_first_one() {
    let f = fixture().await;
    f.store.upsert(&bookmarked(&f.folder, "Z.mp3", 15_000)).await.unwrap();
    f.prefs.set_last_playing_folder(Some(&f.folder)).unwrap();
    let engine = engine();

    let Resumption::Load(plan) = f.coordinator.resume(&engine).await.unwrap() else {
        panic!("expected a load");
    };
    assert!(!plan.track_found);
    assert_eq!(engine.status().index, 0);
    assert_eq!(engine.status().position_ms, 0);
    engine.release().await.unwrap();
}

#[tokio::test]
async fn idle_when_there_is_nothing_to_resume() {
    let f = fixture().await;
    let engine = engine();

    assert!(matches!(
        f.coordinator.resume(&engine).await.unwrap(),
        Resumption::Idle(IdleReason::NothingPersisted)
    ));

    f.prefs.set_last_playing_folder(Some(&f.folder)).unwrap();
    assert!(matches!(
        f.coordinator.resume(&engine).await.unwrap(),
        Resumption::Idle(IdleReason::InvalidTape)
    ));

    f.store.upsert(&bookmarked(&f.folder, "A.mp3", 0)).await.unwrap();
    std::fs::remove_dir_all(&f.folder).unwrap();
    assert!(matches!(
        f.coordinator.resume(&engine).await.unwrap(),
        Resumption::Idle(IdleReason::MissingFolder)
    ));
    assert!(!engine.status().has_queue());
    engine.release().await.unwrap();
}

#[tokio::test]
async fn external_resume_does_not_touch_the_engine() {
    let f = fixture().await;
    f.store.upsert(&bookmarked(&f.folder, "C.mp3", 2_000)).await.unwrap();
    f.prefs.set_last_playing_folder(Some(&f.folder)).unwrap();

    let bundle = f.coordinator.resume_last_session().await.unwrap().unwrap();
    assert_eq!(bundle.folder, f.folder);
    assert_eq!(bundle.tracks.len(), 3);
    assert_eq!(bundle.start_index, 2);
    assert_eq!(bundle.start_position_ms, 2_000);

    f.prefs.set_last_playing_folder(None).unwrap();
    assert!(f.coordinator.resume_last_session().await.unwrap().is_none());
}
