use crate::broadcast::{ChangedField, SnapshotUpdate};
use crate::engine::EngineHandle;
use crate::mpris::MprisHandle;

/// Push a snapshot update to MPRIS. Track metadata is only looked up when
/// the current track changed.
pub fn update_mpris(mpris: &MprisHandle, engine: &EngineHandle, update: &SnapshotUpdate) {
    if update.changed.contains(ChangedField::Track) {
        let track = engine.status().current_track().cloned();
        mpris.update(&update.snapshot, track.as_ref());
    } else {
        mpris.set_playback(crate::mpris::PlaybackStatus::from_snapshot(&update.snapshot));
        mpris.set_position_ms(update.snapshot.position_ms);
    }
}
