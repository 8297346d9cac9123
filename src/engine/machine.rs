//! The engine state machine, independent of threads and audio devices.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::broadcast::PlaybackSnapshot;
use crate::catalog::{Track, TrackId};
use crate::error::{Error, Result};
use crate::reconcile;
use crate::tape::{PITCH_RANGE, SPEED_RANGE, VOLUME_RANGE, clamp_to};

use super::transport::Transport;
use super::types::{Checkpoint, EngineEvent, EngineState, EngineStatus, ReconcileOutcome};

pub struct Engine<T: Transport> {
    transport: T,
    queue: Vec<Track>,
    index: usize,
    state: EngineState,
    play_when_ready: bool,
    /// Where the current item starts once prepared.
    start_position: Duration,
    media_open: bool,
    folder: Option<PathBuf>,
    /// Queue entries that left the folder while they were playing.
    missing: HashSet<TrackId>,
    repeat: bool,
    speed: f32,
    pitch: f32,
    volume: f32,
    restart_threshold: Duration,
    events: Vec<EngineEvent>,
}

impl<T: Transport> Engine<T> {
    pub fn new(transport: T, restart_threshold: Duration) -> Self {
        Self {
            transport,
            queue: Vec::new(),
            index: 0,
            state: EngineState::Idle,
            play_when_ready: false,
            start_position: Duration::ZERO,
            media_open: false,
            folder: None,
            missing: HashSet::new(),
            repeat: false,
            speed: 1.0,
            pitch: 1.0,
            volume: 1.0,
            restart_threshold,
            events: Vec::new(),
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn play_when_ready(&self) -> bool {
        self.play_when_ready
    }

    pub fn set_play_when_ready(&mut self, play: bool) {
        self.play_when_ready = play;
    }

    pub fn queue(&self) -> &[Track] {
        &self.queue
    }

    pub fn queue_size(&self) -> usize {
        self.queue.len()
    }

    pub fn track_at(&self, index: usize) -> Option<&Track> {
        self.queue.get(index)
    }

    pub fn current_index(&self) -> usize {
        self.index
    }

    pub fn current_track(&self) -> Option<&Track> {
        self.queue.get(self.index)
    }

    pub fn folder(&self) -> Option<&PathBuf> {
        self.folder.as_ref()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn set_state(&mut self, state: EngineState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "engine state");
            self.state = state;
            self.events.push(EngineEvent::StateChanged(state));
            if state == EngineState::Paused {
                self.checkpoint(self.position_ms());
            }
        }
    }

    fn checkpoint(&mut self, position_ms: i64) {
        let (Some(folder), Some(track)) = (self.folder.clone(), self.queue.get(self.index)) else {
            return;
        };
        let checkpoint = Checkpoint {
            folder,
            track_name: track.name.clone(),
            position_ms: position_ms.max(0),
        };
        self.events.push(EngineEvent::Checkpoint(checkpoint));
    }

    /// Events produced since the last call.
    pub fn drain_events(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.events)
    }

    fn track_changed(&mut self) {
        if let Some(track) = self.queue.get(self.index) {
            self.events.push(EngineEvent::TrackChanged {
                index: self.index,
                id: track.id.clone(),
            });
            self.checkpoint(self.start_position.as_millis() as i64);
        }
    }

    /// Replace the queue and point at `start_index`, unprepared.
    /// An empty list leaves the engine as it was.
    pub fn load_queue(
        &mut self,
        folder: Option<PathBuf>,
        tracks: Vec<Track>,
        start_index: usize,
        start_position_ms: i64,
    ) -> bool {
        if tracks.is_empty() {
            debug!("ignoring empty queue");
            return false;
        }
        self.transport.stop();
        self.media_open = false;
        self.index = start_index.min(tracks.len() - 1);
        self.queue = tracks;
        self.folder = folder;
        self.missing.clear();
        self.start_position = Duration::from_millis(start_position_ms.max(0) as u64);
        self.set_state(EngineState::Idle);
        info!(len = self.queue.len(), index = self.index, "queue loaded");
        self.events.push(EngineEvent::QueueChanged {
            len: self.queue.len(),
        });
        self.track_changed();
        true
    }

    /// Open the current item at the pending start position. No-op unless idle.
    pub fn prepare(&mut self) {
        if self.state != EngineState::Idle || self.queue.is_empty() {
            return;
        }
        self.open_current();
    }

    fn open_current(&mut self) -> bool {
        let Some(track) = self.queue.get(self.index).cloned() else {
            return false;
        };
        self.set_state(EngineState::Buffering);
        match self.transport.open(&track, self.start_position) {
            Ok(()) => {
                self.media_open = true;
                self.transport.set_rate(self.speed, self.pitch);
                self.transport.set_volume(self.volume);
                if self.play_when_ready {
                    self.transport.play();
                    self.set_state(EngineState::Playing);
                } else {
                    self.set_state(EngineState::Ready);
                }
                true
            }
            Err(err) => {
                warn!(track = %track.name, %err, "cannot open track");
                self.media_open = false;
                self.play_when_ready = false;
                self.events.push(EngineEvent::Error {
                    track_id: track.id.clone(),
                    message: err.to_string(),
                });
                self.set_state(EngineState::Idle);
                false
            }
        }
    }

    pub fn play(&mut self) {
        match self.state {
            EngineState::Ended | EngineState::Playing => {}
            EngineState::Idle => {
                self.play_when_ready = true;
                self.prepare();
            }
            EngineState::Ready | EngineState::Paused => {
                self.play_when_ready = true;
                self.transport.play();
                self.set_state(EngineState::Playing);
            }
            EngineState::Buffering => self.play_when_ready = true,
        }
    }

    pub fn pause(&mut self) {
        self.play_when_ready = false;
        match self.state {
            EngineState::Playing | EngineState::Buffering if self.media_open => {
                self.transport.pause();
                self.set_state(EngineState::Paused);
            }
            _ => {}
        }
    }

    pub fn toggle_pause(&mut self) {
        if self.play_when_ready {
            self.pause();
        } else {
            self.play();
        }
    }

    pub fn position_ms(&self) -> i64 {
        if self.media_open {
            self.transport.position().as_millis() as i64
        } else {
            self.start_position.as_millis() as i64
        }
    }

    pub fn duration_ms(&self) -> Option<i64> {
        let media = if self.media_open {
            self.transport.duration()
        } else {
            None
        };
        media
            .map(|d| d.as_millis() as i64)
            .or_else(|| self.current_track().and_then(Track::duration_ms))
    }

    /// Seek within the current item. Rejects negative targets and targets
    /// past a known duration, leaving the position unchanged.
    pub fn seek_to(&mut self, position_ms: i64) -> Result<()> {
        if position_ms < 0 || self.duration_ms().is_some_and(|d| position_ms > d) {
            warn!(position_ms, "rejected seek");
            return Err(Error::InvalidSeek(position_ms));
        }
        if self.state == EngineState::Ended || self.queue.is_empty() {
            return Ok(());
        }
        let to = Duration::from_millis(position_ms as u64);
        if !self.media_open {
            self.start_position = to;
            return Ok(());
        }
        if let Err(err) = self.transport.seek(to) {
            let track_id = self.current_track().map(|t| t.id.clone());
            warn!(%err, "seek failed");
            if let Some(track_id) = track_id {
                self.events.push(EngineEvent::Error {
                    track_id: track_id.clone(),
                    message: err.to_string(),
                });
                return Err(Error::TransportError {
                    track_id,
                    message: err.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Seek relative to the current position, clamped to the item.
    pub fn seek_by(&mut self, delta_ms: i64) -> Result<()> {
        let mut target = (self.position_ms() + delta_ms).max(0);
        if let Some(d) = self.duration_ms() {
            target = target.min(d);
        }
        self.seek_to(target)
    }

    /// Move to `index` and start it from the beginning.
    fn change_track(&mut self, index: usize) {
        let current = self.current_track().map(|t| t.id.clone());
        self.index = index;
        self.start_position = Duration::ZERO;
        self.prune_missing(current.as_ref());
        self.track_changed();
        self.media_open = false;
        self.open_current();
    }

    /// Next item, wrapping from the last back to the first.
    pub fn next(&mut self) {
        if self.queue.is_empty() || self.state == EngineState::Ended {
            return;
        }
        self.change_track((self.index + 1) % self.queue.len());
    }

    /// Restart the current item once past the threshold, else go back one
    /// (wrapping from the first to the last).
    pub fn previous(&mut self) {
        if self.queue.is_empty() || self.state == EngineState::Ended {
            return;
        }
        if self.position_ms() > self.restart_threshold.as_millis() as i64 {
            let _ = self.seek_to(0);
            return;
        }
        let target = if self.index == 0 {
            self.queue.len() - 1
        } else {
            self.index - 1
        };
        self.change_track(target);
    }

    pub fn set_speed(&mut self, speed: f32) {
        self.speed = clamp_to(speed, &SPEED_RANGE, self.speed);
        self.transport.set_rate(self.speed, self.pitch);
    }

    pub fn set_pitch(&mut self, pitch: f32) {
        self.pitch = clamp_to(pitch, &PITCH_RANGE, self.pitch);
        self.transport.set_rate(self.speed, self.pitch);
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = clamp_to(volume, &VOLUME_RANGE, self.volume);
        self.transport.set_volume(self.volume);
    }

    pub fn set_repeat(&mut self, repeat: bool) {
        self.repeat = repeat;
    }

    /// Periodic check for stalls and the end of the current item.
    pub fn tick(&mut self) {
        match self.state {
            EngineState::Playing if self.transport.is_finished() => self.on_item_finished(),
            EngineState::Playing if self.transport.is_stalled() => {
                self.set_state(EngineState::Buffering);
            }
            EngineState::Buffering
                if self.media_open && self.play_when_ready && !self.transport.is_stalled() =>
            {
                self.set_state(EngineState::Playing);
            }
            _ => {}
        }
    }

    fn on_item_finished(&mut self) {
        if self.index + 1 < self.queue.len() {
            self.change_track(self.index + 1);
        } else if self.repeat {
            self.change_track(0);
        } else {
            info!("end of queue");
            self.play_when_ready = false;
            self.set_state(EngineState::Ended);
            self.events.push(EngineEvent::Ended);
        }
    }

    /// Drop entries that were kept only because they were playing.
    fn prune_missing(&mut self, leaving: Option<&TrackId>) {
        let Some(leaving) = leaving else { return };
        if !self.missing.remove(leaving) {
            return;
        }
        let Some(pos) = self.queue.iter().position(|t| &t.id == leaving) else {
            return;
        };
        let target = self.queue.get(self.index).map(|t| t.id.clone());
        self.queue.remove(pos);
        self.index = target
            .and_then(|id| self.queue.iter().position(|t| t.id == id))
            .unwrap_or(0);
        debug!(id = %leaving, "pruned missing entry");
        self.events.push(EngineEvent::QueueChanged {
            len: self.queue.len(),
        });
    }

    /// Bring the queue into the order of `desired` without interrupting the
    /// current item.
    /// A request made for a folder that is no longer loaded is refused as
    /// stale and leaves the queue untouched.
    pub fn reconcile(&mut self, folder: &Path, desired: &[Track], generation: u64) -> Result<ReconcileOutcome> {
        if self.folder.as_deref() != Some(folder) {
            debug!(generation, folder = %folder.display(), "reconciliation for a folder that is not loaded");
            return Err(Error::StaleSort(generation));
        }
        if self.queue.is_empty() {
            return Ok(ReconcileOutcome {
                generation,
                ..Default::default()
            });
        }
        let live: Vec<TrackId> = self.queue.iter().map(|t| t.id.clone()).collect();
        let wanted: Vec<TrackId> = desired.iter().map(|t| t.id.clone()).collect();
        let playing = self.current_track().map(|t| t.id.clone());

        let plan = reconcile::plan(&live, &wanted, playing.as_ref());
        let mut next = self.queue.clone();
        if !reconcile::apply(&mut next, &plan.ops, desired) {
            warn!(generation, "reconcile plan did not apply");
            return Ok(ReconcileOutcome {
                generation,
                ..Default::default()
            });
        }
        let next_ids: Vec<TrackId> = next.iter().map(|t| t.id.clone()).collect();
        if !reconcile::matches(&next_ids, &wanted) {
            warn!(generation, "reconciled queue out of order");
        }

        self.queue = next;
        if let Some(id) = &playing {
            self.index = self.queue.iter().position(|t| &t.id == id).unwrap_or(0);
        }
        for id in &wanted {
            self.missing.remove(id);
        }
        let kept_missing = plan.kept_missing.as_ref().and_then(|id| {
            self.missing.insert(id.clone());
            self.queue.iter().find(|t| &t.id == id).cloned()
        });
        if !plan.is_noop() {
            debug!(generation, ops = plan.ops.len(), "queue reconciled");
            self.events.push(EngineEvent::QueueChanged {
                len: self.queue.len(),
            });
        }
        Ok(ReconcileOutcome {
            generation,
            ops: plan.ops.len(),
            kept_missing,
        })
    }

    /// Stop the transport; the queue is dropped.
    pub fn release(&mut self) {
        self.transport.stop();
        self.media_open = false;
        self.play_when_ready = false;
        self.queue.clear();
        self.index = 0;
        self.set_state(EngineState::Idle);
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            state: self.state,
            play_when_ready: self.play_when_ready,
            folder: self.folder.clone(),
            queue: self.queue.clone(),
            index: self.index,
            position_ms: self.position_ms(),
            duration_ms: self.duration_ms(),
            speed: self.speed,
            pitch: self.pitch,
            volume: self.volume,
            repeat: self.repeat,
        }
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        let track = self.current_track();
        PlaybackSnapshot {
            is_engine_ready: matches!(
                self.state,
                EngineState::Ready | EngineState::Playing | EngineState::Paused | EngineState::Ended
            ),
            is_playing: self.state == EngineState::Playing,
            current_track_id: track.map(|t| t.id.clone()),
            position_ms: self.position_ms(),
            duration_ms: self.duration_ms().unwrap_or(0),
            folder: self.folder.clone(),
            track_name: track.map(|t| t.name.clone()),
            unavailable: false,
        }
    }
}
