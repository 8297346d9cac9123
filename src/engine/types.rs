//! Commands, events and the shared status of the engine thread.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use crate::catalog::{Track, TrackId};
use crate::error::Result;

/// Lifecycle of the engine's current media item.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum EngineState {
    /// Nothing prepared yet, or the last prepare failed.
    #[default]
    Idle,
    /// Preparing, or starved of data mid-track.
    Buffering,
    /// Prepared and paused at the start position.
    Ready,
    Playing,
    Paused,
    /// The end of the queue was reached with repeat off.
    Ended,
}

impl EngineState {
    /// Whether media is prepared and positioned.
    pub fn is_prepared(self) -> bool {
        matches!(
            self,
            EngineState::Ready | EngineState::Playing | EngineState::Paused | EngineState::Buffering
        )
    }
}

/// Result of a reconciliation that was applied.
#[derive(Debug, Clone, Default)]
pub struct ReconcileOutcome {
    pub generation: u64,
    /// Number of queue edits performed.
    pub ops: usize,
    /// The playing track, kept in the queue although it left the folder.
    pub kept_missing: Option<Track>,
}

#[derive(Debug)]
pub enum EngineCmd {
    /// Replace the queue. An empty list is ignored.
    LoadQueue {
        folder: Option<PathBuf>,
        tracks: Vec<Track>,
        start_index: usize,
        start_position_ms: i64,
        play_when_ready: bool,
    },
    Prepare,
    Play,
    Pause,
    TogglePause,
    /// Absolute seek within the current track.
    SeekTo(i64),
    /// Relative seek, clamped to the track.
    SeekBy(i64),
    Next,
    Previous,
    SetSpeed(f32),
    SetPitch(f32),
    SetVolume(f32),
    SetRepeat(bool),
    /// Reorder the queue of `folder`. Refused when another folder is loaded.
    Reconcile {
        folder: PathBuf,
        desired: Vec<Track>,
        generation: u64,
        reply: oneshot::Sender<Result<ReconcileOutcome>>,
    },
    /// Answered once every earlier command has been handled.
    Barrier(oneshot::Sender<()>),
    /// Stop the transport and end the thread.
    Release(Option<oneshot::Sender<()>>),
}

/// Where the engine stood at a pause or a track change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub folder: PathBuf,
    pub track_name: String,
    pub position_ms: i64,
}

/// Discrete things the engine reports besides the snapshot stream.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    StateChanged(EngineState),
    TrackChanged { index: usize, id: TrackId },
    /// Emitted on every pause and every track change, never coalesced.
    Checkpoint(Checkpoint),
    QueueChanged { len: usize },
    /// A track failed to open or seek; the engine went back to idle.
    Error { track_id: TrackId, message: String },
    Ended,
}

/// Engine state mirrored for synchronous readers.
#[derive(Debug, Clone)]
pub struct EngineStatus {
    pub state: EngineState,
    pub play_when_ready: bool,
    pub folder: Option<PathBuf>,
    pub queue: Vec<Track>,
    pub index: usize,
    pub position_ms: i64,
    pub duration_ms: Option<i64>,
    pub speed: f32,
    pub pitch: f32,
    pub volume: f32,
    pub repeat: bool,
}

impl Default for EngineStatus {
    fn default() -> Self {
        Self {
            state: EngineState::Idle,
            play_when_ready: false,
            folder: None,
            queue: Vec::new(),
            index: 0,
            position_ms: 0,
            duration_ms: None,
            speed: 1.0,
            pitch: 1.0,
            volume: 1.0,
            repeat: false,
        }
    }
}

impl EngineStatus {
    pub fn current_track(&self) -> Option<&Track> {
        self.queue.get(self.index)
    }

    pub fn has_queue(&self) -> bool {
        !self.queue.is_empty()
    }
}

pub type StatusHandle = Arc<Mutex<EngineStatus>>;
