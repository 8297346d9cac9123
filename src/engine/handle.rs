use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tokio::sync::{broadcast, oneshot};
use tracing::{debug, warn};

use crate::broadcast::{PositionSource, StateBroadcast};
use crate::catalog::Track;
use crate::config::EngineSettings;
use crate::error::{Error, Result};

use super::thread::{Shared, spawn_engine_thread};
use super::transport::{Transport, TransportError};
use super::types::{EngineCmd, EngineEvent, EngineStatus, ReconcileOutcome, StatusHandle};

/// Owner-side connection to the engine thread.
pub struct EngineHandle {
    tx: Sender<EngineCmd>,
    status: StatusHandle,
    events: broadcast::Sender<EngineEvent>,
    alive: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl EngineHandle {
    /// Start the engine thread. The transport is built on that thread.
    pub fn spawn<T, F>(
        make_transport: F,
        settings: &EngineSettings,
        snapshots: Arc<StateBroadcast>,
    ) -> Result<Self>
    where
        T: Transport,
        F: FnOnce() -> std::result::Result<T, TransportError> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<EngineCmd>();
        let status: StatusHandle = Arc::new(Mutex::new(EngineStatus::default()));
        let (events, _) = broadcast::channel(settings.event_capacity.max(1));
        let alive = Arc::new(AtomicBool::new(true));
        let generation = Arc::new(AtomicU64::new(0));

        let shared = Shared {
            status: status.clone(),
            events: events.clone(),
            snapshots,
            alive: alive.clone(),
            generation: generation.clone(),
        };
        let join = spawn_engine_thread(make_transport, rx, shared, settings.clone())?;

        Ok(Self {
            tx,
            status,
            events,
            alive,
            generation,
            join: Mutex::new(Some(join)),
        })
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn send(&self, cmd: EngineCmd) -> Result<()> {
        if !self.is_alive() {
            return Err(Error::EngineConnectFailure);
        }
        self.tx.send(cmd).map_err(|_| Error::EngineConnectFailure)
    }

    /// Copy of the state as of the last command or tick.
    pub fn status(&self) -> EngineStatus {
        self.status
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn queue_size(&self) -> usize {
        self.status().queue.len()
    }

    pub fn track_at(&self, index: usize) -> Option<Track> {
        self.status().queue.get(index).cloned()
    }

    /// Replace the queue and prepare the start item.
    pub fn load_queue(
        &self,
        folder: Option<PathBuf>,
        tracks: Vec<Track>,
        start_index: usize,
        start_position_ms: i64,
        play_when_ready: bool,
    ) -> Result<()> {
        self.send(EngineCmd::LoadQueue {
            folder,
            tracks,
            start_index,
            start_position_ms,
            play_when_ready,
        })?;
        self.send(EngineCmd::Prepare)
    }

    pub fn play(&self) -> Result<()> {
        self.send(EngineCmd::Play)
    }

    pub fn pause(&self) -> Result<()> {
        self.send(EngineCmd::Pause)
    }

    pub fn toggle_pause(&self) -> Result<()> {
        self.send(EngineCmd::TogglePause)
    }

    pub fn next(&self) -> Result<()> {
        self.send(EngineCmd::Next)
    }

    pub fn previous(&self) -> Result<()> {
        self.send(EngineCmd::Previous)
    }

    /// Negative targets are rejected here without touching the engine.
    pub fn seek_to(&self, position_ms: i64) -> Result<()> {
        if position_ms < 0 {
            warn!(position_ms, "rejected seek");
            return Err(Error::InvalidSeek(position_ms));
        }
        self.send(EngineCmd::SeekTo(position_ms))
    }

    pub fn seek_by(&self, delta_ms: i64) -> Result<()> {
        self.send(EngineCmd::SeekBy(delta_ms))
    }

    pub fn set_speed(&self, speed: f32) -> Result<()> {
        self.send(EngineCmd::SetSpeed(speed))
    }

    pub fn set_pitch(&self, pitch: f32) -> Result<()> {
        self.send(EngineCmd::SetPitch(pitch))
    }

    pub fn set_volume(&self, volume: f32) -> Result<()> {
        self.send(EngineCmd::SetVolume(volume))
    }

    pub fn set_repeat(&self, repeat: bool) -> Result<()> {
        self.send(EngineCmd::SetRepeat(repeat))
    }

    /// Queue a reconciliation of `folder` under a fresh generation. Any
    /// request still queued with an older generation, or made for a folder
    /// that is no longer loaded, is answered with `StaleSort`.
    pub fn request_reconcile(
        &self,
        folder: PathBuf,
        desired: Vec<Track>,
    ) -> Result<oneshot::Receiver<Result<ReconcileOutcome>>> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (reply, rx) = oneshot::channel();
        self.send(EngineCmd::Reconcile {
            folder,
            desired,
            generation,
            reply,
        })?;
        Ok(rx)
    }

    pub async fn reconcile(&self, folder: PathBuf, desired: Vec<Track>) -> Result<ReconcileOutcome> {
        let rx = self.request_reconcile(folder, desired)?;
        rx.await.map_err(|_| Error::EngineConnectFailure)?
    }

    /// Wait until every command sent so far has been handled.
    pub async fn sync(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(EngineCmd::Barrier(tx))?;
        rx.await.map_err(|_| Error::EngineConnectFailure)
    }

    /// Stop playback and end the engine thread.
    pub async fn release(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        if self.send(EngineCmd::Release(Some(tx))).is_ok() {
            let _ = rx.await;
        }
        let join = self.join.lock().ok().and_then(|mut j| j.take());
        if let Some(join) = join {
            tokio::task::spawn_blocking(move || {
                if join.join().is_err() {
                    warn!("engine thread panicked");
                }
            })
            .await
            .map_err(|_| Error::EngineConnectFailure)?;
        }
        debug!("engine released");
        Ok(())
    }
}

impl PositionSource for EngineHandle {
    fn position_ms(&self) -> Option<i64> {
        if !self.is_alive() {
            return None;
        }
        Some(self.status().position_ms)
    }
}
