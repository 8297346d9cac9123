use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::broadcast::StateBroadcast;
use crate::config::EngineSettings;
use crate::error::Error;

use super::machine::Engine;
use super::transport::{Transport, TransportError};
use super::types::{EngineCmd, EngineEvent, StatusHandle};

/// Everything the engine thread shares with its handle.
pub(super) struct Shared {
    pub status: StatusHandle,
    pub events: broadcast::Sender<EngineEvent>,
    pub snapshots: Arc<StateBroadcast>,
    pub alive: Arc<AtomicBool>,
    /// Newest reconciliation generation handed out.
    pub generation: Arc<AtomicU64>,
}

/// How a handled command should be reflected in the snapshot.
enum Publish {
    /// Nothing observable happened.
    Skip,
    /// Full snapshot, position included.
    Full,
}

pub(super) fn spawn_engine_thread<T, F>(
    make_transport: F,
    rx: Receiver<EngineCmd>,
    shared: Shared,
    settings: EngineSettings,
) -> std::io::Result<JoinHandle<()>>
where
    T: Transport,
    F: FnOnce() -> Result<T, TransportError> + Send + 'static,
{
    thread::Builder::new()
        .name("tapedeck-engine".to_string())
        .spawn(move || {
            // The output device is not Send, so it is created here.
            let transport = match make_transport() {
                Ok(t) => t,
                Err(err) => {
                    error!(%err, "engine transport unavailable");
                    shared.alive.store(false, Ordering::SeqCst);
                    shared.snapshots.mark_unavailable();
                    return;
                }
            };
            let mut engine = Engine::new(
                transport,
                Duration::from_millis(settings.previous_restart_threshold_ms),
            );
            let tick = Duration::from_millis(settings.tick_ms.max(1));
            let mut last_tick = Instant::now();
            info!("engine thread started");

            loop {
                match rx.recv_timeout(tick) {
                    Ok(EngineCmd::Release(reply)) => {
                        engine.release();
                        flush(&mut engine, &shared, Publish::Full);
                        if let Some(reply) = reply {
                            let _ = reply.send(());
                        }
                        break;
                    }
                    Ok(cmd) => {
                        let publish = handle_command(&mut engine, cmd, &shared);
                        flush(&mut engine, &shared, publish);
                        // A steady stream of commands must not starve the tick.
                        if last_tick.elapsed() >= tick {
                            engine.tick();
                            flush_tick(&mut engine, &shared);
                            last_tick = Instant::now();
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        engine.tick();
                        flush_tick(&mut engine, &shared);
                        last_tick = Instant::now();
                    }
                    Err(RecvTimeoutError::Disconnected) => {
                        debug!("engine handle dropped");
                        engine.release();
                        break;
                    }
                }
            }

            shared.alive.store(false, Ordering::SeqCst);
            info!("engine thread stopped");
        })
}

fn handle_command<T: Transport>(engine: &mut Engine<T>, cmd: EngineCmd, shared: &Shared) -> Publish {
    match cmd {
        EngineCmd::LoadQueue {
            folder,
            tracks,
            start_index,
            start_position_ms,
            play_when_ready,
        } => {
            if !engine.load_queue(folder, tracks, start_index, start_position_ms) {
                return Publish::Skip;
            }
            engine.set_play_when_ready(play_when_ready);
        }
        EngineCmd::Prepare => engine.prepare(),
        EngineCmd::Play => engine.play(),
        EngineCmd::Pause => engine.pause(),
        EngineCmd::TogglePause => engine.toggle_pause(),
        EngineCmd::SeekTo(ms) => {
            if engine.seek_to(ms).is_err() {
                return Publish::Skip;
            }
        }
        EngineCmd::SeekBy(delta) => {
            if engine.seek_by(delta).is_err() {
                return Publish::Skip;
            }
        }
        EngineCmd::Next => engine.next(),
        EngineCmd::Previous => engine.previous(),
        EngineCmd::SetSpeed(v) => engine.set_speed(v),
        EngineCmd::SetPitch(v) => engine.set_pitch(v),
        EngineCmd::SetVolume(v) => engine.set_volume(v),
        EngineCmd::SetRepeat(v) => engine.set_repeat(v),
        EngineCmd::Reconcile {
            folder,
            desired,
            generation,
            reply,
        } => {
            let latest = shared.generation.load(Ordering::SeqCst);
            if generation < latest {
                debug!(generation, latest, "skipping superseded reconciliation");
                let _ = reply.send(Err(Error::StaleSort(latest)));
                return Publish::Skip;
            }
            let outcome = engine.reconcile(&folder, &desired, generation);
            let applied = outcome.is_ok();
            let _ = reply.send(outcome);
            if !applied {
                return Publish::Skip;
            }
        }
        EngineCmd::Barrier(reply) => {
            let _ = reply.send(());
            return Publish::Skip;
        }
        EngineCmd::Release(_) => {
            warn!("release must be handled by the thread loop");
            return Publish::Skip;
        }
    }
    Publish::Full
}

fn mirror_status<T: Transport>(engine: &Engine<T>, shared: &Shared) {
    if let Ok(mut status) = shared.status.lock() {
        *status = engine.status();
    }
}

fn send_events<T: Transport>(engine: &mut Engine<T>, shared: &Shared) {
    for event in engine.drain_events() {
        // No receivers is fine.
        let _ = shared.events.send(event);
    }
}

fn flush<T: Transport>(engine: &mut Engine<T>, shared: &Shared, publish: Publish) {
    mirror_status(engine, shared);
    send_events(engine, shared);
    if let Publish::Full = publish {
        shared.snapshots.publish(engine.snapshot());
    }
}

/// After a tick, the position only moves in the snapshot together with
/// some other change; steady progress is the poller's business.
fn flush_tick<T: Transport>(engine: &mut Engine<T>, shared: &Shared) {
    mirror_status(engine, shared);
    send_events(engine, shared);
    let next = engine.snapshot();
    shared.snapshots.update(|current| {
        let position_ms = current.position_ms;
        let mut candidate = next;
        candidate.position_ms = position_ms;
        if !current.diff(&candidate).is_empty() {
            candidate.position_ms = engine.position_ms();
        }
        *current = candidate;
    });
}
