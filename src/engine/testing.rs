//! A scripted transport for driving the engine without an audio device.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::catalog::Track;

use super::transport::{Transport, TransportError};

#[derive(Debug, Default)]
pub struct Script {
    pub opened: Vec<(PathBuf, Duration)>,
    pub loaded: Option<PathBuf>,
    pub playing: bool,
    pub position: Duration,
    pub duration: Option<Duration>,
    pub finished: bool,
    pub stalled: bool,
    pub fail_paths: HashSet<PathBuf>,
    pub fail_seek: bool,
    pub seeks: Vec<Duration>,
    pub speed: f32,
    pub pitch: f32,
    pub volume: f32,
    /// Blocks the engine thread inside `open`.
    pub open_delay: Option<Duration>,
}

/// Cloneable; every clone drives the same script.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
    default_duration: Option<Duration>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::with_duration(Duration::from_secs(60))
    }

    pub fn with_duration(duration: Duration) -> Self {
        Self {
            script: Arc::new(Mutex::new(Script::default())),
            default_duration: Some(duration),
        }
    }

    pub fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_position(&self, position: Duration) {
        self.script().position = position;
    }

    pub fn finish(&self) {
        self.script().finished = true;
    }

    pub fn fail_on(&self, path: impl Into<PathBuf>) {
        self.script().fail_paths.insert(path.into());
    }
}

impl Transport for ScriptedTransport {
    fn open(&mut self, track: &Track, start: Duration) -> Result<(), TransportError> {
        let default_duration = self.default_duration;
        let delay = self.script().open_delay;
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        let mut s = self.script();
        s.opened.push((track.path.clone(), start));
        if s.fail_paths.contains(&track.path) {
            s.loaded = None;
            return Err(TransportError::new("cannot decode"));
        }
        s.loaded = Some(track.path.clone());
        s.playing = false;
        s.position = start;
        s.duration = track.duration().or(default_duration);
        s.finished = false;
        Ok(())
    }

    fn play(&mut self) {
        self.script().playing = true;
    }

    fn pause(&mut self) {
        self.script().playing = false;
    }

    fn stop(&mut self) {
        let mut s = self.script();
        s.loaded = None;
        s.playing = false;
        s.position = Duration::ZERO;
    }

    fn seek(&mut self, to: Duration) -> Result<(), TransportError> {
        let mut s = self.script();
        if s.fail_seek {
            return Err(TransportError::new("seek failed"));
        }
        s.seeks.push(to);
        s.position = to;
        Ok(())
    }

    fn position(&self) -> Duration {
        self.script().position
    }

    fn duration(&self) -> Option<Duration> {
        self.script().duration
    }

    fn is_finished(&self) -> bool {
        self.script().finished
    }

    fn is_stalled(&self) -> bool {
        self.script().stalled
    }

    fn set_rate(&mut self, speed: f32, pitch: f32) {
        let mut s = self.script();
        s.speed = speed;
        s.pitch = pitch;
    }

    fn set_volume(&mut self, volume: f32) {
        self.script().volume = volume;
    }
}
