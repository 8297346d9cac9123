//! The seam between the engine state machine and an audio backend.

use std::time::Duration;

use thiserror::Error;

use crate::catalog::Track;

#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// One track at a time: open, play, pause, seek.
///
/// Implementations are driven from the engine thread only, so they do not
/// need to be `Send`.
pub trait Transport {
    /// Load `track` paused at `start`.
    fn open(&mut self, track: &Track, start: Duration) -> Result<(), TransportError>;
    fn play(&mut self);
    fn pause(&mut self);
    /// Drop the current media.
    fn stop(&mut self);
    fn seek(&mut self, to: Duration) -> Result<(), TransportError>;
    /// Position within the current media.
    fn position(&self) -> Duration;
    /// Length of the current media, when the decoder knows it.
    fn duration(&self) -> Option<Duration>;
    /// The current media played to its end.
    fn is_finished(&self) -> bool;
    /// Playing but starved of data.
    fn is_stalled(&self) -> bool {
        false
    }
    fn set_rate(&mut self, speed: f32, pitch: f32);
    fn set_volume(&mut self, volume: f32);
}
