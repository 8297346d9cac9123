//! `Transport` on top of a `rodio` sink.
//!
//! Seeking rebuilds the sink and skips into the decoded source, so it works
//! for every format the decoder can read. The position is kept as a clock:
//! the start offset plus wall time spent playing, scaled by the rate.

use std::fs::File;
use std::io::BufReader;
use std::time::{Duration, Instant};

use rodio::{Decoder, OutputStream, OutputStreamBuilder, Sink, Source};
use tracing::debug;

use crate::catalog::Track;

use super::transport::{Transport, TransportError};

pub struct RodioTransport {
    stream: OutputStream,
    sink: Option<Sink>,
    track: Option<Track>,
    duration: Option<Duration>,
    /// Media position at the moment the clock was last rebased.
    base: Duration,
    /// Wall time since the last rebase, not counting the running span.
    played: Duration,
    started_at: Option<Instant>,
    speed: f32,
    pitch: f32,
    volume: f32,
}

impl RodioTransport {
    /// Open the default output device.
    pub fn open_default() -> Result<Self, TransportError> {
        let mut stream = OutputStreamBuilder::open_default_stream()
            .map_err(|e| TransportError::new(format!("no audio output device: {e}")))?;
        // rodio logs to stderr when OutputStream is dropped.
        stream.log_on_drop(false);
        Ok(Self {
            stream,
            sink: None,
            track: None,
            duration: None,
            base: Duration::ZERO,
            played: Duration::ZERO,
            started_at: None,
            speed: 1.0,
            pitch: 1.0,
            volume: 1.0,
        })
    }

    fn rate(&self) -> f32 {
        self.speed * self.pitch
    }

    fn running(&self) -> Duration {
        self.played + self.started_at.map_or(Duration::ZERO, |st| st.elapsed())
    }

    /// Fold the elapsed wall time into `base` at the current rate.
    fn rebase(&mut self) {
        self.base = self.position();
        self.played = Duration::ZERO;
        self.started_at = self.started_at.map(|_| Instant::now());
    }

    fn reset_clock(&mut self, at: Duration) {
        self.base = at;
        self.played = Duration::ZERO;
        self.started_at = None;
    }
}

/// Create a paused `Sink` for `track` that starts playback at `start_at`.
fn create_sink_at(
    stream: &OutputStream,
    track: &Track,
    start_at: Duration,
) -> Result<(Sink, Option<Duration>), TransportError> {
    let file = File::open(&track.path)
        .map_err(|e| TransportError::new(format!("failed to open {}: {e}", track.path.display())))?;
    let source = Decoder::new(BufReader::new(file))
        .map_err(|e| TransportError::new(format!("failed to decode {}: {e}", track.path.display())))?;
    let duration = source.total_duration().or_else(|| track.duration());

    let sink = Sink::connect_new(stream.mixer());
    // `skip_duration` is our seeking primitive; even Duration::ZERO is fine.
    sink.append(source.skip_duration(start_at));
    sink.pause();
    Ok((sink, duration))
}

impl Transport for RodioTransport {
    fn open(&mut self, track: &Track, start: Duration) -> Result<(), TransportError> {
        self.stop();
        let (sink, duration) = create_sink_at(&self.stream, track, start)?;
        sink.set_speed(self.rate());
        sink.set_volume(self.volume);
        self.sink = Some(sink);
        self.track = Some(track.clone());
        self.duration = duration;
        self.reset_clock(start);
        debug!(track = %track.name, start_ms = start.as_millis() as u64, "media opened");
        Ok(())
    }

    fn play(&mut self) {
        if let Some(sink) = &self.sink {
            sink.play();
            if self.started_at.is_none() {
                self.started_at = Some(Instant::now());
            }
        }
    }

    fn pause(&mut self) {
        if let Some(sink) = &self.sink {
            sink.pause();
        }
        if let Some(st) = self.started_at.take() {
            self.played += st.elapsed();
        }
    }

    fn stop(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.stop();
        }
        self.track = None;
        self.duration = None;
        self.reset_clock(Duration::ZERO);
    }

    fn seek(&mut self, to: Duration) -> Result<(), TransportError> {
        let Some(track) = self.track.clone() else {
            return Err(TransportError::new("nothing loaded"));
        };
        let was_playing = self.started_at.is_some();
        let (sink, _) = create_sink_at(&self.stream, &track, to)?;
        sink.set_speed(self.rate());
        sink.set_volume(self.volume);
        if let Some(old) = self.sink.replace(sink) {
            old.stop();
        }
        self.reset_clock(to);
        if was_playing {
            self.play();
        }
        Ok(())
    }

    fn position(&self) -> Duration {
        let pos = self.base + self.running().mul_f32(self.rate());
        match self.duration {
            Some(d) => pos.min(d),
            None => pos,
        }
    }

    fn duration(&self) -> Option<Duration> {
        self.duration
    }

    fn is_finished(&self) -> bool {
        self.sink.as_ref().is_some_and(Sink::empty)
    }

    fn set_rate(&mut self, speed: f32, pitch: f32) {
        self.rebase();
        self.speed = speed;
        self.pitch = pitch;
        if let Some(sink) = &self.sink {
            sink.set_speed(self.rate());
        }
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
        if let Some(sink) = &self.sink {
            sink.set_volume(volume);
        }
    }
}
