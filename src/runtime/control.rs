//! MPRIS commands mapped onto engine operations.

use tracing::debug;

use crate::engine::EngineHandle;
use crate::error::Result;
use crate::mpris::{ControlCmd, track_object_path};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Apply one command. Stop keeps the queue and bookmark; it only pauses.
pub fn apply(engine: &EngineHandle, cmd: ControlCmd) -> Result<Flow> {
    match cmd {
        ControlCmd::Quit => return Ok(Flow::Quit),
        ControlCmd::Play => engine.play()?,
        ControlCmd::Pause | ControlCmd::Stop => engine.pause()?,
        ControlCmd::PlayPause => engine.toggle_pause()?,
        ControlCmd::Next => engine.next()?,
        ControlCmd::Prev => engine.previous()?,
        ControlCmd::Seek(offset_micros) => engine.seek_by(offset_micros / 1_000)?,
        ControlCmd::SetPosition {
            track_id,
            position_micros,
        } => {
            let current = engine
                .status()
                .current_track()
                .and_then(track_object_path);
            if current.as_ref().map(|p| p.as_str()) == Some(track_id.as_str()) {
                engine.seek_to(position_micros / 1_000)?;
            } else {
                debug!(%track_id, "ignoring SetPosition for a track that is not current");
            }
        }
    }
    Ok(Flow::Continue)
}
