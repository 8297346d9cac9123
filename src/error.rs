//! Error taxonomy for the playback synchronization engine.
//!
//! Most of these are recovered locally by the component that hits them; only
//! `EngineConnectFailure` is meant to reach a UI, as an "unavailable" flag.

use std::path::PathBuf;

use thiserror::Error;

use crate::catalog::TrackId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The folder no longer exists (or is not a directory).
    #[error("folder not found: {0}")]
    MissingFolder(PathBuf),

    /// The persisted current track is absent from the folder's catalog.
    #[error("track {name:?} not found in {folder}")]
    MissingTrack { folder: PathBuf, name: String },

    /// The engine thread is gone or never came up.
    #[error("playback engine is unavailable")]
    EngineConnectFailure,

    /// Codec or IO failure for a single track.
    #[error("transport error on track {track_id}: {message}")]
    TransportError { track_id: TrackId, message: String },

    /// Negative or out-of-range seek target.
    #[error("invalid seek position: {0} ms")]
    InvalidSeek(i64),

    /// A reconciliation request was superseded by a newer one.
    #[error("reconciliation superseded by generation {0}")]
    StaleSort(u64),

    #[error(transparent)]
    Storage(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("preferences error: {0}")]
    Preferences(String),

    #[error(transparent)]
    Config(#[from] ::config::ConfigError),
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Preferences(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Self::Preferences(err.to_string())
    }
}
