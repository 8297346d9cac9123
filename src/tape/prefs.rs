//! Small key-value preferences shared with the shells around the engine.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;

use super::model::TapeListOrder;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    /// Folder whose tape was live when the process last ran.
    pub last_playing_folder: Option<PathBuf>,
    /// Folder the browser was showing.
    pub selected_browse_path: Option<PathBuf>,
    /// `TapeListOrder` as an integer.
    pub tape_list_order: i32,
}

/// Preferences kept in memory and mirrored to a TOML file when a path is set.
pub struct PreferenceStore {
    path: Option<PathBuf>,
    current: Mutex<Preferences>,
}

impl PreferenceStore {
    /// Load from `path`. A missing file means defaults; a corrupt one is
    /// logged and replaced on the next write.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let current = match std::fs::read_to_string(&path) {
            Ok(text) => toml::from_str(&text).unwrap_or_else(|err| {
                warn!(path = %path.display(), %err, "unreadable preferences, using defaults");
                Preferences::default()
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Preferences::default(),
            Err(err) => {
                warn!(path = %path.display(), %err, "cannot read preferences, using defaults");
                Preferences::default()
            }
        };
        Self {
            path: Some(path),
            current: Mutex::new(current),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            current: Mutex::new(Preferences::default()),
        }
    }

    pub fn get(&self) -> Preferences {
        self.current
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    pub fn last_playing_folder(&self) -> Option<PathBuf> {
        self.get().last_playing_folder
    }

    pub fn set_last_playing_folder(&self, folder: Option<&Path>) -> Result<()> {
        self.update(|p| p.last_playing_folder = folder.map(Path::to_path_buf))
    }

    pub fn selected_browse_path(&self) -> Option<PathBuf> {
        self.get().selected_browse_path
    }

    pub fn set_selected_browse_path(&self, folder: Option<&Path>) -> Result<()> {
        self.update(|p| p.selected_browse_path = folder.map(Path::to_path_buf))
    }

    pub fn tape_list_order(&self) -> TapeListOrder {
        TapeListOrder::from_i32(self.get().tape_list_order)
    }

    pub fn set_tape_list_order(&self, order: TapeListOrder) -> Result<()> {
        self.update(|p| p.tape_list_order = order.as_i32())
    }

    fn update(&self, f: impl FnOnce(&mut Preferences)) -> Result<()> {
        let snapshot = {
            let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
            f(&mut current);
            current.clone()
        };
        match &self.path {
            Some(path) => save(path, &snapshot),
            None => Ok(()),
        }
    }
}

/// Write through a temp file so a crash never leaves half a file behind.
fn save(path: &Path, prefs: &Preferences) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let text = toml::to_string_pretty(prefs)?;
    let tmp = path.with_extension("toml.tmp");
    std::fs::write(&tmp, text)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
