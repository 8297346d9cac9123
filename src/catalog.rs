//! Folder catalog: the ordered, filesystem-derived track list of a tape.
//!
//! `CatalogBuilder` scans a folder, analyzes tags through a cache keyed by
//! path, size and modification time, and applies the folder's `SortOrder`.

mod model;
mod scan;
mod sort;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use tracing::{debug, warn};

use crate::config::LibrarySettings;
use crate::error::{Error, Result};

pub use model::*;
pub use scan::analyze;
pub use sort::sort_tracks;

#[derive(Clone)]
struct CachedMetadata {
    size_bytes: u64,
    last_modified: SystemTime,
    metadata: TrackMetadata,
}

pub struct CatalogBuilder {
    settings: LibrarySettings,
    cache: Mutex<HashMap<PathBuf, CachedMetadata>>,
}

impl CatalogBuilder {
    pub fn new(settings: LibrarySettings) -> Self {
        Self {
            settings,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Scan `folder`, analyze every track and sort by `order`.
    pub fn build(&self, folder: &Path, order: SortOrder) -> Result<Catalog> {
        if !folder.is_dir() {
            return Err(Error::MissingFolder(folder.to_path_buf()));
        }

        let mut tracks = scan::scan(folder, &self.settings);
        for track in &mut tracks {
            track.metadata = self.metadata_for(track);
        }
        sort_tracks(&mut tracks, order);

        debug!(folder = %folder.display(), count = tracks.len(), ?order, "catalog built");
        Ok(Catalog::new(folder, order, tracks))
    }

    /// Re-sort an existing catalog without touching the filesystem.
    pub fn resort(&self, catalog: &Catalog, order: SortOrder) -> Catalog {
        let mut tracks = catalog.tracks.clone();
        sort_tracks(&mut tracks, order);
        Catalog {
            folder: catalog.folder.clone(),
            order,
            tracks,
            missing: catalog.missing.clone(),
        }
    }

    /// Browse listing of `dir`: subfolders first, then audio files, both by name.
    pub fn browse(&self, dir: &Path) -> Result<Vec<Track>> {
        if !dir.is_dir() {
            return Err(Error::MissingFolder(dir.to_path_buf()));
        }
        let mut items = scan::list_dir(dir, &self.settings);
        items.sort_by(|a, b| {
            b.is_folder()
                .cmp(&a.is_folder())
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        });
        Ok(items)
    }

    /// Like `browse`, but a vanished folder falls back to `home` (or `/`).
    pub fn browse_or_fallback(&self, dir: &Path, home: Option<&Path>) -> (PathBuf, Vec<Track>) {
        match self.browse(dir) {
            Ok(items) => (dir.to_path_buf(), items),
            Err(err) => {
                warn!(%err, "browse folder unavailable, falling back");
                let root = home
                    .filter(|h| h.is_dir())
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from("/"));
                let items = self.browse(&root).unwrap_or_default();
                (root, items)
            }
        }
    }

    fn metadata_for(&self, track: &Track) -> TrackMetadata {
        if let Ok(cache) = self.cache.lock() {
            if let Some(hit) = cache.get(&track.path) {
                if hit.size_bytes == track.size_bytes && hit.last_modified == track.last_modified
                {
                    return hit.metadata.clone();
                }
            }
        }

        let metadata = analyze(&track.path);
        if metadata == TrackMetadata::Invalid {
            debug!(path = %track.path.display(), "unreadable tags");
        }

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(
                track.path.clone(),
                CachedMetadata {
                    size_bytes: track.size_bytes,
                    last_modified: track.last_modified,
                    metadata: metadata.clone(),
                },
            );
        }
        metadata
    }
}
