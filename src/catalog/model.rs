use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Identity of a track that survives process restarts.
///
/// Derived from the absolute path, so a rename or move produces a new id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackId(String);

impl TrackId {
    pub fn from_path(path: &Path) -> Self {
        let digest = Sha256::digest(path.as_os_str().as_encoded_bytes());
        Self(hex::encode(&digest[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tag data read from an audio file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub duration: Option<Duration>,
    pub has_artwork: bool,
}

/// Analysis state of a catalog entry.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackMetadata {
    Folder,
    /// Not looked at yet.
    Unanalyzed,
    /// Matched the extension filter but the tags/properties could not be read.
    Invalid,
    Audio(AudioMetadata),
}

#[derive(Debug, Clone)]
pub struct Track {
    pub id: TrackId,
    /// File name, which is what a tape bookmarks.
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub last_modified: SystemTime,
    pub metadata: TrackMetadata,
}

impl Track {
    /// Build an entry from a path without touching the filesystem.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            id: TrackId::from_path(&path),
            name,
            path,
            size_bytes: 0,
            last_modified: SystemTime::UNIX_EPOCH,
            metadata: TrackMetadata::Unanalyzed,
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self.metadata, TrackMetadata::Folder)
    }

    fn audio(&self) -> Option<&AudioMetadata> {
        match &self.metadata {
            TrackMetadata::Audio(m) => Some(m),
            _ => None,
        }
    }

    pub fn title(&self) -> Option<&str> {
        self.audio().and_then(|m| m.title.as_deref())
    }

    pub fn artist(&self) -> Option<&str> {
        self.audio().and_then(|m| m.artist.as_deref())
    }

    pub fn album(&self) -> Option<&str> {
        self.audio().and_then(|m| m.album.as_deref())
    }

    pub fn duration(&self) -> Option<Duration> {
        self.audio().and_then(|m| m.duration)
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.duration().map(|d| d.as_millis() as i64)
    }

    /// Title for display: the tag title, else the file stem.
    pub fn display_title(&self) -> String {
        self.title().map(str::to_string).unwrap_or_else(|| {
            self.path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.name.clone())
        })
    }
}

/// Ordering applied to a folder's tracks. Persisted as an integer.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortOrder {
    #[default]
    NameAsc,
    NameDesc,
    DateAsc,
    DateDesc,
    ArtistAsc,
    ArtistDesc,
    TitleAsc,
    TitleDesc,
    AlbumAsc,
    AlbumDesc,
}

impl SortOrder {
    pub const ALL: [SortOrder; 10] = [
        SortOrder::NameAsc,
        SortOrder::NameDesc,
        SortOrder::DateAsc,
        SortOrder::DateDesc,
        SortOrder::ArtistAsc,
        SortOrder::ArtistDesc,
        SortOrder::TitleAsc,
        SortOrder::TitleDesc,
        SortOrder::AlbumAsc,
        SortOrder::AlbumDesc,
    ];

    pub fn as_i32(self) -> i32 {
        Self::ALL.iter().position(|o| *o == self).unwrap_or(0) as i32
    }

    /// Unknown values fall back to `NameAsc`.
    pub fn from_i32(v: i32) -> Self {
        usize::try_from(v)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
            .unwrap_or_default()
    }

    pub fn is_descending(self) -> bool {
        matches!(
            self,
            SortOrder::NameDesc
                | SortOrder::DateDesc
                | SortOrder::ArtistDesc
                | SortOrder::TitleDesc
                | SortOrder::AlbumDesc
        )
    }

    /// Whether sorting needs tag data.
    pub fn needs_metadata(self) -> bool {
        matches!(
            self,
            SortOrder::ArtistAsc
                | SortOrder::ArtistDesc
                | SortOrder::TitleAsc
                | SortOrder::TitleDesc
                | SortOrder::AlbumAsc
                | SortOrder::AlbumDesc
        )
    }
}

/// Ordered playable tracks of one folder.
#[derive(Debug, Clone)]
pub struct Catalog {
    pub folder: PathBuf,
    pub order: SortOrder,
    pub tracks: Vec<Track>,
    /// Tracks that vanished from disk while still loaded in the engine.
    pub missing: Vec<Track>,
}

impl Catalog {
    pub fn new(folder: impl Into<PathBuf>, order: SortOrder, tracks: Vec<Track>) -> Self {
        Self {
            folder: folder.into(),
            order,
            tracks,
            missing: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn ids(&self) -> Vec<TrackId> {
        self.tracks.iter().map(|t| t.id.clone()).collect()
    }

    pub fn index_of_name(&self, name: &str) -> Option<usize> {
        self.tracks.iter().position(|t| t.name == name)
    }

    pub fn index_of_id(&self, id: &TrackId) -> Option<usize> {
        self.tracks.iter().position(|t| &t.id == id)
    }

    /// Sum of the known durations.
    pub fn total_duration_ms(&self) -> i64 {
        self.tracks.iter().filter_map(Track::duration_ms).sum()
    }

    pub fn mark_missing(&mut self, track: Track) {
        if !self.is_missing(&track.id) {
            self.missing.push(track);
        }
    }

    pub fn is_missing(&self, id: &TrackId) -> bool {
        self.missing.iter().any(|t| &t.id == id)
    }

    /// Forget missing marks for tracks no longer in `live`.
    pub fn retain_missing(&mut self, live: &[Track]) {
        self.missing.retain(|m| live.iter().any(|t| t.id == m.id));
    }
}
