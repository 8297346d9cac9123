use std::path::Path;

use lofty::prelude::*;
use walkdir::WalkDir;

use crate::config::LibrarySettings;

use super::model::{AudioMetadata, Track, TrackMetadata};

fn is_audio_file(path: &Path, settings: &LibrarySettings) -> bool {
    let exts: Vec<String> = settings
        .extensions
        .iter()
        .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|e| !e.is_empty())
        .collect();

    path.extension()
        .and_then(|s| s.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            exts.iter().any(|e| e == &ext)
        })
        .unwrap_or(false)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|s| s.to_str())
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

fn entry_track(entry: &walkdir::DirEntry, metadata: TrackMetadata) -> Track {
    let mut track = Track::from_path(entry.path());
    if let Ok(meta) = entry.metadata() {
        track.size_bytes = meta.len();
        if let Ok(modified) = meta.modified() {
            track.last_modified = modified;
        }
    }
    track.metadata = metadata;
    track
}

/// Collect the audio files of `dir`, unanalyzed and unsorted.
pub fn scan(dir: &Path, settings: &LibrarySettings) -> Vec<Track> {
    let mut tracks: Vec<Track> = Vec::new();

    let mut walker = WalkDir::new(dir).follow_links(settings.follow_links);

    // Non-recursive = only the root directory.
    let depth_cap = if settings.recursive {
        settings.max_depth
    } else {
        Some(1)
    };
    if let Some(d) = depth_cap {
        walker = walker.max_depth(d);
    }

    for entry in walker
        .into_iter()
        .filter_entry(|e| settings.include_hidden || e.depth() == 0 || !is_hidden(e.path()))
        .filter_map(Result::ok)
    {
        let path = entry.path();
        if path.is_file() && is_audio_file(path, settings) {
            tracks.push(entry_track(&entry, TrackMetadata::Unanalyzed));
        }
    }

    tracks
}

/// Direct children of `dir` for browsing: subfolders plus audio files.
pub fn list_dir(dir: &Path, settings: &LibrarySettings) -> Vec<Track> {
    let mut items = Vec::new();
    for entry in WalkDir::new(dir)
        .follow_links(settings.follow_links)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_entry(|e| settings.include_hidden || !is_hidden(e.path()))
        .filter_map(Result::ok)
    {
        if entry.file_type().is_dir() {
            items.push(entry_track(&entry, TrackMetadata::Folder));
        } else if is_audio_file(entry.path(), settings) {
            items.push(entry_track(&entry, TrackMetadata::Unanalyzed));
        }
    }
    items
}

fn non_empty(v: Option<std::borrow::Cow<'_, str>>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Read tags and properties. Unreadable files come back as `Invalid`.
pub fn analyze(path: &Path) -> TrackMetadata {
    let Ok(tagged) = lofty::read_from_path(path) else {
        return TrackMetadata::Invalid;
    };

    let mut meta = AudioMetadata {
        duration: Some(tagged.properties().duration()),
        ..AudioMetadata::default()
    };

    if let Some(tag) = tagged.primary_tag().or_else(|| tagged.first_tag()) {
        meta.title = non_empty(tag.title());
        meta.artist = non_empty(tag.artist());
        meta.album = non_empty(tag.album());
        meta.has_artwork = !tag.pictures().is_empty();
    }

    TrackMetadata::Audio(meta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn is_audio_file_matches_configured_extensions_case_insensitive() {
        let settings = LibrarySettings::default();
        assert!(is_audio_file(Path::new("/tmp/a.mp3"), &settings));
        assert!(is_audio_file(Path::new("/tmp/a.MP3"), &settings));
        assert!(is_audio_file(Path::new("/tmp/a.flac"), &settings));
        assert!(is_audio_file(Path::new("/tmp/a.wav"), &settings));
        assert!(is_audio_file(Path::new("/tmp/a.ogg"), &settings));
        assert!(!is_audio_file(Path::new("/tmp/a.txt"), &settings));
        assert!(!is_audio_file(Path::new("/tmp/a"), &settings));
    }

    #[test]
    fn scan_filters_non_audio() {
        let dir = tempdir().unwrap();

        fs::write(dir.path().join("b.MP3"), b"not a real mp3").unwrap();
        fs::write(dir.path().join("A.ogg"), b"not a real ogg").unwrap();
        fs::write(dir.path().join("c.txt"), b"ignore me").unwrap();

        let mut names: Vec<String> = scan(dir.path(), &LibrarySettings::default())
            .into_iter()
            .map(|t| t.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["A.ogg".to_string(), "b.MP3".to_string()]);
    }

    #[test]
    fn scan_records_size_and_leaves_metadata_unanalyzed() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.mp3"), b"12345").unwrap();

        let tracks = scan(dir.path(), &LibrarySettings::default());
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].size_bytes, 5);
        assert_eq!(tracks[0].metadata, TrackMetadata::Unanalyzed);
        assert_eq!(tracks[0].path, dir.path().join("a.mp3"));
    }

    #[test]
    fn scan_skips_hidden_by_default() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(".hidden.mp3"), b"not real").unwrap();
        fs::write(dir.path().join("visible.mp3"), b"not real").unwrap();

        let tracks = scan(dir.path(), &LibrarySettings::default());
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].name, "visible.mp3");

        let settings = LibrarySettings {
            include_hidden: true,
            ..LibrarySettings::default()
        };
        assert_eq!(scan(dir.path(), &settings).len(), 2);
    }

    #[test]
    fn scan_is_flat_unless_recursive() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("root.mp3"), b"not real").unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir_all(&sub).unwrap();
        fs::write(sub.join("child.mp3"), b"not real").unwrap();

        let tracks = scan(dir.path(), &LibrarySettings::default());
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].name, "root.mp3");

        let settings = LibrarySettings {
            recursive: true,
            ..LibrarySettings::default()
        };
        assert_eq!(scan(dir.path(), &settings).len(), 2);
    }

    #[test]
    fn scan_respects_max_depth() {
        let dir = tempdir().unwrap();
        let d1 = dir.path().join("d1");
        let d2 = d1.join("d2");
        fs::create_dir_all(&d2).unwrap();
        fs::write(dir.path().join("root.mp3"), b"not real").unwrap();
        fs::write(d1.join("one.mp3"), b"not real").unwrap();
        fs::write(d2.join("two.mp3"), b"not real").unwrap();

        // WalkDir depth counts root as 0, children as 1, grandchildren as 2...
        let settings = LibrarySettings {
            recursive: true,
            max_depth: Some(2),
            ..LibrarySettings::default()
        };
        let names: Vec<String> = scan(dir.path(), &settings)
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert!(names.contains(&"root.mp3".to_string()));
        assert!(names.contains(&"one.mp3".to_string()));
        assert!(!names.contains(&"two.mp3".to_string()));
    }

    #[test]
    fn list_dir_reports_folders_and_audio() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("lesson2")).unwrap();
        fs::write(dir.path().join("a.mp3"), b"not real").unwrap();
        fs::write(dir.path().join("notes.txt"), b"skip").unwrap();

        let items = list_dir(dir.path(), &LibrarySettings::default());
        assert_eq!(items.len(), 2);
        assert!(items.iter().any(|t| t.is_folder() && t.name == "lesson2"));
        assert!(items.iter().any(|t| !t.is_folder() && t.name == "a.mp3"));
    }

    #[test]
    fn analyze_marks_garbage_as_invalid() {
        let dir = tempdir().unwrap();
        let p = dir.path().join("broken.mp3");
        fs::write(&p, b"definitely not audio").unwrap();
        assert_eq!(analyze(&p), TrackMetadata::Invalid);
    }
}
