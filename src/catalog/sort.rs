//! Track ordering for each `SortOrder`.
//!
//! Tag-based orders fall back to the file name for tracks without that tag,
//! and every order breaks ties by name then path so the result is total.

use std::cmp::Ordering;

use super::model::{SortOrder, Track};

fn by_name(a: &Track, b: &Track) -> Ordering {
    a.name
        .to_lowercase()
        .cmp(&b.name.to_lowercase())
        .then_with(|| a.path.cmp(&b.path))
}

fn by_tag(a: Option<&str>, b: Option<&str>, fallback_a: &Track, fallback_b: &Track) -> Ordering {
    let ka = a.map(str::to_lowercase).unwrap_or_else(|| fallback_a.name.to_lowercase());
    let kb = b.map(str::to_lowercase).unwrap_or_else(|| fallback_b.name.to_lowercase());
    ka.cmp(&kb)
}

fn ascending(order: SortOrder, a: &Track, b: &Track) -> Ordering {
    let primary = match order {
        SortOrder::NameAsc | SortOrder::NameDesc => Ordering::Equal,
        SortOrder::DateAsc | SortOrder::DateDesc => a.last_modified.cmp(&b.last_modified),
        SortOrder::ArtistAsc | SortOrder::ArtistDesc => by_tag(a.artist(), b.artist(), a, b),
        SortOrder::TitleAsc | SortOrder::TitleDesc => by_tag(a.title(), b.title(), a, b),
        SortOrder::AlbumAsc | SortOrder::AlbumDesc => by_tag(a.album(), b.album(), a, b),
    };
    primary.then_with(|| by_name(a, b))
}

pub fn sort_tracks(tracks: &mut [Track], order: SortOrder) {
    tracks.sort_by(|a, b| {
        let ord = ascending(order, a, b);
        if order.is_descending() { ord.reverse() } else { ord }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::model::{AudioMetadata, TrackMetadata};
    use std::time::{Duration, SystemTime};

    fn t(name: &str, artist: Option<&str>, age_secs: u64) -> Track {
        let mut track = Track::from_path(format!("/music/{name}"));
        track.last_modified = SystemTime::UNIX_EPOCH + Duration::from_secs(age_secs);
        track.metadata = TrackMetadata::Audio(AudioMetadata {
            artist: artist.map(str::to_string),
            ..AudioMetadata::default()
        });
        track
    }

    fn names(tracks: &[Track]) -> Vec<&str> {
        tracks.iter().map(|t| t.name.as_str()).collect()
    }

    #[test]
    fn name_orders_are_case_insensitive_mirrors() {
        let mut tracks = vec![t("b.mp3", None, 0), t("C.mp3", None, 0), t("a.mp3", None, 0)];
        sort_tracks(&mut tracks, SortOrder::NameAsc);
        assert_eq!(names(&tracks), vec!["a.mp3", "b.mp3", "C.mp3"]);
        sort_tracks(&mut tracks, SortOrder::NameDesc);
        assert_eq!(names(&tracks), vec!["C.mp3", "b.mp3", "a.mp3"]);
    }

    #[test]
    fn date_order_uses_last_modified() {
        let mut tracks = vec![t("a.mp3", None, 30), t("b.mp3", None, 10), t("c.mp3", None, 20)];
        sort_tracks(&mut tracks, SortOrder::DateAsc);
        assert_eq!(names(&tracks), vec!["b.mp3", "c.mp3", "a.mp3"]);
        sort_tracks(&mut tracks, SortOrder::DateDesc);
        assert_eq!(names(&tracks), vec!["a.mp3", "c.mp3", "b.mp3"]);
    }

    #[test]
    fn artist_order_falls_back_to_name_and_breaks_ties_by_name() {
        let mut tracks = vec![
            t("z.mp3", Some("Beta"), 0),
            t("y.mp3", Some("alpha"), 0),
            t("b.mp3", None, 0),
            t("x.mp3", Some("Beta"), 0),
        ];
        sort_tracks(&mut tracks, SortOrder::ArtistAsc);
        assert_eq!(names(&tracks), vec!["y.mp3", "b.mp3", "x.mp3", "z.mp3"]);
    }
}
