use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::catalog::SortOrder;

pub const SPEED_RANGE: RangeInclusive<f32> = 0.25..=2.0;
pub const PITCH_RANGE: RangeInclusive<f32> = 0.5..=2.0;
pub const VOLUME_RANGE: RangeInclusive<f32> = 0.0..=1.0;

/// Clamp `v` into `range`; NaN becomes `fallback`.
pub fn clamp_to(v: f32, range: &RangeInclusive<f32>, fallback: f32) -> f32 {
    if v.is_nan() {
        fallback
    } else {
        v.clamp(*range.start(), *range.end())
    }
}

/// Per-folder bookmark plus the folder's playback settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Tape {
    pub folder_path: PathBuf,
    pub current_track_name: String,
    /// `-1` marks a folder that was never played.
    pub position_ms: i64,
    pub sort_order: SortOrder,
    pub repeat: bool,
    pub speed: f32,
    pub pitch: f32,
    pub volume: f32,
    pub item_count: i32,
    pub total_time_ms: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tape {
    /// Sentinel returned for folders without a row.
    pub fn empty(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder_path: folder.into(),
            current_track_name: String::new(),
            position_ms: -1,
            sort_order: SortOrder::default(),
            repeat: false,
            speed: 1.0,
            pitch: 1.0,
            volume: 1.0,
            item_count: 0,
            total_time_ms: 0,
            created_at: DateTime::<Utc>::default(),
            updated_at: DateTime::<Utc>::default(),
        }
    }

    /// Never played in this folder.
    pub fn is_empty(&self) -> bool {
        self.position_ms < 0
    }

    /// Has something to resume from.
    pub fn is_valid(&self) -> bool {
        !self.current_track_name.is_empty() && self.position_ms >= 0
    }

    pub fn settings(&self) -> TapeSettings {
        TapeSettings {
            sort_order: self.sort_order,
            repeat: self.repeat,
            speed: self.speed,
            pitch: self.pitch,
            volume: self.volume,
        }
        .clamped()
    }

    pub fn apply_settings(&mut self, settings: &TapeSettings) {
        let s = settings.clamped();
        self.sort_order = s.sort_order;
        self.repeat = s.repeat;
        self.speed = s.speed;
        self.pitch = s.pitch;
        self.volume = s.volume;
    }

    /// Resume position for a track of `duration_ms`: positions past the end
    /// (or negative) come back as 0.
    pub fn resume_position_ms(&self, duration_ms: Option<i64>) -> i64 {
        match duration_ms {
            _ if self.position_ms < 0 => 0,
            Some(d) if self.position_ms > d => 0,
            _ => self.position_ms,
        }
    }

    pub fn folder_key(&self) -> String {
        folder_key(&self.folder_path)
    }
}

/// The folder path as stored in the primary key column.
pub fn folder_key(folder: &Path) -> String {
    folder.to_string_lossy().into_owned()
}

/// Playback settings a tape carries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TapeSettings {
    pub sort_order: SortOrder,
    pub repeat: bool,
    pub speed: f32,
    pub pitch: f32,
    pub volume: f32,
}

impl Default for TapeSettings {
    fn default() -> Self {
        Self {
            sort_order: SortOrder::default(),
            repeat: false,
            speed: 1.0,
            pitch: 1.0,
            volume: 1.0,
        }
    }
}

impl TapeSettings {
    pub fn clamped(self) -> Self {
        Self {
            speed: clamp_to(self.speed, &SPEED_RANGE, 1.0),
            pitch: clamp_to(self.pitch, &PITCH_RANGE, 1.0),
            volume: clamp_to(self.volume, &VOLUME_RANGE, 1.0),
            ..self
        }
    }
}

/// Ordering of the tape list. Persisted as an integer preference.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum TapeListOrder {
    #[default]
    UpdatedDesc,
    UpdatedAsc,
    NameAsc,
    NameDesc,
    CreatedDesc,
    CreatedAsc,
}

impl TapeListOrder {
    const ALL: [TapeListOrder; 6] = [
        TapeListOrder::UpdatedDesc,
        TapeListOrder::UpdatedAsc,
        TapeListOrder::NameAsc,
        TapeListOrder::NameDesc,
        TapeListOrder::CreatedDesc,
        TapeListOrder::CreatedAsc,
    ];

    pub fn as_i32(self) -> i32 {
        Self::ALL.iter().position(|o| *o == self).unwrap_or(0) as i32
    }

    pub fn from_i32(v: i32) -> Self {
        usize::try_from(v)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
            .unwrap_or_default()
    }

    pub(super) fn select_sql(self) -> &'static str {
        macro_rules! select_ordered {
            ($order:literal) => {
                concat!(
                    "SELECT folder_path, current_name, position, sort_order, repeat, speed, volume, pitch,
                            item_count, total_time, create_time, update_time
                     FROM tape ORDER BY ",
                    $order
                )
            };
        }

        match self {
            TapeListOrder::UpdatedDesc => select_ordered!("update_time DESC, folder_path ASC"),
            TapeListOrder::UpdatedAsc => select_ordered!("update_time ASC, folder_path ASC"),
            TapeListOrder::NameAsc => select_ordered!("folder_path ASC"),
            TapeListOrder::NameDesc => select_ordered!("folder_path DESC"),
            TapeListOrder::CreatedDesc => select_ordered!("create_time DESC, folder_path ASC"),
            TapeListOrder::CreatedAsc => select_ordered!("create_time ASC, folder_path ASC"),
        }
    }
}
