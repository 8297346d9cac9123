//! Tapes: the persisted per-folder bookmarks and the preferences around them.

mod model;
mod prefs;
mod store;

pub use model::*;
pub use prefs::{PreferenceStore, Preferences};
pub use store::TapeStore;
