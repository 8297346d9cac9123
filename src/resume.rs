//! What the engine should hold, decided in one place for every entry point.
//!
//! The table, in order:
//! 1. the engine is alive with a queue: reattach, leave it alone;
//! 2. a last-playing folder with a valid tape: load its catalog at the
//!    bookmark (index 0 if the bookmarked file is gone);
//! 3. otherwise stay idle.
//!
//! External "resume last session" queries run the lookup of (2) without
//! touching the engine.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::catalog::{Catalog, CatalogBuilder, SortOrder, Track};
use crate::engine::{EngineHandle, EngineStatus};
use crate::error::{Error, Result};
use crate::tape::{PreferenceStore, Tape, TapeSettings, TapeStore};

/// Where to start in a folder.
#[derive(Debug, Clone)]
pub struct ResumePlan {
    pub tape: Tape,
    pub catalog: Catalog,
    pub start_index: usize,
    pub start_position_ms: i64,
    /// The bookmarked file was found in the catalog.
    pub track_found: bool,
}

impl ResumePlan {
    pub fn folder(&self) -> &Path {
        &self.catalog.folder
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleReason {
    NothingPersisted,
    InvalidTape,
    MissingFolder,
    EmptyFolder,
}

#[derive(Debug)]
pub enum Resumption {
    /// The engine already holds a queue; nothing was reloaded.
    Reattach,
    Load(ResumePlan),
    Idle(IdleReason),
}

/// Answer to an external resume query.
#[derive(Debug, Clone)]
pub struct ResumeBundle {
    pub folder: PathBuf,
    pub tracks: Vec<Track>,
    pub start_index: usize,
    pub start_position_ms: i64,
    pub settings: TapeSettings,
}

impl From<ResumePlan> for ResumeBundle {
    fn from(plan: ResumePlan) -> Self {
        Self {
            folder: plan.catalog.folder,
            tracks: plan.catalog.tracks,
            start_index: plan.start_index,
            start_position_ms: plan.start_position_ms,
            settings: plan.tape.settings(),
        }
    }
}

/// Start index and position for `tape` within `catalog`, plus whether the
/// bookmarked track was found. A stale name degrades to the first track.
pub fn locate(tape: &Tape, catalog: &Catalog) -> (usize, i64, bool) {
    if tape.is_empty() || tape.current_track_name.is_empty() {
        return (0, 0, false);
    }
    match catalog.index_of_name(&tape.current_track_name) {
        Some(index) => {
            let duration = catalog.tracks[index].duration_ms();
            (index, tape.resume_position_ms(duration), true)
        }
        None => {
            let err = Error::MissingTrack {
                folder: catalog.folder.clone(),
                name: tape.current_track_name.clone(),
            };
            warn!(%err, "starting from the first track");
            (0, 0, false)
        }
    }
}

pub struct ResumptionCoordinator {
    store: Arc<TapeStore>,
    prefs: Arc<PreferenceStore>,
    catalogs: Arc<CatalogBuilder>,
}

impl ResumptionCoordinator {
    pub fn new(store: Arc<TapeStore>, prefs: Arc<PreferenceStore>, catalogs: Arc<CatalogBuilder>) -> Self {
        Self {
            store,
            prefs,
            catalogs,
        }
    }

    /// Build a catalog off the async runtime; scanning and tag reading block.
    pub async fn catalog(&self, folder: &Path, order: SortOrder) -> Result<Catalog> {
        let catalogs = self.catalogs.clone();
        let folder = folder.to_path_buf();
        tokio::task::spawn_blocking(move || catalogs.build(&folder, order))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?
    }

    /// The folder's tape, catalog and start point. Never-played folders
    /// start at the first track.
    pub async fn plan_folder(&self, folder: &Path) -> Result<ResumePlan> {
        let tape = self.store.get(folder).await?;
        let catalog = self.catalog(folder, tape.sort_order).await?;
        let (start_index, start_position_ms, track_found) = locate(&tape, &catalog);
        Ok(ResumePlan {
            tape,
            catalog,
            start_index,
            start_position_ms,
            track_found,
        })
    }

    /// Rows (2) and (3) of the table, for the persisted last folder.
    async fn plan_last_session(&self) -> Result<std::result::Result<ResumePlan, IdleReason>> {
        let Some(folder) = self.prefs.last_playing_folder() else {
            return Ok(Err(IdleReason::NothingPersisted));
        };
        let tape = self.store.get(&folder).await?;
        if !tape.is_valid() {
            debug!(folder = %folder.display(), "no valid tape to resume");
            return Ok(Err(IdleReason::InvalidTape));
        }
        let plan = match self.plan_folder(&folder).await {
            Ok(plan) => plan,
            Err(Error::MissingFolder(path)) => {
                warn!(folder = %path.display(), "last playing folder is gone");
                return Ok(Err(IdleReason::MissingFolder));
            }
            Err(err) => return Err(err),
        };
        if plan.catalog.is_empty() {
            return Ok(Err(IdleReason::EmptyFolder));
        }
        Ok(Ok(plan))
    }

    /// Evaluate the table against the engine's current status.
    pub async fn decide(&self, status: &EngineStatus) -> Result<Resumption> {
        if status.has_queue() {
            return Ok(Resumption::Reattach);
        }
        Ok(match self.plan_last_session().await? {
            Ok(plan) => Resumption::Load(plan),
            Err(reason) => Resumption::Idle(reason),
        })
    }

    /// Decide and carry out the decision. Safe to call repeatedly: once a
    /// queue is loaded, later calls are reattaches.
    pub async fn resume(&self, engine: &EngineHandle) -> Result<Resumption> {
        engine.sync().await?;
        let resumption = self.decide(&engine.status()).await?;
        match &resumption {
            Resumption::Reattach => debug!("engine already loaded, reattaching"),
            Resumption::Load(plan) => {
                load_plan(engine, plan, false)?;
                engine.sync().await?;
                info!(
                    folder = %plan.folder().display(),
                    index = plan.start_index,
                    position_ms = plan.start_position_ms,
                    "resumed last session"
                );
            }
            Resumption::Idle(reason) => debug!(?reason, "nothing to resume"),
        }
        Ok(resumption)
    }

    /// Lookup for external resume requests; the engine is not touched.
    pub async fn resume_last_session(&self) -> Result<Option<ResumeBundle>> {
        Ok(self.plan_last_session().await?.ok().map(ResumeBundle::from))
    }
}

/// Hand a plan to the engine: settings first, then the queue.
pub fn load_plan(engine: &EngineHandle, plan: &ResumePlan, play: bool) -> Result<()> {
    let settings = plan.tape.settings();
    engine.set_speed(settings.speed)?;
    engine.set_pitch(settings.pitch)?;
    engine.set_volume(settings.volume)?;
    engine.set_repeat(settings.repeat)?;
    engine.load_queue(
        Some(plan.catalog.folder.clone()),
        plan.catalog.tracks.clone(),
        plan.start_index,
        plan.start_position_ms,
        play,
    )
}

#[cfg(test)]
mod tests;
