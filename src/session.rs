//! The process root. A `Session` owns every component and is the single
//! place the shells around the engine talk to.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use futures_util::stream::BoxStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::broadcast::{PositionPoller, PositionSource, StateBroadcast, Subscription};
use crate::catalog::{Catalog, CatalogBuilder, SortOrder, Track};
use crate::config::Settings;
use crate::engine::{EngineHandle, ReconcileOutcome, Transport, TransportError};
use crate::error::{Error, Result};
use crate::persist::{Bookmark, PersistenceWriter};
use crate::resume::{self, IdleReason, ResumeBundle, ResumePlan, Resumption, ResumptionCoordinator};
use crate::tape::{PreferenceStore, Tape, TapeSettings, TapeStore};

pub struct Session {
    store: Arc<TapeStore>,
    prefs: Arc<PreferenceStore>,
    catalogs: Arc<CatalogBuilder>,
    snapshots: Arc<StateBroadcast>,
    engine: Arc<EngineHandle>,
    poller: Arc<PositionPoller>,
    writer: PersistenceWriter,
    coordinator: ResumptionCoordinator,
    /// Catalog of the folder loaded in the engine.
    catalog: Mutex<Option<Catalog>>,
    /// Serializes the entry points that load or reorder the queue.
    entry: Mutex<()>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl Session {
    /// Open the stores named by `settings` and start the engine.
    pub async fn open<T, F>(settings: &Settings, make_transport: F) -> Result<Self>
    where
        T: Transport,
        F: FnOnce() -> std::result::Result<T, TransportError> + Send + 'static,
    {
        let store = match settings.database_path() {
            Some(path) => TapeStore::open(&path, settings.storage.max_connections).await?,
            None => {
                warn!("no data directory, tapes will not outlive the process");
                TapeStore::in_memory().await?
            }
        };
        let prefs = match settings.preferences_path() {
            Some(path) => PreferenceStore::open(path),
            None => PreferenceStore::in_memory(),
        };
        Self::with_stores(settings, Arc::new(store), Arc::new(prefs), make_transport)
    }

    /// Start the engine over existing stores.
    pub fn with_stores<T, F>(
        settings: &Settings,
        store: Arc<TapeStore>,
        prefs: Arc<PreferenceStore>,
        make_transport: F,
    ) -> Result<Self>
    where
        T: Transport,
        F: FnOnce() -> std::result::Result<T, TransportError> + Send + 'static,
    {
        let snapshots = Arc::new(StateBroadcast::new());
        let engine = Arc::new(EngineHandle::spawn(
            make_transport,
            &settings.engine,
            snapshots.clone(),
        )?);
        let source: Arc<dyn PositionSource> = engine.clone();
        let poller = PositionPoller::new(
            snapshots.clone(),
            source,
            Duration::from_millis(settings.engine.poll_interval_ms.max(1)),
        );
        let catalogs = Arc::new(CatalogBuilder::new(settings.library.clone()));
        let (writer, writer_task) = PersistenceWriter::spawn(store.clone());
        writer.follow(engine.subscribe_events());
        let supervisor = poller.clone().supervise();
        let coordinator = ResumptionCoordinator::new(store.clone(), prefs.clone(), catalogs.clone());

        Ok(Self {
            store,
            prefs,
            catalogs,
            snapshots,
            engine,
            poller,
            writer,
            coordinator,
            catalog: Mutex::new(None),
            entry: Mutex::new(()),
            tasks: StdMutex::new(vec![writer_task, supervisor]),
        })
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    pub fn store(&self) -> &TapeStore {
        &self.store
    }

    pub fn preferences(&self) -> &PreferenceStore {
        &self.prefs
    }

    pub fn snapshots(&self) -> &StateBroadcast {
        &self.snapshots
    }

    pub fn is_available(&self) -> bool {
        self.engine.is_alive()
    }

    /// Catalog of the live tape. Missing marks the engine has since pruned
    /// are dropped.
    pub async fn current_catalog(&self) -> Option<Catalog> {
        let mut guard = self.catalog.lock().await;
        let catalog = guard.as_mut()?;
        catalog.retain_missing(&self.engine.status().queue);
        Some(catalog.clone())
    }

    /// Connect a consumer to the snapshot stream. Fails with
    /// `EngineConnectFailure` when the engine is gone; callers may retry.
    pub async fn attach(&self) -> Result<Subscription> {
        if let Err(err) = self.engine.sync().await {
            self.snapshots.mark_unavailable();
            return Err(err);
        }
        let subscription = self.snapshots.subscribe();
        self.poller.ensure_running();
        Ok(subscription)
    }

    /// Cold start or reattach, per the resumption table.
    pub async fn resume(&self) -> Result<Resumption> {
        let _entry = self.entry.lock().await;
        let resumption = self.coordinator.resume(&self.engine).await?;
        match &resumption {
            Resumption::Load(plan) => self.adopt(plan).await,
            Resumption::Reattach => self.ensure_catalog().await,
            Resumption::Idle(_) => {}
        }
        Ok(resumption)
    }

    /// Switch to `folder`, resuming its tape. Selecting the folder that is
    /// already loaded only (re)starts playback if asked to.
    pub async fn open_folder(&self, folder: &Path, play: bool) -> Result<Resumption> {
        let _entry = self.entry.lock().await;
        self.engine.sync().await?;
        let status = self.engine.status();
        if status.has_queue() && status.folder.as_deref() == Some(folder) {
            if play {
                self.engine.play()?;
            }
            self.ensure_catalog().await;
            return Ok(Resumption::Reattach);
        }

        let plan = self.coordinator.plan_folder(folder).await?;
        if plan.catalog.is_empty() {
            info!(folder = %folder.display(), "no playable tracks");
            return Ok(Resumption::Idle(IdleReason::EmptyFolder));
        }

        // The outgoing tape keeps its place.
        if let Some(bookmark) = Bookmark::from_status(&status) {
            self.writer.save(bookmark);
        }
        resume::load_plan(&self.engine, &plan, play)?;
        self.engine.sync().await?;
        self.adopt(&plan).await;
        info!(folder = %folder.display(), index = plan.start_index, "folder opened");
        Ok(Resumption::Load(plan))
    }

    /// Make `plan` the live tape: remember the folder, create its tape if
    /// it never played, refresh the aggregates.
    async fn adopt(&self, plan: &ResumePlan) {
        let folder = plan.folder().to_path_buf();
        if let Err(err) = self.prefs.set_last_playing_folder(Some(&folder)) {
            warn!(%err, "cannot remember last playing folder");
        }

        let item_count = plan.catalog.len() as i32;
        let total_time_ms = plan.catalog.total_duration_ms();
        let result = if plan.tape.is_empty() {
            let name = plan.catalog.tracks[plan.start_index].name.clone();
            let tape = Tape {
                current_track_name: name,
                position_ms: 0,
                item_count,
                total_time_ms,
                ..Tape::empty(&folder)
            };
            self.store.upsert(&tape).await
        } else if plan.tape.item_count != item_count || plan.tape.total_time_ms != total_time_ms {
            self.store
                .update_aggregates(&folder, item_count, total_time_ms)
                .await
                .map(|_| ())
        } else {
            Ok(())
        };
        if let Err(err) = result {
            warn!(folder = %folder.display(), %err, "tape bookkeeping failed");
        }

        *self.catalog.lock().await = Some(plan.catalog.clone());
    }

    /// After a reattach the catalog may not be known to this process yet.
    async fn ensure_catalog(&self) {
        if self.catalog.lock().await.is_some() {
            return;
        }
        let Some(folder) = self.engine.status().folder else {
            return;
        };
        let order = match self.store.get(&folder).await {
            Ok(tape) => tape.sort_order,
            Err(err) => {
                warn!(%err, "cannot read tape");
                SortOrder::default()
            }
        };
        match self.coordinator.catalog(&folder, order).await {
            Ok(catalog) => *self.catalog.lock().await = Some(catalog),
            Err(err) => warn!(folder = %folder.display(), %err, "cannot rebuild catalog"),
        }
    }

    /// Query for external shells; the engine is not touched.
    pub async fn resume_last_session(&self) -> Result<Option<ResumeBundle>> {
        self.coordinator.resume_last_session().await
    }

    /// Re-sort the live tape. The queue is reconciled, never reloaded.
    /// Returns `None` when nothing is loaded or a newer request won.
    pub async fn set_sort_order(&self, order: SortOrder) -> Result<Option<ReconcileOutcome>> {
        let _entry = self.entry.lock().await;
        let request = {
            let mut guard = self.catalog.lock().await;
            let Some(current) = guard.as_ref() else {
                return Ok(None);
            };
            let resorted = self.catalogs.resort(current, order);
            let folder = resorted.folder.clone();
            let reply = self
                .engine
                .request_reconcile(folder.clone(), resorted.tracks.clone())?;
            *guard = Some(resorted);
            (folder, reply)
        };
        let (folder, reply) = request;
        self.update_tape_settings(&folder, |s| s.sort_order = order).await;
        self.finish_reconcile(reply).await
    }

    /// Rescan the live folder after files were added, removed or renamed.
    pub async fn refresh_folder(&self) -> Result<Option<ReconcileOutcome>> {
        let _entry = self.entry.lock().await;
        let Some((folder, order)) = self
            .catalog
            .lock()
            .await
            .as_ref()
            .map(|c| (c.folder.clone(), c.order))
        else {
            return Ok(None);
        };
        let fresh = self.coordinator.catalog(&folder, order).await?;

        let reply = {
            let mut guard = self.catalog.lock().await;
            let reply = self
                .engine
                .request_reconcile(folder.clone(), fresh.tracks.clone())?;
            *guard = Some(fresh.clone());
            reply
        };
        if let Err(err) = self
            .store
            .update_aggregates(&folder, fresh.len() as i32, fresh.total_duration_ms())
            .await
        {
            warn!(%err, "cannot refresh tape aggregates");
        }
        self.finish_reconcile(reply).await
    }

    async fn finish_reconcile(
        &self,
        reply: tokio::sync::oneshot::Receiver<Result<ReconcileOutcome>>,
    ) -> Result<Option<ReconcileOutcome>> {
        let outcome = match reply.await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(Error::StaleSort(latest))) => {
                debug!(latest, "reconciliation superseded");
                return Ok(None);
            }
            Ok(Err(err)) => return Err(err),
            Err(_) => return Err(Error::EngineConnectFailure),
        };
        if let Some(catalog) = self.catalog.lock().await.as_mut() {
            // The engine keeps at most the playing track; older marks are gone.
            catalog.missing.clear();
            if let Some(track) = &outcome.kept_missing {
                catalog.mark_missing(track.clone());
            }
        }
        Ok(Some(outcome))
    }

    async fn update_tape_settings(&self, folder: &Path, f: impl FnOnce(&mut TapeSettings)) {
        let result = async {
            let mut settings = self.store.get(folder).await?.settings();
            f(&mut settings);
            self.store.update_settings(folder, &settings).await
        }
        .await;
        if let Err(err) = result {
            warn!(folder = %folder.display(), %err, "cannot persist tape settings");
        }
    }

    async fn live_folder(&self) -> Option<PathBuf> {
        self.catalog.lock().await.as_ref().map(|c| c.folder.clone())
    }

    pub async fn set_speed(&self, speed: f32) -> Result<()> {
        self.engine.set_speed(speed)?;
        if let Some(folder) = self.live_folder().await {
            self.update_tape_settings(&folder, |s| s.speed = speed).await;
        }
        Ok(())
    }

    pub async fn set_pitch(&self, pitch: f32) -> Result<()> {
        self.engine.set_pitch(pitch)?;
        if let Some(folder) = self.live_folder().await {
            self.update_tape_settings(&folder, |s| s.pitch = pitch).await;
        }
        Ok(())
    }

    pub async fn set_volume(&self, volume: f32) -> Result<()> {
        self.engine.set_volume(volume)?;
        if let Some(folder) = self.live_folder().await {
            self.update_tape_settings(&folder, |s| s.volume = volume).await;
        }
        Ok(())
    }

    pub async fn set_repeat(&self, repeat: bool) -> Result<()> {
        self.engine.set_repeat(repeat)?;
        if let Some(folder) = self.live_folder().await {
            self.update_tape_settings(&folder, |s| s.repeat = repeat).await;
        }
        Ok(())
    }

    /// Listing for a folder browser. Remembers the folder that was shown.
    pub fn browse(&self, dir: &Path) -> (PathBuf, Vec<Track>) {
        let home = std::env::var_os("HOME").map(PathBuf::from);
        let (shown, items) = self.catalogs.browse_or_fallback(dir, home.as_deref());
        if let Err(err) = self.prefs.set_selected_browse_path(Some(&shown)) {
            warn!(%err, "cannot remember browse path");
        }
        (shown, items)
    }

    /// Every tape, in the preferred list order.
    pub fn tapes(&self) -> BoxStream<'_, Result<Tape>> {
        self.store.list_all(self.prefs.tape_list_order())
    }

    /// Forget a tape. The last-playing pointer is cleared if it named it.
    pub async fn delete_tape(&self, folder: &Path) -> Result<bool> {
        let deleted = self.store.delete(folder).await?;
        if self.prefs.last_playing_folder().as_deref() == Some(folder) {
            self.prefs.set_last_playing_folder(None)?;
        }
        info!(folder = %folder.display(), deleted, "tape deleted");
        Ok(deleted)
    }

    /// Persist the final bookmark and stop the engine. The flush runs in
    /// its own task so dropping this future cannot cut it short.
    pub async fn shutdown(&self) -> Result<()> {
        let _ = self.engine.sync().await;
        let last = Bookmark::from_status(&self.engine.status());
        let writer = self.writer.clone();
        let flush = tokio::spawn(async move {
            if let Some(bookmark) = last {
                writer.save(bookmark);
            }
            writer.flush().await
        });
        match flush.await {
            Ok(0) => debug!("bookmarks flushed"),
            Ok(failed) => warn!(failed, "some bookmarks could not be written"),
            Err(err) => warn!(%err, "bookmark flush task failed"),
        }

        self.poller.stop();
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
        for task in tasks {
            task.abort();
        }
        self.engine.release().await
    }
}
