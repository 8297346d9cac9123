//! Durable bookmarks: one writer task turns engine checkpoints into tape
//! writes.
//!
//! The engine emits a checkpoint on every pause and every track change;
//! steady position ticks never reach the store. Checkpoints are read from
//! the engine's event stream rather than the snapshot channel, which
//! coalesces and could swallow a pause followed by a quick resume.
//! Failed writes are kept and retried before the next one, and `flush`
//! drains everything for teardown.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::engine::{Checkpoint, EngineEvent, EngineStatus};
use crate::tape::TapeStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bookmark {
    pub folder: PathBuf,
    pub track_name: String,
    pub position_ms: i64,
}

impl Bookmark {
    /// Bookmark for what the engine holds right now.
    pub fn from_status(status: &EngineStatus) -> Option<Self> {
        Some(Self {
            folder: status.folder.clone()?,
            track_name: status.current_track()?.name.clone(),
            position_ms: status.position_ms.max(0),
        })
    }
}

impl From<Checkpoint> for Bookmark {
    fn from(c: Checkpoint) -> Self {
        Self {
            folder: c.folder,
            track_name: c.track_name,
            position_ms: c.position_ms.max(0),
        }
    }
}

enum WriteRequest {
    Follow(broadcast::Receiver<EngineEvent>),
    Save(Bookmark),
    Flush(oneshot::Sender<usize>),
}

/// Handle to the writer task. Cheap to clone.
#[derive(Clone)]
pub struct PersistenceWriter {
    tx: mpsc::UnboundedSender<WriteRequest>,
}

impl PersistenceWriter {
    /// Start the writer task.
    pub fn spawn(store: Arc<TapeStore>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(write_loop(store, rx));
        (Self { tx }, task)
    }

    /// Write a bookmark for every checkpoint on `events`. The receiver
    /// should be subscribed by the caller before any command it cares
    /// about is sent; nothing emitted after that point is missed.
    pub fn follow(&self, events: broadcast::Receiver<EngineEvent>) {
        if self.tx.send(WriteRequest::Follow(events)).is_err() {
            warn!("persistence writer is gone, checkpoints will not be saved");
        }
    }

    /// Queue a bookmark write. Checkpoints the engine emitted before the
    /// caller's last `sync` are written first.
    pub fn save(&self, bookmark: Bookmark) {
        if self.tx.send(WriteRequest::Save(bookmark)).is_err() {
            warn!("persistence writer is gone, bookmark dropped");
        }
    }

    /// Wait until everything queued so far was attempted, retrying failures
    /// once more. Returns the number of writes still failing.
    pub async fn flush(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(WriteRequest::Flush(tx)).is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

struct Writer {
    store: Arc<TapeStore>,
    /// Failed writes, newest per folder.
    pending: BTreeMap<PathBuf, Bookmark>,
    events: Option<broadcast::Receiver<EngineEvent>>,
}

impl Writer {
    async fn save(&mut self, bookmark: Bookmark) {
        self.pending.remove(&bookmark.folder);
        self.retry().await;
        if let Err(err) = write(&self.store, &bookmark).await {
            warn!(folder = %bookmark.folder.display(), %err, "bookmark write failed, will retry");
            self.pending.insert(bookmark.folder.clone(), bookmark);
        }
    }

    async fn retry(&mut self) {
        let folders: Vec<PathBuf> = self.pending.keys().cloned().collect();
        for folder in folders {
            if let Some(bookmark) = self.pending.get(&folder) {
                if write(&self.store, bookmark).await.is_ok() {
                    self.pending.remove(&folder);
                }
            }
        }
    }

    /// Write the checkpoints already buffered on the event stream.
    async fn drain_events(&mut self) {
        loop {
            let Some(events) = self.events.as_mut() else {
                return;
            };
            let event = match events.try_recv() {
                Ok(event) => event,
                Err(TryRecvError::Empty) => return,
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "engine events lagged, checkpoints lost");
                    continue;
                }
                Err(TryRecvError::Closed) => {
                    self.events = None;
                    return;
                }
            };
            self.on_event(event).await;
        }
    }

    async fn on_event(&mut self, event: EngineEvent) {
        if let EngineEvent::Checkpoint(checkpoint) = event {
            self.save(checkpoint.into()).await;
        }
    }
}

async fn next_event(events: &mut Option<broadcast::Receiver<EngineEvent>>) -> Result<EngineEvent, RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn write_loop(store: Arc<TapeStore>, mut rx: mpsc::UnboundedReceiver<WriteRequest>) {
    let mut writer = Writer {
        store,
        pending: BTreeMap::new(),
        events: None,
    };

    loop {
        tokio::select! {
            biased;
            request = rx.recv() => {
                let Some(request) = request else { break };
                match request {
                    WriteRequest::Follow(events) => writer.events = Some(events),
                    WriteRequest::Save(bookmark) => {
                        writer.drain_events().await;
                        writer.save(bookmark).await;
                    }
                    WriteRequest::Flush(reply) => {
                        writer.drain_events().await;
                        writer.retry().await;
                        let _ = reply.send(writer.pending.len());
                    }
                }
            }
            event = next_event(&mut writer.events) => match event {
                Ok(event) => writer.on_event(event).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "engine events lagged, checkpoints lost");
                }
                Err(RecvError::Closed) => writer.events = None,
            },
        }
    }
    writer.retry().await;
    if !writer.pending.is_empty() {
        warn!(count = writer.pending.len(), "bookmarks lost at shutdown");
    }
}

async fn write(store: &TapeStore, bookmark: &Bookmark) -> crate::error::Result<()> {
    store
        .update_position(&bookmark.folder, &bookmark.track_name, bookmark.position_ms)
        .await?;
    debug!(folder = %bookmark.folder.display(), track = %bookmark.track_name, position_ms = bookmark.position_ms, "bookmark persisted");
    Ok(())
}

#[cfg(test)]
mod tests;
