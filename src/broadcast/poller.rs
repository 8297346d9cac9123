use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use super::StateBroadcast;

/// Anything that can report the current playback position.
pub trait PositionSource: Send + Sync + 'static {
    /// `None` once the source is gone for good.
    fn position_ms(&self) -> Option<i64>;
}

/// Periodic position refresh. Runs only while somebody is attached and
/// playback is running; at most one ticker task exists at a time.
pub struct PositionPoller {
    broadcast: Arc<StateBroadcast>,
    source: Arc<dyn PositionSource>,
    interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PositionPoller {
    pub fn new(
        broadcast: Arc<StateBroadcast>,
        source: Arc<dyn PositionSource>,
        interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            broadcast,
            source,
            interval,
            task: Mutex::new(None),
        })
    }

    pub fn is_running(&self) -> bool {
        let task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Start the ticker if it should run and is not running already.
    pub fn ensure_running(self: &Arc<Self>) {
        if self.broadcast.attached_count() == 0 || !self.broadcast.latest().is_playing {
            return;
        }
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        debug!(interval_ms = self.interval.as_millis() as u64, "position poller started");
        let this = self.clone();
        *task = Some(tokio::spawn(async move { this.tick_loop().await }));
    }

    pub fn stop(&self) {
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(t) = task.take() {
            t.abort();
            debug!("position poller stopped");
        }
    }

    async fn tick_loop(&self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.broadcast.all_detached() => break,
            }
            if self.broadcast.attached_count() == 0 || !self.broadcast.latest().is_playing {
                break;
            }
            match self.source.position_ms() {
                Some(position_ms) => {
                    trace!(position_ms, "position tick");
                    self.broadcast.update(|s| s.position_ms = position_ms);
                }
                None => break,
            }
        }
    }

    /// Start and stop the ticker as playback starts and stops. Runs until the
    /// returned task is aborted.
    pub fn supervise(self: Arc<Self>) -> JoinHandle<()> {
        let mut rx = self.broadcast.watch();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let playing = rx.borrow_and_update().snapshot.is_playing;
                if playing {
                    self.ensure_running();
                } else {
                    self.stop();
                }
            }
            self.stop();
        })
    }
}
