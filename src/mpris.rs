//! MPRIS2 bridge on the session bus.
//!
//! The service runs on its own thread; method calls are forwarded as
//! [`ControlCmd`]s and properties are served from a shared state that the
//! runtime refreshes from playback snapshots.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_io::{Timer, block_on};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};
use zbus::{Connection, interface};
use zvariant::{ObjectPath, OwnedValue, Value};

use crate::broadcast::PlaybackSnapshot;
use crate::catalog::Track;

const OBJECT_PATH: &str = "/org/mpris/MediaPlayer2";
const BUS_NAME: &str = "org.mpris.MediaPlayer2.tapedeck";
const TRACK_PATH_PREFIX: &str = "/org/mpris/MediaPlayer2/track/";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlCmd {
    Quit,
    Play,
    Pause,
    PlayPause,
    Stop,
    Next,
    Prev,
    /// Relative seek in microseconds.
    Seek(i64),
    /// Absolute seek in microseconds, only honored for the named track.
    SetPosition { track_id: String, position_micros: i64 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PlaybackStatus {
    #[default]
    Stopped,
    Playing,
    Paused,
}

impl PlaybackStatus {
    pub fn from_snapshot(snapshot: &PlaybackSnapshot) -> Self {
        if snapshot.unavailable || !snapshot.is_engine_ready {
            PlaybackStatus::Stopped
        } else if snapshot.is_playing {
            PlaybackStatus::Playing
        } else {
            PlaybackStatus::Paused
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            PlaybackStatus::Stopped => "Stopped",
            PlaybackStatus::Playing => "Playing",
            PlaybackStatus::Paused => "Paused",
        }
    }
}

#[derive(Debug, Default)]
struct SharedState {
    playback: PlaybackStatus,
    title: Option<String>,
    artist: Vec<String>,
    album: Option<String>,
    url: Option<String>,
    length_micros: Option<i64>,
    track_id: Option<ObjectPath<'static>>,
    position_micros: i64,
}

/// Object path MPRIS clients see for a track.
pub fn track_object_path(track: &Track) -> Option<ObjectPath<'static>> {
    ObjectPath::try_from(format!("{TRACK_PATH_PREFIX}{}", track.id))
        .ok()
        .map(|p| p.into_owned())
}

pub struct MprisHandle {
    state: Arc<Mutex<SharedState>>,
}

impl MprisHandle {
    pub fn set_playback(&self, playback: PlaybackStatus) {
        if let Ok(mut s) = self.state.lock() {
            s.playback = playback;
        }
    }

    pub fn set_position_ms(&self, position_ms: i64) {
        if let Ok(mut s) = self.state.lock() {
            s.position_micros = position_ms.max(0).saturating_mul(1_000);
        }
    }

    /// Replace the now-playing metadata; `None` clears it.
    pub fn set_track(&self, track: Option<&Track>) {
        let Ok(mut s) = self.state.lock() else {
            return;
        };
        match track {
            Some(track) => {
                s.title = Some(track.display_title());
                s.artist = track.artist().map(|a| vec![a.to_string()]).unwrap_or_default();
                s.album = track.album().map(str::to_string);
                s.url = Some(format!("file://{}", track.path.display()));
                s.length_micros = track.duration().map(|d| d.as_micros() as i64);
                s.track_id = track_object_path(track);
            }
            None => {
                s.title = None;
                s.artist.clear();
                s.album = None;
                s.url = None;
                s.length_micros = None;
                s.track_id = None;
            }
        }
    }

    /// Refresh everything a snapshot carries.
    pub fn update(&self, snapshot: &PlaybackSnapshot, track: Option<&Track>) {
        self.set_track(track);
        self.set_playback(PlaybackStatus::from_snapshot(snapshot));
        self.set_position_ms(snapshot.position_ms);
        if let Ok(mut s) = self.state.lock() {
            if s.length_micros.is_none() && snapshot.duration_ms > 0 {
                s.length_micros = Some(snapshot.duration_ms * 1_000);
            }
        }
    }
}

struct RootIface {
    tx: UnboundedSender<ControlCmd>,
}

#[interface(name = "org.mpris.MediaPlayer2")]
impl RootIface {
    fn raise(&self) {}

    fn quit(&self) {
        let _ = self.tx.send(ControlCmd::Quit);
    }

    #[zbus(property)]
    fn can_quit(&self) -> bool {
        true
    }

    #[zbus(property)]
    fn can_raise(&self) -> bool {
        false
    }

    #[zbus(property)]
    fn has_track_list(&self) -> bool {
        false
    }

    #[zbus(property)]
    fn identity(&self) -> &str {
        "tapedeck"
    }

    #[zbus(property)]
    fn supported_uri_schemes(&self) -> Vec<String> {
        vec!["file".to_string()]
    }

    #[zbus(property)]
    fn supported_mime_types(&self) -> Vec<String> {
        vec![]
    }
}

struct PlayerIface {
    tx: UnboundedSender<ControlCmd>,
    state: Arc<Mutex<SharedState>>,
}

impl PlayerIface {
    fn send(&self, cmd: ControlCmd) {
        if self.tx.send(cmd).is_err() {
            debug!("control receiver is gone");
        }
    }
}

fn insert(map: &mut HashMap<String, OwnedValue>, key: &str, value: Value<'_>) {
    if let Ok(value) = OwnedValue::try_from(value) {
        map.insert(key.to_string(), value);
    }
}

#[interface(name = "org.mpris.MediaPlayer2.Player")]
impl PlayerIface {
    fn next(&self) {
        self.send(ControlCmd::Next);
    }

    fn previous(&self) {
        self.send(ControlCmd::Prev);
    }

    fn play(&self) {
        self.send(ControlCmd::Play);
    }

    fn pause(&self) {
        self.send(ControlCmd::Pause);
    }

    fn play_pause(&self) {
        self.send(ControlCmd::PlayPause);
    }

    fn stop(&self) {
        self.send(ControlCmd::Stop);
    }

    fn seek(&self, offset: i64) {
        self.send(ControlCmd::Seek(offset));
    }

    fn set_position(&self, track_id: ObjectPath<'_>, position: i64) {
        self.send(ControlCmd::SetPosition {
            track_id: track_id.as_str().to_string(),
            position_micros: position,
        });
    }

    #[zbus(property)]
    fn playback_status(&self) -> &str {
        self.state
            .lock()
            .map(|s| s.playback.as_str())
            .unwrap_or("Stopped")
    }

    #[zbus(property)]
    fn position(&self) -> i64 {
        self.state.lock().map(|s| s.position_micros).unwrap_or(0)
    }

    #[zbus(property)]
    fn can_control(&self) -> bool {
        true
    }

    #[zbus(property)]
    fn can_play(&self) -> bool {
        true
    }

    #[zbus(property)]
    fn can_pause(&self) -> bool {
        true
    }

    #[zbus(property)]
    fn can_seek(&self) -> bool {
        self.state.lock().map(|s| s.track_id.is_some()).unwrap_or(false)
    }

    #[zbus(property)]
    fn can_go_next(&self) -> bool {
        true
    }

    #[zbus(property)]
    fn can_go_previous(&self) -> bool {
        true
    }

    #[zbus(property)]
    fn metadata(&self) -> HashMap<String, OwnedValue> {
        let mut map = HashMap::new();
        let Ok(s) = self.state.lock() else {
            return map;
        };
        if let Some(id) = &s.track_id {
            insert(&mut map, "mpris:trackid", Value::from(id.clone()));
        }
        insert(
            &mut map,
            "xesam:title",
            Value::from(s.title.clone().unwrap_or_default()),
        );
        if !s.artist.is_empty() {
            insert(&mut map, "xesam:artist", Value::from(s.artist.clone()));
        }
        if let Some(album) = &s.album {
            insert(&mut map, "xesam:album", Value::from(album.clone()));
        }
        if let Some(url) = &s.url {
            insert(&mut map, "xesam:url", Value::from(url.clone()));
        }
        if let Some(length) = s.length_micros {
            insert(&mut map, "mpris:length", Value::from(length));
        }
        map
    }
}

/// Register the service and return the handle used to feed it state.
/// Bus failures are logged; the player keeps working without MPRIS.
pub fn spawn_mpris(tx: UnboundedSender<ControlCmd>) -> MprisHandle {
    let state = Arc::new(Mutex::new(SharedState::default()));

    let state_for_thread = state.clone();
    let spawned = std::thread::Builder::new()
        .name("tapedeck-mpris".to_string())
        .spawn(move || {
            block_on(async move {
                let connection = match Connection::session().await {
                    Ok(c) => c,
                    Err(err) => {
                        warn!(%err, "MPRIS: failed to connect to session bus");
                        return;
                    }
                };

                if let Err(err) = connection.request_name(BUS_NAME).await {
                    warn!(%err, "MPRIS: failed to acquire name");
                    return;
                }

                let object_server = connection.object_server();

                if let Err(err) = object_server.at(OBJECT_PATH, RootIface { tx: tx.clone() }).await {
                    warn!(%err, "MPRIS: failed to register root iface");
                    return;
                }

                if let Err(err) = object_server
                    .at(
                        OBJECT_PATH,
                        PlayerIface {
                            tx,
                            state: state_for_thread,
                        },
                    )
                    .await
                {
                    warn!(%err, "MPRIS: failed to register player iface");
                    return;
                }
                debug!(name = BUS_NAME, "MPRIS service registered");

                loop {
                    Timer::after(std::time::Duration::from_secs(3600)).await;
                }
            });
        });
    if let Err(err) = spawned {
        warn!(%err, "MPRIS: failed to start service thread");
    }

    MprisHandle { state }
}
