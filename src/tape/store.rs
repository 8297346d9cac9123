//! SQLite-backed tape table, one row per folder.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use tracing::debug;

use crate::catalog::SortOrder;
use crate::error::{Error, Result};

use super::model::{Tape, TapeListOrder, TapeSettings, folder_key};

// Every non-key column has a default so rows written by older builds stay readable.
const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS tape (
    folder_path  TEXT PRIMARY KEY NOT NULL,
    current_name TEXT    NOT NULL DEFAULT '',
    position     INTEGER NOT NULL DEFAULT 0,
    sort_order   INTEGER NOT NULL DEFAULT 0,
    repeat       INTEGER NOT NULL DEFAULT 0,
    speed        REAL    NOT NULL DEFAULT 1.0,
    volume       REAL    NOT NULL DEFAULT 1.0,
    pitch        REAL    NOT NULL DEFAULT 1.0,
    item_count   INTEGER NOT NULL DEFAULT 0,
    total_time   INTEGER NOT NULL DEFAULT 0,
    create_time  INTEGER NOT NULL DEFAULT 0,
    update_time  INTEGER NOT NULL DEFAULT 0
)";

const SELECT_ONE: &str = "SELECT folder_path, current_name, position, sort_order, repeat, speed, volume, pitch,
        item_count, total_time, create_time, update_time
 FROM tape WHERE folder_path = ?";

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

fn tape_from_row(row: &SqliteRow) -> Result<Tape> {
    let folder: String = row.try_get("folder_path")?;
    Ok(Tape {
        folder_path: folder.into(),
        current_track_name: row.try_get("current_name")?,
        position_ms: row.try_get("position")?,
        sort_order: SortOrder::from_i32(row.try_get("sort_order")?),
        repeat: row.try_get("repeat")?,
        speed: row.try_get::<f64, _>("speed")? as f32,
        volume: row.try_get::<f64, _>("volume")? as f32,
        pitch: row.try_get::<f64, _>("pitch")? as f32,
        item_count: row.try_get("item_count")?,
        total_time_ms: row.try_get("total_time")?,
        created_at: from_millis(row.try_get("create_time")?),
        updated_at: from_millis(row.try_get("update_time")?),
    })
}

pub struct TapeStore {
    pool: SqlitePool,
    /// One async lock per folder key; writes to the same folder never interleave.
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl TapeStore {
    /// Open (creating if needed) the tape database at `path`.
    pub async fn open(path: &Path, max_connections: u32) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    /// Private in-memory database, used by tests and when no data dir exists.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // A memory database lives and dies with its single connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query(SCHEMA).execute(&pool).await?;
        Ok(Self {
            pool,
            locks: Mutex::new(HashMap::new()),
        })
    }

    fn key_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(key.to_string()).or_default().clone()
    }

    /// The tape for `folder`, or `Tape::empty` (position -1) if there is none.
    pub async fn get(&self, folder: &Path) -> Result<Tape> {
        let row = sqlx::query(SELECT_ONE)
            .bind(folder_key(folder))
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => tape_from_row(&row),
            None => Ok(Tape::empty(folder)),
        }
    }

    /// Insert or replace. `created_at` of an existing row is kept; both
    /// timestamps are assigned here.
    pub async fn upsert(&self, tape: &Tape) -> Result<()> {
        let key = tape.folder_key();
        let lock = self.key_lock(&key);
        let _guard = lock.lock().await;

        let now = now_millis();
        sqlx::query(
            "INSERT INTO tape
             (folder_path, current_name, position, sort_order, repeat, speed, volume, pitch,
              item_count, total_time, create_time, update_time)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(folder_path)
             DO UPDATE SET
                current_name = excluded.current_name,
                position = excluded.position,
                sort_order = excluded.sort_order,
                repeat = excluded.repeat,
                speed = excluded.speed,
                volume = excluded.volume,
                pitch = excluded.pitch,
                item_count = excluded.item_count,
                total_time = excluded.total_time,
                update_time = excluded.update_time",
        )
        .bind(&key)
        .bind(&tape.current_track_name)
        .bind(tape.position_ms)
        .bind(tape.sort_order.as_i32())
        .bind(tape.repeat)
        .bind(tape.speed as f64)
        .bind(tape.volume as f64)
        .bind(tape.pitch as f64)
        .bind(tape.item_count)
        .bind(tape.total_time_ms)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        debug!(folder = %key, "tape upserted");
        Ok(())
    }

    /// Move the bookmark. Creates the row with default settings if needed.
    pub async fn update_position(&self, folder: &Path, track_name: &str, position_ms: i64) -> Result<()> {
        let key = folder_key(folder);
        let lock = self.key_lock(&key);
        let _guard = lock.lock().await;

        let now = now_millis();
        sqlx::query(
            "INSERT INTO tape (folder_path, current_name, position, create_time, update_time)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(folder_path)
             DO UPDATE SET
                current_name = excluded.current_name,
                position = excluded.position,
                update_time = excluded.update_time",
        )
        .bind(&key)
        .bind(track_name)
        .bind(position_ms)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        debug!(folder = %key, track = track_name, position_ms, "bookmark saved");
        Ok(())
    }

    /// Store the playback settings of an existing tape. Returns whether a row matched.
    pub async fn update_settings(&self, folder: &Path, settings: &TapeSettings) -> Result<bool> {
        let key = folder_key(folder);
        let lock = self.key_lock(&key);
        let _guard = lock.lock().await;

        let s = settings.clamped();
        let done = sqlx::query(
            "UPDATE tape
             SET sort_order = ?, repeat = ?, speed = ?, volume = ?, pitch = ?, update_time = ?
             WHERE folder_path = ?",
        )
        .bind(s.sort_order.as_i32())
        .bind(s.repeat)
        .bind(s.speed as f64)
        .bind(s.volume as f64)
        .bind(s.pitch as f64)
        .bind(now_millis())
        .bind(&key)
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() > 0)
    }

    /// Refresh the denormalized track count and total time.
    pub async fn update_aggregates(&self, folder: &Path, item_count: i32, total_time_ms: i64) -> Result<bool> {
        let key = folder_key(folder);
        let lock = self.key_lock(&key);
        let _guard = lock.lock().await;

        let done = sqlx::query("UPDATE tape SET item_count = ?, total_time = ? WHERE folder_path = ?")
            .bind(item_count)
            .bind(total_time_ms)
            .bind(&key)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    /// Remove the tape. Returns whether a row existed.
    pub async fn delete(&self, folder: &Path) -> Result<bool> {
        let key = folder_key(folder);
        let lock = self.key_lock(&key);
        let _guard = lock.lock().await;

        let done = sqlx::query("DELETE FROM tape WHERE folder_path = ?")
            .bind(&key)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    /// Every tape in the requested order.
    pub fn list_all(&self, order: TapeListOrder) -> BoxStream<'_, Result<Tape>> {
        sqlx::query(order.select_sql())
            .fetch(&self.pool)
            .map(|row| row.map_err(Error::from).and_then(|row| tape_from_row(&row)))
            .boxed()
    }
}
