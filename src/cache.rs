use crate::error::Result;
use chrono::{DateTime, Duration as ChronoDuration, Local};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_TTL: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum CacheDataType {
    Progression,
    TrainingMaxes,
    WeekTargets,
}

/// `rtf:<routineId>:<dataType>`
pub fn cache_key(routine_id: &str, data_type: CacheDataType) -> String {
    format!("rtf:{routine_id}:{data_type}")
}

/// Short-lived cache for derived progression data.
///
/// Entries older than the TTL read as absent and are dropped on read. Callers
/// treat every error here as a miss.
#[derive(Debug)]
pub struct ProgressionCache {
    conn: Connection,
    ttl: Duration,
}

impl ProgressionCache {
    pub fn open<P: AsRef<Path>>(path: P, ttl: Duration) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::with_connection(Connection::open(path)?, ttl)
    }

    pub fn open_in_memory(ttl: Duration) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, ttl)
    }

    fn with_connection(conn: Connection, ttl: Duration) -> Result<Self> {
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS progression_cache (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                stored_at TEXT NOT NULL
            )
            "#,
            [],
        )?;
        Ok(Self { conn, ttl })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn is_expired(&self, stored_at: DateTime<Local>, now: DateTime<Local>) -> bool {
        let ttl = ChronoDuration::from_std(self.ttl).unwrap_or_else(|_| ChronoDuration::weeks(52));
        now - stored_at >= ttl
    }

    pub fn get<T: DeserializeOwned>(
        &self,
        routine_id: &str,
        data_type: CacheDataType,
        now: DateTime<Local>,
    ) -> Result<Option<T>> {
        let key = cache_key(routine_id, data_type);
        let row: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT value, stored_at FROM progression_cache WHERE key = ?1",
                [&key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((value, stored_at)) = row else {
            debug!(%key, "cache miss");
            return Ok(None);
        };

        let fresh = match DateTime::parse_from_rfc3339(&stored_at) {
            Ok(t) => !self.is_expired(t.with_timezone(&Local), now),
            Err(e) => {
                warn!(%key, error = %e, "unreadable cache timestamp");
                false
            }
        };
        if !fresh {
            debug!(%key, "cache entry expired");
            self.conn
                .execute("DELETE FROM progression_cache WHERE key = ?1", [&key])?;
            return Ok(None);
        }

        debug!(%key, "cache hit");
        Ok(Some(serde_json::from_str(&value)?))
    }

    pub fn set<T: Serialize>(
        &self,
        routine_id: &str,
        data_type: CacheDataType,
        value: &T,
        now: DateTime<Local>,
    ) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO progression_cache (key, value, stored_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, stored_at = excluded.stored_at
            "#,
            params![
                cache_key(routine_id, data_type),
                serde_json::to_string(value)?,
                now.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Drop every entry derived from `routine_id`
    pub fn invalidate_routine(&self, routine_id: &str) -> Result<usize> {
        let prefix = format!("rtf:{routine_id}:");
        let removed = self.conn.execute(
            "DELETE FROM progression_cache WHERE substr(key, 1, length(?1)) = ?1",
            [&prefix],
        )?;
        Ok(removed)
    }

    pub fn purge_expired(&self, now: DateTime<Local>) -> Result<usize> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, stored_at FROM progression_cache")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut stale = Vec::new();
        for row in rows {
            let (key, stored_at) = row?;
            let expired = DateTime::parse_from_rfc3339(&stored_at)
                .map(|t| self.is_expired(t.with_timezone(&Local), now))
                .unwrap_or(true);
            if expired {
                stale.push(key);
            }
        }

        for key in &stale {
            self.conn
                .execute("DELETE FROM progression_cache WHERE key = ?1", [key])?;
        }
        Ok(stale.len())
    }
}
