use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};

use super::{ChatState, MemoryStore, Result, ScoreRecord, StoreError, UserMemory};
use crate::scoring::tone::Tone;

/// SQLite-backed memory store.
///
/// Two tables mirror the REST backend's schema: `qscore_history` is
/// append-only, `qscore_state` holds one upserted row per user. The
/// connection sits behind a mutex; statements are short and never span an
/// await point.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        let store = Self { conn: Mutex::new(conn) };
        store.init()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn: Mutex::new(conn) };
        store.init()?;
        Ok(store)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("sqlite connection mutex poisoned")
    }

    fn init(&self) -> Result<()> {
        let conn = self.conn();
        // WAL mode for better concurrent read performance
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::migrate(&conn)?;
        Ok(())
    }

    fn migrate(conn: &Connection) -> Result<()> {
        let version: i32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        if version < 1 {
            Self::migrate_v1(conn)?;
        }

        conn.pragma_update(None, "user_version", 1)?;
        Ok(())
    }

    /// V1: score history + per-user chat state
    fn migrate_v1(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS qscore_history (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                user        TEXT NOT NULL,
                ts          TEXT NOT NULL,
                message     TEXT NOT NULL,
                qscore      INTEGER NOT NULL,
                tone        TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_history_user ON qscore_history(user, id);

            CREATE TABLE IF NOT EXISTS qscore_state (
                user            TEXT PRIMARY KEY,
                nickname        TEXT,
                chat_count      INTEGER NOT NULL DEFAULT 0,
                chat_threshold  INTEGER NOT NULL DEFAULT 0,
                chat_buffer     TEXT NOT NULL DEFAULT '[]',
                updated_at      TEXT NOT NULL DEFAULT (datetime('now'))
            );
            ",
        )?;
        Ok(())
    }
}

impl MemoryStore for SqliteStore {
    async fn load(&self, user: &str) -> Result<Option<UserMemory>> {
        let conn = self.conn();

        let state = conn
            .query_row(
                "SELECT nickname, chat_count, chat_threshold, chat_buffer
                 FROM qscore_state WHERE user = ?1",
                params![user],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, u32>(1)?,
                        row.get::<_, u32>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(StoreError::from(other)),
            })?;

        let mut stmt = conn.prepare(
            "SELECT ts, message, qscore, tone FROM qscore_history
             WHERE user = ?1 ORDER BY id",
        )?;
        let history = stmt
            .query_map(params![user], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        if state.is_none() && history.is_empty() {
            return Ok(None);
        }

        let mut memory = UserMemory::new(user);
        for (ts, message, qscore, tone) in history {
            let ts: DateTime<Utc> = ts
                .parse()
                .map_err(|e| StoreError::Corrupt(format!("bad timestamp {ts:?}: {e}")))?;
            memory.history.push(ScoreRecord {
                ts,
                message,
                qscore,
                // Unknown labels read as neutral rather than failing the load
                tone: tone.parse().unwrap_or(Tone::Neutral),
            });
        }

        if let Some((nickname, count, threshold, buffer)) = state {
            memory.nickname = nickname;
            memory.chat_state = ChatState {
                count,
                threshold,
                buffer: serde_json::from_str(&buffer)?,
            };
            memory.chat_state.ensure_threshold();
        }

        Ok(Some(memory))
    }

    async fn append_record(&self, user: &str, record: &ScoreRecord) -> Result<()> {
        self.conn().execute(
            "INSERT INTO qscore_history (user, ts, message, qscore, tone)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user,
                record.ts.to_rfc3339(),
                record.message,
                record.qscore,
                record.tone.as_str(),
            ],
        )?;
        Ok(())
    }

    async fn update_chat_state(
        &self,
        user: &str,
        nickname: Option<&str>,
        state: &ChatState,
    ) -> Result<()> {
        let buffer = serde_json::to_string(&state.buffer)?;
        self.conn().execute(
            "INSERT INTO qscore_state (user, nickname, chat_count, chat_threshold, chat_buffer, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, datetime('now'))
             ON CONFLICT(user) DO UPDATE SET
                nickname = COALESCE(excluded.nickname, qscore_state.nickname),
                chat_count = excluded.chat_count,
                chat_threshold = excluded.chat_threshold,
                chat_buffer = excluded.chat_buffer,
                updated_at = datetime('now')",
            params![user, nickname, state.count, state.threshold, buffer],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(qscore: i64, tone: Tone, message: &str) -> ScoreRecord {
        ScoreRecord {
            ts: Utc::now(),
            message: message.to_string(),
            qscore,
            tone,
        }
    }

    #[tokio::test]
    async fn test_missing_user_loads_none() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.load("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_history_round_trip_in_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .append_record("ada", &record(150, Tone::Anxious, "rough day"))
            .await
            .unwrap();
        store
            .append_record("ada", &record(350, Tone::Positive, "better now"))
            .await
            .unwrap();

        let mem = store.load("ada").await.unwrap().unwrap();
        assert_eq!(mem.recent_scores(10), vec![150, 350]);
        assert_eq!(mem.history[0].tone, Tone::Anxious);
        assert_eq!(mem.history[1].message, "better now");
    }

    #[tokio::test]
    async fn test_chat_state_upsert() {
        let store = SqliteStore::open_in_memory().unwrap();
        let first = ChatState {
            count: 2,
            threshold: 16,
            buffer: vec!["hello".into(), "again".into()],
        };
        store
            .update_chat_state("ada", Some("Ada"), &first)
            .await
            .unwrap();

        // Second write without a nickname keeps the stored one
        let second = ChatState { count: 3, threshold: 16, buffer: vec!["more".into()] };
        store.update_chat_state("ada", None, &second).await.unwrap();

        let mem = store.load("ada").await.unwrap().unwrap();
        assert_eq!(mem.chat_state, second);
        assert_eq!(mem.nickname.as_deref(), Some("Ada"));
    }

    #[tokio::test]
    async fn test_invalid_stored_threshold_redrawn_on_load() {
        let store = SqliteStore::open_in_memory().unwrap();
        let stale = ChatState { count: 1, threshold: 7, buffer: vec!["x".into()] };
        store.update_chat_state("ada", None, &stale).await.unwrap();

        let mem = store.load("ada").await.unwrap().unwrap();
        assert!(
            (crate::memory::models::THRESHOLD_MIN..=crate::memory::models::THRESHOLD_MAX)
                .contains(&mem.chat_state.threshold)
        );
        assert_eq!(mem.chat_state.count, 1);
    }

    #[tokio::test]
    async fn test_timestamps_survive_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let r = record(250, Tone::Neutral, "timestamped");
        store.append_record("ada", &r).await.unwrap();

        let mem = store.load("ada").await.unwrap().unwrap();
        assert_eq!(mem.history[0].ts, r.ts);
    }
}
