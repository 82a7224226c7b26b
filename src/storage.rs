use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::progress::RunStats;

#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub stats: RunStats,
    pub processed: Vec<String>,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub id: i64,
    pub recorded_at: DateTime<Utc>,
    pub level: String,
    pub target: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewLogEntry {
    pub recorded_at: DateTime<Utc>,
    pub level: String,
    pub target: String,
    pub message: String,
}

#[derive(Debug, Default, Clone)]
pub struct Options {
    pub path: Option<PathBuf>,
}

impl Store {
    pub fn open(opts: Options) -> Result<Self> {
        let path = if let Some(path) = opts.path {
            path
        } else {
            default_path().context("storage: resolve default path")?
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("storage: create directory {}", parent.display()))?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("storage: open database at {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", &"WAL")
            .context("storage: set WAL")?;
        conn.pragma_update(None, "busy_timeout", &5000)
            .context("storage: set busy timeout")?;
        migrate(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn close(self) -> Result<()> {
        let conn = Arc::try_unwrap(self.conn)
            .map_err(|_| anyhow!("storage: connection still in use"))?
            .into_inner();
        conn.close()
            .map_err(|(_, err)| err)
            .context("storage: close connection")
    }

    pub fn save_progress(&self, snapshot: &ProgressSnapshot) -> Result<()> {
        let stats = serde_json::to_string(&snapshot.stats).context("storage: encode stats")?;
        let processed =
            serde_json::to_string(&snapshot.processed).context("storage: encode processed ids")?;
        let conn = self.conn.lock();
        conn.execute(
            r#"
INSERT INTO progress (id, stats, processed, saved_at)
VALUES (1, ?1, ?2, ?3)
ON CONFLICT(id) DO UPDATE SET
  stats = excluded.stats,
  processed = excluded.processed,
  saved_at = excluded.saved_at
"#,
            params![stats, processed, snapshot.saved_at.timestamp_millis()],
        )
        .context("storage: save progress")?;
        Ok(())
    }

    pub fn load_progress(&self) -> Result<Option<ProgressSnapshot>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT stats, processed, saved_at FROM progress WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()
            .context("storage: load progress")?;

        let Some((stats, processed, saved_at)) = row else {
            return Ok(None);
        };
        Ok(Some(ProgressSnapshot {
            stats: serde_json::from_str(&stats).context("storage: decode stats")?,
            processed: serde_json::from_str(&processed)
                .context("storage: decode processed ids")?,
            saved_at: from_millis(saved_at),
        }))
    }

    pub fn clear_progress(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM progress", [])
            .context("storage: clear progress")?;
        Ok(())
    }

    pub fn append_log(&self, entry: &NewLogEntry) -> Result<i64> {
        let conn = self.conn.lock();
        let id: i64 = conn
            .query_row(
                r#"
INSERT INTO logs (recorded_at, level, target, message)
VALUES (?1, ?2, ?3, ?4)
RETURNING id
"#,
                params![
                    entry.recorded_at.timestamp_millis(),
                    entry.level,
                    entry.target,
                    entry.message,
                ],
                |row| row.get(0),
            )
            .context("storage: append log")?;
        Ok(id)
    }

    pub fn list_logs(&self, limit: usize) -> Result<Vec<LogEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
SELECT id, recorded_at, level, target, message
FROM logs
ORDER BY id DESC
LIMIT ?1
"#,
        )?;
        let mut rows = stmt
            .query_map(params![limit as i64], log_entry_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.reverse();
        Ok(rows)
    }

    pub fn clear_logs(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM logs", [])
            .context("storage: clear logs")?;
        Ok(())
    }

    // Drops entries recorded before `older_than`, then all but the newest
    // `keep_max`. Returns how many rows went.
    pub fn prune_logs(&self, older_than: DateTime<Utc>, keep_max: usize) -> Result<usize> {
        let conn = self.conn.lock();
        let expired = conn
            .execute(
                "DELETE FROM logs WHERE recorded_at < ?1",
                params![older_than.timestamp_millis()],
            )
            .context("storage: prune expired logs")?;
        let overflow = conn
            .execute(
                r#"
DELETE FROM logs
WHERE id NOT IN (SELECT id FROM logs ORDER BY id DESC LIMIT ?1)
"#,
                params![keep_max as i64],
            )
            .context("storage: cap logs")?;
        Ok(expired + overflow)
    }
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(Utc::now)
}

fn log_entry_from_row(row: &Row<'_>) -> rusqlite::Result<LogEntry> {
    let recorded: i64 = row.get(1)?;
    Ok(LogEntry {
        id: row.get(0)?,
        recorded_at: from_millis(recorded),
        level: row.get(2)?,
        target: row.get(3)?,
        message: row.get(4)?,
    })
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at INTEGER NOT NULL
)
"#,
        [],
    )?;

    let current: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    let migrations = migrations();
    for (idx, sql) in migrations.iter().enumerate() {
        let version = (idx + 1) as i64;
        if version <= current {
            continue;
        }
        conn.execute_batch(sql)?;
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![
                version,
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or(Duration::from_secs(0))
                    .as_secs() as i64,
            ],
        )?;
    }
    Ok(())
}

fn migrations() -> Vec<&'static str> {
    vec![
        r#"
CREATE TABLE IF NOT EXISTS progress (
  id INTEGER PRIMARY KEY CHECK (id = 1),
  stats TEXT NOT NULL,
  processed TEXT NOT NULL,
  saved_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS logs (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  recorded_at INTEGER NOT NULL,
  level TEXT NOT NULL,
  target TEXT NOT NULL,
  message TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_logs_recorded_at ON logs(recorded_at);
"#,
    ]
}

pub fn default_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("feed-sweep").join("state.db"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open(dir: &tempfile::TempDir) -> Store {
        Store::open(Options {
            path: Some(dir.path().join("state.db")),
        })
        .unwrap()
    }

    fn log(at: DateTime<Utc>, message: &str) -> NewLogEntry {
        NewLogEntry {
            recorded_at: at,
            level: "INFO".into(),
            target: "feed_sweep::controller".into(),
            message: message.into(),
        }
    }

    #[test]
    fn open_creates_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("state.db");
        let store = Store::open(Options {
            path: Some(path.clone()),
        })
        .unwrap();
        assert!(path.exists());
        store.close().unwrap();
    }

    #[test]
    fn progress_snapshot_replaces_previous() {
        let dir = tempdir().unwrap();
        let store = open(&dir);
        assert!(store.load_progress().unwrap().is_none());

        let saved_at = Utc.with_ymd_and_hms(2025, 8, 1, 9, 30, 0).unwrap();
        let mut snapshot = ProgressSnapshot {
            stats: RunStats {
                processed: 2,
                deleted: 1,
                skipped: 1,
                ..RunStats::default()
            },
            processed: vec!["101".into(), "102".into()],
            saved_at,
        };
        store.save_progress(&snapshot).unwrap();
        snapshot.processed.push("103".into());
        store.save_progress(&snapshot).unwrap();

        let loaded = store.load_progress().unwrap().unwrap();
        assert_eq!(loaded, snapshot);

        store.clear_progress().unwrap();
        assert!(store.load_progress().unwrap().is_none());
    }

    #[test]
    fn logs_list_newest_in_order() {
        let dir = tempdir().unwrap();
        let store = open(&dir);
        let now = Utc::now();
        for n in 0..5 {
            store.append_log(&log(now, &format!("entry {n}"))).unwrap();
        }
        let listed: Vec<String> = store
            .list_logs(3)
            .unwrap()
            .into_iter()
            .map(|entry| entry.message)
            .collect();
        assert_eq!(listed, vec!["entry 2", "entry 3", "entry 4"]);

        store.clear_logs().unwrap();
        assert!(store.list_logs(10).unwrap().is_empty());
    }

    #[test]
    fn prune_drops_expired_and_caps() {
        let dir = tempdir().unwrap();
        let store = open(&dir);
        let now = Utc::now();
        store
            .append_log(&log(now - chrono::Duration::days(4), "stale"))
            .unwrap();
        for n in 0..4 {
            store.append_log(&log(now, &format!("fresh {n}"))).unwrap();
        }

        let removed = store
            .prune_logs(now - chrono::Duration::days(3), 3)
            .unwrap();
        assert_eq!(removed, 2);
        let left: Vec<String> = store
            .list_logs(10)
            .unwrap()
            .into_iter()
            .map(|entry| entry.message)
            .collect();
        assert_eq!(left, vec!["fresh 1", "fresh 2", "fresh 3"]);
    }
}
