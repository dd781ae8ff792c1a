//! SQLite-backed aggregate store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::info;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde_json::Value;

use super::schema;
use super::{normalize_domain, AggregateStore, SessionArchive, SettingsStore, StoreError};
use crate::ranking::{window_start, WINDOW_SIZE};
use crate::types::{
    ArchivedSession, DomainTotal, DomainTrackerTotal, RankWindow, SessionId, Timestamp,
    TrackerRequestRecord, TrackerTotal,
};

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Thread-safe SQLite connection wrapper.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl SqliteStore {
    /// Open or create a database at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Io(format!("create dir: {e}")))?;
        }

        let conn = Connection::open(path)?;
        initialize(&conn)?;
        info!("Opened store at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path.to_owned(),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        initialize(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Execute a closure with the database connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }
}

impl Clone for SqliteStore {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
            path: self.path.clone(),
        }
    }
}

fn initialize(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(schema::PRAGMAS)
        .map_err(|e| StoreError::Database(format!("pragmas: {e}")))?;
    conn.execute_batch(schema::CREATE_TABLES)
        .map_err(|e| StoreError::Database(format!("schema: {e}")))?;

    let version: Option<u32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .optional()?;
    if version.is_none() {
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [schema::SCHEMA_VERSION],
        )?;
    }
    Ok(())
}

/// Upsert right-hand side that caps a running total at `i64::MAX` instead
/// of letting SQLite promote it to REAL.
const SATURATING_SUM: &str = "CASE WHEN bytes_exchanged > 9223372036854775807 - excluded.bytes_exchanged \
     THEN 9223372036854775807 ELSE bytes_exchanged + excluded.bytes_exchanged END";

fn to_db_bytes(bytes: u64) -> Result<i64, StoreError> {
    i64::try_from(bytes)
        .map_err(|_| StoreError::Database(format!("byte count {bytes} out of range")))
}

fn from_db_bytes(raw: i64) -> u64 {
    u64::try_from(raw).unwrap_or(0)
}

fn to_db_limit(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<ArchivedSession> {
    Ok(ArchivedSession {
        session_id: SessionId::from(row.get::<_, String>(0)?),
        tab_id: row.get(1)?,
        domain: row.get(2)?,
        start_time: row.get(3)?,
        end_time: row.get(4)?,
    })
}

impl SessionArchive for SqliteStore {
    fn archive_session(&self, session: &ArchivedSession) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO domain_sessions (session_id, tab_id, domain, start_time, end_time)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session.session_id.as_str(),
                session.tab_id,
                session.domain,
                session.start_time,
                session.end_time,
            ],
        )?;
        Ok(())
    }
}

impl AggregateStore for SqliteStore {
    fn record_tracker_request(
        &self,
        domain: &str,
        record: &TrackerRequestRecord,
    ) -> Result<(), StoreError> {
        let bytes = to_db_bytes(record.bytes_exchanged)?;
        let mut conn = self.conn.lock();

        // IMMEDIATE takes the write lock up front so other connections queue
        // behind this read-modify-write instead of interleaving with it
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO tracker_requests (session_id, hostname, bytes_exchanged) VALUES (?1, ?2, ?3)",
            params![record.session_id.as_str(), record.hostname, bytes],
        )?;
        tx.execute(
            &format!(
                "INSERT INTO domain_tracker_totals (domain, hostname, bytes_exchanged) VALUES (?1, ?2, ?3)
                 ON CONFLICT(domain, hostname) DO UPDATE SET bytes_exchanged = {SATURATING_SUM}"
            ),
            params![domain, record.hostname, bytes],
        )?;
        tx.execute(
            &format!(
                "INSERT INTO domain_totals (domain, bytes_exchanged) VALUES (?1, ?2)
                 ON CONFLICT(domain) DO UPDATE SET bytes_exchanged = {SATURATING_SUM}"
            ),
            params![domain, bytes],
        )?;
        tx.execute(
            &format!(
                "INSERT INTO tracker_totals_volatile (hostname, bytes_exchanged) VALUES (?1, ?2)
                 ON CONFLICT(hostname) DO UPDATE SET bytes_exchanged = {SATURATING_SUM}"
            ),
            params![record.hostname, bytes],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn top_trackers(&self, n: usize) -> Result<Vec<TrackerTotal>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT hostname, bytes_exchanged FROM tracker_totals_volatile
             ORDER BY bytes_exchanged DESC, hostname ASC LIMIT ?1",
        )?;
        let rows = stmt.query_map([to_db_limit(n)], |row| {
            Ok(TrackerTotal {
                hostname: row.get(0)?,
                bytes_exchanged: from_db_bytes(row.get(1)?),
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    fn top_trackers_on(&self, domain: &str, n: usize) -> Result<Vec<DomainTrackerTotal>, StoreError> {
        let domain = normalize_domain(domain);
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT domain, hostname, bytes_exchanged FROM domain_tracker_totals
             WHERE domain = ?1
             ORDER BY bytes_exchanged DESC, hostname ASC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![domain, to_db_limit(n)], |row| {
            Ok(DomainTrackerTotal {
                domain: row.get(0)?,
                hostname: row.get(1)?,
                bytes_exchanged: from_db_bytes(row.get(2)?),
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    fn top_domains(&self, n: usize) -> Result<Vec<DomainTotal>, StoreError> {
        let conn = self.conn.lock();
        ranked_domains(&conn, to_db_limit(n), 0)
    }

    fn neighboring_ranks(&self, domain: &str) -> Result<RankWindow, StoreError> {
        let domain = normalize_domain(domain);
        let conn = self.conn.lock();

        let bytes: Option<i64> = conn
            .query_row(
                "SELECT bytes_exchanged FROM domain_totals WHERE domain = ?1",
                [&domain],
                |row| row.get(0),
            )
            .optional()?;
        let Some(bytes) = bytes else {
            return Ok(RankWindow::empty());
        };

        let position: i64 = conn.query_row(
            "SELECT COUNT(*) FROM domain_totals
             WHERE bytes_exchanged > ?1 OR (bytes_exchanged = ?1 AND domain < ?2)",
            params![bytes, domain],
            |row| row.get(0),
        )?;
        let len: i64 = conn.query_row("SELECT COUNT(*) FROM domain_totals", [], |row| row.get(0))?;

        let start = window_start(position.max(0) as usize, len.max(0) as usize);
        let entries = ranked_domains(&conn, WINDOW_SIZE as i64, to_db_limit(start))?;
        Ok(RankWindow {
            start_rank: start + 1,
            entries,
        })
    }

    fn domain_total(&self, domain: &str) -> Result<Option<DomainTotal>, StoreError> {
        let domain = normalize_domain(domain);
        let conn = self.conn.lock();
        let total = conn
            .query_row(
                "SELECT domain, bytes_exchanged FROM domain_totals WHERE domain = ?1",
                [&domain],
                |row| {
                    Ok(DomainTotal {
                        domain: row.get(0)?,
                        bytes_exchanged: from_db_bytes(row.get(1)?),
                    })
                },
            )
            .optional()?;
        Ok(total)
    }

    fn tracker_total(&self, hostname: &str) -> Result<Option<TrackerTotal>, StoreError> {
        let conn = self.conn.lock();
        let total = conn
            .query_row(
                "SELECT hostname, bytes_exchanged FROM tracker_totals_volatile WHERE hostname = ?1",
                [hostname],
                |row| {
                    Ok(TrackerTotal {
                        hostname: row.get(0)?,
                        bytes_exchanged: from_db_bytes(row.get(1)?),
                    })
                },
            )
            .optional()?;
        Ok(total)
    }

    fn session_requests(&self, session_id: &SessionId) -> Result<Vec<TrackerRequestRecord>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT session_id, hostname, bytes_exchanged FROM tracker_requests
             WHERE session_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([session_id.as_str()], |row| {
            Ok(TrackerRequestRecord {
                session_id: SessionId::from(row.get::<_, String>(0)?),
                hostname: row.get(1)?,
                bytes_exchanged: from_db_bytes(row.get(2)?),
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    fn total_bytes_sent_during_session(&self, session_id: &SessionId) -> Result<u64, StoreError> {
        let conn = self.conn.lock();
        let total: i64 = conn.query_row(
            "SELECT COALESCE(SUM(bytes_exchanged), 0) FROM tracker_requests WHERE session_id = ?1",
            [session_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(from_db_bytes(total))
    }

    fn unique_hosts_connected_during(&self, session_id: &SessionId) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT hostname FROM tracker_requests WHERE session_id = ?1 ORDER BY hostname",
        )?;
        let rows = stmt.query_map([session_id.as_str()], |row| row.get(0))?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    fn all_sessions_between(
        &self,
        start: Timestamp,
        end: Timestamp,
        domain: Option<&str>,
    ) -> Result<Vec<ArchivedSession>, StoreError> {
        let conn = self.conn.lock();
        let sessions = match domain.map(normalize_domain) {
            Some(domain) => {
                let mut stmt = conn.prepare(
                    "SELECT session_id, tab_id, domain, start_time, end_time FROM domain_sessions
                     WHERE start_time <= ?2 AND end_time >= ?1 AND domain = ?3
                     ORDER BY start_time, session_id",
                )?;
                let rows = stmt.query_map(params![start, end, domain], row_to_session)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT session_id, tab_id, domain, start_time, end_time FROM domain_sessions
                     WHERE start_time <= ?2 AND end_time >= ?1
                     ORDER BY start_time, session_id",
                )?;
                let rows = stmt.query_map(params![start, end], row_to_session)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(sessions)
    }

    fn clear_tracker_totals(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM tracker_totals_volatile", [])?;
        Ok(())
    }
}

fn ranked_domains(conn: &Connection, limit: i64, offset: i64) -> Result<Vec<DomainTotal>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT domain, bytes_exchanged FROM domain_totals
         ORDER BY bytes_exchanged DESC, domain ASC LIMIT ?1 OFFSET ?2",
    )?;
    let rows = stmt.query_map([limit, offset], |row| {
        Ok(DomainTotal {
            domain: row.get(0)?,
            bytes_exchanged: from_db_bytes(row.get(1)?),
        })
    })?;
    Ok(rows.collect::<Result<_, _>>()?)
}

impl SettingsStore for SqliteStore {
    fn get_value(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let conn = self.conn.lock();
        let raw: Option<String> = conn
            .query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| row.get(0))
            .optional()?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn set_value(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let raw = serde_json::to_string(&value)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, raw],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::store::MAX_TOTAL_BYTES;

    fn record(session: &SessionId, host: &str, bytes: u64) -> TrackerRequestRecord {
        TrackerRequestRecord {
            session_id: session.clone(),
            hostname: host.to_string(),
            bytes_exchanged: bytes,
        }
    }

    fn count(store: &SqliteStore, table: &str) -> i64 {
        store
            .with_conn(|conn| {
                Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?)
            })
            .unwrap()
    }

    #[test]
    fn test_tables_created() {
        let store = SqliteStore::in_memory().unwrap();
        let tables: Vec<String> = store
            .with_conn(|conn| {
                let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")?;
                let rows = stmt.query_map([], |row| row.get(0))?;
                Ok(rows.collect::<Result<_, _>>()?)
            })
            .unwrap();
        for table in [
            "domain_sessions",
            "domain_totals",
            "domain_tracker_totals",
            "settings",
            "tracker_requests",
            "tracker_totals_volatile",
        ] {
            assert!(tables.contains(&table.to_string()), "missing {table}");
        }
    }

    #[test]
    fn test_record_and_session_queries() {
        let store = SqliteStore::in_memory().unwrap();
        let session = SessionId::new();
        store.record_tracker_request("example.com", &record(&session, "ads.tracker.net", 4500)).unwrap();
        store.record_tracker_request("example.com", &record(&session, "pixel.tracker.io", 100)).unwrap();
        store.record_tracker_request("example.com", &record(&session, "ads.tracker.net", 400)).unwrap();

        assert_eq!(store.total_bytes_sent_during_session(&session).unwrap(), 5000);
        assert_eq!(
            store.unique_hosts_connected_during(&session).unwrap(),
            vec!["ads.tracker.net", "pixel.tracker.io"]
        );
        assert_eq!(store.session_requests(&session).unwrap().len(), 3);
        assert_eq!(store.domain_total("Example.com").unwrap().unwrap().bytes_exchanged, 5000);
        assert_eq!(store.tracker_total("ads.tracker.net").unwrap().unwrap().bytes_exchanged, 4900);

        let on_domain = store.top_trackers_on("example.com", 1).unwrap();
        assert_eq!(on_domain.len(), 1);
        assert_eq!(on_domain[0].hostname, "ads.tracker.net");
        assert_eq!(store.total_bytes_sent_during_session(&SessionId::new()).unwrap(), 0);
    }

    #[test]
    fn test_totals_saturate_instead_of_overflowing() {
        let store = SqliteStore::in_memory().unwrap();
        let session = SessionId::new();
        store.record_tracker_request("example.com", &record(&session, "ads.tracker.net", MAX_TOTAL_BYTES - 10)).unwrap();
        store.record_tracker_request("example.com", &record(&session, "ads.tracker.net", 100)).unwrap();

        assert_eq!(store.domain_total("example.com").unwrap().unwrap().bytes_exchanged, MAX_TOTAL_BYTES);
        assert_eq!(store.tracker_total("ads.tracker.net").unwrap().unwrap().bytes_exchanged, MAX_TOTAL_BYTES);
        assert_eq!(store.top_trackers_on("example.com", 1).unwrap()[0].bytes_exchanged, MAX_TOTAL_BYTES);
        assert_eq!(store.top_domains(1).unwrap()[0].bytes_exchanged, MAX_TOTAL_BYTES);
    }

    #[test]
    fn test_failed_write_leaves_no_partial_update() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .with_conn(|conn| {
                conn.execute_batch(
                    "CREATE TRIGGER reject_volatile BEFORE INSERT ON tracker_totals_volatile
                     WHEN NEW.hostname = 'boom.net'
                     BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
                )?;
                Ok(())
            })
            .unwrap();

        let session = SessionId::new();
        assert!(store.record_tracker_request("example.com", &record(&session, "boom.net", 10)).is_err());
        assert_eq!(count(&store, "tracker_requests"), 0);
        assert_eq!(count(&store, "domain_totals"), 0);
        assert_eq!(count(&store, "domain_tracker_totals"), 0);

        store.record_tracker_request("example.com", &record(&session, "fine.net", 10)).unwrap();
        assert_eq!(count(&store, "tracker_requests"), 1);
    }

    #[test]
    fn test_neighboring_ranks_window() {
        let store = SqliteStore::in_memory().unwrap();
        let session = SessionId::new();
        for (domain, bytes) in [("a.com", 500), ("b.com", 400), ("c.com", 300), ("d.com", 200), ("e.com", 100)] {
            store.record_tracker_request(domain, &record(&session, "t.net", bytes)).unwrap();
        }

        let top = store.neighboring_ranks("a.com").unwrap();
        assert_eq!(top.start_rank, 1);
        assert_eq!(top.entries.iter().map(|e| e.domain.as_str()).collect::<Vec<_>>(), vec!["a.com", "b.com", "c.com"]);

        let middle = store.neighboring_ranks("c.com").unwrap();
        assert_eq!(middle.start_rank, 2);
        assert_eq!(middle.entries[1].domain, "c.com");

        let bottom = store.neighboring_ranks("e.com").unwrap();
        assert_eq!(bottom.start_rank, 3);
        assert_eq!(bottom.entries.iter().map(|e| e.domain.as_str()).collect::<Vec<_>>(), vec!["c.com", "d.com", "e.com"]);

        assert_eq!(store.neighboring_ranks("zzz.com").unwrap(), RankWindow::empty());
    }

    #[test]
    fn test_top_domains_descending() {
        let store = SqliteStore::in_memory().unwrap();
        let session = SessionId::new();
        for (domain, bytes) in [("a.com", 10), ("b.com", 30), ("c.com", 20), ("d.com", 30)] {
            store.record_tracker_request(domain, &record(&session, "t.net", bytes)).unwrap();
        }
        let top: Vec<_> = store
            .top_domains(3)
            .unwrap()
            .into_iter()
            .map(|d| (d.domain, d.bytes_exchanged))
            .collect();
        assert_eq!(top, vec![("b.com".to_string(), 30), ("d.com".to_string(), 30), ("c.com".to_string(), 20)]);
    }

    #[test]
    fn test_sessions_between() {
        let store = SqliteStore::in_memory().unwrap();
        for (id, domain, start, end) in [("s1", "a.com", 0, 100), ("s2", "b.com", 150, 300), ("s3", "a.com", 400, 500)] {
            store
                .archive_session(&ArchivedSession {
                    session_id: SessionId::from(id),
                    tab_id: 7,
                    domain: domain.to_string(),
                    start_time: start,
                    end_time: end,
                })
                .unwrap();
        }
        let all = store.all_sessions_between(0, 1000, None).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].tab_id, 7);
        let a_only = store.all_sessions_between(50, 450, Some("A.com")).unwrap();
        assert_eq!(a_only.iter().map(|s| s.session_id.as_str()).collect::<Vec<_>>(), vec!["s1", "s3"]);

        let duplicate = ArchivedSession {
            session_id: SessionId::from("s1"),
            tab_id: 7,
            domain: "a.com".into(),
            start_time: 0,
            end_time: 10,
        };
        assert!(store.archive_session(&duplicate).is_err());
    }

    #[test]
    fn test_settings_round_trip() {
        let store = SqliteStore::in_memory().unwrap();
        assert_eq!(store.get_value("missing").unwrap(), None);
        store.set_value("hosts", serde_json::json!(["a.net", "b.net"])).unwrap();
        store.set_value("hosts", serde_json::json!(["c.net"])).unwrap();
        assert_eq!(store.get_value("hosts").unwrap(), Some(serde_json::json!(["c.net"])));
    }

    #[test]
    fn test_file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("siphon.db");
        let session = SessionId::new();
        {
            let store = SqliteStore::open(&path).unwrap();
            store.record_tracker_request("example.com", &record(&session, "ads.tracker.net", 77)).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.path(), path.as_path());
        assert_eq!(store.domain_total("example.com").unwrap().unwrap().bytes_exchanged, 77);
    }

    #[test]
    fn test_concurrent_connections_lose_no_updates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("siphon.db");
        SqliteStore::open(&path).unwrap();
        let session = SessionId::new();

        let handles: Vec<_> = (0..4u64)
            .map(|worker| {
                let path = path.clone();
                let session = session.clone();
                thread::spawn(move || {
                    let store = SqliteStore::open(&path).unwrap();
                    for i in 0..25u64 {
                        store
                            .record_tracker_request("example.com", &record(&session, "ads.tracker.net", worker * 1000 + i + 1))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let expected: u64 = (0..4u64).flat_map(|w| (0..25u64).map(move |i| w * 1000 + i + 1)).sum();
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.tracker_total("ads.tracker.net").unwrap().unwrap().bytes_exchanged, expected);
        assert_eq!(store.domain_total("example.com").unwrap().unwrap().bytes_exchanged, expected);
        assert_eq!(store.total_bytes_sent_during_session(&session).unwrap(), expected);
    }
}
