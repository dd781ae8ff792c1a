//! In-memory aggregate store.
//!
//! All tables sit behind one lock, so each recording is applied as a unit.
//! The whole state serializes to JSON for hosts that persist it themselves.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{add_to_total, normalize_domain, AggregateStore, SessionArchive, SettingsStore, StoreError};
use crate::ranking::{neighbor_window, rank_order};
use crate::types::{
    ArchivedSession, DomainTotal, DomainTrackerTotal, RankWindow, SessionId, Timestamp,
    TrackerRequestRecord, TrackerTotal,
};

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Tables {
    tracker_requests: Vec<TrackerRequestRecord>,
    domain_sessions: Vec<ArchivedSession>,
    /// domain -> hostname -> bytes
    domain_tracker_totals: BTreeMap<String, BTreeMap<String, u64>>,
    domain_totals: BTreeMap<String, u64>,
    tracker_totals_volatile: BTreeMap<String, u64>,
    settings: BTreeMap<String, Value>,
}

impl Tables {
    fn ranked_domains(&self) -> Vec<DomainTotal> {
        let mut ranked: Vec<DomainTotal> = self
            .domain_totals
            .iter()
            .map(|(domain, bytes)| DomainTotal {
                domain: domain.clone(),
                bytes_exchanged: *bytes,
            })
            .collect();
        ranked.sort_by(|a, b| rank_order(&a.domain, a.bytes_exchanged, &b.domain, b.bytes_exchanged));
        ranked
    }
}

/// Aggregate store kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize every table, settings included.
    pub fn to_json(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string(&*self.tables.lock())?)
    }

    /// Restore a store from [`MemoryStore::to_json`] output.
    pub fn from_json(json: &str) -> Result<Self, StoreError> {
        let tables: Tables = serde_json::from_str(json)?;
        Ok(Self {
            tables: Mutex::new(tables),
        })
    }

    pub fn archived_session_count(&self) -> usize {
        self.tables.lock().domain_sessions.len()
    }
}

impl SessionArchive for MemoryStore {
    fn archive_session(&self, session: &ArchivedSession) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();
        if tables
            .domain_sessions
            .iter()
            .any(|s| s.session_id == session.session_id)
        {
            return Err(StoreError::Database(format!(
                "session {} already archived",
                session.session_id
            )));
        }
        tables.domain_sessions.push(session.clone());
        Ok(())
    }
}

impl AggregateStore for MemoryStore {
    fn record_tracker_request(
        &self,
        domain: &str,
        record: &TrackerRequestRecord,
    ) -> Result<(), StoreError> {
        let bytes = record.bytes_exchanged;
        let mut tables = self.tables.lock();

        tables.tracker_requests.push(record.clone());

        let pair = tables
            .domain_tracker_totals
            .entry(domain.to_string())
            .or_default()
            .entry(record.hostname.clone())
            .or_insert(0);
        *pair = add_to_total(*pair, bytes);

        let domain_total = tables.domain_totals.entry(domain.to_string()).or_insert(0);
        *domain_total = add_to_total(*domain_total, bytes);

        let tracker_total = tables
            .tracker_totals_volatile
            .entry(record.hostname.clone())
            .or_insert(0);
        *tracker_total = add_to_total(*tracker_total, bytes);

        Ok(())
    }

    fn top_trackers(&self, n: usize) -> Result<Vec<TrackerTotal>, StoreError> {
        let tables = self.tables.lock();
        let mut ranked: Vec<TrackerTotal> = tables
            .tracker_totals_volatile
            .iter()
            .map(|(hostname, bytes)| TrackerTotal {
                hostname: hostname.clone(),
                bytes_exchanged: *bytes,
            })
            .collect();
        ranked.sort_by(|a, b| rank_order(&a.hostname, a.bytes_exchanged, &b.hostname, b.bytes_exchanged));
        ranked.truncate(n);
        Ok(ranked)
    }

    fn top_trackers_on(&self, domain: &str, n: usize) -> Result<Vec<DomainTrackerTotal>, StoreError> {
        let domain = normalize_domain(domain);
        let tables = self.tables.lock();
        let mut ranked: Vec<DomainTrackerTotal> = match tables.domain_tracker_totals.get(&domain) {
            Some(trackers) => trackers
                .iter()
                .map(|(hostname, bytes)| DomainTrackerTotal {
                    domain: domain.clone(),
                    hostname: hostname.clone(),
                    bytes_exchanged: *bytes,
                })
                .collect(),
            None => Vec::new(),
        };
        ranked.sort_by(|a, b| rank_order(&a.hostname, a.bytes_exchanged, &b.hostname, b.bytes_exchanged));
        ranked.truncate(n);
        Ok(ranked)
    }

    fn top_domains(&self, n: usize) -> Result<Vec<DomainTotal>, StoreError> {
        let mut ranked = self.tables.lock().ranked_domains();
        ranked.truncate(n);
        Ok(ranked)
    }

    fn neighboring_ranks(&self, domain: &str) -> Result<RankWindow, StoreError> {
        let domain = normalize_domain(domain);
        let ranked = self.tables.lock().ranked_domains();
        Ok(neighbor_window(&ranked, &domain))
    }

    fn domain_total(&self, domain: &str) -> Result<Option<DomainTotal>, StoreError> {
        let domain = normalize_domain(domain);
        let tables = self.tables.lock();
        Ok(tables.domain_totals.get(&domain).map(|bytes| DomainTotal {
            domain: domain.clone(),
            bytes_exchanged: *bytes,
        }))
    }

    fn tracker_total(&self, hostname: &str) -> Result<Option<TrackerTotal>, StoreError> {
        let tables = self.tables.lock();
        Ok(tables
            .tracker_totals_volatile
            .get(hostname)
            .map(|bytes| TrackerTotal {
                hostname: hostname.to_string(),
                bytes_exchanged: *bytes,
            }))
    }

    fn session_requests(&self, session_id: &SessionId) -> Result<Vec<TrackerRequestRecord>, StoreError> {
        let tables = self.tables.lock();
        Ok(tables
            .tracker_requests
            .iter()
            .filter(|record| &record.session_id == session_id)
            .cloned()
            .collect())
    }

    fn all_sessions_between(
        &self,
        start: Timestamp,
        end: Timestamp,
        domain: Option<&str>,
    ) -> Result<Vec<ArchivedSession>, StoreError> {
        let domain = domain.map(normalize_domain);
        let tables = self.tables.lock();
        let mut sessions: Vec<ArchivedSession> = tables
            .domain_sessions
            .iter()
            .filter(|s| s.start_time <= end && s.end_time >= start)
            .filter(|s| domain.as_deref().map_or(true, |d| s.domain == d))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| {
            a.start_time
                .cmp(&b.start_time)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        Ok(sessions)
    }

    fn clear_tracker_totals(&self) -> Result<(), StoreError> {
        self.tables.lock().tracker_totals_volatile.clear();
        Ok(())
    }
}

impl SettingsStore for MemoryStore {
    fn get_value(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.tables.lock().settings.get(key).cloned())
    }

    fn set_value(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.tables.lock().settings.insert(key.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
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

    fn archived(id: &str, domain: &str, start: Timestamp, end: Timestamp) -> ArchivedSession {
        ArchivedSession {
            session_id: SessionId::from(id),
            tab_id: 1,
            domain: domain.to_string(),
            start_time: start,
            end_time: end,
        }
    }

    #[test]
    fn test_record_updates_every_table() {
        let store = MemoryStore::new();
        let session = SessionId::new();
        store.record_tracker_request("example.com", &record(&session, "ads.tracker.net", 4500)).unwrap();
        store.record_tracker_request("example.com", &record(&session, "ads.tracker.net", 500)).unwrap();

        assert_eq!(store.domain_total("example.com").unwrap().unwrap().bytes_exchanged, 5000);
        assert_eq!(store.tracker_total("ads.tracker.net").unwrap().unwrap().bytes_exchanged, 5000);
        let pairs = store.top_trackers_on("example.com", 10).unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].bytes_exchanged, 5000);
        assert_eq!(store.session_requests(&session).unwrap().len(), 2);
    }

    #[test]
    fn test_totals_saturate_like_sqlite() {
        let store = MemoryStore::new();
        let session = SessionId::new();
        store.record_tracker_request("example.com", &record(&session, "ads.tracker.net", MAX_TOTAL_BYTES - 10)).unwrap();
        store.record_tracker_request("example.com", &record(&session, "ads.tracker.net", 100)).unwrap();

        assert_eq!(store.domain_total("example.com").unwrap().unwrap().bytes_exchanged, MAX_TOTAL_BYTES);
        assert_eq!(store.tracker_total("ads.tracker.net").unwrap().unwrap().bytes_exchanged, MAX_TOTAL_BYTES);
        assert_eq!(store.top_trackers_on("example.com", 1).unwrap()[0].bytes_exchanged, MAX_TOTAL_BYTES);
    }

    #[test]
    fn test_top_queries_sorted_with_stable_ties() {
        let store = MemoryStore::new();
        let session = SessionId::new();
        for (domain, host, bytes) in [
            ("a.com", "t1.net", 100),
            ("b.com", "t2.net", 300),
            ("c.com", "t3.net", 300),
            ("d.com", "t4.net", 50),
        ] {
            store.record_tracker_request(domain, &record(&session, host, bytes)).unwrap();
        }

        let domains: Vec<_> = store.top_domains(3).unwrap().into_iter().map(|d| d.domain).collect();
        assert_eq!(domains, vec!["b.com", "c.com", "a.com"]);

        let trackers = store.top_trackers(3).unwrap();
        assert_eq!(trackers.len(), 3);
        assert!(trackers.windows(2).all(|w| w[0].bytes_exchanged >= w[1].bytes_exchanged));
        assert_eq!(trackers[0].hostname, "t2.net");
    }

    #[test]
    fn test_neighboring_ranks_normalizes_input() {
        let store = MemoryStore::new();
        let session = SessionId::new();
        for (domain, bytes) in [("a.com", 40), ("b.com", 30), ("c.com", 20), ("d.com", 10)] {
            store.record_tracker_request(domain, &record(&session, "t.net", bytes)).unwrap();
        }
        let window = store.neighboring_ranks(" D.com ").unwrap();
        assert_eq!(window.start_rank, 2);
        assert_eq!(window.entries.len(), 3);
        assert_eq!(window.entries[2].domain, "d.com");
        assert_eq!(store.neighboring_ranks("missing.com").unwrap(), RankWindow::empty());
    }

    #[test]
    fn test_clear_tracker_totals_keeps_durable_totals() {
        let store = MemoryStore::new();
        let session = SessionId::new();
        store.record_tracker_request("example.com", &record(&session, "ads.tracker.net", 10)).unwrap();
        store.clear_tracker_totals().unwrap();
        assert!(store.top_trackers(10).unwrap().is_empty());
        assert_eq!(store.top_domains(10).unwrap().len(), 1);
        assert_eq!(store.top_trackers_on("example.com", 10).unwrap().len(), 1);
    }

    #[test]
    fn test_sessions_between_overlap_and_domain() {
        let store = MemoryStore::new();
        store.archive_session(&archived("s1", "a.com", 0, 100)).unwrap();
        store.archive_session(&archived("s2", "b.com", 150, 300)).unwrap();
        store.archive_session(&archived("s3", "a.com", 400, 500)).unwrap();

        let ids = |sessions: Vec<ArchivedSession>| -> Vec<String> {
            sessions.into_iter().map(|s| s.session_id.to_string()).collect()
        };
        assert_eq!(ids(store.all_sessions_between(50, 200, None).unwrap()), vec!["s1", "s2"]);
        assert_eq!(ids(store.all_sessions_between(0, 1000, Some("a.com")).unwrap()), vec!["s1", "s3"]);
        assert!(store.all_sessions_between(310, 390, None).unwrap().is_empty());
    }

    #[test]
    fn test_archive_is_write_once() {
        let store = MemoryStore::new();
        store.archive_session(&archived("s1", "a.com", 0, 100)).unwrap();
        assert!(store.archive_session(&archived("s1", "a.com", 0, 200)).is_err());
        assert_eq!(store.archived_session_count(), 1);
    }

    #[test]
    fn test_json_snapshot_round_trip() {
        let store = MemoryStore::new();
        let session = SessionId::new();
        store.record_tracker_request("example.com", &record(&session, "ads.tracker.net", 42)).unwrap();
        store.set_value("siphonDarkTheme", Value::Bool(true)).unwrap();

        let restored = MemoryStore::from_json(&store.to_json().unwrap()).unwrap();
        assert_eq!(restored.total_bytes_sent_during_session(&session).unwrap(), 42);
        assert_eq!(restored.get_value("siphonDarkTheme").unwrap(), Some(Value::Bool(true)));
        assert!(MemoryStore::from_json("not json").is_err());
    }

    #[test]
    fn test_concurrent_recording_loses_nothing() {
        let store = Arc::new(MemoryStore::new());
        let session = SessionId::new();
        let handles: Vec<_> = (0..8u64)
            .map(|worker| {
                let store = Arc::clone(&store);
                let session = session.clone();
                thread::spawn(move || {
                    for i in 0..50u64 {
                        store
                            .record_tracker_request("example.com", &record(&session, "ads.tracker.net", worker * 100 + i + 1))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let expected: u64 = (0..8u64).flat_map(|w| (0..50u64).map(move |i| w * 100 + i + 1)).sum();
        assert_eq!(store.tracker_total("ads.tracker.net").unwrap().unwrap().bytes_exchanged, expected);
        assert_eq!(store.domain_total("example.com").unwrap().unwrap().bytes_exchanged, expected);
        assert_eq!(store.total_bytes_sent_during_session(&session).unwrap(), expected);
    }
}
