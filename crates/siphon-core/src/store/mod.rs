//! Aggregate Store
//!
//! Durable tables for archived sessions, raw tracker request records and the
//! running totals derived from them, plus the ranking queries the pop-up and
//! graphs read. The store is the only writer of these tables.
//!
//! Two implementations share the same semantics:
//!
//! - [`SqliteStore`]: bundled SQLite, used by native builds
//! - [`MemoryStore`]: in-memory tables with a JSON snapshot, used by the
//!   WebAssembly build

mod memory;
#[cfg(feature = "sqlite")]
mod schema;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

pub use crate::settings::SettingsStore;

use crate::types::{
    ArchivedSession, DomainTotal, DomainTrackerTotal, RankWindow, SessionId, Timestamp,
    TrackerRequestRecord, TrackerTotal,
};

/// Error type for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("IO error: {0}")]
    Io(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Durable home for ended sessions.
pub trait SessionArchive {
    /// Write an ended session. Sessions are written once and never updated.
    fn archive_session(&self, session: &ArchivedSession) -> Result<(), StoreError>;
}

/// Aggregate tables and the queries over them.
pub trait AggregateStore: SessionArchive {
    /// Append `record` and add its bytes to the domain, domain/tracker and
    /// volatile tracker totals as one atomic update.
    fn record_tracker_request(
        &self,
        domain: &str,
        record: &TrackerRequestRecord,
    ) -> Result<(), StoreError>;

    /// Highest volatile tracker totals.
    fn top_trackers(&self, n: usize) -> Result<Vec<TrackerTotal>, StoreError>;

    /// Highest tracker totals seen while visiting `domain`.
    fn top_trackers_on(&self, domain: &str, n: usize) -> Result<Vec<DomainTrackerTotal>, StoreError>;

    /// Highest domain totals.
    fn top_domains(&self, n: usize) -> Result<Vec<DomainTotal>, StoreError>;

    /// Up to three ranked domains around `domain` and the rank of the first.
    fn neighboring_ranks(&self, domain: &str) -> Result<RankWindow, StoreError>;

    fn domain_total(&self, domain: &str) -> Result<Option<DomainTotal>, StoreError>;

    fn tracker_total(&self, hostname: &str) -> Result<Option<TrackerTotal>, StoreError>;

    /// Every record attributed to `session_id`, in insertion order.
    fn session_requests(&self, session_id: &SessionId) -> Result<Vec<TrackerRequestRecord>, StoreError>;

    fn total_bytes_sent_during_session(&self, session_id: &SessionId) -> Result<u64, StoreError> {
        Ok(self
            .session_requests(session_id)?
            .iter()
            .fold(0u64, |sum, record| sum.saturating_add(record.bytes_exchanged)))
    }

    /// Distinct tracker hosts contacted during `session_id`, sorted.
    fn unique_hosts_connected_during(&self, session_id: &SessionId) -> Result<Vec<String>, StoreError> {
        let mut hosts: Vec<String> = self
            .session_requests(session_id)?
            .into_iter()
            .map(|record| record.hostname)
            .collect();
        hosts.sort();
        hosts.dedup();
        Ok(hosts)
    }

    /// Archived sessions overlapping `[start, end]`, optionally for one
    /// domain, ordered by start time.
    fn all_sessions_between(
        &self,
        start: Timestamp,
        end: Timestamp,
        domain: Option<&str>,
    ) -> Result<Vec<ArchivedSession>, StoreError>;

    /// Empty the volatile tracker totals.
    fn clear_tracker_totals(&self) -> Result<(), StoreError>;
}

/// Ceiling for running byte totals. Totals stop growing here in every
/// backend, since SQLite integers are signed 64-bit.
pub const MAX_TOTAL_BYTES: u64 = i64::MAX as u64;

/// Add `bytes` to a running total, saturating at [`MAX_TOTAL_BYTES`].
pub fn add_to_total(total: u64, bytes: u64) -> u64 {
    total.saturating_add(bytes).min(MAX_TOTAL_BYTES)
}

/// Lower-case and trim a domain typed by a user.
pub fn normalize_domain(domain: &str) -> String {
    domain.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_to_total_saturates() {
        assert_eq!(add_to_total(1500, 3000), 4500);
        assert_eq!(add_to_total(MAX_TOTAL_BYTES - 1, 10), MAX_TOTAL_BYTES);
        assert_eq!(add_to_total(u64::MAX, 1), MAX_TOTAL_BYTES);
    }

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain("  Example.COM \n"), "example.com");
    }
}
