//! Core type definitions for Siphon
//!
//! These types describe the sessions, request records and aggregate rows that
//! flow between the session tracker, the recorder and the stores. Field names
//! serialize in camelCase so the extension shell can consume them directly.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Tabs and Time
// =============================================================================

/// Browser tab handle.
pub type TabId = i32;

/// Tab id the browser reports for requests not tied to any tab.
pub const NO_TAB: TabId = -1;

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

// =============================================================================
// Session Identity
// =============================================================================

/// Globally unique identifier of one visit session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh random session id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Sessions
// =============================================================================

/// A tab's current visit. Lives only in memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct ActiveSession {
    pub tab_id: TabId,
    /// Registrable domain the tab is showing
    pub domain: String,
    pub session_id: SessionId,
    #[cfg_attr(feature = "ts", ts(type = "number"))]
    pub start_time: Timestamp,
}

impl ActiveSession {
    pub fn new(tab_id: TabId, domain: impl Into<String>, start_time: Timestamp) -> Self {
        Self {
            tab_id,
            domain: domain.into(),
            session_id: SessionId::new(),
            start_time,
        }
    }

    /// End this session. The end time never precedes the start time.
    pub fn archive(self, end_time: Timestamp) -> ArchivedSession {
        ArchivedSession {
            end_time: end_time.max(self.start_time),
            session_id: self.session_id,
            tab_id: self.tab_id,
            domain: self.domain,
            start_time: self.start_time,
        }
    }
}

/// A finished visit, written once to durable storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct ArchivedSession {
    pub session_id: SessionId,
    pub tab_id: TabId,
    pub domain: String,
    #[cfg_attr(feature = "ts", ts(type = "number"))]
    pub start_time: Timestamp,
    #[cfg_attr(feature = "ts", ts(type = "number"))]
    pub end_time: Timestamp,
}

// =============================================================================
// Requests
// =============================================================================

/// A completed network request as reported by the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedRequest {
    pub url: String,
    pub tab_id: TabId,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub from_cache: bool,
    #[serde(default)]
    pub request_size: u64,
    #[serde(default)]
    pub response_size: u64,
}

impl CompletedRequest {
    /// Bytes sent plus bytes received.
    pub fn bytes_exchanged(&self) -> u64 {
        self.request_size.saturating_add(self.response_size)
    }
}

/// One tracker request attributed to a session. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct TrackerRequestRecord {
    pub session_id: SessionId,
    pub hostname: String,
    #[cfg_attr(feature = "ts", ts(type = "number"))]
    pub bytes_exchanged: u64,
}

/// An open tab as enumerated at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabSnapshot {
    pub tab_id: TabId,
    #[serde(default)]
    pub url: Option<String>,
}

// =============================================================================
// Aggregates
// =============================================================================

/// Running total for a visited domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct DomainTotal {
    pub domain: String,
    #[cfg_attr(feature = "ts", ts(type = "number"))]
    pub bytes_exchanged: u64,
}

/// Running total for a tracker host since this browser start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct TrackerTotal {
    pub hostname: String,
    #[cfg_attr(feature = "ts", ts(type = "number"))]
    pub bytes_exchanged: u64,
}

/// Running total for one tracker seen while visiting one domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct DomainTrackerTotal {
    pub domain: String,
    pub hostname: String,
    #[cfg_attr(feature = "ts", ts(type = "number"))]
    pub bytes_exchanged: u64,
}

/// A slice of the domain ranking around one domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct RankWindow {
    /// 1-based rank of the first entry
    pub start_rank: usize,
    pub entries: Vec<DomainTotal>,
}

impl RankWindow {
    pub fn empty() -> Self {
        Self {
            start_rank: 1,
            entries: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }

    #[test]
    fn test_archive_never_ends_before_start() {
        let session = ActiveSession::new(4, "example.com", 1_000);
        let id = session.session_id.clone();
        let archived = session.archive(900);
        assert_eq!(archived.session_id, id);
        assert_eq!(archived.start_time, 1_000);
        assert_eq!(archived.end_time, 1_000);
    }

    #[test]
    fn test_bytes_exchanged_saturates() {
        let request = CompletedRequest {
            url: "https://ads.tracker.net/p".into(),
            tab_id: 1,
            method: "GET".into(),
            from_cache: false,
            request_size: u64::MAX,
            response_size: 10,
        };
        assert_eq!(request.bytes_exchanged(), u64::MAX);
    }

    #[test]
    fn test_completed_request_camel_case() {
        let json = r#"{"url":"https://a.b.com/","tabId":3,"fromCache":true,"requestSize":5}"#;
        let request: CompletedRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.tab_id, 3);
        assert!(request.from_cache);
        assert_eq!(request.bytes_exchanged(), 5);
        assert_eq!(request.method, "");
    }
}
