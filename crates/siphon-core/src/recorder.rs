//! Request classification and recording
//!
//! Decides whether a completed request is tracker traffic attributable to a
//! tab's session and, if so, hands it to the store as one atomic update.

use std::collections::HashSet;
use std::hash::BuildHasher;

use crate::blocklist::TrackerListCache;
use crate::session::SessionLookup;
use crate::store::{AggregateStore, StoreError};
use crate::types::{CompletedRequest, TabId, TrackerRequestRecord, NO_TAB};
use crate::url::hostname;

/// Membership test against the current tracker list.
pub trait TrackerClassifier {
    fn is_tracker(&self, hostname: &str) -> bool;
}

impl TrackerClassifier for TrackerListCache {
    fn is_tracker(&self, hostname: &str) -> bool {
        TrackerListCache::is_tracker(self, hostname)
    }
}

impl<S: BuildHasher> TrackerClassifier for HashSet<String, S> {
    fn is_tracker(&self, hostname: &str) -> bool {
        self.contains(hostname)
    }
}

/// Why a request was not recorded. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    FromCache,
    NoTab,
    UnresolvableHost,
    ZeroBytes,
    NotTracker,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded {
        domain: String,
        record: TrackerRequestRecord,
    },
    Skipped(SkipReason),
}

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("No active session for tab {0}")]
    NoSession(TabId),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Classify `request` and record it against its tab's session.
pub fn record_request(
    request: &CompletedRequest,
    sessions: &dyn SessionLookup,
    trackers: &dyn TrackerClassifier,
    store: &dyn AggregateStore,
) -> Result<RecordOutcome, RecordError> {
    if request.from_cache {
        return Ok(RecordOutcome::Skipped(SkipReason::FromCache));
    }
    if request.tab_id == NO_TAB {
        return Ok(RecordOutcome::Skipped(SkipReason::NoTab));
    }

    let Some(host) = hostname(&request.url) else {
        return Ok(RecordOutcome::Skipped(SkipReason::UnresolvableHost));
    };
    let host = host.to_ascii_lowercase();
    let host = host.trim_end_matches('.');

    let session = sessions
        .active_session(request.tab_id)
        .ok_or(RecordError::NoSession(request.tab_id))?;

    let bytes = request.bytes_exchanged();
    if bytes == 0 {
        return Ok(RecordOutcome::Skipped(SkipReason::ZeroBytes));
    }

    // The listener filter may predate the latest list refresh
    if !trackers.is_tracker(host) {
        return Ok(RecordOutcome::Skipped(SkipReason::NotTracker));
    }

    let record = TrackerRequestRecord {
        session_id: session.session_id.clone(),
        hostname: host.to_string(),
        bytes_exchanged: bytes,
    };
    store.record_tracker_request(&session.domain, &record)?;

    Ok(RecordOutcome::Recorded {
        domain: session.domain.clone(),
        record,
    })
}
