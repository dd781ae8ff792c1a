//! Event handlers
//!
//! [`Engine`] owns every piece of in-memory state (resolver, sessions,
//! tracker list) plus the store and clock, and exposes one handler per
//! browser event. Handlers never fail: problems are logged and the event is
//! dropped, so a bad write degrades statistics without stopping the
//! extension.

use log::{debug, error, info, warn};

use crate::blocklist::{FetchResponse, ListError, ListSource, ReadyListener, TrackerListCache};
use crate::clock::{Clock, SystemClock};
use crate::psl::DomainResolver;
use crate::recorder::{record_request, RecordError, RecordOutcome};
use crate::session::{SessionChange, SessionLookup, SessionTracker};
use crate::store::{AggregateStore, SettingsStore};
use crate::types::{ActiveSession, CompletedRequest, SessionId, TabId, TabSnapshot, TrackerRequestRecord};

pub struct Engine<S, C = SystemClock> {
    resolver: DomainResolver,
    sessions: SessionTracker,
    trackers: TrackerListCache,
    store: S,
    clock: C,
}

impl<S> Engine<S, SystemClock>
where
    S: AggregateStore + SettingsStore,
{
    pub fn with_store(store: S) -> Self {
        Self::new(store, SystemClock)
    }
}

impl<S, C> Engine<S, C>
where
    S: AggregateStore + SettingsStore,
    C: Clock,
{
    pub fn new(store: S, clock: C) -> Self {
        Self {
            resolver: DomainResolver::new(),
            sessions: SessionTracker::new(),
            trackers: TrackerListCache::new(),
            store,
            clock,
        }
    }

    /// Swap in a resolver built from a full public suffix list.
    pub fn with_resolver(mut self, resolver: DomainResolver) -> Self {
        self.resolver = resolver;
        self
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Browser startup: reset the per-run tracker totals, restore the stored
    /// tracker list and open sessions for tabs that are already showing a
    /// page. Returns `true` when no stored list was found and the caller
    /// should fetch one.
    pub fn on_startup(&mut self, tabs: &[TabSnapshot]) -> bool {
        if let Err(e) = self.store.clear_tracker_totals() {
            warn!("Failed to clear tracker totals ({})", e);
        }

        let restored = self.trackers.is_ready() || self.trackers.restore(&self.store);

        let now = self.clock.now_millis();
        let opened = self.sessions.adopt_open_tabs(tabs, &self.resolver, now);
        info!("Startup: {} open tabs, {} sessions started", tabs.len(), opened);

        !restored
    }

    /// Extension install or update: open sessions for tabs that are already
    /// showing a page. Returns the number of sessions opened. Install always
    /// replaces the tracker list, so the caller follows up with
    /// [`refresh_tracker_list`](Self::refresh_tracker_list) or
    /// [`apply_tracker_list`](Self::apply_tracker_list).
    pub fn on_installed(&mut self, tabs: &[TabSnapshot]) -> usize {
        let now = self.clock.now_millis();
        let opened = self.sessions.adopt_open_tabs(tabs, &self.resolver, now);
        info!("Installed: {} open tabs, {} sessions started", tabs.len(), opened);
        opened
    }

    /// Restore the stored list, fetching it from `source` when absent.
    pub async fn load_tracker_list<L: ListSource>(&mut self, source: &L) -> bool {
        self.trackers.load(&self.store, source).await
    }

    /// Fetch a fresh list from `source`. Used on install and on demand.
    pub async fn refresh_tracker_list<L: ListSource>(&mut self, source: &L) -> Result<usize, ListError> {
        self.trackers.refresh(&self.store, source).await
    }

    /// Publish a list response fetched outside the engine.
    pub fn apply_tracker_list(&mut self, response: FetchResponse) -> Result<usize, ListError> {
        self.trackers.apply_response(&self.store, response)
    }

    /// Run `listener` with the new match patterns every time a list is
    /// published. If a list is already loaded the listener runs at once.
    pub fn on_tracker_list_ready(&mut self, mut listener: ReadyListener) {
        if self.trackers.is_ready() {
            listener(&self.trackers.match_patterns());
        }
        self.trackers.on_ready(listener);
    }

    // =========================================================================
    // Browser Events
    // =========================================================================

    pub fn on_navigation(&mut self, tab_id: TabId, url: Option<&str>) -> SessionChange {
        let now = self.clock.now_millis();
        self.sessions.navigate(tab_id, url, &self.resolver, now, &self.store)
    }

    pub fn on_tab_closed(&mut self, tab_id: TabId) -> Option<SessionId> {
        let now = self.clock.now_millis();
        self.sessions.close(tab_id, now, &self.store)
    }

    /// Record a completed request if it is tracker traffic. Returns the
    /// stored record, if any.
    pub fn on_request_completed(&mut self, request: &CompletedRequest) -> Option<TrackerRequestRecord> {
        match record_request(request, &self.sessions, &self.trackers, &self.store) {
            Ok(RecordOutcome::Recorded { domain, record }) => {
                debug!(
                    "Recorded {} bytes to {} while on {}",
                    record.bytes_exchanged, record.hostname, domain
                );
                Some(record)
            }
            Ok(RecordOutcome::Skipped(reason)) => {
                debug!("Skipped request to {} ({:?})", request.url, reason);
                None
            }
            Err(RecordError::NoSession(tab_id)) => {
                error!("Request to {} from tab {} with no session", request.url, tab_id);
                None
            }
            Err(RecordError::Store(e)) => {
                error!("Failed to record request to {} ({})", request.url, e);
                None
            }
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn active_session(&self, tab_id: TabId) -> Option<&ActiveSession> {
        self.sessions.active_session(tab_id)
    }

    pub fn sessions(&self) -> &SessionTracker {
        &self.sessions
    }

    pub fn trackers(&self) -> &TrackerListCache {
        &self.trackers
    }

    pub fn resolver(&self) -> &DomainResolver {
        &self.resolver
    }

    pub fn resolver_mut(&mut self) -> &mut DomainResolver {
        &mut self.resolver
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn into_store(self) -> S {
        self.store
    }
}
