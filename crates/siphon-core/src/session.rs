//! Per-tab visit sessions
//!
//! Each open tab showing a web page has exactly one active session, keyed to
//! the registrable domain on display. Moving to another domain, to a non-web
//! page, or closing the tab ends the session and archives it.
//!
//! Archiving is best-effort: if the durable write fails the session is still
//! dropped from the active set, so a tab never gets stuck on a dead session.

use std::collections::HashMap;

use log::{debug, info, warn};

use crate::psl::DomainResolver;
use crate::store::SessionArchive;
use crate::types::{ActiveSession, SessionId, TabId, TabSnapshot, Timestamp};

/// Read access to the active session of a tab.
pub trait SessionLookup {
    fn active_session(&self, tab_id: TabId) -> Option<&ActiveSession>;
}

/// What a navigation did to a tab's session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionChange {
    /// Non-web page and no session to end
    Unchanged,
    /// Same registrable domain; the visit goes on
    Continued(SessionId),
    Started(SessionId),
    Replaced { ended: SessionId, started: SessionId },
    /// Non-web page; the previous session was ended
    Ended(SessionId),
}

/// Owner of every active session.
#[derive(Debug, Default)]
pub struct SessionTracker {
    sessions: HashMap<TabId, ActiveSession>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a navigation of `tab_id` to `url` (or to no URL at all).
    pub fn navigate(
        &mut self,
        tab_id: TabId,
        url: Option<&str>,
        resolver: &DomainResolver,
        now: Timestamp,
        archive: &dyn SessionArchive,
    ) -> SessionChange {
        let domain = url.and_then(|url| resolver.registrable_domain(url));

        let Some(domain) = domain else {
            return match self.sessions.remove(&tab_id) {
                Some(previous) => {
                    let ended = previous.session_id.clone();
                    self.end(previous, now, archive);
                    SessionChange::Ended(ended)
                }
                None => SessionChange::Unchanged,
            };
        };

        if let Some(current) = self.sessions.get(&tab_id) {
            if current.domain == domain {
                debug!("Tab {} still on {}", tab_id, domain);
                return SessionChange::Continued(current.session_id.clone());
            }
        }

        let session = ActiveSession::new(tab_id, domain, now);
        let started = session.session_id.clone();
        info!("Started session {} on {} in tab {}", started, session.domain, tab_id);

        match self.sessions.insert(tab_id, session) {
            Some(previous) => {
                let ended = previous.session_id.clone();
                self.end(previous, now, archive);
                SessionChange::Replaced { ended, started }
            }
            None => SessionChange::Started(started),
        }
    }

    /// End the session of a closed tab, if it had one.
    pub fn close(
        &mut self,
        tab_id: TabId,
        now: Timestamp,
        archive: &dyn SessionArchive,
    ) -> Option<SessionId> {
        let previous = self.sessions.remove(&tab_id)?;
        let ended = previous.session_id.clone();
        self.end(previous, now, archive);
        Some(ended)
    }

    /// Open fresh sessions for tabs that were already open before tracking
    /// began. Tabs with a session, or without a web URL, are skipped.
    pub fn adopt_open_tabs(
        &mut self,
        tabs: &[TabSnapshot],
        resolver: &DomainResolver,
        now: Timestamp,
    ) -> usize {
        let mut opened = 0;
        for tab in tabs {
            if self.sessions.contains_key(&tab.tab_id) {
                continue;
            }
            let Some(domain) = tab.url.as_deref().and_then(|url| resolver.registrable_domain(url)) else {
                debug!("Skipping tab {} with no web page", tab.tab_id);
                continue;
            };
            let session = ActiveSession::new(tab.tab_id, domain, now);
            info!("Started session {} on {} in tab {}", session.session_id, session.domain, tab.tab_id);
            self.sessions.insert(tab.tab_id, session);
            opened += 1;
        }
        opened
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActiveSession> {
        self.sessions.values()
    }

    fn end(&self, session: ActiveSession, now: Timestamp, archive: &dyn SessionArchive) {
        let archived = session.archive(now);
        match archive.archive_session(&archived) {
            Ok(()) => info!(
                "Ended session {} on {} after {}ms",
                archived.session_id,
                archived.domain,
                archived.end_time - archived.start_time
            ),
            Err(e) => warn!("Failed to archive session {} ({})", archived.session_id, e),
        }
    }
}

impl SessionLookup for SessionTracker {
    fn active_session(&self, tab_id: TabId) -> Option<&ActiveSession> {
        self.sessions.get(&tab_id)
    }
}
