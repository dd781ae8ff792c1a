//! Tracker block-list cache
//!
//! Holds the current list of tracker hostnames. The list is restored from the
//! settings store when present, otherwise fetched once from a remote source,
//! parsed, persisted and published. Listeners registered with
//! [`TrackerListCache::on_ready`] are told about every new list, which is how
//! the request subscription gets re-established.

use std::collections::HashSet;
use std::future::Future;
use std::hash::BuildHasherDefault;

use log::{debug, error, info, warn};
use twox_hash::XxHash64;

use crate::settings::SettingsStore;
use crate::url::match_pattern;

/// Where the tracker list is fetched from.
pub const DEFAULT_LIST_URL: &str = "https://v.firebog.net/hosts/Easyprivacy.txt";

/// Settings key the list is persisted under.
pub const BLOCKLIST_KEY: &str = "siphonFlaggedHosts";

type HostSet = HashSet<String, BuildHasherDefault<XxHash64>>;

/// Callback invoked with the match patterns of a freshly published list.
pub type ReadyListener = Box<dyn FnMut(&[String])>;

/// Error type for list refresh.
#[derive(Debug, thiserror::Error)]
pub enum ListError {
    #[error("Failed to fetch list ({status} {reason})")]
    Status { status: u16, reason: String },
    #[error("Network error: {0}")]
    Network(String),
    #[error("List contained no hostnames")]
    Empty,
}

/// Lifecycle of the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListState {
    Empty,
    Loading,
    Ready,
}

/// A raw HTTP response for the list resource.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub reason: String,
    pub body: String,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Something that can fetch the remote list.
pub trait ListSource {
    /// Fetch the list once. Transport failures map to [`ListError::Network`].
    fn fetch(&self) -> impl Future<Output = Result<FetchResponse, ListError>>;
}

// =============================================================================
// Parsing
// =============================================================================

/// Parse a newline-delimited host list.
///
/// Accepts plain hostnames and hosts-file lines, skips comments and blank
/// lines, lower-cases entries and keeps the first occurrence of duplicates.
pub fn parse_host_list(text: &str) -> Vec<String> {
    let mut seen = HostSet::default();
    let mut hosts = Vec::new();

    for line in text.lines() {
        if let Some(host) = extract_host(line) {
            let host = host.to_ascii_lowercase();
            if seen.insert(host.clone()) {
                hosts.push(host);
            }
        }
    }

    hosts
}

fn extract_host(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('!') {
        return None;
    }

    // Inline comment
    let trimmed = match trimmed.find('#') {
        Some(pos) => trimmed[..pos].trim_end(),
        None => trimmed,
    };

    let mut parts = trimmed.split_whitespace();
    let first = parts.next()?;
    let host = if first == "0.0.0.0" || first == "127.0.0.1" || first == "::" {
        parts.next()?
    } else {
        first
    };

    if host.contains('.') && !host.contains('*') && !host.contains('/') && host != "0.0.0.0" {
        Some(host)
    } else {
        None
    }
}

// =============================================================================
// Cache
// =============================================================================

/// In-memory tracker list with persistence and change notification.
pub struct TrackerListCache {
    state: ListState,
    hosts: Vec<String>,
    index: HostSet,
    listeners: Vec<ReadyListener>,
}

impl TrackerListCache {
    pub fn new() -> Self {
        Self {
            state: ListState::Empty,
            hosts: Vec::new(),
            index: HostSet::default(),
            listeners: Vec::new(),
        }
    }

    pub fn state(&self) -> ListState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ListState::Ready
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    /// True only once the list is ready and contains `hostname`.
    pub fn is_tracker(&self, hostname: &str) -> bool {
        self.state == ListState::Ready && self.index.contains(hostname)
    }

    /// `*://host/*` patterns for every listed host; empty until ready.
    pub fn match_patterns(&self) -> Vec<String> {
        if self.state != ListState::Ready {
            return Vec::new();
        }
        self.hosts.iter().map(|host| match_pattern(host)).collect()
    }

    /// Register a callback run after every transition to `Ready`.
    pub fn on_ready(&mut self, listener: ReadyListener) {
        self.listeners.push(listener);
    }

    /// Restore the persisted list. Returns `false` when there is none and a
    /// refresh is needed.
    pub fn restore(&mut self, settings: &dyn SettingsStore) -> bool {
        let stored = match settings.get_value(BLOCKLIST_KEY) {
            Ok(Some(value)) => value,
            Ok(None) => {
                debug!("No stored tracker list");
                return false;
            }
            Err(e) => {
                warn!("Failed to read stored tracker list ({})", e);
                return false;
            }
        };

        let hosts: Vec<String> = match serde_json::from_value(stored) {
            Ok(hosts) => hosts,
            Err(e) => {
                warn!("Stored tracker list is malformed ({})", e);
                return false;
            }
        };
        if hosts.is_empty() {
            return false;
        }

        info!("Found stored tracker list with {} hosts", hosts.len());
        self.publish(hosts);
        true
    }

    /// Restore the persisted list, fetching it when absent.
    pub async fn load<L: ListSource>(&mut self, settings: &dyn SettingsStore, source: &L) -> bool {
        if self.restore(settings) {
            return true;
        }
        self.refresh(settings, source).await.is_ok()
    }

    /// Fetch, parse, persist and publish the remote list. One attempt; on
    /// failure the previous state is kept.
    pub async fn refresh<L: ListSource>(
        &mut self,
        settings: &dyn SettingsStore,
        source: &L,
    ) -> Result<usize, ListError> {
        let prior = self.state;
        self.state = ListState::Loading;

        let response = match source.fetch().await {
            Ok(response) => response,
            Err(e) => {
                error!("Failed to get hosts ({})", e);
                self.state = prior;
                return Err(e);
            }
        };

        self.state = prior;
        self.apply_response(settings, response)
    }

    /// Apply a response fetched elsewhere (the extension shell fetches in the
    /// browser build).
    pub fn apply_response(
        &mut self,
        settings: &dyn SettingsStore,
        response: FetchResponse,
    ) -> Result<usize, ListError> {
        if !response.is_success() {
            let err = ListError::Status {
                status: response.status,
                reason: response.reason,
            };
            error!("Failed to get hosts ({})", err);
            return Err(err);
        }

        let hosts = parse_host_list(&response.body);
        if hosts.is_empty() {
            error!("Failed to get hosts ({})", ListError::Empty);
            return Err(ListError::Empty);
        }

        let count = hosts.len();
        info!("Fetched tracker list, read {} hosts", count);

        match serde_json::to_value(&hosts) {
            Ok(value) => match settings.set_value(BLOCKLIST_KEY, value) {
                Ok(()) => debug!("Saved hosts to storage"),
                Err(e) => warn!("Failed to save hosts ({})", e),
            },
            Err(e) => warn!("Failed to save hosts ({})", e),
        }

        self.publish(hosts);
        Ok(count)
    }

    fn publish(&mut self, hosts: Vec<String>) {
        self.index = hosts.iter().cloned().collect();
        self.hosts = hosts;
        self.state = ListState::Ready;

        let patterns = self.match_patterns();
        for listener in &mut self.listeners {
            listener(&patterns);
        }
    }
}

impl Default for TrackerListCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::store::MemoryStore;

    struct StaticSource(Result<FetchResponse, String>);

    impl ListSource for StaticSource {
        async fn fetch(&self) -> Result<FetchResponse, ListError> {
            self.0.clone().map_err(ListError::Network)
        }
    }

    fn ok(body: &str) -> StaticSource {
        StaticSource(Ok(FetchResponse {
            status: 200,
            reason: "OK".into(),
            body: body.into(),
        }))
    }

    #[test]
    fn test_parse_host_list_formats() {
        let text = "# EasyPrivacy\r\nads.tracker.net\r\n\n0.0.0.0 pixel.example.org\n127.0.0.1 Beacon.Example.org # inline\n! comment\nlocalhost\nADS.tracker.net\n";
        assert_eq!(
            parse_host_list(text),
            vec!["ads.tracker.net", "pixel.example.org", "beacon.example.org"]
        );
    }

    #[test]
    fn test_empty_until_ready() {
        let cache = TrackerListCache::new();
        assert_eq!(cache.state(), ListState::Empty);
        assert!(cache.match_patterns().is_empty());
        assert!(!cache.is_tracker("ads.tracker.net"));
    }

    #[tokio::test]
    async fn test_refresh_publishes_and_persists() {
        let store = MemoryStore::new();
        let mut cache = TrackerListCache::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        cache.on_ready(Box::new(move |patterns| sink.borrow_mut().push(patterns.to_vec())));

        let count = cache.refresh(&store, &ok("ads.tracker.net\nmetrics.example.com\n")).await.unwrap();

        assert_eq!(count, 2);
        assert!(cache.is_ready());
        assert!(cache.is_tracker("ads.tracker.net"));
        assert!(!cache.is_tracker("example.com"));
        assert_eq!(
            seen.borrow().as_slice(),
            &[vec!["*://ads.tracker.net/*".to_string(), "*://metrics.example.com/*".to_string()]]
        );

        let mut restored = TrackerListCache::new();
        assert!(restored.restore(&store));
        assert_eq!(restored.hosts(), cache.hosts());
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_prior_list() {
        let store = MemoryStore::new();
        let mut cache = TrackerListCache::new();
        cache.refresh(&store, &ok("ads.tracker.net\n")).await.unwrap();

        let not_found = StaticSource(Ok(FetchResponse {
            status: 404,
            reason: "Not Found".into(),
            body: String::new(),
        }));
        assert!(matches!(
            cache.refresh(&store, &not_found).await,
            Err(ListError::Status { status: 404, .. })
        ));
        assert!(cache.is_tracker("ads.tracker.net"));

        let offline = StaticSource(Err("connection refused".into()));
        assert!(matches!(cache.refresh(&store, &offline).await, Err(ListError::Network(_))));
        assert_eq!(cache.state(), ListState::Ready);

        assert!(matches!(cache.refresh(&store, &ok("# nothing\n")).await, Err(ListError::Empty)));
        assert_eq!(cache.hosts(), &["ads.tracker.net".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_first_refresh_stays_empty() {
        let store = MemoryStore::new();
        let mut cache = TrackerListCache::new();
        let offline = StaticSource(Err("timeout".into()));
        assert!(!cache.load(&store, &offline).await);
        assert_eq!(cache.state(), ListState::Empty);
    }

    #[tokio::test]
    async fn test_load_prefers_stored_list() {
        let store = MemoryStore::new();
        store
            .set_value(BLOCKLIST_KEY, serde_json::json!(["stored.tracker.io"]))
            .unwrap();
        let mut cache = TrackerListCache::new();
        assert!(cache.load(&store, &ok("fetched.tracker.io\n")).await);
        assert!(cache.is_tracker("stored.tracker.io"));
        assert!(!cache.is_tracker("fetched.tracker.io"));
    }
}
