//! WebAssembly bindings for Siphon
//!
//! The extension's background script owns one [`Siphon`] value and forwards
//! browser events to it. Fetching the tracker list and persisting the store
//! snapshot stay in JavaScript; everything else runs here.

use serde::de::DeserializeOwned;
use serde::Serialize;
use wasm_bindgen::prelude::*;

use siphon_core::{
    clock::Clock,
    settings,
    store::normalize_domain,
    types::Timestamp,
    units::format_bytes,
    url::hostname,
    AggregateStore, CompletedRequest, Engine, FetchResponse, MemoryStore,
    SessionId, TabSnapshot,
};

#[wasm_bindgen(start)]
pub fn start() {
    console_error_panic_hook::set_once();
    wasm_logger::init(wasm_logger::Config::default());
}

/// Browser wall clock.
struct JsClock;

impl Clock for JsClock {
    fn now_millis(&self) -> Timestamp {
        js_sys::Date::now() as Timestamp
    }
}

fn js_error(e: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&e.to_string())
}

fn to_js<T: Serialize>(value: &T) -> Result<JsValue, JsValue> {
    let json = serde_json::to_string(value).map_err(js_error)?;
    js_sys::JSON::parse(&json)
}

fn from_js<T: DeserializeOwned>(value: &JsValue) -> Result<T, JsValue> {
    let json: String = js_sys::JSON::stringify(value)?.into();
    serde_json::from_str(&json).map_err(js_error)
}

#[wasm_bindgen]
pub struct Siphon {
    engine: Engine<MemoryStore, JsClock>,
}

#[wasm_bindgen]
impl Siphon {
    /// Create an engine, restoring a snapshot from `export_state` if given.
    #[wasm_bindgen(constructor)]
    pub fn new(state: Option<String>) -> Result<Siphon, JsValue> {
        let store = match state.as_deref() {
            Some(json) if !json.is_empty() => MemoryStore::from_json(json).map_err(js_error)?,
            _ => MemoryStore::new(),
        };
        Ok(Siphon {
            engine: Engine::new(store, JsClock),
        })
    }

    /// Replace the built-in suffix data with a newer `public_suffix_list.dat`.
    /// The text must keep the `// ===BEGIN ICANN DOMAINS===` section markers.
    pub fn load_public_suffix_list(&mut self, text: &str) -> Result<(), JsValue> {
        self.engine.resolver_mut().replace_list(text).map_err(js_error)
    }

    // =========================================================================
    // Browser Events
    // =========================================================================

    /// `tabs` is an array of `{ tabId, url }`. Returns `true` when the caller
    /// should fetch the tracker list.
    pub fn on_startup(&mut self, tabs: JsValue) -> Result<bool, JsValue> {
        let tabs: Vec<TabSnapshot> = from_js(&tabs)?;
        Ok(self.engine.on_startup(&tabs))
    }

    /// `tabs` is an array of `{ tabId, url }`. Returns the number of sessions
    /// opened; the caller should then fetch the tracker list.
    pub fn on_installed(&mut self, tabs: JsValue) -> Result<u32, JsValue> {
        let tabs: Vec<TabSnapshot> = from_js(&tabs)?;
        Ok(self.engine.on_installed(&tabs) as u32)
    }

    pub fn on_navigation(&mut self, tab_id: i32, url: Option<String>) {
        self.engine.on_navigation(tab_id, url.as_deref());
    }

    pub fn on_tab_closed(&mut self, tab_id: i32) {
        self.engine.on_tab_closed(tab_id);
    }

    /// `details` is the `webRequest.onCompleted` details object. Returns
    /// whether the request was recorded.
    pub fn on_request_completed(&mut self, details: JsValue) -> Result<bool, JsValue> {
        let request: CompletedRequest = from_js(&details)?;
        Ok(self.engine.on_request_completed(&request).is_some())
    }

    // =========================================================================
    // Tracker List
    // =========================================================================

    /// Publish a fetched list response. Returns the number of hosts.
    pub fn apply_tracker_list(&mut self, status: u16, reason: String, body: String) -> Result<u32, JsValue> {
        let count = self
            .engine
            .apply_tracker_list(FetchResponse { status, reason, body })
            .map_err(js_error)?;
        Ok(count as u32)
    }

    /// Call `callback(patterns)` whenever a tracker list is published, so the
    /// request listener can be re-registered with the new filter.
    pub fn set_patterns_listener(&mut self, callback: js_sys::Function) {
        self.engine.on_tracker_list_ready(Box::new(move |patterns: &[String]| {
            let array: js_sys::Array = patterns.iter().map(|p| JsValue::from_str(p)).collect();
            if let Err(e) = callback.call1(&JsValue::NULL, &array) {
                log::error!("Patterns listener failed");
                web_sys::console::error_1(&e);
            }
        }));
    }

    pub fn match_patterns(&self) -> js_sys::Array {
        self.engine
            .trackers()
            .match_patterns()
            .iter()
            .map(|p| JsValue::from_str(p))
            .collect()
    }

    pub fn is_tracker_list_ready(&self) -> bool {
        self.engine.trackers().is_ready()
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn active_session(&self, tab_id: i32) -> Result<JsValue, JsValue> {
        match self.engine.active_session(tab_id) {
            Some(session) => to_js(session),
            None => Ok(JsValue::NULL),
        }
    }

    pub fn top_trackers(&self, n: usize) -> Result<JsValue, JsValue> {
        to_js(&self.engine.store().top_trackers(n).map_err(js_error)?)
    }

    pub fn top_trackers_on(&self, domain: &str, n: usize) -> Result<JsValue, JsValue> {
        let domain = normalize_domain(domain);
        to_js(&self.engine.store().top_trackers_on(&domain, n).map_err(js_error)?)
    }

    pub fn top_domains(&self, n: usize) -> Result<JsValue, JsValue> {
        to_js(&self.engine.store().top_domains(n).map_err(js_error)?)
    }

    pub fn neighboring_ranks(&self, domain: &str) -> Result<JsValue, JsValue> {
        let domain = normalize_domain(domain);
        to_js(&self.engine.store().neighboring_ranks(&domain).map_err(js_error)?)
    }

    pub fn domain_total(&self, domain: &str) -> Result<JsValue, JsValue> {
        let domain = normalize_domain(domain);
        to_js(&self.engine.store().domain_total(&domain).map_err(js_error)?)
    }

    pub fn tracker_total(&self, hostname: &str) -> Result<JsValue, JsValue> {
        to_js(&self.engine.store().tracker_total(hostname).map_err(js_error)?)
    }

    pub fn total_bytes_sent_during_session(&self, session_id: &str) -> Result<f64, JsValue> {
        let total = self
            .engine
            .store()
            .total_bytes_sent_during_session(&SessionId::from(session_id))
            .map_err(js_error)?;
        Ok(total as f64)
    }

    pub fn unique_hosts_connected_during(&self, session_id: &str) -> Result<js_sys::Array, JsValue> {
        let hosts = self
            .engine
            .store()
            .unique_hosts_connected_during(&SessionId::from(session_id))
            .map_err(js_error)?;
        Ok(hosts.iter().map(|h| JsValue::from_str(h)).collect())
    }

    pub fn all_sessions_between(&self, start: f64, end: f64, domain: Option<String>) -> Result<JsValue, JsValue> {
        let domain = domain.as_deref().map(normalize_domain);
        let sessions = self
            .engine
            .store()
            .all_sessions_between(start as Timestamp, end as Timestamp, domain.as_deref())
            .map_err(js_error)?;
        to_js(&sessions)
    }

    // =========================================================================
    // Settings and State
    // =========================================================================

    pub fn dark_theme(&self) -> bool {
        settings::dark_theme(self.engine.store())
    }

    pub fn set_dark_theme(&self, dark: bool) -> Result<(), JsValue> {
        settings::set_dark_theme(self.engine.store(), dark).map_err(js_error)
    }

    /// Serialize the store for `browser.storage.local`.
    pub fn export_state(&self) -> Result<String, JsValue> {
        self.engine.store().to_json().map_err(js_error)
    }

    pub fn get_status(&self) -> JsValue {
        let result = js_sys::Object::new();
        let _ = js_sys::Reflect::set(&result, &"activeSessions".into(), &JsValue::from(self.engine.sessions().len() as u32));
        let _ = js_sys::Reflect::set(&result, &"trackerHosts".into(), &JsValue::from(self.engine.trackers().hosts().len() as u32));
        let _ = js_sys::Reflect::set(&result, &"listReady".into(), &JsValue::from(self.engine.trackers().is_ready()));
        let _ = js_sys::Reflect::set(&result, &"archivedSessions".into(), &JsValue::from(self.engine.store().archived_session_count() as u32));
        result.into()
    }
}

#[wasm_bindgen]
pub fn hostname_js(url: &str) -> Option<String> {
    hostname(url).map(|h| h.to_string())
}

#[wasm_bindgen]
pub fn format_bytes_js(bytes: f64) -> String {
    format_bytes(bytes.max(0.0) as u64)
}

