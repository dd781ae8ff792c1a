use std::fs;
use std::path::Path;

use log::warn;
use siphon_core::{DomainResolver, Engine, ListSource, ManualClock, SqliteStore};

use crate::events::{parse_events, BrowserEvent};

pub struct ReplayOptions<'a, L> {
    pub events: &'a str,
    pub db: &'a str,
    pub psl: Option<&'a str>,
    pub source: &'a L,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub events: usize,
    pub sessions_started: usize,
    pub sessions_ended: usize,
    pub requests_recorded: usize,
    pub list_refreshes: usize,
}

/// The built-in resolver, or one built from a full suffix list file.
pub fn load_resolver(psl: Option<&str>) -> Result<DomainResolver, String> {
    let Some(path) = psl else {
        return Ok(DomainResolver::new());
    };
    let text = fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path, e))?;
    DomainResolver::from_list_text(&text).map_err(|e| format!("Invalid suffix list '{}': {}", path, e))
}

pub fn open_engine(db: &str, psl: Option<&str>, start: i64) -> Result<Engine<SqliteStore, ManualClock>, String> {
    let store = SqliteStore::open(Path::new(db)).map_err(|e| format!("Failed to open '{}': {}", db, e))?;
    Ok(Engine::new(store, ManualClock::new(start)).with_resolver(load_resolver(psl)?))
}

pub fn run_replay<L: ListSource>(opts: ReplayOptions<'_, L>) -> Result<ReplaySummary, String> {
    let text = fs::read_to_string(opts.events).map_err(|e| format!("Failed to read '{}': {}", opts.events, e))?;
    let events = parse_events(&text)?;

    let start = events.first().map(BrowserEvent::timestamp).unwrap_or_default();
    let mut engine = open_engine(opts.db, opts.psl, start)?;

    let runtime = tokio::runtime::Runtime::new().map_err(|e| format!("Failed to start tokio runtime: {}", e))?;
    runtime.block_on(replay_events(&mut engine, events, opts.source))
}

async fn replay_events<L: ListSource>(
    engine: &mut Engine<SqliteStore, ManualClock>,
    events: Vec<BrowserEvent>,
    source: &L,
) -> Result<ReplaySummary, String> {
    use siphon_core::SessionChange;

    let mut summary = ReplaySummary::default();

    for event in events {
        engine.clock().set(event.timestamp());
        summary.events += 1;

        match event {
            BrowserEvent::Startup { tabs, .. } => {
                let before = engine.sessions().len();
                if engine.on_startup(&tabs) {
                    match engine.refresh_tracker_list(source).await {
                        Ok(_) => summary.list_refreshes += 1,
                        Err(e) => warn!("Continuing without a tracker list ({})", e),
                    }
                }
                summary.sessions_started += engine.sessions().len().saturating_sub(before);
            }
            BrowserEvent::Installed { tabs, .. } => {
                summary.sessions_started += engine.on_installed(&tabs);
                match engine.refresh_tracker_list(source).await {
                    Ok(_) => summary.list_refreshes += 1,
                    Err(e) => warn!("Continuing with the previous tracker list ({})", e),
                }
            }
            BrowserEvent::Navigation { tab_id, url, .. } => match engine.on_navigation(tab_id, url.as_deref()) {
                SessionChange::Started(_) => summary.sessions_started += 1,
                SessionChange::Replaced { .. } => {
                    summary.sessions_started += 1;
                    summary.sessions_ended += 1;
                }
                SessionChange::Ended(_) => summary.sessions_ended += 1,
                SessionChange::Continued(_) | SessionChange::Unchanged => {}
            },
            BrowserEvent::TabClosed { tab_id, .. } => {
                if engine.on_tab_closed(tab_id).is_some() {
                    summary.sessions_ended += 1;
                }
            }
            BrowserEvent::RequestCompleted { request, .. } => {
                if engine.on_request_completed(&request).is_some() {
                    summary.requests_recorded += 1;
                }
            }
        }
    }

    Ok(summary)
}
