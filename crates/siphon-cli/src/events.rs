//! Recorded browser events, one JSON object per line.
//!
//! ```text
//! {"type":"startup","timestamp":0,"tabs":[{"tabId":1,"url":"https://example.com/"}]}
//! {"type":"installed","timestamp":5,"tabs":[{"tabId":2,"url":"https://shop.example.co.th/"}]}
//! {"type":"navigation","timestamp":10,"tabId":1,"url":"https://news.example.com/"}
//! {"type":"requestCompleted","timestamp":12,"tabId":1,"url":"https://ads.tracker.net/p","requestSize":300,"responseSize":1200}
//! {"type":"tabClosed","timestamp":90,"tabId":1}
//! ```

use serde::Deserialize;

use siphon_core::types::{CompletedRequest, TabId, TabSnapshot, Timestamp};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum BrowserEvent {
    Startup {
        timestamp: Timestamp,
        #[serde(default)]
        tabs: Vec<TabSnapshot>,
    },
    Installed {
        timestamp: Timestamp,
        #[serde(default)]
        tabs: Vec<TabSnapshot>,
    },
    Navigation {
        timestamp: Timestamp,
        tab_id: TabId,
        #[serde(default)]
        url: Option<String>,
    },
    TabClosed {
        timestamp: Timestamp,
        tab_id: TabId,
    },
    RequestCompleted {
        timestamp: Timestamp,
        #[serde(flatten)]
        request: CompletedRequest,
    },
}

impl BrowserEvent {
    pub fn timestamp(&self) -> Timestamp {
        match self {
            BrowserEvent::Startup { timestamp, .. }
            | BrowserEvent::Installed { timestamp, .. }
            | BrowserEvent::Navigation { timestamp, .. }
            | BrowserEvent::TabClosed { timestamp, .. }
            | BrowserEvent::RequestCompleted { timestamp, .. } => *timestamp,
        }
    }
}

/// Parse a JSON-lines event log. Blank lines are skipped.
pub fn parse_events(text: &str) -> Result<Vec<BrowserEvent>, String> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line).map_err(|e| format!("Line {}: {}", idx + 1, e))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_events() {
        let text = r#"
{"type":"startup","timestamp":0,"tabs":[{"tabId":1,"url":"https://example.com/"},{"tabId":2}]}
{"type":"installed","timestamp":1}
{"type":"navigation","timestamp":10,"tabId":1,"url":"https://news.example.com/"}
{"type":"navigation","timestamp":11,"tabId":2}

{"type":"requestCompleted","timestamp":12,"tabId":1,"url":"https://ads.tracker.net/p","fromCache":true,"requestSize":300,"responseSize":1200}
{"type":"tabClosed","timestamp":90,"tabId":1}
"#;
        let events = parse_events(text).unwrap();
        assert_eq!(events.len(), 6);

        let BrowserEvent::Startup { tabs, .. } = &events[0] else { panic!("expected startup") };
        assert_eq!(tabs.len(), 2);
        assert_eq!(tabs[1].url, None);

        assert_eq!(
            events[3],
            BrowserEvent::Navigation { timestamp: 11, tab_id: 2, url: None }
        );

        let BrowserEvent::RequestCompleted { request, timestamp } = &events[4] else { panic!("expected request") };
        assert_eq!(*timestamp, 12);
        assert!(request.from_cache);
        assert_eq!(request.bytes_exchanged(), 1500);
        assert_eq!(events[5].timestamp(), 90);
    }

    #[test]
    fn test_parse_error_names_line() {
        let err = parse_events("{\"type\":\"installed\",\"timestamp\":1}\n{\"type\":\"unknown\"}").unwrap_err();
        assert!(err.starts_with("Line 2:"), "{}", err);
    }
}
