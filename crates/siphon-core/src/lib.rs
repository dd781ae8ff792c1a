//! Siphon Core Library
//!
//! This crate provides the session tracking and aggregation engine behind the
//! Siphon browser add-on. It watches which registrable domain each tab is
//! showing, classifies completed network requests against a tracker block-list
//! and keeps running byte totals per visited domain, per tracker and per
//! domain/tracker pair.
//!
//! # Architecture
//!
//! The engine is driven by browser events (navigation, tab close, request
//! completion, startup). All in-memory state lives in an explicit [`Engine`]
//! value; durable state lives behind the [`store::AggregateStore`] trait, with
//! a SQLite implementation for native builds and an in-memory implementation
//! for the WebAssembly build.
//!
//! # Modules
//!
//! - `url`: hostname extraction and match-pattern formatting
//! - `psl`: public-suffix-aware registrable domain resolution
//! - `blocklist`: tracker host list parsing, caching and refresh
//! - `session`: per-tab session state machine
//! - `recorder`: request classification and recording
//! - `store`: aggregate tables and ranking queries
//! - `engine`: event handlers wiring everything together
//! - `settings`: persisted key/value preferences
//! - `types`: shared data model

pub mod blocklist;
pub mod clock;
pub mod engine;
pub mod psl;
pub mod ranking;
pub mod recorder;
pub mod session;
pub mod settings;
pub mod store;
pub mod types;
pub mod units;
pub mod url;

// Re-export commonly used types
pub use blocklist::{FetchResponse, ListError, ListSource, TrackerListCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::Engine;
pub use psl::DomainResolver;
pub use recorder::{RecordError, RecordOutcome, SkipReason, TrackerClassifier};
pub use session::{SessionChange, SessionLookup, SessionTracker};
pub use store::{AggregateStore, MemoryStore, SettingsStore, StoreError};
#[cfg(feature = "sqlite")]
pub use store::SqliteStore;
pub use types::{
    ActiveSession, ArchivedSession, CompletedRequest, DomainTotal, DomainTrackerTotal, RankWindow,
    SessionId, TabId, TabSnapshot, TrackerRequestRecord, TrackerTotal,
};
