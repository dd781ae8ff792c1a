/// SQL DDL for the Siphon store.
/// WAL mode enabled at connection time.
pub const SCHEMA_VERSION: u32 = 1;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS tracker_requests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    hostname TEXT NOT NULL,
    bytes_exchanged INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS domain_sessions (
    session_id TEXT PRIMARY KEY,
    tab_id INTEGER NOT NULL,
    domain TEXT NOT NULL,
    start_time INTEGER NOT NULL,
    end_time INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS domain_tracker_totals (
    domain TEXT NOT NULL,
    hostname TEXT NOT NULL,
    bytes_exchanged INTEGER NOT NULL,
    PRIMARY KEY (domain, hostname)
);

CREATE TABLE IF NOT EXISTS domain_totals (
    domain TEXT PRIMARY KEY,
    bytes_exchanged INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS tracker_totals_volatile (
    hostname TEXT PRIMARY KEY,
    bytes_exchanged INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tracker_requests_session ON tracker_requests(session_id);
CREATE INDEX IF NOT EXISTS idx_tracker_requests_hostname ON tracker_requests(hostname);
CREATE INDEX IF NOT EXISTS idx_domain_sessions_domain ON domain_sessions(domain);
CREATE INDEX IF NOT EXISTS idx_domain_sessions_start ON domain_sessions(start_time);
CREATE INDEX IF NOT EXISTS idx_domain_tracker_totals_bytes ON domain_tracker_totals(domain, bytes_exchanged);
CREATE INDEX IF NOT EXISTS idx_domain_totals_bytes ON domain_totals(bytes_exchanged);
CREATE INDEX IF NOT EXISTS idx_tracker_totals_volatile_bytes ON tracker_totals_volatile(bytes_exchanged);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

pub const PRAGMAS: &str = r#"
PRAGMA busy_timeout = 5000;
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
"#;
