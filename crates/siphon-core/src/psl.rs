//! Public Suffix List (PSL) utilities for registrable domain extraction
//!
//! Resolves hostnames to their registrable domain (eTLD+1) with a bounded
//! memo. The full Public Suffix List is embedded; a newer copy can be swapped
//! in at runtime.
//!
//! # Examples
//!
//! ```
//! use siphon_core::psl::DomainResolver;
//!
//! let resolver = DomainResolver::new();
//! assert_eq!(resolver.etld1("sub.example.com"), "example.com");
//! assert_eq!(resolver.etld1("sub.example.co.uk"), "example.co.uk");
//! ```

use std::collections::HashMap;
use std::net::IpAddr;

use log::warn;
use parking_lot::Mutex;
use publicsuffix::{List, Psl};

use crate::url::hostname;

/// Embedded copy of `public_suffix_list.dat`.
const BUILTIN_LIST: &str = include_str!("../data/public_suffix_list.dat");

/// Number of memoized eTLD+1 lookups.
pub const CACHE_CAPACITY: usize = 4096;

/// Error type for public suffix list loading.
#[derive(Debug, thiserror::Error)]
pub enum PslError {
    /// The text is not a `public_suffix_list.dat`. The parser requires the
    /// `// ===BEGIN ICANN DOMAINS===` section markers.
    #[error("Invalid public suffix list (expected PSL format with ICANN section markers): {0}")]
    InvalidList(String),
}

// =============================================================================
// Lookup Cache
// =============================================================================

/// Bounded memo of host -> registrable domain. Each entry carries the tick of
/// its last use; when full, the stalest entry is evicted.
struct LookupCache {
    capacity: usize,
    tick: u64,
    entries: HashMap<String, (String, u64)>,
}

impl LookupCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            tick: 0,
            entries: HashMap::with_capacity(capacity),
        }
    }

    fn get(&mut self, host: &str) -> Option<String> {
        self.tick += 1;
        let tick = self.tick;
        self.entries.get_mut(host).map(|(domain, used)| {
            *used = tick;
            domain.clone()
        })
    }

    fn insert(&mut self, host: String, domain: String) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&host) {
            let stalest = self
                .entries
                .iter()
                .min_by_key(|(_, (_, used))| *used)
                .map(|(key, _)| key.clone());
            if let Some(key) = stalest {
                self.entries.remove(&key);
            }
        }
        self.tick += 1;
        self.entries.insert(host, (domain, self.tick));
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

// =============================================================================
// Resolver
// =============================================================================

/// Second-level suffixes the heuristic knows about when no list is loaded.
const KNOWN_SECOND_LEVEL: &[&str] = &[
    "co.uk", "org.uk", "ac.uk", "gov.uk", "me.uk",
    "com.au", "net.au", "org.au", "edu.au", "gov.au",
    "co.jp", "ne.jp", "or.jp", "ac.jp",
    "co.nz", "net.nz", "org.nz",
    "com.br", "com.cn", "com.mx", "com.tw", "com.hk", "com.sg",
    "co.za", "co.in", "co.kr",
];

/// Maps URLs and hostnames to registrable domains.
pub struct DomainResolver {
    list: Option<List>,
    cache: Mutex<LookupCache>,
}

impl DomainResolver {
    /// Create a resolver backed by the embedded list.
    pub fn new() -> Self {
        let list = match parse_list(BUILTIN_LIST) {
            Ok(list) => Some(list),
            Err(e) => {
                warn!("Embedded suffix list unusable, using heuristic: {}", e);
                None
            }
        };
        Self {
            list,
            cache: Mutex::new(LookupCache::new(CACHE_CAPACITY)),
        }
    }

    /// Create a resolver from the text of a `public_suffix_list.dat`.
    pub fn from_list_text(text: &str) -> Result<Self, PslError> {
        Ok(Self {
            list: Some(parse_list(text)?),
            cache: Mutex::new(LookupCache::new(CACHE_CAPACITY)),
        })
    }

    /// Swap in a new suffix list, dropping memoized lookups.
    pub fn replace_list(&mut self, text: &str) -> Result<(), PslError> {
        self.list = Some(parse_list(text)?);
        self.cache.lock().clear();
        Ok(())
    }

    /// Registrable domain of the page at `url`, or `None` for non-web URLs.
    pub fn registrable_domain(&self, url: &str) -> Option<String> {
        hostname(url).map(|host| self.etld1(host))
    }

    /// Get the eTLD+1 (registrable domain) for a hostname.
    pub fn etld1(&self, host: &str) -> String {
        let host = host.to_ascii_lowercase();
        let host = host.trim_end_matches('.');

        if let Some(cached) = self.cache.lock().get(host) {
            return cached;
        }

        let result = self.compute_etld1(host);
        self.cache.lock().insert(host.to_string(), result.clone());
        result
    }

    /// Compute eTLD+1 without caching.
    fn compute_etld1(&self, host: &str) -> String {
        if host.parse::<IpAddr>().is_ok() {
            return host.to_string();
        }

        match &self.list {
            Some(list) => match list.domain(host.as_bytes()) {
                Some(domain) => String::from_utf8_lossy(domain.as_bytes()).into_owned(),
                // The host is itself a public suffix
                None => host.to_string(),
            },
            None => heuristic_domain(host),
        }
    }
}

impl Default for DomainResolver {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_list(text: &str) -> Result<List, PslError> {
    text.parse::<List>()
        .map_err(|e| PslError::InvalidList(e.to_string()))
}

/// Last two labels, or three under a known second-level suffix.
fn heuristic_domain(host: &str) -> String {
    let keep = match host.rsplitn(3, '.').nth(2) {
        None => return host.to_string(),
        Some(_) => {
            let suffix_start = host.rmatch_indices('.').nth(1).map_or(0, |(idx, _)| idx + 1);
            if KNOWN_SECOND_LEVEL.contains(&&host[suffix_start..]) { 3 } else { 2 }
        }
    };
    match host.rmatch_indices('.').nth(keep - 1) {
        Some((idx, _)) => host[idx + 1..].to_string(),
        None => host.to_string(),
    }
}
