//! URL helpers for classifying tabs and requests
//!
//! These functions avoid allocations and work directly on string slices.
//! Anything that is not a `scheme://host.tld/...` URL (new tab pages,
//! settings pages, `about:` and extension URLs) yields `None`.

// =============================================================================
// Host Extraction
// =============================================================================

/// Extract the hostname of a web URL.
///
/// Returns `None` when the URL has fewer than three `/`-separated segments or
/// when the host has no dot. Userinfo and port are stripped.
#[inline]
pub fn hostname(url: &str) -> Option<&str> {
    let mut segments = url.split('/');
    let scheme = segments.next()?;
    let _empty = segments.next()?;
    let authority = segments.next()?;

    if scheme.is_empty() {
        return None;
    }

    let authority = strip_query_and_fragment(authority);
    let host = match authority.rfind('@') {
        Some(at_pos) => &authority[at_pos + 1..],
        None => authority,
    };
    let host = strip_port(host);

    if !host.contains('.') || host.starts_with('.') {
        return None;
    }

    Some(host)
}

/// Cut a host segment at the first `?` or `#`.
#[inline]
fn strip_query_and_fragment(segment: &str) -> &str {
    match segment.find(['?', '#']) {
        Some(pos) => &segment[..pos],
        None => segment,
    }
}

/// Drop a trailing `:port`, leaving bracketed IPv6 literals intact.
#[inline]
fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    match host.rfind(':') {
        Some(colon_pos) => &host[..colon_pos],
        None => host,
    }
}

// =============================================================================
// Match Patterns
// =============================================================================

/// Browser request-filter pattern matching every URL on `host`.
pub fn match_pattern(host: &str) -> String {
    format!("*://{}/*", host)
}
