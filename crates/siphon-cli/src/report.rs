use siphon_core::store::normalize_domain;
use siphon_core::units::format_bytes;
use siphon_core::{AggregateStore, SessionId};

fn store_error(e: impl std::fmt::Display) -> String {
    format!("Query failed: {}", e)
}

pub fn print_report(store: &dyn AggregateStore, top: usize, domain: Option<&str>) -> Result<(), String> {
    let trackers = store.top_trackers(top).map_err(store_error)?;
    println!("Top trackers since startup:");
    if trackers.is_empty() {
        println!("  (none)");
    }
    for (idx, tracker) in trackers.iter().enumerate() {
        println!("  {:>3}. {:<40} {:>10}", idx + 1, tracker.hostname, format_bytes(tracker.bytes_exchanged));
    }
    println!();

    let domains = store.top_domains(top).map_err(store_error)?;
    println!("Top domains:");
    if domains.is_empty() {
        println!("  (none)");
    }
    for (idx, total) in domains.iter().enumerate() {
        println!("  {:>3}. {:<40} {:>10}", idx + 1, total.domain, format_bytes(total.bytes_exchanged));
    }

    let Some(domain) = domain else {
        return Ok(());
    };
    let domain = normalize_domain(domain);
    println!();

    let window = store.neighboring_ranks(&domain).map_err(store_error)?;
    if window.entries.is_empty() {
        println!("No tracker traffic recorded on {}", domain);
        return Ok(());
    }
    println!("Ranking around {}:", domain);
    for (offset, total) in window.entries.iter().enumerate() {
        let marker = if total.domain == domain { "*" } else { " " };
        println!(
            " {}{:>3}. {:<40} {:>10}",
            marker,
            window.start_rank + offset,
            total.domain,
            format_bytes(total.bytes_exchanged)
        );
    }
    println!();

    println!("Trackers on {}:", domain);
    for total in store.top_trackers_on(&domain, top).map_err(store_error)? {
        println!("       {:<40} {:>10}", total.hostname, format_bytes(total.bytes_exchanged));
    }

    Ok(())
}

pub fn print_sessions(
    store: &dyn AggregateStore,
    from: i64,
    to: i64,
    domain: Option<&str>,
) -> Result<(), String> {
    let domain = domain.map(normalize_domain);
    let sessions = store
        .all_sessions_between(from, to, domain.as_deref())
        .map_err(store_error)?;

    println!("{} sessions", sessions.len());
    for session in &sessions {
        let bytes = store
            .total_bytes_sent_during_session(&session.session_id)
            .map_err(store_error)?;
        println!(
            "  {}  tab {:<5} {:<32} {:>8}s  {:>10}",
            session.session_id,
            session.tab_id,
            session.domain,
            (session.end_time - session.start_time) / 1000,
            format_bytes(bytes)
        );
    }
    Ok(())
}

pub fn print_session(store: &dyn AggregateStore, id: &str) -> Result<(), String> {
    let session_id = SessionId::from(id);
    let total = store.total_bytes_sent_during_session(&session_id).map_err(store_error)?;
    let hosts = store.unique_hosts_connected_during(&session_id).map_err(store_error)?;

    println!("Session {}", session_id);
    println!("  Tracker bytes: {} ({} bytes)", format_bytes(total), total);
    println!("  Tracker hosts: {}", hosts.len());
    for host in hosts {
        println!("    {}", host);
    }
    Ok(())
}
