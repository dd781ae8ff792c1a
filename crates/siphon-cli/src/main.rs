//! Siphon CLI
//!
//! CLI tool for fetching the tracker list, replaying recorded browser events
//! into a database and reporting on the aggregates.

mod events;
mod fetch;
mod replay;
mod report;

use std::path::Path;

use clap::{Parser, Subcommand};
use ts_rs::TS;

use siphon_core::blocklist::DEFAULT_LIST_URL;
use siphon_core::settings::{dark_theme, set_dark_theme};
use siphon_core::types::{
    ActiveSession, ArchivedSession, DomainTotal, DomainTrackerTotal, RankWindow, SessionId,
    TrackerRequestRecord, TrackerTotal,
};
use siphon_core::url::hostname;

use fetch::AnySource;
use replay::{load_resolver, open_engine, run_replay, ReplayOptions};

#[derive(Parser)]
#[command(name = "siphon")]
#[command(about = "Siphon tracker traffic tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the tracker list and store it in the database
    FetchList {
        /// Database file
        #[arg(long, default_value = "siphon.db")]
        db: String,

        /// List URL
        #[arg(long, default_value = DEFAULT_LIST_URL)]
        url: String,
    },

    /// Replay a JSON-lines browser event log into the database
    Replay {
        /// Event log file
        #[arg(short, long)]
        events: String,

        /// Database file
        #[arg(long, default_value = "siphon.db")]
        db: String,

        /// Full public_suffix_list.dat to use instead of the built-in list
        #[arg(long)]
        psl: Option<String>,

        /// List URL fetched on install events
        #[arg(long, default_value = DEFAULT_LIST_URL)]
        url: String,

        /// Read the tracker list from this file instead of the network
        #[arg(long)]
        list_file: Option<String>,
    },

    /// Print tracker and domain rankings
    Report {
        /// Database file
        #[arg(long, default_value = "siphon.db")]
        db: String,

        /// Number of entries per ranking
        #[arg(long, default_value_t = 10)]
        top: usize,

        /// Also show the ranking window and trackers for this domain
        #[arg(long)]
        domain: Option<String>,
    },

    /// List archived sessions overlapping a time range
    Sessions {
        /// Database file
        #[arg(long, default_value = "siphon.db")]
        db: String,

        /// Range start, milliseconds since the epoch
        #[arg(long, default_value_t = 0)]
        from: i64,

        /// Range end, milliseconds since the epoch
        #[arg(long, default_value_t = i64::MAX)]
        to: i64,

        /// Only sessions on this domain
        #[arg(long)]
        domain: Option<String>,
    },

    /// Show the tracker traffic of one session
    Session {
        /// Session id
        id: String,

        /// Database file
        #[arg(long, default_value = "siphon.db")]
        db: String,
    },

    /// Resolve URLs to hostnames and registrable domains
    Resolve {
        /// URLs to resolve
        #[arg(required = true)]
        urls: Vec<String>,

        /// Full public_suffix_list.dat to use instead of the built-in list
        #[arg(long)]
        psl: Option<String>,
    },

    /// Show or set the pop-up theme
    Theme {
        /// Database file
        #[arg(long, default_value = "siphon.db")]
        db: String,

        /// New theme
        #[arg(long, value_parser = ["dark", "light"])]
        set: Option<String>,
    },

    /// Export TypeScript declarations for the query types
    Bindings {
        /// Output directory
        #[arg(short, long, default_value = "bindings")]
        out: String,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::FetchList { db, url } => cmd_fetch_list(&db, &url),
        Commands::Replay {
            events,
            db,
            psl,
            url,
            list_file,
        } => cmd_replay(&events, &db, psl.as_deref(), &url, list_file.as_deref()),
        Commands::Report { db, top, domain } => cmd_report(&db, top, domain.as_deref()),
        Commands::Sessions { db, from, to, domain } => cmd_sessions(&db, from, to, domain.as_deref()),
        Commands::Session { id, db } => cmd_session(&db, &id),
        Commands::Resolve { urls, psl } => cmd_resolve(&urls, psl.as_deref()),
        Commands::Theme { db, set } => cmd_theme(&db, set.as_deref()),
        Commands::Bindings { out } => cmd_bindings(&out),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn cmd_fetch_list(db: &str, url: &str) -> Result<(), String> {
    let mut engine = open_engine(db, None, 0)?;
    let source = AnySource::from_args(url, None)?;

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| format!("Failed to start tokio runtime: {}", e))?;
    let count = runtime
        .block_on(engine.refresh_tracker_list(&source))
        .map_err(|e| format!("Failed to fetch '{}': {}", url, e))?;

    println!("Stored {} tracker hosts in '{}'", count, db);
    Ok(())
}

fn cmd_replay(
    events: &str,
    db: &str,
    psl: Option<&str>,
    url: &str,
    list_file: Option<&str>,
) -> Result<(), String> {
    let source = AnySource::from_args(url, list_file)?;
    let summary = run_replay(ReplayOptions {
        events,
        db,
        psl,
        source: &source,
    })?;

    println!("Replayed {} events into '{}'", summary.events, db);
    println!("  Sessions started:   {}", summary.sessions_started);
    println!("  Sessions ended:     {}", summary.sessions_ended);
    println!("  Requests recorded:  {}", summary.requests_recorded);
    println!("  List refreshes:     {}", summary.list_refreshes);
    Ok(())
}

fn cmd_report(db: &str, top: usize, domain: Option<&str>) -> Result<(), String> {
    let engine = open_engine(db, None, 0)?;
    report::print_report(engine.store(), top, domain)
}

fn cmd_sessions(db: &str, from: i64, to: i64, domain: Option<&str>) -> Result<(), String> {
    let engine = open_engine(db, None, 0)?;
    report::print_sessions(engine.store(), from, to, domain)
}

fn cmd_session(db: &str, id: &str) -> Result<(), String> {
    let engine = open_engine(db, None, 0)?;
    report::print_session(engine.store(), id)
}

fn cmd_resolve(urls: &[String], psl: Option<&str>) -> Result<(), String> {
    let resolver = load_resolver(psl)?;
    for url in urls {
        match (hostname(url), resolver.registrable_domain(url)) {
            (Some(host), Some(domain)) => println!("{}\t{}\t{}", url, host, domain),
            _ => println!("{}\t-\t-", url),
        }
    }
    Ok(())
}

fn cmd_theme(db: &str, set: Option<&str>) -> Result<(), String> {
    let engine = open_engine(db, None, 0)?;
    if let Some(theme) = set {
        set_dark_theme(engine.store(), theme == "dark")
            .map_err(|e| format!("Failed to save theme: {}", e))?;
    }
    let theme = if dark_theme(engine.store()) { "dark" } else { "light" };
    println!("Theme: {}", theme);
    Ok(())
}

fn cmd_bindings(out: &str) -> Result<(), String> {
    let out_dir = Path::new(out);
    std::fs::create_dir_all(out_dir)
        .map_err(|e| format!("Failed to create '{}': {}", out, e))?;

    let exports = [
        SessionId::export_all_to(out_dir),
        ActiveSession::export_all_to(out_dir),
        ArchivedSession::export_all_to(out_dir),
        TrackerRequestRecord::export_all_to(out_dir),
        DomainTotal::export_all_to(out_dir),
        TrackerTotal::export_all_to(out_dir),
        DomainTrackerTotal::export_all_to(out_dir),
        RankWindow::export_all_to(out_dir),
    ];
    for result in exports {
        result.map_err(|e| format!("Failed to export bindings: {}", e))?;
    }

    println!("Wrote TypeScript bindings to '{}'", out);
    Ok(())
}
