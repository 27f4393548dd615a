//! `booking`: slot search, conflict checks, and recurrence previews over a
//! calendar file.
//!
//! Every command is stateless. The calendar comes from `--calendar`; existing
//! reservations, when needed, come from a JSON array of drafts in
//! `--bookings`. Results are printed as JSON on stdout, except `ical` which
//! prints iCalendar text. Logs go to stderr.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use booking_engine::temporal::{parse_date, parse_start_time, parse_timezone};
use booking_engine::{
    rule_to_ical, ActionContext, Actor, BookingEngine, CalendarConfig, ConflictQuery,
    CreateReservation, InMemoryStore, RecurrenceRule, ReservationDraft, RoomId, ServiceId,
    SpecialistId,
};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "booking", version, about = "Cabinet and specialist booking engine")]
struct Cli {
    /// Log engine decisions to stderr (same as RUST_LOG=debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List bookable slots for a service on a date
    Slots {
        /// Calendar configuration (JSON)
        #[arg(short, long)]
        calendar: PathBuf,
        /// Existing reservations (JSON array of drafts)
        #[arg(short, long)]
        bookings: Option<PathBuf>,
        /// Local calendar date, YYYY-MM-DD
        #[arg(short, long)]
        date: String,
        /// Service id
        #[arg(short, long)]
        service: u64,
    },
    /// List active rooms that can host a service
    Rooms {
        #[arg(short, long)]
        calendar: PathBuf,
        #[arg(short, long)]
        service: u64,
    },
    /// Check a single placement for conflicts
    Check {
        #[arg(short, long)]
        calendar: PathBuf,
        #[arg(short, long)]
        bookings: Option<PathBuf>,
        /// RFC 3339 instant, or wall-clock time in the calendar's timezone
        #[arg(long)]
        start: String,
        #[arg(long)]
        service: u64,
        #[arg(long)]
        specialist: u64,
        #[arg(long)]
        room: u64,
    },
    /// Expand a recurrence rule into concrete starts
    Occurrences {
        /// Rule as inline JSON, or @path to a JSON file
        #[arg(short, long)]
        rule: String,
        /// First start: RFC 3339, or wall-clock time in --timezone
        #[arg(short, long)]
        anchor: String,
        /// IANA timezone for wall-clock expansion
        #[arg(short, long, default_value = "UTC")]
        timezone: String,
    },
    /// Render a recurrence rule as iCalendar text
    Ical {
        #[arg(short, long)]
        rule: String,
        #[arg(short, long)]
        anchor: String,
        #[arg(short, long, default_value = "UTC")]
        timezone: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Slots {
            calendar,
            bookings,
            date,
            service,
        } => {
            let engine = load_engine(&calendar, bookings.as_deref())?;
            let date = parse_date(&date)?;
            let slots = engine.find_available_slots(date, ServiceId(service))?;
            print_json(&slots)
        }
        Command::Rooms { calendar, service } => {
            let engine = load_engine(&calendar, None)?;
            let rooms = engine.available_rooms(ServiceId(service))?;
            print_json(&rooms)
        }
        Command::Check {
            calendar,
            bookings,
            start,
            service,
            specialist,
            room,
        } => {
            let engine = load_engine(&calendar, bookings.as_deref())?;
            let start = parse_start_time(&start, engine.settings().timezone)?;
            let query = ConflictQuery::new(
                start,
                ServiceId(service),
                SpecialistId(specialist),
                RoomId(room),
            );
            let report = engine.check_conflicts(&query)?;
            print_json(&CheckOutput {
                clear: report.is_clear(),
                reasons: report.reasons(),
            })
        }
        Command::Occurrences {
            rule,
            anchor,
            timezone,
        } => {
            let rule = load_rule(&rule)?;
            let tz = parse_timezone(&timezone)?;
            let anchor = parse_start_time(&anchor, tz)?;
            let starts = booking_engine::expand_series(&rule, anchor, tz)?;
            print_json(&starts)
        }
        Command::Ical {
            rule,
            anchor,
            timezone,
        } => {
            let rule = load_rule(&rule)?;
            let tz = parse_timezone(&timezone)?;
            let anchor = parse_start_time(&anchor, tz)?;
            print!("{}", rule_to_ical(&rule, anchor, tz)?);
            Ok(())
        }
    }
}

#[derive(Serialize)]
struct CheckOutput {
    clear: bool,
    reasons: Vec<&'static str>,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_engine(calendar: &Path, bookings: Option<&Path>) -> Result<BookingEngine<InMemoryStore>> {
    let json = fs::read_to_string(calendar)
        .with_context(|| format!("failed to read calendar {}", calendar.display()))?;
    let config = CalendarConfig::from_json_str(&json)
        .with_context(|| format!("invalid calendar {}", calendar.display()))?;
    let engine = BookingEngine::new(InMemoryStore::new(config)?);

    if let Some(path) = bookings {
        let json = fs::read_to_string(path)
            .with_context(|| format!("failed to read bookings {}", path.display()))?;
        let drafts: Vec<ReservationDraft> = serde_json::from_str(&json)
            .with_context(|| format!("invalid bookings {}", path.display()))?;
        let ctx = ActionContext::new(Actor::new("booking-cli"), Utc::now());
        for (i, draft) in drafts.into_iter().enumerate() {
            engine
                .create_reservation(CreateReservation::quick(draft), &ctx)
                .with_context(|| format!("booking #{} in {} was rejected", i + 1, path.display()))?;
        }
        debug!(path = %path.display(), "bookings loaded");
    }
    Ok(engine)
}

fn load_rule(arg: &str) -> Result<RecurrenceRule> {
    let json = match arg.strip_prefix('@') {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed to read rule file {path}"))?,
        None => arg.to_string(),
    };
    if json.trim().is_empty() {
        bail!("empty recurrence rule");
    }
    serde_json::from_str(&json).context("invalid recurrence rule JSON")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("failed to serialize output")?;
    println!("{out}");
    Ok(())
}
