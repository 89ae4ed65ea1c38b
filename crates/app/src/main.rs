use std::fmt;
use std::time::Duration;

use practice_core::model::{
    ActivityKind, TrackerSettingsDraft, Visibility, WeekView, format_duration, format_minutes,
    format_session,
};
use services::{
    AppServices, BackendConfig, Clock, Credential, FlushOutcome, ProgressReport, RecordOutcome,
    RetryOutcome, SessionTracker, TrackerEvent,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidDbUrl { raw: String },
    InvalidNumber { flag: &'static str, raw: String },
    MissingCredential,
    IncompleteResult,
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidNumber { flag, raw } => write!(f, "invalid {flag} value: {raw}"),
            ArgsError::MissingCredential => write!(f, "login requires --token or --user"),
            ArgsError::IncompleteResult => {
                write!(f, "--score and --total must be given together")
            }
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn parse_number<T: std::str::FromStr>(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<T, ArgsError> {
    let value = require_value(args, flag)?;
    value
        .trim()
        .parse()
        .map_err(|_| ArgsError::InvalidNumber { flag, raw: value })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- track  [--duration-secs <n>] [common]");
    eprintln!("  cargo run -p app -- week   [--weeks-back <n>] [common]");
    eprintln!("  cargo run -p app -- login  (--token <bearer> | --user <id>) [common]");
    eprintln!("  cargo run -p app -- logout [common]");
    eprintln!("  cargo run -p app -- retry  [common]");
    eprintln!("  cargo run -p app -- progress [--module <name> --score <n> --total <n>");
    eprintln!("                               [--minutes <n>]] [--lesson <id> --percent <n>]");
    eprintln!("                               [common]");
    eprintln!();
    eprintln!("Common flags:");
    eprintln!("  --db <sqlite_url>   default sqlite://practice.sqlite3");
    eprintln!("  --api-url <url>     remote minute API; local store when absent");
    eprintln!("  --zone <iana_name>  reference zone, default Asia/Karachi");
    eprintln!();
    eprintln!("track reads activity from stdin, one per line:");
    eprintln!("  mousemove | keydown | click | scroll | touchstart | hidden | visible");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  PRACTICE_DB_URL, PRACTICE_API_URL, PRACTICE_API_TIMEOUT_SECS, RUST_LOG");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Track,
    Week,
    Login,
    Logout,
    Retry,
    Progress,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "track" => Some(Self::Track),
            "week" => Some(Self::Week),
            "login" => Some(Self::Login),
            "logout" => Some(Self::Logout),
            "retry" => Some(Self::Retry),
            "progress" => Some(Self::Progress),
            _ => None,
        }
    }
}

struct Args {
    db_url: String,
    api_url: Option<String>,
    zone: Option<String>,
    duration: Option<Duration>,
    weeks_back: u32,
    credential: Option<String>,
    module: Option<String>,
    score: Option<u32>,
    total: Option<u32>,
    minutes: i64,
    lesson: Option<String>,
    percent: u32,
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut parsed = Self {
            db_url: std::env::var("PRACTICE_DB_URL")
                .ok()
                .map_or_else(|| "sqlite://practice.sqlite3".into(), normalize_sqlite_url),
            api_url: None,
            zone: None,
            duration: None,
            weeks_back: 0,
            credential: None,
            module: None,
            score: None,
            total: None,
            minutes: 0,
            lesson: None,
            percent: 100,
        };

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    parsed.db_url = normalize_sqlite_url(value);
                }
                "--api-url" => parsed.api_url = Some(require_value(args, "--api-url")?),
                "--zone" => parsed.zone = Some(require_value(args, "--zone")?),
                "--duration-secs" => {
                    let secs: u64 = parse_number(args, "--duration-secs")?;
                    parsed.duration = Some(Duration::from_secs(secs));
                }
                "--weeks-back" => parsed.weeks_back = parse_number(args, "--weeks-back")?,
                "--token" => parsed.credential = Some(require_value(args, "--token")?),
                "--user" => parsed.credential = Some(require_value(args, "--user")?),
                "--module" => parsed.module = Some(require_value(args, "--module")?),
                "--score" => parsed.score = Some(parse_number(args, "--score")?),
                "--total" => parsed.total = Some(parse_number(args, "--total")?),
                "--minutes" => parsed.minutes = parse_number(args, "--minutes")?,
                "--lesson" => parsed.lesson = Some(require_value(args, "--lesson")?),
                "--percent" => parsed.percent = parse_number(args, "--percent")?,
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(parsed)
    }

    fn backend_config(&self) -> Result<Option<BackendConfig>, Box<dyn std::error::Error>> {
        match &self.api_url {
            Some(url) => Ok(Some(BackendConfig::new(url)?)),
            None => Ok(BackendConfig::from_env()?),
        }
    }
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv: Vec<String> = std::env::args().skip(1).collect();

    // No subcommand means track.
    let cmd = match argv.first().map(String::as_str) {
        None => Command::Track,
        Some("--help" | "-h") => {
            print_usage();
            return Ok(());
        }
        Some(first) if first.starts_with("--") => Command::Track,
        Some(first) => Command::from_arg(first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };

    if !argv.is_empty() && !argv[0].starts_with("--") {
        argv.remove(0);
    }

    let parsed = Args::parse(&mut argv.into_iter()).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    let settings = TrackerSettingsDraft {
        reference_zone: parsed.zone.clone(),
        ..TrackerSettingsDraft::default()
    }
    .validate()?;

    // Open + migrate SQLite here so the services crate never touches the filesystem.
    prepare_sqlite_file(&parsed.db_url)?;
    let services = AppServices::new_sqlite(
        &parsed.db_url,
        Clock::default_clock(),
        settings,
        parsed.backend_config()?,
    )
    .await?;

    match cmd {
        Command::Track => track(&services, parsed.duration).await,
        Command::Week => {
            let view = services.week_report(parsed.weeks_back).await?;
            print_week(&view);
            Ok(())
        }
        Command::Login => {
            let credential = parsed
                .credential
                .as_deref()
                .and_then(Credential::new)
                .ok_or(ArgsError::MissingCredential)?;
            let tracker = services.tracker()?;
            tracker.login(&credential).await?;
            println!("logged in; pending minutes were retried");
            Ok(())
        }
        Command::Logout => {
            services.tracker()?.logout().await?;
            println!("logged out; minutes will stay local");
            Ok(())
        }
        Command::Retry => {
            let outcome = services.tracker()?.retry_pending().await?;
            match outcome {
                RetryOutcome::Nothing => println!("nothing pending"),
                RetryOutcome::Delivered { date, minutes, total } => {
                    println!("delivered {minutes} pending min to {date} (total {total})");
                }
                RetryOutcome::StillPending { minutes } => {
                    println!("{minutes} min still pending; backend unreachable");
                }
                RetryOutcome::Skipped { minutes } => {
                    println!("{minutes} min pending; log in to deliver them");
                }
            }
            Ok(())
        }
        Command::Progress => progress(&services, &parsed).await,
    }
}

async fn progress(
    services: &AppServices,
    parsed: &Args,
) -> Result<(), Box<dyn std::error::Error>> {
    let service = services.progress();
    match (parsed.score, parsed.total) {
        (Some(score), Some(total)) => {
            let module = parsed.module.as_deref().unwrap_or_default();
            match service
                .record_result(module, score, total, parsed.minutes)
                .await?
            {
                RecordOutcome::Synced { count } => println!("result saved (practice #{count})"),
                RecordOutcome::LocalOnly { count } => {
                    println!("result counted on this device (practice #{count})");
                    println!("log in to save results to your account");
                }
            }
        }
        (None, None) => {}
        _ => return Err(ArgsError::IncompleteResult.into()),
    }
    if let Some(lesson_id) = &parsed.lesson {
        let lesson = service.record_lesson(lesson_id, parsed.percent).await?;
        let state = if lesson.completed { "completed" } else { "in progress" };
        println!("lesson {}: {}% {state}", lesson.lesson_id, lesson.progress);
    }
    print_progress(&service.report().await?);
    Ok(())
}

async fn track(
    services: &AppServices,
    duration: Option<Duration>,
) -> Result<(), Box<dyn std::error::Error>> {
    let tracker = services.tracker()?;
    if !tracker.is_authenticated().await? {
        warn!("not logged in; minutes stay in the local cache until `login`");
    }

    let mut events = tracker.subscribe();
    tracker.start().await?;
    info!(session_id = %tracker.session_id(), remote = services.is_remote(), "tracking");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let deadline = tokio::time::sleep(duration.unwrap_or_default());
    tokio::pin!(deadline);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            () = &mut deadline, if duration.is_some() => break,
            _ = &mut ctrl_c => break,
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) => apply_input(&tracker, line.trim()).await?,
                None => stdin_open = false,
            },
            event = events.recv() => match event {
                Ok(event) => report_event(&event),
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "event receiver lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    match tracker.shutdown().await? {
        FlushOutcome::Nothing | FlushOutcome::Delivered { .. } => {}
        FlushOutcome::Buffered { minutes, pending, .. } => {
            eprintln!("{minutes} min buffered for retry ({pending} pending)");
        }
        FlushOutcome::KeptLocal { minutes, .. } => {
            eprintln!("{minutes} min kept locally; they are delivered at the next login");
        }
    }

    let snapshot = tracker.snapshot();
    println!("session: {}", format_session(snapshot.seconds));
    print_week(&tracker.refresh_week().await?);
    Ok(())
}

async fn apply_input(
    tracker: &SessionTracker,
    input: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    match input {
        "" => {}
        "hidden" => tracker.set_visibility(Visibility::Hidden).await?,
        "visible" => tracker.foreground().await?,
        other => match other.parse::<ActivityKind>() {
            Ok(kind) => tracker.record_activity(kind),
            Err(err) => warn!(%err, "ignoring input"),
        },
    }
    Ok(())
}

fn report_event(event: &TrackerEvent) {
    match event {
        TrackerEvent::Tick { seconds } => debug!(seconds, "tick"),
        TrackerEvent::Flushed {
            date,
            minutes,
            total,
        } => info!(%date, minutes, total, "minutes flushed"),
        TrackerEvent::FlushBuffered { date, minutes } => {
            warn!(%date, minutes, "flush failed; minutes buffered");
        }
        TrackerEvent::KeptLocal { date, minutes } => {
            info!(%date, minutes, "not logged in; minutes kept locally");
        }
        TrackerEvent::Retried {
            date,
            minutes,
            total,
        } => info!(%date, minutes, total, "buffered minutes delivered"),
        TrackerEvent::WeekRefreshed(view) => {
            debug!(week = %view.week(), total = view.total_minutes(), "week refreshed");
        }
        TrackerEvent::DayRolledOver { previous, current } => {
            info!(%previous, %current, "new practice day");
        }
    }
}

fn print_progress(report: &ProgressReport) {
    match &report.summary {
        Some(summary) => {
            let accuracy = summary
                .accuracy()
                .map_or_else(|| "-".to_string(), |percent| format!("{percent}%"));
            println!(
                "Results: {} entries, {}/{} points ({accuracy})",
                summary.entries, summary.total_score, summary.total_possible
            );
            for (module, tally) in &summary.by_module {
                println!(
                    "  {module:<18} {:>4}/{:<4} x{}",
                    tally.score, tally.total, tally.count
                );
            }
        }
        None => println!("Results: log in to see saved results"),
    }
    if !report.practice.is_empty() {
        println!("Practice sessions:");
        for (module, count) in &report.practice {
            println!("  {module:<18} {count}");
        }
    }
    if !report.lessons.is_empty() {
        println!("Lessons:");
        for lesson in &report.lessons {
            let mark = if lesson.completed { "  done" } else { "" };
            println!("  {:<18} {:>3}%{mark}", lesson.lesson_id, lesson.progress);
        }
    }
}

fn print_week(view: &WeekView) {
    println!("{}  {}", view.range_label(), view.encouragement());
    for day in view.days() {
        let marker = if day.is_today { "  (today)" } else { "" };
        let minutes = if day.is_future {
            "-".to_string()
        } else {
            format_minutes(day.minutes)
        };
        println!("  {}  {:>7}{marker}", day.label, minutes);
    }
    println!(
        "Total: {} over {} day(s)",
        format_duration(view.total_minutes()),
        view.practiced_days()
    );
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run().await {
        // At this layer (binary glue), printing once is fine.
        eprintln!("{err}");
        std::process::exit(2);
    }
}
