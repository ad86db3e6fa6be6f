use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use liftlog::cache::{CacheDataType, ProgressionCache};
use liftlog::config::{Config, ConfigStore, FileConfigStore};
use liftlog::history::{export_csv, humanize_since, summarize, SessionSummary};
use liftlog::model::{Routine, SessionStatus, WorkoutSession};
use liftlog::progress::group_exercises_with_sets;
use liftlog::rtf::{calculate_progression, default_program, tm_adjustments, WeekLog};
use liftlog::runtime::{FixedTicker, LineEventSource, Runner, COMMAND_HELP};
use liftlog::store::WorkoutStore;
use liftlog::tracker::{drive, WorkoutTracker};
use liftlog::util::{format_duration, round_to};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// workout routine tracker with debounced set logging and reps-to-failure progression
#[derive(Parser, Debug)]
#[clap(
    version,
    about,
    long_about = "Import workout routines, run timed sessions that auto-save every set as you type, review your history and plan reps-to-failure training max progression."
)]
struct Cli {
    /// config file to use instead of the default location
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    /// database file (overrides the config)
    #[clap(long, global = true)]
    db: Option<PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// manage routines
    Routine {
        #[clap(subcommand)]
        action: RoutineAction,
    },
    /// run or inspect workout sessions
    Session {
        #[clap(subcommand)]
        action: SessionAction,
    },
    /// list recent sessions
    History {
        /// number of sessions to show
        #[clap(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },
    /// write session history to a csv file
    Export {
        path: PathBuf,

        #[clap(short = 'n', long, default_value_t = 1000)]
        limit: usize,
    },
    /// print the reps-to-failure progression table
    Rtf {
        /// starting training max in kg
        #[clap(long)]
        tm: f64,

        /// AMRAP result as WEEK=REPS, repeatable
        #[clap(long = "amrap", value_parser = parse_amrap)]
        amrap: Vec<(u32, u32)>,

        /// routine the progression belongs to (enables caching)
        #[clap(long)]
        routine: Option<String>,

        /// exercise the training max belongs to
        #[clap(long)]
        exercise: Option<String>,

        /// store the resulting training max adjustments
        #[clap(long, requires = "exercise")]
        record: bool,
    },
}

#[derive(Subcommand, Debug)]
enum RoutineAction {
    /// import a routine from a json file
    Import { path: PathBuf },
    /// list routines
    List,
    /// show a routine's days, exercises and planned sets
    Show { id: String },
}

#[derive(Subcommand, Debug)]
enum SessionAction {
    /// start a workout for a routine day (day id or 1-based position)
    Start { routine: String, day: String },
    /// continue an in-progress workout
    Resume { id: String },
    /// show one session's sets and progress
    Show { id: String },
}

fn parse_amrap(s: &str) -> std::result::Result<(u32, u32), String> {
    let (week, reps) = s
        .split_once('=')
        .ok_or_else(|| format!("expected WEEK=REPS, got '{s}'"))?;
    let week = week
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("invalid week '{week}'"))?;
    let reps = reps
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("invalid reps '{reps}'"))?;
    Ok((week, reps))
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct CachedProgression {
    exercise: Option<String>,
    starting_tm: f64,
    rounding_kg: f64,
    amrap: BTreeMap<u32, u32>,
    weeks: Vec<WeekLog>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("liftlog=warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        match e.downcast_ref::<liftlog::Error>() {
            Some(liftlog::Error::NotFound(what)) => {
                eprintln!("{what} not found");
                eprintln!("go back with `liftlog routine list` or `liftlog history`");
            }
            _ => eprintln!("error: {e:#}"),
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config_store = cli
        .config
        .as_ref()
        .map(FileConfigStore::with_path)
        .unwrap_or_default();
    let mut cfg = config_store.load();
    if let Some(db) = cli.db {
        cfg.database_path = Some(db);
    }
    debug!(?cfg, "configuration loaded");

    match cli.command {
        Command::Routine { action } => routine_command(&cfg, action),
        Command::Session { action } => session_command(&cfg, action),
        Command::History { limit } => {
            let store = open_store(&cfg)?;
            let now = Local::now();
            for s in summaries(&store, limit)? {
                println!(
                    "{}  {:<12} {:<11} {:>3}% {}/{} sets  {}kg  {}  ({})  {}",
                    s.started_at.format("%Y-%m-%d %H:%M"),
                    s.day_name,
                    s.status,
                    s.percentage,
                    s.completed_sets,
                    s.total_sets,
                    s.volume,
                    format_duration(s.duration),
                    humanize_since(s.started_at, now),
                    s.session_id,
                );
            }
            Ok(())
        }
        Command::Export { path, limit } => {
            let store = open_store(&cfg)?;
            let rows = summaries(&store, limit)?;
            export_csv(&rows, &path)
                .with_context(|| format!("writing {}", path.display()))?;
            println!("exported {} sessions to {}", rows.len(), path.display());
            Ok(())
        }
        Command::Rtf {
            tm,
            amrap,
            routine,
            exercise,
            record,
        } => rtf_command(&cfg, tm, amrap.into_iter().collect(), routine, exercise, record),
    }
}

fn open_store(cfg: &Config) -> Result<WorkoutStore> {
    let path = cfg.db_path();
    WorkoutStore::open(&path).with_context(|| format!("opening database {}", path.display()))
}

fn open_cache(cfg: &Config) -> Option<ProgressionCache> {
    match ProgressionCache::open(cfg.db_path(), cfg.cache_ttl()) {
        Ok(cache) => Some(cache),
        Err(e) => {
            warn!(error = %e, "progression cache unavailable");
            None
        }
    }
}

fn summaries(store: &WorkoutStore, limit: usize) -> Result<Vec<SessionSummary>> {
    let now = Local::now();
    let mut rows = Vec::new();
    for session in store.list_sessions(limit)? {
        let day = match store.get_day(&session.routine_id, &session.routine_day_id) {
            Ok(day) => day,
            Err(e) => {
                warn!(session = %session.id, error = %e, "skipping session without routine day");
                continue;
            }
        };
        let logs = store.set_logs(&session.id)?;
        rows.push(summarize(&session, &day, &logs, now));
    }
    Ok(rows)
}

fn routine_command(cfg: &Config, action: RoutineAction) -> Result<()> {
    let mut store = open_store(cfg)?;
    match action {
        RoutineAction::Import { path } => {
            let bytes =
                std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
            let mut routine: Routine = serde_json::from_slice(&bytes)
                .with_context(|| format!("parsing routine {}", path.display()))?;
            for day in routine.days.iter_mut() {
                day.routine_id = routine.id.clone();
            }
            store
                .save_routine(&routine)
                .with_context(|| format!("importing {}", path.display()))?;
            if let Some(cache) = open_cache(cfg) {
                if let Err(e) = cache.invalidate_routine(&routine.id) {
                    warn!(error = %e, "could not invalidate progression cache");
                }
            }
            let sets: usize = routine.days.iter().map(|d| d.total_sets()).sum();
            println!(
                "imported routine {} ({} days, {} planned sets)",
                routine.id,
                routine.days.len(),
                sets
            );
        }
        RoutineAction::List => {
            for routine in store.list_routines()? {
                println!("{}  {}  ({} days)", routine.id, routine.name, routine.days.len());
            }
        }
        RoutineAction::Show { id } => {
            let routine = store.get_routine(&id)?;
            println!("{} ({})", routine.name, routine.id);
            for (i, day) in routine.days.iter().enumerate() {
                println!("day {}: {} [{}] - {} sets", i + 1, day.name, day.id, day.total_sets());
                for exercise in group_exercises_with_sets(&day.exercises, &[]) {
                    let plan: Vec<String> = exercise
                        .sets
                        .iter()
                        .map(|s| match s.planned_weight {
                            Some(w) => format!("{}@{w}kg", s.target),
                            None => s.target.to_string(),
                        })
                        .collect();
                    println!("  {} [{}]: {}", exercise.name, exercise.exercise_id, plan.join(", "));
                }
            }
        }
    }
    Ok(())
}

fn session_command(cfg: &Config, action: SessionAction) -> Result<()> {
    let store = open_store(cfg)?;
    match action {
        SessionAction::Start { routine, day } => {
            let day = store.get_day(&routine, &day)?;
            let session = WorkoutSession::start(&routine, &day.id, Local::now());
            store.create_session(&session)?;
            let tracker = WorkoutTracker::new(session, day, Vec::new(), store, cfg.debounce());
            run_tracker(cfg, tracker)
        }
        SessionAction::Resume { id } => {
            let session = store.get_session(&id)?;
            if session.status != SessionStatus::InProgress {
                bail!("session {} is already {}", session.id, session.status);
            }
            let day = store.get_day(&session.routine_id, &session.routine_day_id)?;
            let logs = store.set_logs(&session.id)?;
            let tracker = WorkoutTracker::new(session, day, logs, store, cfg.debounce());
            run_tracker(cfg, tracker)
        }
        SessionAction::Show { id } => {
            let session = store.get_session(&id)?;
            let day = store.get_day(&session.routine_id, &session.routine_day_id)?;
            let logs = store.set_logs(&session.id)?;
            let summary = summarize(&session, &day, &logs, Local::now());
            println!(
                "{} [{}] {} - {}/{} sets ({}%), {}kg",
                summary.day_name,
                summary.status,
                format_duration(summary.duration),
                summary.completed_sets,
                summary.total_sets,
                summary.percentage,
                summary.volume
            );
            for (i, exercise) in group_exercises_with_sets(&day.exercises, &logs)
                .iter()
                .enumerate()
            {
                println!("{}. {}", i + 1, exercise.name);
                for set in &exercise.sets {
                    let weight = set.weight.map_or_else(|| "bw".to_string(), |w| format!("{w}kg"));
                    let mark = if set.completed { "x" } else { " " };
                    println!(
                        "   {}. [{mark}] {} x {weight} (target {})",
                        set.set_number, set.reps, set.target
                    );
                }
            }
            Ok(())
        }
    }
}

fn run_tracker(cfg: &Config, mut tracker: WorkoutTracker<WorkoutStore>) -> Result<()> {
    println!("session {}", tracker.session().id);
    print!("{}", tracker.status_report(Local::now()));
    println!("{COMMAND_HELP}");

    let runner = Runner::new(LineEventSource::stdin(), FixedTicker::new(cfg.tick_rate()));
    let status = drive(&mut tracker, &runner, &mut io::stdout())?;

    if status.is_finished() {
        tracker.sink().update_session(tracker.session())?;
    } else {
        println!(
            "session {} left in progress; continue with `liftlog session resume {}`",
            tracker.session().id,
            tracker.session().id
        );
    }
    Ok(())
}

fn rtf_command(
    cfg: &Config,
    tm: f64,
    amrap: BTreeMap<u32, u32>,
    routine: Option<String>,
    exercise: Option<String>,
    record: bool,
) -> Result<()> {
    if !(tm.is_finite() && tm > 0.0) {
        bail!("training max must be a positive number of kg");
    }
    let rounding = cfg.rounding_increment_kg;
    let now = Local::now();
    let cache = routine.as_ref().and_then(|_| open_cache(cfg));

    let cached = match (&cache, &routine) {
        (Some(cache), Some(routine_id)) => cache
            .get::<CachedProgression>(routine_id, CacheDataType::Progression, now)
            .unwrap_or_else(|e| {
                warn!(error = %e, "progression cache read failed");
                None
            })
            .filter(|c| {
                c.exercise == exercise
                    && c.starting_tm == tm
                    && c.rounding_kg == rounding
                    && c.amrap == amrap
            }),
        _ => None,
    };

    let weeks = match cached {
        Some(hit) => {
            debug!(routine = ?routine, "progression served from cache");
            hit.weeks
        }
        None => {
            let program = default_program();
            let weeks = calculate_progression(tm, &program, &amrap, rounding);
            if let (Some(cache), Some(routine_id)) = (&cache, &routine) {
                let entry = CachedProgression {
                    exercise: exercise.clone(),
                    starting_tm: tm,
                    rounding_kg: rounding,
                    amrap: amrap.clone(),
                    weeks: weeks.clone(),
                };
                let maxes: Vec<f64> = weeks.iter().map(|w| w.training_max).collect();
                let writes = [
                    cache.set(routine_id, CacheDataType::Progression, &entry, now),
                    cache.set(routine_id, CacheDataType::WeekTargets, &program, now),
                    cache.set(routine_id, CacheDataType::TrainingMaxes, &maxes, now),
                ];
                for e in writes.into_iter().filter_map(|w| w.err()) {
                    warn!(error = %e, "progression cache write failed");
                }
            }
            weeks
        }
    };

    println!("week  tm(kg)   weight(kg)  sets x reps  amrap    tm change");
    for w in &weeks {
        let amrap = match (w.amrap_target, w.amrap_reps) {
            (Some(target), Some(done)) => format!("{done}/{target}+"),
            (Some(target), None) => format!("{target}+"),
            _ => "-".to_string(),
        };
        let change = if w.is_deload {
            "deload".to_string()
        } else if w.tm_change_percent == 0.0 {
            String::new()
        } else {
            format!("{:+}%", round_to(w.tm_change_percent * 100.0, 1))
        };
        println!(
            "{:>4}  {:>7.2}  {:>10}  {:>4} x {:<4}  {:<7}  {}",
            w.week, w.training_max, w.working_weight, w.sets, w.reps, amrap, change
        );
    }

    if record {
        if let Some(exercise_id) = exercise {
            let adjustments = tm_adjustments(&exercise_id, &weeks);
            let mut store = open_store(cfg)?;
            store.record_tm_adjustments(&adjustments, now)?;
            println!("recorded {} training max adjustments for {exercise_id}", adjustments.len());
        }
    }
    Ok(())
}
