use crate::error::Result;
use crate::model::{RoutineDay, SessionStatus, SetLog, WorkoutSession};
use crate::progress::calculate_session_progress;
use crate::util::{format_duration, round_to};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::HashSet;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use time_humanize::{Accuracy, HumanTime, Tense};

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub session_id: String,
    pub routine_id: String,
    pub day_name: String,
    pub status: SessionStatus,
    pub started_at: DateTime<Local>,
    pub duration: Duration,
    pub completed_sets: usize,
    pub total_sets: usize,
    pub percentage: u32,
    /// Sum of reps x weight over completed planned sets
    pub volume: f64,
}

pub fn summarize(
    session: &WorkoutSession,
    day: &RoutineDay,
    logs: &[SetLog],
    now: DateTime<Local>,
) -> SessionSummary {
    let progress = calculate_session_progress(logs, &day.exercises);
    let planned: HashSet<(&str, u32)> = day
        .exercises
        .iter()
        .flat_map(|e| e.sets.iter().map(move |s| (e.id.as_str(), s.set_number)))
        .collect();
    let volume = logs
        .iter()
        .filter(|l| l.completed && l.session_id == session.id)
        .filter(|l| planned.contains(&(l.routine_exercise_id.as_str(), l.set_number)))
        .map(SetLog::volume)
        .sum::<f64>();

    SessionSummary {
        session_id: session.id.clone(),
        routine_id: session.routine_id.clone(),
        day_name: day.name.clone(),
        status: session.status,
        started_at: session.started_at,
        duration: session.elapsed(now),
        completed_sets: progress.completed_sets,
        total_sets: progress.total_sets,
        percentage: progress.percentage,
        volume: round_to(volume, 2),
    }
}

/// "3 days ago", "an hour ago", ...
pub fn humanize_since(then: DateTime<Local>, now: DateTime<Local>) -> String {
    let elapsed = (now - then).to_std().unwrap_or_default();
    HumanTime::from(elapsed).to_text_en(Accuracy::Rough, Tense::Past)
}

#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    date: String,
    session: &'a str,
    routine: &'a str,
    day: &'a str,
    status: String,
    duration: String,
    completed_sets: usize,
    total_sets: usize,
    percentage: u32,
    volume_kg: f64,
}

pub fn write_csv<W: Write>(summaries: &[SessionSummary], writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for s in summaries {
        wtr.serialize(CsvRow {
            date: s.started_at.format("%Y-%m-%d %H:%M").to_string(),
            session: &s.session_id,
            routine: &s.routine_id,
            day: &s.day_name,
            status: s.status.to_string(),
            duration: format_duration(s.duration),
            completed_sets: s.completed_sets,
            total_sets: s.total_sets,
            percentage: s.percentage,
            volume_kg: s.volume,
        })?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn export_csv<P: AsRef<Path>>(summaries: &[SessionSummary], path: P) -> Result<()> {
    if let Some(parent) = path.as_ref().parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = std::fs::File::create(path)?;
    write_csv(summaries, file)
}
