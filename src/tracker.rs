//! One running workout: the auto-save machine for every planned set, the
//! save-status store, and the sink the saves go to.

use crate::autosave::{SaveState, SetLogAutoSave, SetLogSink, SetValues};
use crate::error::{Error, Result};
use crate::model::{RoutineDay, SessionStatus, SetKey, SetLog, WorkoutSession};
use crate::progress::{
    are_all_sets_completed, calculate_session_progress, group_exercises_with_sets,
    ExerciseWithSets, SessionProgress,
};
use crate::runtime::{SessionCommand, SessionEvent, SessionEventSource, Runner, Ticker};
use crate::save_status::SaveStatusStore;
use crate::validation::SetLogPayload;
use chrono::{DateTime, Local};
use std::collections::BTreeMap;
use std::io::Write;
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub struct WorkoutTracker<S: SetLogSink> {
    session: WorkoutSession,
    day: RoutineDay,
    logs: Vec<SetLog>,
    /// (exercise id, set numbers) in display order
    layout: Vec<(String, Vec<u32>)>,
    autosaves: BTreeMap<SetKey, SetLogAutoSave>,
    statuses: SaveStatusStore,
    sink: S,
}

impl<S: SetLogSink> WorkoutTracker<S> {
    pub fn new(
        session: WorkoutSession,
        day: RoutineDay,
        logs: Vec<SetLog>,
        sink: S,
        delay: Duration,
    ) -> Self {
        let mut layout = Vec::new();
        let mut autosaves = BTreeMap::new();
        let mut statuses = SaveStatusStore::new();

        for exercise in group_exercises_with_sets(&day.exercises, &logs) {
            let mut set_numbers = Vec::with_capacity(exercise.sets.len());
            for set in &exercise.sets {
                let key = SetKey::new(&session.id, &exercise.exercise_id, set.set_number);
                let existing = logs.iter().find(|l| l.key() == key);
                let autosave = match existing {
                    Some(log) => SetLogAutoSave::from_log(log, delay),
                    None => SetLogAutoSave::new(
                        key.clone(),
                        SetValues {
                            reps: 0,
                            weight: set.planned_weight,
                            completed: false,
                        },
                        delay,
                    ),
                };
                statuses.set(&key, autosave.state());
                autosaves.insert(key, autosave);
                set_numbers.push(set.set_number);
            }
            layout.push((exercise.exercise_id, set_numbers));
        }

        Self {
            session,
            day,
            logs,
            layout,
            autosaves,
            statuses,
            sink,
        }
    }

    pub fn session(&self) -> &WorkoutSession {
        &self.session
    }

    pub fn day(&self) -> &RoutineDay {
        &self.day
    }

    pub fn logs(&self) -> &[SetLog] {
        &self.logs
    }

    pub fn statuses(&self) -> &SaveStatusStore {
        &self.statuses
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Resolve 1-based (exercise, set) positions to a set key
    pub fn set_key(&self, exercise: usize, set: usize) -> Result<SetKey> {
        let (exercise_id, sets) = exercise
            .checked_sub(1)
            .and_then(|i| self.layout.get(i))
            .ok_or_else(|| Error::NotFound(format!("exercise #{exercise}")))?;
        let set_number = set
            .checked_sub(1)
            .and_then(|i| sets.get(i))
            .ok_or_else(|| Error::NotFound(format!("set #{set} of exercise #{exercise}")))?;
        Ok(SetKey::new(&self.session.id, exercise_id, *set_number))
    }

    fn ensure_running(&self) -> Result<()> {
        if self.session.status != SessionStatus::InProgress {
            return Err(Error::InvalidTransition {
                from: self.session.status,
                to: SessionStatus::InProgress,
            });
        }
        Ok(())
    }

    fn autosave_mut(&mut self, key: &SetKey) -> Result<&mut SetLogAutoSave> {
        self.autosaves
            .get_mut(key)
            .ok_or_else(|| Error::NotFound(format!("set {key}")))
    }

    pub fn state(&self, key: &SetKey) -> SaveState {
        self.statuses.get(key)
    }

    pub fn error_for(&self, key: &SetKey) -> Option<&str> {
        self.autosaves.get(key).and_then(|a| a.error())
    }

    pub fn values(&self, key: &SetKey) -> Option<SetValues> {
        self.autosaves.get(key).map(|a| a.values())
    }

    pub fn set_reps(&mut self, key: &SetKey, reps: i32, now: Instant) -> Result<SaveState> {
        self.ensure_running()?;
        let autosave = self.autosave_mut(key)?;
        autosave.set_reps(reps, now);
        let state = autosave.state();
        self.statuses.set(key, state);
        Ok(state)
    }

    pub fn set_weight(&mut self, key: &SetKey, weight: Option<f64>, now: Instant) -> Result<SaveState> {
        self.ensure_running()?;
        let autosave = self.autosave_mut(key)?;
        autosave.set_weight(weight, now);
        let state = autosave.state();
        self.statuses.set(key, state);
        Ok(state)
    }

    /// Completion toggles save right away
    pub fn toggle_completed(&mut self, key: &SetKey) -> Result<SaveState> {
        self.ensure_running()?;
        let payload = self.autosave_mut(key)?.toggle_completed();
        Ok(self.dispatch(key, payload))
    }

    pub fn retry(&mut self, key: &SetKey) -> Result<SaveState> {
        self.ensure_running()?;
        let payload = self.autosave_mut(key)?.retry();
        Ok(self.dispatch(key, payload))
    }

    /// Fire every debounced save whose delay has elapsed.
    /// Returns the keys that were saved (or failed) on this tick.
    pub fn tick(&mut self, now: Instant) -> Vec<(SetKey, SaveState)> {
        let due: Vec<(SetKey, Option<SetLogPayload>)> = self
            .autosaves
            .iter_mut()
            .filter(|(_, a)| a.is_pending())
            .map(|(k, a)| (k.clone(), a.poll(now)))
            .collect();

        self.run_saves(due)
    }

    /// Save every pending edit without waiting for its delay
    pub fn flush(&mut self) -> Vec<(SetKey, SaveState)> {
        let due: Vec<(SetKey, Option<SetLogPayload>)> = self
            .autosaves
            .iter_mut()
            .filter(|(_, a)| a.is_pending())
            .map(|(k, a)| (k.clone(), a.flush()))
            .collect();

        self.run_saves(due)
    }

    fn run_saves(&mut self, due: Vec<(SetKey, Option<SetLogPayload>)>) -> Vec<(SetKey, SaveState)> {
        let mut fired = Vec::new();
        for (key, payload) in due {
            let before = self.statuses.get(&key);
            let state = self.dispatch(&key, payload);
            if state != before {
                fired.push((key, state));
            }
        }
        fired
    }

    fn dispatch(&mut self, key: &SetKey, payload: Option<SetLogPayload>) -> SaveState {
        let Some(autosave) = self.autosaves.get_mut(key) else {
            return SaveState::Idle;
        };

        if let Some(payload) = payload {
            // optimistic local update before the sink answers
            let log = payload.to_log(Local::now());
            match self.logs.iter_mut().find(|l| l.key() == *key) {
                Some(existing) => *existing = log,
                None => self.logs.push(log),
            }
            match autosave.submit(payload, &mut self.sink) {
                Ok(saved) => debug!(%key, updated_at = %saved.updated_at, "set log stored"),
                Err(e) => debug!(%key, error = %e, "set log kept locally, save failed"),
            }
        }

        let state = autosave.state();
        self.statuses.set(key, state);
        state
    }

    pub fn progress(&self) -> SessionProgress {
        calculate_session_progress(&self.logs, &self.day.exercises)
    }

    pub fn all_sets_completed(&self) -> bool {
        are_all_sets_completed(&self.logs, &self.day.exercises)
    }

    pub fn grouped(&self) -> Vec<ExerciseWithSets> {
        group_exercises_with_sets(&self.day.exercises, &self.logs)
    }

    /// Flush pending edits, then mark the session completed
    pub fn finish(&mut self, now: DateTime<Local>) -> Result<&WorkoutSession> {
        self.ensure_running()?;
        self.flush();
        let progress = self.progress();
        self.session.complete(now)?;
        info!(
            session = %self.session.id,
            completed = progress.completed_sets,
            total = progress.total_sets,
            "session completed"
        );
        self.statuses.clear();
        Ok(&self.session)
    }

    pub fn abort(&mut self, now: DateTime<Local>) -> Result<&WorkoutSession> {
        self.ensure_running()?;
        self.flush();
        self.session.abort(now)?;
        self.statuses.clear();
        Ok(&self.session)
    }

    /// Apply an edit command. Status/finish/abort are left to the caller.
    pub fn apply(&mut self, command: &SessionCommand, now: Instant) -> Result<Option<(SetKey, SaveState)>> {
        let outcome = match *command {
            SessionCommand::Reps {
                exercise,
                set,
                reps,
            } => {
                let key = self.set_key(exercise, set)?;
                let state = self.set_reps(&key, reps, now)?;
                Some((key, state))
            }
            SessionCommand::Weight {
                exercise,
                set,
                weight,
            } => {
                let key = self.set_key(exercise, set)?;
                let state = self.set_weight(&key, weight, now)?;
                Some((key, state))
            }
            SessionCommand::Toggle { exercise, set } => {
                let key = self.set_key(exercise, set)?;
                let state = self.toggle_completed(&key)?;
                Some((key, state))
            }
            SessionCommand::Retry { exercise, set } => {
                let key = self.set_key(exercise, set)?;
                let state = self.retry(&key)?;
                Some((key, state))
            }
            SessionCommand::Status | SessionCommand::Finish | SessionCommand::Abort => None,
        };
        Ok(outcome)
    }

    /// Plain-text view of the session for the terminal
    pub fn status_report(&self, now: DateTime<Local>) -> String {
        let progress = self.progress();
        let mut out = format!(
            "{} [{}] {} - {}/{} sets ({}%)\n",
            self.day.name,
            self.session.status,
            self.session.elapsed_label(now),
            progress.completed_sets,
            progress.total_sets,
            progress.percentage
        );

        for (i, exercise) in self.grouped().iter().enumerate() {
            out.push_str(&format!("{}. {}\n", i + 1, exercise.name));
            for (j, set) in exercise.sets.iter().enumerate() {
                let key = SetKey::new(&self.session.id, &exercise.exercise_id, set.set_number);
                let (reps, weight, completed) = match self.autosaves.get(&key) {
                    Some(a) => {
                        let v = a.values();
                        (v.reps, v.weight, v.completed)
                    }
                    None => (set.reps, set.weight, set.completed),
                };
                let weight = weight.map_or_else(|| "bw".to_string(), |w| format!("{w}kg"));
                let mark = if completed { "x" } else { " " };
                out.push_str(&format!(
                    "   {}. [{mark}] {reps} x {weight} (target {}) {}",
                    j + 1,
                    set.target,
                    self.state(&key)
                ));
                if let Some(err) = self.error_for(&key) {
                    out.push_str(&format!(" - {err}"));
                }
                out.push('\n');
            }
        }
        out
    }
}

fn report<W: Write>(out: &mut W, key: &SetKey, state: SaveState, error: Option<&str>) -> std::io::Result<()> {
    match (state, error) {
        (SaveState::Error, Some(msg)) => writeln!(out, "{key}: {msg}"),
        _ => writeln!(out, "{key}: {state}"),
    }
}

/// Drive a tracker from `runner` until the user finishes, aborts, or input ends.
/// Returns the session status at exit; closed input leaves the session in progress.
pub fn drive<S, E, T, W>(
    tracker: &mut WorkoutTracker<S>,
    runner: &Runner<E, T>,
    out: &mut W,
) -> Result<SessionStatus>
where
    S: SetLogSink,
    E: SessionEventSource,
    T: Ticker,
    W: Write,
{
    loop {
        match runner.step() {
            SessionEvent::Tick => {
                for (key, state) in tracker.tick(Instant::now()) {
                    debug!(%key, %state, "debounced save settled");
                    if state == SaveState::Error {
                        report(out, &key, state, tracker.error_for(&key))?;
                    }
                }
            }
            SessionEvent::Command(SessionCommand::Status) => {
                write!(out, "{}", tracker.status_report(Local::now()))?;
            }
            SessionEvent::Command(SessionCommand::Finish) => {
                let session = tracker.finish(Local::now())?;
                writeln!(out, "workout {} completed", session.id)?;
                return Ok(SessionStatus::Completed);
            }
            SessionEvent::Command(SessionCommand::Abort) => {
                let session = tracker.abort(Local::now())?;
                writeln!(out, "workout {} aborted", session.id)?;
                return Ok(SessionStatus::Aborted);
            }
            SessionEvent::Command(command) => match tracker.apply(&command, Instant::now()) {
                Ok(Some((key, state))) if state != SaveState::Pending => {
                    report(out, &key, state, tracker.error_for(&key))?;
                    if tracker.all_sets_completed() {
                        writeln!(out, "all sets completed - type 'finish' to wrap up")?;
                    }
                }
                Ok(_) => {}
                Err(e) => writeln!(out, "{e}")?,
            },
            SessionEvent::Invalid(msg) => writeln!(out, "{msg}")?,
            SessionEvent::Closed => {
                tracker.flush();
                return Ok(tracker.session().status);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RepTarget, RoutineExercise, RoutineSet};

    const DELAY: Duration = Duration::from_millis(500);

    fn day() -> RoutineDay {
        let sets = |n: u32, weight: Option<f64>| -> Vec<RoutineSet> {
            (1..=n)
                .map(|set_number| RoutineSet {
                    set_number,
                    reps: RepTarget::Fixed(5),
                    weight,
                })
                .collect()
        };
        RoutineDay {
            id: "push".into(),
            routine_id: "r1".into(),
            name: "Push".into(),
            day_order: 1,
            exercises: vec![
                RoutineExercise {
                    id: "dips".into(),
                    name: "Dips".into(),
                    order: 2,
                    sets: sets(1, None),
                },
                RoutineExercise {
                    id: "bench".into(),
                    name: "Bench".into(),
                    order: 1,
                    sets: sets(2, Some(80.0)),
                },
            ],
        }
    }

    type Saved = Vec<SetLogPayload>;

    fn tracker() -> WorkoutTracker<impl SetLogSink> {
        let session = WorkoutSession::start("r1", "push", Local::now());
        let mut saved: Saved = Vec::new();
        let sink = move |p: &SetLogPayload| -> Result<SetLog> {
            saved.push(p.clone());
            Ok(p.to_log(Local::now()))
        };
        WorkoutTracker::new(session, day(), Vec::new(), sink, DELAY)
    }

    #[test]
    fn test_positions_follow_declared_order() {
        let t = tracker();
        assert_eq!(t.set_key(1, 2).unwrap().routine_exercise_id, "bench");
        assert_eq!(t.set_key(2, 1).unwrap().routine_exercise_id, "dips");
        assert!(t.set_key(3, 1).is_err());
        assert!(t.set_key(1, 3).is_err());
        assert!(t.set_key(0, 1).is_err());
    }

    #[test]
    fn test_edit_then_tick_saves_and_updates_progress() {
        let mut t = tracker();
        let start = Instant::now();
        let key = t.set_key(1, 1).unwrap();

        assert_eq!(t.set_reps(&key, 5, start).unwrap(), SaveState::Pending);
        assert_eq!(t.statuses().get(&key), SaveState::Pending);
        assert!(t.tick(start + Duration::from_millis(10)).is_empty());

        let fired = t.tick(start + DELAY);
        assert_eq!(fired, vec![(key.clone(), SaveState::Saved)]);
        assert_eq!(t.logs().len(), 1);
        assert_eq!(t.logs()[0].weight, Some(80.0));
        assert_eq!(t.progress().completed_sets, 0);

        assert_eq!(t.toggle_completed(&key).unwrap(), SaveState::Saved);
        assert_eq!(t.progress().completed_sets, 1);
        assert_eq!(t.progress().percentage, 33);
    }

    #[test]
    fn test_all_sets_completed_after_toggling_everything() {
        let mut t = tracker();
        for (ex, set) in [(1, 1), (1, 2), (2, 1)] {
            let key = t.set_key(ex, set).unwrap();
            t.toggle_completed(&key).unwrap();
        }
        assert!(t.all_sets_completed());
        assert_eq!(t.progress().percentage, 100);
    }

    #[test]
    fn test_failed_save_marks_error() {
        let session = WorkoutSession::start("r1", "push", Local::now());
        let sink = |_: &SetLogPayload| -> Result<SetLog> { Err(Error::Save("offline".into())) };
        let mut t = WorkoutTracker::new(session, day(), Vec::new(), sink, DELAY);
        let key = t.set_key(1, 1).unwrap();

        assert_eq!(t.toggle_completed(&key).unwrap(), SaveState::Error);
        assert_eq!(t.error_for(&key), Some(crate::autosave::SAVE_FAILED_MESSAGE));
        assert_eq!(t.statuses().get(&key), SaveState::Error);
        // optimistic update stays visible
        assert_eq!(t.progress().completed_sets, 1);
    }

    #[test]
    fn test_finish_flushes_pending_and_clears_statuses() {
        let mut t = tracker();
        let key = t.set_key(1, 2).unwrap();
        t.set_reps(&key, 4, Instant::now()).unwrap();

        let session = t.finish(Local::now()).unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(t.logs().len(), 1);
        assert_eq!(t.logs()[0].reps, 4);
        assert!(t.statuses().is_empty());

        assert!(t.set_reps(&key, 5, Instant::now()).is_err());
        assert!(t.finish(Local::now()).is_err());
    }

    #[test]
    fn test_existing_logs_hydrate_state() {
        let session = WorkoutSession::start("r1", "push", Local::now());
        let existing = SetLog {
            session_id: session.id.clone(),
            routine_exercise_id: "bench".into(),
            set_number: 1,
            reps: 5,
            weight: Some(80.0),
            completed: true,
            updated_at: Local::now(),
        };
        let sink = |p: &SetLogPayload| -> Result<SetLog> { Ok(p.to_log(Local::now())) };
        let t = WorkoutTracker::new(session, day(), vec![existing], sink, DELAY);
        let key = t.set_key(1, 1).unwrap();

        assert_eq!(t.state(&key), SaveState::Saved);
        assert_eq!(t.values(&key).unwrap().reps, 5);
        assert_eq!(t.progress().completed_sets, 1);
    }

    #[test]
    fn test_status_report_lists_sets() {
        let mut t = tracker();
        let key = t.set_key(1, 1).unwrap();
        t.toggle_completed(&key).unwrap();

        let report = t.status_report(Local::now());
        assert!(report.starts_with("Push [IN_PROGRESS]"));
        assert!(report.contains("1/3 sets (33%)"));
        assert!(report.contains("1. Bench"));
        assert!(report.contains("[x] 0 x 80kg (target 5) saved"));
        assert!(report.contains("2. Dips"));
        assert!(report.contains("x bw"));
    }

    #[test]
    fn test_apply_reports_bad_positions() {
        let mut t = tracker();
        let err = t
            .apply(&SessionCommand::Toggle { exercise: 9, set: 1 }, Instant::now())
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(t
            .apply(&SessionCommand::Status, Instant::now())
            .unwrap()
            .is_none());
    }
}
