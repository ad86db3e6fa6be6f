use crate::debounce::Debouncer;
use crate::error::Result;
use crate::model::{SetKey, SetLog};
use crate::validation::{validate, SetLogPayload};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);
pub const SAVE_FAILED_MESSAGE: &str = "Failed to save. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum SaveState {
    Idle,
    Pending,
    Saving,
    Saved,
    Error,
}

/// Where saved set logs go. Implemented by the store and by plain closures.
pub trait SetLogSink {
    fn save(&mut self, payload: &SetLogPayload) -> Result<SetLog>;
}

impl<F> SetLogSink for F
where
    F: FnMut(&SetLogPayload) -> Result<SetLog>,
{
    fn save(&mut self, payload: &SetLogPayload) -> Result<SetLog> {
        self(payload)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetValues {
    pub reps: i32,
    pub weight: Option<f64>,
    pub completed: bool,
}

/// Auto-save state for one set row.
///
/// Edits to reps or weight go `Pending` at once and are debounced. When the
/// debounce fires with values that differ from the last save, the payload is
/// validated and handed out for saving. Completion toggles skip the debounce.
#[derive(Debug, Clone)]
pub struct SetLogAutoSave {
    key: SetKey,
    current: SetValues,
    last_saved: SetValues,
    has_saved: bool,
    debouncer: Debouncer<SetValues>,
    state: SaveState,
    error: Option<String>,
    failed: Option<SetLogPayload>,
}

impl SetLogAutoSave {
    pub fn new(key: SetKey, initial: SetValues, delay: Duration) -> Self {
        Self {
            key,
            current: initial,
            last_saved: initial,
            has_saved: false,
            debouncer: Debouncer::new(delay),
            state: SaveState::Idle,
            error: None,
            failed: None,
        }
    }

    /// Start from a log that already exists in the backend
    pub fn from_log(log: &SetLog, delay: Duration) -> Self {
        let values = SetValues {
            reps: log.reps,
            weight: log.weight,
            completed: log.completed,
        };
        let mut autosave = Self::new(log.key(), values, delay);
        autosave.has_saved = true;
        autosave.state = SaveState::Saved;
        autosave
    }

    pub fn key(&self) -> &SetKey {
        &self.key
    }

    pub fn state(&self) -> SaveState {
        self.state
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn values(&self) -> SetValues {
        self.current
    }

    pub fn last_saved(&self) -> SetValues {
        self.last_saved
    }

    pub fn is_pending(&self) -> bool {
        self.debouncer.is_pending()
    }

    pub fn set_reps(&mut self, reps: i32, now: Instant) {
        self.current.reps = reps;
        self.on_edit(now);
    }

    pub fn set_weight(&mut self, weight: Option<f64>, now: Instant) {
        self.current.weight = weight;
        self.on_edit(now);
    }

    fn on_edit(&mut self, now: Instant) {
        if self.current == self.last_saved {
            if self.debouncer.cancel().is_some() {
                debug!(key = %self.key, "edit reverted, pending save cancelled");
            }
            self.settle();
            return;
        }
        self.state = SaveState::Pending;
        self.error = None;
        self.debouncer.schedule(self.current, now);
    }

    fn settle(&mut self) {
        if self.failed.is_some() {
            // the backend never got these values
            self.state = SaveState::Error;
            self.error = Some(SAVE_FAILED_MESSAGE.to_string());
            return;
        }
        self.error = None;
        self.state = if self.has_saved {
            SaveState::Saved
        } else {
            SaveState::Idle
        };
    }

    /// Fires the debounced save once its delay has elapsed
    pub fn poll(&mut self, now: Instant) -> Option<SetLogPayload> {
        let values = self.debouncer.poll(now)?;
        self.begin_save(values)
    }

    /// Fires any pending save immediately, ignoring the remaining delay
    pub fn flush(&mut self) -> Option<SetLogPayload> {
        let values = self.debouncer.cancel()?;
        self.begin_save(values)
    }

    pub fn toggle_completed(&mut self) -> Option<SetLogPayload> {
        self.debouncer.cancel();
        self.current.completed = !self.current.completed;
        self.begin_save(self.current)
    }

    /// Re-submits the payload whose save failed
    pub fn retry(&mut self) -> Option<SetLogPayload> {
        let payload = self.failed.take()?;
        debug!(key = %self.key, "retrying failed save");
        self.state = SaveState::Saving;
        self.error = None;
        Some(payload)
    }

    fn compose(&self, values: SetValues) -> SetLogPayload {
        SetLogPayload {
            session_id: self.key.session_id.clone(),
            routine_exercise_id: self.key.routine_exercise_id.clone(),
            set_number: self.key.set_number,
            reps: values.reps,
            weight: values.weight,
            completed: values.completed,
        }
    }

    fn begin_save(&mut self, values: SetValues) -> Option<SetLogPayload> {
        if values == self.last_saved {
            self.settle();
            return None;
        }
        let payload = self.compose(values);
        if let Err(e) = validate(&payload) {
            debug!(key = %self.key, error = %e, "save blocked by validation");
            self.state = SaveState::Error;
            self.error = Some(match e {
                crate::error::Error::Validation(msg) => msg,
                other => other.to_string(),
            });
            return None;
        }
        debug!(key = %self.key, reps = values.reps, completed = values.completed, "saving set");
        // optimistic: later identical edits are suppressed even if this save fails
        self.last_saved = values;
        self.state = SaveState::Saving;
        self.error = None;
        self.failed = None;
        Some(payload)
    }

    pub fn complete_save(&mut self, payload: &SetLogPayload, result: &Result<SetLog>) {
        match result {
            Ok(_) => {
                self.has_saved = true;
                if self.state == SaveState::Saving {
                    self.state = SaveState::Saved;
                }
            }
            Err(e) => {
                warn!(key = %self.key, error = %e, "set log save failed");
                self.failed = Some(payload.clone());
                if self.state == SaveState::Saving {
                    self.state = SaveState::Error;
                    self.error = Some(SAVE_FAILED_MESSAGE.to_string());
                }
            }
        }
    }

    /// Hand `payload` to the sink and record the outcome
    pub fn submit<S: SetLogSink + ?Sized>(
        &mut self,
        payload: SetLogPayload,
        sink: &mut S,
    ) -> Result<SetLog> {
        let result = sink.save(&payload);
        self.complete_save(&payload, &result);
        result
    }

    /// Poll and, if the debounce fired, save through `sink`
    pub fn tick<S: SetLogSink + ?Sized>(&mut self, now: Instant, sink: &mut S) -> Option<Result<SetLog>> {
        let payload = self.poll(now)?;
        Some(self.submit(payload, sink))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use chrono::Local;

    const DELAY: Duration = Duration::from_millis(500);

    fn autosave() -> SetLogAutoSave {
        SetLogAutoSave::new(
            SetKey::new("s1", "bench", 1),
            SetValues {
                reps: 0,
                weight: Some(80.0),
                completed: false,
            },
            DELAY,
        )
    }

    #[derive(Default)]
    struct RecordingSink {
        saved: Vec<SetLogPayload>,
        fail: bool,
    }

    impl SetLogSink for RecordingSink {
        fn save(&mut self, payload: &SetLogPayload) -> Result<SetLog> {
            if self.fail {
                return Err(Error::Save("connection refused".into()));
            }
            self.saved.push(payload.clone());
            Ok(payload.to_log(Local::now()))
        }
    }

    #[test]
    fn test_edit_goes_pending_then_saves_after_delay() {
        let start = Instant::now();
        let mut sink = RecordingSink::default();
        let mut a = autosave();

        a.set_reps(5, start);
        assert_eq!(a.state(), SaveState::Pending);
        assert!(a.tick(start + Duration::from_millis(100), &mut sink).is_none());
        assert!(sink.saved.is_empty());

        let result = a.tick(start + DELAY, &mut sink);
        assert!(matches!(result, Some(Ok(_))));
        assert_eq!(a.state(), SaveState::Saved);
        assert_eq!(sink.saved.len(), 1);
        assert_eq!(sink.saved[0].reps, 5);
        assert_eq!(sink.saved[0].weight, Some(80.0));
    }

    #[test]
    fn test_keystrokes_coalesce_into_one_save() {
        let start = Instant::now();
        let mut sink = RecordingSink::default();
        let mut a = autosave();

        a.set_reps(1, start);
        a.set_reps(12, start + Duration::from_millis(200));
        a.set_weight(Some(82.5), start + Duration::from_millis(400));

        assert!(a.tick(start + Duration::from_millis(800), &mut sink).is_none());
        assert!(a.tick(start + Duration::from_millis(900), &mut sink).is_some());
        assert_eq!(sink.saved.len(), 1);
        assert_eq!(sink.saved[0].reps, 12);
        assert_eq!(sink.saved[0].weight, Some(82.5));
    }

    #[test]
    fn test_revert_before_debounce_does_not_save() {
        let start = Instant::now();
        let mut sink = RecordingSink::default();
        let mut a = autosave();

        a.set_reps(8, start);
        assert_eq!(a.state(), SaveState::Pending);
        a.set_reps(0, start + Duration::from_millis(100));
        assert_eq!(a.state(), SaveState::Idle);
        assert!(!a.is_pending());

        assert!(a.tick(start + DELAY * 4, &mut sink).is_none());
        assert!(sink.saved.is_empty());
    }

    #[test]
    fn test_revert_to_last_saved_returns_to_saved() {
        let start = Instant::now();
        let mut sink = RecordingSink::default();
        let mut a = autosave();

        a.set_reps(5, start);
        a.tick(start + DELAY, &mut sink);
        assert_eq!(a.state(), SaveState::Saved);

        let later = start + DELAY * 2;
        a.set_reps(6, later);
        a.set_reps(5, later + Duration::from_millis(50));
        assert_eq!(a.state(), SaveState::Saved);
        assert!(a.tick(later + DELAY * 2, &mut sink).is_none());
        assert_eq!(sink.saved.len(), 1);
    }

    #[test]
    fn test_toggle_saves_immediately() {
        let start = Instant::now();
        let mut sink = RecordingSink::default();
        let mut a = autosave();

        a.set_reps(5, start);
        let payload = a.toggle_completed().expect("toggle should save");
        assert!(payload.completed);
        assert_eq!(payload.reps, 5);
        assert_eq!(a.state(), SaveState::Saving);
        a.submit(payload, &mut sink).unwrap();

        assert_eq!(a.state(), SaveState::Saved);
        assert!(!a.is_pending());
        assert!(a.tick(start + DELAY, &mut sink).is_none());
        assert_eq!(sink.saved.len(), 1);
    }

    #[test]
    fn test_invalid_payload_blocks_save() {
        let start = Instant::now();
        let mut sink = RecordingSink::default();
        let mut a = autosave();

        a.set_reps(-3, start);
        assert!(a.tick(start + DELAY, &mut sink).is_none());
        assert_eq!(a.state(), SaveState::Error);
        assert_eq!(a.error(), Some("Reps cannot be negative"));
        assert!(sink.saved.is_empty());
        assert_eq!(a.last_saved().reps, 0);
    }

    #[test]
    fn test_failed_save_sets_error_without_retry() {
        let start = Instant::now();
        let mut sink = RecordingSink {
            fail: true,
            ..Default::default()
        };
        let mut a = autosave();

        a.set_reps(5, start);
        let result = a.tick(start + DELAY, &mut sink);
        assert!(matches!(result, Some(Err(_))));
        assert_eq!(a.state(), SaveState::Error);
        assert_eq!(a.error(), Some(SAVE_FAILED_MESSAGE));

        // nothing is retried on later ticks
        assert!(a.tick(start + DELAY * 10, &mut sink).is_none());
        assert_eq!(a.state(), SaveState::Error);
    }

    #[test]
    fn test_manual_retry_resubmits_failed_payload() {
        let start = Instant::now();
        let mut sink = RecordingSink {
            fail: true,
            ..Default::default()
        };
        let mut a = autosave();
        a.set_reps(5, start);
        a.tick(start + DELAY, &mut sink);

        sink.fail = false;
        let payload = a.retry().expect("failed payload kept for retry");
        assert_eq!(a.state(), SaveState::Saving);
        a.submit(payload, &mut sink).unwrap();

        assert_eq!(a.state(), SaveState::Saved);
        assert_eq!(sink.saved.len(), 1);
        assert!(a.retry().is_none());
    }

    #[test]
    fn test_revert_to_failed_values_stays_error() {
        let start = Instant::now();
        let mut sink = RecordingSink::default();
        let mut a = autosave();
        a.set_reps(5, start);
        a.tick(start + DELAY, &mut sink);
        assert_eq!(a.state(), SaveState::Saved);

        sink.fail = true;
        let later = start + DELAY * 2;
        a.set_reps(6, later);
        assert!(matches!(a.tick(later + DELAY, &mut sink), Some(Err(_))));
        assert_eq!(a.state(), SaveState::Error);

        let edit = later + DELAY * 2;
        a.set_reps(7, edit);
        assert_eq!(a.state(), SaveState::Pending);
        a.set_reps(6, edit + Duration::from_millis(50));
        assert_eq!(a.state(), SaveState::Error);
        assert_eq!(a.error(), Some(SAVE_FAILED_MESSAGE));
        assert!(!a.is_pending());

        sink.fail = false;
        let payload = a.retry().expect("failed payload still kept");
        assert_eq!(payload.reps, 6);
        a.submit(payload, &mut sink).unwrap();
        assert_eq!(a.state(), SaveState::Saved);
        assert_eq!(sink.saved.last().map(|p| p.reps), Some(6));
    }

    #[test]
    fn test_flush_ignores_remaining_delay() {
        let start = Instant::now();
        let mut a = autosave();
        a.set_weight(Some(85.0), start);

        let payload = a.flush().expect("pending edit flushed");
        assert_eq!(payload.weight, Some(85.0));
        assert!(a.flush().is_none());
    }

    #[test]
    fn test_from_log_starts_saved() {
        let log = SetLog {
            session_id: "s1".into(),
            routine_exercise_id: "bench".into(),
            set_number: 2,
            reps: 5,
            weight: Some(80.0),
            completed: true,
            updated_at: Local::now(),
        };
        let mut a = SetLogAutoSave::from_log(&log, DELAY);
        assert_eq!(a.state(), SaveState::Saved);
        assert_eq!(a.key().to_string(), "s1:bench:2");

        let start = Instant::now();
        a.set_reps(5, start);
        assert_eq!(a.state(), SaveState::Saved);
    }

    #[test]
    fn test_closure_sink() {
        let start = Instant::now();
        let mut calls = 0;
        let mut sink = |p: &SetLogPayload| -> Result<SetLog> {
            calls += 1;
            Ok(p.to_log(Local::now()))
        };
        let mut a = autosave();
        a.set_reps(3, start);
        a.tick(start + DELAY, &mut sink);
        assert_eq!(calls, 1);
    }
}
