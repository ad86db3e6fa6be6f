use crate::error::{Error, Result};
use crate::model::{SessionStatus, WorkoutSession};
use crate::util::{format_duration, new_id};
use chrono::{DateTime, Local};
use std::time::Duration;
use tracing::info;

impl WorkoutSession {
    pub fn start(routine_id: &str, routine_day_id: &str, now: DateTime<Local>) -> Self {
        let session = Self {
            id: new_id("ses"),
            routine_id: routine_id.to_string(),
            routine_day_id: routine_day_id.to_string(),
            status: SessionStatus::InProgress,
            started_at: now,
            ended_at: None,
        };
        info!(session = %session.id, day = routine_day_id, "workout started");
        session
    }

    pub fn complete(&mut self, now: DateTime<Local>) -> Result<()> {
        self.finish(SessionStatus::Completed, now)
    }

    pub fn abort(&mut self, now: DateTime<Local>) -> Result<()> {
        self.finish(SessionStatus::Aborted, now)
    }

    fn finish(&mut self, to: SessionStatus, now: DateTime<Local>) -> Result<()> {
        if self.status != SessionStatus::InProgress {
            return Err(Error::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.ended_at = Some(now);
        info!(session = %self.id, status = %to, "workout finished");
        Ok(())
    }

    /// Time on the clock: up to `now` while running, up to the end once finished
    pub fn elapsed(&self, now: DateTime<Local>) -> Duration {
        let end = self.ended_at.unwrap_or(now);
        (end - self.started_at).to_std().unwrap_or_default()
    }

    pub fn elapsed_label(&self, now: DateTime<Local>) -> String {
        format_duration(self.elapsed(now))
    }
}
