use crate::autosave::SetLogSink;
use crate::error::{Error, Result};
use crate::model::{
    Routine, RoutineDay, RoutineExercise, RoutineSet, SessionStatus, SetLog, TmAdjustment,
    WorkoutSession,
};
use crate::validation::{validate, SetLogPayload};
use chrono::{DateTime, Local};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use tracing::debug;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS routines (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP
    );

    CREATE TABLE IF NOT EXISTS routine_days (
        id TEXT NOT NULL,
        routine_id TEXT NOT NULL,
        name TEXT NOT NULL,
        day_order INTEGER NOT NULL,
        PRIMARY KEY (routine_id, id)
    );

    CREATE TABLE IF NOT EXISTS routine_exercises (
        id TEXT NOT NULL,
        routine_id TEXT NOT NULL,
        day_id TEXT NOT NULL,
        name TEXT NOT NULL,
        exercise_order INTEGER NOT NULL,
        sets_json TEXT NOT NULL,
        PRIMARY KEY (routine_id, day_id, id)
    );

    CREATE TABLE IF NOT EXISTS workout_sessions (
        id TEXT PRIMARY KEY,
        routine_id TEXT NOT NULL,
        routine_day_id TEXT NOT NULL,
        status TEXT NOT NULL,
        started_at TEXT NOT NULL,
        ended_at TEXT
    );

    CREATE TABLE IF NOT EXISTS set_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id TEXT NOT NULL,
        routine_exercise_id TEXT NOT NULL,
        set_number INTEGER NOT NULL,
        reps INTEGER NOT NULL,
        weight REAL,
        completed BOOLEAN NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (session_id, routine_exercise_id, set_number)
    );

    CREATE TABLE IF NOT EXISTS tm_adjustments (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        exercise_id TEXT NOT NULL,
        week_number INTEGER NOT NULL,
        previous_tm REAL NOT NULL,
        new_tm REAL NOT NULL,
        percent REAL NOT NULL,
        recorded_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_set_logs_session ON set_logs(session_id);
    CREATE INDEX IF NOT EXISTS idx_sessions_started ON workout_sessions(started_at);
"#;

/// SQLite-backed routines, sessions and set logs
#[derive(Debug)]
pub struct WorkoutStore {
    conn: Connection,
}

impl WorkoutStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "opened workout store");
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Insert or fully replace a routine with its days and exercises
    pub fn save_routine(&mut self, routine: &Routine) -> Result<()> {
        routine.validate()?;
        let tx = self.conn.transaction()?;

        tx.execute(
            "INSERT INTO routines (id, name) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name",
            params![routine.id, routine.name],
        )?;
        tx.execute(
            "DELETE FROM routine_exercises WHERE routine_id = ?1",
            params![routine.id],
        )?;
        tx.execute(
            "DELETE FROM routine_days WHERE routine_id = ?1",
            params![routine.id],
        )?;

        for day in &routine.days {
            tx.execute(
                "INSERT INTO routine_days (id, routine_id, name, day_order) VALUES (?1, ?2, ?3, ?4)",
                params![day.id, routine.id, day.name, day.day_order],
            )?;
            for exercise in &day.exercises {
                tx.execute(
                    r#"
                    INSERT INTO routine_exercises
                        (id, routine_id, day_id, name, exercise_order, sets_json)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    "#,
                    params![
                        exercise.id,
                        routine.id,
                        day.id,
                        exercise.name,
                        exercise.order,
                        serde_json::to_string(&exercise.sets)?,
                    ],
                )?;
            }
        }

        tx.commit()?;
        debug!(routine = %routine.id, days = routine.days.len(), "routine saved");
        Ok(())
    }

    pub fn get_routine(&self, id: &str) -> Result<Routine> {
        let name: Option<String> = self
            .conn
            .query_row("SELECT name FROM routines WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()?;
        let name = name.ok_or_else(|| Error::NotFound(format!("routine '{id}'")))?;

        let mut stmt = self.conn.prepare(
            "SELECT id, name, day_order FROM routine_days WHERE routine_id = ?1 ORDER BY day_order",
        )?;
        let day_rows = stmt.query_map([id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, u32>(2)?,
            ))
        })?;

        let mut days = Vec::new();
        for day in day_rows {
            let (day_id, day_name, day_order) = day?;
            days.push(RoutineDay {
                exercises: self.day_exercises(id, &day_id)?,
                id: day_id,
                routine_id: id.to_string(),
                name: day_name,
                day_order,
            });
        }

        Ok(Routine {
            id: id.to_string(),
            name,
            days,
        })
    }

    fn day_exercises(&self, routine_id: &str, day_id: &str) -> Result<Vec<RoutineExercise>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, name, exercise_order, sets_json
            FROM routine_exercises
            WHERE routine_id = ?1 AND day_id = ?2
            ORDER BY exercise_order
            "#,
        )?;
        let rows = stmt.query_map([routine_id, day_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, u32>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut exercises = Vec::new();
        for row in rows {
            let (id, name, order, sets_json) = row?;
            let sets: Vec<RoutineSet> = serde_json::from_str(&sets_json)?;
            exercises.push(RoutineExercise {
                id,
                name,
                order,
                sets,
            });
        }
        Ok(exercises)
    }

    pub fn list_routines(&self) -> Result<Vec<Routine>> {
        let mut stmt = self.conn.prepare("SELECT id FROM routines ORDER BY name")?;
        let ids = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut routines = Vec::new();
        for id in ids {
            routines.push(self.get_routine(&id?)?);
        }
        Ok(routines)
    }

    pub fn get_day(&self, routine_id: &str, needle: &str) -> Result<RoutineDay> {
        let routine = self.get_routine(routine_id)?;
        routine
            .find_day(needle)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("day '{needle}' in routine '{routine_id}'")))
    }

    pub fn create_session(&self, session: &WorkoutSession) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO workout_sessions (id, routine_id, routine_day_id, status, started_at, ended_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                session.id,
                session.routine_id,
                session.routine_day_id,
                session.status.to_string(),
                session.started_at.to_rfc3339(),
                session.ended_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    pub fn update_session(&self, session: &WorkoutSession) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE workout_sessions SET status = ?2, ended_at = ?3 WHERE id = ?1",
            params![
                session.id,
                session.status.to_string(),
                session.ended_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!("session '{}'", session.id)));
        }
        Ok(())
    }

    pub fn get_session(&self, id: &str) -> Result<WorkoutSession> {
        self.conn
            .query_row(
                r#"
                SELECT id, routine_id, routine_day_id, status, started_at, ended_at
                FROM workout_sessions WHERE id = ?1
                "#,
                [id],
                session_from_row,
            )
            .optional()?
            .ok_or_else(|| Error::NotFound(format!("session '{id}'")))
    }

    /// Most recent sessions first
    pub fn list_sessions(&self, limit: usize) -> Result<Vec<WorkoutSession>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, routine_id, routine_day_id, status, started_at, ended_at
            FROM workout_sessions
            ORDER BY started_at DESC
            LIMIT ?1
            "#,
        )?;
        let rows = stmt.query_map([limit as i64], session_from_row)?;
        let mut sessions = Vec::new();
        for session in rows {
            sessions.push(session?);
        }
        Ok(sessions)
    }

    /// Insert or update the log for (session, exercise, set number)
    pub fn upsert_set_log(&self, payload: &SetLogPayload, now: DateTime<Local>) -> Result<SetLog> {
        validate(payload)?;

        let session = self.get_session(&payload.session_id)?;
        if session.status != SessionStatus::InProgress {
            return Err(Error::Save(format!("session is {}", session.status)));
        }

        self.conn.execute(
            r#"
            INSERT INTO set_logs
            (session_id, routine_exercise_id, set_number, reps, weight, completed, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(session_id, routine_exercise_id, set_number) DO UPDATE SET
                reps = excluded.reps,
                weight = excluded.weight,
                completed = excluded.completed,
                updated_at = excluded.updated_at
            "#,
            params![
                payload.session_id,
                payload.routine_exercise_id,
                payload.set_number,
                payload.reps,
                payload.weight,
                payload.completed,
                now.to_rfc3339(),
            ],
        )?;

        Ok(payload.to_log(now))
    }

    pub fn set_logs(&self, session_id: &str) -> Result<Vec<SetLog>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT session_id, routine_exercise_id, set_number, reps, weight, completed, updated_at
            FROM set_logs
            WHERE session_id = ?1
            ORDER BY routine_exercise_id, set_number
            "#,
        )?;
        let rows = stmt.query_map([session_id], |row| {
            Ok(SetLog {
                session_id: row.get(0)?,
                routine_exercise_id: row.get(1)?,
                set_number: row.get(2)?,
                reps: row.get(3)?,
                weight: row.get(4)?,
                completed: row.get(5)?,
                updated_at: parse_timestamp(row, 6)?,
            })
        })?;

        let mut logs = Vec::new();
        for log in rows {
            logs.push(log?);
        }
        Ok(logs)
    }

    pub fn record_tm_adjustments(
        &mut self,
        adjustments: &[TmAdjustment],
        now: DateTime<Local>,
    ) -> Result<()> {
        let tx = self.conn.transaction()?;
        for adj in adjustments {
            tx.execute(
                r#"
                INSERT INTO tm_adjustments
                (exercise_id, week_number, previous_tm, new_tm, percent, recorded_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    adj.exercise_id,
                    adj.week_number,
                    adj.previous_tm,
                    adj.new_tm,
                    adj.percent,
                    now.to_rfc3339(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn tm_adjustments(&self, exercise_id: &str) -> Result<Vec<TmAdjustment>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT exercise_id, week_number, previous_tm, new_tm, percent
            FROM tm_adjustments
            WHERE exercise_id = ?1
            ORDER BY week_number, id
            "#,
        )?;
        let rows = stmt.query_map([exercise_id], |row| {
            Ok(TmAdjustment {
                exercise_id: row.get(0)?,
                week_number: row.get(1)?,
                previous_tm: row.get(2)?,
                new_tm: row.get(3)?,
                percent: row.get(4)?,
            })
        })?;

        let mut adjustments = Vec::new();
        for adj in rows {
            adjustments.push(adj?);
        }
        Ok(adjustments)
    }
}

impl SetLogSink for WorkoutStore {
    fn save(&mut self, payload: &SetLogPayload) -> Result<SetLog> {
        self.upsert_set_log(payload, Local::now())
    }
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Local>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Local))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<WorkoutSession> {
    let status: String = row.get(3)?;
    let status = SessionStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(3, "status".to_string(), rusqlite::types::Type::Text)
    })?;
    let ended_at = match row.get::<_, Option<String>>(5)? {
        Some(_) => Some(parse_timestamp(row, 5)?),
        None => None,
    };

    Ok(WorkoutSession {
        id: row.get(0)?,
        routine_id: row.get(1)?,
        routine_day_id: row.get(2)?,
        status,
        started_at: parse_timestamp(row, 4)?,
        ended_at,
    })
}
