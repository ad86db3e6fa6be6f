use crate::error::{Error, Result};
use chrono::{DateTime, Local};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Routine {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub days: Vec<RoutineDay>,
}

impl Routine {
    /// Find a day either by id or by its 1-based position in day order
    pub fn find_day(&self, needle: &str) -> Option<&RoutineDay> {
        if let Some(day) = self.days.iter().find(|d| d.id == needle) {
            return Some(day);
        }
        let position = needle.parse::<usize>().ok()?;
        let mut days: Vec<&RoutineDay> = self.days.iter().collect();
        days.sort_by_key(|d| d.day_order);
        position.checked_sub(1).and_then(|i| days.get(i).copied())
    }

    /// Every planned set must be addressable by (day, exercise, set number)
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::InvalidRoutine("routine id must not be empty".into()));
        }
        if let Some(dup) = self.days.iter().map(|d| d.id.as_str()).duplicates().next() {
            return Err(Error::InvalidRoutine(format!("day '{dup}' appears twice")));
        }
        for day in &self.days {
            if let Some(dup) = day.exercises.iter().map(|e| e.id.as_str()).duplicates().next() {
                return Err(Error::InvalidRoutine(format!(
                    "exercise '{dup}' appears twice on day '{}'",
                    day.name
                )));
            }
            for exercise in &day.exercises {
                if let Some(bad) = exercise.sets.iter().find(|s| s.set_number < 1) {
                    return Err(Error::InvalidRoutine(format!(
                        "{} on day '{}' has a set numbered {}",
                        exercise.id, day.name, bad.set_number
                    )));
                }
                if let Some(dup) = exercise.sets.iter().map(|s| s.set_number).duplicates().next() {
                    return Err(Error::InvalidRoutine(format!(
                        "{} on day '{}' plans set {dup} twice",
                        exercise.id, day.name
                    )));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoutineDay {
    pub id: String,
    #[serde(default)]
    pub routine_id: String,
    pub name: String,
    #[serde(default)]
    pub day_order: u32,
    #[serde(default)]
    pub exercises: Vec<RoutineExercise>,
}

impl RoutineDay {
    pub fn total_sets(&self) -> usize {
        self.exercises.iter().map(|e| e.sets.len()).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoutineExercise {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub order: u32,
    #[serde(default)]
    pub sets: Vec<RoutineSet>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoutineSet {
    pub set_number: u32,
    pub reps: RepTarget,
    #[serde(default)]
    pub weight: Option<f64>,
}

/// Planned reps: either a fixed count (`8`) or a range (`{"min": 8, "max": 12}`)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum RepTarget {
    Fixed(u32),
    Range { min: u32, max: u32 },
}

impl RepTarget {
    pub fn min(&self) -> u32 {
        match *self {
            RepTarget::Fixed(reps) => reps,
            RepTarget::Range { min, .. } => min,
        }
    }
}

impl fmt::Display for RepTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepTarget::Fixed(reps) => write!(f, "{reps}"),
            RepTarget::Range { min, max } => write!(f, "{min}-{max}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    InProgress,
    Completed,
    Aborted,
}

impl SessionStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "IN_PROGRESS" => Some(SessionStatus::InProgress),
            "COMPLETED" => Some(SessionStatus::Completed),
            "ABORTED" => Some(SessionStatus::Aborted),
            _ => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self, SessionStatus::InProgress)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkoutSession {
    pub id: String,
    pub routine_id: String,
    pub routine_day_id: String,
    pub status: SessionStatus,
    pub started_at: DateTime<Local>,
    pub ended_at: Option<DateTime<Local>>,
}

/// Identity of one planned set within a session; upserts are keyed on it
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SetKey {
    pub session_id: String,
    pub routine_exercise_id: String,
    pub set_number: u32,
}

impl SetKey {
    pub fn new(session_id: &str, routine_exercise_id: &str, set_number: u32) -> Self {
        Self {
            session_id: session_id.to_string(),
            routine_exercise_id: routine_exercise_id.to_string(),
            set_number,
        }
    }
}

impl fmt::Display for SetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.session_id, self.routine_exercise_id, self.set_number
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SetLog {
    pub session_id: String,
    pub routine_exercise_id: String,
    pub set_number: u32,
    pub reps: i32,
    pub weight: Option<f64>,
    pub completed: bool,
    pub updated_at: DateTime<Local>,
}

impl SetLog {
    pub fn key(&self) -> SetKey {
        SetKey::new(&self.session_id, &self.routine_exercise_id, self.set_number)
    }

    pub fn volume(&self) -> f64 {
        self.weight.unwrap_or(0.0) * self.reps.max(0) as f64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TmAdjustment {
    pub exercise_id: String,
    pub week_number: u32,
    pub previous_tm: f64,
    pub new_tm: f64,
    /// Fractional change applied, e.g. `0.03` for +3%
    pub percent: f64,
}

impl TmAdjustment {
    pub fn delta(&self) -> f64 {
        self.new_tm - self.previous_tm
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn day() -> RoutineDay {
        RoutineDay {
            id: "day-a".into(),
            routine_id: "r1".into(),
            name: "Push".into(),
            day_order: 1,
            exercises: vec![
                RoutineExercise {
                    id: "bench".into(),
                    name: "Bench".into(),
                    order: 1,
                    sets: vec![
                        RoutineSet {
                            set_number: 1,
                            reps: RepTarget::Fixed(5),
                            weight: Some(80.0),
                        },
                        RoutineSet {
                            set_number: 2,
                            reps: RepTarget::Fixed(5),
                            weight: Some(80.0),
                        },
                    ],
                },
                RoutineExercise {
                    id: "dips".into(),
                    name: "Dips".into(),
                    order: 2,
                    sets: vec![RoutineSet {
                        set_number: 1,
                        reps: RepTarget::Range { min: 8, max: 12 },
                        weight: None,
                    }],
                },
            ],
        }
    }

    #[test]
    fn test_total_sets_sums_templates() {
        assert_eq!(day().total_sets(), 3);
    }

    #[test]
    fn test_rep_target_parses_fixed_and_range() {
        let fixed: RepTarget = serde_json::from_str("8").unwrap();
        let range: RepTarget = serde_json::from_str(r#"{"min": 8, "max": 12}"#).unwrap();

        assert_eq!(fixed, RepTarget::Fixed(8));
        assert_eq!(range, RepTarget::Range { min: 8, max: 12 });
        assert_eq!(range.to_string(), "8-12");
        assert_eq!(range.min(), 8);
    }

    #[test]
    fn test_session_status_display_and_parse() {
        assert_eq!(SessionStatus::InProgress.to_string(), "IN_PROGRESS");
        assert_eq!(SessionStatus::parse("ABORTED"), Some(SessionStatus::Aborted));
        assert_eq!(SessionStatus::parse("nope"), None);
        assert!(SessionStatus::Completed.is_finished());
        assert!(!SessionStatus::InProgress.is_finished());
    }

    #[test]
    fn test_set_key_display() {
        let key = SetKey::new("s1", "bench", 3);
        assert_eq!(key.to_string(), "s1:bench:3");
    }

    #[test]
    fn test_find_day_by_id_or_position() {
        let mut second = day();
        second.id = "day-b".into();
        second.day_order = 2;
        let routine = Routine {
            id: "r1".into(),
            name: "PPL".into(),
            days: vec![second, day()],
        };

        assert_eq!(routine.find_day("day-b").unwrap().id, "day-b");
        assert_eq!(routine.find_day("1").unwrap().id, "day-a");
        assert_eq!(routine.find_day("2").unwrap().id, "day-b");
        assert!(routine.find_day("0").is_none());
        assert!(routine.find_day("3").is_none());
    }

    #[test]
    fn test_validate_rejects_duplicate_set_numbers() {
        let mut routine = Routine {
            id: "r1".into(),
            name: "PPL".into(),
            days: vec![day()],
        };
        assert!(routine.validate().is_ok());

        routine.days[0].exercises[0].sets[1].set_number = 1;
        assert_matches!(
            routine.validate(),
            Err(Error::InvalidRoutine(msg)) if msg.contains("plans set 1 twice")
        );
    }

    #[test]
    fn test_validate_rejects_bad_ids_and_numbers() {
        let base = Routine {
            id: "r1".into(),
            name: "PPL".into(),
            days: vec![day()],
        };

        let mut blank = base.clone();
        blank.id = " ".into();
        assert_matches!(blank.validate(), Err(Error::InvalidRoutine(_)));

        let mut zero = base.clone();
        zero.days[0].exercises[1].sets[0].set_number = 0;
        assert_matches!(zero.validate(), Err(Error::InvalidRoutine(msg)) if msg.contains("numbered 0"));

        let mut twice = base.clone();
        twice.days.push(day());
        assert_matches!(twice.validate(), Err(Error::InvalidRoutine(msg)) if msg.contains("day-a"));

        let mut same_exercise = base;
        same_exercise.days[0].exercises[1].id = "bench".into();
        assert_matches!(same_exercise.validate(), Err(Error::InvalidRoutine(_)));
    }
}
