use crate::error::{Error, Result};
use crate::model::{SetKey, SetLog};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// What gets sent to the sink when a set is saved
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SetLogPayload {
    pub session_id: String,
    pub routine_exercise_id: String,
    pub set_number: u32,
    pub reps: i32,
    pub weight: Option<f64>,
    pub completed: bool,
}

impl SetLogPayload {
    pub fn key(&self) -> SetKey {
        SetKey::new(&self.session_id, &self.routine_exercise_id, self.set_number)
    }

    pub fn to_log(&self, updated_at: DateTime<Local>) -> SetLog {
        SetLog {
            session_id: self.session_id.clone(),
            routine_exercise_id: self.routine_exercise_id.clone(),
            set_number: self.set_number,
            reps: self.reps,
            weight: self.weight,
            completed: self.completed,
            updated_at,
        }
    }
}

/// Every rule the payload breaks, in a stable order
pub fn validation_errors(payload: &SetLogPayload) -> Vec<String> {
    let mut errors = Vec::new();
    if payload.session_id.trim().is_empty() {
        errors.push("Session ID is required".to_string());
    }
    if payload.routine_exercise_id.trim().is_empty() {
        errors.push("Exercise ID is required".to_string());
    }
    if payload.set_number < 1 {
        errors.push("Set number must be at least 1".to_string());
    }
    if payload.reps < 0 {
        errors.push("Reps cannot be negative".to_string());
    }
    match payload.weight {
        Some(w) if !w.is_finite() => errors.push("Weight must be a number".to_string()),
        Some(w) if w < 0.0 => errors.push("Weight cannot be negative".to_string()),
        _ => {}
    }
    errors
}

pub fn validate(payload: &SetLogPayload) -> Result<()> {
    match validation_errors(payload).into_iter().next() {
        Some(first) => Err(Error::Validation(first)),
        None => Ok(()),
    }
}
