//! Reps-to-failure progression.
//!
//! Each training week prescribes straight sets at a percentage of the training
//! max, finishing with an AMRAP set. How far the lifter lands over or under the
//! AMRAP target moves the training max for the following week.

use crate::model::TmAdjustment;
use crate::util::{round_to, round_to_increment};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const PROGRAM_WEEKS: u32 = 21;
pub const DEFAULT_ROUNDING_KG: f64 = 5.0;
pub const DELOAD_INTENSITY: f64 = 0.60;
pub const DELOAD_SETS: u32 = 3;
pub const DELOAD_REPS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeekTarget {
    pub week: u32,
    pub intensity: f64,
    pub sets: u32,
    pub reps: u32,
    pub amrap_target: Option<u32>,
    pub is_deload: bool,
}

impl WeekTarget {
    pub fn training(week: u32, intensity: f64, sets: u32, reps: u32, amrap_target: u32) -> Self {
        Self {
            week,
            intensity,
            sets,
            reps,
            amrap_target: Some(amrap_target),
            is_deload: false,
        }
    }

    pub fn deload(week: u32) -> Self {
        Self {
            week,
            intensity: DELOAD_INTENSITY,
            sets: DELOAD_SETS,
            reps: DELOAD_REPS,
            amrap_target: None,
            is_deload: true,
        }
    }
}

/// Three 7-week blocks, each ending in a deload (weeks 7, 14, 21).
/// Intensity climbs and the AMRAP target drops through each wave.
pub fn default_program() -> Vec<WeekTarget> {
    // (intensity, sets, reps, amrap target) for the six training weeks of a block
    const BLOCKS: [[(f64, u32, u32, u32); 6]; 3] = [
        [
            (0.70, 4, 5, 10),
            (0.75, 4, 4, 8),
            (0.80, 4, 3, 6),
            (0.725, 4, 5, 9),
            (0.775, 4, 4, 7),
            (0.825, 4, 3, 5),
        ],
        [
            (0.75, 4, 4, 8),
            (0.80, 4, 3, 6),
            (0.85, 4, 2, 4),
            (0.775, 4, 4, 7),
            (0.825, 4, 3, 5),
            (0.875, 4, 2, 3),
        ],
        [
            (0.80, 4, 3, 6),
            (0.85, 4, 2, 4),
            (0.90, 4, 1, 2),
            (0.825, 4, 3, 5),
            (0.875, 4, 2, 3),
            (0.925, 4, 1, 1),
        ],
    ];

    let mut weeks = Vec::with_capacity(PROGRAM_WEEKS as usize);
    for block in BLOCKS.iter() {
        for &(intensity, sets, reps, target) in block.iter() {
            weeks.push(WeekTarget::training(
                weeks.len() as u32 + 1,
                intensity,
                sets,
                reps,
                target,
            ));
        }
        weeks.push(WeekTarget::deload(weeks.len() as u32 + 1));
    }
    weeks
}

/// Fractional training-max change for landing `diff` reps over (or under) target
pub fn tm_adjustment_percent(diff: i32) -> f64 {
    match diff {
        d if d >= 5 => 0.03,
        4 => 0.02,
        3 => 0.015,
        2 => 0.01,
        1 => 0.005,
        0 => 0.0,
        -1 => -0.02,
        _ => -0.05,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeekLog {
    pub week: u32,
    pub training_max: f64,
    pub working_weight: f64,
    pub intensity: f64,
    pub sets: u32,
    pub reps: u32,
    pub amrap_target: Option<u32>,
    pub amrap_reps: Option<u32>,
    pub is_deload: bool,
    /// Change applied to the training max at the start of this week
    pub tm_change_percent: f64,
}

/// Week-by-week log for `program`, starting from `starting_tm`.
///
/// `amrap_results` maps week number to reps achieved on that week's AMRAP set.
/// A training week adjusts the training max from the previous week's AMRAP
/// when that result is known; deload weeks never adjust and run at fixed
/// intensity, sets and reps.
pub fn calculate_progression(
    starting_tm: f64,
    program: &[WeekTarget],
    amrap_results: &BTreeMap<u32, u32>,
    rounding_kg: f64,
) -> Vec<WeekLog> {
    let mut weeks: Vec<WeekTarget> = program.to_vec();
    weeks.sort_by_key(|w| w.week);

    let mut training_max = starting_tm;
    let mut logs: Vec<WeekLog> = Vec::with_capacity(weeks.len());

    for target in weeks {
        let mut change = 0.0;
        if !target.is_deload {
            let previous = logs
                .last()
                .filter(|prev| !prev.is_deload && prev.week + 1 == target.week);
            if let Some(prev) = previous {
                if let (Some(goal), Some(done)) = (prev.amrap_target, prev.amrap_reps) {
                    change = tm_adjustment_percent(done as i32 - goal as i32);
                    training_max = round_to(training_max * (1.0 + change), 2);
                }
            }
        }

        let (intensity, sets, reps, amrap_target) = if target.is_deload {
            (DELOAD_INTENSITY, DELOAD_SETS, DELOAD_REPS, None)
        } else {
            (target.intensity, target.sets, target.reps, target.amrap_target)
        };

        logs.push(WeekLog {
            week: target.week,
            training_max,
            working_weight: round_to_increment(training_max * intensity, rounding_kg),
            intensity,
            sets,
            reps,
            amrap_target,
            amrap_reps: if target.is_deload {
                None
            } else {
                amrap_results.get(&target.week).copied()
            },
            is_deload: target.is_deload,
            tm_change_percent: change,
        });
    }

    logs
}

/// Adjustment events for every week whose training max moved
pub fn tm_adjustments(exercise_id: &str, logs: &[WeekLog]) -> Vec<TmAdjustment> {
    logs.windows(2)
        .filter(|pair| pair[1].tm_change_percent != 0.0)
        .map(|pair| TmAdjustment {
            exercise_id: exercise_id.to_string(),
            week_number: pair[1].week,
            previous_tm: pair[0].training_max,
            new_tm: pair[1].training_max,
            percent: pair[1].tm_change_percent,
        })
        .collect()
}
