//! Session progress derived from planned set templates and logged sets.
//!
//! Everything here is a pure function of its inputs.

use crate::model::{RepTarget, RoutineExercise, SetLog};
use crate::util::percentage;
use itertools::Itertools;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionProgress {
    pub total_sets: usize,
    pub completed_sets: usize,
    pub percentage: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExerciseCompletion {
    pub exercise_id: String,
    pub completed_sets: usize,
    pub total_sets: usize,
    pub percentage: u32,
    pub is_complete: bool,
}

/// A planned set with whatever has been logged merged over it
#[derive(Debug, Clone, PartialEq)]
pub struct MergedSet {
    pub set_number: u32,
    pub target: RepTarget,
    pub planned_weight: Option<f64>,
    pub reps: i32,
    pub weight: Option<f64>,
    pub completed: bool,
    pub logged: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExerciseWithSets {
    pub exercise_id: String,
    pub name: String,
    pub order: u32,
    pub sets: Vec<MergedSet>,
}

pub fn total_sets(exercises: &[RoutineExercise]) -> usize {
    exercises.iter().map(|e| e.sets.len()).sum()
}

/// Distinct planned (exercise, set) pairs that have a completed log.
/// Logs that match no planned set are ignored, so this never exceeds `total_sets`.
pub fn completed_sets(logs: &[SetLog], exercises: &[RoutineExercise]) -> usize {
    let completed: HashSet<(&str, u32)> = logs
        .iter()
        .filter(|l| l.completed)
        .map(|l| (l.routine_exercise_id.as_str(), l.set_number))
        .collect();

    exercises
        .iter()
        .flat_map(|e| e.sets.iter().map(move |s| (e.id.as_str(), s.set_number)))
        .unique()
        .filter(|pair| completed.contains(pair))
        .count()
}

pub fn calculate_session_progress(
    logs: &[SetLog],
    exercises: &[RoutineExercise],
) -> SessionProgress {
    let total = total_sets(exercises);
    let completed = completed_sets(logs, exercises);
    SessionProgress {
        total_sets: total,
        completed_sets: completed,
        percentage: percentage(completed, total),
    }
}

pub fn exercise_completion(exercise: &RoutineExercise, logs: &[SetLog]) -> ExerciseCompletion {
    let total = exercise.sets.len();
    let completed = completed_sets(logs, std::slice::from_ref(exercise));
    ExerciseCompletion {
        exercise_id: exercise.id.clone(),
        completed_sets: completed,
        total_sets: total,
        percentage: percentage(completed, total),
        is_complete: completed == total,
    }
}

pub fn are_all_sets_completed(logs: &[SetLog], exercises: &[RoutineExercise]) -> bool {
    if exercises.is_empty() {
        return true;
    }
    if logs.is_empty() {
        return false;
    }
    completed_sets(logs, exercises) == total_sets(exercises)
}

/// Exercises in declared order, each with its sets in set-number order and
/// logged values merged over the plan. Unlogged reps read as 0 and unlogged
/// weight falls back to the planned weight.
pub fn group_exercises_with_sets(
    exercises: &[RoutineExercise],
    logs: &[SetLog],
) -> Vec<ExerciseWithSets> {
    exercises
        .iter()
        .sorted_by_key(|e| e.order)
        .map(|exercise| {
            let sets = exercise
                .sets
                .iter()
                .sorted_by_key(|s| s.set_number)
                .map(|planned| {
                    let log = logs.iter().find(|l| {
                        l.routine_exercise_id == exercise.id && l.set_number == planned.set_number
                    });
                    MergedSet {
                        set_number: planned.set_number,
                        target: planned.reps,
                        planned_weight: planned.weight,
                        reps: log.map_or(0, |l| l.reps),
                        weight: log.and_then(|l| l.weight).or(planned.weight),
                        completed: log.is_some_and(|l| l.completed),
                        logged: log.is_some(),
                    }
                })
                .collect();

            ExerciseWithSets {
                exercise_id: exercise.id.clone(),
                name: exercise.name.clone(),
                order: exercise.order,
                sets,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RoutineSet;
    use chrono::Local;

    fn exercise(id: &str, order: u32, set_count: u32, weight: Option<f64>) -> RoutineExercise {
        RoutineExercise {
            id: id.to_string(),
            name: id.to_uppercase(),
            order,
            sets: (1..=set_count)
                .map(|n| RoutineSet {
                    set_number: n,
                    reps: RepTarget::Fixed(5),
                    weight,
                })
                .collect(),
        }
    }

    fn log(exercise_id: &str, set_number: u32, reps: i32, completed: bool) -> SetLog {
        SetLog {
            session_id: "s1".to_string(),
            routine_exercise_id: exercise_id.to_string(),
            set_number,
            reps,
            weight: None,
            completed,
            updated_at: Local::now(),
        }
    }

    #[test]
    fn test_progress_counts_completed_sets() {
        let exercises = vec![exercise("squat", 1, 3, Some(100.0))];
        let logs = vec![log("squat", 1, 5, true), log("squat", 2, 5, true)];

        let progress = calculate_session_progress(&logs, &exercises);

        assert_eq!(progress.total_sets, 3);
        assert_eq!(progress.completed_sets, 2);
        assert_eq!(progress.percentage, 67);
    }

    #[test]
    fn test_progress_with_no_planned_sets_is_zero() {
        let progress = calculate_session_progress(&[log("squat", 1, 5, true)], &[]);
        assert_eq!(progress.total_sets, 0);
        assert_eq!(progress.completed_sets, 0);
        assert_eq!(progress.percentage, 0);
    }

    #[test]
    fn test_completed_never_exceeds_total() {
        let exercises = vec![exercise("squat", 1, 2, None)];
        let logs = vec![
            log("squat", 1, 5, true),
            log("squat", 1, 6, true),
            log("squat", 2, 5, true),
            log("squat", 9, 5, true),
            log("deadlift", 1, 5, true),
        ];

        assert_eq!(completed_sets(&logs, &exercises), 2);
        assert!(completed_sets(&logs, &exercises) <= total_sets(&exercises));
    }

    #[test]
    fn test_incomplete_logs_do_not_count() {
        let exercises = vec![exercise("row", 1, 2, None)];
        let logs = vec![log("row", 1, 8, false)];
        assert_eq!(completed_sets(&logs, &exercises), 0);
    }

    #[test]
    fn test_exercise_completion() {
        let bench = exercise("bench", 1, 4, Some(60.0));
        let logs = vec![log("bench", 1, 5, true), log("bench", 2, 5, false)];

        let c = exercise_completion(&bench, &logs);
        assert_eq!(c.completed_sets, 1);
        assert_eq!(c.total_sets, 4);
        assert_eq!(c.percentage, 25);
        assert!(!c.is_complete);
    }

    #[test]
    fn test_are_all_sets_completed_edges() {
        let exercises = vec![exercise("bench", 1, 1, None)];
        assert!(!are_all_sets_completed(&[], &exercises));
        assert!(are_all_sets_completed(&[log("bench", 1, 5, false)], &[]));
        assert!(are_all_sets_completed(&[], &[]));
    }

    #[test]
    fn test_are_all_sets_completed() {
        let exercises = vec![exercise("bench", 1, 2, None), exercise("fly", 2, 1, None)];
        let mut logs = vec![log("bench", 1, 5, true), log("bench", 2, 5, true)];
        assert!(!are_all_sets_completed(&logs, &exercises));

        logs.push(log("fly", 1, 12, true));
        assert!(are_all_sets_completed(&logs, &exercises));
    }

    #[test]
    fn test_group_sorts_and_merges() {
        let mut bench = exercise("bench", 2, 0, None);
        bench.sets = vec![
            RoutineSet {
                set_number: 2,
                reps: RepTarget::Fixed(5),
                weight: Some(80.0),
            },
            RoutineSet {
                set_number: 1,
                reps: RepTarget::Fixed(5),
                weight: Some(80.0),
            },
        ];
        let squat = exercise("squat", 1, 1, Some(120.0));
        let mut logged = log("bench", 2, 4, true);
        logged.weight = Some(77.5);

        let grouped = group_exercises_with_sets(&[bench, squat], &[logged]);

        assert_eq!(grouped[0].exercise_id, "squat");
        assert_eq!(grouped[1].exercise_id, "bench");

        let bench_sets = &grouped[1].sets;
        assert_eq!(bench_sets[0].set_number, 1);
        assert_eq!(bench_sets[0].reps, 0);
        assert_eq!(bench_sets[0].weight, Some(80.0));
        assert!(!bench_sets[0].logged);

        assert_eq!(bench_sets[1].set_number, 2);
        assert_eq!(bench_sets[1].reps, 4);
        assert_eq!(bench_sets[1].weight, Some(77.5));
        assert!(bench_sets[1].completed);
    }

    #[test]
    fn test_group_is_deterministic() {
        let exercises = vec![exercise("a", 1, 2, None), exercise("b", 1, 2, None)];
        let logs = vec![log("b", 2, 3, true)];
        assert_eq!(
            group_exercises_with_sets(&exercises, &logs),
            group_exercises_with_sets(&exercises, &logs)
        );
    }
}
