//! Note selector: builds the candidate pool and draws the next target.
//!
//! Weighted draws favour weak notes. Accuracy-based weighting uses the
//! inverse of the accuracy EMA (floored so no weight diverges); time-based
//! weighting uses the time-to-correct EMA directly (capped). Notes with no
//! history get the floor/cap, so they are drawn often.

use crate::config::NoteRange;
use crate::error::SelectError;
use crate::note::{note_at, Note, SpelledNote};
use crate::stats::{PerformanceModel, RecentNotes};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Accuracy floor for weighting; also the assumed accuracy of unseen notes.
pub const DRAW_NOTE_MIN_ACCURACY: f64 = 0.1;
/// Time-to-correct ceiling (seconds); also the assumed time of unseen notes.
pub const MAX_TIME_TO_CORRECT: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionMethod {
    /// Uniform over the candidate pool
    Random,
    AccuracyBased,
    #[default]
    TimeBased,
}

impl FromStr for SelectionMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "random" => Ok(SelectionMethod::Random),
            "accuracy-based" | "accuracy" => Ok(SelectionMethod::AccuracyBased),
            "time-based" | "time" => Ok(SelectionMethod::TimeBased),
            other => Err(format!("unknown draw method: {}", other)),
        }
    }
}

impl fmt::Display for SelectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SelectionMethod::Random => "random",
            SelectionMethod::AccuracyBased => "accuracy-based",
            SelectionMethod::TimeBased => "time-based",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectionParams {
    pub method: SelectionMethod,
    pub min_accuracy: f64,
    pub max_time: f64,
}

impl SelectionParams {
    pub fn new(method: SelectionMethod) -> Self {
        Self {
            method,
            min_accuracy: DRAW_NOTE_MIN_ACCURACY,
            max_time: MAX_TIME_TO_CORRECT,
        }
    }
}

/// Note indexes in `range` that are not in the recent buffer.
pub fn candidate_pool(range: NoteRange, recent: &RecentNotes) -> Vec<usize> {
    range.indexes().filter(|&i| !recent.contains(i)).collect()
}

/// Unnormalized draw weight for each candidate, in candidate order.
pub fn candidate_weights(
    candidates: &[usize],
    model: &PerformanceModel,
    params: &SelectionParams,
) -> Vec<f64> {
    candidates
        .iter()
        .map(|&index| {
            let note = note_at(index);
            match params.method {
                SelectionMethod::Random => 1.0,
                SelectionMethod::AccuracyBased => {
                    let accuracy = model
                        .accuracy(&note)
                        .unwrap_or(params.min_accuracy)
                        .max(params.min_accuracy);
                    1.0 / accuracy
                }
                SelectionMethod::TimeBased => model
                    .time_to_correct(&note)
                    .unwrap_or(params.max_time)
                    .min(params.max_time),
            }
        })
        .collect()
}

/// Draw the next target from `candidates`.
///
/// Returns the note and its table index. The caller records the index in
/// the model's recent buffer.
pub fn draw_note<R: Rng + ?Sized>(
    candidates: &[usize],
    model: &PerformanceModel,
    params: &SelectionParams,
    rng: &mut R,
) -> Result<(Note, usize), SelectError> {
    if candidates.is_empty() {
        return Err(SelectError::NoEligibleNotes);
    }

    let weights = candidate_weights(candidates, model, params);
    let total: f64 = weights.iter().sum();

    let position = if total > 0.0 && total.is_finite() {
        let r: f64 = rng.gen();
        let mut cumulative = 0.0;
        weights
            .iter()
            .position(|w| {
                cumulative += w / total;
                r < cumulative
            })
            // Rounding can leave the last cumulative value just under 1.0.
            .unwrap_or(candidates.len() - 1)
    } else {
        // All weights zero (e.g. every time EMA is 0): fall back to uniform.
        rng.gen_range(0..candidates.len())
    };

    let index = candidates[position];
    Ok((note_at(index), index))
}

/// Pick a random spelling of `note` among `enabled` spellings.
/// Falls back to the canonical spelling when none of its spellings is enabled.
pub fn draw_spelling<R: Rng + ?Sized>(note: Note, enabled: &[&str], rng: &mut R) -> SpelledNote {
    let names: Vec<&'static str> = note
        .name
        .spellings()
        .iter()
        .copied()
        .filter(|s| enabled.contains(s))
        .collect();
    if names.is_empty() {
        return note.spelled();
    }
    let choice = names[rng.gen_range(0..names.len())];
    SpelledNote::from_note(note, choice)
}
