//! Per-note performance model.
//!
//! Accuracy and time-to-correct are tracked per note as exponential moving
//! averages keyed by the note's stats key (`cs4`). A short buffer of recently
//! drawn note indexes keeps the selector from repeating itself.

use crate::error::StatsError;
use crate::note::{notes, Note};
use log::warn;
use std::collections::{BTreeMap, VecDeque};

/// Trials after which an observation's weight has halved.
pub const HALF_LIFE_EMA: f64 = 5.0;

/// Hard ceiling on the recent-note buffer.
pub const MAX_INDEX_BUFFER_SIZE: usize = 10;
/// Recent-note buffer size as a fraction of the candidate pool.
pub const INDEX_BUFFER_SIZE_FRACTION: f64 = 0.2;

/// Seconds treated as the slowest colour bucket when showing time stats.
pub const MAX_TIME_TO_CORRECT_STATS: f64 = 2.0;

/// Diverging colour scale for stats, worst to best.
pub const NOTE_STATS_COLOR_MAP: [&str; 10] = [
    "#8e0152", "#c51b7d", "#de77ae", "#f1b6da", "#fde0ef", "#e6f5d0", "#b8e186", "#7fbc41",
    "#4d9221", "#276419",
];

/// Colour shown for a note with no data.
pub const NO_DATA_COLOR: &str = "#000000";

/// Per-note stat, `None` when never attempted. Serializes as a JSON object
/// of `key: number | null`.
pub type NoteStats = BTreeMap<String, Option<f64>>;

/// Stats map with every note in the table present and unattempted.
pub fn initialize_note_stats() -> NoteStats {
    notes().iter().map(|n| (n.key(), None)).collect()
}

/// Smoothing factor for a half-life measured in observations.
pub fn alpha_from_half_life(half_life: f64) -> f64 {
    1.0 - (0.5_f64.ln() / half_life).exp()
}

/// Exponential moving average with a fixed smoothing factor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ema {
    alpha: f64,
}

impl Ema {
    pub fn from_half_life(half_life: f64) -> Self {
        Self {
            alpha: alpha_from_half_life(half_life),
        }
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Fold `value` into `prev`. The first observation is taken as-is.
    pub fn update(&self, prev: Option<f64>, value: f64) -> f64 {
        match prev {
            Some(old) => self.alpha * value + (1.0 - self.alpha) * old,
            None => value,
        }
    }
}

/// Bounded, most-recent-last buffer of drawn note indexes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecentNotes {
    indexes: VecDeque<usize>,
}

impl RecentNotes {
    pub fn from_indexes(indexes: Vec<usize>) -> Self {
        Self {
            indexes: indexes.into(),
        }
    }

    /// Exclusion window for a pool of `pool_size` notes.
    pub fn capacity_for(pool_size: usize) -> usize {
        let scaled = (INDEX_BUFFER_SIZE_FRACTION * pool_size as f64).round() as usize;
        MAX_INDEX_BUFFER_SIZE.min(scaled)
    }

    /// Record a draw and drop the oldest entries beyond the window.
    pub fn push(&mut self, index: usize, pool_size: usize) {
        self.indexes.push_back(index);
        let cap = Self::capacity_for(pool_size);
        while self.indexes.len() > cap {
            self.indexes.pop_front();
        }
    }

    pub fn contains(&self, index: usize) -> bool {
        self.indexes.contains(&index)
    }

    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }

    pub fn to_vec(&self) -> Vec<usize> {
        self.indexes.iter().copied().collect()
    }
}

/// Accuracy and time-to-correct EMAs plus the recent-note buffer.
#[derive(Debug, Clone)]
pub struct PerformanceModel {
    ema: Ema,
    accuracy: NoteStats,
    time_to_correct: NoteStats,
    recent: RecentNotes,
}

impl PerformanceModel {
    pub fn new(half_life: f64) -> Self {
        Self {
            ema: Ema::from_half_life(half_life),
            accuracy: initialize_note_stats(),
            time_to_correct: initialize_note_stats(),
            recent: RecentNotes::default(),
        }
    }

    /// Rebuild from persisted parts. Missing notes are filled in as unattempted.
    ///
    /// Stored values outside their domain (accuracy not in `[0, 1]`, negative
    /// or non-finite times) and unknown keys are dropped back to unattempted.
    pub fn from_parts(
        half_life: f64,
        accuracy: NoteStats,
        time_to_correct: NoteStats,
        recent: RecentNotes,
    ) -> Self {
        let mut model = Self::new(half_life);
        merge_stats(&mut model.accuracy, accuracy, "accuracy", |v| {
            (0.0..=1.0).contains(&v)
        });
        merge_stats(&mut model.time_to_correct, time_to_correct, "time", |v| {
            v.is_finite() && v >= 0.0
        });
        model.recent = recent;
        model
    }

    pub fn ema(&self) -> Ema {
        self.ema
    }

    pub fn accuracy(&self, note: &Note) -> Option<f64> {
        self.accuracy.get(&note.key()).copied().flatten()
    }

    pub fn time_to_correct(&self, note: &Note) -> Option<f64> {
        self.time_to_correct.get(&note.key()).copied().flatten()
    }

    pub fn accuracies(&self) -> &NoteStats {
        &self.accuracy
    }

    pub fn times_to_correct(&self) -> &NoteStats {
        &self.time_to_correct
    }

    pub fn recent(&self) -> &RecentNotes {
        &self.recent
    }

    /// Fold one accuracy outcome (1.0 correct, 0.0 incorrect) into `note`.
    pub fn update_accuracy(&mut self, note: &Note, outcome: f64) -> f64 {
        let entry = self.accuracy.entry(note.key()).or_insert(None);
        let updated = self.ema.update(*entry, outcome);
        *entry = Some(updated);
        updated
    }

    /// Fold one time-to-correct observation (seconds) into `note`.
    pub fn update_time_to_correct(&mut self, note: &Note, secs: f64) -> f64 {
        let entry = self.time_to_correct.entry(note.key()).or_insert(None);
        let updated = self.ema.update(*entry, secs);
        *entry = Some(updated);
        updated
    }

    /// Record an answered trial. Time is only recorded for correct answers.
    pub fn record_answer(&mut self, note: &Note, correct: bool, elapsed_secs: f64) {
        self.update_accuracy(note, if correct { 1.0 } else { 0.0 });
        if correct {
            self.update_time_to_correct(note, elapsed_secs);
        }
    }

    pub fn push_recent(&mut self, index: usize, pool_size: usize) {
        self.recent.push(index, pool_size);
    }

    /// Forget all performance history.
    pub fn reset(&mut self) {
        self.accuracy = initialize_note_stats();
        self.time_to_correct = initialize_note_stats();
        self.recent = RecentNotes::default();
    }
}

/// Colour bucket for a stat in `[0, 1]`; unattempted notes are black.
pub fn stat_color(value: Option<f64>) -> Result<&'static str, StatsError> {
    let value = match value {
        Some(v) => v,
        None => return Ok(NO_DATA_COLOR),
    };
    if !(0.0..=1.0).contains(&value) {
        return Err(StatsError::ValueOutOfRange { value });
    }
    let index = (value * (NOTE_STATS_COLOR_MAP.len() - 1) as f64).floor() as usize;
    Ok(NOTE_STATS_COLOR_MAP[index])
}

/// Colour for a time-to-correct EMA: fast is good, capped at
/// `MAX_TIME_TO_CORRECT_STATS`.
pub fn time_color(secs: Option<f64>) -> &'static str {
    match secs {
        Some(t) => {
            let normalized = 1.0 - (t / MAX_TIME_TO_CORRECT_STATS).clamp(0.0, 1.0);
            stat_color(Some(normalized)).unwrap_or(NO_DATA_COLOR)
        }
        None => NO_DATA_COLOR,
    }
}

fn merge_stats(into: &mut NoteStats, loaded: NoteStats, what: &str, valid: impl Fn(f64) -> bool) {
    for (key, value) in loaded {
        let Some(slot) = into.get_mut(&key) else {
            warn!("Ignoring stored {} for unknown note {:?}", what, key);
            continue;
        };
        *slot = match value {
            Some(v) if !valid(v) => {
                warn!("Stored {} for {} is corrupt ({}), resetting", what, key, v);
                None
            }
            other => other,
        };
    }
}
