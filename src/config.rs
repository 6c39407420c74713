//! Practice settings and drill tuning constants.
//!
//! `Settings` holds everything the user can change; each field is persisted
//! under its own store key and loads independently. `Tuning` holds values
//! fixed for the life of a session.

use crate::error::SettingsError;
use crate::gate::{noise_floor, DEFAULT_SENSITIVITY_INDEX};
use crate::note::{Instrument, NOTE_COUNT};
use crate::selector::{SelectionMethod, SelectionParams, DRAW_NOTE_MIN_ACCURACY, MAX_TIME_TO_CORRECT};
use crate::stats::HALF_LIFE_EMA;
use crate::store::{self, KeyValueStore};
use log::warn;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

/// Narrowest allowed practice range, in note indexes between the bounds.
pub const MIN_NOTE_RANGE: usize = 12;

/// Seconds of countdown before the first note.
pub const COUNTDOWN_SECS: u32 = 3;

/// Default session length.
pub const TIMER_SECS: u32 = 180;

/// Session lengths offered to the user.
pub const TIMER_CHOICES: [u32; 5] = [60, 120, 180, 240, 300];

/// How long feedback stays up before the next note.
pub const FEEDBACK_DURATION_MS: u64 = 600;

/// Inclusive range of note table indexes. Persisted as `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "[usize; 2]", into = "[usize; 2]")]
pub struct NoteRange {
    min: usize,
    max: usize,
}

impl NoteRange {
    /// Range inside the note table. Width is not checked here; see
    /// [`NoteRange::practice`].
    pub fn new(min: usize, max: usize) -> Result<Self, SettingsError> {
        if min > max || max >= NOTE_COUNT {
            return Err(SettingsError::RangeOutOfTable { min, max });
        }
        Ok(Self { min, max })
    }

    /// Range suitable for practice: inside the table and at least
    /// `MIN_NOTE_RANGE` wide.
    pub fn practice(min: usize, max: usize) -> Result<Self, SettingsError> {
        let range = Self::new(min, max)?;
        if max - min < MIN_NOTE_RANGE {
            return Err(SettingsError::RangeTooNarrow { min, max });
        }
        Ok(range)
    }

    pub fn min(&self) -> usize {
        self.min
    }

    pub fn max(&self) -> usize {
        self.max
    }

    /// Number of notes in the range. Never zero, since `min <= max`.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.max - self.min + 1
    }

    pub fn indexes(&self) -> RangeInclusive<usize> {
        self.min..=self.max
    }
}

impl TryFrom<[usize; 2]> for NoteRange {
    type Error = SettingsError;

    fn try_from(pair: [usize; 2]) -> Result<Self, Self::Error> {
        NoteRange::new(pair[0], pair[1])
    }
}

impl From<NoteRange> for [usize; 2] {
    fn from(range: NoteRange) -> Self {
        [range.min, range.max]
    }
}

/// User-facing practice settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub instrument: Instrument,
    pub note_index_range: NoteRange,
    pub mic_sensitivity_index: usize,
    /// Session length, `None` for an untimed session
    pub timer_secs: Option<u32>,
    /// Countdown before the first note, 0 to skip
    pub countdown_secs: u32,
    pub show_note_name: bool,
    /// Draw a new note after a wrong answer instead of retrying
    pub change_note_on_mistake: bool,
    /// Show targets with a random enharmonic spelling
    pub enharmonic_spellings: bool,
    pub draw_method: SelectionMethod,
}

impl Default for Settings {
    fn default() -> Self {
        Self::for_instrument(Instrument::default())
    }
}

impl Settings {
    pub fn for_instrument(instrument: Instrument) -> Self {
        let (min, max) = instrument.default_range();
        Self {
            instrument,
            note_index_range: NoteRange { min, max },
            mic_sensitivity_index: DEFAULT_SENSITIVITY_INDEX,
            timer_secs: Some(TIMER_SECS),
            countdown_secs: COUNTDOWN_SECS,
            show_note_name: false,
            change_note_on_mistake: false,
            enharmonic_spellings: false,
            draw_method: SelectionMethod::default(),
        }
    }

    /// Load each setting from `store`, defaulting any that are missing or
    /// malformed. The default range follows the stored instrument.
    pub fn load(store: &dyn KeyValueStore) -> Self {
        let instrument = store::load_or(store, store::KEY_INSTRUMENT, Instrument::default());
        let defaults = Self::for_instrument(instrument);
        let loaded = Self {
            instrument,
            note_index_range: store::load_or(
                store,
                store::KEY_NOTE_INDEX_RANGE,
                defaults.note_index_range,
            ),
            mic_sensitivity_index: store::load_or(
                store,
                store::KEY_MIC_SENSITIVITY,
                defaults.mic_sensitivity_index,
            ),
            timer_secs: store::load_or(store, store::KEY_TIMER_SECS, defaults.timer_secs),
            countdown_secs: store::load_or(
                store,
                store::KEY_COUNTDOWN_SECS,
                defaults.countdown_secs,
            ),
            show_note_name: store::load_or(
                store,
                store::KEY_SHOW_NOTE_NAME,
                defaults.show_note_name,
            ),
            change_note_on_mistake: store::load_or(
                store,
                store::KEY_CHANGE_NOTE_ON_MISTAKE,
                defaults.change_note_on_mistake,
            ),
            enharmonic_spellings: store::load_or(
                store,
                store::KEY_ENHARMONIC_SPELLINGS,
                defaults.enharmonic_spellings,
            ),
            draw_method: store::load_or(store, store::KEY_DRAW_METHOD, defaults.draw_method),
        };
        match loaded.validate() {
            Ok(()) => loaded,
            Err(e) => {
                warn!("Stored settings rejected ({}), using defaults", e);
                defaults
            }
        }
    }

    pub fn save(&self, store: &mut dyn KeyValueStore) {
        store::save(store, store::KEY_INSTRUMENT, &self.instrument);
        store::save(store, store::KEY_NOTE_INDEX_RANGE, &self.note_index_range);
        store::save(store, store::KEY_MIC_SENSITIVITY, &self.mic_sensitivity_index);
        store::save(store, store::KEY_TIMER_SECS, &self.timer_secs);
        store::save(store, store::KEY_COUNTDOWN_SECS, &self.countdown_secs);
        store::save(store, store::KEY_SHOW_NOTE_NAME, &self.show_note_name);
        store::save(
            store,
            store::KEY_CHANGE_NOTE_ON_MISTAKE,
            &self.change_note_on_mistake,
        );
        store::save(store, store::KEY_ENHARMONIC_SPELLINGS, &self.enharmonic_spellings);
        store::save(store, store::KEY_DRAW_METHOD, &self.draw_method);
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        let range = self.note_index_range;
        NoteRange::practice(range.min(), range.max())?;
        noise_floor(self.mic_sensitivity_index)?;
        Ok(())
    }

    /// Noise floor for the configured sensitivity.
    pub fn noise_floor(&self) -> Result<f32, SettingsError> {
        noise_floor(self.mic_sensitivity_index)
    }
}

/// Drill constants fixed when a session is built.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tuning {
    pub half_life: f64,
    pub min_accuracy: f64,
    pub max_time_to_correct: f64,
    pub feedback_ms: u64,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            half_life: HALF_LIFE_EMA,
            min_accuracy: DRAW_NOTE_MIN_ACCURACY,
            max_time_to_correct: MAX_TIME_TO_CORRECT,
            feedback_ms: FEEDBACK_DURATION_MS,
        }
    }
}

impl Tuning {
    pub fn selection(&self, method: SelectionMethod) -> SelectionParams {
        SelectionParams {
            method,
            min_accuracy: self.min_accuracy,
            max_time: self.max_time_to_correct,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    #[test]
    fn test_defaults_follow_instrument() {
        let s = Settings::for_instrument(Instrument::Piano);
        assert_eq!(s.note_index_range, NoteRange::new(40, 84).unwrap());
        assert_eq!(s.mic_sensitivity_index, 4);
        assert_eq!(s.timer_secs, Some(180));
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_range_validation() {
        assert!(NoteRange::new(10, 5).is_err());
        assert!(NoteRange::new(0, 97).is_err());
        assert_eq!(
            NoteRange::practice(40, 51),
            Err(SettingsError::RangeTooNarrow { min: 40, max: 51 })
        );
        assert_eq!(NoteRange::practice(40, 52).unwrap().len(), 13);
        assert_eq!(NoteRange::new(5, 5).unwrap().len(), 1);
    }

    #[test]
    fn test_range_serializes_as_pair() {
        let r = NoteRange::new(28, 72).unwrap();
        assert_eq!(serde_json::to_value(r).unwrap(), json!([28, 72]));
        assert!(serde_json::from_value::<NoteRange>(json!([72, 28])).is_err());
    }

    #[test]
    fn test_save_load_round_trip() {
        let mut store = MemoryStore::new();
        let mut s = Settings::for_instrument(Instrument::Piano);
        s.show_note_name = true;
        s.draw_method = SelectionMethod::AccuracyBased;
        s.timer_secs = None;
        s.save(&mut store);
        assert_eq!(Settings::load(&store), s);
    }

    #[test]
    fn test_load_falls_back_per_key() {
        let mut store = MemoryStore::new();
        store.set_raw(crate::store::KEY_INSTRUMENT, json!("piano"));
        store.set_raw(crate::store::KEY_NOTE_INDEX_RANGE, json!("garbage"));
        store.set_raw(crate::store::KEY_SHOW_NOTE_NAME, json!(true));
        let s = Settings::load(&store);
        assert_eq!(s.instrument, Instrument::Piano);
        assert_eq!(s.note_index_range, NoteRange::new(40, 84).unwrap());
        assert!(s.show_note_name);
    }

    #[test]
    fn test_invalid_stored_sensitivity_uses_defaults() {
        let mut store = MemoryStore::new();
        store.set_raw(crate::store::KEY_MIC_SENSITIVITY, json!(42));
        let s = Settings::load(&store);
        assert_eq!(s.mic_sensitivity_index, DEFAULT_SENSITIVITY_INDEX);
    }
}
