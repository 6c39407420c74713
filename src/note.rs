//! Note model: pitch classes, the chromatic note table, enharmonic spellings,
//! and the display/image keys handed to the UI layer.
//!
//! Note identity is always the canonical (pitch class, octave) pair. Spellings
//! such as `B#3` or `Db4` exist only for display and map back onto the
//! canonical note before any comparison.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// One of the twelve equal-tempered pitch classes, in ascending order from C.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PitchClass {
    C,
    #[serde(rename = "C#")]
    Cs,
    D,
    #[serde(rename = "D#")]
    Ds,
    E,
    F,
    #[serde(rename = "F#")]
    Fs,
    G,
    #[serde(rename = "G#")]
    Gs,
    A,
    #[serde(rename = "A#")]
    As,
    B,
}

impl PitchClass {
    pub const ALL: [PitchClass; 12] = [
        PitchClass::C,
        PitchClass::Cs,
        PitchClass::D,
        PitchClass::Ds,
        PitchClass::E,
        PitchClass::F,
        PitchClass::Fs,
        PitchClass::G,
        PitchClass::Gs,
        PitchClass::A,
        PitchClass::As,
        PitchClass::B,
    ];

    /// Pitch class for a semitone offset above C. Panics outside 0..12.
    pub fn from_index(index: usize) -> Self {
        Self::ALL[index]
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// Canonical (sharp) name.
    pub fn name(self) -> &'static str {
        NOTE_NAMES[self.index()]
    }

    /// Every spelling of this pitch class, canonical name first.
    pub fn spellings(self) -> &'static [&'static str] {
        ENHARMONIC_NAMES[self.index()]
    }
}

impl fmt::Display for PitchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Enharmonic spellings per pitch class, indexed like `NOTE_NAMES`.
pub const ENHARMONIC_NAMES: [&[&str]; 12] = [
    &["C", "B#"],
    &["C#", "Db"],
    &["D"],
    &["D#", "Eb"],
    &["E", "Fb"],
    &["F", "E#"],
    &["F#", "Gb"],
    &["G"],
    &["G#", "Ab"],
    &["A"],
    &["A#", "Bb"],
    &["B", "Cb"],
];

/// Highest octave in the table. The table ends on C of this octave.
pub const MAX_OCTAVE: i32 = 8;

/// Number of notes from C0 to C8 inclusive.
pub const NOTE_COUNT: usize = (MAX_OCTAVE as usize) * 12 + 1;

/// A canonical chromatic note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Note {
    pub name: PitchClass,
    pub octave: i32,
}

impl Note {
    pub fn new(name: PitchClass, octave: i32) -> Self {
        Self { name, octave }
    }

    /// Semitones above C0. Negative below C0.
    pub fn semitone(&self) -> i64 {
        self.octave as i64 * 12 + self.name.index() as i64
    }

    /// Inverse of [`Note::semitone`], using floored division so negative
    /// semitones land in the octave below rather than wrapping.
    pub fn from_semitone(semitone: i64) -> Self {
        let octave = semitone.div_euclid(12) as i32;
        let pitch_class = semitone.rem_euclid(12) as usize;
        Self::new(PitchClass::from_index(pitch_class), octave)
    }

    pub fn transpose_octaves(&self, shift: i32) -> Self {
        Self::new(self.name, self.octave + shift)
    }

    /// Stats and image key: lowercase name, `#` written as `s`, then octave
    /// (`C#4` becomes `cs4`).
    pub fn key(&self) -> String {
        format!("{}{}", spelling_key(self.name.name()), self.octave)
    }

    /// Canonical sharp spelling of this note.
    pub fn spelled(&self) -> SpelledNote {
        SpelledNote::from_note(*self, self.name.name())
    }
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.octave)
    }
}

impl FromStr for Note {
    type Err = String;

    /// Parses any spelling (`C#4`, `Db4`, `B#3`) into its canonical note.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SpelledNote::parse(s)
            .map(|spelled| spelled.to_note())
            .ok_or_else(|| format!("unrecognised note name: {}", s))
    }
}

fn spelling_key(spelling: &str) -> String {
    spelling.replace('#', "s").to_lowercase()
}

/// Semitone offset of a letter name from C.
fn letter_offset(letter: char) -> Option<i64> {
    match letter {
        'C' => Some(0),
        'D' => Some(2),
        'E' => Some(4),
        'F' => Some(5),
        'G' => Some(7),
        'A' => Some(9),
        'B' => Some(11),
        _ => None,
    }
}

/// A note as written for display: a spelling plus the written octave.
///
/// The written octave follows the letter, so C4 spelled as B# is `B#3`
/// and B3 spelled as Cb is `Cb4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SpelledNote {
    pub spelling: &'static str,
    pub octave: i32,
}

impl SpelledNote {
    /// Spell `note` with `spelling`, which must be one of its pitch class's
    /// enharmonic names.
    pub fn from_note(note: Note, spelling: &'static str) -> Self {
        debug_assert!(
            note.name.spellings().contains(&spelling),
            "{} is not a spelling of {}",
            spelling,
            note.name
        );
        let spelled = Self {
            spelling,
            octave: note.octave,
        };
        // Letter wrapped past the octave boundary (B# or Cb).
        let shift = note.semitone() - spelled.written_semitone();
        Self {
            spelling,
            octave: note.octave + shift.div_euclid(12) as i32,
        }
    }

    fn written_semitone(&self) -> i64 {
        let mut chars = self.spelling.chars();
        let letter = chars.next().and_then(letter_offset).unwrap_or(0);
        let accidental: i64 = chars
            .map(|c| match c {
                '#' => 1,
                'b' => -1,
                _ => 0,
            })
            .sum();
        self.octave as i64 * 12 + letter + accidental
    }

    /// Canonical note this spelling sounds as.
    pub fn to_note(&self) -> Note {
        Note::from_semitone(self.written_semitone())
    }

    /// Parse `<letter>[#|b]<octave>`. Returns `None` for anything else.
    pub fn parse(s: &str) -> Option<Self> {
        let split = s.find(|c: char| c == '-' || c.is_ascii_digit())?;
        let (name, octave) = s.split_at(split);
        let octave: i32 = octave.parse().ok()?;
        let spelling = ENHARMONIC_NAMES
            .iter()
            .flat_map(|names| names.iter())
            .find(|&&candidate| candidate == name)
            .copied()?;
        Some(Self {
            spelling,
            octave,
        })
    }

    /// Image key for this spelling (`Db4` becomes `db4`).
    pub fn key(&self) -> String {
        format!("{}{}", spelling_key(self.spelling), self.octave)
    }

    /// Image path for the UI, with the instrument's display octave shift.
    /// Without a note the placeholder image is used.
    pub fn image_path(note: Option<&SpelledNote>, octave_shift: i32) -> String {
        match note {
            Some(n) => {
                let shifted = SpelledNote {
                    spelling: n.spelling,
                    octave: n.octave + octave_shift,
                };
                format!("notes/{}.svg", shifted.key())
            }
            None => PLACEHOLDER_IMAGE.to_string(),
        }
    }
}

impl fmt::Display for SpelledNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.spelling, self.octave)
    }
}

pub const PLACEHOLDER_IMAGE: &str = "notes/the_lick.svg";

/// The canonical note table, C0 to C8 in ascending pitch order.
/// A note's position in this table is its note index.
pub fn notes() -> &'static [Note] {
    static NOTES: OnceLock<Vec<Note>> = OnceLock::new();
    NOTES.get_or_init(|| (0..NOTE_COUNT as i64).map(Note::from_semitone).collect())
}

/// Note at `index`. Panics if the index is outside the table.
pub fn note_at(index: usize) -> Note {
    notes()[index]
}

/// Table index of `note`, if it lies within C0..=C8.
pub fn index_of(note: &Note) -> Option<usize> {
    let semitone = note.semitone();
    if (0..NOTE_COUNT as i64).contains(&semitone) {
        Some(semitone as usize)
    } else {
        None
    }
}

// ─── Instruments ────────────────────────────────────────────────────────────

/// Instrument being practised. Guitar is written an octave above sounding pitch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Instrument {
    #[default]
    Guitar,
    Piano,
}

impl Instrument {
    /// Octaves added to the sounding note when choosing its notation image.
    pub fn octave_shift(self) -> i32 {
        match self {
            Instrument::Guitar => 1,
            Instrument::Piano => 0,
        }
    }

    /// Default practice range as note table indexes (inclusive).
    pub fn default_range(self) -> (usize, usize) {
        match self {
            Instrument::Guitar => (28, 72), // E2 - C6
            Instrument::Piano => (40, 84),  // E3 - C7
        }
    }
}

impl FromStr for Instrument {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "guitar" => Ok(Instrument::Guitar),
            "piano" => Ok(Instrument::Piano),
            other => Err(format!("unknown instrument: {}", other)),
        }
    }
}
