//! Frequency to note resolution in 12-tone equal temperament, referenced to C0.

use crate::note::Note;

/// Reference frequency of C0 in Hz.
pub const C0_HZ: f64 = 16.35;

/// Round a fractional semitone to the nearest integer.
///
/// Exact ties round away from zero: 48.5 resolves to 49 (the upper note)
/// and -0.5 resolves to -1.
pub fn round_semitone(semitone: f64) -> i64 {
    semitone.round() as i64
}

/// Fractional semitones above C0 for `freq_hz`.
pub fn semitones_above_c0(freq_hz: f64) -> f64 {
    12.0 * (freq_hz / C0_HZ).log2()
}

/// Resolve a frequency to the nearest canonical note.
///
/// Returns `None` for zero, negative, or non-finite input. Frequencies below
/// C0 resolve to negative octaves rather than wrapping.
pub fn note_from_frequency(freq_hz: f64) -> Option<Note> {
    if !freq_hz.is_finite() || freq_hz <= 0.0 {
        return None;
    }
    Some(Note::from_semitone(round_semitone(semitones_above_c0(freq_hz))))
}

/// Equal-tempered frequency of `note`.
pub fn note_frequency(note: &Note) -> f64 {
    C0_HZ * 2.0_f64.powf(note.semitone() as f64 / 12.0)
}
